// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Eventual values on top of `tokio::watch`.
//!
//! An [`Eventual`] holds the latest successfully computed value of an async
//! derivation and broadcasts changes downstream. Failed derivations are
//! quarantined at the cell that produced them: downstream cells keep the
//! previous successful value and never observe the failure.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    select,
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::debug;

/// A tick from [`timer`]. Carries no data; only the firing matters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick;

/// The source of an eventual has shut down and no value was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("eventual source closed")]
pub struct Closed;

/// The latest successfully derived value of an asynchronous derivation.
///
/// Cheap to clone; all clones observe the same underlying cell.
pub struct Eventual<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T> Clone for Eventual<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

/// Write side of an [`Eventual`], for sources that produce values by hand.
pub struct EventualWriter<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> EventualWriter<T> {
    /// Publishes a new value. Writes equal to the current value are not
    /// re-broadcast.
    pub fn write(&self, value: T) {
        publish(&self.tx, value);
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Eventual<T> {
    /// A fresh cell with no value yet, plus its writer.
    pub fn new() -> (EventualWriter<T>, Eventual<T>) {
        let (tx, rx) = watch::channel(None);
        (EventualWriter { tx }, Eventual { rx })
    }

    /// The latest value, if any has been produced yet.
    pub fn value_immediate(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Waits for the first value.
    pub async fn value(&self) -> Result<T, Closed> {
        let mut rx = self.rx.clone();
        let value = rx.wait_for(|v| v.is_some()).await.map_err(|_| Closed)?;
        value.clone().ok_or(Closed)
    }

    /// Derives a new eventual by applying `f` to every new value.
    pub fn map<U, F, Fut>(&self, f: F) -> Eventual<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        self.derive(move |value| {
            let fut = f(value);
            async move { Some(fut.await) }
        })
    }

    /// Derives a new eventual, retaining the previous successful value when
    /// a derivation fails. `on_error` observes each failure exactly once.
    pub fn try_map<U, F, Fut, E>(&self, f: F, on_error: E) -> Eventual<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
        E: Fn(anyhow::Error) + Send + Sync + 'static,
    {
        let on_error = Arc::new(on_error);
        self.derive(move |value| {
            let fut = f(value);
            let on_error = on_error.clone();
            async move {
                match fut.await {
                    Ok(derived) => Some(derived),
                    Err(err) => {
                        on_error(err);
                        None
                    }
                }
            }
        })
    }

    /// Spawns a terminal consumer running `f` on every new value.
    ///
    /// Invocations are serialized. Values arriving while `f` is still
    /// running are coalesced: only the latest pending value runs next,
    /// intermediate values are dropped.
    pub fn pipe<F, Fut>(&self, f: F) -> JoinHandle<()>
    where
        F: Fn(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut rx = self.rx.clone();
        tokio::spawn(async move {
            let initial = rx.borrow_and_update().clone();
            if let Some(value) = initial {
                f(value).await;
            }
            while rx.changed().await.is_ok() {
                let value = rx.borrow_and_update().clone();
                if let Some(value) = value {
                    f(value).await;
                }
            }
            debug!("eventual pipe source closed");
        })
    }

    fn derive<U, F, Fut>(&self, f: F) -> Eventual<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<U>> + Send + 'static,
    {
        let mut rx = self.rx.clone();
        let (tx, out) = watch::channel(None);
        tokio::spawn(async move {
            let initial = rx.borrow_and_update().clone();
            if let Some(value) = initial {
                if !apply(&f, &tx, value).await {
                    return;
                }
            }
            while rx.changed().await.is_ok() {
                let value = rx.borrow_and_update().clone();
                if let Some(value) = value {
                    if !apply(&f, &tx, value).await {
                        return;
                    }
                }
            }
        });
        Eventual { rx: out }
    }
}

async fn apply<T, U, F, Fut>(f: &F, tx: &watch::Sender<Option<U>>, value: T) -> bool
where
    U: PartialEq,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Option<U>>,
{
    match f(value).await {
        Some(derived) => {
            publish(tx, derived);
            // a closed channel means every reader is gone; stop deriving
            !tx.is_closed()
        }
        None => true,
    }
}

/// Publishes a value, skipping the broadcast when it equals the current
/// one so unchanged derivations do not ripple downstream.
fn publish<T: PartialEq>(tx: &watch::Sender<Option<T>>, value: T) {
    tx.send_if_modified(|current| {
        if current.as_ref() == Some(&value) {
            false
        } else {
            *current = Some(value);
            true
        }
    });
}

/// Fires [`Tick`]s on a steady cadence, starting immediately. The timer
/// task exits once every reader is gone.
pub fn timer(period: Duration) -> Eventual<Tick> {
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if tx.send(Some(Tick)).is_err() {
                break;
            }
        }
    });
    Eventual { rx }
}

/// Tuples of eventuals that can be joined into an eventual of tuples.
pub trait Joinable {
    type Output;

    fn join(self) -> Eventual<Self::Output>;
}

/// Joins eventuals: the result fires once every input has produced at
/// least one value, and after that on any input change, always delivering
/// the latest snapshot of every input.
pub fn join<J: Joinable>(inputs: J) -> Eventual<J::Output> {
    inputs.join()
}

macro_rules! impl_joinable {
    ($(($ty:ident, $rx:ident)),+) => {
        impl<$($ty),+> Joinable for ($(Eventual<$ty>,)+)
        where
            $($ty: Clone + Send + Sync + 'static,)+
        {
            type Output = ($($ty,)+);

            #[allow(non_snake_case)]
            fn join(self) -> Eventual<Self::Output> {
                let ($($ty,)+) = self;
                $(let mut $rx = $ty.rx;)+
                let (tx, out) = watch::channel(None);
                tokio::spawn(async move {
                    loop {
                        {
                            let snapshot = ($($rx.borrow_and_update().clone(),)+);
                            if let ($(Some($ty),)+) = snapshot {
                                if tx.send(Some(($($ty,)+))).is_err() {
                                    return;
                                }
                            }
                        }
                        select! {
                            $(
                                changed = $rx.changed() => {
                                    if changed.is_err() {
                                        return;
                                    }
                                },
                            )+
                        }
                    }
                });
                Eventual { rx: out }
            }
        }
    };
}

impl_joinable!((A, rx_a), (B, rx_b));
impl_joinable!((A, rx_a), (B, rx_b), (C, rx_c));
impl_joinable!((A, rx_a), (B, rx_b), (C, rx_c), (D, rx_d));
impl_joinable!((A, rx_a), (B, rx_b), (C, rx_c), (D, rx_d), (E, rx_e));
impl_joinable!(
    (A, rx_a),
    (B, rx_b),
    (C, rx_c),
    (D, rx_d),
    (E, rx_e),
    (F, rx_f)
);
impl_joinable!(
    (A, rx_a),
    (B, rx_b),
    (C, rx_c),
    (D, rx_d),
    (E, rx_e),
    (F, rx_f),
    (G, rx_g)
);
impl_joinable!(
    (A, rx_a),
    (B, rx_b),
    (C, rx_c),
    (D, rx_d),
    (E, rx_e),
    (F, rx_f),
    (G, rx_g),
    (H, rx_h)
);
impl_joinable!(
    (A, rx_a),
    (B, rx_b),
    (C, rx_c),
    (D, rx_d),
    (E, rx_e),
    (F, rx_f),
    (G, rx_g),
    (H, rx_h),
    (I, rx_i)
);
impl_joinable!(
    (A, rx_a),
    (B, rx_b),
    (C, rx_c),
    (D, rx_d),
    (E, rx_e),
    (F, rx_f),
    (G, rx_g),
    (H, rx_h),
    (I, rx_i),
    (J, rx_j)
);
impl_joinable!(
    (A, rx_a),
    (B, rx_b),
    (C, rx_c),
    (D, rx_d),
    (E, rx_e),
    (F, rx_f),
    (G, rx_g),
    (H, rx_h),
    (I, rx_i),
    (J, rx_j),
    (K, rx_k)
);
impl_joinable!(
    (A, rx_a),
    (B, rx_b),
    (C, rx_c),
    (D, rx_d),
    (E, rx_e),
    (F, rx_f),
    (G, rx_g),
    (H, rx_h),
    (I, rx_i),
    (J, rx_j),
    (K, rx_k),
    (L, rx_l)
);

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tokio::{sync::Mutex, time::sleep};

    use super::*;

    #[tokio::test]
    async fn timer_fires_immediately() {
        let ticks = timer(Duration::from_secs(3600));
        ticks.value().await.unwrap();
    }

    #[tokio::test]
    async fn map_derives_new_values() {
        let (writer, numbers) = Eventual::<u64>::new();
        let doubled = numbers.map(|n| async move { n * 2 });

        writer.write(21);
        assert_eq!(doubled.value().await.unwrap(), 42);

        writer.write(100);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(doubled.value_immediate(), Some(200));
    }

    #[tokio::test]
    async fn try_map_quarantines_failures() {
        let (writer, numbers) = Eventual::<u64>::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_seen = errors.clone();
        let odd_only = numbers.try_map(
            |n| async move {
                if n % 2 == 0 {
                    Err(anyhow::anyhow!("even number"))
                } else {
                    Ok(n)
                }
            },
            move |_| {
                errors_seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        writer.write(1);
        assert_eq!(odd_only.value().await.unwrap(), 1);

        // the failed derivation is invisible downstream
        writer.write(2);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(odd_only.value_immediate(), Some(1));
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        writer.write(3);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(odd_only.value_immediate(), Some(3));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn join_waits_for_every_input() {
        let (writer_a, a) = Eventual::<u64>::new();
        let (writer_b, b) = Eventual::<&'static str>::new();
        let joined = join((a, b));

        writer_a.write(7);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(joined.value_immediate(), None);

        writer_b.write("ready");
        assert_eq!(joined.value().await.unwrap(), (7, "ready"));

        writer_a.write(8);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(joined.value_immediate(), Some((8, "ready")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pipe_coalesces_pending_values() {
        let (writer, numbers) = Eventual::<u64>::new();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let _handle = numbers.pipe(move |n| {
            let sink = sink.clone();
            async move {
                sink.lock().await.push(n);
                sleep(Duration::from_millis(200)).await;
            }
        });

        writer.write(0);
        sleep(Duration::from_millis(50)).await;
        for n in 1..=9 {
            writer.write(n);
        }
        sleep(Duration::from_millis(600)).await;

        let observed = observed.lock().await.clone();
        // the first value, plus at most the latest queued snapshot; the
        // intermediate writes must have been dropped
        assert!(observed.len() <= 3, "saw {observed:?}");
        assert_eq!(observed.first(), Some(&0));
        assert_eq!(observed.last(), Some(&9));
    }
}
