// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, future::Future};

/// Values derived per protocol network, keyed by network identifier.
pub type NetworkMapped<T> = HashMap<String, T>;

#[derive(Debug, thiserror::Error)]
pub enum MultiNetworksError {
    #[error("duplicate network identifier `{0}`")]
    DuplicateIdentifier(String),
    #[error("inconsistent network identifiers (`{0}` is not aligned)")]
    InconsistentIdentifiers(String),
}

/// Runs the same logic independently across protocol networks.
///
/// Keys are network identifiers; key misalignment between derived maps is
/// a bug, not a runtime condition, and surfaces as an error.
pub struct MultiNetworks<T> {
    inner: HashMap<String, T>,
}

impl<T> MultiNetworks<T> {
    pub fn new(
        items: Vec<T>,
        identity: impl Fn(&T) -> String,
    ) -> Result<Self, MultiNetworksError> {
        let mut inner = HashMap::with_capacity(items.len());
        for item in items {
            let id = identity(&item);
            if inner.contains_key(&id) {
                return Err(MultiNetworksError::DuplicateIdentifier(id));
            }
            inner.insert(id, item);
        }
        Ok(Self { inner })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.inner.get(id)
    }

    pub fn items(&self) -> impl Iterator<Item = (&String, &T)> {
        self.inner.iter()
    }

    /// Runs `f` for every network concurrently; any failure fails the
    /// whole map.
    pub async fn map<'a, R, F, Fut>(&'a self, f: F) -> anyhow::Result<NetworkMapped<R>>
    where
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = anyhow::Result<R>> + 'a,
    {
        let results = futures::future::try_join_all(self.inner.iter().map(|(id, item)| {
            let fut = f(item);
            async move { Ok::<_, anyhow::Error>((id.clone(), fut.await?)) }
        }))
        .await?;
        Ok(results.into_iter().collect())
    }

    /// Strict inner join of two network-mapped values over this set of
    /// networks.
    pub fn zip<A, B>(
        &self,
        mut a: NetworkMapped<A>,
        mut b: NetworkMapped<B>,
    ) -> Result<NetworkMapped<(A, B)>, MultiNetworksError> {
        let mut out = HashMap::with_capacity(self.inner.len());
        for id in self.inner.keys() {
            let (Some(left), Some(right)) = (a.remove(id), b.remove(id)) else {
                return Err(MultiNetworksError::InconsistentIdentifiers(id.clone()));
            };
            out.insert(id.clone(), (left, right));
        }
        if let Some(id) = a.keys().chain(b.keys()).next() {
            return Err(MultiNetworksError::InconsistentIdentifiers(id.clone()));
        }
        Ok(out)
    }

    /// Strict inner join of four network-mapped values.
    pub fn zip4<A, B, C, D>(
        &self,
        mut a: NetworkMapped<A>,
        mut b: NetworkMapped<B>,
        mut c: NetworkMapped<C>,
        mut d: NetworkMapped<D>,
    ) -> Result<NetworkMapped<(A, B, C, D)>, MultiNetworksError> {
        let mut out = HashMap::with_capacity(self.inner.len());
        for id in self.inner.keys() {
            let (Some(first), Some(second), Some(third), Some(fourth)) =
                (a.remove(id), b.remove(id), c.remove(id), d.remove(id))
            else {
                return Err(MultiNetworksError::InconsistentIdentifiers(id.clone()));
            };
            out.insert(id.clone(), (first, second, third, fourth));
        }
        if let Some(id) = a
            .keys()
            .chain(b.keys())
            .chain(c.keys())
            .chain(d.keys())
            .next()
        {
            return Err(MultiNetworksError::InconsistentIdentifiers(id.clone()));
        }
        Ok(out)
    }

    /// Joins `input` with the networks by identifier and applies `f` to
    /// every pair concurrently.
    pub async fn map_network_mapped<'a, X, R, F, Fut>(
        &'a self,
        input: NetworkMapped<X>,
        f: F,
    ) -> anyhow::Result<NetworkMapped<R>>
    where
        F: Fn(&'a T, X) -> Fut,
        Fut: Future<Output = anyhow::Result<R>> + 'a,
    {
        let mut futures = Vec::with_capacity(input.len());
        for (id, value) in input {
            let item = self
                .inner
                .get(&id)
                .ok_or_else(|| MultiNetworksError::InconsistentIdentifiers(id.clone()))?;
            let fut = f(item, value);
            futures.push(async move { Ok::<_, anyhow::Error>((id, fut.await?)) });
        }
        let results = futures::future::try_join_all(futures).await?;
        Ok(results.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn networks(ids: &[&str]) -> Result<MultiNetworks<String>, MultiNetworksError> {
        MultiNetworks::new(
            ids.iter().map(|id| id.to_string()).collect(),
            |id| id.clone(),
        )
    }

    #[test]
    fn duplicate_identifiers_are_rejected() {
        let result = networks(&["eip155:1", "eip155:1"]);
        assert!(matches!(
            result,
            Err(MultiNetworksError::DuplicateIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn map_covers_every_network() {
        let networks = networks(&["eip155:1", "eip155:100"]).unwrap();
        let lengths = networks
            .map(|id| async move { Ok(id.len()) })
            .await
            .unwrap();
        assert_eq!(lengths.len(), 2);
        assert_eq!(lengths["eip155:100"], 10);
    }

    #[test]
    fn zip_requires_aligned_identifiers() {
        let networks = networks(&["eip155:1", "eip155:100"]).unwrap();

        let complete: NetworkMapped<u64> = [("eip155:1".to_string(), 1), ("eip155:100".to_string(), 2)]
            .into_iter()
            .collect();
        let missing: NetworkMapped<u64> = [("eip155:1".to_string(), 1)].into_iter().collect();

        assert!(networks.zip(complete.clone(), complete.clone()).is_ok());
        assert!(matches!(
            networks.zip(complete, missing),
            Err(MultiNetworksError::InconsistentIdentifiers(_))
        ));
    }

    #[test]
    fn zip4_aligns_four_maps() {
        let networks = networks(&["eip155:1"]).unwrap();
        let map = |value: u64| -> NetworkMapped<u64> {
            [("eip155:1".to_string(), value)].into_iter().collect()
        };
        let zipped = networks.zip4(map(1), map(2), map(3), map(4)).unwrap();
        assert_eq!(zipped["eip155:1"], (1, 2, 3, 4));
    }

    #[tokio::test]
    async fn map_network_mapped_joins_by_identifier() {
        let networks = networks(&["eip155:1"]).unwrap();
        let input: NetworkMapped<u64> = [("eip155:1".to_string(), 41)].into_iter().collect();
        let output = networks
            .map_network_mapped(input, |_, n| async move { Ok(n + 1) })
            .await
            .unwrap();
        assert_eq!(output["eip155:1"], 42);

        let misaligned: NetworkMapped<u64> =
            [("eip155:5".to_string(), 0)].into_iter().collect();
        assert!(networks
            .map_network_mapped(misaligned, |_, n| async move { Ok(n) })
            .await
            .is_err());
    }
}
