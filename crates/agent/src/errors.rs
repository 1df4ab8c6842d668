// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Error codes attached to operational failures, so log lines stay
/// greppable across releases.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexerErrorCode {
    /// A reconciliation step failed and the rest of the cycle was skipped.
    IE005,
    /// An on-chain allocation state cross-check failed.
    IE006,
}

impl IndexerErrorCode {
    pub fn explanation(&self) -> &'static str {
        match self {
            IndexerErrorCode::IE005 => {
                "Failed to reconcile indexer and network: will retry next cycle"
            }
            IndexerErrorCode::IE006 => {
                "Failed to cross-check allocation state with the staking contract"
            }
        }
    }
}

impl fmt::Display for IndexerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexerErrorCode::IE005 => write!(f, "IE005"),
            IndexerErrorCode::IE006 => write!(f, "IE006"),
        }
    }
}
