// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The indexer agent's reconciliation core: an eventual-value graph that
//! derives target state per protocol network, and the reconcilers that
//! drive graph-node and the operator towards it.

pub mod agent;
pub mod disputes;
pub mod errors;
pub mod metrics;
pub mod multi_networks;

#[cfg(test)]
mod tests;

pub use agent::{Agent, NetworkAndOperator};
pub use errors::IndexerErrorCode;
pub use multi_networks::{MultiNetworks, MultiNetworksError, NetworkMapped};
