// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Read and write views of the worlds the agent reconciles: the indexing
//! node (graph-node), the protocol network, and the operator's rule and
//! dispute store.

mod chain;
mod graph_node;
mod network;
mod network_subgraph_monitor;
mod operator;
mod subgraph_client;

pub use chain::{BlockPointer, BlockProvider, JsonRpcBlockProvider};
pub use graph_node::{GraphNode, GraphNodeClient};
pub use network::{Network, NetworkMonitor, OnchainAllocation};
pub use network_subgraph_monitor::NetworkSubgraphMonitor;
pub use operator::Operator;
pub use subgraph_client::SubgraphClient;
