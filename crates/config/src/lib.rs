// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration: one graph-node, any number of protocol networks.

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use thegraph_core::{alloy::primitives::Address, DeploymentId};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub graph_node: GraphNodeConfig,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    pub networks: Vec<NetworkSpecification>,
}

fn default_metrics_port() -> u16 {
    7300
}

impl Config {
    /// Loads the TOML configuration file, letting
    /// `INDEXER_AGENT_`-prefixed environment variables override values.
    pub fn load(filename: &Path) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(filename))
            .merge(Env::prefixed("INDEXER_AGENT_"))
            .extract()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct GraphNodeConfig {
    /// Index-node status endpoint (GraphQL).
    pub status_url: String,
    /// Admin endpoint (JSON-RPC; subgraph_create and friends).
    pub admin_url: String,
    /// Query endpoint; deployments are served at `/subgraphs/id/<id>`.
    pub query_url: String,
}

/// Per-network configuration of the agent.
#[derive(Clone, Debug, Deserialize)]
pub struct NetworkSpecification {
    /// CAIP-2 identifier of the protocol chain, e.g. `eip155:1`.
    pub network_identifier: String,
    /// Entity id of the `GraphNetwork` row in the network subgraph.
    #[serde(default = "default_graph_network_id")]
    pub graph_network_id: u64,
    pub indexer_options: IndexerOptions,
    pub subgraphs: ProtocolSubgraphs,
}

fn default_graph_network_id() -> u64 {
    1
}

#[derive(Clone, Debug, Deserialize)]
pub struct IndexerOptions {
    pub address: Address,
    #[serde(default = "default_true")]
    pub register: bool,
    #[serde(default)]
    pub allocation_management_mode: AllocationManagementMode,
    #[serde(default = "default_poi_disputable_epochs")]
    pub poi_disputable_epochs: u64,
    #[serde(default)]
    pub poi_dispute_monitoring: bool,
    #[serde(default)]
    pub allocate_on_network_subgraph: bool,
    /// Deployments indexed regardless of any rule or on-chain signal.
    #[serde(default)]
    pub offchain_subgraphs: Vec<DeploymentId>,
}

fn default_true() -> bool {
    true
}

fn default_poi_disputable_epochs() -> u64 {
    1
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationManagementMode {
    #[default]
    Auto,
    Oversight,
    Manual,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProtocolSubgraphs {
    pub network_subgraph: SubgraphConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubgraphConfig {
    /// Deployment of the network's own meta-subgraph, when the agent is
    /// expected to index it locally.
    #[serde(default)]
    pub deployment: Option<DeploymentId>,
    /// Endpoint the network subgraph is queried at.
    pub url: String,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ChainIdError {
    #[error("unsupported chain alias `{0}`")]
    UnsupportedChain(String),
}

/// Resolves a chain name as reported by graph-node to its CAIP-2
/// identifier. Inputs that already are CAIP-2 identifiers pass through.
pub fn resolve_chain_id(alias: &str) -> Result<String, ChainIdError> {
    if alias.starts_with("eip155:") {
        return Ok(alias.to_string());
    }
    let id = match alias {
        "mainnet" => "eip155:1",
        "goerli" => "eip155:5",
        "optimism" => "eip155:10",
        "gnosis" | "xdai" => "eip155:100",
        "matic" | "polygon" => "eip155:137",
        "fantom" => "eip155:250",
        "arbitrum-one" => "eip155:42161",
        "celo" => "eip155:42220",
        "avalanche" => "eip155:43114",
        "arbitrum-goerli" => "eip155:421613",
        "arbitrum-sepolia" => "eip155:421614",
        "sepolia" => "eip155:11155111",
        _ => return Err(ChainIdError::UnsupportedChain(alias.to_string())),
    };
    Ok(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        metrics_port = 7310

        [graph_node]
        status_url = "http://127.0.0.1:8030/graphql"
        admin_url = "http://127.0.0.1:8020"
        query_url = "http://127.0.0.1:8000"

        [[networks]]
        network_identifier = "eip155:421614"

        [networks.indexer_options]
        address = "0xd75c4dbcb215a6cf9097cfbcc70aab2596b96a9c"
        allocation_management_mode = "oversight"
        offchain_subgraphs = [
            "QmU7zqJyHSyUP3yFii8sBtHT8FaJn2WmUnRvwjAUTjwMBP",
        ]

        [networks.subgraphs.network_subgraph]
        deployment = "0xbbde25a2c85f55b53b7698b9476610c3d1202d88870e66502ab0076b7218f98a"
        url = "http://127.0.0.1:8000/subgraphs/network"
    "#;

    #[test]
    fn sample_config_parses() {
        let config: Config = Figment::new()
            .merge(Toml::string(SAMPLE))
            .extract()
            .unwrap();

        assert_eq!(config.metrics_port, 7310);
        assert_eq!(config.networks.len(), 1);

        let network = &config.networks[0];
        assert_eq!(network.network_identifier, "eip155:421614");
        assert_eq!(network.graph_network_id, 1);
        assert_eq!(
            network.indexer_options.allocation_management_mode,
            AllocationManagementMode::Oversight
        );
        assert!(network.indexer_options.register);
        assert_eq!(network.indexer_options.poi_disputable_epochs, 1);
        assert_eq!(network.indexer_options.offchain_subgraphs.len(), 1);
        assert!(network.subgraphs.network_subgraph.deployment.is_some());
    }

    #[test]
    fn chain_aliases_resolve_to_caip2() {
        assert_eq!(resolve_chain_id("mainnet").unwrap(), "eip155:1");
        assert_eq!(resolve_chain_id("eip155:42161").unwrap(), "eip155:42161");
        assert!(matches!(
            resolve_chain_id("unknown-chain"),
            Err(ChainIdError::UnsupportedChain(_))
        ));
    }
}
