// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use anyhow::anyhow;
use async_trait::async_trait;
use indexer_config::GraphNodeConfig;
use serde::Deserialize;
use thegraph_core::{alloy::primitives::{Address, B256}, DeploymentId};
use tracing::{debug, info};

use crate::chain::BlockPointer;
use crate::subgraph_client::SubgraphClient;

/// The indexing node the agent manages deployments on.
#[async_trait]
pub trait GraphNode: Send + Sync {
    /// Checks that the node is reachable.
    async fn connect(&self) -> anyhow::Result<()>;

    /// Deployments the node is currently indexing.
    async fn subgraph_deployments(&self) -> anyhow::Result<Vec<DeploymentId>>;

    /// Makes sure the deployment is named and deployed on the node.
    async fn ensure(&self, name: &str, deployment: &DeploymentId) -> anyhow::Result<()>;

    /// Stops indexing the deployment.
    async fn remove(&self, deployment: &DeploymentId) -> anyhow::Result<()>;

    /// The node's proof of indexing for a deployment at a block, as the
    /// given indexer. `None` when the node cannot produce one.
    async fn proof_of_indexing(
        &self,
        deployment: &DeploymentId,
        block: &BlockPointer,
        indexer: Address,
    ) -> anyhow::Result<Option<B256>>;

    /// The chain a deployment indexes, as reported by the node.
    async fn subgraph_chain(&self, deployment: &DeploymentId) -> anyhow::Result<Option<String>>;
}

/// `GraphNode` over the index-node status API (GraphQL) and the admin
/// API (JSON-RPC).
#[derive(Clone, Debug)]
pub struct GraphNodeClient {
    client: reqwest::Client,
    status: SubgraphClient,
    admin_url: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[allow(dead_code)]
    result: Option<serde_json::Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexingStatusesData {
    indexing_statuses: Vec<IndexingStatus>,
}

#[derive(Deserialize)]
struct IndexingStatus {
    subgraph: DeploymentId,
    #[serde(default)]
    chains: Vec<ChainInfo>,
}

#[derive(Deserialize)]
struct ChainInfo {
    network: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProofOfIndexingData {
    proof_of_indexing: Option<B256>,
}

impl GraphNodeClient {
    pub fn new(client: reqwest::Client, config: &GraphNodeConfig) -> Self {
        Self {
            status: SubgraphClient::new(client.clone(), &config.status_url),
            admin_url: config.admin_url.clone(),
            client,
        }
    }

    async fn admin_call(&self, method: &str, params: serde_json::Value) -> anyhow::Result<()> {
        debug!(method, %params, "graph-node admin call");
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse = self
            .client
            .post(&self.admin_url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if let Some(error) = response.error {
            return Err(anyhow!("{method} failed ({}): {}", error.code, error.message));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphNode for GraphNodeClient {
    async fn connect(&self) -> anyhow::Result<()> {
        info!(url = self.status.url(), "Connecting to graph-node");
        self.subgraph_deployments().await?;
        info!("Connected to graph-node");
        Ok(())
    }

    async fn subgraph_deployments(&self) -> anyhow::Result<Vec<DeploymentId>> {
        let data: IndexingStatusesData = self
            .status
            .query(
                r#"
                    {
                        indexingStatuses {
                            subgraph
                        }
                    }
                "#,
                serde_json::json!({}),
            )
            .await?;
        Ok(data
            .indexing_statuses
            .into_iter()
            .map(|status| status.subgraph)
            .collect())
    }

    async fn ensure(&self, name: &str, deployment: &DeploymentId) -> anyhow::Result<()> {
        match self
            .admin_call("subgraph_create", serde_json::json!({ "name": name }))
            .await
        {
            Ok(()) => {}
            // the name surviving a previous cycle is the normal case
            Err(err) if err.to_string().contains("already exists") => {}
            Err(err) => return Err(err),
        }
        self.admin_call(
            "subgraph_deploy",
            serde_json::json!({ "name": name, "ipfs_hash": deployment.to_string() }),
        )
        .await
    }

    async fn remove(&self, deployment: &DeploymentId) -> anyhow::Result<()> {
        self.admin_call(
            "subgraph_reassign",
            serde_json::json!({ "ipfs_hash": deployment.to_string(), "node_id": "removed" }),
        )
        .await
    }

    async fn proof_of_indexing(
        &self,
        deployment: &DeploymentId,
        block: &BlockPointer,
        indexer: Address,
    ) -> anyhow::Result<Option<B256>> {
        let data: ProofOfIndexingData = self
            .status
            .query(
                r#"
                    query ($subgraph: String!, $blockNumber: Int!, $blockHash: String!, $indexer: String!) {
                        proofOfIndexing(
                            subgraph: $subgraph
                            blockNumber: $blockNumber
                            blockHash: $blockHash
                            indexer: $indexer
                        )
                    }
                "#,
                serde_json::json!({
                    "subgraph": deployment.to_string(),
                    "blockNumber": block.number,
                    "blockHash": block.hash,
                    "indexer": indexer.to_string(),
                }),
            )
            .await?;
        Ok(data.proof_of_indexing)
    }

    async fn subgraph_chain(&self, deployment: &DeploymentId) -> anyhow::Result<Option<String>> {
        let data: IndexingStatusesData = self
            .status
            .query(
                r#"
                    query ($subgraphs: [String!]!) {
                        indexingStatuses(subgraphs: $subgraphs) {
                            subgraph
                            chains {
                                network
                            }
                        }
                    }
                "#,
                serde_json::json!({ "subgraphs": [deployment.to_string()] }),
            )
            .await?;
        Ok(data
            .indexing_statuses
            .into_iter()
            .next()
            .and_then(|status| status.chains.into_iter().next())
            .map(|chain| chain.network))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn config(mock_server: &MockServer) -> GraphNodeConfig {
        GraphNodeConfig {
            status_url: format!("{}/status", mock_server.uri()),
            admin_url: format!("{}/admin", mock_server.uri()),
            query_url: format!("{}/query", mock_server.uri()),
        }
    }

    #[test_log::test(tokio::test)]
    async fn lists_active_deployments() {
        let mock_server = MockServer::start().await;
        mock_server
            .register(
                Mock::given(method("POST")).and(path("/status")).respond_with(
                    ResponseTemplate::new(200).set_body_json(json!({
                        "data": {
                            "indexingStatuses": [
                                { "subgraph": "QmU7zqJyHSyUP3yFii8sBtHT8FaJn2WmUnRvwjAUTjwMBP" }
                            ]
                        }
                    })),
                ),
            )
            .await;

        let client = GraphNodeClient::new(reqwest::Client::new(), &config(&mock_server));
        let deployments = client.subgraph_deployments().await.unwrap();
        assert_eq!(deployments, vec![*test_assets::NETWORK_SUBGRAPH_DEPLOYMENT]);
    }

    #[test_log::test(tokio::test)]
    async fn ensure_tolerates_existing_name() {
        let mock_server = MockServer::start().await;
        mock_server
            .register(
                Mock::given(method("POST"))
                    .and(path("/admin"))
                    .and(body_string_contains("subgraph_create"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "error": { "code": 500, "message": "subgraph already exists" }
                    }))),
            )
            .await;
        mock_server
            .register(
                Mock::given(method("POST"))
                    .and(path("/admin"))
                    .and(body_string_contains("subgraph_deploy"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0",
                        "id": 1,
                        "result": { "block": null }
                    }))),
            )
            .await;

        let client = GraphNodeClient::new(reqwest::Client::new(), &config(&mock_server));
        client
            .ensure("indexer-agent/wmunrvwjau", &test_assets::NETWORK_SUBGRAPH_DEPLOYMENT)
            .await
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn proof_of_indexing_can_be_unavailable() {
        let mock_server = MockServer::start().await;
        mock_server
            .register(
                Mock::given(method("POST")).and(path("/status")).respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({ "data": { "proofOfIndexing": null }})),
                ),
            )
            .await;

        let client = GraphNodeClient::new(reqwest::Client::new(), &config(&mock_server));
        let poi = client
            .proof_of_indexing(
                &test_assets::DEPLOYMENT_A,
                &BlockPointer {
                    number: 1,
                    hash: "0x28ca20ed537bbeb09e7cbbc8bd11e4340d64c4f6c0ae506b81f83ef5f944e310"
                        .to_string(),
                },
                *test_assets::INDEXER,
            )
            .await
            .unwrap();
        assert_eq!(poi, None);
    }
}
