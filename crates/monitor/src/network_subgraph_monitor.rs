// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use indexer_allocation::{Allocation, AllocationStatus, SubgraphDeployment};
use indexer_config::NetworkSpecification;
use indexer_rules::{Subgraph, SubgraphVersion};
use serde::Deserialize;
use thegraph_core::{alloy::primitives::Address, DeploymentId};

use crate::{
    chain::{BlockPointer, BlockProvider},
    network::NetworkMonitor,
    subgraph_client::SubgraphClient,
};

const ALLOCATION_FIELDS: &str = r#"
    id
    indexer {
        id
    }
    allocatedTokens
    createdAtBlockHash
    createdAtEpoch
    closedAtEpoch
    poi
    subgraphDeployment {
        id
        deniedAt
        stakedTokens
        signalledTokens
        queryFeesAmount
    }
"#;

/// `NetworkMonitor` backed by the network subgraph, with epoch start
/// block hashes resolved through the chain provider.
pub struct NetworkSubgraphMonitor {
    subgraph: SubgraphClient,
    specification: NetworkSpecification,
    provider: Arc<dyn BlockProvider>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphNetworkData {
    graph_network: Option<GraphNetwork>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphNetwork {
    current_epoch: u64,
}

#[derive(Deserialize)]
struct IndexerData {
    indexer: Option<IndexerAllocations>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexerAllocations {
    total_allocations: Vec<Allocation>,
}

#[derive(Deserialize)]
struct AllocationsData {
    allocations: Vec<Allocation>,
}

#[derive(Deserialize)]
struct SubgraphsData {
    subgraphs: Vec<RawSubgraph>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubgraph {
    id: String,
    version_count: String,
    versions: Vec<RawVersion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersion {
    version: u64,
    created_at: u64,
    subgraph_deployment: RawVersionDeployment,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersionDeployment {
    ipfs_hash: DeploymentId,
}

#[derive(Deserialize)]
struct DeploymentsData {
    #[serde(rename = "subgraphDeployments")]
    subgraph_deployments: Vec<SubgraphDeployment>,
}

#[derive(Deserialize)]
struct EpochesData {
    epoches: Vec<Epoch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Epoch {
    id: String,
    start_block: String,
}

fn entity_id(address: Address) -> String {
    address.to_string().to_lowercase()
}

impl NetworkSubgraphMonitor {
    pub fn new(
        subgraph: SubgraphClient,
        specification: NetworkSpecification,
        provider: Arc<dyn BlockProvider>,
    ) -> Self {
        Self {
            subgraph,
            specification,
            provider,
        }
    }

    fn indexer(&self) -> Address {
        self.specification.indexer_options.address
    }

    async fn own_allocations(
        &self,
        declarations: &str,
        criteria: &str,
        variables: serde_json::Value,
        status: AllocationStatus,
    ) -> anyhow::Result<Vec<Allocation>> {
        let query = format!(
            r#"
                query ({declarations}) {{
                    indexer(id: $indexer) {{
                        totalAllocations(
                            where: {{ {criteria} }}
                            orderDirection: desc
                            first: 1000
                        ) {{
                            {ALLOCATION_FIELDS}
                        }}
                    }}
                }}
            "#
        );
        let data: IndexerData = self.subgraph.query(&query, variables).await?;
        let indexer = data
            .indexer
            .ok_or_else(|| anyhow!("indexer `{}` not found on the network", self.indexer()))?;
        Ok(indexer
            .total_allocations
            .into_iter()
            .map(|mut allocation| {
                allocation.status = status;
                allocation
            })
            .collect())
    }

    /// Epoch start blocks, keyed by epoch number. The subgraph knows the
    /// start block numbers; hashes come from the chain provider.
    async fn epoch_start_blocks(
        &self,
        epochs: &[u64],
    ) -> anyhow::Result<HashMap<u64, BlockPointer>> {
        let ids: Vec<String> = epochs.iter().map(|epoch| epoch.to_string()).collect();
        let data: EpochesData = self
            .subgraph
            .query(
                r#"
                    query ($epochs: [ID!]!) {
                        epoches(where: { id_in: $epochs }) {
                            id
                            startBlock
                        }
                    }
                "#,
                serde_json::json!({ "epochs": ids }),
            )
            .await?;

        let mut blocks = HashMap::new();
        for epoch in data.epoches {
            let number: u64 = epoch.start_block.parse()?;
            let block = self.provider.block_by_number(number).await?;
            blocks.insert(epoch.id.parse()?, block);
        }
        Ok(blocks)
    }
}

#[async_trait]
impl NetworkMonitor for NetworkSubgraphMonitor {
    async fn current_epoch_number(&self) -> anyhow::Result<u64> {
        let data: GraphNetworkData = self
            .subgraph
            .query(
                r#"
                    query epoch($id: ID!) {
                        graphNetwork(id: $id) {
                            currentEpoch
                        }
                    }
                "#,
                serde_json::json!({ "id": self.specification.graph_network_id.to_string() }),
            )
            .await?;
        Ok(data
            .graph_network
            .ok_or_else(|| {
                anyhow!(
                    "network {} not found in network subgraph",
                    self.specification.graph_network_id
                )
            })?
            .current_epoch)
    }

    async fn subgraphs(&self, ids: &[String]) -> anyhow::Result<Vec<Subgraph>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let data: SubgraphsData = self
            .subgraph
            .query(
                r#"
                    query ($ids: [String!]!) {
                        subgraphs(where: { id_in: $ids }) {
                            id
                            versionCount
                            versions(orderBy: version, orderDirection: asc) {
                                version
                                createdAt
                                subgraphDeployment {
                                    ipfsHash
                                }
                            }
                        }
                    }
                "#,
                serde_json::json!({ "ids": ids }),
            )
            .await?;

        data.subgraphs
            .into_iter()
            .map(|subgraph| {
                Ok(Subgraph {
                    id: subgraph.id,
                    version_count: subgraph.version_count.parse()?,
                    versions: subgraph
                        .versions
                        .into_iter()
                        .map(|version| SubgraphVersion {
                            version: version.version,
                            created_at: version.created_at,
                            deployment: version.subgraph_deployment.ipfs_hash,
                        })
                        .collect(),
                })
            })
            .collect()
    }

    async fn subgraph_deployments(&self) -> anyhow::Result<Vec<SubgraphDeployment>> {
        let data: DeploymentsData = self
            .subgraph
            .query(
                r#"
                    {
                        subgraphDeployments(first: 1000) {
                            id
                            deniedAt
                            stakedTokens
                            signalledTokens
                            queryFeesAmount
                        }
                    }
                "#,
                serde_json::json!({}),
            )
            .await?;
        Ok(data.subgraph_deployments)
    }

    async fn allocations(&self, status: AllocationStatus) -> anyhow::Result<Vec<Allocation>> {
        self.own_allocations(
            "$indexer: ID!",
            &format!("status: {status}"),
            serde_json::json!({ "indexer": entity_id(self.indexer()) }),
            status,
        )
        .await
    }

    async fn recently_closed_allocations(
        &self,
        current_epoch: u64,
        range: u64,
    ) -> anyhow::Result<Vec<Allocation>> {
        self.own_allocations(
            "$indexer: ID!, $closedAtEpochThreshold: Int!",
            "status: Closed, closedAtEpoch_gte: $closedAtEpochThreshold",
            serde_json::json!({
                "indexer": entity_id(self.indexer()),
                "closedAtEpochThreshold": current_epoch.saturating_sub(range),
            }),
            AllocationStatus::Closed,
        )
        .await
    }

    async fn claimable_allocations(
        &self,
        closed_at_epoch_threshold: u64,
    ) -> anyhow::Result<Vec<Allocation>> {
        self.own_allocations(
            "$indexer: ID!, $closedAtEpochThreshold: Int!",
            "status: Closed, closedAtEpoch_lte: $closedAtEpochThreshold",
            serde_json::json!({
                "indexer": entity_id(self.indexer()),
                "closedAtEpochThreshold": closed_at_epoch_threshold,
            }),
            AllocationStatus::Closed,
        )
        .await
    }

    async fn disputable_allocations(
        &self,
        current_epoch: u64,
        deployments: &[DeploymentId],
        minimum_allocation: u64,
    ) -> anyhow::Result<Vec<Allocation>> {
        let min_closed_epoch = current_epoch
            .saturating_sub(self.specification.indexer_options.poi_disputable_epochs);
        let deployments: Vec<String> = deployments
            .iter()
            .map(|deployment| deployment.to_string())
            .collect();
        let query = format!(
            r#"
                query ($indexer: String!, $minClosedEpoch: Int!, $deployments: [String!]!, $minTokens: BigInt!) {{
                    allocations(
                        where: {{
                            status: Closed
                            indexer_not: $indexer
                            closedAtEpoch_gte: $minClosedEpoch
                            allocatedTokens_gte: $minTokens
                            subgraphDeployment_: {{ ipfsHash_in: $deployments }}
                        }}
                        first: 1000
                    ) {{
                        {ALLOCATION_FIELDS}
                    }}
                }}
            "#
        );
        let data: AllocationsData = self
            .subgraph
            .query(
                &query,
                serde_json::json!({
                    "indexer": entity_id(self.indexer()),
                    "minClosedEpoch": min_closed_epoch,
                    "deployments": deployments,
                    "minTokens": minimum_allocation.to_string(),
                }),
            )
            .await?;

        let mut allocations: Vec<Allocation> = data
            .allocations
            .into_iter()
            .map(|mut allocation| {
                allocation.status = AllocationStatus::Closed;
                allocation
            })
            .collect();

        // resolve the epoch start blocks the POIs were committed against
        let mut epochs: Vec<u64> = allocations
            .iter()
            .filter_map(|allocation| allocation.closed_at_epoch)
            .flat_map(|epoch| [epoch, epoch.saturating_sub(1)])
            .collect();
        epochs.sort_unstable();
        epochs.dedup();
        let start_blocks = self.epoch_start_blocks(&epochs).await?;

        for allocation in &mut allocations {
            let Some(closed_at_epoch) = allocation.closed_at_epoch else {
                continue;
            };
            allocation.closed_at_epoch_start_block_hash = start_blocks
                .get(&closed_at_epoch)
                .map(|block| block.hash.clone());
            allocation.previous_epoch_start_block_hash = closed_at_epoch
                .checked_sub(1)
                .and_then(|previous| start_blocks.get(&previous))
                .map(|block| block.hash.clone());
        }
        Ok(allocations)
    }

    async fn closed_allocations(
        &self,
        deployment: &DeploymentId,
    ) -> anyhow::Result<Vec<Allocation>> {
        let query = format!(
            r#"
                query ($indexer: String!, $deployment: String!) {{
                    allocations(
                        where: {{
                            status: Closed
                            indexer: $indexer
                            subgraphDeployment_: {{ ipfsHash: $deployment }}
                        }}
                        orderBy: closedAtEpoch
                        orderDirection: desc
                        first: 5
                    ) {{
                        {ALLOCATION_FIELDS}
                    }}
                }}
            "#
        );
        let data: AllocationsData = self
            .subgraph
            .query(
                &query,
                serde_json::json!({
                    "indexer": entity_id(self.indexer()),
                    "deployment": deployment.to_string(),
                }),
            )
            .await?;
        Ok(data
            .allocations
            .into_iter()
            .map(|mut allocation| {
                allocation.status = AllocationStatus::Closed;
                allocation
            })
            .collect())
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

    struct NoBlocks;

    #[async_trait]
    impl BlockProvider for NoBlocks {
        async fn block_by_hash(&self, _hash: &str) -> anyhow::Result<BlockPointer> {
            Err(anyhow!("no blocks in this test"))
        }

        async fn block_by_number(&self, number: u64) -> anyhow::Result<BlockPointer> {
            Ok(BlockPointer {
                number,
                hash: format!("0x{number:064x}"),
            })
        }
    }

    fn monitor(mock_server: &MockServer) -> NetworkSubgraphMonitor {
        NetworkSubgraphMonitor::new(
            SubgraphClient::new(
                reqwest::Client::new(),
                &format!("{}/network", mock_server.uri()),
            ),
            test_assets::network_specification(),
            Arc::new(NoBlocks),
        )
    }

    #[test_log::test(tokio::test)]
    async fn reads_the_current_epoch() {
        let mock_server = MockServer::start().await;
        mock_server
            .register(
                Mock::given(method("POST"))
                    .and(path("/network"))
                    .and(body_string_contains("currentEpoch"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(
                        json!({ "data": { "graphNetwork": { "currentEpoch": 896419 }}}),
                    )),
            )
            .await;

        let epoch = monitor(&mock_server).current_epoch_number().await.unwrap();
        assert_eq!(epoch, 896419);
    }

    #[test_log::test(tokio::test)]
    async fn parses_allocations_by_status() {
        let mock_server = MockServer::start().await;
        mock_server
            .register(
                Mock::given(method("POST"))
                    .and(path("/network"))
                    .and(body_string_contains("totalAllocations"))
                    .respond_with(ResponseTemplate::new(200).set_body_raw(
                        test_assets::ALLOCATIONS_QUERY_RESPONSE,
                        "application/json",
                    )),
            )
            .await;

        let allocations = monitor(&mock_server)
            .allocations(AllocationStatus::Active)
            .await
            .unwrap();
        assert_eq!(allocations.len(), 2);
        assert!(allocations
            .iter()
            .all(|allocation| allocation.status == AllocationStatus::Active));
        assert_eq!(allocations[0].subgraph_deployment.id, *test_assets::DEPLOYMENT_A);
    }

    #[test_log::test(tokio::test)]
    async fn disputable_allocations_carry_epoch_start_block_hashes() {
        let mock_server = MockServer::start().await;
        mock_server
            .register(
                Mock::given(method("POST"))
                    .and(path("/network"))
                    .and(body_string_contains("indexer_not"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "data": {
                            "allocations": [
                                {
                                    "id": "0xfa44c72b753a66591f241c7dc04e8178c30e13af",
                                    "indexer": { "id": test_assets::OTHER_INDEXER_ADDRESS },
                                    "allocatedTokens": "601726452999999979510903",
                                    "createdAtBlockHash": "0x99d3fbdc0105f7ccc0cd5bb287b82657fe92db4ea8fb58242dafb90b1c6e2adf",
                                    "createdAtEpoch": 940,
                                    "closedAtEpoch": 953,
                                    "poi": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                                    "subgraphDeployment": {
                                        "id": "0xbbde25a2c85f55b53b7698b9476610c3d1202d88870e66502ab0076b7218f98a"
                                    }
                                }
                            ]
                        }
                    }))),
            )
            .await;
        mock_server
            .register(
                Mock::given(method("POST"))
                    .and(path("/network"))
                    .and(body_string_contains("epoches"))
                    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                        "data": {
                            "epoches": [
                                { "id": "953", "startBlock": "19530000" },
                                { "id": "952", "startBlock": "19520000" }
                            ]
                        }
                    }))),
            )
            .await;

        let allocations = monitor(&mock_server)
            .disputable_allocations(954, &[*test_assets::DEPLOYMENT_A], 0)
            .await
            .unwrap();
        assert_eq!(allocations.len(), 1);
        let allocation = &allocations[0];
        assert_eq!(allocation.poi, Some(*test_assets::POI_A));
        assert_eq!(
            allocation.closed_at_epoch_start_block_hash.as_deref(),
            Some(format!("0x{:064x}", 19530000u64).as_str())
        );
        assert_eq!(
            allocation.previous_epoch_start_block_hash.as_deref(),
            Some(format!("0x{:064x}", 19520000u64).as_str())
        );
    }
}
