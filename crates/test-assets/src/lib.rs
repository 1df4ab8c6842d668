// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the agent test suites.

use std::str::FromStr;

use indexer_allocation::{Allocation, AllocationStatus, SubgraphDeployment};
use indexer_config::{
    AllocationManagementMode, IndexerOptions, NetworkSpecification, ProtocolSubgraphs,
    SubgraphConfig,
};
use lazy_static::lazy_static;
use thegraph_core::{
    alloy::primitives::{Address, B256, U256},
    DeploymentId,
};

pub const INDEXER_ADDRESS: &str = "0xd75c4dbcb215a6cf9097cfbcc70aab2596b96a9c";
pub const OTHER_INDEXER_ADDRESS: &str = "0x1234567890123456789012345678901234567890";
pub const NETWORK_IDENTIFIER: &str = "eip155:421614";

lazy_static! {
    pub static ref INDEXER: Address = Address::from_str(INDEXER_ADDRESS).unwrap();
    pub static ref OTHER_INDEXER: Address = Address::from_str(OTHER_INDEXER_ADDRESS).unwrap();
    pub static ref DEPLOYMENT_A: DeploymentId = DeploymentId::from_str(
        "0xbbde25a2c85f55b53b7698b9476610c3d1202d88870e66502ab0076b7218f98a"
    )
    .unwrap();
    pub static ref DEPLOYMENT_B: DeploymentId = DeploymentId::from_str(
        "0x1111111111111111111111111111111111111111111111111111111111111111"
    )
    .unwrap();
    pub static ref DEPLOYMENT_C: DeploymentId = DeploymentId::from_str(
        "0x2222222222222222222222222222222222222222222222222222222222222222"
    )
    .unwrap();
    pub static ref NETWORK_SUBGRAPH_DEPLOYMENT: DeploymentId =
        DeploymentId::from_str("QmU7zqJyHSyUP3yFii8sBtHT8FaJn2WmUnRvwjAUTjwMBP").unwrap();
    pub static ref POI_A: B256 = B256::from_str(
        "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
    )
    .unwrap();
    pub static ref POI_B: B256 = B256::from_str(
        "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
    )
    .unwrap();
}

/// A canned response for the allocations-by-status query, in the network
/// subgraph response shape.
pub const ALLOCATIONS_QUERY_RESPONSE: &str = r#"
    {
        "data": {
            "indexer": {
                "totalAllocations": [
                    {
                        "id": "0xfa44c72b753a66591f241c7dc04e8178c30e13af",
                        "indexer": {
                            "id": "0xd75c4dbcb215a6cf9097cfbcc70aab2596b96a9c"
                        },
                        "allocatedTokens": "5081382841000000014901161",
                        "createdAtBlockHash": "0x99d3fbdc0105f7ccc0cd5bb287b82657fe92db4ea8fb58242dafb90b1c6e2adf",
                        "createdAtEpoch": 953,
                        "closedAtEpoch": null,
                        "subgraphDeployment": {
                            "id": "0xbbde25a2c85f55b53b7698b9476610c3d1202d88870e66502ab0076b7218f98a",
                            "deniedAt": 0,
                            "stakedTokens": "96183284152000000014901161",
                            "signalledTokens": "182832939554154667498047",
                            "queryFeesAmount": "19861336072168874330350"
                        }
                    },
                    {
                        "id": "0xdd975e30aafebb143e54d215db8a3e8fd916a701",
                        "indexer": {
                            "id": "0xd75c4dbcb215a6cf9097cfbcc70aab2596b96a9c"
                        },
                        "allocatedTokens": "601726452999999979510903",
                        "createdAtBlockHash": "0x99d3fbdc0105f7ccc0cd5bb287b82657fe92db4ea8fb58242dafb90b1c6e2adf",
                        "createdAtEpoch": 953,
                        "closedAtEpoch": null,
                        "subgraphDeployment": {
                            "id": "0x1111111111111111111111111111111111111111111111111111111111111111",
                            "deniedAt": 0,
                            "stakedTokens": "96183284152000000014901161",
                            "signalledTokens": "182832939554154667498047",
                            "queryFeesAmount": "19861336072168874330350"
                        }
                    }
                ]
            }
        }
    }
"#;

/// An active allocation against the given deployment.
pub fn active_allocation(
    id: &str,
    deployment: DeploymentId,
    created_at_epoch: u64,
) -> Allocation {
    Allocation {
        id: Address::from_str(id).unwrap(),
        status: AllocationStatus::Active,
        subgraph_deployment: subgraph_deployment(deployment),
        indexer: *INDEXER,
        allocated_tokens: U256::from(1_000_000u64),
        created_at_epoch,
        created_at_block_hash:
            "0x99d3fbdc0105f7ccc0cd5bb287b82657fe92db4ea8fb58242dafb90b1c6e2adf".to_string(),
        closed_at_epoch: None,
        closed_at_epoch_start_block_hash: None,
        previous_epoch_start_block_hash: None,
        poi: None,
        query_fee_rebates: None,
        query_fees_collected: None,
    }
}

/// A closed allocation by another indexer, with the POI it presented and
/// the epoch start block hashes the dispute pipeline groups by.
pub fn closed_allocation(
    id: &str,
    deployment: DeploymentId,
    closed_at_epoch: u64,
    poi: B256,
) -> Allocation {
    Allocation {
        id: Address::from_str(id).unwrap(),
        status: AllocationStatus::Closed,
        subgraph_deployment: subgraph_deployment(deployment),
        indexer: *OTHER_INDEXER,
        allocated_tokens: U256::from(1_000_000u64),
        created_at_epoch: closed_at_epoch.saturating_sub(10),
        created_at_block_hash:
            "0x99d3fbdc0105f7ccc0cd5bb287b82657fe92db4ea8fb58242dafb90b1c6e2adf".to_string(),
        closed_at_epoch: Some(closed_at_epoch),
        closed_at_epoch_start_block_hash: Some(
            "0x28ca20ed537bbeb09e7cbbc8bd11e4340d64c4f6c0ae506b81f83ef5f944e310".to_string(),
        ),
        previous_epoch_start_block_hash: Some(
            "0x8debbd9dd9127b5da9e6abf3b661b7d31139d96193eb9d309a7dbaa4c0b52920".to_string(),
        ),
        poi: Some(poi),
        query_fee_rebates: None,
        query_fees_collected: None,
    }
}

pub fn subgraph_deployment(id: DeploymentId) -> SubgraphDeployment {
    SubgraphDeployment {
        id,
        denied_at: None,
        staked_tokens: U256::from(1_000_000u64),
        signalled_tokens: U256::from(1_000u64),
        query_fees_amount: U256::from(0u64),
    }
}

/// A network specification for a single test network.
pub fn network_specification() -> NetworkSpecification {
    NetworkSpecification {
        network_identifier: NETWORK_IDENTIFIER.to_string(),
        graph_network_id: 1,
        indexer_options: IndexerOptions {
            address: *INDEXER,
            register: true,
            allocation_management_mode: AllocationManagementMode::Auto,
            poi_disputable_epochs: 1,
            poi_dispute_monitoring: true,
            allocate_on_network_subgraph: false,
            offchain_subgraphs: vec![],
        },
        subgraphs: ProtocolSubgraphs {
            network_subgraph: SubgraphConfig {
                deployment: Some(*NETWORK_SUBGRAPH_DEPLOYMENT),
                url: "http://127.0.0.1:8000/subgraphs/network".to_string(),
            },
        },
    }
}
