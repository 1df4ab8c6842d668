// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Deserializer};
use thegraph_core::{
    alloy::primitives::{Address, B256, U256},
    DeploymentId,
};

/// An on-chain allocation: a staked commitment by an indexer to index a
/// subgraph deployment, redeemable against a proof of indexing.
///
/// Identity is the on-chain allocation address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub id: Address,
    pub status: AllocationStatus,
    pub subgraph_deployment: SubgraphDeployment,
    pub indexer: Address,
    pub allocated_tokens: U256,
    pub created_at_epoch: u64,
    pub created_at_block_hash: String,
    pub closed_at_epoch: Option<u64>,
    pub closed_at_epoch_start_block_hash: Option<String>,
    pub previous_epoch_start_block_hash: Option<String>,
    pub poi: Option<B256>,
    pub query_fee_rebates: Option<U256>,
    pub query_fees_collected: Option<U256>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllocationStatus {
    Null,
    Active,
    Closed,
    Finalized,
    Claimed,
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            AllocationStatus::Null => "Null",
            AllocationStatus::Active => "Active",
            AllocationStatus::Closed => "Closed",
            AllocationStatus::Finalized => "Finalized",
            AllocationStatus::Claimed => "Claimed",
        };
        write!(f, "{status}")
    }
}

/// A subgraph deployment as reported by the network subgraph, with the
/// curation and stake statistics the allocation rules are evaluated
/// against.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphDeployment {
    pub id: DeploymentId,
    #[serde(default)]
    pub denied_at: Option<u64>,
    #[serde(default)]
    pub staked_tokens: U256,
    #[serde(default)]
    pub signalled_tokens: U256,
    #[serde(default)]
    pub query_fees_amount: U256,
}

impl<'d> Deserialize<'d> for Allocation {
    fn deserialize<D>(deserializer: D) -> Result<Allocation, D::Error>
    where
        D: Deserializer<'d>,
    {
        #[derive(Deserialize)]
        struct InnerIndexer {
            id: Address,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Outer {
            id: Address,
            subgraph_deployment: SubgraphDeployment,
            indexer: InnerIndexer,
            allocated_tokens: U256,
            created_at_block_hash: String,
            created_at_epoch: u64,
            closed_at_epoch: Option<u64>,
            #[serde(default)]
            poi: Option<B256>,
        }

        let outer = Outer::deserialize(deserializer)?;

        Ok(Allocation {
            id: outer.id,
            status: AllocationStatus::Null,
            subgraph_deployment: outer.subgraph_deployment,
            indexer: outer.indexer.id,
            allocated_tokens: outer.allocated_tokens,
            created_at_epoch: outer.created_at_epoch,
            created_at_block_hash: outer.created_at_block_hash,
            closed_at_epoch: outer.closed_at_epoch,
            closed_at_epoch_start_block_hash: None,
            previous_epoch_start_block_hash: None,
            poi: outer.poi,
            query_fee_rebates: None,
            query_fees_collected: None,
        })
    }
}

/// Allocations closed in the same epoch against the same deployment share
/// one rewards pool; the pool carries the reference POIs they are all
/// cross-checked against. Equality is structural.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RewardsPool {
    pub subgraph_deployment: DeploymentId,
    pub closed_at_epoch: u64,
    pub closed_at_epoch_start_block_hash: String,
    pub closed_at_epoch_start_block_number: Option<u64>,
    pub previous_epoch_start_block_hash: Option<String>,
    pub previous_epoch_start_block_number: Option<u64>,
    pub allocation_indexer: Address,
    pub reference_poi: Option<B256>,
    pub reference_previous_poi: Option<B256>,
}

impl RewardsPool {
    /// The pool a closed allocation belongs to. `None` when the epoch
    /// start block hash is not known for the allocation.
    pub fn from_allocation(allocation: &Allocation) -> Option<RewardsPool> {
        let closed_at_epoch = allocation.closed_at_epoch?;
        let closed_at_epoch_start_block_hash =
            allocation.closed_at_epoch_start_block_hash.clone()?;
        Some(RewardsPool {
            subgraph_deployment: allocation.subgraph_deployment.id,
            closed_at_epoch,
            closed_at_epoch_start_block_hash,
            closed_at_epoch_start_block_number: None,
            previous_epoch_start_block_hash: allocation.previous_epoch_start_block_hash.clone(),
            previous_epoch_start_block_number: None,
            allocation_indexer: allocation.indexer,
            reference_poi: None,
            reference_previous_poi: None,
        })
    }
}

/// Classification of a closed allocation's POI against the reference POIs
/// of its rewards pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    /// The presented POI matches one of the reference POIs.
    Valid,
    /// The presented POI matches neither reference POI.
    Potential,
    /// At least one reference POI could not be produced.
    ReferenceUnavailable,
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            DisputeStatus::Valid => "valid",
            DisputeStatus::Potential => "potential",
            DisputeStatus::ReferenceUnavailable => "reference_unavailable",
        };
        write!(f, "{status}")
    }
}

/// A persisted POI cross-check result, keyed by
/// `(allocation_id, protocol_network)`.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, Deserialize)]
pub struct POIDispute {
    pub allocation_id: Address,
    pub subgraph_deployment_id: DeploymentId,
    pub allocation_indexer: Address,
    pub allocation_amount: U256,
    pub allocation_proof: B256,
    pub closed_epoch: u64,
    pub closed_epoch_reference_proof: Option<B256>,
    pub closed_epoch_start_block_hash: String,
    pub closed_epoch_start_block_number: u64,
    pub previous_epoch_reference_proof: Option<B256>,
    pub previous_epoch_start_block_hash: String,
    pub previous_epoch_start_block_number: u64,
    pub status: DisputeStatus,
    pub protocol_network: String,
}
