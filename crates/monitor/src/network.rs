// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use indexer_allocation::{Allocation, AllocationStatus, SubgraphDeployment};
use indexer_config::NetworkSpecification;
use indexer_rules::Subgraph;
use thegraph_core::{alloy::primitives::Address, DeploymentId};

use crate::chain::BlockProvider;

/// The allocation as the staking contract sees it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OnchainAllocation {
    pub indexer: Address,
    /// Zero while the allocation is still open.
    pub closed_at_epoch: u64,
}

/// Read-only view of one protocol network.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn current_epoch_number(&self) -> anyhow::Result<u64>;

    /// Subgraphs by id, with their version history.
    async fn subgraphs(&self, ids: &[String]) -> anyhow::Result<Vec<Subgraph>>;

    /// All deployments on the network, with curation and stake stats.
    async fn subgraph_deployments(&self) -> anyhow::Result<Vec<SubgraphDeployment>>;

    /// The indexer's own allocations in the given status.
    async fn allocations(&self, status: AllocationStatus) -> anyhow::Result<Vec<Allocation>>;

    /// The indexer's allocations closed within the last `range` epochs.
    async fn recently_closed_allocations(
        &self,
        current_epoch: u64,
        range: u64,
    ) -> anyhow::Result<Vec<Allocation>>;

    /// The indexer's closed allocations whose dispute window has passed.
    async fn claimable_allocations(
        &self,
        closed_at_epoch_threshold: u64,
    ) -> anyhow::Result<Vec<Allocation>>;

    /// Other indexers' closed allocations that are still young enough to
    /// dispute, restricted to deployments this indexer can produce a
    /// reference POI for.
    async fn disputable_allocations(
        &self,
        current_epoch: u64,
        deployments: &[DeploymentId],
        minimum_allocation: u64,
    ) -> anyhow::Result<Vec<Allocation>>;

    /// The indexer's closed allocations against one deployment, most
    /// recently closed first.
    async fn closed_allocations(
        &self,
        deployment: &DeploymentId,
    ) -> anyhow::Result<Vec<Allocation>>;
}

/// Write side of one protocol network, plus its chain and contract
/// accessors. On-chain transactions are issued through the injected
/// signer of the implementation.
#[async_trait]
pub trait Network: Send + Sync {
    fn specification(&self) -> &NetworkSpecification;

    fn monitor(&self) -> &Arc<dyn NetworkMonitor>;

    fn provider(&self) -> &Arc<dyn BlockProvider>;

    fn network_identifier(&self) -> &str {
        &self.specification().network_identifier
    }

    /// The network's own meta-subgraph deployment, when configured.
    fn network_subgraph_deployment(&self) -> Option<DeploymentId> {
        self.specification().subgraphs.network_subgraph.deployment
    }

    /// Idempotent on-chain indexer registration.
    async fn register(&self) -> anyhow::Result<()>;

    /// Claims rebate rewards for the given closed allocations.
    async fn claim_rebate_rewards(&self, allocations: &[Allocation]) -> anyhow::Result<()>;

    /// `EpochManager.epochLength()`.
    async fn epoch_length(&self) -> anyhow::Result<u64>;

    /// `Staking.channelDisputeEpochs()`.
    async fn channel_dispute_epochs(&self) -> anyhow::Result<u64>;

    /// `Staking.maxAllocationEpochs()`.
    async fn max_allocation_epochs(&self) -> anyhow::Result<u64>;

    /// `Staking.getAllocation(id)`.
    async fn allocation_state(&self, allocation: Address) -> anyhow::Result<OnchainAllocation>;
}
