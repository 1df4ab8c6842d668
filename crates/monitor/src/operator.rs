// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use indexer_allocation::{Allocation, DisputeStatus, POIDispute};
use indexer_rules::{AllocationDecision, IndexingRule};

/// The operator's authoring surface for one network: indexing rules,
/// dispute bookkeeping, and allocation actions. Rule and dispute rows
/// live in the management store behind this trait.
#[async_trait]
pub trait Operator: Send + Sync {
    fn network_identifier(&self) -> &str;

    /// Creates the global indexing rule if it does not exist yet.
    async fn ensure_global_indexing_rule(&self) -> anyhow::Result<()>;

    /// The network's indexing rules, optionally with global defaults
    /// merged into each rule.
    async fn indexing_rules(&self, merge_global: bool) -> anyhow::Result<Vec<IndexingRule>>;

    /// Stored disputes with the given status, for allocations closed at
    /// or after `min_closed_epoch`.
    async fn fetch_poi_disputes(
        &self,
        status: DisputeStatus,
        min_closed_epoch: u64,
    ) -> anyhow::Result<Vec<POIDispute>>;

    /// Persists dispute rows; append-only and idempotent per
    /// `(allocation_id, protocol_network)`.
    async fn store_poi_disputes(
        &self,
        disputes: &[POIDispute],
    ) -> anyhow::Result<Vec<POIDispute>>;

    async fn create_allocation(
        &self,
        decision: &AllocationDecision,
        last_closed: Option<&Allocation>,
    ) -> anyhow::Result<()>;

    async fn close_eligible_allocations(
        &self,
        decision: &AllocationDecision,
        active: &[Allocation],
        current_epoch: u64,
    ) -> anyhow::Result<()>;

    async fn refresh_expired_allocations(
        &self,
        decision: &AllocationDecision,
        expired: &[Allocation],
    ) -> anyhow::Result<()>;
}
