// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Cross-checks the POIs of recently closed allocations against the
//! reference POIs this indexer's graph-node produces for the same blocks.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::anyhow;
use indexer_allocation::{Allocation, DisputeStatus, POIDispute, RewardsPool};
use indexer_monitor::{GraphNode, Network, Operator};
use thegraph_core::{alloy::primitives::{Address, B256}, DeploymentId};
use tracing::{debug, info, warn};

use crate::metrics;

/// Identifies new potential POI disputes among `disputable_allocations`
/// and persists them through the operator. Already-processed allocations
/// (a stored `potential` or `valid` row) are skipped, which makes the
/// whole pass idempotent.
pub async fn identify_potential_disputes(
    graph_node: &Arc<dyn GraphNode>,
    network: &Arc<dyn Network>,
    operator: &Arc<dyn Operator>,
    disputable_allocations: &[Allocation],
    disputable_epoch: u64,
) -> anyhow::Result<()> {
    let mut already_processed: HashSet<Address> = HashSet::new();
    for status in [DisputeStatus::Potential, DisputeStatus::Valid] {
        for dispute in operator
            .fetch_poi_disputes(status, disputable_epoch)
            .await?
        {
            already_processed.insert(dispute.allocation_id);
        }
    }

    let new_disputables: Vec<&Allocation> = disputable_allocations
        .iter()
        .filter(|allocation| !already_processed.contains(&allocation.id))
        .filter(|allocation| {
            if allocation.closed_at_epoch_start_block_hash.is_none() {
                warn!(
                    allocation = %allocation.id,
                    "Disputable allocation has no epoch start block hash, skipping"
                );
                return false;
            }
            true
        })
        .collect();
    if new_disputables.is_empty() {
        debug!("No new disputable allocations to process");
        return Ok(());
    }

    let mut pools: HashMap<(DeploymentId, u64), RewardsPool> = HashMap::new();
    for allocation in &new_disputables {
        if let Some(pool) = RewardsPool::from_allocation(allocation) {
            pools
                .entry((pool.subgraph_deployment, pool.closed_at_epoch))
                .or_insert(pool);
        }
    }

    for pool in pools.values_mut() {
        let closed_block = network
            .provider()
            .block_by_hash(&pool.closed_at_epoch_start_block_hash)
            .await?;
        pool.closed_at_epoch_start_block_number = Some(closed_block.number);
        pool.reference_poi = match graph_node
            .proof_of_indexing(
                &pool.subgraph_deployment,
                &closed_block,
                pool.allocation_indexer,
            )
            .await
        {
            Ok(poi) => poi,
            Err(err) => {
                warn!(
                    deployment = %pool.subgraph_deployment.to_string(),
                    error = %err,
                    "Failed to produce a reference POI"
                );
                None
            }
        };

        if let Some(previous_hash) = pool.previous_epoch_start_block_hash.clone() {
            let previous_block = network.provider().block_by_hash(&previous_hash).await?;
            pool.previous_epoch_start_block_number = Some(previous_block.number);
            pool.reference_previous_poi = match graph_node
                .proof_of_indexing(
                    &pool.subgraph_deployment,
                    &previous_block,
                    pool.allocation_indexer,
                )
                .await
            {
                Ok(poi) => poi,
                Err(err) => {
                    warn!(
                        deployment = %pool.subgraph_deployment.to_string(),
                        error = %err,
                        "Failed to produce a previous-epoch reference POI"
                    );
                    None
                }
            };
        }
    }

    let mut disputes = Vec::with_capacity(new_disputables.len());
    for allocation in &new_disputables {
        let closed_at_epoch = allocation
            .closed_at_epoch
            .ok_or_else(|| anyhow!("disputable allocation {} is not closed", allocation.id))?;
        let pool = pools
            .get(&(allocation.subgraph_deployment.id, closed_at_epoch))
            .ok_or_else(|| {
                anyhow!(
                    "no rewards pool for allocation {}, deployment {}",
                    allocation.id,
                    allocation.subgraph_deployment.id.to_string()
                )
            })?;
        disputes.push(classify(allocation, pool, operator.network_identifier()));
    }

    let potential_disputes = disputes
        .iter()
        .filter(|dispute| dispute.status == DisputeStatus::Potential)
        .count();
    let valid_allocations = disputes
        .iter()
        .filter(|dispute| dispute.status == DisputeStatus::Valid)
        .count();

    let stored = operator.store_poi_disputes(&disputes).await?;
    for dispute in &stored {
        metrics::POI_DISPUTES_STORED
            .with_label_values(&[&dispute.protocol_network, &dispute.status.to_string()])
            .inc();
    }
    info!(
        potential_disputes,
        valid_allocations, "Finished identifying potential POI disputes"
    );
    Ok(())
}

fn classify(allocation: &Allocation, pool: &RewardsPool, protocol_network: &str) -> POIDispute {
    let matches_reference = allocation.poi.is_some()
        && (allocation.poi == pool.reference_poi
            || allocation.poi == pool.reference_previous_poi);
    let status = if matches_reference {
        DisputeStatus::Valid
    } else if pool.reference_poi.is_none() || pool.reference_previous_poi.is_none() {
        DisputeStatus::ReferenceUnavailable
    } else {
        DisputeStatus::Potential
    };

    POIDispute {
        allocation_id: allocation.id,
        subgraph_deployment_id: allocation.subgraph_deployment.id,
        allocation_indexer: allocation.indexer,
        allocation_amount: allocation.allocated_tokens,
        allocation_proof: allocation.poi.unwrap_or(B256::ZERO),
        closed_epoch: pool.closed_at_epoch,
        closed_epoch_reference_proof: pool.reference_poi,
        closed_epoch_start_block_hash: pool.closed_at_epoch_start_block_hash.clone(),
        closed_epoch_start_block_number: pool.closed_at_epoch_start_block_number.unwrap_or(0),
        previous_epoch_reference_proof: pool.reference_previous_poi,
        previous_epoch_start_block_hash: pool
            .previous_epoch_start_block_hash
            .clone()
            .unwrap_or_default(),
        previous_epoch_start_block_number: pool.previous_epoch_start_block_number.unwrap_or(0),
        status,
        protocol_network: protocol_network.to_string(),
    }
}
