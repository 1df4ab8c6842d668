// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, str::FromStr, sync::Arc};

use indexer_allocation::DisputeStatus;
use indexer_monitor::{GraphNode, Network, Operator};
use test_assets as assets;
use thegraph_core::alloy::primitives::B256;

use super::mocks::{mock_network, MockBlocks, MockGraphNode, MockMonitor, MockOperator};
use crate::disputes::identify_potential_disputes;

const CLOSED_EPOCH_START: &str =
    "0x28ca20ed537bbeb09e7cbbc8bd11e4340d64c4f6c0ae506b81f83ef5f944e310";
const PREVIOUS_EPOCH_START: &str =
    "0x8debbd9dd9127b5da9e6abf3b661b7d31139d96193eb9d309a7dbaa4c0b52920";
const CLOSED_EPOCH_START_NUMBER: u64 = 19_530_000;
const PREVIOUS_EPOCH_START_NUMBER: u64 = 19_520_000;

struct Harness {
    graph_node: Arc<dyn GraphNode>,
    network: Arc<dyn Network>,
    operator: Arc<MockOperator>,
    operator_handle: Arc<dyn Operator>,
}

/// Reference POIs as the local graph-node reports them: `POI_B` at the
/// epoch start block, `POI_A` at the previous epoch start block.
fn harness(pois: HashMap<(thegraph_core::DeploymentId, u64), B256>) -> Harness {
    let monitor = Arc::new(MockMonitor::default());
    let mut network = mock_network(assets::network_specification(), monitor);
    network.provider = Arc::new(MockBlocks {
        blocks: HashMap::from([
            (CLOSED_EPOCH_START.to_string(), CLOSED_EPOCH_START_NUMBER),
            (
                PREVIOUS_EPOCH_START.to_string(),
                PREVIOUS_EPOCH_START_NUMBER,
            ),
        ]),
    });
    let operator = Arc::new(MockOperator {
        network: assets::NETWORK_IDENTIFIER.to_string(),
        ..Default::default()
    });
    Harness {
        graph_node: Arc::new(MockGraphNode {
            pois,
            ..Default::default()
        }),
        network: Arc::new(network),
        operator: operator.clone(),
        operator_handle: operator,
    }
}

fn reference_pois() -> HashMap<(thegraph_core::DeploymentId, u64), B256> {
    HashMap::from([
        (
            (*assets::DEPLOYMENT_A, CLOSED_EPOCH_START_NUMBER),
            *assets::POI_B,
        ),
        (
            (*assets::DEPLOYMENT_A, PREVIOUS_EPOCH_START_NUMBER),
            *assets::POI_A,
        ),
    ])
}

#[test_log::test(tokio::test)]
async fn a_poi_matching_the_previous_reference_is_valid() {
    let harness = harness(reference_pois());
    let allocation = assets::closed_allocation(
        "0xfa44c72b753a66591f241c7dc04e8178c30e13af",
        *assets::DEPLOYMENT_A,
        953,
        *assets::POI_A,
    );

    identify_potential_disputes(
        &harness.graph_node,
        &harness.network,
        &harness.operator_handle,
        &[allocation.clone()],
        952,
    )
    .await
    .unwrap();

    let stored = harness.operator.stored_disputes.lock().unwrap().clone();
    assert_eq!(stored.len(), 1);
    let dispute = &stored[0];
    assert_eq!(dispute.status, DisputeStatus::Valid);
    assert_eq!(dispute.allocation_id, allocation.id);
    assert_eq!(dispute.closed_epoch, 953);
    assert_eq!(
        dispute.closed_epoch_start_block_number,
        CLOSED_EPOCH_START_NUMBER
    );
    assert_eq!(dispute.protocol_network, assets::NETWORK_IDENTIFIER);
}

#[test_log::test(tokio::test)]
async fn a_poi_matching_no_reference_is_a_potential_dispute() {
    let harness = harness(reference_pois());
    let rogue_poi = B256::from_str(
        "0xcccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc",
    )
    .unwrap();
    let allocation = assets::closed_allocation(
        "0xfa44c72b753a66591f241c7dc04e8178c30e13af",
        *assets::DEPLOYMENT_A,
        953,
        rogue_poi,
    );

    identify_potential_disputes(
        &harness.graph_node,
        &harness.network,
        &harness.operator_handle,
        &[allocation],
        952,
    )
    .await
    .unwrap();

    let stored = harness.operator.stored_disputes.lock().unwrap().clone();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, DisputeStatus::Potential);
}

#[test_log::test(tokio::test)]
async fn a_missing_reference_poi_is_recorded_as_unavailable() {
    // only the closed-epoch reference is available
    let pois = HashMap::from([(
        (*assets::DEPLOYMENT_A, CLOSED_EPOCH_START_NUMBER),
        *assets::POI_B,
    )]);
    let harness = harness(pois);
    let rogue_poi = B256::from_str(
        "0xcccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc",
    )
    .unwrap();
    let allocation = assets::closed_allocation(
        "0xfa44c72b753a66591f241c7dc04e8178c30e13af",
        *assets::DEPLOYMENT_A,
        953,
        rogue_poi,
    );

    identify_potential_disputes(
        &harness.graph_node,
        &harness.network,
        &harness.operator_handle,
        &[allocation],
        952,
    )
    .await
    .unwrap();

    let stored = harness.operator.stored_disputes.lock().unwrap().clone();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, DisputeStatus::ReferenceUnavailable);
}

#[test_log::test(tokio::test)]
async fn dispute_identification_is_idempotent() {
    let harness = harness(reference_pois());
    let allocation = assets::closed_allocation(
        "0xfa44c72b753a66591f241c7dc04e8178c30e13af",
        *assets::DEPLOYMENT_A,
        953,
        *assets::POI_A,
    );

    for _ in 0..2 {
        identify_potential_disputes(
            &harness.graph_node,
            &harness.network,
            &harness.operator_handle,
            &[allocation.clone()],
            952,
        )
        .await
        .unwrap();
    }

    assert_eq!(harness.operator.stored_disputes.lock().unwrap().len(), 1);
}

#[test_log::test(tokio::test)]
async fn allocations_without_epoch_start_hashes_are_skipped() {
    let harness = harness(reference_pois());
    let mut allocation = assets::closed_allocation(
        "0xfa44c72b753a66591f241c7dc04e8178c30e13af",
        *assets::DEPLOYMENT_A,
        953,
        *assets::POI_A,
    );
    allocation.closed_at_epoch_start_block_hash = None;

    identify_potential_disputes(
        &harness.graph_node,
        &harness.network,
        &harness.operator_handle,
        &[allocation],
        952,
    )
    .await
    .unwrap();

    assert!(harness.operator.stored_disputes.lock().unwrap().is_empty());
}
