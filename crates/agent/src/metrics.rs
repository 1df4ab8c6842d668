// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounter,
    IntCounterVec, IntGaugeVec, TextEncoder,
};
use tracing::{error, info};

lazy_static! {
    pub static ref RECONCILIATION_CYCLES: IntCounter = register_int_counter!(
        "indexer_agent_reconciliation_cycles_total",
        "Reconciliation cycles started"
    )
    .unwrap();
    pub static ref RECONCILIATION_FAILURES: IntCounterVec = register_int_counter_vec!(
        "indexer_agent_reconciliation_failures_total",
        "Reconciliation steps that failed",
        &["step"]
    )
    .unwrap();
    pub static ref DEPLOYMENT_CHANGES: IntCounterVec = register_int_counter_vec!(
        "indexer_agent_deployment_changes_total",
        "Deployments ensured on or removed from graph-node",
        &["action"]
    )
    .unwrap();
    pub static ref ALLOCATION_ACTIONS: IntCounterVec = register_int_counter_vec!(
        "indexer_agent_allocation_actions_total",
        "Allocation actions issued through the operator",
        &["network", "action"]
    )
    .unwrap();
    pub static ref POI_DISPUTES_STORED: IntCounterVec = register_int_counter_vec!(
        "indexer_agent_poi_disputes_total",
        "POI disputes persisted, by classification",
        &["network", "status"]
    )
    .unwrap();
    pub static ref CURRENT_EPOCH: IntGaugeVec = register_int_gauge_vec!(
        "indexer_agent_current_epoch",
        "Latest observed protocol epoch",
        &["network"]
    )
    .unwrap();
}

async fn render_metrics() -> String {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        error!(error = %err, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Serves the Prometheus metrics of the agent on `/metrics`. Runs until
/// the process exits.
pub async fn serve_metrics(port: u16) {
    let app = Router::new().route("/metrics", get(render_metrics));
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, port, "Failed to bind metrics listener");
            return;
        }
    };
    info!(port, "Serving metrics");
    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "Metrics server terminated");
    }
}
