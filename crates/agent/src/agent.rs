// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! The control loop: derives target state from indexing rules and
//! on-chain data, and drives graph-node and the operator until reality
//! converges to it.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, ensure};
use futures::StreamExt;
use indexer_allocation::{Allocation, AllocationStatus};
use indexer_config::{resolve_chain_id, AllocationManagementMode};
use indexer_monitor::{GraphNode, Network, Operator};
use indexer_rules::{
    convert_subgraph_based_rules_to_deployment_based, evaluate_deployments, AllocationDecision,
    DecisionBasis, IdentifierType, IndexingRule,
};
use indexer_watcher::{join, timer};
use std::str::FromStr;
use thegraph_core::DeploymentId;
use tracing::{debug, info, warn};

use crate::{
    disputes::identify_potential_disputes,
    errors::IndexerErrorCode,
    metrics,
    multi_networks::{MultiNetworks, NetworkMapped},
};

const RULES_REFRESH_INTERVAL: Duration = Duration::from_millis(20_000);
const ACTIVE_DEPLOYMENTS_INTERVAL: Duration = Duration::from_millis(60_000);
const ACTIVE_ALLOCATIONS_INTERVAL: Duration = Duration::from_millis(120_000);
const TARGET_DEPLOYMENTS_INTERVAL: Duration = Duration::from_millis(120_000);
const NETWORK_DEPLOYMENTS_INTERVAL: Duration = Duration::from_millis(240_000);
const RECONCILE_INTERVAL: Duration = Duration::from_millis(240_000);
const EPOCH_INTERVAL: Duration = Duration::from_millis(600_000);

/// IPFS retrieval is slow but externally throttled; deployment changes
/// are applied with this many in flight.
const DEPLOYMENT_CONCURRENCY: usize = 10;

const SECONDS_PER_BLOCK: u64 = 15;
const PREVIOUS_VERSION_BUFFER_EPOCHS: u64 = 100;

/// One protocol network with the operator that manages it. Both sides
/// must agree on the network identifier.
pub struct NetworkAndOperator {
    pub network: Arc<dyn Network>,
    pub operator: Arc<dyn Operator>,
}

impl NetworkAndOperator {
    pub fn new(
        network: Arc<dyn Network>,
        operator: Arc<dyn Operator>,
    ) -> anyhow::Result<Self> {
        ensure!(
            network.network_identifier() == operator.network_identifier(),
            "network and operator disagree on the protocol network: `{}` vs `{}`",
            network.network_identifier(),
            operator.network_identifier(),
        );
        Ok(Self { network, operator })
    }

    fn network_identifier(&self) -> &str {
        self.network.network_identifier()
    }
}

pub struct Agent {
    graph_node: Arc<dyn GraphNode>,
    multi_networks: Arc<MultiNetworks<NetworkAndOperator>>,
    /// Deployments indexed regardless of rules, per network, from the
    /// startup configuration.
    offchain_subgraphs: Arc<NetworkMapped<Vec<DeploymentId>>>,
}

impl Agent {
    pub fn new(
        graph_node: Arc<dyn GraphNode>,
        networks: Vec<NetworkAndOperator>,
    ) -> anyhow::Result<Self> {
        let offchain_subgraphs = networks
            .iter()
            .map(|pair| {
                (
                    pair.network_identifier().to_string(),
                    pair.network
                        .specification()
                        .indexer_options
                        .offchain_subgraphs
                        .clone(),
                )
            })
            .collect();
        let multi_networks =
            MultiNetworks::new(networks, |pair| pair.network_identifier().to_string())?;
        Ok(Self {
            graph_node,
            multi_networks: Arc::new(multi_networks),
            offchain_subgraphs: Arc::new(offchain_subgraphs),
        })
    }

    /// Startup sequence, then the reconciliation loop. Does not return
    /// unless the loop dies.
    pub async fn start(self) -> anyhow::Result<()> {
        self.graph_node.connect().await?;

        self.multi_networks
            .map(|pair| pair.operator.ensure_global_indexing_rule())
            .await?;

        for (id, pair) in self.multi_networks.items() {
            let Some(deployment) = pair.network.network_subgraph_deployment() else {
                continue;
            };
            info!(network = %id, deployment = %deployment.to_string(), "Ensuring network subgraph is indexed");
            self.graph_node
                .ensure(&deployment_name(&deployment), &deployment)
                .await?;
            match self.graph_node.subgraph_chain(&deployment).await? {
                Some(chain) => {
                    let resolved = resolve_chain_id(&chain)?;
                    ensure!(
                        resolved == pair.network_identifier(),
                        "network subgraph of `{id}` indexes `{resolved}`, not this network",
                    );
                }
                None => {
                    warn!(network = %id, "Network subgraph chain identity not reported yet");
                }
            }
        }

        self.multi_networks
            .map(|pair| async move {
                if pair.network.specification().indexer_options.register {
                    pair.network.register().await?;
                }
                Ok(())
            })
            .await?;

        self.run().await
    }

    async fn run(self) -> anyhow::Result<()> {
        let Agent {
            graph_node,
            multi_networks,
            offchain_subgraphs,
        } = self;

        let indexing_rules = {
            let multi_networks = multi_networks.clone();
            timer(RULES_REFRESH_INTERVAL).try_map(
                move |_| {
                    let multi_networks = multi_networks.clone();
                    async move { multi_networks.map(refresh_indexing_rules).await }
                },
                |err| warn!(error = %err, "Failed to refresh indexing rules"),
            )
        };

        let active_deployments = {
            let graph_node = graph_node.clone();
            timer(ACTIVE_DEPLOYMENTS_INTERVAL).try_map(
                move |_| {
                    let graph_node = graph_node.clone();
                    async move { graph_node.subgraph_deployments().await }
                },
                |err| warn!(error = %err, "Failed to fetch active deployments"),
            )
        };

        let network_deployments = {
            let multi_networks = multi_networks.clone();
            timer(NETWORK_DEPLOYMENTS_INTERVAL).try_map(
                move |_| {
                    let multi_networks = multi_networks.clone();
                    async move {
                        multi_networks
                            .map(|pair| pair.network.monitor().subgraph_deployments())
                            .await
                    }
                },
                |err| warn!(error = %err, "Failed to fetch network deployments"),
            )
        };

        let active_allocations = {
            let multi_networks = multi_networks.clone();
            timer(ACTIVE_ALLOCATIONS_INTERVAL).try_map(
                move |_| {
                    let multi_networks = multi_networks.clone();
                    async move {
                        multi_networks
                            .map(|pair| {
                                pair.network.monitor().allocations(AllocationStatus::Active)
                            })
                            .await
                    }
                },
                |err| warn!(error = %err, "Failed to fetch active allocations"),
            )
        };

        let current_epoch = {
            let multi_networks = multi_networks.clone();
            timer(EPOCH_INTERVAL).try_map(
                move |_| {
                    let multi_networks = multi_networks.clone();
                    async move {
                        let epochs = multi_networks
                            .map(|pair| pair.network.monitor().current_epoch_number())
                            .await?;
                        for (network, epoch) in &epochs {
                            metrics::CURRENT_EPOCH
                                .with_label_values(&[network])
                                .set(*epoch as i64);
                        }
                        Ok(epochs)
                    }
                },
                |err| warn!(error = %err, "Failed to fetch the current epoch"),
            )
        };

        let channel_dispute_epochs = {
            let multi_networks = multi_networks.clone();
            timer(EPOCH_INTERVAL).try_map(
                move |_| {
                    let multi_networks = multi_networks.clone();
                    async move {
                        multi_networks
                            .map(|pair| pair.network.channel_dispute_epochs())
                            .await
                    }
                },
                |err| warn!(error = %err, "Failed to fetch channel dispute epochs"),
            )
        };

        let max_allocation_epochs = {
            let multi_networks = multi_networks.clone();
            timer(EPOCH_INTERVAL).try_map(
                move |_| {
                    let multi_networks = multi_networks.clone();
                    async move {
                        multi_networks
                            .map(|pair| pair.network.max_allocation_epochs())
                            .await
                    }
                },
                |err| warn!(error = %err, "Failed to fetch max allocation epochs"),
            )
        };

        let network_deployment_allocation_decisions = {
            let multi_networks = multi_networks.clone();
            join((indexing_rules.clone(), network_deployments.clone())).try_map(
                move |(rules, deployments)| {
                    let multi_networks = multi_networks.clone();
                    async move {
                        let zipped = multi_networks.zip(rules, deployments)?;
                        Ok(zipped
                            .into_iter()
                            .map(|(id, (rules, deployments))| {
                                let decisions = if rules.is_empty() {
                                    vec![]
                                } else {
                                    evaluate_deployments(&deployments, &rules)
                                };
                                (id, decisions)
                            })
                            .collect::<NetworkMapped<Vec<AllocationDecision>>>())
                    }
                },
                |err| warn!(error = %err, "Failed to evaluate allocation decisions"),
            )
        };

        let target_deployments = {
            let offchain_subgraphs = offchain_subgraphs.clone();
            join((
                timer(TARGET_DEPLOYMENTS_INTERVAL),
                network_deployment_allocation_decisions.clone(),
                indexing_rules.clone(),
            ))
            .try_map(
                move |(_, decisions, rules)| {
                    let offchain_subgraphs = offchain_subgraphs.clone();
                    async move {
                        Ok(derive_target_deployments(
                            &decisions,
                            &rules,
                            &offchain_subgraphs,
                        ))
                    }
                },
                |err| warn!(error = %err, "Failed to derive target deployments"),
            )
        };

        let recently_closed_allocations = {
            let multi_networks = multi_networks.clone();
            active_allocations.clone().try_map(
                move |_| {
                    let multi_networks = multi_networks.clone();
                    async move {
                        let per_network = multi_networks
                            .map(|pair| async move {
                                let monitor = pair.network.monitor();
                                let epoch = monitor.current_epoch_number().await?;
                                monitor.recently_closed_allocations(epoch, 1).await
                            })
                            .await?;
                        Ok(per_network
                            .into_values()
                            .flatten()
                            .collect::<Vec<Allocation>>())
                    }
                },
                |err| warn!(error = %err, "Failed to fetch recently closed allocations"),
            )
        };

        let claimable_allocations = {
            let multi_networks = multi_networks.clone();
            join((current_epoch.clone(), channel_dispute_epochs.clone())).try_map(
                move |(epochs, dispute_epochs)| {
                    let multi_networks = multi_networks.clone();
                    async move {
                        let zipped = multi_networks.zip(epochs, dispute_epochs)?;
                        multi_networks
                            .map_network_mapped(zipped, |pair, (epoch, dispute_epochs)| {
                                pair.network
                                    .monitor()
                                    .claimable_allocations(epoch.saturating_sub(dispute_epochs))
                            })
                            .await
                    }
                },
                |err| warn!(error = %err, "Failed to fetch claimable allocations"),
            )
        };

        let disputable_allocations = {
            let multi_networks = multi_networks.clone();
            join((current_epoch.clone(), active_deployments.clone())).try_map(
                move |(epochs, active)| {
                    let multi_networks = multi_networks.clone();
                    async move {
                        multi_networks
                            .map_network_mapped(epochs, |pair, epoch| {
                                let active = active.clone();
                                async move {
                                    pair.network
                                        .monitor()
                                        .disputable_allocations(epoch, &active, 0)
                                        .await
                                }
                            })
                            .await
                    }
                },
                |err| warn!(error = %err, "Failed to fetch disputable allocations"),
            )
        };

        let reconcile = join((
            timer(RECONCILE_INTERVAL),
            current_epoch,
            max_allocation_epochs,
            active_deployments,
            target_deployments,
            active_allocations,
            network_deployment_allocation_decisions,
            recently_closed_allocations,
            claimable_allocations,
            disputable_allocations,
        ));

        let pipe = reconcile.pipe(move |snapshot| {
            let graph_node = graph_node.clone();
            let multi_networks = multi_networks.clone();
            let offchain_subgraphs = offchain_subgraphs.clone();
            async move {
                let (
                    _,
                    current_epoch,
                    max_allocation_epochs,
                    active_deployments,
                    target_deployments,
                    active_allocations,
                    decisions,
                    recently_closed_allocations,
                    claimable_allocations,
                    disputable_allocations,
                ) = snapshot;

                info!("Reconcile with the network");
                metrics::RECONCILIATION_CYCLES.inc();

                if let Err(err) =
                    claim_rebate_rewards(&multi_networks, claimable_allocations).await
                {
                    metrics::RECONCILIATION_FAILURES
                        .with_label_values(&["claim"])
                        .inc();
                    warn!(error = %err, "Failed to claim rebate rewards");
                }

                if let Err(err) = identify_disputes(
                    &graph_node,
                    &multi_networks,
                    disputable_allocations,
                    current_epoch.clone(),
                )
                .await
                {
                    metrics::RECONCILIATION_FAILURES
                        .with_label_values(&["disputes"])
                        .inc();
                    warn!(error = %err, "Failed POI dispute monitoring");
                }

                // deployments backing a still-eligible allocation must
                // survive even if no rule targets them anymore
                let eligible_allocations: Vec<Allocation> = active_allocations
                    .values()
                    .flatten()
                    .cloned()
                    .chain(recently_closed_allocations)
                    .collect();

                if let Err(err) = reconcile_deployments(
                    &graph_node,
                    &multi_networks,
                    &offchain_subgraphs,
                    &active_deployments,
                    &target_deployments,
                    &eligible_allocations,
                )
                .await
                {
                    metrics::RECONCILIATION_FAILURES
                        .with_label_values(&["deployments"])
                        .inc();
                    warn!(code = %IndexerErrorCode::IE005, error = %err, "Failed to reconcile deployments");
                    // allocation actions are skipped for the rest of
                    // this cycle; the next cycle starts fresh
                    return;
                }

                if let Err(err) = reconcile_actions(
                    &multi_networks,
                    decisions,
                    current_epoch,
                    max_allocation_epochs,
                )
                .await
                {
                    metrics::RECONCILIATION_FAILURES
                        .with_label_values(&["actions"])
                        .inc();
                    warn!(code = %IndexerErrorCode::IE005, error = %err, "Failed to reconcile allocation actions");
                }
            }
        });

        pipe.await.map_err(|err| anyhow!("reconciliation loop died: {err}"))
    }
}

async fn refresh_indexing_rules(
    pair: &NetworkAndOperator,
) -> anyhow::Result<Vec<IndexingRule>> {
    let rules = pair.operator.indexing_rules(true).await?;
    let subgraph_ids: Vec<String> = rules
        .iter()
        .filter(|rule| rule.identifier_type == IdentifierType::Subgraph)
        .map(|rule| rule.identifier.clone())
        .collect();
    if subgraph_ids.is_empty() {
        return Ok(rules);
    }

    let subgraphs = pair.network.monitor().subgraphs(&subgraph_ids).await?;
    let epoch_length = pair.network.epoch_length().await?;
    let buffer_seconds = epoch_length * SECONDS_PER_BLOCK * PREVIOUS_VERSION_BUFFER_EPOCHS;
    let now_seconds = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(convert_subgraph_based_rules_to_deployment_based(
        &rules,
        &subgraphs,
        buffer_seconds,
        now_seconds,
    ))
}

pub(crate) fn derive_target_deployments(
    decisions: &NetworkMapped<Vec<AllocationDecision>>,
    rules: &NetworkMapped<Vec<IndexingRule>>,
    offchain_subgraphs: &NetworkMapped<Vec<DeploymentId>>,
) -> Vec<DeploymentId> {
    let mut targets: HashSet<DeploymentId> = HashSet::new();
    for decisions in decisions.values() {
        targets.extend(
            decisions
                .iter()
                .filter(|decision| decision.to_allocate)
                .map(|decision| decision.deployment),
        );
    }
    for rules in rules.values() {
        for rule in rules
            .iter()
            .filter(|rule| rule.decision_basis == DecisionBasis::Offchain)
        {
            match DeploymentId::from_str(&rule.identifier) {
                Ok(deployment) => {
                    targets.insert(deployment);
                }
                Err(err) => warn!(
                    identifier = %rule.identifier,
                    error = %err,
                    "Offchain rule identifier is not a deployment"
                ),
            }
        }
    }
    for offchain in offchain_subgraphs.values() {
        targets.extend(offchain.iter().copied());
    }
    targets.into_iter().collect()
}

async fn claim_rebate_rewards(
    multi_networks: &MultiNetworks<NetworkAndOperator>,
    claimable: NetworkMapped<Vec<Allocation>>,
) -> anyhow::Result<()> {
    multi_networks
        .map_network_mapped(claimable, |pair, allocations| async move {
            if allocations.is_empty() {
                return Ok(());
            }
            info!(
                network = pair.network_identifier(),
                claimable = allocations.len(),
                "Claiming rebate rewards"
            );
            pair.network.claim_rebate_rewards(&allocations).await
        })
        .await?;
    Ok(())
}

async fn identify_disputes(
    graph_node: &Arc<dyn GraphNode>,
    multi_networks: &MultiNetworks<NetworkAndOperator>,
    disputable: NetworkMapped<Vec<Allocation>>,
    current_epoch: NetworkMapped<u64>,
) -> anyhow::Result<()> {
    let zipped = multi_networks.zip(disputable, current_epoch)?;
    multi_networks
        .map_network_mapped(zipped, |pair, (allocations, epoch)| {
            let graph_node = graph_node.clone();
            async move {
                let options = &pair.network.specification().indexer_options;
                if !options.poi_dispute_monitoring {
                    return Ok(());
                }
                let disputable_epoch = epoch.saturating_sub(options.poi_disputable_epochs);
                identify_potential_disputes(
                    &graph_node,
                    &pair.network,
                    &pair.operator,
                    &allocations,
                    disputable_epoch,
                )
                .await
            }
        })
        .await?;
    Ok(())
}

fn deployment_name(deployment: &DeploymentId) -> String {
    let ipfs_hash = deployment.to_string();
    let tail = ipfs_hash.len().saturating_sub(10);
    format!("indexer-agent/{}", ipfs_hash[tail..].to_lowercase())
}

/// Diffs the deployments graph-node is indexing against the target set
/// and applies the changes. Deployments backing an eligible allocation
/// are never removed.
pub(crate) async fn reconcile_deployments(
    graph_node: &Arc<dyn GraphNode>,
    multi_networks: &MultiNetworks<NetworkAndOperator>,
    offchain_subgraphs: &NetworkMapped<Vec<DeploymentId>>,
    active_deployments: &[DeploymentId],
    target_deployments: &[DeploymentId],
    eligible_allocations: &[Allocation],
) -> anyhow::Result<()> {
    let mut target: HashSet<DeploymentId> = target_deployments.iter().copied().collect();
    // every network's own meta-subgraph is always indexed
    for (_, pair) in multi_networks.items() {
        if let Some(deployment) = pair.network.network_subgraph_deployment() {
            target.insert(deployment);
        }
    }
    for offchain in offchain_subgraphs.values() {
        target.extend(offchain.iter().copied());
    }

    let active: HashSet<DeploymentId> = active_deployments.iter().copied().collect();
    let eligible: HashSet<DeploymentId> = eligible_allocations
        .iter()
        .map(|allocation| allocation.subgraph_deployment.id)
        .collect();

    let deploy: Vec<DeploymentId> = target.difference(&active).copied().collect();
    let remove: Vec<DeploymentId> = active
        .iter()
        .filter(|deployment| !target.contains(*deployment) && !eligible.contains(*deployment))
        .copied()
        .collect();

    if deploy.is_empty() && remove.is_empty() {
        debug!("No deployment changes");
    } else {
        info!(
            deploy = deploy.len(),
            remove = remove.len(),
            "Deployment changes"
        );
    }

    enum Change {
        Deploy(DeploymentId),
        Remove(DeploymentId),
    }

    let changes = deploy
        .into_iter()
        .map(Change::Deploy)
        .chain(remove.into_iter().map(Change::Remove));

    futures::stream::iter(changes)
        .for_each_concurrent(DEPLOYMENT_CONCURRENCY, |change| async move {
            match change {
                Change::Deploy(deployment) => {
                    // ensure can stall on IPFS retrieval; failures are
                    // retried on the next cycle
                    let name = deployment_name(&deployment);
                    match graph_node.ensure(&name, &deployment).await {
                        Ok(()) => {
                            metrics::DEPLOYMENT_CHANGES
                                .with_label_values(&["deploy"])
                                .inc();
                        }
                        Err(err) => warn!(
                            deployment = %deployment.to_string(),
                            error = %err,
                            "Failed to deploy subgraph deployment"
                        ),
                    }
                }
                Change::Remove(deployment) => match graph_node.remove(&deployment).await {
                    Ok(()) => {
                        metrics::DEPLOYMENT_CHANGES
                            .with_label_values(&["remove"])
                            .inc();
                    }
                    Err(err) => warn!(
                        deployment = %deployment.to_string(),
                        error = %err,
                        "Failed to remove subgraph deployment"
                    ),
                },
            }
        })
        .await;

    Ok(())
}

/// Decides open/close/refresh per deployment and issues the actions
/// through each network's operator.
pub(crate) async fn reconcile_actions(
    multi_networks: &MultiNetworks<NetworkAndOperator>,
    decisions: NetworkMapped<Vec<AllocationDecision>>,
    current_epoch: NetworkMapped<u64>,
    max_allocation_epochs: NetworkMapped<u64>,
) -> anyhow::Result<()> {
    // manual-mode networks are not touched at all
    let decisions: NetworkMapped<Vec<AllocationDecision>> = decisions
        .into_iter()
        .filter(|(id, _)| {
            let manual = multi_networks.get(id).is_some_and(|pair| {
                pair.network
                    .specification()
                    .indexer_options
                    .allocation_management_mode
                    == AllocationManagementMode::Manual
            });
            if manual {
                warn!(
                    network = %id,
                    "Allocation management is manual, skipping allocation actions"
                );
            }
            !manual
        })
        .collect();
    if decisions.is_empty() {
        return Ok(());
    }

    for (id, mut decisions) in decisions {
        let pair = multi_networks
            .get(&id)
            .ok_or_else(|| anyhow!("unknown network `{id}` in allocation decisions"))?;
        let epoch = *current_epoch
            .get(&id)
            .ok_or_else(|| anyhow!("missing current epoch for network `{id}`"))?;
        let max_epochs = *max_allocation_epochs
            .get(&id)
            .ok_or_else(|| anyhow!("missing max allocation epochs for network `{id}`"))?;

        // the network subgraph is indexed everywhere but only allocated
        // towards when explicitly enabled
        let options = &pair.network.specification().indexer_options;
        if let Some(meta) = pair.network.network_subgraph_deployment() {
            if !options.allocate_on_network_subgraph {
                for decision in decisions
                    .iter_mut()
                    .filter(|decision| decision.deployment == meta)
                {
                    decision.to_allocate = false;
                }
            }
        }

        for decision in decisions {
            if let Err(err) =
                reconcile_deployment_allocation_action(pair, &decision, epoch, max_epochs).await
            {
                warn!(
                    network = %id,
                    deployment = %decision.deployment.to_string(),
                    error = %err,
                    "Failed to reconcile allocation action"
                );
            }
        }
    }
    Ok(())
}

async fn reconcile_deployment_allocation_action(
    pair: &NetworkAndOperator,
    decision: &AllocationDecision,
    epoch: u64,
    max_allocation_epochs: u64,
) -> anyhow::Result<()> {
    let network_identifier = pair.network_identifier();

    // freshness guard: re-read the active allocations before acting
    let active = pair
        .network
        .monitor()
        .allocations(AllocationStatus::Active)
        .await?;
    let matching: Vec<Allocation> = active
        .into_iter()
        .filter(|allocation| allocation.subgraph_deployment.id == decision.deployment)
        .collect();

    if !decision.to_allocate {
        pair.operator
            .close_eligible_allocations(decision, &matching, epoch)
            .await?;
        metrics::ALLOCATION_ACTIONS
            .with_label_values(&[network_identifier, "close"])
            .inc();
        return Ok(());
    }

    if matching.is_empty() {
        let closed = pair
            .network
            .monitor()
            .closed_allocations(&decision.deployment)
            .await?;
        pair.operator
            .create_allocation(decision, closed.first())
            .await?;
        metrics::ALLOCATION_ACTIONS
            .with_label_values(&[network_identifier, "create"])
            .inc();
        return Ok(());
    }

    let desired_lifetime = decision
        .rule_match
        .rule
        .as_ref()
        .and_then(|rule| rule.allocation_lifetime)
        .unwrap_or_else(|| max_allocation_epochs.saturating_sub(1).max(1));
    let expired = matching
        .into_iter()
        .filter(|allocation| epoch >= allocation.created_at_epoch + desired_lifetime);

    let mut confirmed_expired = Vec::new();
    for allocation in expired {
        match pair.network.allocation_state(allocation.id).await {
            Ok(state) => {
                if state.closed_at_epoch == 0 {
                    confirmed_expired.push(allocation);
                }
            }
            Err(err) => {
                warn!(
                    code = %IndexerErrorCode::IE006,
                    allocation = %allocation.id,
                    error = %err,
                    "Failed to cross-check allocation state, assuming it is still open"
                );
                confirmed_expired.push(allocation);
            }
        }
    }

    if !confirmed_expired.is_empty() {
        pair.operator
            .refresh_expired_allocations(decision, &confirmed_expired)
            .await?;
        metrics::ALLOCATION_ACTIONS
            .with_label_values(&[network_identifier, "refresh"])
            .inc();
    }
    Ok(())
}
