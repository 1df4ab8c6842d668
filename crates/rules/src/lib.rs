// Copyright 2023-, Edge & Node, GraphOps, and Semiotic Labs.
// SPDX-License-Identifier: Apache-2.0

//! Indexing rules: which deployments an indexer allocates towards, and why.
//!
//! Rules are authored against subgraphs or deployments; before evaluation,
//! subgraph-based rules are rewritten to target the subgraph's current
//! deployment (plus the previous one while a version switch is fresh).

use std::str::FromStr;

use indexer_allocation::SubgraphDeployment;
use serde::{Deserialize, Serialize};
use thegraph_core::{alloy::primitives::U256, DeploymentId};

/// Identifier of the rule that supplies per-network defaults.
pub const INDEXING_RULE_GLOBAL: &str = "global";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierType {
    Global,
    Deployment,
    Subgraph,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionBasis {
    #[default]
    Rules,
    Always,
    Never,
    Offchain,
}

/// One indexing rule. Exactly one rule exists per
/// `(protocol_network, identifier)`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingRule {
    pub identifier: String,
    pub identifier_type: IdentifierType,
    #[serde(default)]
    pub decision_basis: DecisionBasis,
    #[serde(default)]
    pub allocation_amount: Option<U256>,
    #[serde(default)]
    pub allocation_lifetime: Option<u64>,
    #[serde(default = "default_true")]
    pub auto_renewal: bool,
    #[serde(default)]
    pub parallel_allocations: Option<u64>,
    #[serde(default)]
    pub max_signal: Option<U256>,
    #[serde(default)]
    pub min_signal: Option<U256>,
    #[serde(default)]
    pub min_stake: Option<U256>,
    #[serde(default)]
    pub min_average_query_fees: Option<U256>,
    #[serde(default = "default_true")]
    pub require_supported: bool,
    pub protocol_network: String,
}

fn default_true() -> bool {
    true
}

impl IndexingRule {
    /// The default global rule for a network: rules-based with no
    /// thresholds, so nothing is allocated towards until the operator
    /// says so.
    pub fn global(protocol_network: impl Into<String>) -> IndexingRule {
        IndexingRule {
            identifier: INDEXING_RULE_GLOBAL.to_string(),
            identifier_type: IdentifierType::Global,
            decision_basis: DecisionBasis::Rules,
            allocation_amount: None,
            allocation_lifetime: None,
            auto_renewal: true,
            parallel_allocations: None,
            max_signal: None,
            min_signal: None,
            min_stake: None,
            min_average_query_fees: None,
            require_supported: true,
            protocol_network: protocol_network.into(),
        }
    }

    /// Whether this rule targets the given deployment. Identifiers are
    /// accepted in both the hex and the IPFS hash rendering; equality is
    /// by bytes.
    pub fn applies_to_deployment(&self, deployment: &DeploymentId) -> bool {
        self.identifier_type == IdentifierType::Deployment
            && DeploymentId::from_str(&self.identifier)
                .map(|id| id == *deployment)
                .unwrap_or(false)
    }

    /// Fills unset fields from the global rule; fields set on the rule
    /// itself win.
    pub fn merge_global(&self, global: Option<&IndexingRule>) -> IndexingRule {
        let Some(global) = global else {
            return self.clone();
        };
        IndexingRule {
            allocation_amount: self.allocation_amount.or(global.allocation_amount),
            allocation_lifetime: self.allocation_lifetime.or(global.allocation_lifetime),
            parallel_allocations: self.parallel_allocations.or(global.parallel_allocations),
            max_signal: self.max_signal.or(global.max_signal),
            min_signal: self.min_signal.or(global.min_signal),
            min_stake: self.min_stake.or(global.min_stake),
            min_average_query_fees: self
                .min_average_query_fees
                .or(global.min_average_query_fees),
            ..self.clone()
        }
    }
}

/// A subgraph with its deployment version history. Versions are indexed
/// from zero; `version_count - 1` is the latest.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subgraph {
    pub id: String,
    pub version_count: u64,
    pub versions: Vec<SubgraphVersion>,
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphVersion {
    pub version: u64,
    pub created_at: u64,
    pub deployment: DeploymentId,
}

impl Subgraph {
    fn version(&self, version: u64) -> Option<&SubgraphVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    fn latest_version(&self) -> Option<&SubgraphVersion> {
        self.version(self.version_count.checked_sub(1)?)
    }
}

fn targets_deployment(rules: &[IndexingRule], deployment: &DeploymentId) -> bool {
    rules.iter().any(|r| r.applies_to_deployment(deployment))
}

/// Rewrites subgraph-based rules to deployment-based ones.
///
/// A rule targeting a subgraph is rewritten to target the subgraph's
/// latest deployment. While the latest version is younger than
/// `previous_version_buffer_seconds`, a copy of the rule targeting the
/// previous deployment is appended, so the old version keeps being
/// indexed across the switch. No `(network, identifier)` duplicates are
/// produced.
pub fn convert_subgraph_based_rules_to_deployment_based(
    rules: &[IndexingRule],
    subgraphs: &[Subgraph],
    previous_version_buffer_seconds: u64,
    now_seconds: u64,
) -> Vec<IndexingRule> {
    let mut working: Vec<IndexingRule> = rules.to_vec();
    let mut i = 0;
    while i < working.len() {
        if working[i].identifier_type != IdentifierType::Subgraph {
            i += 1;
            continue;
        }
        let identifier = working[i].identifier.clone();
        let Some(subgraph) = subgraphs.iter().find(|s| s.id == identifier) else {
            i += 1;
            continue;
        };
        let Some(latest) = subgraph.latest_version().cloned() else {
            i += 1;
            continue;
        };

        if !targets_deployment(&working, &latest.deployment) {
            working[i].identifier = latest.deployment.to_string();
            working[i].identifier_type = IdentifierType::Deployment;
        }

        let fresh =
            latest.created_at > now_seconds.saturating_sub(previous_version_buffer_seconds);
        if fresh && latest.version > 0 {
            if let Some(previous) = subgraph.version(latest.version - 1) {
                if !targets_deployment(&working, &previous.deployment) {
                    let mut copy = working[i].clone();
                    copy.identifier = previous.deployment.to_string();
                    copy.identifier_type = IdentifierType::Deployment;
                    working.push(copy);
                }
            }
        }
        i += 1;
    }
    working
}

/// Why a deployment was or was not selected for allocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleMatch {
    pub rule: Option<IndexingRule>,
    pub reason: String,
}

/// The evaluator's verdict for one deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllocationDecision {
    pub deployment: DeploymentId,
    pub to_allocate: bool,
    pub rule_match: RuleMatch,
}

/// Evaluates every deployment against the rule set. Deterministic and
/// pure: exactly one decision per input deployment.
pub fn evaluate_deployments(
    deployments: &[SubgraphDeployment],
    rules: &[IndexingRule],
) -> Vec<AllocationDecision> {
    let global = rules
        .iter()
        .find(|r| r.identifier_type == IdentifierType::Global);
    deployments
        .iter()
        .map(|deployment| evaluate_deployment(deployment, rules, global))
        .collect()
}

fn evaluate_deployment(
    deployment: &SubgraphDeployment,
    rules: &[IndexingRule],
    global: Option<&IndexingRule>,
) -> AllocationDecision {
    let rule = rules
        .iter()
        .find(|r| r.applies_to_deployment(&deployment.id))
        .map(|r| r.merge_global(global))
        .or_else(|| global.cloned());

    let Some(rule) = rule else {
        return AllocationDecision {
            deployment: deployment.id,
            to_allocate: false,
            rule_match: RuleMatch {
                rule: None,
                reason: "none".to_string(),
            },
        };
    };

    let (to_allocate, reason) = match rule.decision_basis {
        DecisionBasis::Always => (true, "always".to_string()),
        DecisionBasis::Never => (false, "never".to_string()),
        // offchain deployments are synced but never allocated towards
        DecisionBasis::Offchain => (false, "offchain".to_string()),
        DecisionBasis::Rules => {
            let (verdict, threshold) = satisfies_thresholds(&rule, deployment);
            (verdict, format!("rules:{threshold}"))
        }
    };

    AllocationDecision {
        deployment: deployment.id,
        to_allocate,
        rule_match: RuleMatch {
            rule: Some(rule),
            reason,
        },
    }
}

fn satisfies_thresholds(
    rule: &IndexingRule,
    deployment: &SubgraphDeployment,
) -> (bool, &'static str) {
    if let Some(max_signal) = rule.max_signal {
        if deployment.signalled_tokens > max_signal {
            return (false, "max-signal-exceeded");
        }
    }
    if let Some(min_stake) = rule.min_stake {
        if deployment.staked_tokens >= min_stake {
            return (true, "min-stake");
        }
    }
    if let Some(min_signal) = rule.min_signal {
        if deployment.signalled_tokens >= min_signal {
            return (true, "min-signal");
        }
    }
    if let Some(min_fees) = rule.min_average_query_fees {
        if deployment.query_fees_amount >= min_fees {
            return (true, "min-average-query-fees");
        }
    }
    (false, "no-threshold-satisfied")
}
