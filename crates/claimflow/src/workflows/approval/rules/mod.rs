mod model;
mod predicate;

pub use model::{ApprovalRule, RuleConditions, RuleKind};
pub use predicate::{PercentageCondition, PredicateCheck, RuleDefect, RulePredicate};

pub(crate) use model::evaluation_order;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::domain::{Claim, RuleId, UserId};
use super::repository::{RuleStore, StoreError};

/// Rule that authorized an auto-approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub id: RuleId,
    pub name: String,
}

/// Outcome of evaluating a company's active rules against a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleEvaluation {
    pub auto_approve: bool,
    pub reason: String,
    pub matched_rule: Option<MatchedRule>,
}

impl RuleEvaluation {
    fn no_match(reason: impl Into<String>) -> Self {
        Self {
            auto_approve: false,
            reason: reason.into(),
            matched_rule: None,
        }
    }
}

/// Decides whether any active company rule finalizes a claim immediately.
///
/// Rules are re-fetched on every call; the store is not assumed to be consistent with the claim
/// being evaluated.
pub struct RuleEvaluator {
    store: Arc<dyn RuleStore>,
}

impl RuleEvaluator {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    pub fn evaluate(
        &self,
        claim: &Claim,
        acting_approver: &UserId,
    ) -> Result<RuleEvaluation, StoreError> {
        let mut rules = self.store.list_active_rules(&claim.company_id)?;
        rules.retain(|rule| rule.is_active);
        if rules.is_empty() {
            return Ok(RuleEvaluation::no_match("no active approval rules"));
        }
        rules.sort_by(evaluation_order);

        for rule in &rules {
            let predicate = match rule.predicate() {
                Ok(predicate) => predicate,
                Err(defect) => {
                    warn!(
                        claim_id = %claim.id,
                        rule_id = %rule.id,
                        rule_type = rule.kind.label(),
                        %defect,
                        "skipping malformed approval rule"
                    );
                    continue;
                }
            };

            let check = predicate.check(&claim.history, acting_approver);
            debug!(
                claim_id = %claim.id,
                rule_id = %rule.id,
                satisfied = check.satisfied,
                reason = %check.reason,
                "evaluated approval rule"
            );

            if check.satisfied {
                return Ok(RuleEvaluation {
                    auto_approve: true,
                    reason: check.reason,
                    matched_rule: Some(MatchedRule {
                        id: rule.id.clone(),
                        name: rule.name.clone(),
                    }),
                });
            }
        }

        Ok(RuleEvaluation::no_match("no matching approval rules"))
    }
}
