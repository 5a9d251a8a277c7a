use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use super::domain::{CompanyId, RuleId, UserId, UserRef};
use super::engine::WorkflowError;
use super::repository::{RuleStore, StoreError, UserDirectory};
use super::rules::{evaluation_order, ApprovalRule, RuleConditions, RuleKind};

/// Payload for creating a rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Partial update; absent fields keep their stored values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RulePatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<RuleKind>,
    pub conditions: Option<RuleConditions>,
    pub is_active: Option<bool>,
    pub priority: Option<i32>,
}

static RULE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
const MAX_RULE_ID_ATTEMPTS: usize = 1024;

fn next_rule_id() -> RuleId {
    let id = RULE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RuleId(format!("rule-{id:06}"))
}

/// Administrative CRUD over a company's approval rules.
pub struct ApprovalRuleService {
    rules: Arc<dyn RuleStore>,
    directory: Arc<dyn UserDirectory>,
}

impl ApprovalRuleService {
    pub fn new(rules: Arc<dyn RuleStore>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { rules, directory }
    }

    /// Every rule of the acting admin's company in evaluation order.
    pub fn list(&self, admin_id: &UserId) -> Result<Vec<ApprovalRule>, WorkflowError> {
        let admin = self.require_admin(admin_id, "view")?;
        let mut rules = self.rules.list_rules(&admin.company_id)?;
        rules.sort_by(evaluation_order);
        Ok(rules)
    }

    pub fn create(
        &self,
        admin_id: &UserId,
        draft: RuleDraft,
    ) -> Result<ApprovalRule, WorkflowError> {
        let admin = self.require_admin(admin_id, "create")?;
        let rule = ApprovalRule {
            id: next_rule_id(),
            company_id: admin.company_id,
            name: draft.name.trim().to_string(),
            kind: draft.kind,
            conditions: draft.conditions,
            is_active: draft.is_active.unwrap_or(true),
            priority: draft.priority.unwrap_or(0),
        };
        validate_rule(&rule)?;

        let stored = self.insert_with_fresh_id(rule)?;
        info!(
            rule_id = %stored.id,
            company_id = %stored.company_id,
            admin = %admin_id,
            "approval rule created"
        );
        Ok(stored)
    }

    pub fn update(
        &self,
        admin_id: &UserId,
        rule_id: &RuleId,
        patch: RulePatch,
    ) -> Result<ApprovalRule, WorkflowError> {
        let admin = self.require_admin(admin_id, "update")?;
        let mut rule = self.owned_rule(&admin.company_id, rule_id)?;

        if let Some(name) = patch.name {
            rule.name = name.trim().to_string();
        }
        if let Some(kind) = patch.kind {
            rule.kind = kind;
        }
        if let Some(conditions) = patch.conditions {
            rule.conditions = conditions;
        }
        if let Some(is_active) = patch.is_active {
            rule.is_active = is_active;
        }
        if let Some(priority) = patch.priority {
            rule.priority = priority;
        }
        validate_rule(&rule)?;

        let stored = self.rules.update_rule(rule).map_err(|err| match err {
            StoreError::NotFound => WorkflowError::NotFound {
                entity: "rule",
                id: rule_id.to_string(),
            },
            other => other.into(),
        })?;
        info!(rule_id = %stored.id, admin = %admin_id, "approval rule updated");
        Ok(stored)
    }

    pub fn delete(&self, admin_id: &UserId, rule_id: &RuleId) -> Result<(), WorkflowError> {
        let admin = self.require_admin(admin_id, "delete")?;
        self.owned_rule(&admin.company_id, rule_id)?;
        self.rules.delete_rule(rule_id).map_err(|err| match err {
            StoreError::NotFound => WorkflowError::NotFound {
                entity: "rule",
                id: rule_id.to_string(),
            },
            other => other.into(),
        })?;
        info!(rule_id = %rule_id, admin = %admin_id, "approval rule deleted");
        Ok(())
    }

    /// Ids already taken in the store (seeded or written by another process) are skipped.
    fn insert_with_fresh_id(&self, mut rule: ApprovalRule) -> Result<ApprovalRule, WorkflowError> {
        for _ in 0..MAX_RULE_ID_ATTEMPTS {
            match self.rules.insert_rule(rule.clone()) {
                Err(StoreError::Conflict) => {
                    debug!(rule_id = %rule.id, "rule id taken; drawing the next one");
                    rule.id = next_rule_id();
                }
                other => return other.map_err(WorkflowError::from),
            }
        }
        Err(StoreError::Conflict.into())
    }

    fn require_admin(&self, admin_id: &UserId, verb: &str) -> Result<UserRef, WorkflowError> {
        let user = self
            .directory
            .get(admin_id)?
            .ok_or_else(|| WorkflowError::NotFound {
                entity: "user",
                id: admin_id.to_string(),
            })?;
        if user.is_admin_of(&user.company_id) {
            Ok(user)
        } else {
            Err(WorkflowError::Forbidden(format!(
                "only admins can {verb} approval rules"
            )))
        }
    }

    fn owned_rule(
        &self,
        company_id: &CompanyId,
        rule_id: &RuleId,
    ) -> Result<ApprovalRule, WorkflowError> {
        let rule = self
            .rules
            .fetch_rule(rule_id)?
            .ok_or_else(|| WorkflowError::NotFound {
                entity: "rule",
                id: rule_id.to_string(),
            })?;
        if &rule.company_id != company_id {
            return Err(WorkflowError::Forbidden(
                "rule belongs to another company".to_string(),
            ));
        }
        Ok(rule)
    }
}

/// Rejects rules that the evaluator would have to skip.
pub fn validate_rule(rule: &ApprovalRule) -> Result<(), WorkflowError> {
    if rule.name.is_empty() {
        return Err(WorkflowError::Validation("rule name is required".to_string()));
    }

    rule.predicate()
        .map(|_| ())
        .map_err(|defect| WorkflowError::Validation(defect.to_string()))
}
