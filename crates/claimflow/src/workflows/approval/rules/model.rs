use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::super::domain::{CompanyId, RuleId, UserId};
use super::predicate::{PercentageCondition, RuleDefect, RulePredicate};

/// Closed set of rule types. Stored values the engine does not recognise deserialize to
/// `Unrecognized` and never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Percentage,
    SpecificApprover,
    Hybrid,
    #[serde(other)]
    Unrecognized,
}

impl RuleKind {
    pub const fn label(self) -> &'static str {
        match self {
            RuleKind::Percentage => "percentage",
            RuleKind::SpecificApprover => "specific_approver",
            RuleKind::Hybrid => "hybrid",
            RuleKind::Unrecognized => "unrecognized",
        }
    }
}

/// Raw conditions as persisted; validated lazily by [`ApprovalRule::predicate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default)]
    pub percentage_threshold: Option<i32>,
    #[serde(default)]
    pub specific_approver_id: Option<UserId>,
    #[serde(default)]
    pub approval_sequence: Vec<UserId>,
}

/// Company-configured rule that can finalize a claim without further routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub priority: i32,
}

fn default_active() -> bool {
    true
}

impl ApprovalRule {
    /// Builds the typed predicate for this rule, reporting malformed conditions.
    pub fn predicate(&self) -> Result<RulePredicate<'_>, RuleDefect> {
        match self.kind {
            RuleKind::Percentage => Ok(RulePredicate::Percentage(self.percentage_condition()?)),
            RuleKind::SpecificApprover => {
                Ok(RulePredicate::SpecificApprover(self.specific_approver()?))
            }
            RuleKind::Hybrid => Ok(RulePredicate::Hybrid {
                percentage: self.percentage_condition()?,
                approver: self.specific_approver()?,
            }),
            RuleKind::Unrecognized => Err(RuleDefect::UnrecognizedType),
        }
    }

    pub fn has_sequence(&self) -> bool {
        !self.conditions.approval_sequence.is_empty()
    }

    fn percentage_condition(&self) -> Result<PercentageCondition, RuleDefect> {
        let threshold = self
            .conditions
            .percentage_threshold
            .ok_or(RuleDefect::MissingThreshold)?;
        let threshold = u8::try_from(threshold)
            .ok()
            .filter(|value| (1..=100).contains(value))
            .ok_or(RuleDefect::ThresholdOutOfRange(threshold))?;

        Ok(PercentageCondition {
            threshold,
            total_approvers: self.conditions.approval_sequence.len().max(1),
        })
    }

    fn specific_approver(&self) -> Result<&UserId, RuleDefect> {
        self.conditions
            .specific_approver_id
            .as_ref()
            .filter(|id| !id.0.trim().is_empty())
            .ok_or(RuleDefect::MissingSpecificApprover)
    }
}

/// Evaluation order: priority descending, ties broken by rule id ascending.
pub(crate) fn evaluation_order(a: &ApprovalRule, b: &ApprovalRule) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id))
}
