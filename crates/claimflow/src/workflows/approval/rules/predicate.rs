use super::super::domain::UserId;
use super::super::history::ApprovalHistory;

/// Reasons a stored rule cannot be evaluated. Defective rules are skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleDefect {
    #[error("percentage threshold is missing")]
    MissingThreshold,
    #[error("percentage threshold {0} is outside 1-100")]
    ThresholdOutOfRange(i32),
    #[error("specific approver is not defined")]
    MissingSpecificApprover,
    #[error("rule type is not recognised")]
    UnrecognizedType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentageCondition {
    pub threshold: u8,
    pub total_approvers: usize,
}

/// Validated, type-specific form of an approval rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulePredicate<'a> {
    Percentage(PercentageCondition),
    SpecificApprover(&'a UserId),
    Hybrid {
        percentage: PercentageCondition,
        approver: &'a UserId,
    },
}

/// Result of checking one predicate against a claim's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateCheck {
    pub satisfied: bool,
    pub reason: String,
}

impl RulePredicate<'_> {
    pub fn check(&self, history: &ApprovalHistory, acting_approver: &UserId) -> PredicateCheck {
        match self {
            RulePredicate::Percentage(condition) => condition.check(history),
            RulePredicate::SpecificApprover(approver) => {
                check_specific_approver(approver, history, acting_approver)
            }
            RulePredicate::Hybrid {
                percentage,
                approver,
            } => {
                let percentage = percentage.check(history);
                let specific = check_specific_approver(approver, history, acting_approver);
                if percentage.satisfied && specific.satisfied {
                    PredicateCheck {
                        satisfied: true,
                        reason: format!(
                            "hybrid rule satisfied: {} and {}",
                            percentage.reason, specific.reason
                        ),
                    }
                } else {
                    PredicateCheck {
                        satisfied: false,
                        reason: format!(
                            "hybrid rule not satisfied: {}; {}",
                            percentage.reason, specific.reason
                        ),
                    }
                }
            }
        }
    }
}

impl PercentageCondition {
    pub fn check(&self, history: &ApprovalHistory) -> PredicateCheck {
        let approved = history.approval_count();
        let total = self.total_approvers.max(1);
        // integer comparison keeps 3/5 >= 60 exact
        let satisfied = approved * 100 >= usize::from(self.threshold) * total;
        let percentage = approved as f64 / total as f64 * 100.0;

        let reason = if satisfied {
            format!(
                "percentage threshold met: {:.1}% >= {}%",
                percentage, self.threshold
            )
        } else {
            format!(
                "percentage threshold not met: {:.1}% < {}%",
                percentage, self.threshold
            )
        };

        PredicateCheck { satisfied, reason }
    }
}

fn check_specific_approver(
    approver: &UserId,
    history: &ApprovalHistory,
    acting_approver: &UserId,
) -> PredicateCheck {
    if acting_approver == approver {
        PredicateCheck {
            satisfied: true,
            reason: "approved by designated specific approver".to_string(),
        }
    } else if history.has_approved(approver) {
        PredicateCheck {
            satisfied: true,
            reason: "previously approved by designated specific approver".to_string(),
        }
    } else {
        PredicateCheck {
            satisfied: false,
            reason: "specific approver has not approved yet".to_string(),
        }
    }
}
