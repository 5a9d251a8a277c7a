use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{Claim, ClaimId, ClaimStatus, CompanyPolicy, UserId};
use super::history::HistoryAction;
use super::notifications::{NotificationEvent, NotificationPayload};
use super::repository::{ClaimStore, NotificationSink, RuleStore, StoreError, UserDirectory};
use super::resolver::ApproverResolver;
use super::rules::RuleEvaluator;

pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;
const OVERRIDE_DEFAULT_COMMENT: &str = "Admin override";

/// Which branch of the state machine a transition took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPath {
    /// A company rule finalized the claim.
    AutoApproved,
    /// The claim moved on to another approver.
    Routed,
    /// No approver remained; the claim finalized as approved.
    ChainExhausted,
    Rejected,
    Overridden,
    Submitted,
}

/// Caller-facing description of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub status: ClaimStatus,
    pub message: String,
    pub path: TransitionPath,
    pub auto_approved: bool,
    pub matched_rule_name: Option<String>,
    pub next_approver_id: Option<UserId>,
}

impl TransitionOutcome {
    fn new(status: ClaimStatus, path: TransitionPath, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            path,
            auto_approved: false,
            matched_rule_name: None,
            next_approver_id: None,
        }
    }
}

/// Errors surfaced by workflow operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("cannot {operation} claim {claim_id} while it is {status}")]
    InvalidState {
        claim_id: ClaimId,
        status: ClaimStatus,
        operation: &'static str,
    },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("claim {claim_id} was modified concurrently; gave up after {attempts} attempts")]
    ConcurrencyConflict { claim_id: ClaimId, attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Stable machine-readable code for API clients.
    pub const fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "NOT_FOUND",
            WorkflowError::InvalidState { .. } => "INVALID_STATUS",
            WorkflowError::Forbidden(_) => "FORBIDDEN",
            WorkflowError::Validation(_) => "VALIDATION_ERROR",
            WorkflowError::ConcurrencyConflict { .. } => "CONFLICT",
            WorkflowError::Store(StoreError::Conflict | StoreError::VersionConflict { .. }) => {
                "CONFLICT"
            }
            WorkflowError::Store(StoreError::NotFound) => "NOT_FOUND",
            WorkflowError::Store(StoreError::Unavailable(_)) => "UNAVAILABLE",
        }
    }
}

struct Notice {
    target: UserId,
    event: NotificationEvent,
    payload: NotificationPayload,
}

struct Decision {
    claim: Claim,
    outcome: TransitionOutcome,
    notice: Option<Notice>,
}

/// Orchestrates approve / reject / override / submit transitions for claims.
///
/// Every transition is a load-decide-save cycle against a copy of the claim, committed with a
/// version-checked save. A losing writer reloads, re-validates, and retries a bounded number of
/// times; notifications are only dispatched once the save has committed.
pub struct WorkflowEngine {
    claims: Arc<dyn ClaimStore>,
    directory: Arc<dyn UserDirectory>,
    notifications: Arc<dyn NotificationSink>,
    evaluator: RuleEvaluator,
    resolver: ApproverResolver,
    conflict_retries: u32,
}

impl WorkflowEngine {
    pub fn new(
        claims: Arc<dyn ClaimStore>,
        rules: Arc<dyn RuleStore>,
        directory: Arc<dyn UserDirectory>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            evaluator: RuleEvaluator::new(rules.clone()),
            resolver: ApproverResolver::new(rules, directory.clone()),
            claims,
            directory,
            notifications,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn claim(&self, claim_id: &ClaimId) -> Result<Claim, WorkflowError> {
        self.claims
            .load(claim_id)?
            .ok_or_else(|| not_found("claim", claim_id))
    }

    /// Pending claims waiting on `approver_id`.
    pub fn pending_for(&self, approver_id: &UserId) -> Result<Vec<Claim>, WorkflowError> {
        let mut claims = self.claims.pending_for(approver_id)?;
        claims.retain(|claim| claim.is_awaiting(approver_id));
        Ok(claims)
    }

    /// Moves a draft into the approval chain, assigning the employee's manager or, failing that,
    /// the first active company admin.
    pub fn submit(
        &self,
        claim_id: &ClaimId,
        employee_id: &UserId,
    ) -> Result<(Claim, TransitionOutcome), WorkflowError> {
        self.transition(claim_id, |mut claim| {
            if &claim.employee_id != employee_id {
                return Err(WorkflowError::Forbidden(
                    "only the claim owner may submit it".to_string(),
                ));
            }
            ensure_status(&claim, ClaimStatus::Draft, "submit")?;

            let employee = self
                .directory
                .get(employee_id)?
                .ok_or_else(|| not_found("user", employee_id))?;

            let approver = match employee.manager_id.clone() {
                Some(manager_id) => Some(manager_id),
                None => {
                    let mut admins = self.directory.list_active_admins(&claim.company_id)?;
                    admins.sort_by(|a, b| a.id.cmp(&b.id));
                    admins
                        .into_iter()
                        .find(|admin| admin.is_admin_of(&claim.company_id))
                        .map(|admin| admin.id)
                }
            };

            claim.status = ClaimStatus::Pending;
            claim.current_approver_id = approver.clone();
            claim.submitted_at = Some(Utc::now());

            let mut outcome = TransitionOutcome::new(
                ClaimStatus::Pending,
                TransitionPath::Submitted,
                "Expense submitted for approval",
            );
            outcome.next_approver_id = approver.clone();

            let notice = match approver {
                Some(target) => {
                    let mut payload = NotificationPayload::for_claim(
                        &claim,
                        format!(
                            "Expense approval required from {} for {}",
                            employee.display_name,
                            claim.display_amount()
                        ),
                    );
                    payload.employee_name = Some(employee.display_name.clone());
                    payload.category = Some(claim.category.label().to_string());
                    Some(Notice {
                        target,
                        event: NotificationEvent::ExpenseSubmitted,
                        payload,
                    })
                }
                None => {
                    warn!(
                        claim_id = %claim.id,
                        "submitted claim has no resolvable approver; manual intervention required"
                    );
                    None
                }
            };

            Ok(Decision {
                claim,
                outcome,
                notice,
            })
        })
    }

    /// Records an approval by the current approver, then auto-approves, routes, or finalizes.
    pub fn approve(
        &self,
        claim_id: &ClaimId,
        approver_id: &UserId,
        comment: &str,
    ) -> Result<(Claim, TransitionOutcome), WorkflowError> {
        self.transition(claim_id, |mut claim| {
            ensure_status(&claim, ClaimStatus::Pending, "approve")?;
            ensure_current_approver(&claim, approver_id, "approve")?;

            claim.history.record(
                approver_id.clone(),
                HistoryAction::Approved,
                comment,
                Utc::now(),
            );

            let evaluation = self.evaluator.evaluate(&claim, approver_id)?;
            if evaluation.auto_approve {
                claim.finalize(ClaimStatus::Approved);
                let rule = evaluation.matched_rule;
                info!(
                    claim_id = %claim.id,
                    approver = %approver_id,
                    rule_id = ?rule.as_ref().map(|r| &r.id),
                    reason = %evaluation.reason,
                    "claim auto-approved by rule"
                );

                let rule_name = rule.map(|r| r.name);
                let mut payload = approved_payload(&claim);
                payload.auto_approved = true;
                payload.rule_applied = rule_name.clone();

                let mut outcome = TransitionOutcome::new(
                    ClaimStatus::Approved,
                    TransitionPath::AutoApproved,
                    format!("Expense auto-approved: {}", evaluation.reason),
                );
                outcome.auto_approved = true;
                outcome.matched_rule_name = rule_name;

                return Ok(Decision {
                    notice: Some(Notice {
                        target: claim.employee_id.clone(),
                        event: NotificationEvent::ExpenseApproved,
                        payload,
                    }),
                    claim,
                    outcome,
                });
            }

            let policy = self.policy_for(&claim)?;
            match self.resolver.next_approver(&claim, &policy)? {
                Some(next) => {
                    claim.status = ClaimStatus::Pending;
                    claim.current_approver_id = Some(next.clone());
                    info!(
                        claim_id = %claim.id,
                        approver = %approver_id,
                        next_approver = %next,
                        "claim routed to next approver"
                    );

                    let employee_name = self.display_name(&claim.employee_id)?;
                    let mut payload = NotificationPayload::for_claim(
                        &claim,
                        format!(
                            "Expense approval required from {} for {}",
                            employee_name,
                            claim.display_amount()
                        ),
                    );
                    payload.employee_name = Some(employee_name);

                    let mut outcome = TransitionOutcome::new(
                        ClaimStatus::Pending,
                        TransitionPath::Routed,
                        "Expense routed to next approver",
                    );
                    outcome.next_approver_id = Some(next.clone());

                    Ok(Decision {
                        claim,
                        outcome,
                        notice: Some(Notice {
                            target: next,
                            event: NotificationEvent::ApprovalRequired,
                            payload,
                        }),
                    })
                }
                None => {
                    claim.finalize(ClaimStatus::Approved);
                    info!(
                        claim_id = %claim.id,
                        approver = %approver_id,
                        "approval chain exhausted; claim approved"
                    );

                    let mut payload = approved_payload(&claim);
                    payload.final_approval = true;

                    Ok(Decision {
                        notice: Some(Notice {
                            target: claim.employee_id.clone(),
                            event: NotificationEvent::ExpenseApproved,
                            payload,
                        }),
                        claim,
                        outcome: TransitionOutcome::new(
                            ClaimStatus::Approved,
                            TransitionPath::ChainExhausted,
                            "Expense approved - no more approvers in chain",
                        ),
                    })
                }
            }
        })
    }

    /// Rejects a pending claim. Always terminal; rules and routing are not consulted.
    pub fn reject(
        &self,
        claim_id: &ClaimId,
        approver_id: &UserId,
        comment: &str,
    ) -> Result<(Claim, TransitionOutcome), WorkflowError> {
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(WorkflowError::Validation(
                "comment is required when rejecting an expense".to_string(),
            ));
        }

        self.transition(claim_id, |mut claim| {
            ensure_status(&claim, ClaimStatus::Pending, "reject")?;
            ensure_current_approver(&claim, approver_id, "reject")?;

            claim.history.record(
                approver_id.clone(),
                HistoryAction::Rejected,
                comment,
                Utc::now(),
            );
            claim.finalize(ClaimStatus::Rejected);
            info!(claim_id = %claim.id, approver = %approver_id, "claim rejected");

            let approver_name = self.display_name(approver_id)?;
            let mut payload = NotificationPayload::for_claim(
                &claim,
                format!(
                    "Your expense for {} has been rejected: {}",
                    claim.display_amount(),
                    comment
                ),
            );
            payload.approver_name = Some(approver_name);
            payload.comment = Some(comment.to_string());

            Ok(Decision {
                notice: Some(Notice {
                    target: claim.employee_id.clone(),
                    event: NotificationEvent::ExpenseRejected,
                    payload,
                }),
                claim,
                outcome: TransitionOutcome::new(
                    ClaimStatus::Rejected,
                    TransitionPath::Rejected,
                    "Expense rejected",
                ),
            })
        })
    }

    /// Force-approves a claim from any state but `Approved`, bypassing rules and routing.
    pub fn override_approval(
        &self,
        claim_id: &ClaimId,
        admin_id: &UserId,
        comment: &str,
    ) -> Result<(Claim, TransitionOutcome), WorkflowError> {
        let comment = match comment.trim() {
            "" => OVERRIDE_DEFAULT_COMMENT,
            trimmed => trimmed,
        };

        self.transition(claim_id, |mut claim| {
            if claim.status == ClaimStatus::Approved {
                return Err(WorkflowError::InvalidState {
                    claim_id: claim.id.clone(),
                    status: claim.status,
                    operation: "override",
                });
            }

            let admin = self
                .directory
                .get(admin_id)?
                .ok_or_else(|| not_found("user", admin_id))?;
            if !admin.is_admin_of(&claim.company_id) {
                return Err(WorkflowError::Forbidden(
                    "only company admins can override approvals".to_string(),
                ));
            }

            let previous = claim.status;
            claim.history.record(
                admin_id.clone(),
                HistoryAction::Overridden,
                comment,
                Utc::now(),
            );
            claim.finalize(ClaimStatus::Approved);
            info!(
                claim_id = %claim.id,
                admin = %admin_id,
                previous_status = %previous,
                "claim approved by admin override"
            );

            let mut payload = NotificationPayload::for_claim(
                &claim,
                format!(
                    "Your expense for {} has been approved by admin override",
                    claim.display_amount()
                ),
            );
            payload.admin_override = true;
            payload.admin_name = Some(admin.display_name);

            Ok(Decision {
                notice: Some(Notice {
                    target: claim.employee_id.clone(),
                    event: NotificationEvent::ExpenseApproved,
                    payload,
                }),
                claim,
                outcome: TransitionOutcome::new(
                    ClaimStatus::Approved,
                    TransitionPath::Overridden,
                    "Expense approved by admin override",
                ),
            })
        })
    }

    fn transition<F>(
        &self,
        claim_id: &ClaimId,
        mut decide: F,
    ) -> Result<(Claim, TransitionOutcome), WorkflowError>
    where
        F: FnMut(Claim) -> Result<Decision, WorkflowError>,
    {
        let attempts = self.conflict_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let claim = self.claim(claim_id)?;
            let expected_version = claim.version;
            let Decision {
                claim,
                outcome,
                notice,
            } = decide(claim)?;

            match self.claims.save(claim, expected_version) {
                Ok(saved) => {
                    if let Some(notice) = notice {
                        self.dispatch(&saved.id, notice);
                    }
                    return Ok((saved, outcome));
                }
                Err(StoreError::VersionConflict { expected, found }) => {
                    warn!(
                        claim_id = %claim_id,
                        attempt,
                        expected,
                        found,
                        "concurrent transition detected; retrying"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(WorkflowError::ConcurrencyConflict {
            claim_id: claim_id.clone(),
            attempts,
        })
    }

    fn dispatch(&self, claim_id: &ClaimId, notice: Notice) {
        let Notice {
            target,
            event,
            payload,
        } = notice;
        if let Err(err) = self.notifications.notify(&target, event, payload) {
            warn!(
                claim_id = %claim_id,
                target = %target,
                event = event.label(),
                error = %err,
                "notification lost after commit; reconciliation required"
            );
        }
    }

    fn policy_for(&self, claim: &Claim) -> Result<CompanyPolicy, WorkflowError> {
        match self.directory.company_policy(&claim.company_id)? {
            Some(policy) => Ok(policy),
            None => {
                warn!(
                    claim_id = %claim.id,
                    company_id = %claim.company_id,
                    "company policy missing; using defaults"
                );
                Ok(CompanyPolicy::default())
            }
        }
    }

    fn display_name(&self, user_id: &UserId) -> Result<String, WorkflowError> {
        Ok(self
            .directory
            .get(user_id)?
            .map(|user| user.display_name)
            .unwrap_or_else(|| user_id.to_string()))
    }
}

fn approved_payload(claim: &Claim) -> NotificationPayload {
    NotificationPayload::for_claim(
        claim,
        format!(
            "Your expense for {} has been approved",
            claim.display_amount()
        ),
    )
}

fn ensure_status(
    claim: &Claim,
    required: ClaimStatus,
    operation: &'static str,
) -> Result<(), WorkflowError> {
    if claim.status == required {
        Ok(())
    } else {
        Err(WorkflowError::InvalidState {
            claim_id: claim.id.clone(),
            status: claim.status,
            operation,
        })
    }
}

fn ensure_current_approver(
    claim: &Claim,
    approver_id: &UserId,
    operation: &str,
) -> Result<(), WorkflowError> {
    if claim.current_approver_id.as_ref() == Some(approver_id) {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden(format!(
            "{approver_id} is not authorized to {operation} claim {}",
            claim.id
        )))
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> WorkflowError {
    WorkflowError::NotFound {
        entity,
        id: id.to_string(),
    }
}
