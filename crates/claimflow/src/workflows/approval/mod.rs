//! Approval workflow for expense claims.
//!
//! A claim is submitted into a chain of approvers. Each approval is checked against the company's
//! active rules (percentage, specific approver, or both), and if none finalize the claim it is
//! routed along an explicit approval sequence or the employee's manager chain, escalating to a
//! company admin when the chain runs out. Rejection is terminal; admins may force approval.

pub mod domain;
pub mod engine;
pub mod history;
pub mod memory;
pub mod notifications;
pub mod repository;
pub mod resolver;
pub mod router;
pub mod rules;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    Claim, ClaimId, ClaimStatus, CompanyId, CompanyPolicy, ExpenseCategory, RuleId, UserId,
    UserRef, UserRole,
};
pub use engine::{
    TransitionOutcome, TransitionPath, WorkflowEngine, WorkflowError, DEFAULT_CONFLICT_RETRIES,
};
pub use history::{ApprovalHistory, HistoryAction, HistoryEntry};
pub use memory::{InMemoryBackend, InMemoryClaimStore, InMemoryDirectory, InMemoryRuleStore, SeedData};
pub use notifications::{NotificationEvent, NotificationInbox, NotificationPayload, StoredNotification};
pub use repository::{
    ClaimStore, NotificationError, NotificationSink, RuleStore, StoreError, UserDirectory,
};
pub use resolver::ApproverResolver;
pub use router::{approval_router, ApprovalApi};
pub use rules::{ApprovalRule, RuleConditions, RuleEvaluation, RuleEvaluator, RuleKind};
pub use service::{ApprovalRuleService, RuleDraft, RulePatch};
