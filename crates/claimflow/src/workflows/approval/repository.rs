use super::domain::{Claim, ClaimId, CompanyId, CompanyPolicy, RuleId, UserId, UserRef};
use super::notifications::{NotificationEvent, NotificationPayload};
use super::rules::ApprovalRule;

/// Claim persistence. `save` is the atomic unit of a transition: it must reject the write when
/// the stored version no longer equals `expected_version`, and bump the version on success.
pub trait ClaimStore: Send + Sync {
    fn load(&self, id: &ClaimId) -> Result<Option<Claim>, StoreError>;
    fn save(&self, claim: Claim, expected_version: u64) -> Result<Claim, StoreError>;
    fn pending_for(&self, approver_id: &UserId) -> Result<Vec<Claim>, StoreError>;
}

/// Approval rule persistence, read by the engine and written by rule administration.
pub trait RuleStore: Send + Sync {
    /// Active rules for the company, highest priority first.
    fn list_active_rules(&self, company_id: &CompanyId) -> Result<Vec<ApprovalRule>, StoreError>;
    fn list_rules(&self, company_id: &CompanyId) -> Result<Vec<ApprovalRule>, StoreError>;
    fn fetch_rule(&self, id: &RuleId) -> Result<Option<ApprovalRule>, StoreError>;
    fn insert_rule(&self, rule: ApprovalRule) -> Result<ApprovalRule, StoreError>;
    fn update_rule(&self, rule: ApprovalRule) -> Result<ApprovalRule, StoreError>;
    fn delete_rule(&self, id: &RuleId) -> Result<(), StoreError>;
}

/// Read-only lookups into the organisation directory.
pub trait UserDirectory: Send + Sync {
    fn get(&self, id: &UserId) -> Result<Option<UserRef>, StoreError>;
    fn list_active_admins(&self, company_id: &CompanyId) -> Result<Vec<UserRef>, StoreError>;
    fn company_policy(&self, company_id: &CompanyId) -> Result<Option<CompanyPolicy>, StoreError>;
}

/// Outbound notification hook (live push, persisted inbox, e-mail adapters).
pub trait NotificationSink: Send + Sync {
    fn notify(
        &self,
        target: &UserId,
        event: NotificationEvent,
        payload: NotificationPayload,
    ) -> Result<(), NotificationError>;
}

/// Error enumeration for collaborator storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stale write: expected version {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Notification dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
