use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::response::Response;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::workflows::approval::domain::{
    Claim, ClaimId, ClaimStatus, CompanyId, ExpenseCategory, RuleId, UserId, UserRef, UserRole,
};
use crate::workflows::approval::history::HistoryAction;
use crate::workflows::approval::memory::{InMemoryBackend, InMemoryClaimStore};
use crate::workflows::approval::notifications::{NotificationEvent, NotificationPayload};
use crate::workflows::approval::repository::{
    ClaimStore, NotificationError, NotificationSink, RuleStore, StoreError,
};
use crate::workflows::approval::rules::{ApprovalRule, RuleConditions, RuleKind};
use crate::workflows::approval::{
    approval_router, ApprovalRuleService, CompanyPolicy, NotificationInbox, WorkflowEngine,
};

pub(super) const COMPANY: &str = "acme";

pub(super) fn user(id: &str) -> UserId {
    UserId(id.to_string())
}

pub(super) fn claim_id(id: &str) -> ClaimId {
    ClaimId(id.to_string())
}

pub(super) fn company() -> CompanyId {
    CompanyId(COMPANY.to_string())
}

pub(super) fn person(id: &str, name: &str, role: UserRole, manager: Option<&str>) -> UserRef {
    UserRef {
        id: user(id),
        display_name: name.to_string(),
        role,
        manager_id: manager.map(user),
        company_id: company(),
        is_active: true,
    }
}

/// Reporting lines used across the suite:
/// `emp -> mgr -> dir`, `ivy -> dir`, `solo` (no manager), a `loop-a <-> loop-b` cycle,
/// and admins `adm-a`, `adm-b` plus a foreign-company admin.
pub(super) fn seed_directory(backend: &InMemoryBackend) {
    let directory = &backend.directory;
    directory.upsert_user(person("emp", "Erin Employee", UserRole::Employee, Some("mgr")));
    directory.upsert_user(person("mgr", "Morgan Manager", UserRole::Manager, Some("dir")));
    directory.upsert_user(person("dir", "Dana Director", UserRole::Manager, None));
    directory.upsert_user(person("ivy", "Ivy Analyst", UserRole::Employee, Some("dir")));
    directory.upsert_user(person("solo", "Sol Contractor", UserRole::Employee, None));
    directory.upsert_user(person("cfo", "Casey Finance", UserRole::Manager, None));
    directory.upsert_user(person("loop-a", "Loop A", UserRole::Manager, Some("loop-b")));
    directory.upsert_user(person("loop-b", "Loop B", UserRole::Manager, Some("loop-a")));
    directory.upsert_user(person("adm-b", "Blair Admin", UserRole::Admin, None));
    directory.upsert_user(person("adm-a", "Alex Admin", UserRole::Admin, None));

    let mut retired = person("adm-0", "Retired Admin", UserRole::Admin, None);
    retired.is_active = false;
    directory.upsert_user(retired);

    let mut foreign = person("adm-x", "Foreign Admin", UserRole::Admin, None);
    foreign.company_id = CompanyId("globex".to_string());
    directory.upsert_user(foreign);

    directory.set_policy(company(), CompanyPolicy::default());
}

pub(super) fn draft(id: &str, employee: &str) -> Claim {
    let mut claim = Claim::draft(
        claim_id(id),
        company(),
        user(employee),
        Decimal::new(12050, 2),
        "USD",
    );
    claim.category = ExpenseCategory::Travel;
    claim.description = "Client visit".to_string();
    claim
}

pub(super) fn pending(id: &str, employee: &str, approver: &str) -> Claim {
    let mut claim = draft(id, employee);
    claim.status = ClaimStatus::Pending;
    claim.current_approver_id = Some(user(approver));
    claim
}

/// Pending claim whose history already holds approvals from `approvers`.
pub(super) fn pending_after(id: &str, employee: &str, approver: &str, approvers: &[&str]) -> Claim {
    let mut claim = pending(id, employee, approver);
    for approved_by in approvers {
        claim
            .history
            .record(user(approved_by), HistoryAction::Approved, "ok", Utc::now());
    }
    claim
}

fn rule(id: &str, kind: RuleKind, conditions: RuleConditions, priority: i32) -> ApprovalRule {
    ApprovalRule {
        id: RuleId(id.to_string()),
        company_id: company(),
        name: format!("{id} rule"),
        kind,
        conditions,
        is_active: true,
        priority,
    }
}

pub(super) fn percentage_rule(
    id: &str,
    threshold: i32,
    sequence: &[&str],
    priority: i32,
) -> ApprovalRule {
    rule(
        id,
        RuleKind::Percentage,
        RuleConditions {
            percentage_threshold: Some(threshold),
            specific_approver_id: None,
            approval_sequence: sequence.iter().copied().map(user).collect(),
        },
        priority,
    )
}

pub(super) fn specific_rule(id: &str, approver: &str, priority: i32) -> ApprovalRule {
    rule(
        id,
        RuleKind::SpecificApprover,
        RuleConditions {
            percentage_threshold: None,
            specific_approver_id: Some(user(approver)),
            approval_sequence: Vec::new(),
        },
        priority,
    )
}

pub(super) fn hybrid_rule(
    id: &str,
    threshold: i32,
    approver: &str,
    sequence: &[&str],
    priority: i32,
) -> ApprovalRule {
    rule(
        id,
        RuleKind::Hybrid,
        RuleConditions {
            percentage_threshold: Some(threshold),
            specific_approver_id: Some(user(approver)),
            approval_sequence: sequence.iter().copied().map(user).collect(),
        },
        priority,
    )
}

pub(super) struct Harness {
    pub(super) engine: WorkflowEngine,
    pub(super) backend: InMemoryBackend,
    pub(super) inbox: NotificationInbox,
}

impl Harness {
    pub(super) fn seed(&self, claim: Claim) {
        self.backend.claims.insert(claim).expect("claim seeds");
    }

    pub(super) fn add_rule(&self, rule: ApprovalRule) {
        self.backend.rules.insert_rule(rule).expect("rule seeds");
    }

    pub(super) fn stored(&self, id: &str) -> Claim {
        self.backend
            .claims
            .load(&claim_id(id))
            .expect("store readable")
            .expect("claim exists")
    }

    pub(super) fn rule_service(&self) -> ApprovalRuleService {
        ApprovalRuleService::new(self.backend.rules.clone(), self.backend.directory.clone())
    }
}

pub(super) fn harness() -> Harness {
    let backend = InMemoryBackend::default();
    seed_directory(&backend);
    let inbox = NotificationInbox::default();
    let engine = WorkflowEngine::new(
        backend.claims.clone(),
        backend.rules.clone(),
        backend.directory.clone(),
        Arc::new(inbox.clone()),
    );
    Harness {
        engine,
        backend,
        inbox,
    }
}

/// Engine wired to arbitrary collaborators over the shared fixture directory.
pub(super) fn engine_with(
    claims: Arc<dyn ClaimStore>,
    rules: Arc<dyn RuleStore>,
    sink: Arc<dyn NotificationSink>,
) -> (WorkflowEngine, InMemoryBackend) {
    let backend = InMemoryBackend::default();
    seed_directory(&backend);
    let engine = WorkflowEngine::new(claims, rules, backend.directory.clone(), sink);
    (engine, backend)
}

/// Claim store that reports a stale version for the first `failures` saves.
#[derive(Default)]
pub(super) struct ContendedClaimStore {
    pub(super) inner: InMemoryClaimStore,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl ContendedClaimStore {
    pub(super) fn failing(failures: u32) -> Self {
        Self {
            inner: InMemoryClaimStore::default(),
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub(super) fn save_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ClaimStore for ContendedClaimStore {
    fn load(&self, id: &ClaimId) -> Result<Option<Claim>, StoreError> {
        self.inner.load(id)
    }

    fn save(&self, claim: Claim, expected_version: u64) -> Result<Claim, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found: expected_version + 1,
            });
        }
        self.inner.save(claim, expected_version)
    }

    fn pending_for(&self, approver_id: &UserId) -> Result<Vec<Claim>, StoreError> {
        self.inner.pending_for(approver_id)
    }
}

pub(super) struct UnavailableRuleStore;

impl RuleStore for UnavailableRuleStore {
    fn list_active_rules(&self, _company_id: &CompanyId) -> Result<Vec<ApprovalRule>, StoreError> {
        Err(StoreError::Unavailable("rules database offline".to_string()))
    }

    fn list_rules(&self, _company_id: &CompanyId) -> Result<Vec<ApprovalRule>, StoreError> {
        Err(StoreError::Unavailable("rules database offline".to_string()))
    }

    fn fetch_rule(&self, _id: &RuleId) -> Result<Option<ApprovalRule>, StoreError> {
        Err(StoreError::Unavailable("rules database offline".to_string()))
    }

    fn insert_rule(&self, _rule: ApprovalRule) -> Result<ApprovalRule, StoreError> {
        Err(StoreError::Unavailable("rules database offline".to_string()))
    }

    fn update_rule(&self, _rule: ApprovalRule) -> Result<ApprovalRule, StoreError> {
        Err(StoreError::Unavailable("rules database offline".to_string()))
    }

    fn delete_rule(&self, _id: &RuleId) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("rules database offline".to_string()))
    }
}

pub(super) struct FailingSink;

impl NotificationSink for FailingSink {
    fn notify(
        &self,
        _target: &UserId,
        _event: NotificationEvent,
        _payload: NotificationPayload,
    ) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("socket closed".to_string()))
    }
}

pub(super) fn router_for(harness: &Harness) -> axum::Router {
    let engine = WorkflowEngine::new(
        harness.backend.claims.clone(),
        harness.backend.rules.clone(),
        harness.backend.directory.clone(),
        Arc::new(harness.inbox.clone()),
    );
    approval_router(
        Arc::new(engine),
        Arc::new(harness.rule_service()),
        harness.inbox.clone(),
    )
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
