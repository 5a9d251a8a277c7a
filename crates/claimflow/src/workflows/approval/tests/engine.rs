use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;

use super::common::*;
use crate::workflows::approval::domain::{ClaimStatus, CompanyId, UserRole};
use crate::workflows::approval::history::{HistoryAction, HistoryEntry};
use crate::workflows::approval::memory::InMemoryRuleStore;
use crate::workflows::approval::notifications::{NotificationEvent, NotificationInbox};
use crate::workflows::approval::repository::{ClaimStore, StoreError};
use crate::workflows::approval::{TransitionPath, WorkflowError};

#[test]
fn full_percentage_rule_auto_approves_on_manager_approval() {
    let harness = harness();
    harness.add_rule(percentage_rule("rule-all", 100, &[], 0));
    harness.seed(draft("exp-1", "emp"));

    let (submitted, outcome) = harness
        .engine
        .submit(&claim_id("exp-1"), &user("emp"))
        .expect("submit succeeds");
    assert_eq!(submitted.status, ClaimStatus::Pending);
    assert_eq!(submitted.current_approver_id, Some(user("mgr")));
    assert!(submitted.submitted_at.is_some());
    assert_eq!(outcome.path, TransitionPath::Submitted);

    let (claim, outcome) = harness
        .engine
        .approve(&claim_id("exp-1"), &user("mgr"), "ok")
        .expect("approve succeeds");

    assert_eq!(claim.status, ClaimStatus::Approved);
    assert_eq!(claim.current_approver_id, None);
    assert_eq!(claim.history.len(), 1);
    let entry = claim.history.last().expect("entry recorded");
    assert_eq!(entry.approver_id, user("mgr"));
    assert_eq!(entry.action, HistoryAction::Approved);
    assert_eq!(entry.comment, "ok");

    assert_eq!(outcome.path, TransitionPath::AutoApproved);
    assert!(outcome.auto_approved);
    assert_eq!(outcome.matched_rule_name.as_deref(), Some("rule-all rule"));
    assert_eq!(
        outcome.message,
        "Expense auto-approved: percentage threshold met: 100.0% >= 100%"
    );

    let employee_inbox = harness.inbox.list(&user("emp"), false);
    assert_eq!(employee_inbox.len(), 1);
    assert_eq!(employee_inbox[0].event, NotificationEvent::ExpenseApproved);
    assert!(employee_inbox[0].payload.auto_approved);
    assert_eq!(
        employee_inbox[0].payload.rule_applied.as_deref(),
        Some("rule-all rule")
    );

    let manager_inbox = harness.inbox.list(&user("mgr"), false);
    assert_eq!(manager_inbox[0].event, NotificationEvent::ExpenseSubmitted);
    assert_eq!(
        manager_inbox[0].payload.employee_name.as_deref(),
        Some("Erin Employee")
    );
}

#[test]
fn percentage_rule_finalizes_on_third_of_five_approvals() {
    let harness = harness();
    harness.add_rule(percentage_rule("rule-60", 60, &["a", "b", "c", "d", "e"], 0));
    harness.seed(pending("exp-1", "emp", "a"));

    for (approver, next) in [("a", "b"), ("b", "c")] {
        let (claim, outcome) = harness
            .engine
            .approve(&claim_id("exp-1"), &user(approver), "")
            .expect("approve succeeds");
        assert_eq!(claim.status, ClaimStatus::Pending);
        assert_eq!(outcome.path, TransitionPath::Routed);
        assert_eq!(claim.current_approver_id, Some(user(next)));
    }

    let (claim, outcome) = harness
        .engine
        .approve(&claim_id("exp-1"), &user("c"), "")
        .expect("approve succeeds");
    assert_eq!(claim.status, ClaimStatus::Approved);
    assert_eq!(outcome.path, TransitionPath::AutoApproved);
    assert_eq!(claim.history.approval_count(), 3);
}

#[test]
fn prior_specific_approval_auto_approves_later_actions() {
    let harness = harness();
    harness.seed(pending("exp-1", "emp", "cfo"));

    let (claim, outcome) = harness
        .engine
        .approve(&claim_id("exp-1"), &user("cfo"), "fine by me")
        .expect("approve succeeds");
    assert_eq!(outcome.path, TransitionPath::Routed);
    assert_eq!(claim.current_approver_id, Some(user("mgr")));

    harness.add_rule(specific_rule("rule-cfo", "cfo", 0));

    let (claim, outcome) = harness
        .engine
        .approve(&claim_id("exp-1"), &user("mgr"), "")
        .expect("approve succeeds");
    assert_eq!(claim.status, ClaimStatus::Approved);
    assert_eq!(outcome.path, TransitionPath::AutoApproved);
    assert_eq!(
        outcome.message,
        "Expense auto-approved: previously approved by designated specific approver"
    );
}

#[test]
fn hybrid_rule_waits_for_both_conditions() {
    let harness = harness();
    harness.add_rule(hybrid_rule("rule-hybrid", 50, "cfo", &["a", "cfo", "b", "c"], 0));
    harness.seed(pending("exp-1", "emp", "a"));

    let (claim, outcome) = harness
        .engine
        .approve(&claim_id("exp-1"), &user("a"), "")
        .expect("approve succeeds");
    assert_eq!(outcome.path, TransitionPath::Routed);
    assert_eq!(claim.current_approver_id, Some(user("cfo")));

    let (claim, outcome) = harness
        .engine
        .approve(&claim_id("exp-1"), &user("cfo"), "")
        .expect("approve succeeds");
    assert_eq!(claim.status, ClaimStatus::Approved);
    assert_eq!(outcome.path, TransitionPath::AutoApproved);
}

#[test]
fn exhausted_sequence_finalizes_without_a_rule_match() {
    let harness = harness();
    let mut rule = specific_rule("rule-seq", "cfo", 0);
    rule.conditions.approval_sequence = vec![user("a"), user("b")];
    harness.add_rule(rule);
    harness.seed(pending("exp-1", "emp", "a"));

    let (claim, _) = harness
        .engine
        .approve(&claim_id("exp-1"), &user("a"), "")
        .expect("approve succeeds");
    assert_eq!(claim.current_approver_id, Some(user("b")));

    let (claim, outcome) = harness
        .engine
        .approve(&claim_id("exp-1"), &user("b"), "")
        .expect("approve succeeds");
    assert_eq!(claim.status, ClaimStatus::Approved);
    assert_eq!(claim.current_approver_id, None);
    assert_eq!(outcome.path, TransitionPath::ChainExhausted);
    assert!(!outcome.auto_approved);
    assert_eq!(
        outcome.message,
        "Expense approved - no more approvers in chain"
    );

    let notice = &harness.inbox.list(&user("emp"), false)[0];
    assert!(notice.payload.final_approval);
    assert!(!notice.payload.auto_approved);
}

#[test]
fn manager_chain_history_only_grows() {
    let harness = harness();
    harness.seed(pending("exp-1", "emp", "mgr"));

    let mut previous: Vec<HistoryEntry> = Vec::new();
    for approver in ["mgr", "dir"] {
        let (claim, _) = harness
            .engine
            .approve(&claim_id("exp-1"), &user(approver), "")
            .expect("approve succeeds");
        let entries = claim.history.entries().to_vec();
        assert_eq!(entries.len(), previous.len() + 1);
        assert_eq!(&entries[..previous.len()], previous.as_slice());
        previous = entries;
    }

    let claim = harness.stored("exp-1");
    assert_eq!(claim.status, ClaimStatus::Approved);
    assert_eq!(claim.current_approver_id, None);
    assert_eq!(claim.version, 2);
}

#[test]
fn routed_approval_notifies_next_approver() {
    let harness = harness();
    harness.seed(pending("exp-1", "emp", "mgr"));

    let (_, outcome) = harness
        .engine
        .approve(&claim_id("exp-1"), &user("mgr"), "")
        .expect("approve succeeds");
    assert_eq!(outcome.next_approver_id, Some(user("dir")));

    let inbox = harness.inbox.list(&user("dir"), false);
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].event, NotificationEvent::ApprovalRequired);
    assert_eq!(
        inbox[0].payload.message,
        "Expense approval required from Erin Employee for USD 120.50"
    );
}

#[test]
fn every_notification_carries_amount_and_currency() {
    let harness = harness();
    harness.seed(draft("exp-1", "emp"));
    harness.seed(pending("exp-2", "emp", "mgr"));
    harness.seed(draft("exp-3", "emp"));
    harness.seed(pending("exp-4", "emp", "mgr"));
    let engine = &harness.engine;

    engine.submit(&claim_id("exp-1"), &user("emp")).expect("submit");
    engine.approve(&claim_id("exp-1"), &user("mgr"), "").expect("routed");
    engine.approve(&claim_id("exp-1"), &user("dir"), "").expect("chain ends");
    engine.reject(&claim_id("exp-2"), &user("mgr"), "duplicate").expect("reject");
    engine
        .override_approval(&claim_id("exp-3"), &user("adm-a"), "")
        .expect("override");
    harness.add_rule(percentage_rule("rule-all", 100, &[], 0));
    let (_, outcome) = engine
        .approve(&claim_id("exp-4"), &user("mgr"), "")
        .expect("auto-approve");
    assert!(outcome.auto_approved);

    let notifications = harness.inbox.all();
    assert_eq!(notifications.len(), 6);
    for notification in &notifications {
        assert_eq!(notification.payload.amount, Some(Decimal::new(12050, 2)));
        assert_eq!(notification.payload.currency.as_deref(), Some("USD"));
        let wire = serde_json::to_value(&notification.payload).expect("serializes");
        assert_eq!(wire["currency"], "USD");
        assert!(wire.get("amount").is_some());
    }

    let events: BTreeSet<_> = notifications
        .iter()
        .map(|notification| notification.event.label())
        .collect();
    assert_eq!(
        events,
        BTreeSet::from([
            "approval_required",
            "expense_approved",
            "expense_rejected",
            "expense_submitted",
        ])
    );
}

#[test]
fn rejection_is_terminal_and_ignores_rules() {
    let harness = harness();
    harness.add_rule(specific_rule("rule-mgr", "mgr", 0));
    harness.seed(pending("exp-1", "emp", "mgr"));

    let (claim, outcome) = harness
        .engine
        .reject(&claim_id("exp-1"), &user("mgr"), "  missing receipt ")
        .expect("reject succeeds");
    assert_eq!(claim.status, ClaimStatus::Rejected);
    assert_eq!(claim.current_approver_id, None);
    assert_eq!(outcome.path, TransitionPath::Rejected);
    assert_eq!(
        claim.history.last().map(|entry| entry.comment.as_str()),
        Some("missing receipt")
    );

    let notice = &harness.inbox.list(&user("emp"), false)[0];
    assert_eq!(notice.event, NotificationEvent::ExpenseRejected);
    assert_eq!(notice.payload.approver_name.as_deref(), Some("Morgan Manager"));
    assert_eq!(
        notice.payload.message,
        "Your expense for USD 120.50 has been rejected: missing receipt"
    );
}

#[test]
fn rejection_without_comment_mutates_nothing() {
    let harness = harness();
    harness.seed(pending("exp-1", "emp", "mgr"));
    let before = harness.stored("exp-1");

    let err = harness
        .engine
        .reject(&claim_id("exp-1"), &user("mgr"), "   ")
        .expect_err("comment required");
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(harness.stored("exp-1"), before);
    assert!(harness.inbox.all().is_empty());
}

#[test]
fn override_succeeds_from_every_state_but_approved() {
    let harness = harness();
    harness.seed(draft("exp-draft", "emp"));
    harness.seed(pending("exp-pending", "emp", "mgr"));
    let mut rejected = draft("exp-rejected", "emp");
    rejected.status = ClaimStatus::Rejected;
    harness.seed(rejected);

    for id in ["exp-draft", "exp-pending", "exp-rejected"] {
        let (claim, outcome) = harness
            .engine
            .override_approval(&claim_id(id), &user("adm-b"), "")
            .expect("override succeeds");
        assert_eq!(claim.status, ClaimStatus::Approved);
        assert_eq!(claim.current_approver_id, None);
        assert_eq!(outcome.path, TransitionPath::Overridden);
        let entry = claim.history.last().expect("entry recorded");
        assert_eq!(entry.action, HistoryAction::Overridden);
        assert_eq!(entry.comment, "Admin override");
    }

    match harness
        .engine
        .override_approval(&claim_id("exp-pending"), &user("adm-b"), "again")
    {
        Err(WorkflowError::InvalidState { status, .. }) => {
            assert_eq!(status, ClaimStatus::Approved)
        }
        other => panic!("expected invalid state, got {other:?}"),
    }

    let notices = harness.inbox.list(&user("emp"), false);
    assert_eq!(notices.len(), 3);
    assert!(notices.iter().all(|notice| notice.payload.admin_override));
    assert_eq!(notices[0].payload.admin_name.as_deref(), Some("Blair Admin"));
}

#[test]
fn override_requires_an_active_admin_of_the_company() {
    let harness = harness();
    harness.seed(pending("exp-1", "emp", "mgr"));

    for actor in ["mgr", "adm-x", "adm-0"] {
        let err = harness
            .engine
            .override_approval(&claim_id("exp-1"), &user(actor), "")
            .expect_err("override refused");
        assert_eq!(err.code(), "FORBIDDEN", "actor {actor}");
    }

    let err = harness
        .engine
        .override_approval(&claim_id("exp-1"), &user("ghost"), "")
        .expect_err("unknown admin");
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(harness.stored("exp-1").history.len(), 0);
}

#[test]
fn approve_checks_status_then_current_approver() {
    let harness = harness();
    harness.seed(draft("exp-draft", "emp"));
    harness.seed(pending("exp-1", "emp", "mgr"));

    let err = harness
        .engine
        .approve(&claim_id("exp-draft"), &user("mgr"), "")
        .expect_err("draft cannot be approved");
    assert!(matches!(err, WorkflowError::InvalidState { .. }));

    let err = harness
        .engine
        .approve(&claim_id("exp-1"), &user("dir"), "")
        .expect_err("not the current approver");
    assert!(matches!(err, WorkflowError::Forbidden(_)));

    let err = harness
        .engine
        .approve(&claim_id("exp-missing"), &user("mgr"), "")
        .expect_err("unknown claim");
    assert_eq!(
        err,
        WorkflowError::NotFound {
            entity: "claim",
            id: "exp-missing".to_string(),
        }
    );
}

#[test]
fn submit_routes_to_manager_or_first_active_admin() {
    let harness = harness();
    harness.seed(draft("exp-1", "solo"));

    let (claim, outcome) = harness
        .engine
        .submit(&claim_id("exp-1"), &user("solo"))
        .expect("submit succeeds");
    assert_eq!(claim.current_approver_id, Some(user("adm-a")));
    assert_eq!(outcome.next_approver_id, Some(user("adm-a")));

    let err = harness
        .engine
        .submit(&claim_id("exp-1"), &user("solo"))
        .expect_err("already pending");
    assert_eq!(err.code(), "INVALID_STATUS");

    harness.seed(draft("exp-2", "emp"));
    let err = harness
        .engine
        .submit(&claim_id("exp-2"), &user("mgr"))
        .expect_err("only the owner submits");
    assert_eq!(err.code(), "FORBIDDEN");
}

#[test]
fn submit_without_any_approver_leaves_claim_unassigned() {
    let harness = harness();
    let mut nomad = person("nomad", "Nico Nomad", UserRole::Employee, None);
    nomad.company_id = CompanyId("initech".to_string());
    harness.backend.directory.upsert_user(nomad);

    let mut claim = draft("exp-1", "nomad");
    claim.company_id = CompanyId("initech".to_string());
    harness.seed(claim);

    let (claim, _) = harness
        .engine
        .submit(&claim_id("exp-1"), &user("nomad"))
        .expect("submit succeeds");
    assert_eq!(claim.status, ClaimStatus::Pending);
    assert_eq!(claim.current_approver_id, None);
    assert!(harness.inbox.all().is_empty());
}

#[test]
fn pending_for_lists_only_claims_awaiting_the_user() {
    let harness = harness();
    harness.seed(pending("exp-1", "emp", "mgr"));
    harness.seed(pending("exp-2", "ivy", "dir"));
    harness.seed(draft("exp-3", "emp"));

    let claims = harness.engine.pending_for(&user("mgr")).expect("lists");
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].id, claim_id("exp-1"));
}

#[test]
fn version_conflicts_are_retried_from_a_fresh_load() {
    let store = Arc::new(ContendedClaimStore::failing(2));
    store
        .inner
        .insert(pending("exp-1", "emp", "mgr"))
        .expect("claim seeds");
    let inbox = NotificationInbox::default();
    let (engine, _) = engine_with(
        store.clone(),
        Arc::new(InMemoryRuleStore::default()),
        Arc::new(inbox.clone()),
    );

    let (claim, _) = engine
        .approve(&claim_id("exp-1"), &user("mgr"), "")
        .expect("third attempt commits");
    assert_eq!(store.save_attempts(), 3);
    assert_eq!(claim.history.len(), 1);
    assert_eq!(inbox.all().len(), 1);
}

#[test]
fn persistent_conflicts_surface_after_bounded_attempts() {
    let store = Arc::new(ContendedClaimStore::failing(u32::MAX));
    store
        .inner
        .insert(pending("exp-1", "emp", "mgr"))
        .expect("claim seeds");
    let inbox = NotificationInbox::default();
    let (engine, _) = engine_with(
        store.clone(),
        Arc::new(InMemoryRuleStore::default()),
        Arc::new(inbox.clone()),
    );
    let engine = engine.with_conflict_retries(2);

    let err = engine
        .approve(&claim_id("exp-1"), &user("mgr"), "")
        .expect_err("gives up");
    assert_eq!(
        err,
        WorkflowError::ConcurrencyConflict {
            claim_id: claim_id("exp-1"),
            attempts: 3,
        }
    );
    assert_eq!(store.save_attempts(), 3);
    assert!(inbox.all().is_empty());

    let stored = store
        .inner
        .load(&claim_id("exp-1"))
        .expect("readable")
        .expect("exists");
    assert_eq!(stored.version, 0);
    assert!(stored.history.is_empty());
}

#[test]
fn concurrent_approvals_commit_exactly_once() {
    let harness = harness();
    harness.seed(pending("exp-1", "emp", "mgr"));

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    harness
                        .engine
                        .approve(&claim_id("exp-1"), &user("mgr"), "ok")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(|err| matches!(err, WorkflowError::Forbidden(_))));

    let claim = harness.stored("exp-1");
    assert_eq!(claim.history.len(), 1);
    assert_eq!(claim.current_approver_id, Some(user("dir")));
}

#[test]
fn rule_store_outage_aborts_without_writing() {
    let store = Arc::new(ContendedClaimStore::failing(0));
    store
        .inner
        .insert(pending("exp-1", "emp", "mgr"))
        .expect("claim seeds");
    let inbox = NotificationInbox::default();
    let (engine, _) = engine_with(
        store.clone(),
        Arc::new(UnavailableRuleStore),
        Arc::new(inbox.clone()),
    );

    let err = engine
        .approve(&claim_id("exp-1"), &user("mgr"), "")
        .expect_err("rules unavailable");
    assert!(matches!(err, WorkflowError::Store(StoreError::Unavailable(_))));
    assert_eq!(err.code(), "UNAVAILABLE");
    assert_eq!(store.save_attempts(), 0);
}

#[test]
fn notification_failures_do_not_undo_the_transition() {
    let store = Arc::new(ContendedClaimStore::failing(0));
    store
        .inner
        .insert(pending("exp-1", "emp", "mgr"))
        .expect("claim seeds");
    let (engine, _) = engine_with(
        store.clone(),
        Arc::new(InMemoryRuleStore::default()),
        Arc::new(FailingSink),
    );

    let (claim, _) = engine
        .reject(&claim_id("exp-1"), &user("mgr"), "duplicate")
        .expect("reject commits");
    assert_eq!(claim.status, ClaimStatus::Rejected);

    let stored = store
        .inner
        .load(&claim_id("exp-1"))
        .expect("readable")
        .expect("exists");
    assert_eq!(stored.status, ClaimStatus::Rejected);
}
