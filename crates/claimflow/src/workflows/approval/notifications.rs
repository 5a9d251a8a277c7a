use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{Claim, ClaimId, UserId};
use super::repository::{NotificationError, NotificationSink};

/// Event types rendered by UI clients. The wire names are a compatibility surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    ExpenseSubmitted,
    ApprovalRequired,
    ExpenseApproved,
    ExpenseRejected,
}

impl NotificationEvent {
    pub const fn label(self) -> &'static str {
        match self {
            NotificationEvent::ExpenseSubmitted => "expense_submitted",
            NotificationEvent::ApprovalRequired => "approval_required",
            NotificationEvent::ExpenseApproved => "expense_approved",
            NotificationEvent::ExpenseRejected => "expense_rejected",
        }
    }
}

/// Notification body. Field names are rendered verbatim by clients, so they stay camelCase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub expense_id: ClaimId,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_applied: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub final_approval: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub admin_override: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_name: Option<String>,
}

impl NotificationPayload {
    pub fn new(expense_id: ClaimId, message: impl Into<String>) -> Self {
        Self {
            expense_id,
            message: message.into(),
            amount: None,
            currency: None,
            category: None,
            employee_name: None,
            approver_name: None,
            comment: None,
            auto_approved: false,
            rule_applied: None,
            final_approval: false,
            admin_override: false,
            admin_name: None,
        }
    }

    /// Payload carrying the claim id, amount and currency every event reports.
    pub fn for_claim(claim: &Claim, message: impl Into<String>) -> Self {
        let mut payload = Self::new(claim.id.clone(), message);
        payload.amount = Some(claim.amount);
        payload.currency = Some(claim.currency.clone());
        payload
    }
}

/// Persisted copy of a dispatched notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredNotification {
    pub id: String,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub event: NotificationEvent,
    pub payload: NotificationPayload,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

static NOTIFICATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_notification_id() -> String {
    let id = NOTIFICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("ntf-{id:06}")
}

/// In-process inbox keeping every notification per recipient, newest last.
#[derive(Debug, Default, Clone)]
pub struct NotificationInbox {
    inboxes: Arc<Mutex<HashMap<UserId, Vec<StoredNotification>>>>,
}

impl NotificationInbox {
    /// Notifications for `user_id`, newest first.
    pub fn list(&self, user_id: &UserId, unread_only: bool) -> Vec<StoredNotification> {
        let guard = self.inboxes.lock().expect("inbox mutex poisoned");
        guard
            .get(user_id)
            .map(|items| {
                items
                    .iter()
                    .rev()
                    .filter(|item| !unread_only || !item.is_read)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Marks one notification read; returns `false` when it does not belong to the user.
    pub fn mark_read(&self, user_id: &UserId, notification_id: &str) -> bool {
        let mut guard = self.inboxes.lock().expect("inbox mutex poisoned");
        match guard
            .get_mut(user_id)
            .and_then(|items| items.iter_mut().find(|item| item.id == notification_id))
        {
            Some(item) => {
                item.is_read = true;
                true
            }
            None => false,
        }
    }

    pub fn unread_count(&self, user_id: &UserId) -> usize {
        self.list(user_id, true).len()
    }

    /// Every stored notification across recipients, in dispatch order.
    pub fn all(&self) -> Vec<StoredNotification> {
        let guard = self.inboxes.lock().expect("inbox mutex poisoned");
        let mut items: Vec<_> = guard.values().flatten().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }
}

impl NotificationSink for NotificationInbox {
    fn notify(
        &self,
        target: &UserId,
        event: NotificationEvent,
        payload: NotificationPayload,
    ) -> Result<(), NotificationError> {
        let mut guard = self
            .inboxes
            .lock()
            .map_err(|_| NotificationError::Transport("inbox lock poisoned".to_string()))?;
        guard
            .entry(target.clone())
            .or_default()
            .push(StoredNotification {
                id: next_notification_id(),
                user_id: target.clone(),
                event,
                payload,
                is_read: false,
                created_at: Utc::now(),
            });
        Ok(())
    }
}
