use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::UserId;

/// Action recorded against a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Approved,
    Rejected,
    Overridden,
}

impl HistoryAction {
    pub const fn label(self) -> &'static str {
        match self {
            HistoryAction::Approved => "approved",
            HistoryAction::Rejected => "rejected",
            HistoryAction::Overridden => "overridden",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub approver_id: UserId,
    pub action: HistoryAction,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only, time-ordered log of the actions taken on a claim.
///
/// Entries cannot be edited or removed through this type. Timestamps never go backwards: an entry
/// recorded with a clock reading earlier than the latest entry is stamped with the latest
/// timestamp instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalHistory {
    entries: Vec<HistoryEntry>,
}

impl ApprovalHistory {
    pub fn record(
        &mut self,
        approver_id: UserId,
        action: HistoryAction,
        comment: impl Into<String>,
        at: DateTime<Utc>,
    ) -> &HistoryEntry {
        let timestamp = match self.entries.last() {
            Some(last) if last.timestamp > at => last.timestamp,
            _ => at,
        };

        self.entries.push(HistoryEntry {
            approver_id,
            action,
            comment: comment.into(),
            timestamp,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn approval_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.action == HistoryAction::Approved)
            .count()
    }

    pub fn has_approved(&self, user_id: &UserId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.action == HistoryAction::Approved && &entry.approver_id == user_id)
    }

    /// Distinct users holding an `Approved` entry.
    pub fn approvers(&self) -> BTreeSet<&UserId> {
        self.entries
            .iter()
            .filter(|entry| entry.action == HistoryAction::Approved)
            .map(|entry| &entry.approver_id)
            .collect()
    }
}
