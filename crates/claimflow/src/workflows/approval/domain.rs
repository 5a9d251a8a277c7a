use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::history::ApprovalHistory;

/// Identifier wrapper for expense claims.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(pub String);

/// Identifier wrapper for employees, managers, and administrators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub String);

/// Identifier wrapper for company approval rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a claim moving through approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl ClaimStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ClaimStatus::Draft => "draft",
            ClaimStatus::Pending => "pending",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Rejected => "rejected",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, ClaimStatus::Approved | ClaimStatus::Rejected)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Travel,
    Food,
    OfficeSupplies,
    Entertainment,
    Utilities,
    Other,
}

impl ExpenseCategory {
    pub const fn label(self) -> &'static str {
        match self {
            ExpenseCategory::Travel => "travel",
            ExpenseCategory::Food => "food",
            ExpenseCategory::OfficeSupplies => "office_supplies",
            ExpenseCategory::Entertainment => "entertainment",
            ExpenseCategory::Utilities => "utilities",
            ExpenseCategory::Other => "other",
        }
    }
}

/// Expense claim routed through the approval chain.
///
/// Monetary fields are carried for notification rendering only; the engine never rewrites them.
/// `submitted_at` is stamped when the claim enters the approval chain.
/// `version` is bumped by the claim store on every committed save and acts as the optimistic
/// concurrency token for transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub company_id: CompanyId,
    pub employee_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub converted_amount: Decimal,
    pub category: ExpenseCategory,
    pub description: String,
    pub status: ClaimStatus,
    pub current_approver_id: Option<UserId>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: ApprovalHistory,
    #[serde(default)]
    pub version: u64,
}

impl Claim {
    /// A fresh draft with empty history, as produced by the expense intake layer.
    pub fn draft(
        id: ClaimId,
        company_id: CompanyId,
        employee_id: UserId,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id,
            company_id,
            employee_id,
            amount,
            currency: currency.into(),
            converted_amount: amount,
            category: ExpenseCategory::Other,
            description: String::new(),
            status: ClaimStatus::Draft,
            current_approver_id: None,
            submitted_at: None,
            history: ApprovalHistory::default(),
            version: 0,
        }
    }

    /// Human readable amount, e.g. `USD 120.50`.
    pub fn display_amount(&self) -> String {
        format!("{} {}", self.currency, self.amount)
    }

    pub fn is_awaiting(&self, approver_id: &UserId) -> bool {
        self.status == ClaimStatus::Pending && self.current_approver_id.as_ref() == Some(approver_id)
    }

    pub(crate) fn finalize(&mut self, status: ClaimStatus) {
        self.status = status;
        self.current_approver_id = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Employee,
    Manager,
    Admin,
}

/// Directory view of a user; only the fields routing depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub display_name: String,
    pub role: UserRole,
    pub manager_id: Option<UserId>,
    pub company_id: CompanyId,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl UserRef {
    pub fn is_admin_of(&self, company_id: &CompanyId) -> bool {
        self.role == UserRole::Admin && self.is_active && &self.company_id == company_id
    }
}

/// Company settings consulted by the approver resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyPolicy {
    #[serde(default = "default_true")]
    pub require_manager_approval: bool,
    #[serde(default = "default_true")]
    pub escalate_to_admin: bool,
}

impl Default for CompanyPolicy {
    fn default() -> Self {
        Self {
            require_manager_approval: true,
            escalate_to_admin: true,
        }
    }
}

fn default_true() -> bool {
    true
}
