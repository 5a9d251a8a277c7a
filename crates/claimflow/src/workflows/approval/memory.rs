use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use super::domain::{Claim, ClaimId, ClaimStatus, CompanyId, CompanyPolicy, RuleId, UserId, UserRef};
use super::repository::{ClaimStore, RuleStore, StoreError, UserDirectory};
use super::rules::{evaluation_order, ApprovalRule};

/// Claim store keeping records behind a mutex with version-checked saves.
#[derive(Debug, Default, Clone)]
pub struct InMemoryClaimStore {
    records: Arc<Mutex<HashMap<ClaimId, Claim>>>,
}

impl InMemoryClaimStore {
    /// Seeds a claim as-is; fails when the id is taken.
    pub fn insert(&self, claim: Claim) -> Result<Claim, StoreError> {
        let mut guard = self.records.lock().expect("claim store mutex poisoned");
        if guard.contains_key(&claim.id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(claim.id.clone(), claim.clone());
        Ok(claim)
    }
}

impl ClaimStore for InMemoryClaimStore {
    fn load(&self, id: &ClaimId) -> Result<Option<Claim>, StoreError> {
        let guard = self.records.lock().expect("claim store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn save(&self, mut claim: Claim, expected_version: u64) -> Result<Claim, StoreError> {
        let mut guard = self.records.lock().expect("claim store mutex poisoned");
        let stored = guard.get(&claim.id).ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                found: stored.version,
            });
        }

        claim.version = expected_version + 1;
        guard.insert(claim.id.clone(), claim.clone());
        Ok(claim)
    }

    fn pending_for(&self, approver_id: &UserId) -> Result<Vec<Claim>, StoreError> {
        let guard = self.records.lock().expect("claim store mutex poisoned");
        let mut claims: Vec<_> = guard
            .values()
            .filter(|claim| {
                claim.status == ClaimStatus::Pending
                    && claim.current_approver_id.as_ref() == Some(approver_id)
            })
            .cloned()
            .collect();
        // newest submission first; unsubmitted imports last
        claims.sort_by(|a, b| {
            b.submitted_at
                .cmp(&a.submitted_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(claims)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryRuleStore {
    rules: Arc<Mutex<HashMap<RuleId, ApprovalRule>>>,
}

impl RuleStore for InMemoryRuleStore {
    fn list_active_rules(&self, company_id: &CompanyId) -> Result<Vec<ApprovalRule>, StoreError> {
        let mut rules: Vec<_> = self
            .list_rules(company_id)?
            .into_iter()
            .filter(|rule| rule.is_active)
            .collect();
        rules.sort_by(evaluation_order);
        Ok(rules)
    }

    fn list_rules(&self, company_id: &CompanyId) -> Result<Vec<ApprovalRule>, StoreError> {
        let guard = self.rules.lock().expect("rule store mutex poisoned");
        Ok(guard
            .values()
            .filter(|rule| &rule.company_id == company_id)
            .cloned()
            .collect())
    }

    fn fetch_rule(&self, id: &RuleId) -> Result<Option<ApprovalRule>, StoreError> {
        let guard = self.rules.lock().expect("rule store mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn insert_rule(&self, rule: ApprovalRule) -> Result<ApprovalRule, StoreError> {
        let mut guard = self.rules.lock().expect("rule store mutex poisoned");
        if guard.contains_key(&rule.id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    fn update_rule(&self, rule: ApprovalRule) -> Result<ApprovalRule, StoreError> {
        let mut guard = self.rules.lock().expect("rule store mutex poisoned");
        if !guard.contains_key(&rule.id) {
            return Err(StoreError::NotFound);
        }
        guard.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    fn delete_rule(&self, id: &RuleId) -> Result<(), StoreError> {
        let mut guard = self.rules.lock().expect("rule store mutex poisoned");
        guard.remove(id).map(|_| ()).ok_or(StoreError::NotFound)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    users: Arc<Mutex<HashMap<UserId, UserRef>>>,
    policies: Arc<Mutex<HashMap<CompanyId, CompanyPolicy>>>,
}

impl InMemoryDirectory {
    pub fn upsert_user(&self, user: UserRef) {
        let mut guard = self.users.lock().expect("directory mutex poisoned");
        guard.insert(user.id.clone(), user);
    }

    pub fn set_policy(&self, company_id: CompanyId, policy: CompanyPolicy) {
        let mut guard = self.policies.lock().expect("directory mutex poisoned");
        guard.insert(company_id, policy);
    }
}

impl UserDirectory for InMemoryDirectory {
    fn get(&self, id: &UserId) -> Result<Option<UserRef>, StoreError> {
        let guard = self.users.lock().expect("directory mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn list_active_admins(&self, company_id: &CompanyId) -> Result<Vec<UserRef>, StoreError> {
        let guard = self.users.lock().expect("directory mutex poisoned");
        let mut admins: Vec<_> = guard
            .values()
            .filter(|user| user.is_admin_of(company_id))
            .cloned()
            .collect();
        admins.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(admins)
    }

    fn company_policy(&self, company_id: &CompanyId) -> Result<Option<CompanyPolicy>, StoreError> {
        let guard = self.policies.lock().expect("directory mutex poisoned");
        Ok(guard.get(company_id).copied())
    }
}

/// Fixture document used to hydrate the in-memory collaborators.
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub companies: Vec<SeedCompany>,
    #[serde(default)]
    pub users: Vec<UserRef>,
    #[serde(default)]
    pub rules: Vec<ApprovalRule>,
    #[serde(default)]
    pub claims: Vec<Claim>,
}

#[derive(Debug, Deserialize)]
pub struct SeedCompany {
    pub id: CompanyId,
    #[serde(default)]
    pub policy: CompanyPolicy,
}

/// In-memory collaborator set sharing state with the engine built on top of it.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    pub claims: Arc<InMemoryClaimStore>,
    pub rules: Arc<InMemoryRuleStore>,
    pub directory: Arc<InMemoryDirectory>,
}

impl InMemoryBackend {
    pub fn from_seed(seed: SeedData) -> Result<Self, StoreError> {
        let backend = Self::default();
        for company in seed.companies {
            backend.directory.set_policy(company.id, company.policy);
        }
        for user in seed.users {
            backend.directory.upsert_user(user);
        }
        for rule in seed.rules {
            backend.rules.insert_rule(rule)?;
        }
        for claim in seed.claims {
            backend.claims.insert(claim)?;
        }
        Ok(backend)
    }
}
