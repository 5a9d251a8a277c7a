use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::domain::{Claim, CompanyPolicy, UserId};
use super::repository::{RuleStore, StoreError, UserDirectory};
use super::rules::evaluation_order;

/// Computes the next human approver for a claim.
///
/// `Ok(None)` always means the chain is exhausted and the claim should finalize as approved.
pub struct ApproverResolver {
    rules: Arc<dyn RuleStore>,
    directory: Arc<dyn UserDirectory>,
}

impl ApproverResolver {
    pub fn new(rules: Arc<dyn RuleStore>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { rules, directory }
    }

    pub fn next_approver(
        &self,
        claim: &Claim,
        policy: &CompanyPolicy,
    ) -> Result<Option<UserId>, StoreError> {
        let mut sequenced: Vec<_> = self
            .rules
            .list_active_rules(&claim.company_id)?
            .into_iter()
            .filter(|rule| rule.is_active && rule.has_sequence())
            .collect();
        sequenced.sort_by(evaluation_order);

        if let Some(rule) = sequenced.first() {
            let approved = claim.history.approvers();
            let next = rule
                .conditions
                .approval_sequence
                .iter()
                .find(|id| !approved.contains(id))
                .cloned();
            debug!(
                claim_id = %claim.id,
                rule_id = %rule.id,
                next = ?next,
                "resolved approver from approval sequence"
            );
            return Ok(next);
        }

        if !policy.require_manager_approval {
            return Ok(None);
        }

        self.walk_manager_chain(claim, policy)
    }

    /// Manager, then the manager's manager, then company admins. At most two hops are taken; the
    /// visited set stops a cyclic reporting line from handing the claim back to someone already
    /// seen on the walk.
    fn walk_manager_chain(
        &self,
        claim: &Claim,
        policy: &CompanyPolicy,
    ) -> Result<Option<UserId>, StoreError> {
        let Some(employee) = self.directory.get(&claim.employee_id)? else {
            return Ok(None);
        };
        let Some(manager_id) = employee.manager_id else {
            return Ok(None);
        };

        let mut visited = HashSet::from([employee.id.clone()]);
        if !visited.insert(manager_id.clone()) {
            return Ok(None);
        }

        if !claim.history.has_approved(&manager_id) {
            return Ok(Some(manager_id));
        }

        let manager = self.directory.get(&manager_id)?;
        if let Some(senior_id) = manager.as_ref().and_then(|m| m.manager_id.clone()) {
            if visited.insert(senior_id.clone()) && !claim.history.has_approved(&senior_id) {
                debug!(claim_id = %claim.id, senior = %senior_id, "escalating to senior manager");
                return Ok(Some(senior_id));
            }
            return Ok(None);
        }

        if !policy.escalate_to_admin {
            return Ok(None);
        }

        let mut admins = self.directory.list_active_admins(&claim.company_id)?;
        admins.sort_by(|a, b| a.id.cmp(&b.id));
        let admin = admins
            .into_iter()
            .filter(|admin| admin.is_admin_of(&claim.company_id))
            .map(|admin| admin.id)
            .find(|id| !claim.history.has_approved(id));
        debug!(claim_id = %claim.id, admin = ?admin, "escalating to company admin");
        Ok(admin)
    }
}
