use crate::infra::{load_seed, ApprovalStack};
use clap::Args;
use claimflow::error::AppError;
use claimflow::workflows::approval::{
    Claim, ClaimId, TransitionOutcome, UserDirectory, UserId, WorkflowError,
    DEFAULT_CONFLICT_RETRIES,
};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// JSON fixture to run against (defaults to the bundled sample company)
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
    /// Draft claim walked through submit and approve
    #[arg(long, default_value = "exp-1001")]
    pub(crate) approve_claim: String,
    /// Draft claim walked through submit, reject, and admin override
    #[arg(long, default_value = "exp-1002")]
    pub(crate) reject_claim: String,
    /// Stop after the rejection instead of overriding it
    #[arg(long)]
    pub(crate) skip_override: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        seed,
        approve_claim,
        reject_claim,
        skip_override,
    } = args;

    let stack = ApprovalStack::new(load_seed(seed.as_deref())?, DEFAULT_CONFLICT_RETRIES);

    println!("Expense approval workflow demo");

    println!("\nClaim {approve_claim}: submit and approve");
    let approver = submit(&stack, &ClaimId(approve_claim.clone()))?;
    if let Some(approver) = approver {
        let claim_id = ClaimId(approve_claim);
        let (claim, outcome) = stack.engine.approve(&claim_id, &approver, "Looks good")?;
        render_outcome(&stack, &claim, &outcome);
    }

    println!("\nClaim {reject_claim}: submit, reject, override");
    let claim_id = ClaimId(reject_claim);
    let approver = submit(&stack, &claim_id)?;
    if let Some(approver) = approver {
        let (claim, outcome) = stack.engine.reject(
            &claim_id,
            &approver,
            "Please split the bill per attendee",
        )?;
        render_outcome(&stack, &claim, &outcome);
    }

    if !skip_override {
        let claim = stack.engine.claim(&claim_id)?;
        let admin = stack
            .backend
            .directory
            .list_active_admins(&claim.company_id)
            .map_err(WorkflowError::from)?
            .into_iter()
            .next();
        match admin {
            Some(admin) => {
                let (claim, outcome) = stack.engine.override_approval(
                    &claim_id,
                    &admin.id,
                    "Approved by finance lead",
                )?;
                render_outcome(&stack, &claim, &outcome);
            }
            None => println!("- no active admin available to override"),
        }
    }

    println!("\nNotifications dispatched");
    for notification in stack.inbox.all() {
        println!(
            "- [{}] to {}: {}",
            notification.event.label(),
            display_name(&stack, &notification.user_id),
            notification.payload.message
        );
    }

    Ok(())
}

fn submit(stack: &ApprovalStack, claim_id: &ClaimId) -> Result<Option<UserId>, AppError> {
    let draft = stack.engine.claim(claim_id)?;
    let (claim, outcome) = stack.engine.submit(claim_id, &draft.employee_id)?;
    render_outcome(stack, &claim, &outcome);
    if claim.current_approver_id.is_none() {
        println!("- no approver could be resolved; claim awaits manual assignment");
    }
    Ok(claim.current_approver_id)
}

fn render_outcome(stack: &ApprovalStack, claim: &Claim, outcome: &TransitionOutcome) {
    println!(
        "- {} ({}) -> {}",
        outcome.message,
        claim.display_amount(),
        outcome.status
    );
    if let Some(rule) = &outcome.matched_rule_name {
        println!("  rule applied: {rule}");
    }
    if let Some(next) = &outcome.next_approver_id {
        println!("  awaiting: {}", display_name(stack, next));
    }
    if let Some(entry) = claim.history.last() {
        println!(
            "  history #{}: {} {} \"{}\"",
            claim.history.len(),
            display_name(stack, &entry.approver_id),
            entry.action.label(),
            entry.comment
        );
    }
}

fn display_name(stack: &ApprovalStack, user_id: &UserId) -> String {
    match stack.backend.directory.get(user_id) {
        Ok(Some(user)) => user.display_name,
        _ => user_id.to_string(),
    }
}
