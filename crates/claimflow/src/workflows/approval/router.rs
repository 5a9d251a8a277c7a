use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::domain::{Claim, ClaimId, RuleId, UserId};
use super::engine::{TransitionOutcome, WorkflowEngine, WorkflowError};
use super::notifications::NotificationInbox;
use super::repository::StoreError;
use super::service::{ApprovalRuleService, RuleDraft, RulePatch};

/// Header carrying the authenticated caller; authentication itself happens upstream.
pub const ACTING_USER_HEADER: &str = "x-user-id";

/// Shared state behind the approval routes.
#[derive(Clone)]
pub struct ApprovalApi {
    pub engine: Arc<WorkflowEngine>,
    pub rules: Arc<ApprovalRuleService>,
    pub inbox: NotificationInbox,
}

/// Router builder exposing approval, rule administration, and inbox endpoints.
pub fn approval_router(
    engine: Arc<WorkflowEngine>,
    rules: Arc<ApprovalRuleService>,
    inbox: NotificationInbox,
) -> Router {
    Router::new()
        .route("/api/v1/approvals/pending", get(pending_handler))
        .route(
            "/api/v1/approvals/rules",
            get(list_rules_handler).post(create_rule_handler),
        )
        .route(
            "/api/v1/approvals/rules/:rule_id",
            put(update_rule_handler).delete(delete_rule_handler),
        )
        .route("/api/v1/approvals/:claim_id/approve", post(approve_handler))
        .route("/api/v1/approvals/:claim_id/reject", post(reject_handler))
        .route("/api/v1/approvals/:claim_id/override", post(override_handler))
        .route("/api/v1/expenses/:claim_id", get(claim_handler))
        .route("/api/v1/expenses/:claim_id/submit", post(submit_handler))
        .route("/api/v1/notifications", get(notifications_handler))
        .route(
            "/api/v1/notifications/:notification_id/read",
            post(mark_read_handler),
        )
        .with_state(ApprovalApi {
            engine,
            rules,
            inbox,
        })
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CommentBody {
    #[serde(default)]
    comment: String,
}

/// Comments are optional: a request without a JSON body carries an empty one.
fn comment_of(body: Result<Json<CommentBody>, JsonRejection>) -> Result<String, Response> {
    match body {
        Ok(Json(body)) => Ok(body.comment),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(String::new()),
        Err(rejection) => Err(rejection_response(rejection)),
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    body.map(|Json(value)| value).map_err(rejection_response)
}

fn rejection_response(rejection: JsonRejection) -> Response {
    error_response(WorkflowError::Validation(rejection.body_text()))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct InboxQuery {
    #[serde(default)]
    unread_only: bool,
}

pub(crate) async fn pending_handler(State(api): State<ApprovalApi>, headers: HeaderMap) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };

    match api.engine.pending_for(&user) {
        Ok(claims) => {
            let payload = json!({
                "success": true,
                "count": claims.len(),
                "data": claims,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn approve_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
    Path(claim_id): Path<String>,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let comment = match comment_of(body) {
        Ok(comment) => comment,
        Err(response) => return response,
    };

    transition_response(api.engine.approve(&ClaimId(claim_id), &user, &comment))
}

pub(crate) async fn reject_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
    Path(claim_id): Path<String>,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let comment = match comment_of(body) {
        Ok(comment) => comment,
        Err(response) => return response,
    };

    transition_response(api.engine.reject(&ClaimId(claim_id), &user, &comment))
}

pub(crate) async fn override_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
    Path(claim_id): Path<String>,
    body: Result<Json<CommentBody>, JsonRejection>,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let comment = match comment_of(body) {
        Ok(comment) => comment,
        Err(response) => return response,
    };

    transition_response(
        api.engine
            .override_approval(&ClaimId(claim_id), &user, &comment),
    )
}

pub(crate) async fn submit_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
    Path(claim_id): Path<String>,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };

    transition_response(api.engine.submit(&ClaimId(claim_id), &user))
}

pub(crate) async fn claim_handler(
    State(api): State<ApprovalApi>,
    Path(claim_id): Path<String>,
) -> Response {
    match api.engine.claim(&ClaimId(claim_id)) {
        Ok(claim) => {
            (StatusCode::OK, Json(json!({ "success": true, "data": claim }))).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn list_rules_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };

    match api.rules.list(&user) {
        Ok(rules) => {
            (StatusCode::OK, Json(json!({ "success": true, "data": rules }))).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn create_rule_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
    body: Result<Json<RuleDraft>, JsonRejection>,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let draft = match json_body(body) {
        Ok(draft) => draft,
        Err(response) => return response,
    };

    match api.rules.create(&user, draft) {
        Ok(rule) => {
            let payload = json!({
                "success": true,
                "data": rule,
                "message": "Approval rule created successfully",
            });
            (StatusCode::CREATED, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn update_rule_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
    Path(rule_id): Path<String>,
    body: Result<Json<RulePatch>, JsonRejection>,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let patch = match json_body(body) {
        Ok(patch) => patch,
        Err(response) => return response,
    };

    match api.rules.update(&user, &RuleId(rule_id), patch) {
        Ok(rule) => {
            let payload = json!({
                "success": true,
                "data": rule,
                "message": "Approval rule updated successfully",
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn delete_rule_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
    Path(rule_id): Path<String>,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };

    match api.rules.delete(&user, &RuleId(rule_id)) {
        Ok(()) => {
            let payload = json!({
                "success": true,
                "message": "Approval rule deleted successfully",
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn notifications_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
    Query(query): Query<InboxQuery>,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };

    let items = api.inbox.list(&user, query.unread_only);
    let payload = json!({
        "success": true,
        "unreadCount": api.inbox.unread_count(&user),
        "data": items,
    });
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) async fn mark_read_handler(
    State(api): State<ApprovalApi>,
    headers: HeaderMap,
    Path(notification_id): Path<String>,
) -> Response {
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };

    if api.inbox.mark_read(&user, &notification_id) {
        (StatusCode::OK, Json(json!({ "success": true }))).into_response()
    } else {
        error_response(WorkflowError::NotFound {
            entity: "notification",
            id: notification_id,
        })
    }
}

fn acting_user(headers: &HeaderMap) -> Result<UserId, Response> {
    headers
        .get(ACTING_USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| UserId(value.to_string()))
        .ok_or_else(|| {
            let payload = json!({
                "success": false,
                "error": {
                    "code": "UNAUTHENTICATED",
                    "message": format!("missing {ACTING_USER_HEADER} header"),
                },
            });
            (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
        })
}

fn transition_response(result: Result<(Claim, TransitionOutcome), WorkflowError>) -> Response {
    match result {
        Ok((claim, outcome)) => {
            let payload = json!({
                "success": true,
                "message": outcome.message,
                "finalStatus": outcome.status,
                "autoApproved": outcome.auto_approved,
                "ruleApplied": outcome.matched_rule_name,
                "nextApproverId": outcome.next_approver_id,
                "data": claim,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) fn error_response(err: WorkflowError) -> Response {
    let status = match &err {
        WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        WorkflowError::InvalidState { .. } | WorkflowError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
        WorkflowError::ConcurrencyConflict { .. }
        | WorkflowError::Store(StoreError::Conflict | StoreError::VersionConflict { .. }) => {
            StatusCode::CONFLICT
        }
        WorkflowError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
        WorkflowError::Store(StoreError::Unavailable(_)) => {
            warn!(error = %err, "approval request failed on a collaborator");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    let payload = json!({
        "success": false,
        "error": {
            "code": err.code(),
            "message": err.to_string(),
        },
    });
    (status, Json(payload)).into_response()
}
