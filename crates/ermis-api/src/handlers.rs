//! REST API handlers.
//!
//! Saga calls block on the store and the gateways, so each one runs on the
//! blocking pool. Errors follow one mapping: validation 400, conflict or
//! inconsistency 409, not found 404, rolled-back failure 202 on modify and
//! 503 otherwise, failed rollback 500 flagged for manual intervention.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use ermis_core::resource::{AliasResource, AliasSummary, Principal};
use ermis_core::types::Alias;
use ermis_saga::{GatewayError, NodeReport, Orchestrator, SagaError, SagaResult};
use ermis_state::AliasQuery;

use crate::ApiState;

/// Header carrying the authenticated username.
pub const USER_HEADER: &str = "x-forwarded-user";

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manual_intervention: Option<bool>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            manual_intervention: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            manual_intervention: None,
        }),
    )
        .into_response()
}

/// Render a saga error. `aborted` is the status for a cleanly rolled-back
/// failure, which differs between modify and create/delete.
fn saga_error_response(err: &SagaError, aborted: StatusCode) -> Response {
    let status = match err {
        SagaError::Validation(_) => StatusCode::BAD_REQUEST,
        SagaError::Conflict { .. } | SagaError::Inconsistent { .. } => StatusCode::CONFLICT,
        SagaError::NotFound { .. } => StatusCode::NOT_FOUND,
        SagaError::Aborted { .. } => aborted,
        SagaError::RollbackFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        SagaError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        SagaError::Gateway(GatewayError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        SagaError::Gateway(_) => StatusCode::BAD_GATEWAY,
    };
    if err.needs_manual_intervention() {
        error!(error = %err, "manual reconciliation required");
    } else if status.is_server_error() {
        error!(error = %err, "request failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "request rejected");
    }
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
            manual_intervention: err.needs_manual_intervention().then_some(true),
        }),
    )
        .into_response()
}

/// The caller, if the request carries an authenticated username.
fn principal(state: &ApiState, headers: &HeaderMap) -> Option<Principal> {
    let user = headers.get(USER_HEADER)?.to_str().ok()?.trim();
    if user.is_empty() {
        return None;
    }
    Some(state.orchestrator.config().auth.principal(user))
}

fn require_principal(state: &ApiState, headers: &HeaderMap) -> Result<Principal, Response> {
    principal(state, headers)
        .ok_or_else(|| error_response("missing authenticated user", StatusCode::UNAUTHORIZED))
}

fn authorize(principal: &Principal, hostgroup: &str) -> Result<(), Response> {
    if principal.can_manage(hostgroup) {
        Ok(())
    } else {
        warn!(user = %principal.username, hostgroup, "not authorized for hostgroup");
        Err(error_response(
            &format!("{} may not manage hostgroup {hostgroup}", principal.username),
            StatusCode::FORBIDDEN,
        ))
    }
}

/// Run an orchestrator call on the blocking pool.
async fn run<T, F>(state: &ApiState, aborted: StatusCode, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&Orchestrator) -> SagaResult<T> + Send + 'static,
{
    let orchestrator = state.orchestrator.clone();
    match tokio::task::spawn_blocking(move || f(&orchestrator)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(saga_error_response(&e, aborted)),
        Err(e) => Err(error_response(
            &format!("worker failed: {e}"),
            StatusCode::INTERNAL_SERVER_ERROR,
        )),
    }
}

/// Query string selecting one alias by name.
#[derive(Debug, Default, Deserialize)]
pub struct AliasNameParam {
    pub alias_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HostnameParam {
    pub hostname: String,
}

async fn fetch(state: &ApiState, key: Option<String>) -> Result<Vec<Alias>, Response> {
    match key {
        Some(key) => run(state, StatusCode::SERVICE_UNAVAILABLE, move |o| o.find_alias(&key))
            .await?
            .map(|alias| vec![alias])
            .ok_or_else(|| error_response("alias not found", StatusCode::NOT_FOUND)),
        None => {
            run(state, StatusCode::SERVICE_UNAVAILABLE, |o| {
                o.get_aliases(&AliasQuery::All)
            })
            .await
        }
    }
}

// ── Reads ──────────────────────────────────────────────────────

/// GET /api/v1/alias
pub async fn list_aliases(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<AliasNameParam>,
) -> Result<Response, Response> {
    let viewer = principal(&state, &headers).unwrap_or_default();
    let aliases = fetch(&state, params.alias_name).await?;
    let summaries: Vec<AliasSummary> = aliases
        .iter()
        .map(|alias| AliasSummary::condensed(alias, &viewer))
        .collect();
    Ok(ApiResponse::ok(summaries).into_response())
}

/// GET /api/v1/alias/raw
pub async fn list_aliases_raw(
    State(state): State<ApiState>,
    Query(params): Query<AliasNameParam>,
) -> Result<Response, Response> {
    let aliases = fetch(&state, params.alias_name).await?;
    Ok(ApiResponse::ok(aliases).into_response())
}

/// GET /api/v1/alias/{id}
pub async fn get_alias(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let viewer = principal(&state, &headers).unwrap_or_default();
    let aliases = fetch(&state, Some(id)).await?;
    let summary = aliases
        .first()
        .map(|alias| AliasSummary::condensed(alias, &viewer));
    Ok(ApiResponse::ok(summary).into_response())
}

/// GET /api/v1/check_name
pub async fn check_name(
    State(state): State<ApiState>,
    Query(params): Query<HostnameParam>,
) -> Result<Response, Response> {
    let check = run(&state, StatusCode::SERVICE_UNAVAILABLE, move |o| {
        o.check_name(&params.hostname)
    })
    .await?;
    Ok(ApiResponse::ok(check).into_response())
}

// ── Mutations ──────────────────────────────────────────────────

/// POST /api/v1/alias
pub async fn create_alias(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(resource): Json<AliasResource>,
) -> Result<Response, Response> {
    let principal = require_principal(&state, &headers)?;
    // An empty hostgroup is rejected by validation.
    if !resource.hostgroup.is_empty() {
        authorize(&principal, &resource.hostgroup)?;
    }
    let created = run(&state, StatusCode::SERVICE_UNAVAILABLE, move |o| {
        o.create_alias(&resource, &principal)
    })
    .await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(created)).into_response())
}

/// PATCH /api/v1/alias/{id}
pub async fn modify_alias(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(resource): Json<AliasResource>,
) -> Result<Response, Response> {
    let principal = require_principal(&state, &headers)?;
    let current = fetch(&state, Some(id.clone())).await?;
    for alias in &current {
        authorize(&principal, &alias.hostgroup)?;
    }
    if !resource.hostgroup.is_empty() {
        authorize(&principal, &resource.hostgroup)?;
    }
    let updated = run(&state, StatusCode::ACCEPTED, move |o| {
        o.modify_alias(&id, &resource, &principal)
    })
    .await?;
    Ok(ApiResponse::ok(updated).into_response())
}

/// DELETE /api/v1/alias?alias_name=
pub async fn delete_alias(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<AliasNameParam>,
) -> Result<Response, Response> {
    let principal = require_principal(&state, &headers)?;
    let Some(name) = params.alias_name.filter(|n| !n.trim().is_empty()) else {
        return Err(error_response("alias_name is required", StatusCode::BAD_REQUEST));
    };

    let lookup = name.clone();
    let stored = run(&state, StatusCode::SERVICE_UNAVAILABLE, move |o| {
        o.find_alias(&lookup)
    })
    .await?;
    match &stored {
        Some(alias) => authorize(&principal, &alias.hostgroup)?,
        // Without a database row only admins reach the saga, which reports
        // the leftovers as an inconsistency.
        None if !principal.admin => {
            return Err(error_response("alias not found", StatusCode::NOT_FOUND));
        }
        None => {}
    }

    let deleted = run(&state, StatusCode::SERVICE_UNAVAILABLE, move |o| {
        o.delete_alias(&name, &principal)
    })
    .await?;
    Ok(ApiResponse::ok(deleted).into_response())
}

// ── Load-balancer clients ──────────────────────────────────────

/// POST /api/v1/lbclient
pub async fn report_status(
    State(state): State<ApiState>,
    Json(report): Json<NodeReport>,
) -> Result<Response, Response> {
    let outcome = run(&state, StatusCode::SERVICE_UNAVAILABLE, move |o| {
        o.report_status(&report)
    })
    .await?;
    Ok(ApiResponse::ok(outcome).into_response())
}
