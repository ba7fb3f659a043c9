//! Dashboard, payment destination and audit trail endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        AdminDashboard, AuditEntry, AuditQuery, BorrowerDashboard, BorrowerId, LenderDashboard,
        LenderId, LenderPaymentInfo,
    },
};

use super::AuthenticatedActor;

/// Paginated audit trail response
#[derive(Serialize, ToSchema)]
pub struct AuditLogsResponse {
    pub entries: Vec<AuditEntry>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Lender dashboard
#[utoipa::path(
    get,
    path = "/lenders/{id}/dashboard",
    tag = "dashboards",
    params(("id" = Uuid, Path, description = "Lender ID")),
    responses(
        (status = 200, description = "Lender dashboard", body = LenderDashboard),
        (status = 404, description = "Lender not found")
    )
)]
pub async fn lender_dashboard(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LenderDashboard>> {
    actor.require_admin_or_self(id)?;

    let dashboard = state.services.dashboard.lender_dashboard(LenderId(id)).await?;
    Ok(Json(dashboard))
}

/// Borrower dashboard
#[utoipa::path(
    get,
    path = "/borrowers/{id}/dashboard",
    tag = "dashboards",
    params(("id" = Uuid, Path, description = "Borrower ID")),
    responses(
        (status = 200, description = "Borrower dashboard", body = BorrowerDashboard),
        (status = 404, description = "Borrower not found")
    )
)]
pub async fn borrower_dashboard(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BorrowerDashboard>> {
    actor.require_admin_or_self(id)?;

    let dashboard = state.services.dashboard.borrower_dashboard(BorrowerId(id)).await?;
    Ok(Json(dashboard))
}

/// Where the borrower pays installments of the active loan
#[utoipa::path(
    get,
    path = "/borrowers/{id}/lender-qr",
    tag = "dashboards",
    params(("id" = Uuid, Path, description = "Borrower ID")),
    responses(
        (status = 200, description = "Lender UPI details", body = LenderPaymentInfo),
        (status = 404, description = "No active loan")
    )
)]
pub async fn lender_payment_info(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LenderPaymentInfo>> {
    actor.require_admin_or_self(id)?;

    let info = state.services.dashboard.lender_payment_info(BorrowerId(id)).await?;
    Ok(Json(info))
}

/// Administrator dashboard
#[utoipa::path(
    get,
    path = "/admin/dashboard",
    tag = "dashboards",
    responses(
        (status = 200, description = "Portfolio overview", body = AdminDashboard),
        (status = 403, description = "Administrator role required")
    )
)]
pub async fn admin_dashboard(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
) -> AppResult<Json<AdminDashboard>> {
    actor.require_admin()?;

    let dashboard = state.services.dashboard.admin_dashboard().await?;
    Ok(Json(dashboard))
}

/// Audit trail, newest first
#[utoipa::path(
    get,
    path = "/audit-logs",
    tag = "dashboards",
    params(AuditQuery),
    responses(
        (status = 200, description = "Audit entries", body = AuditLogsResponse),
        (status = 403, description = "Administrator role required")
    )
)]
pub async fn list_audit_logs(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<AuditLogsResponse>> {
    actor.require_admin()?;

    let (entries, total) = state.services.audit.list(&query).await?;
    Ok(Json(AuditLogsResponse {
        entries,
        total,
        page: query.page(),
        per_page: query.per_page(),
    }))
}
