//! Loan management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::{
        ActorRole, BorrowerId, CreateLoan, LenderId, Loan, LoanDetails, LoanId, LoanQuery,
        LoanStats, LoanStatus, OverdueSweep, UpdateLoanStatus,
    },
};

use super::AuthenticatedActor;

/// Paginated loans response
#[derive(Serialize, ToSchema)]
pub struct LoansListResponse {
    pub loans: Vec<Loan>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Issue a new loan
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    request_body = CreateLoan,
    responses(
        (status = 201, description = "Loan created", body = Loan),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Borrower or lender not found"),
        (status = 409, description = "Borrower already has an active loan")
    )
)]
pub async fn create_loan(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Json(request): Json<CreateLoan>,
) -> AppResult<(StatusCode, Json<Loan>)> {
    actor.require_admin()?;

    let loan = state.services.loans.create_loan(actor.0, request).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// List loans with filters and pagination.
///
/// Lenders and borrowers only see their own loans.
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    params(LoanQuery),
    responses(
        (status = 200, description = "Loans list", body = LoansListResponse)
    )
)]
pub async fn list_loans(
    State(state): State<crate::AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(mut query): Query<LoanQuery>,
) -> AppResult<Json<LoansListResponse>> {
    match actor.role {
        ActorRole::Lender => query.lender_id = Some(LenderId(actor.id)),
        ActorRole::Borrower => query.borrower_id = Some(BorrowerId(actor.id)),
        ActorRole::Admin | ActorRole::System => {}
    }

    let (loans, total) = state.services.loans.list_loans(&query).await?;
    Ok(Json(LoansListResponse {
        loans,
        total,
        page: query.page(),
        per_page: query.per_page(),
    }))
}

/// Get a loan with its payment history
#[utoipa::path(
    get,
    path = "/loans/{loan_id}",
    tag = "loans",
    params(
        ("loan_id" = String, Path, description = "Loan identifier, e.g. LN-20240501-001")
    ),
    responses(
        (status = 200, description = "Loan details", body = LoanDetails),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(loan_id): Path<String>,
) -> AppResult<Json<LoanDetails>> {
    let details = state
        .services
        .loans
        .get_loan_details(&LoanId(loan_id))
        .await?;

    match actor.0.role {
        ActorRole::Lender => actor.require_admin_or_self(details.loan.lender_id.0)?,
        ActorRole::Borrower => actor.require_admin_or_self(details.loan.borrower_id.0)?,
        _ => actor.require_admin()?,
    }
    Ok(Json(details))
}

/// Change a loan's status
#[utoipa::path(
    put,
    path = "/loans/{loan_id}/status",
    tag = "loans",
    params(
        ("loan_id" = String, Path, description = "Loan identifier")
    ),
    request_body = UpdateLoanStatus,
    responses(
        (status = 200, description = "Loan updated", body = Loan),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Invalid status or transition")
    )
)]
pub async fn update_loan_status(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(loan_id): Path<String>,
    Json(request): Json<UpdateLoanStatus>,
) -> AppResult<Json<Loan>> {
    actor.require_admin()?;

    let status: LoanStatus = request.status.parse()?;
    let loan = state
        .services
        .loans
        .update_status(actor.0, &LoanId(loan_id), status, request.notes)
        .await?;
    Ok(Json(loan))
}

/// Delete a loan and its payments
#[utoipa::path(
    delete,
    path = "/loans/{loan_id}",
    tag = "loans",
    params(
        ("loan_id" = String, Path, description = "Loan identifier")
    ),
    responses(
        (status = 204, description = "Loan deleted"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn delete_loan(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(loan_id): Path<String>,
) -> AppResult<StatusCode> {
    actor.require_admin()?;

    state
        .services
        .loans
        .delete_loan(actor.0, &LoanId(loan_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Run the overdue sweep now
#[utoipa::path(
    post,
    path = "/loans/sweep-overdue",
    tag = "loans",
    responses(
        (status = 200, description = "Sweep summary", body = OverdueSweep)
    )
)]
pub async fn sweep_overdue(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
) -> AppResult<Json<OverdueSweep>> {
    actor.require_admin()?;

    let sweep = state.services.loans.sweep_overdue(actor.0).await?;
    Ok(Json(sweep))
}

/// Portfolio statistics
#[utoipa::path(
    get,
    path = "/loans/stats",
    tag = "loans",
    responses(
        (status = 200, description = "Loan statistics", body = LoanStats)
    )
)]
pub async fn get_loan_stats(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
) -> AppResult<Json<LoanStats>> {
    actor.require_admin()?;

    let stats = state.services.loans.stats().await?;
    Ok(Json(stats))
}
