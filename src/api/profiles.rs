//! Lender and borrower profile endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        BorrowerId, BorrowerProfile, CreateBorrower, CreateLender, LenderId, LenderProfile, Loan,
        ProfileDeletion, ProfileRef,
    },
};

use super::AuthenticatedActor;

/// Register a lender
#[utoipa::path(
    post,
    path = "/lenders",
    tag = "profiles",
    request_body = CreateLender,
    responses(
        (status = 201, description = "Lender created", body = LenderProfile),
        (status = 409, description = "Phone number already registered")
    )
)]
pub async fn create_lender(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Json(request): Json<CreateLender>,
) -> AppResult<(StatusCode, Json<LenderProfile>)> {
    actor.require_admin()?;

    let lender = state.services.profiles.create_lender(actor.0, request).await?;
    Ok((StatusCode::CREATED, Json(lender)))
}

/// Get a lender with its aggregates
#[utoipa::path(
    get,
    path = "/lenders/{id}",
    tag = "profiles",
    params(("id" = Uuid, Path, description = "Lender ID")),
    responses(
        (status = 200, description = "Lender", body = LenderProfile),
        (status = 404, description = "Lender not found")
    )
)]
pub async fn get_lender(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LenderProfile>> {
    actor.require_admin_or_self(id)?;

    let lender = state.services.profiles.get_lender(LenderId(id)).await?;
    Ok(Json(lender))
}

/// Delete a lender with all of its loans
#[utoipa::path(
    delete,
    path = "/lenders/{id}",
    tag = "profiles",
    params(("id" = Uuid, Path, description = "Lender ID")),
    responses(
        (status = 200, description = "Lender deleted", body = ProfileDeletion),
        (status = 404, description = "Lender not found"),
        (status = 409, description = "Lender has an active loan")
    )
)]
pub async fn delete_lender(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ProfileDeletion>> {
    actor.require_admin()?;

    let deletion = state
        .services
        .profiles
        .delete_profile(actor.0, ProfileRef::Lender(LenderId(id)))
        .await?;
    Ok(Json(deletion))
}

/// Register a borrower
#[utoipa::path(
    post,
    path = "/borrowers",
    tag = "profiles",
    request_body = CreateBorrower,
    responses(
        (status = 201, description = "Borrower created", body = BorrowerProfile),
        (status = 409, description = "Phone number already registered")
    )
)]
pub async fn create_borrower(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Json(request): Json<CreateBorrower>,
) -> AppResult<(StatusCode, Json<BorrowerProfile>)> {
    actor.require_admin()?;

    let borrower = state.services.profiles.create_borrower(actor.0, request).await?;
    Ok((StatusCode::CREATED, Json(borrower)))
}

/// Get a borrower
#[utoipa::path(
    get,
    path = "/borrowers/{id}",
    tag = "profiles",
    params(("id" = Uuid, Path, description = "Borrower ID")),
    responses(
        (status = 200, description = "Borrower", body = BorrowerProfile),
        (status = 404, description = "Borrower not found")
    )
)]
pub async fn get_borrower(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BorrowerProfile>> {
    actor.require_admin_or_self(id)?;

    let borrower = state.services.profiles.get_borrower(BorrowerId(id)).await?;
    Ok(Json(borrower))
}

/// The borrower's active loan
#[utoipa::path(
    get,
    path = "/borrowers/{id}/active-loan",
    tag = "profiles",
    params(("id" = Uuid, Path, description = "Borrower ID")),
    responses(
        (status = 200, description = "Active loan", body = Loan),
        (status = 404, description = "No active loan")
    )
)]
pub async fn get_active_loan(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Loan>> {
    actor.require_admin_or_self(id)?;

    let loan = state
        .services
        .loans
        .active_loan_for_borrower(BorrowerId(id))
        .await?;
    Ok(Json(loan))
}

/// Delete a borrower with all of their loans
#[utoipa::path(
    delete,
    path = "/borrowers/{id}",
    tag = "profiles",
    params(("id" = Uuid, Path, description = "Borrower ID")),
    responses(
        (status = 200, description = "Borrower deleted", body = ProfileDeletion),
        (status = 404, description = "Borrower not found"),
        (status = 409, description = "Borrower has an active loan")
    )
)]
pub async fn delete_borrower(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ProfileDeletion>> {
    actor.require_admin()?;

    let deletion = state
        .services
        .profiles
        .delete_profile(actor.0, ProfileRef::Borrower(BorrowerId(id)))
        .await?;
    Ok(Json(deletion))
}
