//! Payment submission and review endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        ActorRole, BorrowerId, LenderId, Payment, PaymentId, PaymentQuery, RejectPayment,
        Settlement, SubmitPayment,
    },
};

use super::AuthenticatedActor;

/// Paginated payments response
#[derive(Serialize, ToSchema)]
pub struct PaymentsListResponse {
    pub payments: Vec<Payment>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Submit a payment against the borrower's active loan
#[utoipa::path(
    post,
    path = "/payments",
    tag = "payments",
    request_body = SubmitPayment,
    responses(
        (status = 201, description = "Payment submitted for review", body = Payment),
        (status = 400, description = "Amount does not match the installments"),
        (status = 404, description = "No active loan")
    )
)]
pub async fn submit_payment(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Json(request): Json<SubmitPayment>,
) -> AppResult<(StatusCode, Json<Payment>)> {
    if actor.0.role != ActorRole::Borrower || actor.0.id != request.borrower_id.0 {
        return Err(AppError::Authorization(
            "Only the borrower can submit payments for their loan".to_string(),
        ));
    }

    let payment = state.services.payments.submit(actor.0, request).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// List payments; `status=pending` returns the review queue oldest first
#[utoipa::path(
    get,
    path = "/payments",
    tag = "payments",
    params(PaymentQuery),
    responses(
        (status = 200, description = "Payments list", body = PaymentsListResponse)
    )
)]
pub async fn list_payments(
    State(state): State<crate::AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(mut query): Query<PaymentQuery>,
) -> AppResult<Json<PaymentsListResponse>> {
    match actor.role {
        ActorRole::Lender => query.lender_id = Some(LenderId(actor.id)),
        ActorRole::Borrower => query.borrower_id = Some(BorrowerId(actor.id)),
        ActorRole::Admin | ActorRole::System => {}
    }

    let (payments, total) = state.services.payments.list(&query).await?;
    Ok(Json(PaymentsListResponse {
        payments,
        total,
        page: query.page(),
        per_page: query.per_page(),
    }))
}

/// Get a payment
#[utoipa::path(
    get,
    path = "/payments/{id}",
    tag = "payments",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment", body = Payment),
        (status = 404, description = "Payment not found")
    )
)]
pub async fn get_payment(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Payment>> {
    let payment = state.services.payments.get(PaymentId(id)).await?;

    match actor.0.role {
        ActorRole::Lender => actor.require_admin_or_self(payment.lender_id.0)?,
        ActorRole::Borrower => actor.require_admin_or_self(payment.borrower_id.0)?,
        _ => actor.require_admin()?,
    }
    Ok(Json(payment))
}

/// Approve a pending payment
#[utoipa::path(
    put,
    path = "/payments/{id}/approve",
    tag = "payments",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment approved and settled", body = Settlement),
        (status = 404, description = "Payment not found"),
        (status = 409, description = "Payment already processed")
    )
)]
pub async fn approve_payment(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Settlement>> {
    actor.require_admin()?;

    let settlement = state.services.payments.approve(actor.0, PaymentId(id)).await?;
    Ok(Json(settlement))
}

/// Reject a pending payment
#[utoipa::path(
    put,
    path = "/payments/{id}/reject",
    tag = "payments",
    params(("id" = Uuid, Path, description = "Payment ID")),
    request_body = RejectPayment,
    responses(
        (status = 200, description = "Payment rejected", body = Payment),
        (status = 400, description = "Missing rejection reason"),
        (status = 404, description = "Payment not found"),
        (status = 409, description = "Payment already processed")
    )
)]
pub async fn reject_payment(
    State(state): State<crate::AppState>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectPayment>,
) -> AppResult<Json<Payment>> {
    actor.require_admin()?;

    let payment = state
        .services
        .payments
        .reject(actor.0, PaymentId(id), &request.rejection_reason)
        .await?;
    Ok(Json(payment))
}
