//! API handlers for the EMI ledger REST endpoints

pub mod dashboard;
pub mod health;
pub mod loans;
pub mod openapi;
pub mod payments;
pub mod profiles;

use std::str::FromStr;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Actor, ActorRole},
    AppState,
};

/// Header carrying the caller's profile or account id
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Header carrying the caller's role
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Caller identity established by the upstream authentication gateway.
///
/// Lenders and borrowers are identified by their profile id; administrators
/// by their account id.
pub struct AuthenticatedActor(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        let id = Uuid::parse_str(header(parts, ACTOR_ID_HEADER)?.trim())
            .map_err(|_| AppError::Authentication("Invalid actor id".to_string()))?;
        let role = ActorRole::from_str(header(parts, ACTOR_ROLE_HEADER)?)?;

        Ok(AuthenticatedActor(Actor::new(id, role)))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> AppResult<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Authentication(format!("Missing {} header", name)))
}

impl AuthenticatedActor {
    pub fn require_admin(&self) -> AppResult<()> {
        if self.0.role == ActorRole::Admin {
            Ok(())
        } else {
            Err(AppError::Authorization("Administrator role required".to_string()))
        }
    }

    /// Admins, or the lender/borrower whose profile id is `owner`
    pub fn require_admin_or_self(&self, owner: Uuid) -> AppResult<()> {
        match self.0.role {
            ActorRole::Admin => Ok(()),
            ActorRole::Lender | ActorRole::Borrower if self.0.id == owner => Ok(()),
            _ => Err(AppError::Authorization(
                "Not allowed to access this profile".to_string(),
            )),
        }
    }
}

/// Build the application router with all routes
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Loans
        .route("/loans", get(loans::list_loans).post(loans::create_loan))
        .route("/loans/stats", get(loans::get_loan_stats))
        .route("/loans/sweep-overdue", post(loans::sweep_overdue))
        .route("/loans/:loan_id", get(loans::get_loan).delete(loans::delete_loan))
        .route("/loans/:loan_id/status", put(loans::update_loan_status))
        // Payments
        .route("/payments", get(payments::list_payments).post(payments::submit_payment))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:id/approve", put(payments::approve_payment))
        .route("/payments/:id/reject", put(payments::reject_payment))
        // Profiles
        .route("/lenders", post(profiles::create_lender))
        .route("/lenders/:id", get(profiles::get_lender).delete(profiles::delete_lender))
        .route("/borrowers", post(profiles::create_borrower))
        .route("/borrowers/:id", get(profiles::get_borrower).delete(profiles::delete_borrower))
        .route("/borrowers/:id/active-loan", get(profiles::get_active_loan))
        // Dashboards
        .route("/admin/dashboard", get(dashboard::admin_dashboard))
        .route("/lenders/:id/dashboard", get(dashboard::lender_dashboard))
        .route("/borrowers/:id/dashboard", get(dashboard::borrower_dashboard))
        .route("/borrowers/:id/lender-qr", get(dashboard::lender_payment_info))
        .route("/audit-logs", get(dashboard::list_audit_logs))
        .with_state(state);

    // OpenAPI documentation
    let openapi = openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
