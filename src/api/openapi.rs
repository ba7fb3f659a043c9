//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{dashboard, health, loans, payments, profiles};
use crate::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "EMI Ledger API",
        version = "1.0.0",
        description = "Daily-installment loan ledger and payment settlement REST API. \
                       Callers are identified by the X-Actor-Id and X-Actor-Role headers."
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Loans
        loans::list_loans,
        loans::create_loan,
        loans::get_loan,
        loans::update_loan_status,
        loans::delete_loan,
        loans::sweep_overdue,
        loans::get_loan_stats,
        // Payments
        payments::list_payments,
        payments::submit_payment,
        payments::get_payment,
        payments::approve_payment,
        payments::reject_payment,
        // Profiles
        profiles::create_lender,
        profiles::get_lender,
        profiles::delete_lender,
        profiles::create_borrower,
        profiles::get_borrower,
        profiles::get_active_loan,
        profiles::delete_borrower,
        // Dashboards
        dashboard::lender_dashboard,
        dashboard::borrower_dashboard,
        dashboard::lender_payment_info,
        dashboard::admin_dashboard,
        dashboard::list_audit_logs,
    ),
    components(
        schemas(
            // Identifiers and enums
            models::LoanId,
            models::PaymentId,
            models::LenderId,
            models::BorrowerId,
            models::LoanStatus,
            models::PaymentStatus,
            // Loans
            models::Loan,
            models::CreateLoan,
            models::UpdateLoanStatus,
            models::LoanDetails,
            models::PaymentSummary,
            models::LoanStats,
            models::OverdueSweep,
            loans::LoansListResponse,
            // Payments
            models::Payment,
            models::SubmitPayment,
            models::RejectPayment,
            models::Settlement,
            payments::PaymentsListResponse,
            // Profiles
            models::LenderProfile,
            models::BorrowerProfile,
            models::CreateLender,
            models::CreateBorrower,
            models::ProfileDeletion,
            // Dashboards
            models::LenderDashboard,
            models::LenderSummary,
            models::BorrowerDashboard,
            models::BorrowerPaymentSummary,
            models::AdminDashboard,
            models::DashboardOverview,
            models::DashboardFinancials,
            models::LoanStatusCounts,
            models::LenderPaymentInfo,
            // Audit
            models::Actor,
            models::ActorRole,
            models::AuditAction,
            models::EntityKind,
            models::AuditEntry,
            dashboard::AuditLogsResponse,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "loans", description = "Loan lifecycle management"),
        (name = "payments", description = "Payment submission and settlement"),
        (name = "profiles", description = "Lender and borrower profiles"),
        (name = "dashboards", description = "Role dashboards and the audit trail")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
