//! Role dashboards and the borrower's payment destination

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::{
    ids::LenderId,
    loan::Loan,
    payment::Payment,
    profile::{BorrowerProfile, LenderProfile},
};

/// Figures over a lender's active loans
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LenderSummary {
    pub total_active_loans: i64,
    /// Sum of remaining balances over active loans
    pub total_amount_recoverable: Decimal,
    /// Sum of the recent approved payments listed alongside
    pub recent_earnings: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LenderDashboard {
    pub lender: LenderProfile,
    pub summary: LenderSummary,
    /// Newest first
    pub active_loans: Vec<Loan>,
    /// Latest approvals first
    pub recent_payments: Vec<Payment>,
}

/// Repayment position of a borrower's active loan; zeroed without one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BorrowerPaymentSummary {
    pub total_paid: Decimal,
    pub remaining_balance: Decimal,
    pub next_due_date: Option<NaiveDate>,
    pub days_overdue: i32,
    pub emi_per_day: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BorrowerDashboard {
    pub borrower: BorrowerProfile,
    pub active_loan: Option<Loan>,
    pub payment_summary: BorrowerPaymentSummary,
}

/// Ledger-wide counts that live outside the loans table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LedgerCounts {
    pub total_lenders: i64,
    pub total_borrowers: i64,
    pub pending_payments: i64,
    /// Approved amounts since the requested instant
    pub approved_since: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DashboardOverview {
    pub total_lenders: i64,
    pub total_borrowers: i64,
    pub total_loans: i64,
    pub active_loans: i64,
    pub pending_payments: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DashboardFinancials {
    pub total_amount_lent: Decimal,
    pub total_amount_repaid: Decimal,
    /// Approved in the last seven days
    pub weekly_earnings: Decimal,
    pub outstanding_balance: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LoanStatusCounts {
    pub active: i64,
    pub closed: i64,
    pub defaulted: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminDashboard {
    pub overview: DashboardOverview,
    pub financials: DashboardFinancials,
    pub loan_status: LoanStatusCounts,
    /// Latest submissions first
    pub recent_payments: Vec<Payment>,
}

/// Where a borrower sends installments for the active loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LenderPaymentInfo {
    pub lender_id: LenderId,
    pub lender_name: String,
    pub upi_id: String,
    pub qr_code_url: String,
    pub emi_per_day: Decimal,
}
