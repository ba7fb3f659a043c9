//! Loan model and related types

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::enums::LoanStatus;
use super::ids::{BorrowerId, LenderId, LoanId};
use super::payment::Payment;
use super::validate_positive_amount;

/// Loan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub lender_id: LenderId,
    /// Administrator who issued the loan
    pub created_by: Uuid,
    pub principal_amount: Decimal,
    pub total_days: i32,
    pub emi_per_day: Decimal,
    pub start_date: NaiveDate,
    /// start_date + total_days
    pub end_date: NaiveDate,
    pub status: LoanStatus,
    pub total_amount_repaid: Decimal,
    /// principal - repaid while not closed, zero once closed
    pub remaining_balance: Decimal,
    pub next_due_date: NaiveDate,
    pub days_overdue: i32,
    pub admin_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    /// Balance implied by principal and approved repayments
    pub fn outstanding(&self) -> Decimal {
        self.principal_amount - self.total_amount_repaid
    }
}

/// Create loan request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateLoan {
    pub borrower_id: BorrowerId,
    pub lender_id: LenderId,
    #[validate(custom(function = "validate_positive_amount"))]
    pub principal_amount: Decimal,
    #[validate(range(min = 1, max = 3650, message = "total_days must be between 1 and 3650"))]
    pub total_days: i32,
    #[validate(custom(function = "validate_positive_amount"))]
    pub emi_per_day: Decimal,
    pub start_date: NaiveDate,
}

/// Loan status change request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateLoanStatus {
    /// One of active, closed, defaulted
    pub status: String,
    /// Replaces the admin notes when present
    pub notes: Option<String>,
}

/// Query parameters for loans
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
pub struct LoanQuery {
    pub status: Option<LoanStatus>,
    pub lender_id: Option<LenderId>,
    pub borrower_id: Option<BorrowerId>,
    /// Case-insensitive substring of the loan identifier
    pub loan_id: Option<String>,
    /// Page number (1-based)
    pub page: Option<i64>,
    /// Items per page
    pub per_page: Option<i64>,
}

impl LoanQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(10).clamp(1, 200)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }

    pub fn matches(&self, loan: &Loan) -> bool {
        self.status.map_or(true, |s| loan.status == s)
            && self.lender_id.map_or(true, |id| loan.lender_id == id)
            && self.borrower_id.map_or(true, |id| loan.borrower_id == id)
            && self.loan_id.as_ref().map_or(true, |fragment| {
                loan.loan_id
                    .as_str()
                    .to_ascii_lowercase()
                    .contains(&fragment.to_ascii_lowercase())
            })
    }
}

/// Payment figures for a single loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentSummary {
    pub total_paid: Decimal,
    pub remaining_balance: Decimal,
    pub total_payments: i64,
    pub approved_payments: i64,
    pub pending_payments: i64,
    pub rejected_payments: i64,
    pub days_overdue: i32,
    /// Days until end_date, never negative
    pub remaining_days: i64,
}

/// Loan with its payment history
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    pub loan: Loan,
    pub payment_summary: PaymentSummary,
    /// Newest first
    pub payment_history: Vec<Payment>,
}

/// Portfolio-wide loan figures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LoanStats {
    pub total_loans: i64,
    pub active_loans: i64,
    pub closed_loans: i64,
    pub defaulted_loans: i64,
    pub total_amount_lent: Decimal,
    pub total_amount_repaid: Decimal,
    /// Sum of remaining balances
    pub outstanding_balance: Decimal,
    /// Loans created in the last 30 days
    pub recent_loans: i64,
}

/// Outcome of one overdue sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OverdueSweep {
    /// Active loans found past their due date
    pub examined: u64,
    /// Loans whose overdue figures were written
    pub updated: u64,
    /// Loans moved to defaulted
    pub defaulted: u64,
    /// Loans left untouched because their update failed
    pub failed: u64,
}
