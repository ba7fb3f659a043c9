//! Payment model and related types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::enums::PaymentStatus;
use super::ids::{BorrowerId, LenderId, LoanId, PaymentId};
use super::validate_positive_amount;

/// Payment record submitted by a borrower
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Payment {
    pub id: PaymentId,
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub lender_id: LenderId,
    pub amount: Decimal,
    /// Number of daily installments covered
    pub for_days: i32,
    /// Reference to externally stored proof of payment
    pub screenshot_url: String,
    pub status: PaymentStatus,
    pub payment_date: DateTime<Utc>,
    pub admin_approval_date: Option<DateTime<Utc>>,
    pub approver_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub utr_number: Option<String>,
}

/// Borrower payment submission
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SubmitPayment {
    pub borrower_id: BorrowerId,
    #[validate(custom(function = "validate_positive_amount"))]
    pub amount: Decimal,
    #[validate(range(min = 1, max = 3650, message = "for_days must be between 1 and 3650"))]
    pub for_days: i32,
    /// URL already resolved by the file storage collaborator
    #[validate(length(min = 1, message = "Payment screenshot is required"))]
    pub screenshot_url: String,
    pub utr_number: Option<String>,
}

/// Payment rejection request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RejectPayment {
    pub rejection_reason: String,
}

/// Outcome of an approval: the payment and the loan it settled against
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Settlement {
    pub payment: Payment,
    pub loan: super::loan::Loan,
}

/// Query parameters for payments
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
pub struct PaymentQuery {
    pub status: Option<PaymentStatus>,
    pub loan_id: Option<LoanId>,
    pub borrower_id: Option<BorrowerId>,
    pub lender_id: Option<LenderId>,
    /// Submitted at or after
    pub start_date: Option<DateTime<Utc>>,
    /// Submitted at or before
    pub end_date: Option<DateTime<Utc>>,
    /// Page number (1-based)
    pub page: Option<i64>,
    /// Items per page
    pub per_page: Option<i64>,
}

impl PaymentQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(10).clamp(1, 200)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }

    /// The review queue is served oldest first, everything else newest first
    pub fn oldest_first(&self) -> bool {
        self.status == Some(PaymentStatus::Pending)
    }

    pub fn matches(&self, payment: &Payment) -> bool {
        self.status.map_or(true, |s| payment.status == s)
            && self.loan_id.as_ref().map_or(true, |id| &payment.loan_id == id)
            && self.borrower_id.map_or(true, |id| payment.borrower_id == id)
            && self.lender_id.map_or(true, |id| payment.lender_id == id)
            && self.start_date.map_or(true, |d| payment.payment_date >= d)
            && self.end_date.map_or(true, |d| payment.payment_date <= d)
    }
}
