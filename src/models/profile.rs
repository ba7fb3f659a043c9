//! Lender and borrower profiles with their ledger aggregates

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::ids::{BorrowerId, LenderId};

/// Lender profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LenderProfile {
    pub id: LenderId,
    pub name: String,
    pub phone_number: String,
    pub upi_id: String,
    pub upi_qr_code_url: String,
    /// Sum of principal over the lender's loans
    pub total_amount_lent: Decimal,
    /// Number of the lender's loans in active status
    pub active_loans_count: i32,
    /// Sum of approved payments over the lender's loans
    pub total_earnings: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Borrower profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BorrowerProfile {
    pub id: BorrowerId,
    pub name: String,
    pub address: String,
    pub phone_number: String,
    pub credit_score: i32,
    /// Sum of principal over the borrower's loans
    pub total_borrowed: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Create lender request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateLender {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 6, message = "Phone number is too short"))]
    pub phone_number: String,
    #[validate(length(min = 3, message = "UPI id is required"))]
    pub upi_id: String,
    /// QR code URL resolved by the file storage collaborator
    #[validate(length(min = 1, message = "UPI QR code is required"))]
    pub upi_qr_code_url: String,
}

/// Create borrower request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBorrower {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 6, message = "Phone number is too short"))]
    pub phone_number: String,
    #[validate(range(min = 0, max = 1000))]
    pub credit_score: Option<i32>,
}

/// A profile on either side of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ProfileRef {
    Lender(LenderId),
    Borrower(BorrowerId),
}

/// What a profile deletion removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProfileDeletion {
    pub loans_deleted: u64,
    pub payments_deleted: u64,
}
