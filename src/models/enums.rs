//! Shared domain enums

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

// ---------------------------------------------------------------------------
// LoanStatus
// ---------------------------------------------------------------------------

/// Loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Active,
    Closed,
    Defaulted,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::Closed => "closed",
            LoanStatus::Defaulted => "defaulted",
        }
    }
}

impl FromStr for LoanStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(LoanStatus::Active),
            "closed" => Ok(LoanStatus::Closed),
            "defaulted" => Ok(LoanStatus::Defaulted),
            other => Err(AppError::InvalidState(format!(
                "Invalid loan status '{}'. Must be one of: active, closed, defaulted",
                other
            ))),
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PaymentStatus
// ---------------------------------------------------------------------------

/// Payment review status. Approved and rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ActorRole
// ---------------------------------------------------------------------------

/// Role of the caller on whose behalf an operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Admin,
    Lender,
    Borrower,
    /// Scheduled maintenance jobs
    System,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Admin => "admin",
            ActorRole::Lender => "lender",
            ActorRole::Borrower => "borrower",
            ActorRole::System => "system",
        }
    }

    /// Role as written to the audit trail, `system` included
    pub fn from_stored(s: &str) -> Option<Self> {
        [ActorRole::Admin, ActorRole::Lender, ActorRole::Borrower, ActorRole::System]
            .into_iter()
            .find(|role| role.as_str() == s)
    }
}

impl FromStr for ActorRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(ActorRole::Admin),
            "lender" => Ok(ActorRole::Lender),
            "borrower" => Ok(ActorRole::Borrower),
            other => Err(AppError::Authentication(format!("Unknown actor role '{}'", other))),
        }
    }
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Audit vocabulary
// ---------------------------------------------------------------------------

/// Kind of mutation recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    LoanCreate,
    LoanStatusUpdate,
    LoanDelete,
    LoanOverdueSweep,
    PaymentSubmit,
    PaymentApprove,
    PaymentReject,
    LenderCreate,
    BorrowerCreate,
    ProfileDelete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoanCreate => "LOAN_CREATE",
            AuditAction::LoanStatusUpdate => "LOAN_STATUS_UPDATE",
            AuditAction::LoanDelete => "LOAN_DELETE",
            AuditAction::LoanOverdueSweep => "LOAN_OVERDUE_SWEEP",
            AuditAction::PaymentSubmit => "PAYMENT_SUBMIT",
            AuditAction::PaymentApprove => "PAYMENT_APPROVE",
            AuditAction::PaymentReject => "PAYMENT_REJECT",
            AuditAction::LenderCreate => "LENDER_CREATE",
            AuditAction::BorrowerCreate => "BORROWER_CREATE",
            AuditAction::ProfileDelete => "PROFILE_DELETE",
        }
    }

    pub const ALL: [AuditAction; 10] = [
        AuditAction::LoanCreate,
        AuditAction::LoanStatusUpdate,
        AuditAction::LoanDelete,
        AuditAction::LoanOverdueSweep,
        AuditAction::PaymentSubmit,
        AuditAction::PaymentApprove,
        AuditAction::PaymentReject,
        AuditAction::LenderCreate,
        AuditAction::BorrowerCreate,
        AuditAction::ProfileDelete,
    ];

    pub fn from_stored(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == s)
    }
}

/// Entity an audit entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum EntityKind {
    Loan,
    Payment,
    Lender,
    Borrower,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Loan => "Loan",
            EntityKind::Payment => "Payment",
            EntityKind::Lender => "Lender",
            EntityKind::Borrower => "Borrower",
        }
    }

    pub fn from_stored(s: &str) -> Option<Self> {
        [EntityKind::Loan, EntityKind::Payment, EntityKind::Lender, EntityKind::Borrower]
            .into_iter()
            .find(|kind| kind.as_str() == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loan_status_parse() {
        assert_eq!("Active".parse::<LoanStatus>().unwrap(), LoanStatus::Active);
        assert_eq!(" closed ".parse::<LoanStatus>().unwrap(), LoanStatus::Closed);
        assert!(matches!(
            "pending".parse::<LoanStatus>(),
            Err(AppError::InvalidState(_))
        ));
    }

    #[test]
    fn test_payment_terminal_states() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Approved.is_terminal());
        assert!(PaymentStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_system_role_cannot_be_claimed() {
        assert!("system".parse::<ActorRole>().is_err());
        assert_eq!("ADMIN".parse::<ActorRole>().unwrap(), ActorRole::Admin);
    }

    #[test]
    fn test_audit_action_wire_names() {
        let json = serde_json::to_string(&AuditAction::PaymentApprove).unwrap();
        assert_eq!(json, "\"PAYMENT_APPROVE\"");
        assert_eq!(AuditAction::PaymentApprove.as_str(), "PAYMENT_APPROVE");
    }

    #[test]
    fn test_stored_names_read_back() {
        for action in AuditAction::ALL {
            assert_eq!(AuditAction::from_stored(action.as_str()), Some(action));
        }
        assert_eq!(ActorRole::from_stored("system"), Some(ActorRole::System));
        assert_eq!(EntityKind::from_stored("Payment"), Some(EntityKind::Payment));
        assert_eq!(EntityKind::from_stored("payment"), None);
    }
}
