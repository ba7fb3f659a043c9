//! Data models for the EMI ledger

pub mod audit;
pub mod dashboard;
pub mod enums;
pub mod ids;
pub mod loan;
pub mod payment;
pub mod profile;

use rust_decimal::Decimal;
use validator::ValidationError;

// Re-export commonly used types
pub use audit::{Actor, AuditEntry, AuditQuery};
pub use dashboard::{
    AdminDashboard, BorrowerDashboard, BorrowerPaymentSummary, DashboardFinancials,
    DashboardOverview, LedgerCounts, LenderDashboard, LenderPaymentInfo, LenderSummary,
    LoanStatusCounts,
};
pub use enums::{ActorRole, AuditAction, EntityKind, LoanStatus, PaymentStatus};
pub use ids::{BorrowerId, LenderId, LoanId, PaymentId};
pub use loan::{
    CreateLoan, Loan, LoanDetails, LoanQuery, LoanStats, OverdueSweep, PaymentSummary,
    UpdateLoanStatus,
};
pub use payment::{Payment, PaymentQuery, RejectPayment, Settlement, SubmitPayment};
pub use profile::{
    BorrowerProfile, CreateBorrower, CreateLender, LenderProfile, ProfileDeletion, ProfileRef,
};

/// Monetary amounts must be strictly positive, carry at most two decimal
/// places and fit a NUMERIC(18,2) column
pub(crate) fn validate_positive_amount(value: &Decimal) -> Result<(), ValidationError> {
    let fail = |code: &'static str, message: &'static str| {
        let mut err = ValidationError::new(code);
        err.message = Some(message.into());
        Err(err)
    };

    if !value.is_sign_positive() || value.is_zero() {
        return fail("positive", "Amount must be greater than zero");
    }
    if value.normalize().scale() > 2 {
        return fail("scale", "Amount must have at most two decimal places");
    }
    if *value > crate::ledger::max_amount() {
        return fail("range", "Amount must have at most 16 integer digits");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_positive_amounts() {
        for amount in [dec!(0.01), dec!(100), dec!(33.30), dec!(33.300), dec!(9999999999999999.99)] {
            assert!(validate_positive_amount(&amount).is_ok(), "{}", amount);
        }
    }

    #[test]
    fn test_rejected_amounts() {
        let code = |amount: Decimal| validate_positive_amount(&amount).unwrap_err().code;

        assert_eq!(code(dec!(0)), "positive");
        assert_eq!(code(dec!(-5)), "positive");
        assert_eq!(code(dec!(33.335)), "scale");
        assert_eq!(code(dec!(0.001)), "scale");
        assert_eq!(code(dec!(10000000000000000)), "range");
        assert_eq!(code(Decimal::MAX), "range");
    }
}
