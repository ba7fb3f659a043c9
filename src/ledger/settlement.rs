//! Payment submission checks and the approve/reject transitions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{bounded_amount, lifecycle, LenderDelta, MAX_TERM_DAYS};
use crate::{
    error::{AppError, AppResult},
    models::{Loan, LoanStatus, Payment, PaymentId, PaymentStatus, SubmitPayment},
};

/// Amount owed for `for_days` installments
pub fn expected_amount(loan: &Loan, for_days: i32) -> AppResult<Decimal> {
    bounded_amount(
        loan.emi_per_day.checked_mul(Decimal::from(for_days)),
        "Installment total",
    )
}

/// Check a submission against the borrower's active loan.
///
/// The amount must equal `emi_per_day * for_days` exactly and must not
/// exceed the remaining balance.
pub fn check_submission(loan: &Loan, amount: Decimal, for_days: i32) -> AppResult<()> {
    if !loan.is_active() {
        return Err(AppError::InvalidState(format!("Loan {} is not active", loan.loan_id)));
    }
    if for_days < 1 || for_days > MAX_TERM_DAYS {
        return Err(AppError::Validation(format!(
            "for_days must be between 1 and {}",
            MAX_TERM_DAYS
        )));
    }

    let expected = expected_amount(loan, for_days)?;
    if amount != expected {
        return Err(AppError::Validation(format!(
            "Payment amount should be exactly {} for {} day(s)",
            expected.normalize(),
            for_days
        )));
    }
    if amount > loan.remaining_balance {
        return Err(AppError::Validation(
            "Payment amount exceeds remaining loan balance".to_string(),
        ));
    }
    Ok(())
}

/// Pending payment record for a validated submission
pub fn new_payment(loan: &Loan, request: &SubmitPayment, now: DateTime<Utc>) -> Payment {
    Payment {
        id: PaymentId::new(),
        loan_id: loan.loan_id.clone(),
        borrower_id: loan.borrower_id,
        lender_id: loan.lender_id,
        amount: request.amount,
        for_days: request.for_days,
        screenshot_url: request.screenshot_url.clone(),
        status: PaymentStatus::Pending,
        payment_date: now,
        admin_approval_date: None,
        approver_id: None,
        rejection_reason: None,
        utr_number: request
            .utr_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    }
}

fn ensure_pending(payment: &Payment) -> AppResult<()> {
    if payment.status.is_terminal() {
        return Err(AppError::InvalidState(format!(
            "Payment {} already processed ({})",
            payment.id, payment.status
        )));
    }
    Ok(())
}

/// Approve `payment` and settle it against `loan`.
///
/// Credits the loan, advances the next due date by the days covered and
/// closes the loan once nothing remains. The returned delta carries the
/// lender's earnings and, on closure, the active count decrement.
pub fn approve(
    payment: &mut Payment,
    loan: &mut Loan,
    approver: Uuid,
    now: DateTime<Utc>,
) -> AppResult<LenderDelta> {
    ensure_pending(payment)?;
    if payment.loan_id != loan.loan_id {
        return Err(AppError::Internal(format!(
            "Payment {} does not belong to loan {}",
            payment.id, loan.loan_id
        )));
    }
    if loan.status == LoanStatus::Closed {
        return Err(AppError::InvalidState(format!(
            "Loan {} is already closed",
            loan.loan_id
        )));
    }

    let total_amount_repaid = bounded_amount(
        loan.total_amount_repaid.checked_add(payment.amount),
        "Total amount repaid",
    )?;
    let remaining_balance = bounded_amount(
        loan.remaining_balance.checked_sub(payment.amount),
        "Remaining balance",
    )?;
    let next_due_date = lifecycle::add_days(loan.next_due_date, payment.for_days)?;

    payment.status = PaymentStatus::Approved;
    payment.approver_id = Some(approver);
    payment.admin_approval_date = Some(now);

    loan.total_amount_repaid = total_amount_repaid;
    loan.remaining_balance = remaining_balance;
    loan.next_due_date = next_due_date;
    loan.updated_at = now;

    let mut delta = LenderDelta {
        total_earnings: payment.amount,
        ..LenderDelta::default()
    };
    if loan.remaining_balance <= Decimal::ZERO {
        if loan.is_active() {
            delta = delta.checked_add(lifecycle::transition(loan, LoanStatus::Closed, now)?)?;
        } else {
            // Paid off while defaulted: closes without touching the active count.
            loan.status = LoanStatus::Closed;
            loan.remaining_balance = Decimal::ZERO;
        }
    }
    Ok(delta)
}

/// Reject a pending payment. The loan and aggregates are untouched.
pub fn reject(payment: &mut Payment, approver: Uuid, reason: &str, now: DateTime<Utc>) -> AppResult<()> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation("Rejection reason is required".to_string()));
    }
    ensure_pending(payment)?;

    payment.status = PaymentStatus::Rejected;
    payment.approver_id = Some(approver);
    payment.admin_approval_date = Some(now);
    payment.rejection_reason = Some(reason.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BorrowerId, CreateLoan, LenderId, LoanId};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn sample_loan() -> Loan {
        let request = CreateLoan {
            borrower_id: BorrowerId::new(),
            lender_id: LenderId::new(),
            principal_amount: dec!(3000),
            total_days: 30,
            emi_per_day: dec!(100),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        lifecycle::new_loan(LoanId::from("LN-20240101-001"), &request, Uuid::nil(), Utc::now())
            .unwrap()
    }

    fn submission(loan: &Loan, amount: Decimal, for_days: i32) -> SubmitPayment {
        SubmitPayment {
            borrower_id: loan.borrower_id,
            amount,
            for_days,
            screenshot_url: "https://files.example/proof.png".to_string(),
            utr_number: Some("  UTR123  ".to_string()),
        }
    }

    #[test]
    fn test_amount_must_match_exactly() {
        let loan = sample_loan();
        assert!(check_submission(&loan, dec!(300), 3).is_ok());
        assert!(check_submission(&loan, dec!(300.00), 3).is_ok());

        for amount in [dec!(299.99), dec!(300.01), dec!(-300), dec!(0), dec!(100000)] {
            assert!(matches!(
                check_submission(&loan, amount, 3),
                Err(AppError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_amount_cannot_exceed_balance() {
        let mut loan = sample_loan();
        loan.remaining_balance = dec!(200);
        loan.total_amount_repaid = dec!(2800);
        assert!(matches!(
            check_submission(&loan, dec!(300), 3),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_inactive_loan_rejects_submission() {
        let mut loan = sample_loan();
        loan.status = LoanStatus::Defaulted;
        assert!(matches!(
            check_submission(&loan, dec!(100), 1),
            Err(AppError::InvalidState(_))
        ));
    }

    #[test]
    fn test_new_payment_trims_utr() {
        let loan = sample_loan();
        let payment = new_payment(&loan, &submission(&loan, dec!(100), 1), Utc::now());
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.utr_number.as_deref(), Some("UTR123"));
        assert_eq!(payment.lender_id, loan.lender_id);
    }

    #[test]
    fn test_approve_credits_loan_and_advances_due_date() {
        let mut loan = sample_loan();
        let mut payment = new_payment(&loan, &submission(&loan, dec!(300), 3), Utc::now());
        let approver = Uuid::new_v4();

        let delta = approve(&mut payment, &mut loan, approver, Utc::now()).unwrap();

        assert_eq!(payment.status, PaymentStatus::Approved);
        assert_eq!(payment.approver_id, Some(approver));
        assert!(payment.admin_approval_date.is_some());
        assert_eq!(loan.total_amount_repaid, dec!(300));
        assert_eq!(loan.remaining_balance, dec!(2700));
        assert_eq!(loan.next_due_date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(delta.total_earnings, dec!(300));
        assert_eq!(delta.active_loans_count, 0);
    }

    #[test]
    fn test_final_payment_closes_loan_once() {
        let mut loan = sample_loan();
        loan.total_amount_repaid = dec!(2900);
        loan.remaining_balance = dec!(100);
        let mut payment = new_payment(&loan, &submission(&loan, dec!(100), 1), Utc::now());

        let delta = approve(&mut payment, &mut loan, Uuid::nil(), Utc::now()).unwrap();

        assert_eq!(loan.status, LoanStatus::Closed);
        assert_eq!(loan.remaining_balance, Decimal::ZERO);
        assert_eq!(delta.active_loans_count, -1);
    }

    #[test]
    fn test_processed_payment_cannot_be_approved_or_rejected() {
        let mut loan = sample_loan();
        let mut payment = new_payment(&loan, &submission(&loan, dec!(100), 1), Utc::now());
        approve(&mut payment, &mut loan, Uuid::nil(), Utc::now()).unwrap();

        assert!(matches!(
            approve(&mut payment, &mut loan, Uuid::nil(), Utc::now()),
            Err(AppError::InvalidState(_))
        ));
        assert!(matches!(
            reject(&mut payment, Uuid::nil(), "duplicate", Utc::now()),
            Err(AppError::InvalidState(_))
        ));
        assert_eq!(loan.total_amount_repaid, dec!(100));
    }

    #[test]
    fn test_reject_requires_reason() {
        let loan = sample_loan();
        let mut payment = new_payment(&loan, &submission(&loan, dec!(100), 1), Utc::now());

        assert!(matches!(
            reject(&mut payment, Uuid::nil(), "   ", Utc::now()),
            Err(AppError::Validation(_))
        ));
        assert_eq!(payment.status, PaymentStatus::Pending);

        reject(&mut payment, Uuid::nil(), "blurry screenshot", Utc::now()).unwrap();
        assert_eq!(payment.status, PaymentStatus::Rejected);
        assert_eq!(payment.rejection_reason.as_deref(), Some("blurry screenshot"));
    }

    #[test]
    fn test_defaulted_loan_paid_off_closes_without_count_change() {
        let mut loan = sample_loan();
        loan.status = LoanStatus::Defaulted;
        loan.total_amount_repaid = dec!(2900);
        loan.remaining_balance = dec!(100);
        let mut payment = new_payment(&loan, &submission(&loan, dec!(100), 1), Utc::now());

        let delta = approve(&mut payment, &mut loan, Uuid::nil(), Utc::now()).unwrap();
        assert_eq!(loan.status, LoanStatus::Closed);
        assert_eq!(delta.active_loans_count, 0);
    }

    #[test]
    fn test_installment_overflow_is_rejected() {
        let mut loan = sample_loan();
        loan.principal_amount = Decimal::MAX;
        loan.emi_per_day = Decimal::MAX;
        loan.remaining_balance = Decimal::MAX;

        assert!(matches!(expected_amount(&loan, 2), Err(AppError::Validation(_))));
        assert!(matches!(
            check_submission(&loan, Decimal::MAX, 2),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_too_many_days_is_rejected() {
        let loan = sample_loan();
        assert!(matches!(
            check_submission(&loan, dec!(100) * Decimal::from(MAX_TERM_DAYS + 1), MAX_TERM_DAYS + 1),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_approval_past_the_calendar_leaves_records_untouched() {
        let mut loan = sample_loan();
        loan.next_due_date = NaiveDate::MAX;
        let mut payment = new_payment(&loan, &submission(&loan, dec!(100), 1), Utc::now());
        let before = loan.clone();

        let err = approve(&mut payment, &mut loan, Uuid::nil(), Utc::now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(loan, before);
    }
}
