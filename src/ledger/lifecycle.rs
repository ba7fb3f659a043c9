//! Loan creation, status transitions, overdue classification and deletion

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{LenderDelta, MAX_TERM_DAYS};
use crate::{
    error::{AppError, AppResult},
    models::{CreateLoan, Loan, LoanId, LoanStatus},
};

/// `date` moved forward by `days`, or a validation error when the calendar
/// runs out
pub fn add_days(date: NaiveDate, days: i32) -> AppResult<NaiveDate> {
    u64::try_from(days)
        .ok()
        .and_then(|days| date.checked_add_days(Days::new(days)))
        .ok_or_else(|| AppError::Validation(format!("{} + {} days is not a valid date", date, days)))
}

/// Build a fresh active loan from a validated request
pub fn new_loan(
    loan_id: LoanId,
    request: &CreateLoan,
    created_by: Uuid,
    now: DateTime<Utc>,
) -> AppResult<Loan> {
    if request.total_days < 1 || request.total_days > MAX_TERM_DAYS {
        return Err(AppError::Validation(format!(
            "total_days must be between 1 and {}",
            MAX_TERM_DAYS
        )));
    }
    let end_date = add_days(request.start_date, request.total_days)?;

    Ok(Loan {
        loan_id,
        borrower_id: request.borrower_id,
        lender_id: request.lender_id,
        created_by,
        principal_amount: request.principal_amount,
        total_days: request.total_days,
        emi_per_day: request.emi_per_day,
        start_date: request.start_date,
        end_date,
        status: LoanStatus::Active,
        total_amount_repaid: Decimal::ZERO,
        remaining_balance: request.principal_amount,
        next_due_date: request.start_date,
        days_overdue: 0,
        admin_notes: String::new(),
        created_at: now,
        updated_at: now,
    })
}

/// Aggregate change caused by issuing `loan`
pub fn creation_delta(loan: &Loan) -> LenderDelta {
    LenderDelta {
        total_amount_lent: loan.principal_amount,
        active_loans_count: 1,
        total_earnings: Decimal::ZERO,
    }
}

/// Aggregate change caused by deleting `loan` whose approved payments sum to
/// `approved_total`
pub fn deletion_delta(loan: &Loan, approved_total: Decimal) -> LenderDelta {
    LenderDelta {
        total_amount_lent: -loan.principal_amount,
        active_loans_count: if loan.is_active() { -1 } else { 0 },
        total_earnings: -approved_total,
    }
}

/// Move `loan` to `target` and return the lender aggregate change.
///
/// | from              | to                | active count |
/// |-------------------|-------------------|--------------|
/// | active            | closed, defaulted | -1           |
/// | closed, defaulted | active            | +1           |
/// | defaulted         | closed            | 0            |
/// | closed            | defaulted         | 0            |
/// | same              | same              | 0            |
///
/// Closing zeroes the balance; reopening a closed loan, or marking it
/// defaulted, restores principal minus repaid.
pub fn transition(loan: &mut Loan, target: LoanStatus, now: DateTime<Utc>) -> AppResult<LenderDelta> {
    use LoanStatus::*;

    let delta = match (loan.status, target) {
        (Active, Active) | (Closed, Closed) | (Defaulted, Defaulted) => 0,
        (Active, Closed) => {
            loan.remaining_balance = Decimal::ZERO;
            -1
        }
        (Active, Defaulted) => -1,
        (Closed, Active) => {
            loan.remaining_balance = loan.outstanding();
            1
        }
        (Defaulted, Active) => 1,
        (Defaulted, Closed) => {
            loan.remaining_balance = Decimal::ZERO;
            0
        }
        (Closed, Defaulted) => {
            loan.remaining_balance = loan.outstanding();
            0
        }
    };

    loan.status = target;
    loan.updated_at = now;
    Ok(LenderDelta::active_loans(delta))
}

/// Whole days `next_due_date` lies before `today`, if it does
pub fn days_overdue(next_due_date: NaiveDate, today: NaiveDate) -> Option<i64> {
    let days = (today - next_due_date).num_days();
    (days > 0).then_some(days)
}

/// Result of classifying one loan during the overdue sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverdueUpdate {
    pub days_overdue: i32,
    pub defaulted: bool,
    pub delta: LenderDelta,
}

/// Recompute `days_overdue` for an active loan and default it once it is
/// more than `threshold_days` behind. Returns `None` when the loan is not
/// active or not overdue.
pub fn classify_overdue(
    loan: &mut Loan,
    today: NaiveDate,
    threshold_days: i64,
    now: DateTime<Utc>,
) -> AppResult<Option<OverdueUpdate>> {
    if !loan.is_active() {
        return Ok(None);
    }
    let Some(days) = days_overdue(loan.next_due_date, today) else {
        return Ok(None);
    };

    loan.days_overdue = i32::try_from(days).unwrap_or(i32::MAX);
    loan.updated_at = now;

    let mut update = OverdueUpdate {
        days_overdue: loan.days_overdue,
        defaulted: false,
        delta: LenderDelta::default(),
    };
    if days > threshold_days {
        update.delta = transition(loan, LoanStatus::Defaulted, now)?;
        update.defaulted = true;
    }
    Ok(Some(update))
}

/// Days left until the loan's end date, never negative
pub fn remaining_days(loan: &Loan, today: NaiveDate) -> i64 {
    (loan.end_date - today).num_days().max(0)
}
