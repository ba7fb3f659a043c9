//! Ledger rules: pure state transitions over loans and payments.
//!
//! Nothing in here touches storage. Every function mutates the records it is
//! handed and reports the change the lender aggregate must absorb, so that the
//! services can write both inside one unit of work.

pub mod lifecycle;
pub mod loan_id;
pub mod settlement;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Longest loan term, and most installments one payment may cover
pub const MAX_TERM_DAYS: i32 = 3650;

/// Largest magnitude a NUMERIC(18,2) amount column holds
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999_999_999, 2)
}

/// Keep a computed amount inside the storable range
pub fn bounded_amount(value: Option<Decimal>, what: &str) -> AppResult<Decimal> {
    match value {
        Some(amount) if amount.abs() <= max_amount() => Ok(amount),
        _ => Err(AppError::Validation(format!("{} is out of range", what))),
    }
}

/// Change to apply to a lender's aggregate fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LenderDelta {
    pub total_amount_lent: Decimal,
    pub active_loans_count: i32,
    pub total_earnings: Decimal,
}

impl LenderDelta {
    pub fn active_loans(count: i32) -> Self {
        Self {
            active_loans_count: count,
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_amount_lent.is_zero()
            && self.active_loans_count == 0
            && self.total_earnings.is_zero()
    }

    /// Sum two deltas, failing instead of overflowing
    pub fn checked_add(self, rhs: Self) -> AppResult<Self> {
        Ok(Self {
            total_amount_lent: bounded_amount(
                self.total_amount_lent.checked_add(rhs.total_amount_lent),
                "Total amount lent",
            )?,
            active_loans_count: self
                .active_loans_count
                .checked_add(rhs.active_loans_count)
                .ok_or_else(|| AppError::Validation("Active loan count is out of range".to_string()))?,
            total_earnings: bounded_amount(
                self.total_earnings.checked_add(rhs.total_earnings),
                "Total earnings",
            )?,
        })
    }

    /// Fold this delta into a lender's current aggregate values
    pub fn apply_to(&self, lent: &mut Decimal, active: &mut i32, earnings: &mut Decimal) -> AppResult<()> {
        let current = LenderDelta {
            total_amount_lent: *lent,
            active_loans_count: *active,
            total_earnings: *earnings,
        };
        let next = current.checked_add(*self)?;
        *lent = next.total_amount_lent;
        *active = next.active_loans_count;
        *earnings = next.total_earnings;
        Ok(())
    }
}
