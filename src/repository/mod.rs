//! Ledger store: persistence for loans, payments and profile aggregates.
//!
//! Every mutation goes through a [`LedgerTx`] unit of work obtained from
//! [`LedgerStore::begin`]. Reads taken through a transaction lock the rows
//! they return until it ends; dropping a transaction without calling
//! [`LedgerTx::commit`] discards all of its writes.

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::{
    error::{AppError, AppResult},
    ledger::LenderDelta,
    models::{
        BorrowerId, BorrowerProfile, LedgerCounts, LenderId, LenderProfile, Loan, LoanId,
        LoanQuery, LoanStats, Payment, PaymentId, PaymentQuery,
    },
};

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Storage backend for the ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>>;

    async fn get_loan(&self, id: &LoanId) -> AppResult<Option<Loan>>;

    async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<Loan>, i64)>;

    /// Active loans whose next due date lies before `today`
    async fn overdue_loan_ids(&self, today: NaiveDate) -> AppResult<Vec<LoanId>>;

    async fn loan_stats(&self, recent_since: DateTime<Utc>) -> AppResult<LoanStats>;

    async fn get_payment(&self, id: PaymentId) -> AppResult<Option<Payment>>;

    /// Payments of one loan, newest first
    async fn loan_payments(&self, loan_id: &LoanId) -> AppResult<Vec<Payment>>;

    async fn list_payments(&self, query: &PaymentQuery) -> AppResult<(Vec<Payment>, i64)>;

    async fn get_lender(&self, id: LenderId) -> AppResult<Option<LenderProfile>>;

    async fn get_borrower(&self, id: BorrowerId) -> AppResult<Option<BorrowerProfile>>;

    /// Active loans of one lender, newest first
    async fn active_loans_for_lender(&self, id: LenderId) -> AppResult<Vec<Loan>>;

    /// Latest approvals first, optionally only one lender's
    async fn recent_approved_payments(
        &self,
        lender_id: Option<LenderId>,
        limit: i64,
    ) -> AppResult<Vec<Payment>>;

    /// Profile and review-queue counts, plus the amount approved since `since`
    async fn ledger_counts(&self, since: DateTime<Utc>) -> AppResult<LedgerCounts>;

    /// Checks that the store is reachable
    async fn ping(&self) -> AppResult<()>;
}

/// One atomic unit of work against the ledger
#[async_trait]
pub trait LedgerTx: Send {
    // Profiles

    async fn lock_lender(&mut self, id: LenderId) -> AppResult<Option<LenderProfile>>;

    async fn lock_borrower(&mut self, id: BorrowerId) -> AppResult<Option<BorrowerProfile>>;

    async fn insert_lender(&mut self, lender: &LenderProfile) -> AppResult<()>;

    async fn insert_borrower(&mut self, borrower: &BorrowerProfile) -> AppResult<()>;

    async fn delete_lender(&mut self, id: LenderId) -> AppResult<()>;

    async fn delete_borrower(&mut self, id: BorrowerId) -> AppResult<()>;

    /// Add `delta` to the lender's aggregate fields
    async fn apply_lender_delta(&mut self, id: LenderId, delta: LenderDelta) -> AppResult<()>;

    /// Add `amount` to the borrower's `total_borrowed`
    async fn adjust_borrowed(&mut self, id: BorrowerId, amount: Decimal) -> AppResult<()>;

    // Loans

    /// Allocate the next loan sequence number for `day`. Allocations on the
    /// same day are serialized until this transaction ends.
    async fn next_loan_sequence(&mut self, day: NaiveDate) -> AppResult<u32>;

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()>;

    async fn lock_loan(&mut self, id: &LoanId) -> AppResult<Option<Loan>>;

    async fn active_loan_for_borrower(&mut self, id: BorrowerId) -> AppResult<Option<Loan>>;

    async fn lock_loans_for_lender(&mut self, id: LenderId) -> AppResult<Vec<Loan>>;

    async fn lock_loans_for_borrower(&mut self, id: BorrowerId) -> AppResult<Vec<Loan>>;

    /// Persist every mutable field of `loan`
    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()>;

    async fn delete_loan(&mut self, id: &LoanId) -> AppResult<()>;

    // Payments

    async fn insert_payment(&mut self, payment: &Payment) -> AppResult<()>;

    async fn lock_payment(&mut self, id: PaymentId) -> AppResult<Option<Payment>>;

    /// Persist the review fields of `payment`
    async fn update_payment(&mut self, payment: &Payment) -> AppResult<()>;

    /// Delete the loan's payments and return them
    async fn delete_payments_for_loan(&mut self, id: &LoanId) -> AppResult<Vec<Payment>>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Shared handle to the configured store
pub type Repository = Arc<dyn LedgerStore>;

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `attempts` runs are used up
pub async fn retry_transient<T, F, Fut>(attempts: u32, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(AppError::Transient(msg)) if attempt < attempts => {
                tracing::warn!("Transaction attempt {}/{} failed, retrying: {}", attempt, attempts, msg);
                attempt += 1;
            }
            result => return result,
        }
    }
}
