//! In-memory ledger store.
//!
//! A transaction takes the store's lock for its whole lifetime and works on a
//! private copy of the ledger, which replaces the shared state on commit.
//! Units of work are therefore executed one at a time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LedgerStore, LedgerTx};
use crate::{
    error::{AppError, AppResult},
    ledger::{bounded_amount, loan_id, LenderDelta},
    models::{
        BorrowerId, BorrowerProfile, LedgerCounts, LenderId, LenderProfile, Loan, LoanId,
        LoanQuery, LoanStats, LoanStatus, Payment, PaymentId, PaymentQuery, PaymentStatus,
    },
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    loans: BTreeMap<LoanId, Loan>,
    payments: BTreeMap<PaymentId, Payment>,
    lenders: HashMap<LenderId, LenderProfile>,
    borrowers: HashMap<BorrowerId, BorrowerProfile>,
    /// Last sequence handed out per day
    loan_sequences: HashMap<NaiveDate, u32>,
}

/// Process-local ledger store
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: Vec<T>, offset: i64, limit: i64) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let page = items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    (page, total)
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let shared = self.state.clone().lock_owned().await;
        let working = shared.clone();
        Ok(Box::new(InMemoryTx { shared, working }))
    }

    async fn get_loan(&self, id: &LoanId) -> AppResult<Option<Loan>> {
        Ok(self.state.lock().await.loans.get(id).cloned())
    }

    async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<Loan>, i64)> {
        let state = self.state.lock().await;
        let mut loans: Vec<Loan> = state.loans.values().filter(|l| query.matches(l)).cloned().collect();
        loans.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.loan_id.cmp(&a.loan_id))
        });
        Ok(paginate(loans, query.offset(), query.per_page()))
    }

    async fn overdue_loan_ids(&self, today: NaiveDate) -> AppResult<Vec<LoanId>> {
        let state = self.state.lock().await;
        Ok(state
            .loans
            .values()
            .filter(|l| l.status == LoanStatus::Active && l.next_due_date < today)
            .map(|l| l.loan_id.clone())
            .collect())
    }

    async fn loan_stats(&self, recent_since: DateTime<Utc>) -> AppResult<LoanStats> {
        let state = self.state.lock().await;
        let mut stats = LoanStats::default();
        for loan in state.loans.values() {
            stats.total_loans += 1;
            match loan.status {
                LoanStatus::Active => stats.active_loans += 1,
                LoanStatus::Closed => stats.closed_loans += 1,
                LoanStatus::Defaulted => stats.defaulted_loans += 1,
            }
            stats.total_amount_lent += loan.principal_amount;
            stats.total_amount_repaid += loan.total_amount_repaid;
            stats.outstanding_balance += loan.remaining_balance;
            if loan.created_at >= recent_since {
                stats.recent_loans += 1;
            }
        }
        Ok(stats)
    }

    async fn get_payment(&self, id: PaymentId) -> AppResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&id).cloned())
    }

    async fn loan_payments(&self, loan_id: &LoanId) -> AppResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| &p.loan_id == loan_id)
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
        Ok(payments)
    }

    async fn list_payments(&self, query: &PaymentQuery) -> AppResult<(Vec<Payment>, i64)> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> =
            state.payments.values().filter(|p| query.matches(p)).cloned().collect();
        if query.oldest_first() {
            payments.sort_by(|a, b| a.payment_date.cmp(&b.payment_date));
        } else {
            payments.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
        }
        Ok(paginate(payments, query.offset(), query.per_page()))
    }

    async fn get_lender(&self, id: LenderId) -> AppResult<Option<LenderProfile>> {
        Ok(self.state.lock().await.lenders.get(&id).cloned())
    }

    async fn get_borrower(&self, id: BorrowerId) -> AppResult<Option<BorrowerProfile>> {
        Ok(self.state.lock().await.borrowers.get(&id).cloned())
    }

    async fn active_loans_for_lender(&self, id: LenderId) -> AppResult<Vec<Loan>> {
        let query = LoanQuery {
            status: Some(LoanStatus::Active),
            lender_id: Some(id),
            ..Default::default()
        };
        let state = self.state.lock().await;
        let mut loans: Vec<Loan> = state.loans.values().filter(|l| query.matches(l)).cloned().collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(loans)
    }

    async fn recent_approved_payments(
        &self,
        lender_id: Option<LenderId>,
        limit: i64,
    ) -> AppResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Approved)
            .filter(|p| lender_id.map_or(true, |id| p.lender_id == id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.admin_approval_date.cmp(&a.admin_approval_date));
        payments.truncate(limit.max(0) as usize);
        Ok(payments)
    }

    async fn ledger_counts(&self, since: DateTime<Utc>) -> AppResult<LedgerCounts> {
        let state = self.state.lock().await;
        let mut counts = LedgerCounts {
            total_lenders: state.lenders.len() as i64,
            total_borrowers: state.borrowers.len() as i64,
            ..LedgerCounts::default()
        };
        for payment in state.payments.values() {
            match payment.status {
                PaymentStatus::Pending => counts.pending_payments += 1,
                PaymentStatus::Approved if payment.admin_approval_date.map_or(false, |d| d >= since) => {
                    counts.approved_since += payment.amount;
                }
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Unit of work over a private copy of the ledger
struct InMemoryTx {
    shared: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

impl InMemoryTx {
    fn lender_mut(&mut self, id: LenderId) -> AppResult<&mut LenderProfile> {
        self.working
            .lenders
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Lender {} not found", id)))
    }

    fn borrower_mut(&mut self, id: BorrowerId) -> AppResult<&mut BorrowerProfile> {
        self.working
            .borrowers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Borrower {} not found", id)))
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn lock_lender(&mut self, id: LenderId) -> AppResult<Option<LenderProfile>> {
        Ok(self.working.lenders.get(&id).cloned())
    }

    async fn lock_borrower(&mut self, id: BorrowerId) -> AppResult<Option<BorrowerProfile>> {
        Ok(self.working.borrowers.get(&id).cloned())
    }

    async fn insert_lender(&mut self, lender: &LenderProfile) -> AppResult<()> {
        if self.working.lenders.values().any(|l| l.phone_number == lender.phone_number) {
            return Err(AppError::Conflict(format!(
                "A lender with phone number {} already exists",
                lender.phone_number
            )));
        }
        self.working.lenders.insert(lender.id, lender.clone());
        Ok(())
    }

    async fn insert_borrower(&mut self, borrower: &BorrowerProfile) -> AppResult<()> {
        if self.working.borrowers.values().any(|b| b.phone_number == borrower.phone_number) {
            return Err(AppError::Conflict(format!(
                "A borrower with phone number {} already exists",
                borrower.phone_number
            )));
        }
        self.working.borrowers.insert(borrower.id, borrower.clone());
        Ok(())
    }

    async fn delete_lender(&mut self, id: LenderId) -> AppResult<()> {
        self.working.lenders.remove(&id);
        Ok(())
    }

    async fn delete_borrower(&mut self, id: BorrowerId) -> AppResult<()> {
        self.working.borrowers.remove(&id);
        Ok(())
    }

    async fn apply_lender_delta(&mut self, id: LenderId, delta: LenderDelta) -> AppResult<()> {
        let lender = self.lender_mut(id)?;
        delta.apply_to(
            &mut lender.total_amount_lent,
            &mut lender.active_loans_count,
            &mut lender.total_earnings,
        )
    }

    async fn adjust_borrowed(&mut self, id: BorrowerId, amount: Decimal) -> AppResult<()> {
        let borrower = self.borrower_mut(id)?;
        borrower.total_borrowed =
            bounded_amount(borrower.total_borrowed.checked_add(amount), "Total borrowed")?;
        Ok(())
    }

    async fn next_loan_sequence(&mut self, day: NaiveDate) -> AppResult<u32> {
        let from_existing = loan_id::next_sequence(day, self.working.loans.keys());
        let last = self.working.loan_sequences.entry(day).or_insert(0);
        let next = (*last + 1).max(from_existing);
        *last = next;
        Ok(next)
    }

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()> {
        if self.working.loans.contains_key(&loan.loan_id) {
            return Err(AppError::Conflict(format!("Loan {} already exists", loan.loan_id)));
        }
        if loan.is_active()
            && self
                .working
                .loans
                .values()
                .any(|l| l.borrower_id == loan.borrower_id && l.is_active())
        {
            return Err(AppError::Conflict("Borrower already has an active loan".to_string()));
        }
        self.working.loans.insert(loan.loan_id.clone(), loan.clone());
        Ok(())
    }

    async fn lock_loan(&mut self, id: &LoanId) -> AppResult<Option<Loan>> {
        Ok(self.working.loans.get(id).cloned())
    }

    async fn active_loan_for_borrower(&mut self, id: BorrowerId) -> AppResult<Option<Loan>> {
        Ok(self
            .working
            .loans
            .values()
            .find(|l| l.borrower_id == id && l.is_active())
            .cloned())
    }

    async fn lock_loans_for_lender(&mut self, id: LenderId) -> AppResult<Vec<Loan>> {
        Ok(self.working.loans.values().filter(|l| l.lender_id == id).cloned().collect())
    }

    async fn lock_loans_for_borrower(&mut self, id: BorrowerId) -> AppResult<Vec<Loan>> {
        Ok(self.working.loans.values().filter(|l| l.borrower_id == id).cloned().collect())
    }

    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()> {
        if loan.is_active()
            && self
                .working
                .loans
                .values()
                .any(|l| l.borrower_id == loan.borrower_id && l.is_active() && l.loan_id != loan.loan_id)
        {
            return Err(AppError::Conflict("Borrower already has an active loan".to_string()));
        }
        match self.working.loans.get_mut(&loan.loan_id) {
            Some(stored) => {
                *stored = loan.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Loan {} not found", loan.loan_id))),
        }
    }

    async fn delete_loan(&mut self, id: &LoanId) -> AppResult<()> {
        self.working.loans.remove(id);
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> AppResult<()> {
        if !self.working.loans.contains_key(&payment.loan_id) {
            return Err(AppError::NotFound(format!("Loan {} not found", payment.loan_id)));
        }
        self.working.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn lock_payment(&mut self, id: PaymentId) -> AppResult<Option<Payment>> {
        Ok(self.working.payments.get(&id).cloned())
    }

    async fn update_payment(&mut self, payment: &Payment) -> AppResult<()> {
        match self.working.payments.get_mut(&payment.id) {
            Some(stored) => {
                *stored = payment.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Payment {} not found", payment.id))),
        }
    }

    async fn delete_payments_for_loan(&mut self, id: &LoanId) -> AppResult<Vec<Payment>> {
        let doomed: Vec<PaymentId> = self
            .working
            .payments
            .values()
            .filter(|p| &p.loan_id == id)
            .map(|p| p.id)
            .collect();
        Ok(doomed
            .into_iter()
            .filter_map(|pid| self.working.payments.remove(&pid))
            .collect())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let InMemoryTx { mut shared, working } = *self;
        *shared = working;
        Ok(())
    }
}
