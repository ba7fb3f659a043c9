//! Loan lifecycle service

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde_json::json;
use validator::Validate;

use super::audit::AuditService;
use crate::{
    clock::Clock,
    config::LedgerConfig,
    error::{AppError, AppResult},
    ledger::{lifecycle, loan_id},
    models::{
        Actor, AuditAction, AuditEntry, BorrowerId, CreateLoan, EntityKind, Loan, LoanDetails,
        LoanId, LoanQuery, LoanStats, LoanStatus, OverdueSweep, PaymentStatus, PaymentSummary,
    },
    repository::{retry_transient, Repository},
};

/// Window used for the "recent loans" figure
const RECENT_LOANS_DAYS: i64 = 30;

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    audit: AuditService,
    config: LedgerConfig,
}

impl LoansService {
    pub fn new(
        repository: Repository,
        clock: Arc<dyn Clock>,
        audit: AuditService,
        config: LedgerConfig,
    ) -> Self {
        Self {
            repository,
            clock,
            audit,
            config,
        }
    }

    /// Issue a loan from a lender to a borrower who has no active loan
    pub async fn create_loan(&self, actor: Actor, request: CreateLoan) -> AppResult<Loan> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let loan = retry_transient(self.config.max_tx_retries, || {
            self.try_create_loan(actor, &request)
        })
        .await?;

        tracing::info!(
            "Loan {} created: lender {} -> borrower {}, principal {}",
            loan.loan_id,
            loan.lender_id,
            loan.borrower_id,
            loan.principal_amount
        );
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            actor,
            AuditAction::LoanCreate,
            EntityKind::Loan,
            &loan.loan_id,
            json!({
                "borrower_id": loan.borrower_id,
                "lender_id": loan.lender_id,
                "principal_amount": loan.principal_amount,
                "total_days": loan.total_days,
                "emi_per_day": loan.emi_per_day,
            }),
        ));
        Ok(loan)
    }

    async fn try_create_loan(&self, actor: Actor, request: &CreateLoan) -> AppResult<Loan> {
        let now = self.clock.now();
        let mut tx = self.repository.begin().await?;

        tx.lock_borrower(request.borrower_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrower {} not found", request.borrower_id)))?;
        tx.lock_lender(request.lender_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lender {} not found", request.lender_id)))?;

        if let Some(existing) = tx.active_loan_for_borrower(request.borrower_id).await? {
            return Err(AppError::Conflict(format!(
                "Borrower already has an active loan ({})",
                existing.loan_id
            )));
        }

        let day = now.date_naive();
        let sequence = tx.next_loan_sequence(day).await?;
        let loan = lifecycle::new_loan(loan_id::format_loan_id(day, sequence), request, actor.id, now)?;

        tx.insert_loan(&loan).await?;
        tx.apply_lender_delta(loan.lender_id, lifecycle::creation_delta(&loan))
            .await?;
        tx.adjust_borrowed(loan.borrower_id, loan.principal_amount)
            .await?;
        tx.commit().await?;

        Ok(loan)
    }

    /// Get loan by identifier
    pub async fn get_loan(&self, id: &LoanId) -> AppResult<Loan> {
        self.repository
            .get_loan(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))
    }

    /// Loan with payment history and summary
    pub async fn get_loan_details(&self, id: &LoanId) -> AppResult<LoanDetails> {
        let loan = self.get_loan(id).await?;
        let payments = self.repository.loan_payments(id).await?;

        let count = |status: PaymentStatus| payments.iter().filter(|p| p.status == status).count() as i64;
        let total_paid: Decimal = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Approved)
            .map(|p| p.amount)
            .sum();

        let payment_summary = PaymentSummary {
            total_paid,
            remaining_balance: loan.remaining_balance,
            total_payments: payments.len() as i64,
            approved_payments: count(PaymentStatus::Approved),
            pending_payments: count(PaymentStatus::Pending),
            rejected_payments: count(PaymentStatus::Rejected),
            days_overdue: loan.days_overdue,
            remaining_days: lifecycle::remaining_days(&loan, self.clock.today()),
        };

        Ok(LoanDetails {
            loan,
            payment_summary,
            payment_history: payments,
        })
    }

    /// List loans, newest first
    pub async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<Loan>, i64)> {
        self.repository.list_loans(query).await
    }

    /// The borrower's current active loan
    pub async fn active_loan_for_borrower(&self, borrower_id: BorrowerId) -> AppResult<Loan> {
        let query = LoanQuery {
            status: Some(LoanStatus::Active),
            borrower_id: Some(borrower_id),
            ..Default::default()
        };
        let (mut loans, _) = self.repository.list_loans(&query).await?;
        loans
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("No active loan found for borrower {}", borrower_id)))
    }

    /// Move a loan to `status`, optionally replacing its admin notes
    pub async fn update_status(
        &self,
        actor: Actor,
        id: &LoanId,
        status: LoanStatus,
        notes: Option<String>,
    ) -> AppResult<Loan> {
        let (previous, loan) = retry_transient(self.config.max_tx_retries, || {
            self.try_update_status(id, status, notes.as_deref())
        })
        .await?;

        tracing::info!("Loan {} status {} -> {}", loan.loan_id, previous, loan.status);
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            actor,
            AuditAction::LoanStatusUpdate,
            EntityKind::Loan,
            &loan.loan_id,
            json!({
                "previous_status": previous,
                "new_status": loan.status,
                "notes": notes,
            }),
        ));
        Ok(loan)
    }

    async fn try_update_status(
        &self,
        id: &LoanId,
        status: LoanStatus,
        notes: Option<&str>,
    ) -> AppResult<(LoanStatus, Loan)> {
        let now = self.clock.now();
        let mut tx = self.repository.begin().await?;

        let mut loan = tx
            .lock_loan(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))?;
        let previous = loan.status;

        let delta = lifecycle::transition(&mut loan, status, now)?;
        if let Some(notes) = notes {
            loan.admin_notes = notes.to_string();
            loan.updated_at = now;
        }

        tx.update_loan(&loan).await?;
        if !delta.is_zero() {
            tx.apply_lender_delta(loan.lender_id, delta).await?;
        }
        tx.commit().await?;

        Ok((previous, loan))
    }

    /// Delete a loan with its payments and reverse its aggregate contributions
    pub async fn delete_loan(&self, actor: Actor, id: &LoanId) -> AppResult<()> {
        let (loan, payments_deleted) =
            retry_transient(self.config.max_tx_retries, || self.try_delete_loan(id)).await?;

        tracing::info!(
            "Loan {} deleted with {} payment(s)",
            loan.loan_id,
            payments_deleted
        );
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            actor,
            AuditAction::LoanDelete,
            EntityKind::Loan,
            &loan.loan_id,
            json!({
                "borrower_id": loan.borrower_id,
                "lender_id": loan.lender_id,
                "principal_amount": loan.principal_amount,
                "status": loan.status,
                "payments_deleted": payments_deleted,
            }),
        ));
        Ok(())
    }

    async fn try_delete_loan(&self, id: &LoanId) -> AppResult<(Loan, usize)> {
        let mut tx = self.repository.begin().await?;

        let loan = tx
            .lock_loan(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", id)))?;

        let payments = tx.delete_payments_for_loan(id).await?;
        let approved_total: Decimal = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Approved)
            .map(|p| p.amount)
            .sum();

        tx.delete_loan(id).await?;
        tx.apply_lender_delta(loan.lender_id, lifecycle::deletion_delta(&loan, approved_total))
            .await?;
        tx.adjust_borrowed(loan.borrower_id, -loan.principal_amount)
            .await?;
        tx.commit().await?;

        Ok((loan, payments.len()))
    }

    /// Recompute overdue figures for active loans past their due date and
    /// default the ones beyond the configured threshold. Each loan is updated
    /// in its own transaction; a failing loan does not stop the sweep.
    pub async fn sweep_overdue(&self, actor: Actor) -> AppResult<OverdueSweep> {
        let today = self.clock.today();
        let threshold = self.config.default_threshold_days;
        let candidates = self.repository.overdue_loan_ids(today).await?;

        let mut sweep = OverdueSweep {
            examined: candidates.len() as u64,
            ..Default::default()
        };

        for id in candidates {
            let result = retry_transient(self.config.max_tx_retries, || {
                self.try_sweep_loan(&id, today, threshold)
            })
            .await;

            match result {
                Ok(Some(update)) => {
                    sweep.updated += 1;
                    if update.defaulted {
                        sweep.defaulted += 1;
                        tracing::info!("Loan {} defaulted after {} days overdue", id, update.days_overdue);
                    } else {
                        tracing::debug!("Loan {} is {} days overdue", id, update.days_overdue);
                    }
                    self.audit.record(AuditEntry::new(
                        self.clock.now(),
                        actor,
                        AuditAction::LoanOverdueSweep,
                        EntityKind::Loan,
                        &id,
                        json!({
                            "days_overdue": update.days_overdue,
                            "defaulted": update.defaulted,
                        }),
                    ));
                }
                Ok(None) => {}
                Err(e) => {
                    sweep.failed += 1;
                    tracing::warn!("Overdue sweep skipped loan {}: {}", id, e);
                }
            }
        }

        tracing::info!(
            "Overdue sweep: {} examined, {} updated, {} defaulted, {} failed",
            sweep.examined,
            sweep.updated,
            sweep.defaulted,
            sweep.failed
        );
        Ok(sweep)
    }

    async fn try_sweep_loan(
        &self,
        id: &LoanId,
        today: NaiveDate,
        threshold: i64,
    ) -> AppResult<Option<lifecycle::OverdueUpdate>> {
        let mut tx = self.repository.begin().await?;

        // Deleted or changed since the candidate list was taken.
        let Some(mut loan) = tx.lock_loan(id).await? else {
            return Ok(None);
        };
        let Some(update) = lifecycle::classify_overdue(&mut loan, today, threshold, self.clock.now())? else {
            return Ok(None);
        };

        tx.update_loan(&loan).await?;
        if !update.delta.is_zero() {
            tx.apply_lender_delta(loan.lender_id, update.delta).await?;
        }
        tx.commit().await?;

        Ok(Some(update))
    }

    /// Portfolio figures
    pub async fn stats(&self) -> AppResult<LoanStats> {
        let since = self.clock.now() - Duration::days(RECENT_LOANS_DAYS);
        self.repository.loan_stats(since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{create_loan_request, Fixture};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_create_loan_updates_aggregates() {
        let fx = Fixture::new().await;

        let loan = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();

        assert_eq!(loan.loan_id.as_str(), "LN-20240501-001");
        assert_eq!(loan.remaining_balance, dec!(3000));
        assert_eq!(loan.end_date, NaiveDate::from_ymd_opt(2024, 5, 31).unwrap());

        let lender = fx.lender().await;
        assert_eq!(lender.total_amount_lent, dec!(3000));
        assert_eq!(lender.active_loans_count, 1);
        assert_eq!(fx.borrower().await.total_borrowed, dec!(3000));
    }

    #[tokio::test]
    async fn test_second_active_loan_conflicts_without_side_effects() {
        let fx = Fixture::new().await;
        fx.services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();

        let err = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(fx.lender().await.active_loans_count, 1);
        assert_eq!(fx.borrower().await.total_borrowed, dec!(3000));
    }

    #[tokio::test]
    async fn test_unknown_lender_is_not_found() {
        let fx = Fixture::new().await;
        let mut request = create_loan_request(&fx);
        request.lender_id = crate::models::LenderId::new();

        let err = fx.services.loans.create_loan(fx.admin, request).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let fx = Fixture::new().await;
        let mut request = create_loan_request(&fx);
        request.principal_amount = dec!(0);

        let err = fx.services.loans.create_loan(fx.admin, request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_status_round_trip_keeps_count_consistent() {
        let fx = Fixture::new().await;
        let loan = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();

        let loans = &fx.services.loans;
        let closed = loans
            .update_status(fx.admin, &loan.loan_id, LoanStatus::Closed, Some("settled in cash".into()))
            .await
            .unwrap();
        assert_eq!(closed.remaining_balance, Decimal::ZERO);
        assert_eq!(closed.admin_notes, "settled in cash");
        assert_eq!(fx.lender().await.active_loans_count, 0);

        loans
            .update_status(fx.admin, &loan.loan_id, LoanStatus::Closed, None)
            .await
            .unwrap();
        assert_eq!(fx.lender().await.active_loans_count, 0);

        let defaulted = loans
            .update_status(fx.admin, &loan.loan_id, LoanStatus::Defaulted, None)
            .await
            .unwrap();
        assert_eq!(defaulted.remaining_balance, dec!(3000));
        assert_eq!(fx.lender().await.active_loans_count, 0);

        let reopened = loans
            .update_status(fx.admin, &loan.loan_id, LoanStatus::Active, None)
            .await
            .unwrap();
        assert_eq!(reopened.remaining_balance, dec!(3000));
        assert_eq!(reopened.admin_notes, "settled in cash");
        assert_eq!(fx.lender().await.active_loans_count, 1);
    }

    #[tokio::test]
    async fn test_defaulted_loan_written_off_keeps_count() {
        let fx = Fixture::new().await;
        let loan = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();

        let loans = &fx.services.loans;
        loans
            .update_status(fx.admin, &loan.loan_id, LoanStatus::Defaulted, None)
            .await
            .unwrap();
        let closed = loans
            .update_status(fx.admin, &loan.loan_id, LoanStatus::Closed, Some("written off".into()))
            .await
            .unwrap();

        assert_eq!(closed.status, LoanStatus::Closed);
        assert_eq!(closed.remaining_balance, Decimal::ZERO);
        assert_eq!(fx.lender().await.active_loans_count, 0);
        assert_eq!(fx.lender().await.total_amount_lent, dec!(3000));
    }

    #[tokio::test]
    async fn test_out_of_range_terms_are_rejected() {
        let fx = Fixture::new().await;

        let mut request = create_loan_request(&fx);
        request.total_days = i32::MAX;
        let err = fx.services.loans.create_loan(fx.admin, request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut request = create_loan_request(&fx);
        request.emi_per_day = Decimal::MAX;
        let err = fx.services.loans.create_loan(fx.admin, request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut request = create_loan_request(&fx);
        request.principal_amount = dec!(33.335);
        let err = fx.services.loans.create_loan(fx.admin, request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(fx.lender().await.active_loans_count, 0);
    }

    #[tokio::test]
    async fn test_sweep_defaults_loans_past_threshold() {
        let fx = Fixture::new().await;
        let loan = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();

        fx.clock.advance(Duration::days(10));
        let sweep = fx.services.loans.sweep_overdue(Actor::system()).await.unwrap();
        assert_eq!(sweep.examined, 1);
        assert_eq!(sweep.defaulted, 0);
        let stored = fx.services.loans.get_loan(&loan.loan_id).await.unwrap();
        assert_eq!(stored.days_overdue, 10);
        assert_eq!(stored.status, LoanStatus::Active);

        fx.clock.advance(Duration::days(25));
        let sweep = fx.services.loans.sweep_overdue(Actor::system()).await.unwrap();
        assert_eq!(sweep.defaulted, 1);
        let stored = fx.services.loans.get_loan(&loan.loan_id).await.unwrap();
        assert_eq!(stored.days_overdue, 35);
        assert_eq!(stored.status, LoanStatus::Defaulted);
        assert_eq!(fx.lender().await.active_loans_count, 0);

        let sweep = fx.services.loans.sweep_overdue(Actor::system()).await.unwrap();
        assert_eq!(sweep.examined, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_loan_is_not_found() {
        let fx = Fixture::new().await;
        let err = fx
            .services
            .loans
            .delete_loan(fx.admin, &LoanId::from("LN-20240501-404"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_active_loan_lookup() {
        let fx = Fixture::new().await;
        assert!(matches!(
            fx.services.loans.active_loan_for_borrower(fx.borrower_id).await,
            Err(AppError::NotFound(_))
        ));

        let loan = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();
        let active = fx
            .services
            .loans
            .active_loan_for_borrower(fx.borrower_id)
            .await
            .unwrap();
        assert_eq!(active.loan_id, loan.loan_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creation_yields_one_active_loan() {
        let fx = Fixture::new().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let loans = fx.services.loans.clone();
            let request = create_loan_request(&fx);
            let admin = fx.admin;
            handles.push(tokio::spawn(async move { loans.create_loan(admin, request).await }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, AppError::Conflict(_))),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(fx.lender().await.active_loans_count, 1);
        assert_eq!(fx.borrower().await.total_borrowed, dec!(3000));
    }

    #[tokio::test]
    async fn test_stats_counts_recent_loans() {
        let fx = Fixture::new().await;
        fx.services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();

        let stats = fx.services.loans.stats().await.unwrap();
        assert_eq!(stats.total_loans, 1);
        assert_eq!(stats.active_loans, 1);
        assert_eq!(stats.recent_loans, 1);
        assert_eq!(stats.outstanding_balance, dec!(3000));

        fx.clock.advance(Duration::days(31));
        assert_eq!(fx.services.loans.stats().await.unwrap().recent_loans, 0);
    }
}
