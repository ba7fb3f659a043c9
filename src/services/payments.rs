//! Payment settlement service

use std::sync::Arc;

use serde_json::json;
use validator::Validate;

use super::audit::AuditService;
use crate::{
    clock::Clock,
    config::LedgerConfig,
    error::{AppError, AppResult},
    ledger::settlement,
    models::{
        Actor, AuditAction, AuditEntry, EntityKind, Payment, PaymentId, PaymentQuery, Settlement,
        SubmitPayment,
    },
    repository::{retry_transient, Repository},
};

#[derive(Clone)]
pub struct PaymentsService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    audit: AuditService,
    config: LedgerConfig,
}

impl PaymentsService {
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

    /// Record a pending payment against the borrower's active loan.
    /// The loan itself is not touched until approval.
    pub async fn submit(&self, actor: Actor, request: SubmitPayment) -> AppResult<Payment> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let payment =
            retry_transient(self.config.max_tx_retries, || self.try_submit(&request)).await?;

        tracing::info!(
            "Payment {} of {} submitted for loan {}",
            payment.id,
            payment.amount,
            payment.loan_id
        );
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            actor,
            AuditAction::PaymentSubmit,
            EntityKind::Payment,
            payment.id,
            json!({
                "loan_id": payment.loan_id,
                "amount": payment.amount,
                "for_days": payment.for_days,
                "utr_number": payment.utr_number,
            }),
        ));
        Ok(payment)
    }

    async fn try_submit(&self, request: &SubmitPayment) -> AppResult<Payment> {
        let mut tx = self.repository.begin().await?;

        tx.lock_borrower(request.borrower_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrower {} not found", request.borrower_id)))?;
        let loan = tx
            .active_loan_for_borrower(request.borrower_id)
            .await?
            .ok_or_else(|| AppError::NotFound("No active loan found".to_string()))?;

        settlement::check_submission(&loan, request.amount, request.for_days)?;
        let payment = settlement::new_payment(&loan, request, self.clock.now());

        tx.insert_payment(&payment).await?;
        tx.commit().await?;

        Ok(payment)
    }

    /// Approve a pending payment and settle it against its loan
    pub async fn approve(&self, actor: Actor, id: PaymentId) -> AppResult<Settlement> {
        let settled =
            retry_transient(self.config.max_tx_retries, || self.try_approve(actor, id)).await?;

        tracing::info!(
            "Payment {} approved; loan {} remaining {} ({})",
            settled.payment.id,
            settled.loan.loan_id,
            settled.loan.remaining_balance,
            settled.loan.status
        );
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            actor,
            AuditAction::PaymentApprove,
            EntityKind::Payment,
            settled.payment.id,
            json!({
                "loan_id": settled.loan.loan_id,
                "amount": settled.payment.amount,
                "remaining_balance": settled.loan.remaining_balance,
                "loan_status": settled.loan.status,
            }),
        ));
        Ok(settled)
    }

    async fn try_approve(&self, actor: Actor, id: PaymentId) -> AppResult<Settlement> {
        let now = self.clock.now();
        let mut tx = self.repository.begin().await?;

        let mut payment = tx
            .lock_payment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", id)))?;
        let mut loan = tx
            .lock_loan(&payment.loan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", payment.loan_id)))?;

        let delta = settlement::approve(&mut payment, &mut loan, actor.id, now)?;

        tx.update_payment(&payment).await?;
        tx.update_loan(&loan).await?;
        tx.apply_lender_delta(loan.lender_id, delta).await?;
        tx.commit().await?;

        Ok(Settlement { payment, loan })
    }

    /// Reject a pending payment; the loan is left untouched
    pub async fn reject(&self, actor: Actor, id: PaymentId, reason: &str) -> AppResult<Payment> {
        let payment = retry_transient(self.config.max_tx_retries, || {
            self.try_reject(actor, id, reason)
        })
        .await?;

        tracing::info!("Payment {} rejected", payment.id);
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            actor,
            AuditAction::PaymentReject,
            EntityKind::Payment,
            payment.id,
            json!({
                "loan_id": payment.loan_id,
                "amount": payment.amount,
                "rejection_reason": payment.rejection_reason,
            }),
        ));
        Ok(payment)
    }

    async fn try_reject(&self, actor: Actor, id: PaymentId, reason: &str) -> AppResult<Payment> {
        let mut tx = self.repository.begin().await?;

        let mut payment = tx
            .lock_payment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", id)))?;
        settlement::reject(&mut payment, actor.id, reason, self.clock.now())?;

        tx.update_payment(&payment).await?;
        tx.commit().await?;

        Ok(payment)
    }

    pub async fn get(&self, id: PaymentId) -> AppResult<Payment> {
        self.repository
            .get_payment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {} not found", id)))
    }

    /// List payments; the pending queue comes oldest first
    pub async fn list(&self, query: &PaymentQuery) -> AppResult<(Vec<Payment>, i64)> {
        self.repository.list_payments(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoanStatus, PaymentStatus};
    use crate::services::test_support::{create_loan_request, submit_request, Fixture};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_approval_is_audited_with_actor() {
        let fx = Fixture::new().await;
        fx.services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();
        let payment = fx
            .services
            .payments
            .submit(fx.borrower_actor(), submit_request(&fx, dec!(200), 2))
            .await
            .unwrap();
        fx.services.payments.approve(fx.admin, payment.id).await.unwrap();

        // lender, borrower, loan, submission, approval
        let entries = fx.audit.wait_for(5).await;
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|e| e.recorded_at == fx.clock.now()));
        let approval = entries
            .iter()
            .find(|e| e.action == AuditAction::PaymentApprove)
            .expect("approval entry");
        assert_eq!(approval.actor_id, fx.admin.id);
        assert_eq!(approval.entity_ref, payment.id.to_string());
        assert!(entries.iter().any(|e| e.action == AuditAction::PaymentSubmit
            && e.actor_id == fx.borrower_id.0));
    }

    #[tokio::test]
    async fn test_submission_leaves_loan_untouched() {
        let fx = Fixture::new().await;
        let loan = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();

        let payment = fx
            .services
            .payments
            .submit(fx.borrower_actor(), submit_request(&fx, dec!(300), 3))
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.loan_id, loan.loan_id);
        let stored = fx.services.loans.get_loan(&loan.loan_id).await.unwrap();
        assert_eq!(stored.remaining_balance, dec!(3000));
    }

    #[tokio::test]
    async fn test_submission_without_active_loan_fails() {
        let fx = Fixture::new().await;
        let err = fx
            .services
            .payments
            .submit(fx.borrower_actor(), submit_request(&fx, dec!(100), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mismatched_amount_is_rejected() {
        let fx = Fixture::new().await;
        fx.services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();

        let err = fx
            .services
            .payments
            .submit(fx.borrower_actor(), submit_request(&fx, dec!(250), 3))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_approval_settles_loan_and_credits_lender() {
        let fx = Fixture::new().await;
        let loan = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();
        let payment = fx
            .services
            .payments
            .submit(fx.borrower_actor(), submit_request(&fx, dec!(300), 3))
            .await
            .unwrap();

        let settled = fx.services.payments.approve(fx.admin, payment.id).await.unwrap();

        assert_eq!(settled.payment.status, PaymentStatus::Approved);
        assert_eq!(settled.payment.approver_id, Some(fx.admin.id));
        assert_eq!(settled.loan.remaining_balance, dec!(2700));
        assert_eq!(settled.loan.total_amount_repaid, dec!(300));
        assert_eq!(
            settled.loan.next_due_date,
            loan.next_due_date + chrono::Duration::days(3)
        );
        assert_eq!(fx.lender().await.total_earnings, dec!(300));
    }

    #[tokio::test]
    async fn test_reject_requires_pending_and_reason() {
        let fx = Fixture::new().await;
        fx.services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();
        let payment = fx
            .services
            .payments
            .submit(fx.borrower_actor(), submit_request(&fx, dec!(100), 1))
            .await
            .unwrap();

        let payments = &fx.services.payments;
        assert!(matches!(
            payments.reject(fx.admin, payment.id, "").await,
            Err(AppError::Validation(_))
        ));

        let rejected = payments
            .reject(fx.admin, payment.id, "screenshot unreadable")
            .await
            .unwrap();
        assert_eq!(rejected.status, PaymentStatus::Rejected);

        assert!(matches!(
            payments.approve(fx.admin, payment.id).await,
            Err(AppError::InvalidState(_))
        ));
        assert!(matches!(
            payments.reject(fx.admin, payment.id, "again").await,
            Err(AppError::InvalidState(_))
        ));
        assert_eq!(fx.lender().await.total_earnings, dec!(0));
    }

    #[tokio::test]
    async fn test_unknown_payment_is_not_found() {
        let fx = Fixture::new().await;
        assert!(matches!(
            fx.services.payments.approve(fx.admin, PaymentId::new()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_queue_is_oldest_first() {
        let fx = Fixture::new().await;
        fx.services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();

        let first = fx
            .services
            .payments
            .submit(fx.borrower_actor(), submit_request(&fx, dec!(100), 1))
            .await
            .unwrap();
        fx.clock.advance(chrono::Duration::hours(1));
        let second = fx
            .services
            .payments
            .submit(fx.borrower_actor(), submit_request(&fx, dec!(200), 2))
            .await
            .unwrap();

        let query = PaymentQuery {
            status: Some(PaymentStatus::Pending),
            ..Default::default()
        };
        let (queue, total) = fx.services.payments.list(&query).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(queue[0].id, first.id);
        assert_eq!(queue[1].id, second.id);

        let (all, _) = fx.services.payments.list(&PaymentQuery::default()).await.unwrap();
        assert_eq!(all[0].id, second.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_approvals_settle_once() {
        let fx = Fixture::new().await;
        let loan = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();
        let payment = fx
            .services
            .payments
            .submit(fx.borrower_actor(), submit_request(&fx, dec!(300), 3))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let payments = fx.services.payments.clone();
            let admin = fx.admin;
            handles.push(tokio::spawn(async move { payments.approve(admin, payment.id).await }));
        }

        let mut approved = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => approved += 1,
                Err(e) => assert!(matches!(e, AppError::InvalidState(_))),
            }
        }

        assert_eq!(approved, 1);
        let stored = fx.services.loans.get_loan(&loan.loan_id).await.unwrap();
        assert_eq!(stored.total_amount_repaid, dec!(300));
        assert_eq!(stored.status, LoanStatus::Active);
        assert_eq!(fx.lender().await.total_earnings, dec!(300));
    }
}
