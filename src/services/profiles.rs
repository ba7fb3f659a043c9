//! Lender and borrower profiles

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use validator::Validate;

use super::audit::AuditService;
use crate::{
    clock::Clock,
    config::LedgerConfig,
    error::{AppError, AppResult},
    ledger::lifecycle,
    models::{
        Actor, AuditAction, AuditEntry, BorrowerId, BorrowerProfile, CreateBorrower, CreateLender,
        EntityKind, LenderId, LenderProfile, Loan, PaymentStatus, ProfileDeletion, ProfileRef,
    },
    repository::{retry_transient, LedgerTx, Repository},
};

/// Credit score given to borrowers registered without one
pub const DEFAULT_CREDIT_SCORE: i32 = 500;

#[derive(Clone)]
pub struct ProfilesService {
    repository: Repository,
    clock: Arc<dyn Clock>,
    audit: AuditService,
    config: LedgerConfig,
}

impl ProfilesService {
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

    pub async fn create_lender(&self, actor: Actor, request: CreateLender) -> AppResult<LenderProfile> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let lender = LenderProfile {
            id: LenderId::new(),
            name: request.name.trim().to_string(),
            phone_number: request.phone_number.trim().to_string(),
            upi_id: request.upi_id.trim().to_string(),
            upi_qr_code_url: request.upi_qr_code_url,
            total_amount_lent: Decimal::ZERO,
            active_loans_count: 0,
            total_earnings: Decimal::ZERO,
            created_at: self.clock.now(),
        };

        retry_transient(self.config.max_tx_retries, || self.insert_lender(&lender))
            .await
            .map_err(|e| phone_conflict(e, &lender.phone_number))?;

        tracing::info!("Lender {} created", lender.id);
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            actor,
            AuditAction::LenderCreate,
            EntityKind::Lender,
            lender.id,
            json!({ "name": lender.name, "phone_number": lender.phone_number }),
        ));
        Ok(lender)
    }

    pub async fn create_borrower(
        &self,
        actor: Actor,
        request: CreateBorrower,
    ) -> AppResult<BorrowerProfile> {
        request
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let borrower = BorrowerProfile {
            id: BorrowerId::new(),
            name: request.name.trim().to_string(),
            address: request.address.trim().to_string(),
            phone_number: request.phone_number.trim().to_string(),
            credit_score: request.credit_score.unwrap_or(DEFAULT_CREDIT_SCORE),
            total_borrowed: Decimal::ZERO,
            created_at: self.clock.now(),
        };

        retry_transient(self.config.max_tx_retries, || self.insert_borrower(&borrower))
            .await
            .map_err(|e| phone_conflict(e, &borrower.phone_number))?;

        tracing::info!("Borrower {} created", borrower.id);
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            actor,
            AuditAction::BorrowerCreate,
            EntityKind::Borrower,
            borrower.id,
            json!({ "name": borrower.name, "phone_number": borrower.phone_number }),
        ));
        Ok(borrower)
    }

    async fn insert_lender(&self, lender: &LenderProfile) -> AppResult<()> {
        let mut tx = self.repository.begin().await?;
        tx.insert_lender(lender).await?;
        tx.commit().await
    }

    async fn insert_borrower(&self, borrower: &BorrowerProfile) -> AppResult<()> {
        let mut tx = self.repository.begin().await?;
        tx.insert_borrower(borrower).await?;
        tx.commit().await
    }

    pub async fn get_lender(&self, id: LenderId) -> AppResult<LenderProfile> {
        self.repository
            .get_lender(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lender {} not found", id)))
    }

    pub async fn get_borrower(&self, id: BorrowerId) -> AppResult<BorrowerProfile> {
        self.repository
            .get_borrower(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrower {} not found", id)))
    }

    /// Delete a profile together with all of its loans and their payments.
    ///
    /// Refused while the profile has an active loan. For every deleted loan
    /// the counterpart profile's aggregates are reversed.
    pub async fn delete_profile(&self, actor: Actor, profile: ProfileRef) -> AppResult<ProfileDeletion> {
        let deletion =
            retry_transient(self.config.max_tx_retries, || self.try_delete_profile(profile)).await?;

        let (kind, entity_ref) = match profile {
            ProfileRef::Lender(id) => (EntityKind::Lender, id.to_string()),
            ProfileRef::Borrower(id) => (EntityKind::Borrower, id.to_string()),
        };
        tracing::info!(
            "{} {} deleted with {} loan(s) and {} payment(s)",
            kind.as_str(),
            entity_ref,
            deletion.loans_deleted,
            deletion.payments_deleted
        );
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            actor,
            AuditAction::ProfileDelete,
            kind,
            entity_ref,
            json!({
                "loans_deleted": deletion.loans_deleted,
                "payments_deleted": deletion.payments_deleted,
            }),
        ));
        Ok(deletion)
    }

    async fn try_delete_profile(&self, profile: ProfileRef) -> AppResult<ProfileDeletion> {
        let mut tx = self.repository.begin().await?;

        let loans = match profile {
            ProfileRef::Lender(id) => {
                tx.lock_lender(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Lender {} not found", id)))?;
                tx.lock_loans_for_lender(id).await?
            }
            ProfileRef::Borrower(id) => {
                tx.lock_borrower(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Borrower {} not found", id)))?;
                tx.lock_loans_for_borrower(id).await?
            }
        };

        if let Some(active) = loans.iter().find(|l| l.is_active()) {
            return Err(AppError::Conflict(format!(
                "Cannot delete a profile with an active loan ({})",
                active.loan_id
            )));
        }

        let mut deletion = ProfileDeletion::default();
        for loan in &loans {
            deletion.payments_deleted += delete_loan_records(tx.as_mut(), loan, profile).await?;
            deletion.loans_deleted += 1;
        }

        match profile {
            ProfileRef::Lender(id) => tx.delete_lender(id).await?,
            ProfileRef::Borrower(id) => tx.delete_borrower(id).await?,
        }
        tx.commit().await?;

        Ok(deletion)
    }
}

/// Remove one loan of a profile being deleted and reverse what it
/// contributed to the profile on the other side. Returns the number of
/// payments removed.
async fn delete_loan_records(tx: &mut dyn LedgerTx, loan: &Loan, deleting: ProfileRef) -> AppResult<u64> {
    let payments = tx.delete_payments_for_loan(&loan.loan_id).await?;
    tx.delete_loan(&loan.loan_id).await?;

    match deleting {
        ProfileRef::Lender(_) => {
            tx.adjust_borrowed(loan.borrower_id, -loan.principal_amount)
                .await?;
        }
        ProfileRef::Borrower(_) => {
            let approved_total: Decimal = payments
                .iter()
                .filter(|p| p.status == PaymentStatus::Approved)
                .map(|p| p.amount)
                .sum();
            tx.apply_lender_delta(loan.lender_id, lifecycle::deletion_delta(loan, approved_total))
                .await?;
        }
    }
    Ok(payments.len() as u64)
}

fn phone_conflict(err: AppError, phone_number: &str) -> AppError {
    match err {
        AppError::Conflict(_) => AppError::Conflict(format!(
            "Phone number {} is already registered",
            phone_number
        )),
        other => other,
    }
}
