//! PostgreSQL ledger store
//!
//! Transactions run at SERIALIZABLE isolation and lock the rows they read
//! with `FOR UPDATE`. Serialization failures surface as
//! [`AppError::Transient`] and are retried by the services.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Pool, Postgres, QueryBuilder, Transaction};

use super::{LedgerStore, LedgerTx};
use crate::{
    error::{AppError, AppResult},
    ledger::{loan_id, LenderDelta},
    models::{
        BorrowerId, BorrowerProfile, LedgerCounts, LenderId, LenderProfile, Loan, LoanId,
        LoanQuery, LoanStats, Payment, PaymentId, PaymentQuery,
    },
};

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: Pool<Postgres>,
}

impl PgLedgerStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

fn push_loan_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &LoanQuery) {
    if let Some(status) = query.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    if let Some(lender_id) = query.lender_id {
        builder.push(" AND lender_id = ");
        builder.push_bind(lender_id);
    }
    if let Some(borrower_id) = query.borrower_id {
        builder.push(" AND borrower_id = ");
        builder.push_bind(borrower_id);
    }
    if let Some(ref fragment) = query.loan_id {
        builder.push(" AND loan_id ILIKE ");
        builder.push_bind(format!("%{}%", fragment));
    }
}

fn push_payment_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &PaymentQuery) {
    if let Some(status) = query.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    if let Some(ref loan_id) = query.loan_id {
        builder.push(" AND loan_id = ");
        builder.push_bind(loan_id.clone());
    }
    if let Some(borrower_id) = query.borrower_id {
        builder.push(" AND borrower_id = ");
        builder.push_bind(borrower_id);
    }
    if let Some(lender_id) = query.lender_id {
        builder.push(" AND lender_id = ");
        builder.push_bind(lender_id);
    }
    if let Some(start) = query.start_date {
        builder.push(" AND payment_date >= ");
        builder.push_bind(start);
    }
    if let Some(end) = query.end_date {
        builder.push(" AND payment_date <= ");
        builder.push_bind(end);
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn get_loan(&self, id: &LoanId) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE loan_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }

    async fn list_loans(&self, query: &LoanQuery) -> AppResult<(Vec<Loan>, i64)> {
        let mut count_builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM loans WHERE 1=1");
        push_loan_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM loans WHERE 1=1");
        push_loan_filters(&mut builder, query);
        builder.push(" ORDER BY created_at DESC, loan_id DESC LIMIT ");
        builder.push_bind(query.per_page());
        builder.push(" OFFSET ");
        builder.push_bind(query.offset());

        let loans = builder.build_query_as::<Loan>().fetch_all(&self.pool).await?;
        Ok((loans, total))
    }

    async fn overdue_loan_ids(&self, today: NaiveDate) -> AppResult<Vec<LoanId>> {
        let ids = sqlx::query_scalar::<_, LoanId>(
            "SELECT loan_id FROM loans WHERE status = 'active' AND next_due_date < $1 ORDER BY loan_id",
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn loan_stats(&self, recent_since: DateTime<Utc>) -> AppResult<LoanStats> {
        let stats = sqlx::query_as::<_, LoanStats>(
            r#"
            SELECT COUNT(*) AS total_loans,
                   COUNT(*) FILTER (WHERE status = 'active') AS active_loans,
                   COUNT(*) FILTER (WHERE status = 'closed') AS closed_loans,
                   COUNT(*) FILTER (WHERE status = 'defaulted') AS defaulted_loans,
                   COALESCE(SUM(principal_amount), 0) AS total_amount_lent,
                   COALESCE(SUM(total_amount_repaid), 0) AS total_amount_repaid,
                   COALESCE(SUM(remaining_balance), 0) AS outstanding_balance,
                   COUNT(*) FILTER (WHERE created_at >= $1) AS recent_loans
            FROM loans
            "#,
        )
        .bind(recent_since)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    async fn get_payment(&self, id: PaymentId) -> AppResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    async fn loan_payments(&self, loan_id: &LoanId) -> AppResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE loan_id = $1 ORDER BY payment_date DESC",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn list_payments(&self, query: &PaymentQuery) -> AppResult<(Vec<Payment>, i64)> {
        let mut count_builder =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM payments WHERE 1=1");
        push_payment_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM payments WHERE 1=1");
        push_payment_filters(&mut builder, query);
        builder.push(if query.oldest_first() {
            " ORDER BY payment_date ASC LIMIT "
        } else {
            " ORDER BY payment_date DESC LIMIT "
        });
        builder.push_bind(query.per_page());
        builder.push(" OFFSET ");
        builder.push_bind(query.offset());

        let payments = builder.build_query_as::<Payment>().fetch_all(&self.pool).await?;
        Ok((payments, total))
    }

    async fn get_lender(&self, id: LenderId) -> AppResult<Option<LenderProfile>> {
        let lender = sqlx::query_as::<_, LenderProfile>("SELECT * FROM lenders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lender)
    }

    async fn get_borrower(&self, id: BorrowerId) -> AppResult<Option<BorrowerProfile>> {
        let borrower = sqlx::query_as::<_, BorrowerProfile>("SELECT * FROM borrowers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(borrower)
    }

    async fn active_loans_for_lender(&self, id: LenderId) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE lender_id = $1 AND status = 'active' ORDER BY created_at DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn recent_approved_payments(
        &self,
        lender_id: Option<LenderId>,
        limit: i64,
    ) -> AppResult<Vec<Payment>> {
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT * FROM payments WHERE status = 'approved'");
        if let Some(lender_id) = lender_id {
            builder.push(" AND lender_id = ");
            builder.push_bind(lender_id);
        }
        builder.push(" ORDER BY admin_approval_date DESC LIMIT ");
        builder.push_bind(limit);

        let payments = builder.build_query_as::<Payment>().fetch_all(&self.pool).await?;
        Ok(payments)
    }

    async fn ledger_counts(&self, since: DateTime<Utc>) -> AppResult<LedgerCounts> {
        let counts = sqlx::query_as::<_, LedgerCounts>(
            r#"
            SELECT (SELECT COUNT(*) FROM lenders) AS total_lenders,
                   (SELECT COUNT(*) FROM borrowers) AS total_borrowers,
                   (SELECT COUNT(*) FROM payments WHERE status = 'pending') AS pending_payments,
                   (SELECT COALESCE(SUM(amount), 0) FROM payments
                     WHERE status = 'approved' AND admin_approval_date >= $1) AS approved_since
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(counts)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Unit of work over one database transaction
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_lender(&mut self, id: LenderId) -> AppResult<Option<LenderProfile>> {
        let lender =
            sqlx::query_as::<_, LenderProfile>("SELECT * FROM lenders WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(lender)
    }

    async fn lock_borrower(&mut self, id: BorrowerId) -> AppResult<Option<BorrowerProfile>> {
        let borrower =
            sqlx::query_as::<_, BorrowerProfile>("SELECT * FROM borrowers WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(borrower)
    }

    async fn insert_lender(&mut self, lender: &LenderProfile) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO lenders (
                id, name, phone_number, upi_id, upi_qr_code_url,
                total_amount_lent, active_loans_count, total_earnings, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(lender.id)
        .bind(&lender.name)
        .bind(&lender.phone_number)
        .bind(&lender.upi_id)
        .bind(&lender.upi_qr_code_url)
        .bind(lender.total_amount_lent)
        .bind(lender.active_loans_count)
        .bind(lender.total_earnings)
        .bind(lender.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_borrower(&mut self, borrower: &BorrowerProfile) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO borrowers (
                id, name, address, phone_number, credit_score, total_borrowed, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(borrower.id)
        .bind(&borrower.name)
        .bind(&borrower.address)
        .bind(&borrower.phone_number)
        .bind(borrower.credit_score)
        .bind(borrower.total_borrowed)
        .bind(borrower.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_lender(&mut self, id: LenderId) -> AppResult<()> {
        sqlx::query("DELETE FROM lenders WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_borrower(&mut self, id: BorrowerId) -> AppResult<()> {
        sqlx::query("DELETE FROM borrowers WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn apply_lender_delta(&mut self, id: LenderId, delta: LenderDelta) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE lenders
            SET total_amount_lent = total_amount_lent + $1,
                active_loans_count = active_loans_count + $2,
                total_earnings = total_earnings + $3
            WHERE id = $4
            "#,
        )
        .bind(delta.total_amount_lent)
        .bind(delta.active_loans_count)
        .bind(delta.total_earnings)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Lender {} not found", id)));
        }
        Ok(())
    }

    async fn adjust_borrowed(&mut self, id: BorrowerId, amount: Decimal) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE borrowers SET total_borrowed = total_borrowed + $1 WHERE id = $2")
                .bind(amount)
                .bind(id)
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Borrower {} not found", id)));
        }
        Ok(())
    }

    async fn next_loan_sequence(&mut self, day: NaiveDate) -> AppResult<u32> {
        // Seed the day's counter from identifiers already on file so that
        // loans created before the counter existed are never reissued.
        let existing = sqlx::query_scalar::<_, LoanId>("SELECT loan_id FROM loans WHERE loan_id LIKE $1")
            .bind(format!("{}%", loan_id::day_prefix(day)))
            .fetch_all(&mut *self.tx)
            .await?;
        let floor = loan_id::next_sequence(day, existing.iter());
        let floor = i32::try_from(floor)
            .map_err(|_| AppError::Internal(format!("Loan sequence overflow on {}", day)))?;

        let sequence: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO loan_id_counters (day, last_seq)
            VALUES ($1, $2)
            ON CONFLICT (day) DO UPDATE
            SET last_seq = GREATEST(loan_id_counters.last_seq + 1, EXCLUDED.last_seq)
            RETURNING last_seq
            "#,
        )
        .bind(day)
        .bind(floor)
        .fetch_one(&mut *self.tx)
        .await?;

        u32::try_from(sequence)
            .map_err(|_| AppError::Internal(format!("Invalid loan sequence {} on {}", sequence, day)))
    }

    async fn insert_loan(&mut self, loan: &Loan) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loans (
                loan_id, borrower_id, lender_id, created_by, principal_amount, total_days,
                emi_per_day, start_date, end_date, status, total_amount_repaid,
                remaining_balance, next_due_date, days_overdue, admin_notes,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(&loan.loan_id)
        .bind(loan.borrower_id)
        .bind(loan.lender_id)
        .bind(loan.created_by)
        .bind(loan.principal_amount)
        .bind(loan.total_days)
        .bind(loan.emi_per_day)
        .bind(loan.start_date)
        .bind(loan.end_date)
        .bind(loan.status)
        .bind(loan.total_amount_repaid)
        .bind(loan.remaining_balance)
        .bind(loan.next_due_date)
        .bind(loan.days_overdue)
        .bind(&loan.admin_notes)
        .bind(loan.created_at)
        .bind(loan.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_loan(&mut self, id: &LoanId) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE loan_id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(loan)
    }

    async fn active_loan_for_borrower(&mut self, id: BorrowerId) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE borrower_id = $1 AND status = 'active' FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(loan)
    }

    async fn lock_loans_for_lender(&mut self, id: LenderId) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE lender_id = $1 FOR UPDATE")
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(loans)
    }

    async fn lock_loans_for_borrower(&mut self, id: BorrowerId) -> AppResult<Vec<Loan>> {
        let loans =
            sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE borrower_id = $1 FOR UPDATE")
                .bind(id)
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(loans)
    }

    async fn update_loan(&mut self, loan: &Loan) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET status = $1,
                total_amount_repaid = $2,
                remaining_balance = $3,
                next_due_date = $4,
                days_overdue = $5,
                admin_notes = $6,
                updated_at = $7
            WHERE loan_id = $8
            "#,
        )
        .bind(loan.status)
        .bind(loan.total_amount_repaid)
        .bind(loan.remaining_balance)
        .bind(loan.next_due_date)
        .bind(loan.days_overdue)
        .bind(&loan.admin_notes)
        .bind(loan.updated_at)
        .bind(&loan.loan_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Loan {} not found", loan.loan_id)));
        }
        Ok(())
    }

    async fn delete_loan(&mut self, id: &LoanId) -> AppResult<()> {
        sqlx::query("DELETE FROM loans WHERE loan_id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, loan_id, borrower_id, lender_id, amount, for_days, screenshot_url,
                status, payment_date, admin_approval_date, approver_id, rejection_reason,
                utr_number
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(payment.id)
        .bind(&payment.loan_id)
        .bind(payment.borrower_id)
        .bind(payment.lender_id)
        .bind(payment.amount)
        .bind(payment.for_days)
        .bind(&payment.screenshot_url)
        .bind(payment.status)
        .bind(payment.payment_date)
        .bind(payment.admin_approval_date)
        .bind(payment.approver_id)
        .bind(&payment.rejection_reason)
        .bind(&payment.utr_number)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_payment(&mut self, id: PaymentId) -> AppResult<Option<Payment>> {
        let payment =
            sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(payment)
    }

    async fn update_payment(&mut self, payment: &Payment) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1,
                admin_approval_date = $2,
                approver_id = $3,
                rejection_reason = $4
            WHERE id = $5
            "#,
        )
        .bind(payment.status)
        .bind(payment.admin_approval_date)
        .bind(payment.approver_id)
        .bind(&payment.rejection_reason)
        .bind(payment.id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Payment {} not found", payment.id)));
        }
        Ok(())
    }

    async fn delete_payments_for_loan(&mut self, id: &LoanId) -> AppResult<Vec<Payment>> {
        let payments =
            sqlx::query_as::<_, Payment>("DELETE FROM payments WHERE loan_id = $1 RETURNING *")
                .bind(id)
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(payments)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
