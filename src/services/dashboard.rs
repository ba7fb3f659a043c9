//! Read-only dashboards for each role

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    ledger::bounded_amount,
    models::{
        AdminDashboard, BorrowerDashboard, BorrowerId, BorrowerPaymentSummary, DashboardFinancials,
        DashboardOverview, LenderDashboard, LenderId, LenderPaymentInfo, LenderSummary, Loan,
        LoanQuery, LoanStatus, LoanStatusCounts, PaymentQuery, PaymentStatus,
    },
    repository::Repository,
};

/// Rows shown in the "recent payments" panels
const RECENT_PAYMENTS: i64 = 5;
/// Window for the admin's weekly earnings
const WEEKLY_EARNINGS_DAYS: i64 = 7;
/// Window for the loan stats' "recent loans" figure
const RECENT_LOANS_DAYS: i64 = 30;

#[derive(Clone)]
pub struct DashboardService {
    repository: Repository,
    clock: Arc<dyn Clock>,
}

fn checked_sum<I: IntoIterator<Item = Decimal>>(amounts: I, what: &str) -> AppResult<Decimal> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |sum, amount| bounded_amount(sum.checked_add(amount), what))
}

impl DashboardService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Lender profile with the recoverable balance over active loans and the
    /// latest approved payments
    pub async fn lender_dashboard(&self, lender_id: LenderId) -> AppResult<LenderDashboard> {
        let lender = self
            .repository
            .get_lender(lender_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lender {} not found", lender_id)))?;

        let active_loans = self.repository.active_loans_for_lender(lender_id).await?;
        let recent_payments = self
            .repository
            .recent_approved_payments(Some(lender_id), RECENT_PAYMENTS)
            .await?;

        let summary = LenderSummary {
            total_active_loans: active_loans.len() as i64,
            total_amount_recoverable: checked_sum(
                active_loans.iter().map(|l| l.remaining_balance),
                "Recoverable amount",
            )?,
            recent_earnings: checked_sum(recent_payments.iter().map(|p| p.amount), "Recent earnings")?,
        };

        Ok(LenderDashboard {
            lender,
            summary,
            active_loans,
            recent_payments,
        })
    }

    /// Borrower profile with the repayment position of the active loan
    pub async fn borrower_dashboard(&self, borrower_id: BorrowerId) -> AppResult<BorrowerDashboard> {
        let borrower = self
            .repository
            .get_borrower(borrower_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrower {} not found", borrower_id)))?;

        let active_loan = self.active_loan(borrower_id).await?;
        let payment_summary = match &active_loan {
            Some(loan) => {
                let payments = self.repository.loan_payments(&loan.loan_id).await?;
                BorrowerPaymentSummary {
                    total_paid: checked_sum(
                        payments
                            .iter()
                            .filter(|p| p.status == PaymentStatus::Approved)
                            .map(|p| p.amount),
                        "Total paid",
                    )?,
                    remaining_balance: loan.remaining_balance,
                    next_due_date: Some(loan.next_due_date),
                    days_overdue: loan.days_overdue,
                    emi_per_day: Some(loan.emi_per_day),
                }
            }
            None => BorrowerPaymentSummary::default(),
        };

        Ok(BorrowerDashboard {
            borrower,
            active_loan,
            payment_summary,
        })
    }

    /// Portfolio figures, review-queue size and the latest submissions
    pub async fn admin_dashboard(&self) -> AppResult<AdminDashboard> {
        let now = self.clock.now();
        let stats = self
            .repository
            .loan_stats(now - Duration::days(RECENT_LOANS_DAYS))
            .await?;
        let counts = self
            .repository
            .ledger_counts(now - Duration::days(WEEKLY_EARNINGS_DAYS))
            .await?;
        let latest = PaymentQuery {
            per_page: Some(RECENT_PAYMENTS),
            ..Default::default()
        };
        let (recent_payments, _) = self.repository.list_payments(&latest).await?;

        Ok(AdminDashboard {
            overview: DashboardOverview {
                total_lenders: counts.total_lenders,
                total_borrowers: counts.total_borrowers,
                total_loans: stats.total_loans,
                active_loans: stats.active_loans,
                pending_payments: counts.pending_payments,
            },
            financials: DashboardFinancials {
                total_amount_lent: stats.total_amount_lent,
                total_amount_repaid: stats.total_amount_repaid,
                weekly_earnings: counts.approved_since,
                outstanding_balance: stats.outstanding_balance,
            },
            loan_status: LoanStatusCounts {
                active: stats.active_loans,
                closed: stats.closed_loans,
                defaulted: stats.defaulted_loans,
            },
            recent_payments,
        })
    }

    /// UPI details of the lender behind the borrower's active loan
    pub async fn lender_payment_info(&self, borrower_id: BorrowerId) -> AppResult<LenderPaymentInfo> {
        let loan = self.active_loan(borrower_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("No active loan found for borrower {}", borrower_id))
        })?;
        let lender = self
            .repository
            .get_lender(loan.lender_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lender {} not found", loan.lender_id)))?;

        Ok(LenderPaymentInfo {
            lender_id: lender.id,
            lender_name: lender.name,
            upi_id: lender.upi_id,
            qr_code_url: lender.upi_qr_code_url,
            emi_per_day: loan.emi_per_day,
        })
    }

    async fn active_loan(&self, borrower_id: BorrowerId) -> AppResult<Option<Loan>> {
        let query = LoanQuery {
            status: Some(LoanStatus::Active),
            borrower_id: Some(borrower_id),
            ..Default::default()
        };
        let (mut loans, _) = self.repository.list_loans(&query).await?;
        Ok(loans.pop())
    }
}
