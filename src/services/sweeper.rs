//! Periodic overdue sweep

use std::time::Duration;

use tokio::task::JoinHandle;

use super::loans::LoansService;
use crate::models::Actor;

/// Run the overdue sweep every `interval` until the task is aborted.
/// A failed sweep is logged and retried on the next tick.
pub fn spawn(loans: LoansService, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Starting overdue sweeper (every {}s)", interval.as_secs());

        loop {
            tokio::time::sleep(interval).await;

            if let Err(e) = loans.sweep_overdue(Actor::system()).await {
                tracing::error!("Overdue sweep failed: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoanStatus;
    use crate::services::test_support::{create_loan_request, Fixture};

    #[tokio::test]
    async fn test_sweeper_defaults_overdue_loan() {
        let fx = Fixture::new().await;
        let loan = fx
            .services
            .loans
            .create_loan(fx.admin, create_loan_request(&fx))
            .await
            .unwrap();
        fx.clock.advance(chrono::Duration::days(40));

        let handle = spawn(fx.services.loans.clone(), Duration::from_millis(20));
        let mut status = LoanStatus::Active;
        for _ in 0..100 {
            status = fx.services.loans.get_loan(&loan.loan_id).await.unwrap().status;
            if status == LoanStatus::Defaulted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(status, LoanStatus::Defaulted);
    }
}
