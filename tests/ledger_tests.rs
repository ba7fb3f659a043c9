//! End-to-end ledger scenarios over the in-memory store

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use emi_ledger::{
    clock::FixedClock,
    config::LedgerConfig,
    models::{
        Actor, ActorRole, BorrowerId, CreateBorrower, CreateLender, CreateLoan, LenderId,
        LoanStatus, PaymentStatus, SubmitPayment,
    },
    repository::InMemoryLedgerStore,
    services::{
        audit::{AuditService, MemoryAuditSink},
        Services,
    },
    AppError,
};

struct Ledger {
    services: Arc<Services>,
    clock: FixedClock,
    admin: Actor,
}

fn may_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

impl Ledger {
    fn new() -> Self {
        let clock = FixedClock::at_date(may_first());
        let services = Services::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(clock.clone()),
            AuditService::new(Arc::new(MemoryAuditSink::new())),
            LedgerConfig::default(),
        );
        Self {
            services: Arc::new(services),
            clock,
            admin: Actor::admin(Uuid::new_v4()),
        }
    }

    async fn lender(&self, phone: &str) -> LenderId {
        let lender = self
            .services
            .profiles
            .create_lender(
                self.admin,
                CreateLender {
                    name: "Anil Shah".to_string(),
                    phone_number: phone.to_string(),
                    upi_id: format!("{}@upi", phone),
                    upi_qr_code_url: "https://files.example/qr.png".to_string(),
                },
            )
            .await
            .unwrap();
        lender.id
    }

    async fn borrower(&self, phone: &str) -> BorrowerId {
        let borrower = self
            .services
            .profiles
            .create_borrower(
                self.admin,
                CreateBorrower {
                    name: "Lakshmi".to_string(),
                    address: "7 Canal Road".to_string(),
                    phone_number: phone.to_string(),
                    credit_score: Some(640),
                },
            )
            .await
            .unwrap();
        borrower.id
    }
}

fn loan_request(borrower_id: BorrowerId, lender_id: LenderId) -> CreateLoan {
    CreateLoan {
        borrower_id,
        lender_id,
        principal_amount: dec!(3000),
        total_days: 30,
        emi_per_day: dec!(100),
        start_date: may_first(),
    }
}

fn payment(borrower_id: BorrowerId, amount: Decimal, for_days: i32) -> SubmitPayment {
    SubmitPayment {
        borrower_id,
        amount,
        for_days,
        screenshot_url: "https://files.example/proof.png".to_string(),
        utr_number: Some("UTR0001".to_string()),
    }
}

fn as_borrower(id: BorrowerId) -> Actor {
    Actor::new(id.0, ActorRole::Borrower)
}

#[tokio::test]
async fn test_loan_ids_are_sequential_within_a_day() {
    let ledger = Ledger::new();
    let lender = ledger.lender("9811111111").await;

    let mut ids = Vec::new();
    for phone in ["9822222221", "9822222222", "9822222223"] {
        let borrower = ledger.borrower(phone).await;
        let loan = assert_ok!(
            ledger
                .services
                .loans
                .create_loan(ledger.admin, loan_request(borrower, lender))
                .await
        );
        ids.push(loan.loan_id.to_string());
    }

    assert_eq!(ids, ["LN-20240501-001", "LN-20240501-002", "LN-20240501-003"]);

    ledger.clock.advance(Duration::days(1));
    let borrower = ledger.borrower("9822222224").await;
    let loan = assert_ok!(
        ledger
            .services
            .loans
            .create_loan(ledger.admin, loan_request(borrower, lender))
            .await
    );
    assert_eq!(loan.loan_id.to_string(), "LN-20240502-001");
}

#[tokio::test]
async fn test_full_repayment_closes_loan() {
    let ledger = Ledger::new();
    let lender = ledger.lender("9811111111").await;
    let borrower = ledger.borrower("9822222221").await;
    let loan = assert_ok!(
        ledger
            .services
            .loans
            .create_loan(ledger.admin, loan_request(borrower, lender))
            .await
    );

    let lender_profile = ledger.services.profiles.get_lender(lender).await.unwrap();
    assert_eq!(lender_profile.active_loans_count, 1);
    assert_eq!(lender_profile.total_amount_lent, dec!(3000));

    let first = assert_ok!(
        ledger
            .services
            .payments
            .submit(as_borrower(borrower), payment(borrower, dec!(1000), 10))
            .await
    );
    let settled = assert_ok!(ledger.services.payments.approve(ledger.admin, first.id).await);
    assert_eq!(settled.loan.remaining_balance, dec!(2000));
    assert_eq!(settled.loan.next_due_date, NaiveDate::from_ymd_opt(2024, 5, 11).unwrap());
    assert_eq!(settled.loan.status, LoanStatus::Active);

    let rest = assert_ok!(
        ledger
            .services
            .payments
            .submit(as_borrower(borrower), payment(borrower, dec!(2000), 20))
            .await
    );
    let settled = assert_ok!(ledger.services.payments.approve(ledger.admin, rest.id).await);
    assert_eq!(settled.loan.status, LoanStatus::Closed);
    assert_eq!(settled.loan.remaining_balance, Decimal::ZERO);
    assert_eq!(settled.loan.total_amount_repaid, dec!(3000));

    let lender_profile = ledger.services.profiles.get_lender(lender).await.unwrap();
    assert_eq!(lender_profile.active_loans_count, 0);
    assert_eq!(lender_profile.total_earnings, dec!(3000));

    // No active loan is left to pay against
    let err = assert_err!(
        ledger
            .services
            .payments
            .submit(as_borrower(borrower), payment(borrower, dec!(100), 1))
            .await
    );
    assert!(matches!(err, AppError::NotFound(_)));

    let details = ledger.services.loans.get_loan_details(&loan.loan_id).await.unwrap();
    assert_eq!(details.payment_summary.approved_payments, 2);
    assert_eq!(details.payment_summary.total_paid, dec!(3000));
}

#[tokio::test]
async fn test_overdue_sweep_defaults_loan_past_threshold() {
    let ledger = Ledger::new();
    let lender = ledger.lender("9811111111").await;
    let borrower = ledger.borrower("9822222221").await;
    let loan = ledger
        .services
        .loans
        .create_loan(ledger.admin, loan_request(borrower, lender))
        .await
        .unwrap();

    ledger.clock.advance(Duration::days(35));
    let sweep = assert_ok!(ledger.services.loans.sweep_overdue(Actor::system()).await);
    assert_eq!(sweep.examined, 1);
    assert_eq!(sweep.defaulted, 1);

    let swept = ledger.services.loans.get_loan(&loan.loan_id).await.unwrap();
    assert_eq!(swept.status, LoanStatus::Defaulted);
    assert_eq!(swept.days_overdue, 35);

    let lender_profile = ledger.services.profiles.get_lender(lender).await.unwrap();
    assert_eq!(lender_profile.active_loans_count, 0);

    // A defaulted loan is no longer picked up
    let again = ledger.services.loans.sweep_overdue(Actor::system()).await.unwrap();
    assert_eq!(again.examined, 0);
}

#[tokio::test]
async fn test_deleting_loan_reverses_aggregates() {
    let ledger = Ledger::new();
    let lender = ledger.lender("9811111111").await;
    let borrower = ledger.borrower("9822222221").await;
    let loan = ledger
        .services
        .loans
        .create_loan(ledger.admin, loan_request(borrower, lender))
        .await
        .unwrap();

    let approved = ledger
        .services
        .payments
        .submit(as_borrower(borrower), payment(borrower, dec!(300), 3))
        .await
        .unwrap();
    ledger.services.payments.approve(ledger.admin, approved.id).await.unwrap();
    let pending = ledger
        .services
        .payments
        .submit(as_borrower(borrower), payment(borrower, dec!(200), 2))
        .await
        .unwrap();

    assert_ok!(ledger.services.loans.delete_loan(ledger.admin, &loan.loan_id).await);

    let lender_profile = ledger.services.profiles.get_lender(lender).await.unwrap();
    assert_eq!(lender_profile.total_amount_lent, Decimal::ZERO);
    assert_eq!(lender_profile.total_earnings, Decimal::ZERO);
    assert_eq!(lender_profile.active_loans_count, 0);
    let borrower_profile = ledger.services.profiles.get_borrower(borrower).await.unwrap();
    assert_eq!(borrower_profile.total_borrowed, Decimal::ZERO);

    let err = assert_err!(ledger.services.payments.get(pending.id).await);
    assert!(matches!(err, AppError::NotFound(_)));

    // The borrower can take a new loan afterwards
    assert_ok!(
        ledger
            .services
            .loans
            .create_loan(ledger.admin, loan_request(borrower, lender))
            .await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_settle_once() {
    let ledger = Ledger::new();
    let lender = ledger.lender("9811111111").await;
    let borrower = ledger.borrower("9822222221").await;
    let loan = ledger
        .services
        .loans
        .create_loan(ledger.admin, loan_request(borrower, lender))
        .await
        .unwrap();
    let submitted = ledger
        .services
        .payments
        .submit(as_borrower(borrower), payment(borrower, dec!(500), 5))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let services = ledger.services.clone();
        let admin = ledger.admin;
        let id = submitted.id;
        handles.push(tokio::spawn(async move { services.payments.approve(admin, id).await }));
    }

    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => approved += 1,
            Err(AppError::InvalidState(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(approved, 1);

    let settled = ledger.services.loans.get_loan(&loan.loan_id).await.unwrap();
    assert_eq!(settled.total_amount_repaid, dec!(500));
    assert_eq!(settled.remaining_balance, dec!(2500));
    let payment = ledger.services.payments.get(submitted.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    let lender_profile = ledger.services.profiles.get_lender(lender).await.unwrap();
    assert_eq!(lender_profile.total_earnings, dec!(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creation_for_one_borrower_yields_one_loan() {
    let ledger = Ledger::new();
    let lender = ledger.lender("9811111111").await;
    let borrower = ledger.borrower("9822222221").await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let services = ledger.services.clone();
        let admin = ledger.admin;
        handles.push(tokio::spawn(async move {
            services
                .loans
                .create_loan(admin, loan_request(borrower, lender))
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(AppError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(created, 1);

    let lender_profile = ledger.services.profiles.get_lender(lender).await.unwrap();
    assert_eq!(lender_profile.active_loans_count, 1);
    assert_eq!(lender_profile.total_amount_lent, dec!(3000));
    let borrower_profile = ledger.services.profiles.get_borrower(borrower).await.unwrap();
    assert_eq!(borrower_profile.total_borrowed, dec!(3000));
}
