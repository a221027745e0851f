use actix_web::{http::StatusCode, test::TestRequest};
use loan_payment_engine::{
    db_types::{Cents, LoanPayment, LoanState, LoanType, NewLoan, PaymentKind, PaymentState, StepState},
    test_utils::fixtures::TestSystem,
    LoanManagement,
};

use super::helpers::send;
use crate::data_objects::{ActionResult, ConnectAccountsParams, LoanStatus, PaymentStatus};

const PRINCIPAL: i64 = 40_000;

#[actix_web::test]
async fn initiate_funding_payment() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 100, 1, LoanState::Funding).await;
    let path = format!("/api/loans/{}/payments/funding", fixture.loan.id);

    let (status, body) = send(&sys, TestRequest::post().uri(&path)).await;
    assert_eq!(status, StatusCode::CREATED);
    let payment = serde_json::from_str::<LoanPayment>(&body).expect("Response was not a payment");
    assert_eq!(payment.kind, PaymentKind::Funding);
    assert_eq!(payment.state, PaymentState::Pending);
    assert_eq!(payment.amount, Cents::from(PRINCIPAL + 100));

    // Funding is already under way
    let (status, body) = send(&sys, TestRequest::post().uri(&path)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body.contains("is not ready for a funding payment"));
    assert_eq!(sys.payments(fixture.loan.id).await.len(), 1);
}

#[actix_web::test]
async fn initiate_payment_bad_requests() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Funding).await;

    let path = format!("/api/loans/{}/payments/tip", fixture.loan.id);
    let (status, _) = send(&sys, TestRequest::post().uri(&path)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&sys, TestRequest::post().uri("/api/loans/9999/payments/funding")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("Loan 9999 does not exist"));
}

#[actix_web::test]
async fn zero_fee_payment_is_created_completed() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Disbursed).await;
    let path = format!("/api/loans/{}/payments/fee", fixture.loan.id);
    let (status, body) = send(&sys, TestRequest::post().uri(&path)).await;
    assert_eq!(status, StatusCode::CREATED);
    let payment = serde_json::from_str::<LoanPayment>(&body).expect("Response was not a payment");
    assert_eq!(payment.state, PaymentState::Completed);

    let (status, body) = send(&sys, TestRequest::get().uri(&format!("/api/payments/{}", payment.id))).await;
    assert_eq!(status, StatusCode::OK);
    let status = serde_json::from_str::<PaymentStatus>(&body).expect("Response was not a payment status");
    assert!(status.steps.is_empty());
}

#[actix_web::test]
async fn fetch_loan_and_payment_status() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let loan_id = fixture.loan.id;

    let (status, body) = send(&sys, TestRequest::post().uri(&format!("/api/loans/{loan_id}/advance"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(serde_json::from_str::<ActionResult>(&body).expect("Response was not an ActionResult").changed);
    sys.settle().await;

    let (status, body) = send(&sys, TestRequest::get().uri(&format!("/api/loans/{loan_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let loan_status = serde_json::from_str::<LoanStatus>(&body).expect("Response was not a loan status");
    assert_eq!(loan_status.loan.state, LoanState::Funding);
    assert_eq!(loan_status.payments.len(), 1);
    let payment_id = loan_status.payments[0].id;

    let (status, body) = send(&sys, TestRequest::get().uri(&format!("/api/payments/{payment_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let payment_status = serde_json::from_str::<PaymentStatus>(&body).expect("Response was not a payment status");
    assert_eq!(payment_status.payment.state, PaymentState::Pending);
    assert_eq!(payment_status.steps.len(), 2);
    assert_eq!(payment_status.steps[0].step.state, StepState::Pending);
    assert_eq!(payment_status.steps[0].transfers.len(), 1);
    assert_eq!(payment_status.steps[1].step.state, StepState::Created);
    assert!(payment_status.steps[1].transfers.is_empty());

    // Advancing a pending payment with nothing new to report changes nothing
    let (status, body) = send(&sys, TestRequest::post().uri(&format!("/api/payments/{payment_id}/advance"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!serde_json::from_str::<ActionResult>(&body).expect("Response was not an ActionResult").changed);

    let (status, _) = send(&sys, TestRequest::get().uri("/api/loans/9999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&sys, TestRequest::get().uri("/api/payments/9999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&sys, TestRequest::post().uri("/api/payments/9999/advance")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn resume_loan_that_is_not_paused() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Funded).await;
    let path = format!("/api/loans/{}/resume", fixture.loan.id);
    let (status, body) = send(&sys, TestRequest::post().uri(&path)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!serde_json::from_str::<ActionResult>(&body).expect("Response was not an ActionResult").changed);
    assert_eq!(sys.loan(fixture.loan.id).await.state, LoanState::Funded);

    let (status, _) = send(&sys, TestRequest::post().uri("/api/loans/9999/resume")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn connect_accounts_starts_funding() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let fixture = sys.loan_fixture(PRINCIPAL, 0, 1, LoanState::Accepted).await;
    let loan = NewLoan::new(Cents::from(PRINCIPAL), LoanType::DirectBillPay).with_state(LoanState::Accepted);
    let loan = sys.db.insert_loan(loan).await.expect("Error creating loan");
    let path = format!("/api/loans/{}/accounts", loan.id);

    let params = ConnectAccountsParams { lender_account_id: Some(fixture.lender.id), ..Default::default() };
    let (status, body) = send(&sys, TestRequest::post().uri(&path).set_json(&params)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!serde_json::from_str::<ActionResult>(&body).expect("Response was not an ActionResult").changed);

    let params = ConnectAccountsParams {
        borrower_account_id: Some(fixture.borrower.id),
        biller_account_id: Some(fixture.biller.id),
        ..Default::default()
    };
    let (status, body) = send(&sys, TestRequest::post().uri(&path).set_json(&params)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(serde_json::from_str::<ActionResult>(&body).expect("Response was not an ActionResult").changed);
    sys.settle().await;
    let loan = sys.loan(loan.id).await;
    assert_eq!(loan.state, LoanState::Funding);
    assert_eq!(loan.lender_account_id, Some(fixture.lender.id));

    let req =
        TestRequest::post().uri(&path).insert_header(("Content-Type", "application/json")).set_payload("not json");
    let (status, _) = send(&sys, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
