use actix_web::{http::StatusCode, test::TestRequest};
use loan_payment_engine::{
    db_types::{LoanState, PaymentKind, PaymentProvider, StepState, TransferState},
    providers::MockNetwork,
    test_utils::fixtures::TestSystem,
};

use super::helpers::{send, sign};
use crate::{data_objects::ActionResult, middleware::SIGNATURE_HEADER};

/// A loan with its funding payment under way. Returns the payment id.
async fn funding_in_flight(sys: &TestSystem) -> i64 {
    let fixture = sys.loan_fixture(25_000, 0, 1, LoanState::Funding).await;
    let payment = sys
        .orchestrator
        .payments()
        .initiate_and_start(PaymentKind::Funding, fixture.loan.id)
        .await
        .expect("Error initiating payment")
        .expect("Funding should be ready");
    sys.settle().await;
    payment.id
}

fn completed_body(transfer_id: i64) -> String {
    format!(r#"{{"status":"completed","reference":"{}"}}"#, MockNetwork::reference_for(transfer_id))
}

fn webhook(provider: PaymentProvider, transfer_id: i64, body: &str, signature: &str) -> TestRequest {
    TestRequest::post()
        .uri(&format!("/webhook/transfers/{provider}/{transfer_id}"))
        .insert_header((SIGNATURE_HEADER, signature.to_string()))
        .set_payload(body.to_string())
}

#[actix_web::test]
async fn signed_webhook_completes_the_transfer() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let payment_id = funding_in_flight(&sys).await;
    let step = sys.steps(payment_id).await.remove(0);
    let transfer = sys.latest_transfer(step.id).await;
    assert_eq!(transfer.state, TransferState::Pending);

    let body = completed_body(transfer.id);
    let (status, res) = send(&sys, webhook(transfer.provider, transfer.id, &body, &sign(&body))).await;
    assert_eq!(status, StatusCode::OK);
    let result = serde_json::from_str::<ActionResult>(&res).expect("Response was not an ActionResult");
    assert!(result.changed);
    assert_eq!(sys.latest_transfer(step.id).await.state, TransferState::Completed);
    sys.settle().await;
    assert_eq!(sys.steps(payment_id).await[0].state, StepState::Completed);

    // The network delivers the same webhook again
    let (status, res) = send(&sys, webhook(transfer.provider, transfer.id, &body, &sign(&body))).await;
    assert_eq!(status, StatusCode::OK);
    let result = serde_json::from_str::<ActionResult>(&res).expect("Response was not an ActionResult");
    assert!(!result.changed);
}

#[actix_web::test]
async fn unsigned_webhooks_are_rejected() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let payment_id = funding_in_flight(&sys).await;
    let step = sys.steps(payment_id).await.remove(0);
    let transfer = sys.latest_transfer(step.id).await;
    let body = completed_body(transfer.id);

    let req = TestRequest::post()
        .uri(&format!("/webhook/transfers/{}/{}", transfer.provider, transfer.id))
        .set_payload(body.clone());
    let (status, res) = send(&sys, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(res, "No webhook signature found.");

    let (status, res) = send(&sys, webhook(transfer.provider, transfer.id, &body, &sign("{}"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(res, "Invalid webhook signature.");
    assert_eq!(sys.latest_transfer(step.id).await.state, TransferState::Pending);
}

#[actix_web::test]
async fn webhooks_for_unknown_transfers() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let body = completed_body(4242);
    let (status, _) = send(&sys, webhook(PaymentProvider::Checkbook, 4242, &body, &sign(&body))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let req = TestRequest::post()
        .uri("/webhook/transfers/paypal/4242")
        .insert_header((SIGNATURE_HEADER, sign(&body)))
        .set_payload(body.clone());
    let (status, res) = send(&sys, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(res.contains("Invalid provider 'paypal'"));
}

#[actix_web::test]
async fn webhooks_from_the_wrong_network_are_rejected() {
    let _ = env_logger::try_init().ok();
    let sys = TestSystem::new().await;
    let payment_id = funding_in_flight(&sys).await;
    let step = sys.steps(payment_id).await.remove(0);
    let transfer = sys.latest_transfer(step.id).await;
    let other = PaymentProvider::ALL.iter().copied().find(|p| *p != transfer.provider).expect("Only one provider");
    let body = completed_body(transfer.id);

    let (status, _) = send(&sys, webhook(other, transfer.id, &body, &sign(&body))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&sys, webhook(transfer.provider, transfer.id, "garbage", &sign("garbage"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(sys.latest_transfer(step.id).await.state, TransferState::Pending);
}
