use std::sync::Arc;

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, web, App};
use log::debug;
use loan_payment_engine::{test_utils::fixtures::TestSystem, SqliteDatabase};

use crate::{
    config::WebhookConfig,
    helpers::calculate_hmac,
    middleware::WebhookSignatureCheck,
    routes::{
        health,
        AdvanceLoanRoute,
        AdvancePaymentRoute,
        ConnectAccountsRoute,
        InitiatePaymentRoute,
        LoanStatusRoute,
        PaymentStatusRoute,
        ResumeLoanRoute,
        TransferWebhookRoute,
    },
};

// DO NOT re-use this key anywhere.
pub const WEBHOOK_SECRET: &str = "endpoint-test-secret";

pub fn sign(body: &str) -> String {
    calculate_hmac(WEBHOOK_SECRET, body.as_bytes()).expect("Could not sign body")
}

/// Sends the request to an app wired the same way as the real server, on top of the test system's database.
pub async fn send(sys: &TestSystem, req: TestRequest) -> (StatusCode, String) {
    let webhooks = web::scope("/webhook")
        .wrap(WebhookSignatureCheck::new(WebhookConfig::new(WEBHOOK_SECRET)))
        .service(TransferWebhookRoute::<SqliteDatabase>::new());
    let api = web::scope("/api")
        .service(InitiatePaymentRoute::<SqliteDatabase>::new())
        .service(AdvancePaymentRoute::<SqliteDatabase>::new())
        .service(PaymentStatusRoute::<SqliteDatabase>::new())
        .service(AdvanceLoanRoute::<SqliteDatabase>::new())
        .service(ResumeLoanRoute::<SqliteDatabase>::new())
        .service(ConnectAccountsRoute::<SqliteDatabase>::new())
        .service(LoanStatusRoute::<SqliteDatabase>::new());
    let app = App::new()
        .app_data(web::Data::from(Arc::clone(&sys.orchestrator)))
        .app_data(web::Data::new(sys.db.clone()))
        .service(health)
        .service(webhooks)
        .service(api);
    let service = test::init_service(app).await;
    debug!("🚀️ Making request");
    match test::try_call_service(&service, req.to_request()).await {
        Ok(res) => {
            let (_, res) = res.into_parts();
            let status = res.status();
            let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().unwrap()).into_owned();
            (status, body)
        },
        Err(e) => (e.as_response_error().status_code(), e.to_string()),
    }
}
