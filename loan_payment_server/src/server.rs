use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use loan_payment_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    providers::{AchNetwork, MockNetwork, NetworkAdapter, ProviderRegistry},
    EventOrchestrator,
    OutboxRelay,
    ReconciliationApi,
    ReconciliationConfig,
    RetryPolicy,
    SqliteDatabase,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
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
    workers::{start_outbox_relay, start_reconciliation_worker},
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let producers = start_hooks();
    let retry_policy = RetryPolicy::new(config.max_transfer_attempts);
    let orchestrator = Arc::new(EventOrchestrator::new(db.clone(), provider_registry(&config), retry_policy));
    let relay = OutboxRelay::new(db.clone(), Arc::clone(&orchestrator), producers.clone());
    let _relay = start_outbox_relay(relay, config.outbox_poll_interval);
    let reconcile_config = ReconciliationConfig { stale_after: config.stale_step_timeout, ..Default::default() };
    let sweeper = ReconciliationApi::new(db.clone(), Arc::clone(&orchestrator), producers, reconcile_config);
    let _sweeper = start_reconciliation_worker(sweeper, config.reconcile_interval);
    let srv = create_server_instance(config, db, orchestrator)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

/// The mock network services every provider, except those configured to go through the ACH adapter.
pub fn provider_registry(config: &ServerConfig) -> ProviderRegistry {
    let ach = AchNetwork::new();
    config.ach_providers.iter().fold(ProviderRegistry::mock_all(MockNetwork::new()), |registry, provider| {
        info!("🪛️ {provider} transfers will be sent over ACH");
        registry.with_adapter(*provider, NetworkAdapter::Ach(ach.clone()))
    })
}

/// Operator alerts go to the log.
fn start_hooks() -> EventProducers {
    let mut hooks = EventHooks::default();
    hooks
        .on_event(|ev| {
            Box::pin(async move {
                debug!("🪝️ {} handled", ev.name());
            })
        })
        .on_out_of_sync(|ev| {
            Box::pin(async move {
                error!("🪝️ OUT OF SYNC (outbox event {:?}). {}", ev.outbox_event_id, ev.message);
            })
        })
        .on_stale_step(|ev| {
            Box::pin(async move {
                warn!(
                    "🪝️ Step #{} of payment #{} has been waiting on transfer {:?} ({:?}) since {}",
                    ev.step_id, ev.payment_id, ev.transfer_id, ev.transfer_state, ev.pending_since
                );
            })
        });
    let handlers = EventHandlers::new(128, hooks);
    let producers = handlers.producers();
    handlers.start_handlers();
    producers
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    orchestrator: Arc<EventOrchestrator<SqliteDatabase>>,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let webhook_scope = web::scope("/webhook")
            .wrap(WebhookSignatureCheck::new(config.webhook.clone()))
            .service(TransferWebhookRoute::<SqliteDatabase>::new());
        let api_scope = web::scope("/api")
            .service(InitiatePaymentRoute::<SqliteDatabase>::new())
            .service(AdvancePaymentRoute::<SqliteDatabase>::new())
            .service(PaymentStatusRoute::<SqliteDatabase>::new())
            .service(AdvanceLoanRoute::<SqliteDatabase>::new())
            .service(ResumeLoanRoute::<SqliteDatabase>::new())
            .service(ConnectAccountsRoute::<SqliteDatabase>::new())
            .service(LoanStatusRoute::<SqliteDatabase>::new());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("lps::access_log"))
            .app_data(web::Data::from(Arc::clone(&orchestrator)))
            .app_data(web::Data::new(db.clone()))
            .service(health)
            .service(webhook_scope)
            .service(api_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
