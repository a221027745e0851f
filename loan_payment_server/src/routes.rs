//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Every handler here is async, and only awaits database and network
//! calls.
//!
//! Handlers never wait for a payment to finish. They make one state change, which writes its events to the outbox,
//! and return. The outbox relay carries the flow on from there.
use actix_web::{get, web, HttpResponse, Responder};
use log::*;
use loan_payment_engine::{
    db_types::{PaymentKind, PaymentProvider},
    AdvanceResult,
    EventOrchestrator,
    LoanManagement,
    LoanPaymentDatabase,
    PaymentManagement,
    TransferManagement,
};

use crate::{
    data_objects::{ActionResult, ConnectAccountsParams, LoanStatus, PaymentStatus, StepStatus},
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

fn parse_path<T>(value: &str, what: &str) -> Result<T, ServerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ServerError::InvalidRequestPath(format!("Invalid {what} '{value}'. {e}")))
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(transfer_webhook => Post "/transfers/{provider}/{transfer_id}" impl LoanPaymentDatabase);
/// Route handler for transfer network webhooks
///
/// The body is passed to the provider's adapter as-is. Only the network that carries the transfer may update it.
/// Repeat deliveries are harmless: once a transfer has completed or failed, further updates are acknowledged and
/// ignored.
pub async fn transfer_webhook<B: LoanPaymentDatabase>(
    path: web::Path<(String, i64)>,
    body: String,
    api: web::Data<EventOrchestrator<B>>,
) -> Result<HttpResponse, ServerError> {
    let (provider, transfer_id) = path.into_inner();
    let provider = parse_path::<PaymentProvider>(&provider.to_lowercase(), "provider")?;
    debug!("💻️ Received {provider} webhook for transfer #{transfer_id}");
    trace!("💻️ Webhook body: {body}");
    let result = api.transfers().handle_provider_update(provider, transfer_id, &body).await.map_err(|e| {
        warn!("💻️ Could not apply {provider} update for transfer #{transfer_id}. {e}");
        ServerError::from(e)
    })?;
    respond(result, format!("Transfer #{transfer_id}"))
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(initiate_payment => Post "/loans/{loan_id}/payments/{kind}" impl LoanPaymentDatabase);
/// Creates the payment for a loan stage and starts its first step.
///
/// Responds with 422 if the stage cannot start yet, e.g. because a payment for it is already under way or the loan
/// is missing an account.
pub async fn initiate_payment<B: LoanPaymentDatabase>(
    path: web::Path<(i64, String)>,
    api: web::Data<EventOrchestrator<B>>,
) -> Result<HttpResponse, ServerError> {
    let (loan_id, kind) = path.into_inner();
    let kind = parse_path::<PaymentKind>(&kind.to_lowercase(), "payment kind")?;
    info!("💻️ Request to initiate a {kind} payment for loan #{loan_id}");
    match api.payments().initiate_and_start(kind, loan_id).await? {
        Some(payment) => Ok(HttpResponse::Created().json(payment)),
        None => Err(ServerError::NotReady(format!("Loan #{loan_id} is not ready for a {kind} payment"))),
    }
}

route!(advance_payment => Post "/payments/{payment_id}/advance" impl LoanPaymentDatabase);
pub async fn advance_payment<B: LoanPaymentDatabase>(
    path: web::Path<i64>,
    api: web::Data<EventOrchestrator<B>>,
) -> Result<HttpResponse, ServerError> {
    let payment_id = path.into_inner();
    debug!("💻️ Request to advance payment #{payment_id}");
    let result = api.payments().advance(payment_id).await?;
    respond(result, format!("Payment #{payment_id}"))
}

route!(payment_status => Get "/payments/{payment_id}" impl LoanPaymentDatabase);
pub async fn payment_status<B: LoanPaymentDatabase>(
    path: web::Path<i64>,
    db: web::Data<B>,
) -> Result<HttpResponse, ServerError> {
    let payment_id = path.into_inner();
    let payment = db
        .fetch_payment(payment_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Payment #{payment_id} does not exist")))?;
    let mut steps = Vec::new();
    for step in db.fetch_steps_for_payment(payment_id).await? {
        let transfers = db.fetch_transfers_for_step(step.id).await?;
        steps.push(StepStatus { step, transfers });
    }
    Ok(HttpResponse::Ok().json(PaymentStatus { payment, steps }))
}

//----------------------------------------------   Loans  ----------------------------------------------------
route!(loan_status => Get "/loans/{loan_id}" impl LoanPaymentDatabase);
pub async fn loan_status<B: LoanPaymentDatabase>(
    path: web::Path<i64>,
    db: web::Data<B>,
) -> Result<HttpResponse, ServerError> {
    let loan_id = path.into_inner();
    let loan = db
        .fetch_loan(loan_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Loan #{loan_id} does not exist")))?;
    let payments = db.fetch_payments_for_loan(loan_id).await?;
    Ok(HttpResponse::Ok().json(LoanStatus { loan, payments }))
}

route!(advance_loan => Post "/loans/{loan_id}/advance" impl LoanPaymentDatabase);
/// Hands the loan to its next stage (funded → disbursing, disbursed → repaying, repaid → closed). Loans in any other
/// state are re-evaluated.
pub async fn advance_loan<B: LoanPaymentDatabase>(
    path: web::Path<i64>,
    api: web::Data<EventOrchestrator<B>>,
) -> Result<HttpResponse, ServerError> {
    let loan_id = path.into_inner();
    info!("💻️ Request to advance loan #{loan_id}");
    let result = api.loans().advance_loan(loan_id).await?;
    respond(result, format!("Loan #{loan_id}"))
}

route!(resume_loan => Post "/loans/{loan_id}/resume" impl LoanPaymentDatabase);
pub async fn resume_loan<B: LoanPaymentDatabase>(
    path: web::Path<i64>,
    api: web::Data<EventOrchestrator<B>>,
) -> Result<HttpResponse, ServerError> {
    let loan_id = path.into_inner();
    info!("💻️ Request to resume loan #{loan_id}");
    let result = api.loans().resume_loan(loan_id).await?;
    respond(result, format!("Loan #{loan_id}"))
}

route!(connect_accounts => Post "/loans/{loan_id}/accounts" impl LoanPaymentDatabase);
pub async fn connect_accounts<B: LoanPaymentDatabase>(
    path: web::Path<i64>,
    body: web::Json<ConnectAccountsParams>,
    api: web::Data<EventOrchestrator<B>>,
) -> Result<HttpResponse, ServerError> {
    let loan_id = path.into_inner();
    let params = body.into_inner();
    info!("💻️ Connecting accounts to loan #{loan_id}: {params:?}");
    let result = api
        .loans()
        .connect_accounts(loan_id, params.borrower_account_id, params.lender_account_id, params.biller_account_id)
        .await?;
    respond(result, format!("Loan #{loan_id}"))
}

fn respond(result: AdvanceResult, subject: String) -> Result<HttpResponse, ServerError> {
    match result {
        AdvanceResult::NotFound => Err(ServerError::NoRecordFound(format!("{subject} does not exist"))),
        _ => Ok(HttpResponse::Ok().json(ActionResult::new(result, subject))),
    }
}
