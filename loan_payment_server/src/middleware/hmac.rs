//! Webhook signature checks.
//!
//! Transfer networks sign each webhook with HMAC-SHA256 over the raw request body and send the base64 digest in the
//! `X-Lpg-Signature` header. A network may have a key of its own (`LPG_WEBHOOK_HMAC_SECRET_<PROVIDER>`). The others
//! share `LPG_WEBHOOK_HMAC_SECRET`. The network is read from the `/transfers/{provider}/...` part of the path, so a
//! webhook signed with one network's key cannot be replayed against another network's transfers.
//!
//! Wrap the webhook scope with [`WebhookSignatureCheck`]. The body is read and verified, then handed on to the route
//! untouched.

use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_http::h1;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    error::{ErrorBadRequest, ErrorForbidden},
    web,
    Error,
};
use futures::future::LocalBoxFuture;
use log::{trace, warn};
use loan_payment_engine::db_types::PaymentProvider;

use crate::{config::WebhookConfig, helpers::verify_hmac};

pub const SIGNATURE_HEADER: &str = "X-Lpg-Signature";

pub struct WebhookSignatureCheck {
    keys: Rc<WebhookConfig>,
}

impl WebhookSignatureCheck {
    pub fn new(keys: WebhookConfig) -> Self {
        Self { keys: Rc::new(keys) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for WebhookSignatureCheck
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = WebhookSignatureService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(WebhookSignatureService { keys: Rc::clone(&self.keys), service: Rc::new(service) }))
    }
}

pub struct WebhookSignatureService<S> {
    keys: Rc<WebhookConfig>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for WebhookSignatureService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let keys = Rc::clone(&self.keys);
        Box::pin(async move {
            if !keys.hmac_checks {
                trace!("🔐️ Webhook signature checks are disabled. Letting {} through.", req.path());
                return service.call(req).await;
            }
            let path = req.path().to_string();
            let header = req.headers().get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
            let Some(signature) = header.map(String::from) else {
                warn!("🔐️ Unsigned webhook posted to {path}. Denying access.");
                return Err(ErrorForbidden("No webhook signature found."));
            };
            let body = req.extract::<web::Bytes>().await.map_err(|e| {
                warn!("🔐️ Could not read the body of the webhook posted to {path}. {e}");
                ErrorBadRequest("Could not read the webhook body.")
            })?;
            let provider = provider_in_path(&path);
            if !verify_hmac(keys.key_for(provider).reveal(), &body, &signature) {
                let network = provider.map(|p| p.to_string()).unwrap_or_else(|| "an unknown network".into());
                warn!("🔐️ Webhook posted to {path} is not signed with the key for {network}. Denying access.");
                return Err(ErrorForbidden("Invalid webhook signature."));
            }
            trace!("🔐️ Webhook signature for {path} ✅️");
            req.set_payload(bytes_to_payload(body));
            service.call(req).await
        })
    }
}

/// The network named in a `.../transfers/{provider}/...` path, if it is one we know.
fn provider_in_path(path: &str) -> Option<PaymentProvider> {
    let mut segments = path.split('/');
    segments.find(|s| *s == "transfers")?;
    segments.next()?.parse().ok()
}

fn bytes_to_payload(buf: web::Bytes) -> Payload {
    let (_, mut pl) = h1::Payload::create(true);
    pl.unread_data(buf);
    Payload::from(pl)
}
