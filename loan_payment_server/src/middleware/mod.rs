mod hmac;

pub use hmac::{WebhookSignatureCheck, WebhookSignatureService, SIGNATURE_HEADER};
