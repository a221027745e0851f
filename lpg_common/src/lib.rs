mod cents;
mod helpers;
mod secret;

pub mod op;

pub use cents::{Cents, CentsConversionError, USD_CURRENCY_CODE};
pub use helpers::{env_flag, parse_boolean_flag};
pub use secret::Secret;
