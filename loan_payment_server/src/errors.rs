use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use loan_payment_engine::{LoanPaymentDatabaseError, LoanPaymentError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("The request cannot be carried out right now. {0}")]
    NotReady(String),
    #[error("The request conflicts with the current state. {0}")]
    Conflict(String),
    #[error("The transfer network could not be reached. {0}")]
    ProviderError(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::NotReady(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ProviderError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<LoanPaymentError> for ServerError {
    fn from(e: LoanPaymentError) -> Self {
        match e {
            LoanPaymentError::OutOfSync(_) | LoanPaymentError::InvalidLoanTransition { .. } => {
                Self::Conflict(e.to_string())
            },
            LoanPaymentError::NoRouteFound(_) | LoanPaymentError::EmptyRoute { .. } => {
                Self::ConfigurationError(e.to_string())
            },
            LoanPaymentError::LoanNotFound(_) => Self::NoRecordFound(e.to_string()),
            LoanPaymentError::InvalidAmount { .. } => Self::NotReady(e.to_string()),
            LoanPaymentError::ProviderError(_) => Self::ProviderError(e.to_string()),
            LoanPaymentError::InvalidEvent(_) => Self::InvalidRequestBody(e.to_string()),
            LoanPaymentError::DatabaseError(e) => e.into(),
        }
    }
}

impl From<LoanPaymentDatabaseError> for ServerError {
    fn from(e: LoanPaymentDatabaseError) -> Self {
        match e {
            LoanPaymentDatabaseError::LoanNotFound(_)
            | LoanPaymentDatabaseError::AccountNotFound(_)
            | LoanPaymentDatabaseError::PaymentNotFound(_)
            | LoanPaymentDatabaseError::StepNotFound(_)
            | LoanPaymentDatabaseError::TransferNotFound(_) => Self::NoRecordFound(e.to_string()),
            _ => Self::BackendError(e.to_string()),
        }
    }
}
