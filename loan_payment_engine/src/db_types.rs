//! Data types shared between the database backends and the orchestration API.
//!
//! Every enum here is persisted as lower snake-case text, and round-trips through `Display`/`FromStr` using the same
//! spelling, so what you see in the database is what you see in the logs.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
pub use lpg_common::Cents;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value for {kind}: {value}")]
pub struct ConversionError {
    kind: &'static str,
    value: String,
}

/// Declares a text-backed enum, with matching `sqlx`, `serde`, `Display` and `FromStr` spellings.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[sqlx(rename = $text)]
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    s => Err(ConversionError { kind: stringify!($name), value: s.to_string() }),
                }
            }
        }
    };
}

//--------------------------------------     Account shape     -------------------------------------------------------
text_enum!(
    /// The kind of instrument backing a payment account.
    AccountType {
        DebitCard => "debit_card",
        BankAccount => "bank_account",
        BillerNetwork => "biller_network",
    }
);

text_enum!(
    /// Who owns a payment account, relative to the platform.
    AccountOwnership {
        Personal => "personal",
        Internal => "internal",
        External => "external",
    }
);

text_enum!(
    /// The money-movement network that services an account.
    PaymentProvider {
        Checkbook => "checkbook",
        Fiserv => "fiserv",
        Tabapay => "tabapay",
        Mock => "mock",
    }
);

//--------------------------------------       Loans        ---------------------------------------------------------
text_enum!(
    LoanType {
        /// Direct bill pay
        DirectBillPay => "dbp",
        /// Peer to peer
        PeerToPeer => "p2p",
        /// Repayment request
        RepaymentRequest => "rr",
    }
);

text_enum!(
    /// The lifecycle states of a loan.
    LoanState {
        Created => "created",
        Requested => "requested",
        Offered => "offered",
        Bound => "bound",
        Accepted => "accepted",
        Funding => "funding",
        FundingPaused => "funding_paused",
        Funded => "funded",
        Disbursing => "disbursing",
        DisbursingPaused => "disbursing_paused",
        Disbursed => "disbursed",
        Repaying => "repaying",
        RepaymentPaused => "repayment_paused",
        Repaid => "repaid",
        Closed => "closed",
    }
);

impl From<String> for LoanState {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid loan state: {value}. But this conversion cannot fail. Defaulting to Created");
            LoanState::Created
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Loan {
    pub id: i64,
    /// The loan principal
    pub amount: Cents,
    pub fee_amount: Cents,
    pub loan_type: LoanType,
    pub state: LoanState,
    pub borrower_account_id: Option<i64>,
    pub lender_account_id: Option<i64>,
    pub biller_account_id: Option<i64>,
    /// The number of scheduled repayments
    pub payments_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLoan {
    pub amount: Cents,
    pub fee_amount: Cents,
    pub loan_type: LoanType,
    pub state: LoanState,
    pub borrower_account_id: Option<i64>,
    pub lender_account_id: Option<i64>,
    pub biller_account_id: Option<i64>,
    pub payments_count: i64,
}

impl NewLoan {
    pub fn new(amount: Cents, loan_type: LoanType) -> Self {
        Self {
            amount,
            fee_amount: Cents::default(),
            loan_type,
            state: LoanState::Created,
            borrower_account_id: None,
            lender_account_id: None,
            biller_account_id: None,
            payments_count: 1,
        }
    }

    pub fn with_fee(mut self, fee: Cents) -> Self {
        self.fee_amount = fee;
        self
    }

    pub fn with_state(mut self, state: LoanState) -> Self {
        self.state = state;
        self
    }

    pub fn with_borrower(mut self, account_id: i64) -> Self {
        self.borrower_account_id = Some(account_id);
        self
    }

    pub fn with_lender(mut self, account_id: i64) -> Self {
        self.lender_account_id = Some(account_id);
        self
    }

    pub fn with_biller(mut self, account_id: i64) -> Self {
        self.biller_account_id = Some(account_id);
        self
    }

    pub fn with_payments_count(mut self, count: i64) -> Self {
        self.payments_count = count.max(1);
        self
    }
}

//--------------------------------------   Payment accounts   --------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentAccount {
    pub id: i64,
    pub name: String,
    pub account_type: AccountType,
    pub ownership: AccountOwnership,
    pub provider: PaymentProvider,
    pub created_at: DateTime<Utc>,
}

impl PaymentAccount {
    pub fn shape(&self) -> AccountShape {
        AccountShape { account_type: self.account_type, ownership: self.ownership, provider: self.provider }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentAccount {
    pub name: String,
    pub account_type: AccountType,
    pub ownership: AccountOwnership,
    pub provider: PaymentProvider,
}

impl NewPaymentAccount {
    pub fn new(name: &str, account_type: AccountType, ownership: AccountOwnership, provider: PaymentProvider) -> Self {
        Self { name: name.to_string(), account_type, ownership, provider }
    }
}

/// The three dimensions of an account that take part in route matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountShape {
    pub account_type: AccountType,
    pub ownership: AccountOwnership,
    pub provider: PaymentProvider,
}

impl Display for AccountShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.account_type, self.ownership, self.provider)
    }
}

//--------------------------------------    Loan payments    ---------------------------------------------------------
text_enum!(
    /// The loan stage a payment moves money for.
    PaymentKind {
        Funding => "funding",
        Disbursement => "disbursement",
        Fee => "fee",
        Repayment => "repayment",
        Refund => "refund",
    }
);

text_enum!(
    PaymentState {
        Created => "created",
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
);

text_enum!(
    /// Why a step, and by extension its payment, ended up `Failed`.
    FailureReason {
        /// The network rejected the transfer for a reason that retrying will not fix.
        BusinessError => "business_error",
        /// Technical failures kept happening until the stage's retry budget ran out.
        RetriesExhausted => "retries_exhausted",
    }
);

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LoanPayment {
    pub id: i64,
    pub loan_id: i64,
    pub kind: PaymentKind,
    pub state: PaymentState,
    pub amount: Cents,
    /// 1-based installment number. Only repayments carry one.
    pub payment_number: Option<i64>,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub failure_reason: Option<FailureReason>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanPayment {
    pub fn is_active(&self) -> bool {
        matches!(self.state, PaymentState::Created | PaymentState::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLoanPayment {
    pub loan_id: i64,
    pub kind: PaymentKind,
    pub state: PaymentState,
    pub amount: Cents,
    pub payment_number: Option<i64>,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub initiated_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewLoanPayment {
    pub fn new(loan_id: i64, kind: PaymentKind, amount: Cents, from_account_id: i64, to_account_id: i64) -> Self {
        Self {
            loan_id,
            kind,
            state: PaymentState::Created,
            amount,
            payment_number: None,
            from_account_id,
            to_account_id,
            initiated_at: None,
            scheduled_at: None,
            completed_at: None,
        }
    }

    pub fn with_payment_number(mut self, number: Option<i64>) -> Self {
        self.payment_number = number;
        self
    }

    /// Marks the payment as initiated (and scheduled) at `now`.
    pub fn initiated(mut self, now: DateTime<Utc>) -> Self {
        self.initiated_at = Some(now);
        self.scheduled_at = Some(now);
        self
    }

    /// A payment with nothing to move. It is born `Completed`, with every timestamp set to `now`.
    pub fn completed_immediately(mut self, now: DateTime<Utc>) -> Self {
        self.state = PaymentState::Completed;
        self.initiated_at = Some(now);
        self.scheduled_at = Some(now);
        self.completed_at = Some(now);
        self
    }
}

//--------------------------------------    Payment steps    ---------------------------------------------------------
text_enum!(
    StepState {
        Created => "created",
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
);

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LoanPaymentStep {
    pub id: i64,
    pub payment_id: i64,
    #[sqlx(rename = "step_order")]
    pub order: i64,
    pub state: StepState,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Cents,
    pub failure_reason: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentStep {
    pub order: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Cents,
}

//--------------------------------------      Transfers      ---------------------------------------------------------
text_enum!(
    TransferState {
        Created => "created",
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
);

text_enum!(
    TransferErrorType {
        /// Terminal. Retrying will not help (e.g. insufficient funds, closed account).
        Business => "business",
        /// Retryable. The network or our integration hiccupped.
        Technical => "technical",
    }
);

/// The canonical shape every network-specific failure is translated into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferError {
    pub error_type: TransferErrorType,
    pub code: String,
    pub message: String,
    /// The raw provider payload, kept for audit.
    pub raw_payload: String,
}

impl TransferError {
    pub fn business(code: &str, message: &str) -> Self {
        Self::new(TransferErrorType::Business, code, message)
    }

    pub fn technical(code: &str, message: &str) -> Self {
        Self::new(TransferErrorType::Technical, code, message)
    }

    fn new(error_type: TransferErrorType, code: &str, message: &str) -> Self {
        Self { error_type, code: code.to_string(), message: message.to_string(), raw_payload: String::default() }
    }

    pub fn with_raw_payload<S: Into<String>>(mut self, payload: S) -> Self {
        self.raw_payload = payload.into();
        self
    }

    pub fn is_business(&self) -> bool {
        self.error_type == TransferErrorType::Business
    }
}

impl Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error [{}]: {}", self.error_type, self.code, self.message)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub step_id: i64,
    #[sqlx(rename = "transfer_order")]
    pub order: i64,
    pub state: TransferState,
    pub amount: Cents,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub provider: PaymentProvider,
    /// The network's own identifier for the submission, once accepted.
    pub provider_reference: Option<String>,
    pub error_type: Option<TransferErrorType>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub error_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    pub fn error(&self) -> Option<TransferError> {
        self.error_type.map(|error_type| TransferError {
            error_type,
            code: self.error_code.clone().unwrap_or_default(),
            message: self.error_message.clone().unwrap_or_default(),
            raw_payload: self.error_payload.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransfer {
    pub step_id: i64,
    pub order: i64,
    pub amount: Cents,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub provider: PaymentProvider,
}

impl NewTransfer {
    /// A transfer attempt for `step`, moving the step's amount between the step's accounts.
    pub fn for_step(step: &LoanPaymentStep, order: i64, provider: PaymentProvider) -> Self {
        Self {
            step_id: step.id,
            order,
            amount: step.amount,
            from_account_id: step.from_account_id,
            to_account_id: step.to_account_id,
            provider,
        }
    }
}

//--------------------------------------       Routes        ---------------------------------------------------------
/// One end of a route hop. Route templates may pin a hop to a specific (usually internal clearing) account, or leave it
/// to be filled in with the payment's own source or destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountRef {
    PaymentSource,
    PaymentDestination,
    Account(i64),
}

impl AccountRef {
    pub fn resolve(&self, source: i64, destination: i64) -> i64 {
        match self {
            AccountRef::PaymentSource => source,
            AccountRef::PaymentDestination => destination,
            AccountRef::Account(id) => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentsRouteStep {
    pub order: i64,
    /// `None` means "the payment's source account"
    pub from_account_id: Option<i64>,
    /// `None` means "the payment's destination account"
    pub to_account_id: Option<i64>,
}

impl PaymentsRouteStep {
    pub fn from_ref(&self) -> AccountRef {
        self.from_account_id.map(AccountRef::Account).unwrap_or(AccountRef::PaymentSource)
    }

    pub fn to_ref(&self) -> AccountRef {
        self.to_account_id.map(AccountRef::Account).unwrap_or(AccountRef::PaymentDestination)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentsRoute {
    pub id: i64,
    pub name: String,
    pub from: AccountShape,
    pub to: AccountShape,
    pub loan_stages: Vec<PaymentKind>,
    pub loan_types: Vec<LoanType>,
    pub steps: Vec<PaymentsRouteStep>,
}

impl PaymentsRoute {
    pub fn supports_stage(&self, stage: PaymentKind) -> bool {
        self.loan_stages.contains(&stage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPaymentsRoute {
    pub name: String,
    pub from: AccountShape,
    pub to: AccountShape,
    pub loan_stages: Vec<PaymentKind>,
    pub loan_types: Vec<LoanType>,
    pub steps: Vec<PaymentsRouteStep>,
}

impl NewPaymentsRoute {
    pub fn new(name: &str, from: AccountShape, to: AccountShape) -> Self {
        Self {
            name: name.to_string(),
            from,
            to,
            loan_stages: Vec::new(),
            loan_types: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn for_stages(mut self, stages: &[PaymentKind]) -> Self {
        self.loan_stages = stages.to_vec();
        self
    }

    pub fn for_loan_types(mut self, loan_types: &[LoanType]) -> Self {
        self.loan_types = loan_types.to_vec();
        self
    }

    /// Appends a hop. `None` on either side means the payment's own source/destination account.
    pub fn with_step(mut self, from_account_id: Option<i64>, to_account_id: Option<i64>) -> Self {
        let order = self.steps.len() as i64;
        self.steps.push(PaymentsRouteStep { order, from_account_id, to_account_id });
        self
    }
}

/// Everything the route resolver matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteQuery {
    pub from: AccountShape,
    pub to: AccountShape,
    pub loan_stage: PaymentKind,
    pub loan_type: LoanType,
}

impl Display for RouteQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} ({} stage, {} loan)", self.from, self.to, self.loan_stage, self.loan_type)
    }
}

//--------------------------------------    Event outbox     ---------------------------------------------------------
text_enum!(
    OutboxStatus {
        Pending => "pending",
        InFlight => "in_flight",
        Dispatched => "dispatched",
        /// Dead-lettered. Needs an operator.
        Failed => "failed",
    }
);

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
