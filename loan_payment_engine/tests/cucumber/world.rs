use cucumber::World;
use loan_payment_engine::{
    db_types::{LoanPayment, LoanPaymentStep, PaymentKind, Transfer},
    lpe_api::loan_state::latest_payment_of_kind,
    test_utils::fixtures::{LoanFixture, TestSystem},
};

#[derive(Default, Debug, World)]
pub struct LoanWorld {
    pub system: Option<TestSystem>,
    pub fixture: Option<LoanFixture>,
}

impl LoanWorld {
    pub fn system(&self) -> &TestSystem {
        self.system.as_ref().expect("System not initialised. Start with 'Given a fresh install'")
    }

    pub fn loan_id(&self) -> i64 {
        self.fixture.as_ref().expect("No loan has been created").loan.id
    }

    pub async fn latest_payment(&self, kind: PaymentKind) -> LoanPayment {
        let payments = self.system().payments(self.loan_id()).await;
        latest_payment_of_kind(&payments, kind).cloned().unwrap_or_else(|| panic!("There is no {kind} payment"))
    }

    /// Step `number` (1-based) of the latest payment of the given kind.
    pub async fn step(&self, kind: PaymentKind, number: usize) -> LoanPaymentStep {
        let payment = self.latest_payment(kind).await;
        let steps = self.system().steps(payment.id).await;
        steps.get(number - 1).cloned().unwrap_or_else(|| panic!("The {kind} payment has no step {number}"))
    }

    pub async fn latest_transfer(&self, kind: PaymentKind, number: usize) -> Transfer {
        let step = self.step(kind, number).await;
        self.system().latest_transfer(step.id).await
    }
}
