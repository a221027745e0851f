use cucumber::given;
use loan_payment_engine::{db_types::LoanState, test_utils::fixtures::TestSystem};

use crate::cucumber::LoanWorld;

#[given("a fresh install")]
async fn fresh_database(world: &mut LoanWorld) {
    let system = TestSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "a(n) {word} loan of {int} cents with a fee of {int} cents, repaid in {int} installment(s)")]
async fn new_loan(world: &mut LoanWorld, state: String, amount: i64, fee: i64, installments: i64) {
    let state = state.parse::<LoanState>().expect("Not a valid loan state");
    let fixture = world.system().loan_fixture(amount, fee, installments, state).await;
    world.fixture = Some(fixture);
}
