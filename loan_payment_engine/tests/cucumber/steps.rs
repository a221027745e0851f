use cucumber::{then, when};
use loan_payment_engine::{
    db_types::{FailureReason, LoanState, PaymentKind, PaymentState, StepState, TransferErrorType},
    AdvanceResult,
};

use crate::cucumber::LoanWorld;

fn kind(s: &str) -> PaymentKind {
    s.parse().expect("Not a valid payment kind")
}

#[when("the loan is evaluated")]
async fn evaluate_loan(world: &mut LoanWorld) {
    world.system().orchestrator.loans().evaluate(world.loan_id()).await.expect("Error evaluating loan");
    world.system().settle().await;
}

#[when("the loan is advanced")]
async fn advance_loan(world: &mut LoanWorld) {
    world.system().orchestrator.loans().advance_loan(world.loan_id()).await.expect("Error advancing loan");
    world.system().settle().await;
}

#[when("the loan is resumed")]
async fn resume_loan(world: &mut LoanWorld) {
    world.system().orchestrator.loans().resume_loan(world.loan_id()).await.expect("Error resuming loan");
    world.system().settle().await;
}

#[when(expr = "the network completes step {int} of the {word} payment")]
async fn network_completes(world: &mut LoanWorld, step_index: usize, payment_kind: String) {
    let transfer = world.latest_transfer(kind(&payment_kind), step_index).await;
    world.system().network_completes(&transfer).await;
    world.system().settle().await;
}

#[when(expr = "the network completes step {int} of the {word} payment again")]
async fn network_completes_again(world: &mut LoanWorld, step_index: usize, payment_kind: String) {
    let transfer = world.latest_transfer(kind(&payment_kind), step_index).await;
    let result = world.system().network_completes(&transfer).await;
    assert_eq!(result, AdvanceResult::Unchanged);
    world.system().settle().await;
}

#[when(expr = "the network fails step {int} of the {word} payment with a {word} error {string}")]
async fn network_fails(world: &mut LoanWorld, step_index: usize, payment_kind: String, error_type: String, code: String) {
    let error_type = error_type.parse::<TransferErrorType>().expect("Not a valid error type");
    let transfer = world.latest_transfer(kind(&payment_kind), step_index).await;
    world.system().network_fails(&transfer, error_type, &code).await;
    world.system().settle().await;
}

#[then(expr = "the loan is {word}")]
async fn loan_state_is(world: &mut LoanWorld, state: String) {
    let expected = state.parse::<LoanState>().expect("Not a valid loan state");
    let loan = world.system().loan(world.loan_id()).await;
    assert_eq!(loan.state, expected);
}

#[then(expr = "the {word} payment is {word}")]
async fn payment_state_is(world: &mut LoanWorld, payment_kind: String, state: String) {
    let expected = state.parse::<PaymentState>().expect("Not a valid payment state");
    let payment = world.latest_payment(kind(&payment_kind)).await;
    assert_eq!(payment.state, expected);
}

#[then(expr = "the {word} payment failed with {word}")]
async fn payment_failure_reason(world: &mut LoanWorld, payment_kind: String, reason: String) {
    let expected = reason.parse::<FailureReason>().expect("Not a valid failure reason");
    let payment = world.latest_payment(kind(&payment_kind)).await;
    assert_eq!(payment.state, PaymentState::Failed);
    assert_eq!(payment.failure_reason, Some(expected));
}

#[then(expr = "the {word} payment is for {int} cents")]
async fn payment_amount(world: &mut LoanWorld, payment_kind: String, amount: i64) {
    let payment = world.latest_payment(kind(&payment_kind)).await;
    assert_eq!(payment.amount.value(), amount);
}

#[then(expr = "the {word} payment has {int} step(s)")]
async fn payment_step_count(world: &mut LoanWorld, payment_kind: String, count: usize) {
    let payment = world.latest_payment(kind(&payment_kind)).await;
    assert_eq!(world.system().steps(payment.id).await.len(), count);
}

#[then(expr = "step {int} of the {word} payment is {word}")]
async fn step_state_is(world: &mut LoanWorld, step_index: usize, payment_kind: String, state: String) {
    let expected = state.parse::<StepState>().expect("Not a valid step state");
    assert_eq!(world.step(kind(&payment_kind), step_index).await.state, expected);
}

#[then(expr = "step {int} of the {word} payment has {int} transfer(s)")]
async fn step_transfer_count(world: &mut LoanWorld, step_index: usize, payment_kind: String, count: usize) {
    let step = world.step(kind(&payment_kind), step_index).await;
    assert_eq!(world.system().transfers(step.id).await.len(), count);
}

#[then(expr = "the loan has {int} {word} payment(s)")]
async fn payment_count(world: &mut LoanWorld, count: usize, payment_kind: String) {
    let payment_kind = kind(&payment_kind);
    let payments = world.system().payments(world.loan_id()).await;
    assert_eq!(payments.iter().filter(|p| p.kind == payment_kind).count(), count);
}
