use cucumber::{given, then, when};
use slip_payment_engine::{
    db_types::{
        Classification,
        ContractStatus,
        MatchStatus,
        NewInstallmentContract,
        NewOrder,
        NewPawnLoan,
        ObligationRef,
        OrderPaymentStatus,
        PawnStatus,
        PaymentStatus,
        PeriodStatus,
        Satang,
    },
    ObligationManagement,
    ReconciliationDatabase,
    SlipData,
};

use crate::cucumber::{
    recon_world::{context, parse_date, parse_status, received_on},
    ReconWorld,
};

fn baht(v: i64) -> Satang {
    Satang::from_baht(v)
}

#[given(expr = "customer '{word}' has an order {word} for {int} baht")]
async fn create_order(world: &mut ReconWorld, user: String, number: String, total: i64) {
    let customer = world.customer(&user).await;
    let order = NewOrder::new(number.as_str(), customer.id, baht(total));
    let order = world.obligations().create_order(order).await.expect("Error creating order");
    world.system().ids.insert(number, order.id);
}

#[given(expr = "customer '{word}' has an installment contract {word} for {int} baht over {int} periods")]
async fn create_contract(world: &mut ReconWorld, user: String, number: String, total: i64, periods: u32) {
    let customer = world.customer(&user).await;
    let contract = NewInstallmentContract::new(number.as_str(), customer.id, baht(total), periods, parse_date("2026-05-01"));
    let schedule = world.obligations().create_installment_contract(contract).await.expect("Error creating contract");
    world.system().ids.insert(number, schedule.contract.id);
}

#[given(expr = "customer '{word}' has an installment contract {word} for {int} baht over {int} periods financing {word}")]
async fn create_financing_contract(
    world: &mut ReconWorld,
    user: String,
    number: String,
    total: i64,
    periods: u32,
    order: String,
) {
    let customer = world.customer(&user).await;
    let order_id = world.id_of(&order);
    let contract = NewInstallmentContract::new(number.as_str(), customer.id, baht(total), periods, parse_date("2026-05-01"))
        .for_order(order_id);
    let schedule = world.obligations().create_installment_contract(contract).await.expect("Error creating contract");
    world.system().ids.insert(number, schedule.contract.id);
}

#[given(expr = "customer '{word}' has pawn ticket {word} for {int} baht at {int} bps due {word}")]
async fn create_pawn(world: &mut ReconWorld, user: String, ticket: String, principal: i64, bps: i64, due: String) {
    let customer = world.customer(&user).await;
    let loan = NewPawnLoan::new(ticket.as_str(), customer.id, baht(principal), bps, parse_date(&due));
    let loan = world.obligations().create_pawn_loan(loan).await.expect("Error creating pawn loan");
    world.system().ids.insert(ticket, loan.id);
}

#[when(expr = "customer '{word}' sends a slip for {int} baht with reference {word} on {word}")]
async fn send_slip(world: &mut ReconWorld, user: String, amount: i64, reference: String, day: String) {
    let slip = SlipData::new(baht(amount)).with_reference(reference);
    let result = world.api().process_payment_at(slip, context(&user), received_on(&day)).await;
    world.system().last_result = Some(result.expect("Error processing payment"));
}

#[when(expr = "customer '{word}' sends a slip for {int} baht without a reference on {word}")]
async fn send_unreferenced_slip(world: &mut ReconWorld, user: String, amount: i64, day: String) {
    let slip = SlipData::new(baht(amount));
    let result = world.api().process_payment_at(slip, context(&user), received_on(&day)).await;
    world.system().last_result = Some(result.expect("Error processing payment"));
}

#[when(expr = "staff member '{word}' approves the payment")]
async fn approve(world: &mut ReconWorld, actor: String) {
    let id = world.last_result().payment_record_id;
    let result = world.api().approve_payment(id, &actor).await.expect("Error approving payment");
    world.system().last_result = Some(result);
}

#[when("pending payments are matched again")]
async fn rematch(world: &mut ReconWorld) {
    let summary = world.api().process_pending_payments(50).await.expect("Error re-matching payments");
    world.system().allocated_on_rematch = summary.allocated;
}

#[then(expr = "the payment is classified as {word} with confidence {int}")]
async fn check_classification(world: &mut ReconWorld, classification: String, confidence: u8) {
    let id = world.last_result().payment_record_id;
    let record = world.api().db().fetch_payment_record(id).await.expect("Error fetching payment").expect("No record");
    assert_eq!(record.classification, parse_status::<Classification>(&classification), "Wrong classification");
    assert_eq!(record.confidence, confidence, "Wrong confidence");
}

#[then(expr = "the match status is {word}")]
async fn check_match_status(world: &mut ReconWorld, status: String) {
    assert_eq!(world.last_result().match_status, parse_status::<MatchStatus>(&status));
}

#[then(expr = "the slip is refused as a duplicate")]
async fn check_duplicate(world: &mut ReconWorld) {
    let result = world.last_result();
    assert!(!result.success, "Duplicate slips are not successful");
    assert_eq!(result.match_status, MatchStatus::Duplicate);
}

#[then(expr = "{int} payment was allocated on re-matching")]
async fn check_rematched(world: &mut ReconWorld, count: usize) {
    assert_eq!(world.system().allocated_on_rematch, count);
}

#[then(expr = "order {word} has paid {int} baht and is {word}")]
async fn check_order(world: &mut ReconWorld, number: String, paid: i64, status: String) {
    let id = world.id_of(&number);
    let order = world.api().db().fetch_order(id).await.expect("Error fetching order").expect("Order does not exist");
    assert_eq!(order.paid_amount, baht(paid), "Paid amount is incorrect");
    assert_eq!(order.payment_status, parse_status::<OrderPaymentStatus>(&status), "Payment status is incorrect");
}

#[then(expr = "contract {word} has {int} baht paid and is {word}")]
async fn check_contract(world: &mut ReconWorld, number: String, paid: i64, status: String) {
    let id = world.id_of(&number);
    let schedule =
        world.api().db().fetch_installment_schedule(id).await.expect("Error fetching contract").expect("No contract");
    assert_eq!(schedule.contract.total_paid, baht(paid), "Total paid is incorrect");
    assert_eq!(schedule.contract.status, parse_status::<ContractStatus>(&status), "Contract status is incorrect");
    assert!(schedule.periods.iter().all(|p| p.paid_amount <= p.amount_due), "A period was overpaid");
}

#[then(expr = "period {int} of contract {word} is {word} with {int} baht paid")]
async fn check_period(world: &mut ReconWorld, sequence: i64, number: String, status: String, paid: i64) {
    let id = world.id_of(&number);
    let schedule =
        world.api().db().fetch_installment_schedule(id).await.expect("Error fetching contract").expect("No contract");
    let period = schedule.periods.iter().find(|p| p.sequence == sequence).expect("No such period");
    assert_eq!(period.status, parse_status::<PeriodStatus>(&status), "Period status is incorrect");
    assert_eq!(period.paid_amount, baht(paid), "Period paid amount is incorrect");
}

#[then(expr = "pawn ticket {word} is {word} with {int} baht interest paid")]
async fn check_pawn(world: &mut ReconWorld, ticket: String, status: String, interest: i64) {
    let id = world.id_of(&ticket);
    let loan = world.api().db().fetch_pawn_loan(id).await.expect("Error fetching loan").expect("No pawn loan");
    assert_eq!(loan.status, parse_status::<PawnStatus>(&status), "Pawn status is incorrect");
    assert_eq!(loan.interest_paid, baht(interest), "Interest paid is incorrect");
}

#[then(expr = "pawn ticket {word} is due {word}")]
async fn check_pawn_due(world: &mut ReconWorld, ticket: String, due: String) {
    let id = world.id_of(&ticket);
    let loan = world.api().db().fetch_pawn_loan(id).await.expect("Error fetching loan").expect("No pawn loan");
    assert_eq!(loan.due_date, parse_date(&due));
}

#[then(expr = "the balance of {word} {word} matches its verified payments")]
async fn check_ledger(world: &mut ReconWorld, kind: String, number: String) {
    let id = world.id_of(&number);
    let db = world.api().db();
    let (obligation, balance) = match kind.as_str() {
        "order" => {
            let order = db.fetch_order(id).await.expect("Error fetching order").expect("Order does not exist");
            (ObligationRef::order(id), order.paid_amount)
        },
        "contract" => {
            let schedule =
                db.fetch_installment_schedule(id).await.expect("Error fetching contract").expect("No contract");
            (ObligationRef::installment(id), schedule.contract.total_paid)
        },
        "ticket" => {
            let loan = db.fetch_pawn_loan(id).await.expect("Error fetching loan").expect("No pawn loan");
            (ObligationRef::pawn(id), loan.total_received())
        },
        other => panic!("Unknown obligation kind {other}"),
    };
    let records = db.fetch_payments_for_obligation(obligation).await.expect("Error fetching payments");
    let verified = records.iter().filter(|r| r.status == PaymentStatus::Verified).map(|r| r.amount).sum::<Satang>();
    assert_eq!(balance, verified, "Ledger of {number} does not match its verified payments");
}

#[then(expr = "pawn ticket {word} holds an overpayment of {int} baht")]
async fn check_pawn_overpaid(world: &mut ReconWorld, ticket: String, overpaid: i64) {
    let id = world.id_of(&ticket);
    let loan = world.api().db().fetch_pawn_loan(id).await.expect("Error fetching loan").expect("No pawn loan");
    assert_eq!(loan.overpaid_amount, baht(overpaid), "Overpayment is incorrect");
}
