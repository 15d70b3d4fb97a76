//! Property tests for the transaction state machine: arbitrary sequences of
//! commands and provider reports must stay on the edge table and never
//! refund more than was captured.

use billing_core::domain::details::ClickDetails;
use billing_core::domain::{
    Currency, Details, DetailsFieldFilter, EventKind, Gateway, NormalizedEvent, Origin, Outcome,
    ProviderRef, Transaction, TransactionStatus,
};
use proptest::prelude::*;
use uuid::Uuid;

/// Amounts are drawn relative to the transaction quantity so that matches,
/// mismatches and overflows all show up.
#[derive(Debug, Clone, Copy)]
enum Amount {
    Missing,
    Exact,
    Percent(u8),
}

impl Amount {
    fn resolve(self, quantity: i64) -> Option<i64> {
        match self {
            Amount::Missing => None,
            Amount::Exact => Some(quantity),
            Amount::Percent(p) => Some((quantity * i64::from(p) / 100).max(1)),
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Confirm(Outcome),
    Cancel,
    Refund(Amount),
    Event {
        kind: EventKind,
        outcome: Outcome,
        amount: Amount,
        reference: u8,
    },
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::Completed),
        Just(Outcome::Failed),
        Just(Outcome::Pending),
    ]
}

fn kind() -> impl Strategy<Value = EventKind> {
    prop_oneof![
        Just(EventKind::Prepared),
        Just(EventKind::Confirmed),
        Just(EventKind::Failed),
        Just(EventKind::Canceled),
        Just(EventKind::Refunded),
    ]
}

fn amount() -> impl Strategy<Value = Amount> {
    prop_oneof![
        Just(Amount::Missing),
        Just(Amount::Exact),
        (1u8..=130).prop_map(Amount::Percent),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        outcome().prop_map(Op::Confirm),
        Just(Op::Cancel),
        amount().prop_map(Op::Refund),
        (kind(), outcome(), amount(), 0u8..3).prop_map(|(kind, outcome, amount, reference)| {
            Op::Event {
                kind,
                outcome,
                amount,
                reference,
            }
        }),
    ]
}

fn transaction(quantity: i64) -> Transaction {
    Transaction::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        quantity,
        Currency::Uzs,
        Gateway::Click,
        Details::Click(ClickDetails::new("order-1")),
    )
    .unwrap()
}

fn provider_event(kind: EventKind, outcome: Outcome, amount: Option<i64>, reference: u8) -> NormalizedEvent {
    let event = NormalizedEvent::new(
        ProviderRef::new(format!("ref-{}", reference)),
        kind,
        outcome,
        "raw",
        DetailsFieldFilter::equals(["merchant_trans_id"], "order-1"),
    );
    match amount {
        Some(amount) => event.with_amount(amount),
        None => event,
    }
}

/// Runs one operation. Returns the origin and whether the aggregate accepted it.
fn run(tx: &mut Transaction, op: &Op) -> (Origin, bool) {
    let quantity = tx.quantity();
    match op {
        Op::Confirm(outcome) => (Origin::Command, tx.confirm(*outcome).is_ok()),
        Op::Cancel => (Origin::Command, tx.cancel().is_ok()),
        Op::Refund(amount) => {
            let amount = amount.resolve(quantity).unwrap_or(quantity);
            let key = tx.refund_key(Uuid::new_v4());
            (Origin::Command, tx.refund(amount, &key).is_ok())
        }
        Op::Event {
            kind,
            outcome,
            amount,
            reference,
        } => {
            let event = provider_event(*kind, *outcome, amount.resolve(quantity), *reference);
            (Origin::Provider, tx.apply_event(&event).is_ok())
        }
    }
}

fn assert_money_invariants(tx: &Transaction) -> Result<(), TestCaseError> {
    let refunded = tx.refunded_total();
    prop_assert!(refunded >= 0);
    prop_assert!(refunded <= tx.quantity());
    match tx.status() {
        TransactionStatus::Refunded => prop_assert_eq!(refunded, tx.quantity()),
        TransactionStatus::PartiallyRefunded => {
            prop_assert!(refunded > 0 && refunded < tx.quantity())
        }
        _ => prop_assert_eq!(refunded, 0),
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_refunds_never_exceed_quantity(
        quantity in 1i64..1_000_000,
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let mut tx = transaction(quantity);
        for op in &ops {
            run(&mut tx, op);
            assert_money_invariants(&tx)?;
        }
    }

    #[test]
    fn prop_every_status_change_is_on_the_edge_table(
        quantity in 1i64..1_000_000,
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let mut tx = transaction(quantity);
        for op in &ops {
            let before = tx.clone();
            let (origin, accepted) = run(&mut tx, op);

            if accepted {
                let (from, to) = (before.status(), tx.status());
                prop_assert!(
                    from == to || from.allows(to, origin),
                    "{:?} moved {} -> {} via {:?}", op, from, to, origin
                );
            } else {
                prop_assert_eq!(&tx, &before, "rejected {:?} mutated the transaction", op);
            }
        }
    }

    #[test]
    fn prop_replayed_provider_events_change_nothing(
        quantity in 1i64..1_000_000,
        prefix in prop::collection::vec(op(), 0..20),
        kind in kind(),
        outcome in outcome(),
        amount in amount(),
    ) {
        let mut tx = transaction(quantity);
        for op in &prefix {
            run(&mut tx, op);
        }

        let event = provider_event(kind, outcome, amount.resolve(quantity), 9);
        if tx.apply_event(&event).is_ok() {
            let snapshot = tx.clone();
            let replay = tx.apply_event(&event);
            prop_assert!(replay.is_ok());
            prop_assert_eq!(&tx, &snapshot);
        }
    }
}

#[test]
fn command_origin_cannot_revive_canceled_transactions() {
    for from in [TransactionStatus::Canceled, TransactionStatus::Failed] {
        assert!(!from.allows(TransactionStatus::Completed, Origin::Command));
        assert!(from.allows(TransactionStatus::Completed, Origin::Provider));
    }
    for next in TransactionStatus::ALL {
        assert!(!TransactionStatus::Refunded.allows(next, Origin::Provider));
    }
}
