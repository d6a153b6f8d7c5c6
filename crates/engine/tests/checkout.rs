mod common;

use std::sync::atomic::Ordering;

use chrono::{Duration, Utc};
use engine::{
    CheckoutRequest, ConflictCode, CreateValueCmd, EngineError, LineItem, PaymentSource, Rule,
    Step, TaxOptions, TaxRoundingMode, TransactionType,
};

use common::{OWNER, balance_of, engine_with_db, gift_card, usd};

#[tokio::test]
async fn checkout_draws_from_a_gift_card() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 1000).await;

    let tx = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(50))
                .source(PaymentSource::value_id("gc-1")),
        )
        .await
        .unwrap();

    assert_eq!(tx.transaction_type, TransactionType::Checkout);
    assert_eq!(tx.root_transaction_id, "tx-1");
    assert_eq!(tx.steps.len(), 1);
    let Step::Lightrail(step) = &tx.steps[0] else {
        panic!("expected a lightrail step");
    };
    assert_eq!(step.value_id, "gc-1");
    assert_eq!(step.balance_before, Some(1000));
    assert_eq!(step.balance_after, Some(950));
    assert_eq!(step.balance_change, -50);

    let totals = tx.totals.unwrap();
    assert_eq!(totals.subtotal, 50);
    assert_eq!(totals.payable, 50);
    assert_eq!(totals.remainder, 0);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(950));

    let stored = h.engine.transaction(OWNER, "tx-1").await.unwrap();
    assert_eq!(stored.steps, tx.steps);
    assert_eq!(stored.totals, tx.totals);
}

#[tokio::test]
async fn value_rule_discount_is_applied_before_the_card() {
    let h = engine_with_db().await;
    h.engine
        .create_value(
            OWNER,
            CreateValueCmd::new("promo", usd())
                .discount(true)
                .pretax(true)
                .value_rule(Rule::new(
                    "currentLineItem.lineTotal.subtotal * 0.25",
                    "25% off",
                )),
        )
        .await
        .unwrap();

    let tx = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(1000))
                .source(PaymentSource::card("tok_visa"))
                .source(PaymentSource::value_id("promo")),
        )
        .await
        .unwrap();

    let totals = tx.totals.unwrap();
    assert_eq!(totals.discount, 250);
    assert_eq!(totals.payable, 750);
    assert_eq!(tx.steps.len(), 2);
    assert!(matches!(&tx.steps[0], Step::Lightrail(step) if step.balance_change == -250));
    assert!(matches!(&tx.steps[1], Step::External(step) if step.amount == -750));

    let charges = h.rail.charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount, 750);
    assert_eq!(charges[0].idempotency_key, "tx-1-1");
    assert!(charges[0].capture);
    assert_eq!(balance_of(&h.engine, "promo").await, None);
}

#[tokio::test]
async fn tax_is_rounded_per_line_item() {
    let h = engine_with_db().await;

    let request = CheckoutRequest::new("tx-floor", usd())
        .line_item(LineItem::new(333).quantity(2).tax_rate(0.08))
        .source(PaymentSource::card("tok_visa"));
    let tx = h.engine.checkout(OWNER, request).await.unwrap();
    let totals = tx.totals.unwrap();
    assert_eq!(totals.subtotal, 666);
    assert_eq!(totals.tax, 53);
    assert_eq!(totals.payable, 719);
    assert_eq!(h.rail.charges()[0].amount, 719);

    let request = CheckoutRequest::new("tx-half-up", usd())
        .line_item(LineItem::new(333).quantity(2).tax_rate(0.08))
        .source(PaymentSource::card("tok_visa"))
        .tax(TaxOptions {
            rounding_mode: TaxRoundingMode::HalfUp,
        });
    let tx = h.engine.checkout(OWNER, request).await.unwrap();
    assert_eq!(tx.totals.unwrap().tax, 53);
}

#[tokio::test]
async fn steps_account_for_the_whole_payable_amount() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-small", 120).await;
    gift_card(&h.engine, "gc-large", 300).await;

    let tx = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(400).tax_rate(0.1))
                .line_item(LineItem::new(99).quantity(3))
                .source(PaymentSource::value_id("gc-large"))
                .source(PaymentSource::value_id("gc-small"))
                .source(PaymentSource::card("tok_visa")),
        )
        .await
        .unwrap();

    let totals = tx.totals.unwrap();
    assert_eq!(tx.contributed(), totals.payable - totals.remainder);
    // smaller balance goes first
    let order: Vec<_> = tx.steps.iter().filter_map(Step::value_id).collect();
    assert_eq!(order, vec!["gc-small", "gc-large"]);
    assert_eq!(balance_of(&h.engine, "gc-small").await, Some(0));
    assert_eq!(balance_of(&h.engine, "gc-large").await, Some(0));
}

#[tokio::test]
async fn remainder_requires_allow_remainder() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 300).await;
    let request = CheckoutRequest::new("tx-1", usd())
        .line_item(LineItem::new(500))
        .source(PaymentSource::value_id("gc-1"));

    let err = h.engine.checkout(OWNER, request.clone()).await.unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::InsufficientValue));
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(300));

    let tx = h
        .engine
        .checkout(OWNER, request.allow_remainder(true))
        .await
        .unwrap();
    assert_eq!(tx.totals.unwrap().remainder, 200);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(0));
}

#[tokio::test]
async fn repeated_transaction_id_changes_nothing() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 1000).await;
    let request = CheckoutRequest::new("tx-1", usd())
        .line_item(LineItem::new(100))
        .source(PaymentSource::value_id("gc-1"))
        .source(PaymentSource::card("tok_visa"));

    h.engine.checkout(OWNER, request.clone()).await.unwrap();
    let err = h.engine.checkout(OWNER, request).await.unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::TransactionExists));
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(900));
    assert!(h.rail.charges().is_empty());
}

#[tokio::test]
async fn contact_sources_skip_ineligible_values() {
    let h = engine_with_db().await;
    let alice = |id: &str| CreateValueCmd::new(id, usd()).balance(500).contact_id("alice");
    for cmd in [
        alice("alice-a"),
        alice("alice-ended").end_date(Utc::now() - Duration::days(1)),
        alice("alice-frozen"),
        alice("alice-later").start_date(Utc::now() + Duration::days(1)),
        alice("alice-used").uses_remaining(0),
    ] {
        h.engine.create_value(OWNER, cmd).await.unwrap();
    }
    h.engine.freeze_value(OWNER, "alice-frozen").await.unwrap();

    let tx = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(200))
                .source(PaymentSource::contact("alice")),
        )
        .await
        .unwrap();

    let touched: Vec<_> = tx.steps.iter().filter_map(Step::value_id).collect();
    assert_eq!(touched, vec!["alice-a"]);
    assert_eq!(balance_of(&h.engine, "alice-a").await, Some(300));
    for id in ["alice-ended", "alice-frozen", "alice-later", "alice-used"] {
        assert_eq!(balance_of(&h.engine, id).await, Some(500));
    }
}

#[tokio::test]
async fn contact_sources_tag_every_named_contact() {
    let h = engine_with_db().await;
    h.engine
        .create_value(
            OWNER,
            CreateValueCmd::new("alice-gc", usd())
                .balance(500)
                .contact_id("alice"),
        )
        .await
        .unwrap();

    let tx = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(200))
                .source(PaymentSource::contact("alice"))
                .source(PaymentSource::contact("ghost")),
        )
        .await
        .unwrap();

    assert_eq!(
        tx.tags,
        vec!["contact:alice".to_string(), "contact:ghost".to_string()]
    );
    assert_eq!(balance_of(&h.engine, "alice-gc").await, Some(300));
    let stored = h.engine.transaction(OWNER, "tx-1").await.unwrap();
    assert_eq!(stored.tags, tx.tags);
}

#[tokio::test]
async fn explicitly_named_frozen_value_is_rejected() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 1000).await;
    h.engine.freeze_value(OWNER, "gc-1").await.unwrap();

    let err = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(100))
                .source(PaymentSource::value_id("gc-1")),
        )
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::ValueFrozen));
}

#[tokio::test]
async fn missing_value_is_not_found() {
    let h = engine_with_db().await;
    let err = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(100))
                .source(PaymentSource::value_id("nope")),
        )
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::ValueNotFound("nope".to_string()));
}

#[tokio::test]
async fn simulated_checkout_writes_nothing() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 1000).await;

    let tx = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(100))
                .source(PaymentSource::value_id("gc-1"))
                .simulate(true),
        )
        .await
        .unwrap();

    assert!(tx.simulated);
    assert_eq!(tx.contributed(), 100);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(1000));
    let err = h.engine.transaction(OWNER, "tx-1").await.unwrap_err();
    assert_eq!(err, EngineError::TransactionNotFound("tx-1".to_string()));
}

#[tokio::test]
async fn declined_card_leaves_the_ledger_untouched() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 100).await;
    h.rail.fail_charges.store(true, Ordering::SeqCst);

    let err = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(500))
                .source(PaymentSource::value_id("gc-1"))
                .source(PaymentSource::card("tok_declined")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.message_code(), Some("card_declined"));
    assert_eq!(err.status_code(), 409);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(100));
    assert!(h.engine.transaction(OWNER, "tx-1").await.is_err());
    assert!(h.rail.refunds().is_empty());
}

#[tokio::test]
async fn failed_tag_write_refunds_the_charge() {
    let h = engine_with_db().await;
    h.engine
        .create_value(
            OWNER,
            CreateValueCmd::new("alice-gc", usd())
                .balance(100)
                .contact_id("alice"),
        )
        .await
        .unwrap();
    sea_orm::ConnectionTrait::execute_unprepared(&h.db, "DROP TABLE transaction_tags")
        .await
        .unwrap();

    let err = h
        .engine
        .checkout(
            OWNER,
            CheckoutRequest::new("tx-1", usd())
                .line_item(LineItem::new(500))
                .source(PaymentSource::contact("alice"))
                .source(PaymentSource::card("tok_visa")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.conflict_code(), Some(ConflictCode::TagPersistenceFailed));
    assert_eq!(h.rail.charges().len(), 1);
    assert_eq!(
        h.rail.refunds(),
        vec![("ch_0".to_string(), "transaction failed".to_string())]
    );
    assert_eq!(balance_of(&h.engine, "alice-gc").await, Some(100));
    assert!(h.engine.transaction(OWNER, "tx-1").await.is_err());
}

#[tokio::test]
async fn order_is_recorded_with_its_own_type() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 1000).await;
    let tx = h
        .engine
        .order(
            OWNER,
            CheckoutRequest::new("order-1", usd())
                .line_item(LineItem::new(100).marketplace_rate(0.2))
                .source(PaymentSource::value_id("gc-1")),
        )
        .await
        .unwrap();
    assert_eq!(tx.transaction_type, TransactionType::Order);
    let marketplace = tx.totals.unwrap().marketplace.unwrap();
    assert_eq!(marketplace.seller_gross, 80);
    assert_eq!(marketplace.seller_net, 80);
}
