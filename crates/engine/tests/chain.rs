mod common;

use engine::{
    ChainRequest, CheckoutRequest, ConflictCode, LineItem, PaymentSource, Step, TransactionType,
};

use common::{Harness, OWNER, balance_of, engine_with_db, gift_card, usd};

/// Gift card `gc-1` with 100 plus a card covering the rest of a 400 item.
async fn checkout(h: &Harness, id: &str, pending: bool) {
    gift_card(&h.engine, "gc-1", 100).await;
    h.engine
        .checkout(
            OWNER,
            CheckoutRequest::new(id, usd())
                .line_item(LineItem::new(400))
                .source(PaymentSource::value_id("gc-1"))
                .source(PaymentSource::card("tok_visa"))
                .pending(pending),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn pending_checkout_authorizes_and_sets_a_void_date() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", true).await;

    let tx = h.engine.transaction(OWNER, "tx-1").await.unwrap();
    assert!(tx.is_pending());
    assert!(tx.pending_void_date.unwrap() > tx.created_date);
    let charges = h.rail.charges();
    assert_eq!(charges.len(), 1);
    assert!(!charges[0].capture);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(0));
}

#[tokio::test]
async fn captured_transaction_cannot_be_voided() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", true).await;

    let capture = h
        .engine
        .capture(OWNER, "tx-1", ChainRequest::new("cap-1"))
        .await
        .unwrap();
    assert_eq!(capture.transaction_type, TransactionType::Capture);
    assert_eq!(capture.root_transaction_id, "tx-1");
    assert_eq!(capture.previous_transaction_id.as_deref(), Some("tx-1"));
    assert_eq!(h.rail.captures(), vec!["ch_0".to_string()]);

    let pending = h.engine.transaction(OWNER, "tx-1").await.unwrap();
    assert_eq!(pending.next_transaction_id.as_deref(), Some("cap-1"));
    assert!(!pending.is_pending());

    let err = h
        .engine
        .void(OWNER, "tx-1", ChainRequest::new("void-1"))
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::TransactionCaptured));
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(0));
}

#[tokio::test]
async fn void_releases_the_hold() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", true).await;

    let void = h
        .engine
        .void(OWNER, "tx-1", ChainRequest::new("void-1"))
        .await
        .unwrap();
    assert_eq!(void.transaction_type, TransactionType::Void);
    assert_eq!(void.contributed(), -400);
    assert_eq!(void.totals.map(|t| t.payable), Some(-400));
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(100));
    assert_eq!(
        h.rail.refunds(),
        vec![("ch_0".to_string(), "voided".to_string())]
    );

    let err = h
        .engine
        .void(OWNER, "tx-1", ChainRequest::new("void-2"))
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::TransactionVoided));
}

#[tokio::test]
async fn void_credits_frozen_values() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", true).await;
    h.engine.freeze_value(OWNER, "gc-1").await.unwrap();

    h.engine
        .void(OWNER, "tx-1", ChainRequest::new("void-1"))
        .await
        .unwrap();
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(100));
}

#[tokio::test]
async fn completed_transaction_cannot_be_captured() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", false).await;

    let err = h
        .engine
        .capture(OWNER, "tx-1", ChainRequest::new("cap-1"))
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::TransactionNotPending));
}

#[tokio::test]
async fn reverse_mirrors_every_step() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", false).await;
    let original = h.engine.transaction(OWNER, "tx-1").await.unwrap();

    let reverse = h
        .engine
        .reverse(OWNER, "tx-1", ChainRequest::new("rev-1"))
        .await
        .unwrap();

    assert_eq!(reverse.transaction_type, TransactionType::Reverse);
    assert_eq!(reverse.steps.len(), original.steps.len());
    for (forward, backward) in original.steps.iter().zip(&reverse.steps) {
        assert_eq!(forward.contribution(), -backward.contribution());
    }
    assert_eq!(reverse.totals.unwrap(), -original.totals.unwrap());
    assert_eq!(reverse.tags, original.tags);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(100));
    assert_eq!(
        h.rail.refunds(),
        vec![("ch_0".to_string(), "reversed".to_string())]
    );

    let again = h
        .engine
        .reverse(OWNER, "tx-1", ChainRequest::new("rev-2"))
        .await
        .unwrap_err();
    assert_eq!(again.conflict_code(), Some(ConflictCode::TransactionReversed));

    let of_reverse = h
        .engine
        .reverse(OWNER, "rev-1", ChainRequest::new("rev-3"))
        .await
        .unwrap_err();
    assert_eq!(
        of_reverse.conflict_code(),
        Some(ConflictCode::TransactionNotReversible)
    );
}

#[tokio::test]
async fn pending_transaction_must_be_voided_not_reversed() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", true).await;

    let err = h
        .engine
        .reverse(OWNER, "tx-1", ChainRequest::new("rev-1"))
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::TransactionPending));
}

#[tokio::test]
async fn reverse_rejects_frozen_values() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", false).await;
    h.engine.freeze_value(OWNER, "gc-1").await.unwrap();

    let err = h
        .engine
        .reverse(OWNER, "tx-1", ChainRequest::new("rev-1"))
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::ValueFrozen));
    assert!(h.rail.refunds().is_empty());
}

#[tokio::test]
async fn reversing_a_capture_undoes_the_pending_checkout() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", true).await;
    h.engine
        .capture(OWNER, "tx-1", ChainRequest::new("cap-1"))
        .await
        .unwrap();

    let reverse = h
        .engine
        .reverse(OWNER, "cap-1", ChainRequest::new("rev-1"))
        .await
        .unwrap();
    assert_eq!(reverse.previous_transaction_id.as_deref(), Some("cap-1"));
    assert!(reverse
        .steps
        .iter()
        .any(|step| matches!(step, Step::External(step) if step.amount == 300)));
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(100));

    let chain = h.engine.transaction_chain(OWNER, "cap-1").await.unwrap();
    let ids: Vec<_> = chain.iter().map(|tx| tx.id.as_str()).collect();
    assert_eq!(ids, vec!["tx-1", "cap-1", "rev-1"]);
    assert!(chain.iter().all(|tx| tx.root_transaction_id == "tx-1"));
}

#[tokio::test]
async fn simulated_chain_operations_leave_the_chain_open() {
    let h = engine_with_db().await;
    checkout(&h, "tx-1", false).await;

    let preview = h
        .engine
        .reverse(OWNER, "tx-1", ChainRequest::new("rev-1").simulate(true))
        .await
        .unwrap();
    assert!(preview.simulated);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(0));
    let tx = h.engine.transaction(OWNER, "tx-1").await.unwrap();
    assert!(tx.next_transaction_id.is_none());
    assert!(h.rail.refunds().is_empty());
}
