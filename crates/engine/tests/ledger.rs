mod common;

use engine::{
    ConflictCode, CreateValueCmd, CreditRequest, DebitRequest, PaymentSource, Step,
    TransactionRequest, TransactionType, TransferRequest,
};

use common::{OWNER, balance_of, engine_with_db, gift_card, usd};

#[tokio::test]
async fn debit_and_credit_move_a_single_value() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 500).await;

    let debit = h
        .engine
        .debit(
            OWNER,
            DebitRequest::new("d-1", usd(), PaymentSource::value_id("gc-1")).amount(200),
        )
        .await
        .unwrap();
    assert_eq!(debit.transaction_type, TransactionType::Debit);
    assert_eq!(debit.contributed(), 200);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(300));

    let credit = h
        .engine
        .credit(
            OWNER,
            CreditRequest::new("c-1", usd(), PaymentSource::value_id("gc-1")).amount(50),
        )
        .await
        .unwrap();
    assert_eq!(credit.transaction_type, TransactionType::Credit);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(350));
}

#[tokio::test]
async fn overdraw_needs_allow_remainder() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 40).await;
    let request = DebitRequest::new("d-1", usd(), PaymentSource::value_id("gc-1")).amount(100);

    let err = h.engine.debit(OWNER, request.clone()).await.unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::InsufficientBalance));

    let tx = h
        .engine
        .debit(OWNER, request.allow_remainder(true))
        .await
        .unwrap();
    assert_eq!(tx.totals.unwrap().remainder, 60);
    assert_eq!(balance_of(&h.engine, "gc-1").await, Some(0));
}

#[tokio::test]
async fn uses_are_debited_and_credited() {
    let h = engine_with_db().await;
    h.engine
        .create_value(OWNER, CreateValueCmd::new("pass", usd()).uses_remaining(2))
        .await
        .unwrap();

    h.engine
        .debit(
            OWNER,
            DebitRequest::new("d-1", usd(), PaymentSource::value_id("pass")).uses(2),
        )
        .await
        .unwrap();
    let value = h.engine.value(OWNER, "pass").await.unwrap();
    assert_eq!(value.uses_remaining, Some(0));

    let err = h
        .engine
        .debit(
            OWNER,
            DebitRequest::new("d-2", usd(), PaymentSource::value_id("pass")).uses(1),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.conflict_code(),
        Some(ConflictCode::InsufficientUsesRemaining)
    );

    h.engine
        .credit(
            OWNER,
            CreditRequest::new("c-1", usd(), PaymentSource::value_id("pass")).uses(3),
        )
        .await
        .unwrap();
    let value = h.engine.value(OWNER, "pass").await.unwrap();
    assert_eq!(value.uses_remaining, Some(3));
}

#[tokio::test]
async fn debit_by_code() {
    let h = engine_with_db().await;
    h.engine
        .create_value(
            OWNER,
            CreateValueCmd::new("gc-1", usd())
                .balance(100)
                .code("GIFT-1234", false),
        )
        .await
        .unwrap();

    let tx = h
        .engine
        .debit(
            OWNER,
            DebitRequest::new("d-1", usd(), PaymentSource::code("GIFT-1234")).amount(10),
        )
        .await
        .unwrap();
    let Step::Lightrail(step) = &tx.steps[0] else {
        panic!("expected a lightrail step");
    };
    assert_eq!(step.value_id, "gc-1");
    assert_eq!(step.code.as_deref(), Some("…1234"));
}

#[tokio::test]
async fn wrong_currency_is_a_conflict() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 100).await;
    let eur = engine::Currency::try_from("EUR").unwrap();

    let err = h
        .engine
        .debit(
            OWNER,
            DebitRequest::new("d-1", eur, PaymentSource::value_id("gc-1")).amount(10),
        )
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::WrongCurrency));
}

#[tokio::test]
async fn transfer_between_values() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "from", 300).await;
    gift_card(&h.engine, "to", 0).await;

    let tx = h
        .engine
        .transfer(
            OWNER,
            TransferRequest::new(
                "tr-1",
                usd(),
                PaymentSource::value_id("from"),
                PaymentSource::value_id("to"),
                120,
            ),
        )
        .await
        .unwrap();
    assert_eq!(tx.steps.len(), 2);
    assert_eq!(tx.contributed(), 0);
    assert_eq!(balance_of(&h.engine, "from").await, Some(180));
    assert_eq!(balance_of(&h.engine, "to").await, Some(120));

    let err = h
        .engine
        .transfer(
            OWNER,
            TransferRequest::new(
                "tr-2",
                usd(),
                PaymentSource::value_id("from"),
                PaymentSource::value_id("to"),
                1000,
            ),
        )
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::InsufficientBalance));
}

#[tokio::test]
async fn transfer_tops_up_a_used_up_value() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 300).await;
    h.engine
        .create_value(OWNER, CreateValueCmd::new("pass", usd()).uses_remaining(1))
        .await
        .unwrap();
    h.engine
        .debit(
            OWNER,
            DebitRequest::new("d-1", usd(), PaymentSource::value_id("pass")).uses(1),
        )
        .await
        .unwrap();

    h.engine
        .transfer(
            OWNER,
            TransferRequest::new(
                "tr-1",
                usd(),
                PaymentSource::value_id("gc-1"),
                PaymentSource::value_id("pass"),
                100,
            ),
        )
        .await
        .unwrap();
    let pass = h.engine.value(OWNER, "pass").await.unwrap();
    assert_eq!(pass.balance, Some(100));
    assert_eq!(pass.uses_remaining, Some(0));

    // a used-up Value still cannot be drawn from
    let err = h
        .engine
        .transfer(
            OWNER,
            TransferRequest::new(
                "tr-2",
                usd(),
                PaymentSource::value_id("pass"),
                PaymentSource::value_id("gc-1"),
                50,
            ),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.conflict_code(),
        Some(ConflictCode::InsufficientUsesRemaining)
    );
}

#[tokio::test]
async fn transfer_from_a_card_charges_it() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "to", 0).await;

    let request: TransactionRequest = serde_json::from_value(serde_json::json!({
        "type": "transfer",
        "id": "tr-1",
        "currency": "USD",
        "source": {"rail": "external", "source": "tok_visa"},
        "destination": {"rail": "lightrail", "valueId": "to"},
        "amount": 2500
    }))
    .unwrap();
    let tx = h.engine.create_transaction(OWNER, request).await.unwrap();

    assert_eq!(tx.transaction_type, TransactionType::Transfer);
    let charges = h.rail.charges();
    assert_eq!(charges.len(), 1);
    assert_eq!(charges[0].amount, 2500);
    assert_eq!(charges[0].idempotency_key, "tr-1-0");
    assert!(matches!(&tx.steps[0], Step::External(step) if step.charge_id.as_deref() == Some("ch_0")));
    assert_eq!(balance_of(&h.engine, "to").await, Some(2500));
}
