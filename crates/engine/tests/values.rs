mod common;

use engine::{ConflictCode, CreateValueCmd, EngineError, Step, TransactionType};

use common::{OWNER, engine_with_db, gift_card, usd};

#[tokio::test]
async fn starting_balance_is_recorded_as_a_transaction() {
    let h = engine_with_db().await;
    h.engine
        .create_value(
            OWNER,
            CreateValueCmd::new("gc-1", usd())
                .balance(1000)
                .contact_id("alice"),
        )
        .await
        .unwrap();

    let tx = h.engine.transaction(OWNER, "gc-1").await.unwrap();
    assert_eq!(tx.transaction_type, TransactionType::InitialBalance);
    assert_eq!(tx.tags, vec!["contact:alice".to_string()]);
    let Step::Lightrail(step) = &tx.steps[0] else {
        panic!("expected a lightrail step");
    };
    assert_eq!(step.balance_before, Some(0));
    assert_eq!(step.balance_after, Some(1000));
    assert_eq!(step.balance_change, 1000);
}

#[tokio::test]
async fn empty_value_has_no_initial_transaction() {
    let h = engine_with_db().await;
    let value = h
        .engine
        .create_value(OWNER, CreateValueCmd::new("gc-0", usd()))
        .await
        .unwrap();
    assert_eq!(value.balance, Some(0));
    assert!(matches!(
        h.engine.transaction(OWNER, "gc-0").await,
        Err(EngineError::TransactionNotFound(_))
    ));
}

#[tokio::test]
async fn duplicate_id_or_code_is_rejected() {
    let h = engine_with_db().await;
    h.engine
        .create_value(
            OWNER,
            CreateValueCmd::new("gc-1", usd())
                .balance(10)
                .code("SPRING-2026", true),
        )
        .await
        .unwrap();

    let err = h
        .engine
        .create_value(OWNER, CreateValueCmd::new("gc-1", usd()).balance(10))
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::ValueExists));

    let err = h
        .engine
        .create_value(
            OWNER,
            CreateValueCmd::new("gc-2", usd()).code("SPRING-2026", true),
        )
        .await
        .unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::ValueExists));
    assert!(h.engine.value(OWNER, "gc-2").await.is_err());

    // owners are isolated
    h.engine
        .create_value("owner-2", CreateValueCmd::new("gc-1", usd()).balance(10))
        .await
        .unwrap();
}

#[tokio::test]
async fn lookup_by_code_hides_the_code_in_errors() {
    let h = engine_with_db().await;
    h.engine
        .create_value(
            OWNER,
            CreateValueCmd::new("gc-1", usd())
                .balance(10)
                .code("ABCD-EFGH-1234", false),
        )
        .await
        .unwrap();

    let value = h.engine.value_by_code(OWNER, "ABCD-EFGH-1234").await.unwrap();
    assert_eq!(value.id, "gc-1");

    let err = h.engine.value_by_code(OWNER, "ZZZZ-9876").await.unwrap_err();
    assert_eq!(err, EngineError::ValueNotFound("code ending 9876".to_string()));
}

#[tokio::test]
async fn freeze_unfreeze_and_cancel() {
    let h = engine_with_db().await;
    gift_card(&h.engine, "gc-1", 100).await;

    assert!(h.engine.freeze_value(OWNER, "gc-1").await.unwrap().frozen);
    assert!(h.engine.value(OWNER, "gc-1").await.unwrap().frozen);
    assert!(!h.engine.unfreeze_value(OWNER, "gc-1").await.unwrap().frozen);

    let canceled = h.engine.cancel_value(OWNER, "gc-1").await.unwrap();
    assert!(canceled.canceled);
    assert_eq!(canceled.balance, Some(100));
    let err = h.engine.unfreeze_value(OWNER, "gc-1").await.unwrap_err();
    assert_eq!(err.conflict_code(), Some(ConflictCode::ValueCanceled));

    let err = h.engine.freeze_value(OWNER, "missing").await.unwrap_err();
    assert_eq!(err, EngineError::ValueNotFound("missing".to_string()));
}
