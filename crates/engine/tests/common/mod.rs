#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use sea_orm::{Database, DatabaseConnection};
use serde_json::json;

use engine::{
    Charge, ChargeRequest, CreateValueCmd, Currency, Engine, EventPublisher, EventSink,
    ExternalRail, RailError, Refund, SinkError, TransactionEvent, Value,
};
use migration::MigratorTrait;

pub const OWNER: &str = "owner-1";

pub fn usd() -> Currency {
    Currency::try_from("USD").unwrap()
}

/// Card rail double recording every call.
#[derive(Debug, Default)]
pub struct RecordingRail {
    next_id: AtomicUsize,
    pub fail_charges: AtomicBool,
    pub charges: Mutex<Vec<ChargeRequest>>,
    pub captures: Mutex<Vec<String>>,
    pub refunds: Mutex<Vec<(String, String)>>,
}

impl RecordingRail {
    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    pub fn captures(&self) -> Vec<String> {
        self.captures.lock().unwrap().clone()
    }

    pub fn refunds(&self) -> Vec<(String, String)> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalRail for RecordingRail {
    async fn create_charge(&self, request: ChargeRequest) -> Result<Charge, RailError> {
        if self.fail_charges.load(Ordering::SeqCst) {
            return Err(RailError::new("card_declined", "Your card was declined."));
        }
        let id = format!("ch_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let charge = Charge {
            id: id.clone(),
            amount: request.amount,
            captured: request.capture,
            record: json!({"id": id, "amount": request.amount}),
        };
        self.charges.lock().unwrap().push(request);
        Ok(charge)
    }

    async fn capture_charge(&self, charge_id: &str) -> Result<Charge, RailError> {
        self.captures.lock().unwrap().push(charge_id.to_string());
        Ok(Charge {
            id: charge_id.to_string(),
            amount: 0,
            captured: true,
            record: json!({"id": charge_id, "captured": true}),
        })
    }

    async fn refund_charge(&self, charge_id: &str, reason: &str) -> Result<Refund, RailError> {
        self.refunds
            .lock()
            .unwrap()
            .push((charge_id.to_string(), reason.to_string()));
        Ok(Refund {
            id: format!("re_{charge_id}"),
            charge_id: charge_id.to_string(),
            amount: 0,
            record: json!({"charge": charge_id, "reason": reason}),
        })
    }
}

/// Event sink double keeping every delivered event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<TransactionEvent>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, event: &TransactionEvent) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub db: DatabaseConnection,
    pub rail: Arc<RecordingRail>,
}

pub async fn engine_with_db() -> Harness {
    engine_with_publisher(None).await
}

pub async fn engine_with_publisher(publisher: Option<EventPublisher>) -> Harness {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let rail = Arc::new(RecordingRail::default());
    let mut builder = Engine::builder().database(db.clone()).rail(rail.clone());
    if let Some(publisher) = publisher {
        builder = builder.publisher(publisher);
    }
    let engine = builder.build().await.unwrap();
    Harness { engine, db, rail }
}

pub async fn gift_card(engine: &Engine, id: &str, balance: i64) -> Value {
    engine
        .create_value(OWNER, CreateValueCmd::new(id, usd()).balance(balance))
        .await
        .unwrap()
}

pub async fn balance_of(engine: &Engine, id: &str) -> Option<i64> {
    engine.value(OWNER, id).await.unwrap().balance
}
