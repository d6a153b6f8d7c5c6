use std::{io::Read, sync::Arc, time::Duration};

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use engine::{
    ChainRequest, CreateValueCmd, Engine, EngineError, EventPublisher, TransactionRequest,
};
use migration::{Migrator, MigratorTrait};
use serde::Serialize;

mod events;
mod settings;

#[derive(Parser, Debug)]
#[command(name = "railbook")]
#[command(about = "Stored-value ledger and payment transaction engine")]
struct Cli {
    /// Settings file, without extension lookup rules applying (default `config/railbook`).
    #[arg(long)]
    config: Option<String>,

    /// Database connection string; overrides the settings (also read from `DATABASE_URL`).
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Owner the command acts for; defaults to `app.owner`.
    #[arg(long)]
    owner: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations and exit.
    Migrate,
    Value(Value),
    Tx(Tx),
    /// Void every pending transaction past its void date.
    Sweep,
    /// Reverse (or void) a fraudulent transaction and freeze its Values.
    Fraud { transaction_id: String },
}

#[derive(Args, Debug)]
struct Value {
    #[command(subcommand)]
    command: ValueCommand,
}

#[derive(Subcommand, Debug)]
enum ValueCommand {
    /// Create a Value from a JSON body (argument or stdin).
    Create { body: Option<String> },
    Get { id: String },
    Code { code: String },
    Freeze { id: String },
    Unfreeze { id: String },
    Cancel { id: String },
}

#[derive(Args, Debug)]
struct Tx {
    #[command(subcommand)]
    command: TxCommand,
}

#[derive(Subcommand, Debug)]
enum TxCommand {
    /// Create a transaction from a JSON body with a `type` field.
    Create { body: Option<String> },
    Get { id: String },
    Chain { id: String },
    Capture(ChainArgs),
    Void(ChainArgs),
    Reverse(ChainArgs),
}

#[derive(Args, Debug)]
struct ChainArgs {
    /// Transaction to act on.
    id: String,
    /// JSON body of the chain request (argument or stdin).
    body: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    status: u16,
    message_code: Option<&'a str>,
    message: String,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn read_body(body: Option<String>) -> Result<String, BoxError> {
    match body {
        Some(body) if body != "-" => Ok(body),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), BoxError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let settings = settings::Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "railbook={level},engine={level},migration={level}",
            level = settings.app.level
        ))
        .with_writer(std::io::stderr)
        .init();

    let url = cli
        .database_url
        .clone()
        .unwrap_or_else(|| settings.database.url());
    let db = sea_orm::Database::connect(url).await?;
    Migrator::up(&db, None).await?;
    if matches!(cli.command, Command::Migrate) {
        tracing::info!("migrations applied");
        return Ok(());
    }

    let mut builder = Engine::builder()
        .database(db)
        .config((&settings.engine).into());
    let publisher = settings.publisher.as_ref().map(|config| {
        EventPublisher::new(Arc::new(events::LogSink)).backoff(config.into())
    });
    if let Some(publisher) = &publisher {
        builder = builder.publisher(publisher.clone());
    }
    let engine = builder.build().await?;

    let owner = cli.owner.unwrap_or_else(|| settings.app.owner.clone());
    let result = run(&engine, &owner, cli.command).await;

    if let Some(publisher) = &publisher {
        while publisher.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    match result {
        Ok(()) => Ok(()),
        Err(Failure::Engine(err)) => {
            let body = ErrorBody {
                status: err.status_code(),
                message_code: err.message_code(),
                message: err.to_string(),
            };
            eprintln!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
        Err(Failure::Other(err)) => Err(err),
    }
}

enum Failure {
    Engine(EngineError),
    Other(BoxError),
}

impl From<EngineError> for Failure {
    fn from(err: EngineError) -> Self {
        Failure::Engine(err)
    }
}

impl From<BoxError> for Failure {
    fn from(err: BoxError) -> Self {
        Failure::Other(err)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Failure::Other(Box::new(err))
    }
}

fn parse_chain_request(body: Option<String>) -> Result<ChainRequest, Failure> {
    Ok(serde_json::from_str(&read_body(body)?)?)
}

async fn run(engine: &Engine, owner: &str, command: Command) -> Result<(), Failure> {
    match command {
        Command::Migrate => {}
        Command::Value(value) => match value.command {
            ValueCommand::Create { body } => {
                let cmd: CreateValueCmd = serde_json::from_str(&read_body(body)?)?;
                print_json(&engine.create_value(owner, cmd).await?)?;
            }
            ValueCommand::Get { id } => print_json(&engine.value(owner, &id).await?)?,
            ValueCommand::Code { code } => print_json(&engine.value_by_code(owner, &code).await?)?,
            ValueCommand::Freeze { id } => print_json(&engine.freeze_value(owner, &id).await?)?,
            ValueCommand::Unfreeze { id } => {
                print_json(&engine.unfreeze_value(owner, &id).await?)?;
            }
            ValueCommand::Cancel { id } => print_json(&engine.cancel_value(owner, &id).await?)?,
        },
        Command::Tx(tx) => match tx.command {
            TxCommand::Create { body } => {
                let request: TransactionRequest = serde_json::from_str(&read_body(body)?)?;
                print_json(&engine.create_transaction(owner, request).await?)?;
            }
            TxCommand::Get { id } => print_json(&engine.transaction(owner, &id).await?)?,
            TxCommand::Chain { id } => print_json(&engine.transaction_chain(owner, &id).await?)?,
            TxCommand::Capture(args) => {
                let request = parse_chain_request(args.body)?;
                print_json(&engine.capture(owner, &args.id, request).await?)?;
            }
            TxCommand::Void(args) => {
                let request = parse_chain_request(args.body)?;
                print_json(&engine.void(owner, &args.id, request).await?)?;
            }
            TxCommand::Reverse(args) => {
                let request = parse_chain_request(args.body)?;
                print_json(&engine.reverse(owner, &args.id, request).await?)?;
            }
        },
        Command::Sweep => {
            let report = engine.void_expired_pending(Utc::now()).await?;
            print_json(&report.voided)?;
            if !report.failed.is_empty() {
                tracing::warn!(failed = ?report.failed, "some pending transactions were not voided");
            }
        }
        Command::Fraud { transaction_id } => {
            let outcome = engine.handle_fraud_signal(owner, &transaction_id).await?;
            print_json(&serde_json::json!({
                "compensation": outcome.compensation,
                "frozen": outcome.frozen,
            }))?;
        }
    }
    Ok(())
}
