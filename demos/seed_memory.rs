//! Seeds an in-memory database around a pretend test, inside and outside a
//! transaction.
//!
//! Run with `RUST_LOG=dbfixture=debug cargo run --example seed_memory`.

use std::sync::Arc;

use dbfixture::database::{DataSourceRef, ManagedDataSource, MemoryDatabase};
use dbfixture::{Context, DataLoader, DataSetConfiguration, DefaultDataLoader, Phase};
use tracing_subscriber::EnvFilter;

const FIXTURE: &str = r#"{
    "teardown_operation": "DELETE_ALL",
    "data_sets": [[
        { "table": "users", "rows": [
            { "id": 1, "name": "ada" },
            { "id": 2, "name": "grace" }
        ] },
        { "table": "posts", "rows": [
            { "id": 10, "user_id": 1, "title": "notes on the engine" }
        ] }
    ]]
}"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let db = MemoryDatabase::new();
    db.create_table("users", &["id", "name"], &["id"])?;
    db.create_table("posts", &["id", "user_id", "title"], &["id"])?;

    let source = Arc::new(ManagedDataSource::new(db.clone()));
    let mut context = Context::new();
    let registered: DataSourceRef = source.clone();
    context.register("dataSource", registered)?;

    let configuration = DataSetConfiguration::from_json_str(FIXTURE)?;
    let loader = DefaultDataLoader;

    loader.execute(&context, Some(&configuration), Phase::Setup)?;
    println!(
        "after setup: {} users, {} posts",
        db.row_count("users")?,
        db.row_count("posts")?
    );
    loader.execute(&context, Some(&configuration), Phase::Teardown)?;
    println!("after teardown: {} users", db.row_count("users")?);

    // Inside a transaction the fixture shares the transaction's connection,
    // so rolling back also discards the fixture rows.
    let tx = source.begin_transaction()?;
    loader.execute(&context, Some(&configuration), Phase::Setup)?;
    println!(
        "inside transaction: {} users, {} open connection(s)",
        db.row_count("users")?,
        db.open_connections()
    );
    tx.rollback()?;
    println!("after rollback: {} users", db.row_count("users")?);

    Ok(())
}
