use chrono::{Datelike, Utc};
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use grocerylog::{
    config,
    core::session::Session,
    persist::sqlite::SqliteDocumentStore,
    report::budget_status,
    runtime::handle::spawn_grocerylog,
    Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    dotenv().ok();

    let app_config = config::load_app_configuration()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;

    if let Some(parent) = app_config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut backend = SqliteDocumentStore::open(&app_config.database_path)
        .inspect_err(|e| error!("Failed to open {:?}: {}", app_config.database_path, e))?;

    let now = Utc::now();
    let (session, pruned) = Session::open(&mut backend, app_config.retention_days, now)?;
    info!(
        trips = session.ledger().len(),
        pruned = pruned.len(),
        retention_days = app_config.retention_days,
        "session loaded"
    );

    let handle = spawn_grocerylog(session, Some(Box::new(backend)), app_config.runtime.clone());

    let summary = handle.monthly_summary(now.year(), now.month(), None).await?;
    println!("{}", summary.render());

    let history = handle.history_summary().await?;
    println!("{history}");

    for store in &app_config.stores {
        let Some(budget) = store.budget() else {
            continue;
        };
        let spent = handle
            .monthly_summary(now.year(), now.month(), Some(store.name.clone()))
            .await?
            .total;
        println!("{}: {}", store.name, budget_status(spent, budget));
    }

    handle.shutdown().await?;
    Ok(())
}
