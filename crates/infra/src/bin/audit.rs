//! Recompute every balance cache from the ledger and repair mismatches.
//!
//! Reads `DATABASE_URL` and the `STOCKBOOK_*` settings, prints the audit
//! report as JSON on stdout and exits non-zero when anything was repaired.

use anyhow::Context;

use stockbook_infra::{PostgresStore, StockbookConfig, audit_balances};

fn main() -> anyhow::Result<()> {
    stockbook_observability::init();

    let config = StockbookConfig::from_env().context("failed to load configuration")?;
    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL must be set")?;

    let store = PostgresStore::connect(url, config.database.max_connections)
        .context("failed to connect to postgres")?;
    store.migrate().context("failed to prepare schema")?;

    let report = audit_balances(&store).context("balance audit failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_clean() {
        tracing::warn!(
            discrepancies = report.discrepancy_count(),
            "caches were out of date and have been rewritten"
        );
        std::process::exit(2);
    }
    Ok(())
}
