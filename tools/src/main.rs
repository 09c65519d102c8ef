//! ledger-server: HTTP front for the court-share ledger.
//!
//! Usage:
//!   ledger-server serve                      (settings from LEDGER_* env / .env)
//!   ledger-server seed --seed 42 --weeks 6 --db ledger.db
//!   ledger-server summary --db ledger.db [--year 2025 --month 1]

mod api;
mod config;
mod error;

use anyhow::{Context, Result};
use api::{app_router, AppState};
use chrono::{Datelike, Utc};
use config::ServerConfig;
use court_ledger_core::{
    config::LedgerConfig, content::ContentRules, demo, ledger::DebtLedger, store::LedgerStore,
};
use std::{env, sync::Arc, sync::Mutex};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("serve");
    let server = ServerConfig::from_env()?;
    let ledger = match &server.rules_file {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].clone())
        .unwrap_or_else(|| server.db_path.clone());

    match command {
        "serve" => serve(server, ledger, &db),
        "seed" => {
            let seed = parse_arg(&args, "--seed", 42u64);
            let weeks = parse_arg(&args, "--weeks", 6u32);
            let store = open(&db, &server, &ledger)?;
            let report = demo::seed_demo(
                &store,
                &ledger,
                seed,
                weeks,
                Utc::now().date_naive(),
                Utc::now(),
            )?;
            println!("=== DEMO SEED ===");
            println!("  db:        {db}");
            println!("  seed:      {seed}");
            println!("  players:   {}", report.players);
            println!("  sessions:  {}", report.sessions);
            println!("  payments:  {}", report.payments_marked);
            Ok(())
        }
        "summary" => {
            let store = open(&db, &server, &ledger)?;
            print_summary(&store, &ledger, &args)
        }
        other => anyhow::bail!("unknown command '{other}' (expected serve, seed or summary)"),
    }
}

/// For `:memory:` use a shared-cache URI so per-request connections all see
/// the same in-memory database.
fn effective_db(db: &str) -> String {
    if db == ":memory:" {
        format!("file:ledger_{}?mode=memory&cache=shared", std::process::id())
    } else {
        db.to_string()
    }
}

fn open(db: &str, server: &ServerConfig, ledger: &LedgerConfig) -> Result<LedgerStore> {
    let store = LedgerStore::open_with_timeout(db, server.busy_timeout)
        .with_context(|| format!("opening {db}"))?
        .with_version_retries(ledger.max_version_retries);
    store.migrate()?;
    Ok(store)
}

fn serve(server: ServerConfig, ledger: LedgerConfig, db: &str) -> Result<()> {
    let db_uri = effective_db(db);
    let anchor = open(&db_uri, &server, &ledger)?;
    let rules = ContentRules::new(&ledger.matching)?;
    if server.api_key.is_none() {
        log::warn!("LEDGER_API_KEY is not set; webhook and admin calls are unauthenticated");
    }
    let listen_addr = server.listen_addr;
    let state = Arc::new(AppState {
        ledger,
        rules,
        server,
        db_uri,
        _anchor: Mutex::new(anchor),
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let router = app_router(state);
        log::info!("Listening on {listen_addr}");
        let listener = tokio::net::TcpListener::bind(listen_addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                tokio::signal::ctrl_c().await.ok();
                log::info!("shutting down");
            })
            .await?;
        Ok::<(), anyhow::Error>(())
    })
}

fn print_summary(store: &LedgerStore, config: &LedgerConfig, args: &[String]) -> Result<()> {
    let ledger = DebtLedger::new(store, config.recent_session_cap);
    let today = Utc::now().date_naive();
    let year = parse_arg(args, "--year", today.year());
    let month = parse_arg(args, "--month", today.month());

    let owed = ledger.total_owed()?;
    let to_receive = ledger.total_to_receive()?;
    println!("=== LEDGER SUMMARY ===");
    println!("  sessions:        {}", store.session_count()?);
    println!("  transactions:    {}", store.transaction_count()?);
    println!("  total owed:      {} ({} people)", owed.amount, owed.people_count);
    println!(
        "  total to return: {} ({} people)",
        to_receive.amount, to_receive.people_count
    );
    if owed.truncated || to_receive.truncated {
        println!(
            "  (only the {} most recent sessions were scanned)",
            config.recent_session_cap
        );
    }

    println!();
    println!("=== DEBTS ===");
    let debts = ledger.all_debts(None)?;
    if debts.is_empty() {
        println!("  (nobody owes anything)");
    }
    for entry in &debts.entries {
        println!(
            "  {:<20} {:>10}  ({} session(s))",
            entry.player_name, entry.amount, entry.session_count
        );
    }

    println!();
    println!("=== MONTH {month}/{year} ===");
    match ledger.monthly_summary(year, month)? {
        Some(m) => {
            println!("  sessions:        {}", m.sessions_count);
            println!("  court:           {}", m.total_court);
            println!("  shuttlecocks:    {}", m.total_shuttlecock);
            println!("  total cost:      {}", m.total_cost);
            println!("  still owed:      {}", m.total_owed);
            println!("  to return:       {}", m.total_to_receive);
        }
        None => println!("  (invalid month)"),
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
