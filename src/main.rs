//! Audit Snapshot — versioned ETL over a legacy financial database.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects the source and audit pools, and runs one snapshot over the
//! window given on the command line.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use std::time::Duration;
use tracing::info;

use audit_snapshot::config::AppConfig;
use audit_snapshot::pipeline::Pipeline;
use audit_snapshot::storage;
use audit_snapshot::types::{Requester, SnapshotRequest, Tenant, WindowAxis};

const USAGE: &str = "usage: audit-snapshot <period_start> <period_end_inclusive> \
                     [axis: due|payment|document] [--branch <id>] [--background]";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    let request = parse_request(&cfg)?;
    let background = std::env::args().any(|a| a == "--background");

    info!(
        period_start = %request.period_start,
        period_end = %request.period_end,
        axis = %request.window_axis,
        organization = request.tenant.organization_id,
        branch = ?request.legacy_branch_filter,
        background,
        "audit snapshot starting"
    );

    let source = storage::connect(&cfg.source.database_url, cfg.source.max_connections)
        .await
        .context("Failed to connect to the legacy source database")?;
    let audit = storage::connect_create(&cfg.audit.database_url, cfg.audit.max_connections)
        .await
        .context("Failed to connect to the audit datastore")?;

    let pipeline = Pipeline::new(source, audit, cfg.pipeline.clone());

    if background {
        let run_id = pipeline.run_background(&request).await?;
        println!("queued snapshot run {run_id}");

        // Fire-and-forget means the run row is the only progress
        // surface; poll it like any other caller would.
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let run = pipeline.runs().get(run_id).await?;
            if run.status.is_terminal() {
                println!("{run}");
                if let Some(message) = run.error_message {
                    println!("error: {message}");
                }
                break;
            }
        }
    } else {
        let run_id = pipeline.run_sync(&request).await?;
        let run = pipeline.runs().get(run_id).await?;
        println!("{run}");
    }

    Ok(())
}

/// Build the snapshot request from CLI arguments, config, and operator
/// identity env vars.
fn parse_request(cfg: &AppConfig) -> Result<SnapshotRequest> {
    let args: Vec<String> = std::env::args()
        .skip(1)
        .filter(|a| a != "--background")
        .collect();

    let mut positional = Vec::new();
    let mut branch: Option<i64> = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--branch" {
            let value = iter.next().context("--branch requires a value")?;
            branch = Some(value.parse().context("--branch value must be an integer")?);
        } else {
            positional.push(arg.clone());
        }
    }

    if positional.len() < 2 {
        bail!("{USAGE}");
    }

    let period_start: NaiveDate = positional[0]
        .parse()
        .with_context(|| format!("invalid period_start: {}", positional[0]))?;
    let period_end: NaiveDate = positional[1]
        .parse()
        .with_context(|| format!("invalid period_end: {}", positional[1]))?;
    if period_end < period_start {
        bail!("period_end {period_end} precedes period_start {period_start}");
    }

    let window_axis = match positional.get(2) {
        Some(raw) => raw.parse::<WindowAxis>()?,
        None => WindowAxis::DueDate,
    };

    let user_id = std::env::var("AUDIT_OPERATOR_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let email =
        std::env::var("AUDIT_OPERATOR_EMAIL").unwrap_or_else(|_| "operador@local".to_string());

    Ok(SnapshotRequest {
        period_start,
        period_end,
        window_axis,
        requester: Requester { user_id, email },
        tenant: Tenant {
            organization_id: cfg.tenant.organization_id,
            branch_id: cfg.tenant.branch_id,
        },
        legacy_branch_filter: branch.or(cfg.tenant.branch_id),
    })
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("audit_snapshot=info"));

    let json_logging = std::env::var("AUDIT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
