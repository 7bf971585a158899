//! Chronicle operator CLI.
//!
//! Appends to, verifies, queries and exports a SQLite-backed audit ledger.
//!
//! Usage:
//!   chronicle append --org acme --user alice --request req-1 \
//!       --event-type data-modification --action update --resource invoice
//!   chronicle verify --org acme --correlation req-1 --event-type data-modification
//!   chronicle verify-org --org acme
//!   chronicle query --org acme --user system --since 2024-01-01T00:00:00Z
//!   chronicle export --org acme --format csv --output audit.csv
//!   chronicle chains --org acme
//!
//! Exit status is 0 on success, 1 on error, and 2 when verification finds a
//! broken chain.

mod config;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use chronicle::store::SqliteStore;
use chronicle::{
    CancellationToken, ChainStatus, EventFilter, ExportBundle, ExportFormat, ExportOptions,
    Ledger, NewEvent, PageRequest, RequestContext, TimeRange, VerificationReport,
};
use chronicle_core::{format_millis, parse_millis, ChainKey, EventType, Severity};

use crate::config::CliConfig;

const BROKEN: u8 = 2;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Tamper-evident audit ledger.
#[derive(Parser, Debug)]
#[command(name = "chronicle", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the config file (default: ./chronicle.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite ledger file, overriding the config
    #[arg(long, global = true, env = "CHRONICLE_DATABASE")]
    database: Option<PathBuf>,

    /// Hex ed25519 seed used to sign exports, overriding the config
    #[arg(long, global = true, env = "CHRONICLE_SIGNING_KEY", hide_env_values = true)]
    signing_key: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record one audit event
    Append(AppendArgs),

    /// Verify a single chain
    Verify {
        #[arg(long)]
        org: String,
        /// Correlation id of the chain (the request id for uncorrelated requests)
        #[arg(long)]
        correlation: String,
        #[arg(long)]
        event_type: EventType,
    },

    /// Verify every chain of an organization
    VerifyOrg {
        #[arg(long)]
        org: String,
    },

    /// Search an organization's events, newest first
    Query {
        #[arg(long)]
        org: String,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = PageRequest::DEFAULT_LIMIT)]
        limit: u32,
    },

    /// Export events with chain attestations
    Export(ExportArgs),

    /// List an organization's chains
    Chains {
        #[arg(long)]
        org: String,
    },
}

#[derive(Args, Debug)]
struct AppendArgs {
    #[arg(long)]
    org: String,
    /// Acting user; omit for system-initiated events
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    request: String,
    #[arg(long)]
    correlation: Option<String>,
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    ip: Option<String>,
    #[arg(long)]
    user_agent: Option<String>,

    #[arg(long)]
    event_type: EventType,
    #[arg(long)]
    action: String,
    #[arg(long)]
    resource: String,
    #[arg(long)]
    resource_id: Option<String>,
    #[arg(long)]
    resource_type: Option<String>,
    /// Resource state before the action, as JSON
    #[arg(long, value_parser = parse_json)]
    before: Option<Value>,
    /// Resource state after the action, as JSON
    #[arg(long, value_parser = parse_json)]
    after: Option<Value>,
    #[arg(long, value_parser = parse_json)]
    metadata: Option<Value>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Overrides the event type's default severity
    #[arg(long)]
    severity: Option<Severity>,
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Acting user; `system` matches system events. Repeatable.
    #[arg(long = "user")]
    users: Vec<String>,
    #[arg(long = "event-type")]
    event_types: Vec<EventType>,
    #[arg(long = "severity")]
    severities: Vec<Severity>,
    #[arg(long = "resource-type")]
    resource_types: Vec<String>,
    /// Inclusive lower bound, RFC 3339 or Unix milliseconds
    #[arg(long, value_parser = parse_time)]
    since: Option<i64>,
    /// Inclusive upper bound, RFC 3339 or Unix milliseconds
    #[arg(long, value_parser = parse_time)]
    until: Option<i64>,
    /// Case-insensitive text search
    #[arg(long)]
    text: Option<String>,
}

impl FilterArgs {
    fn into_filter(self) -> EventFilter {
        EventFilter {
            user_ids: self.users,
            event_types: self.event_types,
            severities: self.severities,
            resource_types: self.resource_types,
            time_range: TimeRange::new(self.since, self.until),
            text: self.text,
            before: None,
        }
    }
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(long)]
    org: String,
    #[command(flatten)]
    filter: FilterArgs,
    /// Export one whole chain instead; needs exactly one --event-type
    #[arg(long)]
    correlation: Option<String>,
    #[arg(long, default_value_t = ExportFormat::Json)]
    format: ExportFormat,
    /// Include before/after snapshots
    #[arg(long)]
    include_snapshots: bool,
    /// Skip chain verification; chains are attested UNVERIFIED
    #[arg(long)]
    no_verify: bool,
    /// Write the payload here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {e}"))
}

fn parse_time(s: &str) -> Result<i64, String> {
    parse_millis(s).ok_or_else(|| format!("not an RFC 3339 time or millisecond count: {s}"))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    // RUST_LOG=debug for verbose output. Logs go to stderr; stdout carries data.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = CliConfig::load(cli.config.as_deref())?
        .with_overrides(cli.database, cli.signing_key);
    let ledger = open_ledger(&config)?;

    match cli.command {
        Command::Append(args) => append(&ledger, args).await,
        Command::Verify {
            org,
            correlation,
            event_type,
        } => {
            let report = ledger
                .verify_chain(&ChainKey::new(org, correlation, event_type))
                .await?;
            print_json(&report)?;
            Ok(status(report.valid))
        }
        Command::VerifyOrg { org } => {
            let cancel = CancellationToken::new();
            let watcher = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    watcher.cancel();
                }
            });

            let report = ledger.verify_organization(&org, &cancel).await?;
            for chain in report.broken_chains() {
                eprintln!("BROKEN {}", describe(chain));
            }
            print_json(&report)?;
            Ok(status(report.valid))
        }
        Command::Query {
            org,
            filter,
            offset,
            limit,
        } => {
            let page = ledger
                .query_events(&org, &filter.into_filter(), PageRequest::new(offset, limit))
                .await?;
            let mut out = std::io::stdout().lock();
            for event in &page.items {
                serde_json::to_writer(&mut out, event)?;
                writeln!(out)?;
            }
            eprintln!(
                "{} of {} events (offset {}){}",
                page.items.len(),
                page.total,
                offset,
                if page.has_more() { ", more available" } else { "" }
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Export(args) => export(&ledger, args).await,
        Command::Chains { org } => {
            for key in ledger.list_chains(&org).await? {
                println!("{}\t{}\t{}", key.correlation_id, key.event_type, key.id());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_ledger(config: &CliConfig) -> Result<Ledger<SqliteStore>> {
    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("opening {}", config.database.display()))?;
    let mut ledger = Ledger::new(store, config.ledger.clone())?;
    if let Some(key) = config.keypair()? {
        ledger = ledger.with_signing_key(key);
    }
    Ok(ledger)
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn append(ledger: &Ledger<SqliteStore>, args: AppendArgs) -> Result<ExitCode> {
    let mut ctx = match args.user {
        Some(user) => RequestContext::new(args.org, user, args.request),
        None => RequestContext::system(args.org, args.request),
    }
    .with_client(args.ip, args.user_agent);
    if let Some(correlation) = args.correlation {
        ctx = ctx.with_correlation(correlation);
    }
    if let Some(session) = args.session {
        ctx = ctx.with_session(session);
    }

    let mut event = NewEvent::new(args.event_type, args.action, args.resource).tags(args.tags);
    if let Some(id) = args.resource_id {
        event = event.resource_id(id);
    }
    if let Some(kind) = args.resource_type {
        event = event.resource_type(kind);
    }
    if let Some(state) = args.before {
        event = event.before(state);
    }
    if let Some(state) = args.after {
        event = event.after(state);
    }
    if let Some(metadata) = args.metadata {
        event = event.metadata(metadata);
    }
    if let Some(severity) = args.severity {
        event = event.severity(severity);
    }

    let event = ledger.append_event(&ctx, event).await?;
    print_json(&event)?;
    Ok(ExitCode::SUCCESS)
}

async fn export(ledger: &Ledger<SqliteStore>, args: ExportArgs) -> Result<ExitCode> {
    let options = ExportOptions::new(args.format)
        .with_snapshots(args.include_snapshots)
        .with_verification(!args.no_verify);

    let bundle = match args.correlation {
        Some(correlation) => {
            let [event_type] = args.filter.event_types[..] else {
                bail!("--correlation needs exactly one --event-type");
            };
            let key = ChainKey::new(args.org, correlation, event_type);
            ledger.export_chain(&key, &options).await?
        }
        None => {
            ledger
                .export_events(&args.org, &args.filter.into_filter(), &options)
                .await?
        }
    };

    match &args.output {
        Some(path) => std::fs::write(path, &bundle.payload)
            .with_context(|| format!("writing {}", path.display()))?,
        None => std::io::stdout().lock().write_all(&bundle.payload)?,
    }
    summarize(&bundle);
    Ok(ExitCode::SUCCESS)
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn status(valid: bool) -> ExitCode {
    if valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(BROKEN)
    }
}

fn describe(report: &VerificationReport) -> String {
    match &report.broken_at {
        Some(brk) => format!("{} at index {}: {}", report.chain, brk.index, brk.kind),
        None => report.chain.to_string(),
    }
}

fn summarize(bundle: &ExportBundle) {
    eprintln!(
        "exported {} events ({}) at {}",
        bundle.event_count,
        bundle.format.content_type(),
        format_millis(bundle.generated_at)
    );
    eprintln!("sha256 {}", bundle.digest);
    if let Some(sig) = &bundle.signature {
        eprintln!("signed by {}", sig.public_key.to_hex());
    }
    for chain in &bundle.chains {
        if chain.status != ChainStatus::Valid {
            eprintln!("{} {}", chain.status, chain.chain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_append() {
        let cli = Cli::try_parse_from([
            "chronicle",
            "append",
            "--org",
            "acme",
            "--request",
            "req-1",
            "--event-type",
            "data-modification",
            "--action",
            "update",
            "--resource",
            "invoice",
            "--before",
            r#"{"total":1}"#,
            "--tag",
            "billing",
            "--tag",
            "q3",
        ])
        .unwrap();

        let Command::Append(args) = cli.command else {
            panic!("expected append");
        };
        assert_eq!(args.user, None);
        assert_eq!(args.event_type, EventType::DataModification);
        assert_eq!(args.before, Some(serde_json::json!({ "total": 1 })));
        assert_eq!(args.tags, vec!["billing", "q3"]);
    }

    #[test]
    fn test_rejects_bad_json_and_event_type() {
        let base = vec![
            "chronicle", "append", "--org", "a", "--request", "r", "--action", "x", "--resource", "y",
        ];

        let mut bad_json = base.clone();
        bad_json.extend(["--event-type", "role-change", "--after", "{nope"]);
        assert!(Cli::try_parse_from(bad_json).is_err());

        let mut bad_type = base;
        bad_type.extend(["--event-type", "teleport"]);
        assert!(Cli::try_parse_from(bad_type).is_err());
    }

    #[test]
    fn test_filter_args_build_filter() {
        let cli = Cli::try_parse_from([
            "chronicle",
            "query",
            "--org",
            "acme",
            "--user",
            "system",
            "--severity",
            "high",
            "--since",
            "1000",
            "--until",
            "1970-01-01T00:00:02Z",
        ])
        .unwrap();

        let Command::Query { filter, limit, .. } = cli.command else {
            panic!("expected query");
        };
        assert_eq!(limit, PageRequest::DEFAULT_LIMIT);
        let filter = filter.into_filter();
        assert_eq!(filter.user_ids, vec!["system"]);
        assert_eq!(filter.severities, vec![Severity::High]);
        assert_eq!(filter.time_range, TimeRange::new(Some(1000), Some(2000)));
    }

    #[tokio::test]
    async fn test_append_then_export_chain() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig {
            database: dir.path().join("audit.db"),
            ..Default::default()
        };
        let ledger = open_ledger(&config).unwrap();

        let cli = Cli::try_parse_from([
            "chronicle",
            "append",
            "--org",
            "acme",
            "--user",
            "alice",
            "--request",
            "req-1",
            "--event-type",
            "role-change",
            "--action",
            "promote",
            "--resource",
            "member",
        ])
        .unwrap();
        let Command::Append(args) = cli.command else {
            panic!("expected append");
        };
        append(&ledger, args).await.unwrap();

        let output = dir.path().join("chain.csv");
        let cli = Cli::try_parse_from([
            "chronicle",
            "export",
            "--org",
            "acme",
            "--correlation",
            "req-1",
            "--event-type",
            "role-change",
            "--format",
            "csv",
            "--output",
            output.to_str().unwrap(),
        ])
        .unwrap();
        let Command::Export(args) = cli.command else {
            panic!("expected export");
        };
        export(&ledger, args).await.unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text.split("\r\n").filter(|r| !r.is_empty()).count(), 2);
        assert!(text.contains(",VALID"));
    }
}
