//! Command-line interface: `vigil scan`, `vigil estimate`, and
//! `vigil checks` over a capture file.

use crate::capture::CaptureFile;
use crate::checks;
use crate::config::ConfigFile;
use crate::duration::parse_duration;
use crate::engine::model::{Aggressivity, ScanConfig, ScanOutcome, Severity};
use crate::engine::registry::CheckRegistry;
use crate::engine::runner::ScanRunner;
use crate::error::Error;
use crate::host::{ClientTimeouts, HostSdk, HttpHost, MemoryHost, ScopePolicy};
use crate::output;
use crate::suggestions::unknown_check_error;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Vigil: passive/active web-security scanning over captured HTTP traffic",
    long_about = "Vigil runs a configurable suite of security checks against captured\n\
                  request/response pairs. Passive checks inspect the captures; active\n\
                  checks issue their own throttled probes.\n\n\
                  Examples:\n  \
                  vigil scan --capture traffic.json\n  \
                  vigil scan --capture traffic.yaml --severity high --severity critical\n  \
                  vigil estimate --capture traffic.json\n  \
                  vigil checks"
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,

    /// Path to a TOML config file (default: <config_dir>/vigil/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scan over a capture file
    Scan(ScanArgs),
    /// Count the checks a scan would run, without running them
    Estimate(EstimateArgs),
    /// List the registered checks
    Checks {
        /// Only show checks carrying this tag
        #[arg(long, value_name = "TAG")]
        tag: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Capture file (JSON or YAML) with the recorded traffic
    #[arg(long, value_name = "PATH")]
    pub capture: String,

    /// Run only these checks (plus their dependencies); repeatable
    #[arg(long = "check", value_name = "ID")]
    pub checks: Vec<String>,

    /// Run only checks carrying one of these tags; repeatable
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Only emit findings of these severities; repeatable
    #[arg(long = "severity", value_name = "LEVEL")]
    pub severities: Vec<Severity>,

    /// Payload-volume tier for active checks
    #[arg(long, value_name = "TIER")]
    pub aggressivity: Option<Aggressivity>,

    /// Scan captures whose host falls outside the configured scope too
    #[arg(long)]
    pub include_out_of_scope: bool,

    /// Add a host (and its subdomains) to the scan scope; repeatable
    #[arg(long = "allow-host", value_name = "HOST")]
    pub allowed_hosts: Vec<String>,

    /// Let active checks send real requests instead of consulting captures
    #[arg(long)]
    pub active: bool,

    /// Maximum targets scanned concurrently
    #[arg(long, value_name = "N")]
    pub concurrent_targets: Option<usize>,

    /// Maximum checks per target running concurrently
    #[arg(long, value_name = "N")]
    pub concurrent_checks: Option<usize>,

    /// Maximum check-issued requests in flight
    #[arg(long, value_name = "N")]
    pub concurrent_requests: Option<usize>,

    /// Spacing between check-issued requests, e.g. "250ms"
    #[arg(long, value_name = "DURATION")]
    pub requests_delay: Option<String>,

    /// Whole-scan timeout, e.g. "10m"; "0" disables
    #[arg(long, value_name = "DURATION")]
    pub scan_timeout: Option<String>,

    /// Per-check timeout, e.g. "60s"; "0" disables
    #[arg(long, value_name = "DURATION")]
    pub check_timeout: Option<String>,

    /// Output format for findings
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Write the execution history as JSON to this path
    #[arg(long, value_name = "PATH")]
    pub history_out: Option<String>,
}

#[derive(Args, Debug)]
pub struct EstimateArgs {
    /// Capture file (JSON or YAML) with the recorded traffic
    #[arg(long, value_name = "PATH")]
    pub capture: String,

    /// Count only these checks (plus their dependencies); repeatable
    #[arg(long = "check", value_name = "ID")]
    pub checks: Vec<String>,

    /// Count only checks carrying one of these tags; repeatable
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Only count checks emitting these severities; repeatable
    #[arg(long = "severity", value_name = "LEVEL")]
    pub severities: Vec<Severity>,

    /// Payload-volume tier for active checks
    #[arg(long, value_name = "TIER")]
    pub aggressivity: Option<Aggressivity>,

    /// Count captures whose host falls outside the configured scope too
    #[arg(long)]
    pub include_out_of_scope: bool,

    /// Add a host (and its subdomains) to the scan scope; repeatable
    #[arg(long = "allow-host", value_name = "HOST")]
    pub allowed_hosts: Vec<String>,
}

/// Initializes the tracing subscriber: `-v`/`-vv` override `VIGIL_LOG`,
/// and `VIGIL_LOG_FORMAT=json` switches to structured output.
pub fn init_tracing(verbosity: u8) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => std::env::var("VIGIL_LOG").unwrap_or_else(|_| "warn".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_new(&level)
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let json = std::env::var("VIGIL_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Dispatches a parsed command line.
///
/// # Errors
///
/// Configuration, capture, and scan failures.
pub async fn run(cli: Cli) -> Result<(), Error> {
    let config_file = ConfigFile::load(
        cli.config
            .as_deref()
            .map(|path| expand(path))
            .as_deref()
            .map(Path::new),
    )?;

    match cli.command {
        Commands::Scan(args) => run_scan(args, &config_file).await,
        Commands::Estimate(args) => run_estimate(args, &config_file).await,
        Commands::Checks { tag } => run_checks(tag.as_deref()),
    }
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

async fn run_scan(args: ScanArgs, config_file: &ConfigFile) -> Result<(), Error> {
    let mut config = ScanConfig::default();
    config_file.apply(&mut config)?;
    apply_scan_flags(&args, &mut config)?;

    let mut scope = config_file.scope_policy();
    scope.allowed_hosts.extend(args.allowed_hosts.clone());

    let capture = CaptureFile::load(Path::new(&expand(&args.capture))).await?;
    let store = Arc::new(capture.into_host(scope.clone())?);
    let targets = store.request_ids();
    info!(targets = targets.len(), active = args.active, "capture loaded");

    let host: Arc<dyn HostSdk> = if args.active {
        Arc::new(HttpHost::new(
            Arc::clone(&store),
            &ClientTimeouts::default(),
            scope,
        )?)
    } else {
        store
    };

    let registry = build_registry(&args.checks, &args.tags)?;
    let runner = ScanRunner::new(&registry, config, host)?;
    let outcome = runner.run(targets).await;

    if let Some(history_out) = &args.history_out {
        let history = runner.execution_history();
        std::fs::write(
            PathBuf::from(expand(history_out)),
            serde_json::to_string_pretty(&history)?,
        )?;
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Table => print_outcome(&outcome),
    }

    match outcome {
        ScanOutcome::Error { error } => Err(Error::Runtime(error)),
        _ => Ok(()),
    }
}

fn print_outcome(outcome: &ScanOutcome) {
    match outcome {
        ScanOutcome::Finished { findings } => {
            println!("Scan finished: {} finding(s)", findings.len());
            if !findings.is_empty() {
                println!("{}", output::findings_table(findings));
            }
        }
        ScanOutcome::Interrupted { reason, findings } => {
            println!("Scan interrupted ({reason}): {} finding(s)", findings.len());
            if !findings.is_empty() {
                println!("{}", output::findings_table(findings));
            }
        }
        ScanOutcome::Error { error } => println!("Scan failed: {error}"),
    }
}

async fn run_estimate(args: EstimateArgs, config_file: &ConfigFile) -> Result<(), Error> {
    let mut config = ScanConfig::default();
    config_file.apply(&mut config)?;
    if !args.severities.is_empty() {
        config.severities.clone_from(&args.severities);
    }
    if let Some(aggressivity) = args.aggressivity {
        config.aggressivity = aggressivity;
    }
    if args.include_out_of_scope {
        config.in_scope_only = false;
    }

    let mut scope = config_file.scope_policy();
    scope.allowed_hosts.extend(args.allowed_hosts.clone());

    let capture = CaptureFile::load(Path::new(&expand(&args.capture))).await?;
    let store: Arc<MemoryHost> = Arc::new(capture.into_host(scope)?);
    let targets = store.request_ids();

    let registry = build_registry(&args.checks, &args.tags)?;
    let runner = ScanRunner::new(&registry, config, store)?;
    let estimate = runner.estimate(&targets).await?;

    println!("{}", estimate.checks_total);
    Ok(())
}

fn run_checks(tag: Option<&str>) -> Result<(), Error> {
    let mut registry = CheckRegistry::new();
    checks::register_builtins(&mut registry)?;
    let table = output::checks_table(registry.iter().map(|check| check.metadata()).filter(
        |metadata| tag.is_none_or(|tag| metadata.tags.iter().any(|t| t == tag)),
    ));
    println!("{table}");
    Ok(())
}

fn apply_scan_flags(args: &ScanArgs, config: &mut ScanConfig) -> Result<(), Error> {
    if !args.severities.is_empty() {
        config.severities.clone_from(&args.severities);
    }
    if let Some(aggressivity) = args.aggressivity {
        config.aggressivity = aggressivity;
    }
    if args.include_out_of_scope {
        config.in_scope_only = false;
    }
    if let Some(n) = args.concurrent_targets {
        config.concurrent_targets = n;
    }
    if let Some(n) = args.concurrent_checks {
        config.concurrent_checks = n;
    }
    if let Some(n) = args.concurrent_requests {
        config.concurrent_requests = n;
    }
    if let Some(delay) = &args.requests_delay {
        config.requests_delay_ms = parse_duration(delay)?
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX);
    }
    if let Some(timeout) = &args.scan_timeout {
        config.scan_timeout = parse_duration(timeout)?.as_secs();
    }
    if let Some(timeout) = &args.check_timeout {
        config.check_timeout = parse_duration(timeout)?.as_secs();
    }
    Ok(())
}

/// Builds the registry the scan will use: the full built-in suite, or the
/// requested subset closed over its dependencies.
fn build_registry(ids: &[String], tags: &[String]) -> Result<CheckRegistry, Error> {
    let mut full = CheckRegistry::new();
    checks::register_builtins(&mut full)?;

    if ids.is_empty() && tags.is_empty() {
        return Ok(full);
    }

    let available = full.ids();
    for id in ids {
        if full.get(id).is_none() {
            return Err(unknown_check_error(&available, id));
        }
    }

    // Seed with the explicit selection, then close over depends_on.
    let mut keep: BTreeSet<String> = ids.iter().cloned().collect();
    for check in full.iter() {
        let metadata = check.metadata();
        if metadata.tags.iter().any(|t| tags.contains(t)) {
            keep.insert(metadata.id.clone());
        }
    }
    let mut frontier: Vec<String> = keep.iter().cloned().collect();
    while let Some(id) = frontier.pop() {
        let Some(check) = full.get(&id) else { continue };
        for dep in &check.metadata().depends_on {
            if keep.insert(dep.clone()) {
                frontier.push(dep.clone());
            }
        }
    }

    let mut filtered = CheckRegistry::new();
    for constructor in checks::builtins() {
        let check = constructor()?;
        if keep.contains(check.id()) {
            filtered.register(check)?;
        }
    }
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_registry_pulls_in_dependencies() {
        let registry = build_registry(&["csp-clickjacking".into()], &[]).unwrap();
        assert!(registry.get("csp-clickjacking").is_some());
        assert!(registry.get("csp-not-enforced").is_some());
        assert!(registry.get("hsts-missing").is_none());
    }

    #[test]
    fn tag_filter_selects_by_tag() {
        let registry = build_registry(&[], &["cookies".into()]).unwrap();
        assert!(registry.get("cookie-flags").is_some());
        assert!(registry.get("reflected-input").is_none());
    }

    #[test]
    fn unknown_check_id_gets_a_suggestion() {
        let err = build_registry(&["csp-not-enforce".into()], &[]).unwrap_err();
        assert!(err.to_string().contains("csp-not-enforced"));
    }

    #[test]
    fn cli_parses_a_typical_scan_invocation() {
        let cli = Cli::try_parse_from([
            "vigil",
            "scan",
            "--capture",
            "traffic.json",
            "--severity",
            "high",
            "--severity",
            "critical",
            "--aggressivity",
            "medium",
            "--requests-delay",
            "250ms",
            "--format",
            "json",
        ])
        .unwrap();
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan subcommand");
        };
        assert_eq!(args.severities, vec![Severity::High, Severity::Critical]);
        assert_eq!(args.aggressivity, Some(Aggressivity::Medium));
        assert_eq!(args.requests_delay.as_deref(), Some("250ms"));
    }
}
