//! cozctl - causal profiling client
//!
//! The main entry point, handling:
//! - Attaching to a profiled process (locally or through a control service)
//! - Configuring progress point and scope, starting and stopping profiling
//! - Polling experiments into a resumable profile
//! - Serving local processes to remote clients

use clap::{Args, Parser, Subcommand, ValueEnum};
use coz_common::{Error, ProcessId, ProgressPoint, Scope, StructuredError};
use coz_core::attach::AttachGateway;
use coz_core::collect::PsEnumerator;
use coz_core::config::{load_config, ClientConfig, ConfigOptions};
use coz_core::driver::{install_signal_handlers, signal_received, DriveReport, StopReason};
use coz_core::exit_codes::ExitCode;
use coz_core::log_event;
use coz_core::logging::{
    event_names, generate_run_id, get_host_id, get_hostname, init_logging, LogConfig, LogContext,
    LogFormat, LogLevel, Stage,
};
use coz_core::rpc::protocol::PROTOCOL_VERSION;
use coz_core::service::ControlService;
use coz_core::{CancelToken, PollingDriver, ProfilingGuard, SessionRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Causal profiling client: attach, configure, profile, collect
#[derive(Parser)]
#[command(name = "cozctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (JSON)
    #[arg(long, global = true, env = "COZ_CONFIG")]
    config: Option<PathBuf>,

    /// Output format for command results on stdout
    #[arg(long, short = 'f', global = true, value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,

    /// Log format on stderr (human or jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to a process, profile it until interrupted, and save the profile
    Profile(ProfileArgs),

    /// List candidate processes on this host or on a remote one
    List(ListArgs),

    /// Run the control service so remote clients can profile local processes
    Serve(ServeArgs),

    /// Summarize a saved profile
    Show(ShowArgs),

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
struct ProfileArgs {
    /// Class (or file) containing the progress point
    #[arg(long, short = 'c')]
    class: String,

    /// Line number of the progress point
    #[arg(long, short = 'l')]
    line: u32,

    /// Process id to profile
    #[arg(long, short = 'p')]
    pid: u32,

    /// Package prefix eligible for virtual speedup
    #[arg(long, short = 's')]
    scope: String,

    /// Profile through the control service on HOST[:PORT]
    #[arg(long, short = 'H')]
    host: Option<String>,

    /// Continue appending to this saved profile
    #[arg(long, short = 'e')]
    existing_profile: Option<PathBuf>,

    /// Where to save the profile (default: the existing profile, or
    /// <host>-<pid>.coz)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Poll interval in milliseconds (default from config)
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// List processes behind the control service on HOST[:PORT]
    #[arg(long, short = 'H')]
    host: Option<String>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on (default 0.0.0.0:<default_port>)
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Saved profile
    path: PathBuf,
}

// ============================================================================
// Main entry point
// ============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::Clean
                }
                _ => ExitCode::ArgsError,
            };
            std::process::exit(code.as_i32());
        }
    };

    let cli_level = if cli.global.verbose > 0 || cli.global.quiet {
        Some(LogLevel::from_verbosity(cli.global.verbose, cli.global.quiet))
    } else {
        None
    };
    let log_config = LogConfig::from_env(cli_level, cli.global.log_format);
    init_logging(&log_config);

    let exit_code = match &cli.command {
        Commands::Profile(args) => run_profile(&cli.global, args),
        Commands::List(args) => run_list(&cli.global, args),
        Commands::Serve(args) => run_serve(&cli.global, args),
        Commands::Show(args) => run_show(&cli.global, args),
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Shared helpers
// ============================================================================

fn new_context() -> LogContext {
    LogContext::new(generate_run_id(), get_host_id())
}

fn load_client_config(global: &GlobalOpts, ctx: &LogContext) -> Result<ClientConfig, ExitCode> {
    let options = ConfigOptions {
        config_path: global.config.clone(),
    };
    match load_config(&options) {
        Ok(resolved) => {
            match &resolved.source {
                Some(path) => log_event!(
                    ctx,
                    DEBUG,
                    event_names::CONFIG_LOADED,
                    Stage::Init,
                    "Loaded config",
                    path = path.display().to_string()
                ),
                None => log_event!(
                    ctx,
                    DEBUG,
                    event_names::CONFIG_DEFAULT_USED,
                    Stage::Init,
                    "Using built-in config defaults"
                ),
            }
            Ok(resolved.config)
        }
        Err(e) => {
            log_event!(
                ctx,
                ERROR,
                event_names::CONFIG_ERROR,
                Stage::Init,
                "Failed to load config",
                error = e.to_string()
            );
            eprintln!("✗ Configuration Error");
            eprintln!("  Reason: {}", e);
            eprintln!("  Fix: Correct or remove the config file (see --config / COZ_CONFIG).");
            Err(ExitCode::ArgsError)
        }
    }
}

/// Print an error the way the output format asks and pick its exit code.
fn report_error(global: &GlobalOpts, err: &Error) -> ExitCode {
    match global.format {
        OutputFormat::Json => eprintln!("{}", StructuredError::from(err).to_json()),
        OutputFormat::Human => {
            eprintln!("✗ {}", err.headline());
            eprintln!("  Reason: {}", err);
            eprintln!("  Fix: {}", err.remediation());
        }
    }
    ExitCode::for_error(err)
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}

/// Default output file for a run: `<identity>-<pid>.coz`.
fn default_output(identity: &str, pid: ProcessId) -> PathBuf {
    let safe: String = identity
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    PathBuf::from(format!("{}-{}.coz", safe, pid))
}

// ============================================================================
// profile
// ============================================================================

fn run_profile(global: &GlobalOpts, args: &ProfileArgs) -> ExitCode {
    let ctx = new_context().with_pid(args.pid);
    log_event!(
        ctx,
        INFO,
        event_names::RUN_STARTED,
        Stage::Init,
        "Starting profile command"
    );

    let config = match load_client_config(global, &ctx) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if let Err(e) = install_signal_handlers() {
        tracing::warn!(error = %e, "could not install signal handlers; Ctrl-C will not drain");
    }
    let cancel = CancelToken::with_signals();

    let identity = args.host.clone().unwrap_or_else(get_hostname);
    let profile = match coz_profile::new_profile(&identity, args.existing_profile.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            let path = args.existing_profile.clone().unwrap_or_default();
            return report_error(global, &e.into_load_error(&path));
        }
    };
    if let Some(path) = &args.existing_profile {
        log_event!(
            ctx,
            INFO,
            event_names::PROFILE_LOADED,
            Stage::Init,
            "Continuing saved profile",
            path = path.display().to_string(),
            experiments = profile.len() as u64
        );
    }

    let pid = ProcessId(args.pid);
    let gateway = AttachGateway::new(
        &config,
        Box::new(PsEnumerator::new(config.enumeration_timeout())),
    );
    let registry = Arc::new(SessionRegistry::new());

    if let Err(e) = attach_and_start(&gateway, &registry, pid, args) {
        // Nothing is left running after a failed setup.
        let _ = registry.end_profiling(pid);
        registry.remove(pid);
        return report_error(global, &e);
    }

    let output = args
        .output
        .clone()
        .or_else(|| args.existing_profile.clone())
        .unwrap_or_else(|| default_output(&identity, pid));
    let cadence = args
        .interval_ms
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.poll_interval(args.host.is_some()));
    let driver = PollingDriver::new(cadence)
        .with_output(&output)
        .with_checkpoint(config.checkpoint);

    log_event!(
        ctx,
        INFO,
        event_names::PROFILE_STARTED,
        Stage::Poll,
        "Profiling; interrupt to stop",
        output = output.display().to_string(),
        cadence_ms = u64::try_from(cadence.as_millis()).unwrap_or(u64::MAX)
    );

    let mut guard = ProfilingGuard::new(registry, pid, profile, driver);
    let report = match guard.run(&cancel) {
        Ok(report) => report,
        Err(e) => return report_error(global, &e),
    };
    let summary = guard.profile().summary();
    drop(guard);

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "run_id": ctx.run_id,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "report": report,
            "summary": summary,
        })),
        OutputFormat::Human => print_report(&report, &summary),
    }

    log_event!(
        ctx,
        INFO,
        event_names::RUN_FINISHED,
        Stage::Drain,
        "Profile command finished",
        experiments = report.total_experiments as u64
    );
    exit_for_report(&report)
}

fn attach_and_start(
    gateway: &AttachGateway,
    registry: &SessionRegistry,
    pid: ProcessId,
    args: &ProfileArgs,
) -> Result<(), Error> {
    let session = gateway.attach(pid, args.host.as_deref())?;
    registry.register(session)?;
    registry.set_progress_point(pid, ProgressPoint::new(args.class.clone(), args.line))?;
    registry.set_scope(pid, Scope::new(args.scope.clone()))?;
    registry.start_profiling(pid)?;
    Ok(())
}

fn exit_for_report(report: &DriveReport) -> ExitCode {
    if report.persist_error.is_some() {
        return ExitCode::IoError;
    }
    match report.stop_reason {
        StopReason::Cancelled => ExitCode::Clean,
        StopReason::TargetLost => ExitCode::TargetLost,
        StopReason::FetchFailed => ExitCode::SessionError,
    }
}

fn print_report(report: &DriveReport, summary: &coz_profile::ProfileSummary) {
    println!("# Profiling Finished");
    println!("Process:     {}", report.pid);
    println!("Stopped:     {:?}", report.stop_reason);
    println!("Session:     {}", report.final_state);
    println!(
        "Merged:      {} experiments in {} batches ({} total)",
        report.experiments_merged, report.batches, report.total_experiments
    );
    if let Some(err) = &report.last_error {
        println!("Last error:  {}", err);
    }
    match (&report.persisted_to, &report.persist_error) {
        (Some(path), _) => println!("Saved:       {}", path.display()),
        (None, Some(err)) => println!("Save failed: {}", err),
        (None, None) => {}
    }
    print_speedups(summary);
}

fn print_speedups(summary: &coz_profile::ProfileSummary) {
    if summary.by_speedup.is_empty() {
        return;
    }
    println!();
    println!(
        "{:>8} {:>11} {:>12} {:>14}",
        "SPEEDUP", "EXPERIMENTS", "HITS", "HITS/SEC"
    );
    for row in &summary.by_speedup {
        println!(
            "{:>7}% {:>11} {:>12} {:>14.2}",
            row.speedup_percent, row.experiments, row.hits, row.hits_per_second
        );
    }
}

// ============================================================================
// list
// ============================================================================

fn run_list(global: &GlobalOpts, args: &ListArgs) -> ExitCode {
    let ctx = new_context();
    let config = match load_client_config(global, &ctx) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let gateway = AttachGateway::new(
        &config,
        Box::new(PsEnumerator::new(config.enumeration_timeout())),
    );
    let processes = match gateway.list_processes(args.host.as_deref()) {
        Ok(p) => p,
        Err(e) => return report_error(global, &e),
    };
    log_event!(
        ctx,
        DEBUG,
        event_names::RUN_FINISHED,
        Stage::Discover,
        "Listed processes",
        count = processes.len() as u64
    );

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "host": args.host.clone().unwrap_or_else(get_hostname),
            "processes": processes,
        })),
        OutputFormat::Human => {
            println!("{:<8} {:<10} COMMAND", "PID", "ATTACHABLE");
            for p in &processes {
                println!(
                    "{:<8} {:<10} {}",
                    p.process_id,
                    if p.attachable { "yes" } else { "no" },
                    p.display_name
                );
            }
        }
    }
    ExitCode::Clean
}

// ============================================================================
// serve
// ============================================================================

fn run_serve(global: &GlobalOpts, args: &ServeArgs) -> ExitCode {
    let ctx = new_context();
    let config = match load_client_config(global, &ctx) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if let Err(e) = install_signal_handlers() {
        tracing::warn!(error = %e, "could not install signal handlers");
    }

    let bind = args
        .bind
        .clone()
        .unwrap_or_else(|| format!("0.0.0.0:{}", config.default_port));
    let gateway = Arc::new(AttachGateway::new(
        &config,
        Box::new(PsEnumerator::new(config.enumeration_timeout())),
    ));
    let service = match ControlService::bind(&bind, gateway) {
        Ok(s) => s,
        Err(e) => {
            log_event!(
                ctx,
                ERROR,
                event_names::INTERNAL_ERROR,
                Stage::Serve,
                "Failed to bind control service",
                bind = bind.as_str(),
                error = e.to_string()
            );
            eprintln!("✗ Cannot Listen");
            eprintln!("  Reason: {}: {}", bind, e);
            eprintln!("  Fix: Choose a free address with --bind.");
            return ExitCode::IoError;
        }
    };

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "listening": service.local_addr().to_string(),
            "protocol_version": PROTOCOL_VERSION,
        })),
        OutputFormat::Human => println!("Listening on {}", service.local_addr()),
    }

    service.serve_until(signal_received);
    ExitCode::Clean
}

// ============================================================================
// show
// ============================================================================

fn run_show(global: &GlobalOpts, args: &ShowArgs) -> ExitCode {
    let profile = match coz_profile::load(&args.path) {
        Ok(p) => p,
        Err(e) => return report_error(global, &e.into_load_error(&args.path)),
    };
    let summary = profile.summary();
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "path": args.path,
            "schema_version": coz_profile::PROFILE_SCHEMA_VERSION,
            "summary": summary,
        })),
        OutputFormat::Human => print_summary(&args.path, &summary),
    }
    ExitCode::Clean
}

fn print_summary(path: &Path, summary: &coz_profile::ProfileSummary) {
    println!("# Profile {}", path.display());
    println!("Source:      {}", summary.source_identity);
    println!("Created:     {}", summary.created_at.to_rfc3339());
    println!("Experiments: {}", summary.experiments);
    println!("Total hits:  {}", summary.total_hits);
    print_speedups(summary);
}

// ============================================================================
// version
// ============================================================================

fn print_version(global: &GlobalOpts) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "protocol_version": PROTOCOL_VERSION,
            "profile_schema_version": coz_profile::PROFILE_SCHEMA_VERSION,
        })),
        OutputFormat::Human => {
            println!("cozctl {}", env!("CARGO_PKG_VERSION"));
            println!("protocol {}", PROTOCOL_VERSION);
            println!("profile schema {}", coz_profile::PROFILE_SCHEMA_VERSION);
        }
    }
}
