//! `cohort run` / `cohort validate`: config-driven grouping.

use std::io;
use std::path::{Path, PathBuf};

use clap::Args;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use cohort_grouping::report::{render_report, write_report};
use cohort_grouping::sink::persist_groups;
use cohort_grouping::source::{CsvUserSource, UserFilter, UserSource};
use cohort_grouping::{Classification, Classifier, PipelineConfig, User};

use crate::exit_codes::{
    EXIT_INVALID_CONFIG, EXIT_PERSIST, EXIT_RUNTIME, EXIT_UNGROUPED, EXIT_USAGE,
};
use crate::store::SqliteSink;
use crate::{prompt, CliError};

const SAVE_QUESTION: &str = "Would you like to use these groups?";

#[derive(Args)]
pub struct RunArgs {
    /// Path to the .pipeline.toml config file
    pub config: PathBuf,

    /// Users CSV (overrides [users].file; resolved from the working directory)
    #[arg(long)]
    pub users: Option<PathBuf>,

    /// Shuffle seed (overrides the config's seed)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the text report to a file instead of stdout
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Output JSON to stdout instead of the text report
    #[arg(long)]
    pub json: bool,

    /// Write JSON output to file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Save the groups to a SQLite database
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// Save without asking for confirmation
    #[arg(long, requires = "save")]
    pub yes: bool,

    /// Exit with code 3 if any user is left ungrouped
    #[arg(long)]
    pub strict: bool,

    /// Log level: off, error, warn, info, debug, trace
    #[arg(long, env = "COHORT_LOG", value_parser = parse_level)]
    pub log_level: Option<LevelFilter>,
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse()
        .map_err(|_| format!("unknown log level '{s}' (expected off, error, warn, info, debug, trace)"))
}

/// `--log-level` (or `COHORT_LOG`) wins, then the config's `log_level`,
/// then warn.
fn resolve_level(flag: Option<LevelFilter>, config_level: Option<&str>) -> LevelFilter {
    flag.or_else(|| config_level.and_then(|l| parse_level(l).ok()))
        .unwrap_or(LevelFilter::WARN)
}

/// Engine `log` records reach the subscriber through its `tracing-log`
/// bridge.
fn init_logging(level: LevelFilter) {
    fmt()
        .with_env_filter(EnvFilter::new(level.to_string()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

fn load_config(path: &Path) -> Result<PipelineConfig, CliError> {
    let config_str = std::fs::read_to_string(path)
        .map_err(|e| run_err(EXIT_RUNTIME, format!("cannot read config: {e}")))?;
    PipelineConfig::from_toml(&config_str).map_err(|e| run_err(EXIT_INVALID_CONFIG, e.to_string()))
}

/// Users come from `--users` when given, else from `[users].file` relative
/// to the config's directory. The config's id column and filter apply
/// either way.
fn load_users(
    config: &PipelineConfig,
    config_path: &Path,
    users_override: Option<&Path>,
) -> Result<Vec<User>, CliError> {
    let (path, id_column, filter) = match (users_override, &config.users) {
        (Some(path), Some(users)) => (path.to_path_buf(), users.id_column.clone(), users.to_filter()),
        (Some(path), None) => (path.to_path_buf(), "id".to_string(), UserFilter::default()),
        (None, Some(users)) => {
            let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
            (base_dir.join(&users.file), users.id_column.clone(), users.to_filter())
        }
        (None, None) => {
            return Err(run_err(EXIT_USAGE, "no user source")
                .with_hint("add a [users] table with `file`, or pass --users FILE"));
        }
    };

    let source = CsvUserSource::from_path(&path, id_column)
        .map_err(|e| run_err(EXIT_RUNTIME, e.to_string()))?;
    let users = source
        .load(&filter)
        .map_err(|e| run_err(EXIT_RUNTIME, format!("{}: {e}", path.display())))?;
    info!("Loaded {} users from {}", users.len(), path.display());
    Ok(users)
}

pub fn cmd_run(args: RunArgs) -> Result<(), CliError> {
    let config = load_config(&args.config)?;
    init_logging(resolve_level(args.log_level, config.log_level.as_deref()));

    for name in config.unresolved_steps() {
        warn!("pipeline step '{name}' names no strategy and will be skipped");
    }

    let users = load_users(&config, &args.config, args.users.as_deref())?;
    if users.is_empty() {
        warn!("no users to group");
    }

    let steps = config.steps();
    let classifier = match args.seed.or(config.seed) {
        Some(seed) => Classifier::seeded(steps, seed),
        None => Classifier::new(steps),
    };
    let mut classifier = classifier
        .with_users(users)
        .with_summary_attribute(config.report.attribute.clone());
    let result = classifier.classify();

    write_outputs(&config, &args, &result)?;
    print_summary(&config, &result);

    if let Some(ref db_path) = args.save {
        save_groups(db_path, &result, args.yes)?;
    }

    if args.strict && result.summary.ungrouped_users > 0 {
        return Err(run_err(
            EXIT_UNGROUPED,
            format!("{} users left ungrouped", result.summary.ungrouped_users),
        ));
    }

    Ok(())
}

fn write_outputs(config: &PipelineConfig, args: &RunArgs, result: &Classification) -> Result<(), CliError> {
    if args.json || args.output.is_some() {
        let json_str = serde_json::to_string_pretty(result)
            .map_err(|e| run_err(EXIT_RUNTIME, format!("JSON serialization error: {e}")))?;

        if let Some(ref path) = args.output {
            std::fs::write(path, &json_str)
                .map_err(|e| run_err(EXIT_RUNTIME, format!("cannot write output: {e}")))?;
            eprintln!("wrote {}", path.display());
        }
        if args.json {
            println!("{json_str}");
        }
    }

    let options = config.report.to_options();
    if let Some(ref path) = args.report {
        write_report(path, &result.groups, &result.summary, &options)
            .map_err(|e| run_err(EXIT_RUNTIME, e.to_string()))?;
        eprintln!("wrote {}", path.display());
    } else if !args.json {
        print!("{}", render_report(&result.groups, &result.summary, &options));
    }

    Ok(())
}

fn print_summary(config: &PipelineConfig, result: &Classification) {
    let s = &result.summary;
    eprintln!(
        "{}: {} of {} users grouped into {} groups ({} empty), {} ungrouped",
        config.name,
        s.grouped_users,
        s.total_users,
        s.total_groups,
        s.empty_groups,
        s.ungrouped_users,
    );
}

fn save_groups(db_path: &Path, result: &Classification, assume_yes: bool) -> Result<(), CliError> {
    if !assume_yes {
        let stdin = io::stdin();
        let confirmed = prompt::confirm(SAVE_QUESTION, &mut stdin.lock(), &mut io::stderr())
            .map_err(|e| run_err(EXIT_RUNTIME, format!("cannot read confirmation: {e}")))?;
        if !confirmed {
            eprintln!("groups not saved");
            return Ok(());
        }
    }

    let mut sink = SqliteSink::open(db_path)
        .map_err(|e| run_err(EXIT_PERSIST, e.to_string()))?;
    let saved = persist_groups(&result.groups, &mut sink)
        .map_err(|e| run_err(EXIT_PERSIST, e.to_string()))?;
    eprintln!("saved {saved} groups to {}", db_path.display());
    Ok(())
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;

    let unresolved = config.unresolved_steps();
    for name in &unresolved {
        eprintln!("warning: pipeline step '{name}' names no strategy");
    }

    eprintln!(
        "{}: valid ({} steps, {} strategies{})",
        config.name,
        config.pipeline.len(),
        config.strategies.len(),
        if unresolved.is_empty() {
            String::new()
        } else {
            format!(", {} unresolved", unresolved.len())
        },
    );
    Ok(())
}
