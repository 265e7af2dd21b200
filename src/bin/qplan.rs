//! Renders serialized query-plan snapshots.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use qplan::{ExplainConfig, ExplainFlags, ExplainFormat, QueryPlan};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "qplan",
    version,
    about = "Render EXPLAIN / ANALYZE output from saved query plans",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "QPLAN_CONFIG",
        value_name = "PATH",
        help = "Config file (defaults to <config_dir>/qplan/config.toml)"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the plan in tabular or JSON form.
    Render(RenderCmd),
    /// Print the plan digest.
    Digest {
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RenderCmd {
    #[arg(value_name = "SNAPSHOT")]
    snapshot: PathBuf,

    #[arg(long, value_enum, help = "Output format (overrides config)")]
    format: Option<OutputFormat>,

    #[arg(long, help = "Include runtime counters")]
    analyze: bool,

    #[arg(long, help = "Show the filtered column")]
    extended: bool,

    #[arg(long, help = "Show the partitions column")]
    partitions: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Tabular,
    Json,
}

impl From<OutputFormat> for ExplainFormat {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Tabular => ExplainFormat::Tabular,
            OutputFormat::Json => ExplainFormat::Json,
        }
    }
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = ExplainConfig::load(cli.config.as_deref())?;
    debug!(?config, "loaded configuration");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::Render(cmd) => {
            let plan = load_snapshot(&cmd.snapshot)?;
            let format = cmd.format.map(ExplainFormat::from).unwrap_or(config.format);
            let flags = ExplainFlags {
                extended: cmd.extended || config.extended,
                partitions: cmd.partitions || config.partitions,
            };
            let is_analyze = cmd.analyze || config.analyze;
            match format {
                ExplainFormat::Tabular => {
                    out.write_all(plan.render_to_string(flags, is_analyze)?.as_bytes())?;
                }
                ExplainFormat::Json if config.json_pretty => {
                    plan.render_json(&mut out, is_analyze)?;
                }
                ExplainFormat::Json => {
                    serde_json::to_writer(&mut out, &plan.render_json_value(is_analyze)?)?;
                    writeln!(out)?;
                }
            }
        }
        Command::Digest { snapshot } => {
            let plan = load_snapshot(&snapshot)?;
            writeln!(out, "{:016x}", plan.plan_digest()?)?;
        }
    }
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<QueryPlan, Box<dyn Error>> {
    let text = fs::read_to_string(path)
        .map_err(|err| format!("failed to read snapshot {}: {err}", path.display()))?;
    let plan: QueryPlan = serde_json::from_str(&text)
        .map_err(|err| format!("failed to parse snapshot {}: {err}", path.display()))?;
    if !plan.has_plan() {
        return Err(format!("snapshot {} contains no query plan", path.display()).into());
    }
    Ok(plan)
}
