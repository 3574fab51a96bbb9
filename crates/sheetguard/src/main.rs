use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sheetguard_core::aggregate::AuditReport;
use sheetguard_core::config::{Config, CONFIG_FILE_NAME};
use sheetguard_core::pipeline::{AuditPipeline, FullAudit};
use sheetguard_core::types::Severity;

use sheetguard_report::{dot, html, json, markdown, text};

#[derive(Parser)]
#[command(name = "sheetguard")]
#[command(about = "Audit the structural health of spreadsheet models")]
#[command(version)]
struct Cli {
    /// Log analysis progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Markdown,
    Html,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit a workbook (or every workbook in a directory) and print a report
    Analyze {
        /// Workbook file or directory
        path: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Single-line JSON
        #[arg(long)]
        compact: bool,
        /// Config file path (defaults to the nearest .sheetguard.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Audit and exit with code 0 (pass) or 1 (fail)
    Check {
        /// Workbook file or directory
        path: PathBuf,
        /// Minimum severity to cause failure (defaults to rules.fail_on)
        #[arg(long)]
        fail_on: Option<String>,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Single-line JSON
        #[arg(long)]
        compact: bool,
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Export the dependency graph as GraphViz DOT
    Graph {
        /// Workbook file
        path: PathBuf,
        /// Summarize references between sheets instead of cells
        #[arg(long)]
        sheets: bool,
        /// Write the diagram to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Create a default .sheetguard.toml configuration file
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Analyze {
            path,
            format,
            output,
            compact,
            config,
        } => cmd_analyze(&path, format, output.as_deref(), compact, config.as_deref()),
        Commands::Check {
            path,
            fail_on,
            format,
            compact,
            config,
        } => cmd_check(&path, fail_on.as_deref(), format, compact, config.as_deref()),
        Commands::Graph {
            path,
            sheets,
            output,
            config,
        } => cmd_graph(&path, sheets, output.as_deref(), config.as_deref()),
        Commands::Init { force } => cmd_init(force),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(2);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,sheetguard=debug,sheetguard_core=debug,sheetguard_reader=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn cmd_analyze(
    path: &Path,
    format: OutputFormat,
    output: Option<&Path>,
    compact: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(path, config_path)?;
    let reports = run_audits(path, config)?;
    if output.is_some() {
        colored::control::set_override(false);
    }

    let rendered = match format {
        OutputFormat::Text => reports.iter().map(text::format_report).collect::<String>(),
        OutputFormat::Markdown => reports
            .iter()
            .map(markdown::format_report)
            .collect::<Vec<_>>()
            .join("\n---\n\n"),
        OutputFormat::Html => {
            let generated = chrono::Local::now();
            reports
                .iter()
                .map(|r| html::format_report(r, generated))
                .collect::<String>()
        }
        OutputFormat::Json => match reports.as_slice() {
            [single] => json::format_report(single, compact),
            many => json::format_reports(many, compact),
        },
    };

    emit(&rendered, output)
}

fn cmd_check(
    path: &Path,
    fail_on: Option<&str>,
    format: OutputFormat,
    compact: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = load_config(path, config_path)?;
    let fail_on: Severity = match fail_on {
        Some(s) => s.parse()?,
        None => config.rules.fail_on,
    };
    let reports = run_audits(path, config)?;

    let (out, passed) = match format {
        OutputFormat::Json => match reports.as_slice() {
            [single] => json::format_check(single, fail_on, compact),
            many => json::format_checks(many, fail_on, compact),
        },
        OutputFormat::Markdown => combine(&reports, |r| markdown::format_check(r, fail_on)),
        OutputFormat::Text | OutputFormat::Html => {
            combine(&reports, |r| text::format_check(r, fail_on))
        }
    };
    print!("{out}");
    if format == OutputFormat::Json {
        println!();
    }
    if !passed {
        process::exit(1);
    }
    Ok(())
}

fn combine(
    reports: &[AuditReport],
    check: impl Fn(&AuditReport) -> (String, bool),
) -> (String, bool) {
    let mut out = String::new();
    let mut passed = true;
    for report in reports {
        let (text, ok) = check(report);
        out.push_str(&text);
        passed &= ok;
    }
    (out, passed)
}

fn cmd_graph(
    path: &Path,
    sheets: bool,
    output: Option<&Path>,
    config_path: Option<&Path>,
) -> Result<()> {
    if !path.is_file() {
        bail!("graph export needs a single workbook file: {}", path.display());
    }
    let config = load_config(path, config_path)?;
    let pipeline = AuditPipeline::new(sheetguard_reader::readers(), config);
    let FullAudit { graph, cycles, .. } = pipeline.analyze(path)?;
    let diagram = if sheets {
        dot::generate_sheet_flow(&graph)
    } else {
        dot::generate_dependency_diagram(&graph, &cycles)
    };
    emit(&diagram, output)
}

fn cmd_init(force: bool) -> Result<()> {
    let target = PathBuf::from(CONFIG_FILE_NAME);
    if target.exists() && !force {
        bail!("{CONFIG_FILE_NAME} already exists. Use --force to overwrite.");
    }
    std::fs::write(&target, Config::default_toml())
        .with_context(|| format!("failed to write {CONFIG_FILE_NAME}"))?;
    println!("Created {CONFIG_FILE_NAME} with default configuration.");
    Ok(())
}

fn load_config(path: &Path, config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(p) => Config::load(p),
        None => {
            let dir = if path.is_dir() {
                path
            } else {
                path.parent().unwrap_or(Path::new("."))
            };
            Ok(Config::load_or_default(dir))
        }
    }
}

fn run_audits(path: &Path, config: Config) -> Result<Vec<AuditReport>> {
    let pipeline = AuditPipeline::new(sheetguard_reader::readers(), config);
    let workbooks = pipeline.discover(path)?;
    if workbooks.is_empty() {
        bail!("no supported workbooks found under {}", path.display());
    }
    debug!(count = workbooks.len(), root = %path.display(), "auditing workbooks");
    workbooks
        .iter()
        .map(|workbook| pipeline.analyze(workbook).map(|full| full.report))
        .collect()
}

fn emit(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(file) => std::fs::write(file, content)
            .with_context(|| format!("failed to write {}", file.display())),
        None => {
            print!("{content}");
            Ok(())
        }
    }
}
