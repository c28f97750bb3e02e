use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use po_validator::logging::{init_logging, LoggingConfig};
use po_validator::report::{print_result, print_summary, save_csv_report, save_json_report};
use po_validator::{PoValidator, ValidationResult, ValidatorConfig, WorkItem};

#[derive(Parser)]
#[command(name = "po-validate")]
#[command(about = "Validate purchase order PDFs against service-order work items")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write daily log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Write the log files as JSON lines
    #[arg(long, global = true, requires = "log_dir")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate POs and write their annotated copies
    Validate {
        /// PO PDF files
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,

        /// JSON array of work items for the service order
        #[arg(short, long)]
        work_items: PathBuf,

        /// Service order id recorded in the result
        #[arg(short, long)]
        service_order: Option<i64>,

        /// Directory for the annotated PDF (defaults to the PDF's directory)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Append the result to this JSON report
        #[arg(long)]
        json_report: Option<PathBuf>,

        /// Append the result to this CSV report
        #[arg(long)]
        csv_report: Option<PathBuf>,
    },
    /// Print the extracted PO data as JSON
    Extract {
        /// PO PDF file
        pdf: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guard = init_logging(&logging_config(&cli))?;

    match cli.command {
        Commands::Validate {
            pdfs,
            work_items,
            service_order,
            out_dir,
            config,
            json_report,
            csv_report,
        } => {
            let mut config = load_config(config.as_deref())?;
            if json_report.is_some() {
                config.reporting.json_report = json_report;
            }
            if csv_report.is_some() {
                config.reporting.csv_report = csv_report;
            }
            validate_command(&pdfs, &work_items, service_order, out_dir.as_deref(), &config)
        }
        Commands::Extract { pdf, config } => {
            let config = load_config(config.as_deref())?;
            extract_command(&pdf, &config)
        }
    }
}

fn logging_config(cli: &Cli) -> LoggingConfig {
    LoggingConfig {
        level: cli.log_level.clone(),
        enable_file_logging: cli.log_dir.is_some(),
        log_dir: cli.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs")),
        enable_json_format: cli.log_json,
    }
}

/// File config when given, environment overrides on top of defaults otherwise.
fn load_config(path: Option<&Path>) -> Result<ValidatorConfig> {
    match path {
        Some(path) => {
            let mut config = ValidatorConfig::load_from_file(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Ok(ValidatorConfig::load_from_env()),
    }
}

fn read_work_items(path: &Path) -> Result<Vec<WorkItem>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading work items {:?}", path))?;
    let items: Vec<WorkItem> =
        serde_json::from_str(&content).with_context(|| format!("parsing work items {:?}", path))?;
    Ok(items)
}

fn validate_command(
    pdf_paths: &[PathBuf],
    work_items_path: &Path,
    service_order: Option<i64>,
    out_dir: Option<&Path>,
    config: &ValidatorConfig,
) -> Result<()> {
    let work_items = read_work_items(work_items_path)?;
    let validator = PoValidator::new(config)?;

    let mut results = Vec::with_capacity(pdf_paths.len());
    for pdf_path in pdf_paths {
        match validate_one(&validator, pdf_path, &work_items, service_order, out_dir) {
            Ok(result) => results.push(result),
            Err(e) => error!("❌ {:?}: {:#}", pdf_path, e),
        }
    }

    if results.is_empty() {
        return Err(anyhow!("No PO could be validated"));
    }
    if pdf_paths.len() > 1 {
        print_summary(&results);
    }

    if let Some(path) = &config.reporting.json_report {
        save_json_report(&results, path)?;
    }
    if let Some(path) = &config.reporting.csv_report {
        save_csv_report(&results, path)?;
    }

    Ok(())
}

fn validate_one(
    validator: &PoValidator,
    pdf_path: &Path,
    work_items: &[WorkItem],
    service_order: Option<i64>,
    out_dir: Option<&Path>,
) -> Result<ValidationResult> {
    info!("🔍 Validating PO: {:?}", pdf_path);
    if !pdf_path.exists() {
        return Err(anyhow!("PDF file not found: {:?}", pdf_path));
    }

    let pdf_bytes = std::fs::read(pdf_path)?;
    let document_name = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let (result, annotated) = validator.validate_and_annotate(&pdf_bytes, work_items, &document_name, service_order);

    print_result(&result);

    match annotated {
        Ok(Some(pdf)) => {
            let dir = out_dir
                .map(Path::to_path_buf)
                .or_else(|| pdf_path.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir)?;
            let output_path = dir.join(&pdf.filename);
            std::fs::write(&output_path, &pdf.bytes)?;
            info!("📝 Annotated PDF saved to: {:?}", output_path);
        }
        Ok(None) => info!("No annotated copy for {} ({})", document_name, result.status),
        Err(e) => warn!("⚠️ {}", e.user_message()),
    }

    Ok(result)
}

fn extract_command(pdf_path: &Path, config: &ValidatorConfig) -> Result<()> {
    info!("🔍 Extracting PO: {:?}", pdf_path);
    if !pdf_path.exists() {
        return Err(anyhow!("PDF file not found: {:?}", pdf_path));
    }

    let pdf_bytes = std::fs::read(pdf_path)?;
    let validator = PoValidator::new(config)?;
    let extraction = validator.extract(&pdf_bytes);

    println!("{}", serde_json::to_string_pretty(&extraction)?);
    Ok(())
}
