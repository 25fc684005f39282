use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use dw_etl::{
    export_warehouse, read_watermarks, run_from_config, BoundaryPolicy, EtlConfig, FileRunLog,
    LoadMode, RunLog, TracingRunLog, Warehouse,
};

#[derive(Parser)]
#[command(
    name = "dw-etl",
    version,
    about = "Load the sales workbook into the star-schema warehouse."
)]
struct Cli {
    /// JSON config file (source_dir, warehouse_path, run_log_path, boundary_policy)
    #[arg(long, env = "DW_CONFIG")]
    config: Option<PathBuf>,

    /// Directory with Transacciones.csv, Clientes.csv, Productos.csv, Gastos.csv
    #[arg(long, env = "DW_SOURCE_DIR")]
    source_dir: Option<PathBuf>,

    /// SQLite warehouse file
    #[arg(long, env = "DW_WAREHOUSE")]
    warehouse: Option<PathBuf>,

    /// Append-only run log file
    #[arg(long, env = "DW_RUN_LOG")]
    run_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the warehouse schema
    Init,
    /// Populate DimTiempo with every day in a range
    SeedCalendar {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Run a load
    Load {
        #[arg(long, value_enum, default_value_t = ModeArg::Incremental)]
        mode: ModeArg,
        /// Override the configured handling of rows dated on the watermark
        #[arg(long, value_enum)]
        boundary: Option<BoundaryArg>,
    },
    /// Write the warehouse back out as workbook sheets
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Table counts, watermarks and recent runs
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Full,
    Incremental,
}

impl From<ModeArg> for LoadMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Full => LoadMode::Full,
            ModeArg::Incremental => LoadMode::Incremental,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BoundaryArg {
    Strict,
    Reconcile,
}

impl From<BoundaryArg> for BoundaryPolicy {
    fn from(arg: BoundaryArg) -> Self {
        match arg {
            BoundaryArg::Strict => BoundaryPolicy::Strict,
            BoundaryArg::Reconcile => BoundaryPolicy::Reconcile,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = resolve_config(&cli)?;

    match cli.command {
        Command::Init => {
            let wh = open_warehouse(&config)?;
            wh.close()?;
            println!("✓ Warehouse schema ready at {}", config.warehouse_path.display());
        }
        Command::SeedCalendar { from, to } => {
            let mut wh = open_warehouse(&config)?;
            let added = wh
                .seed_calendar(from, to)
                .with_context(|| format!("failed to seed DimTiempo {from}..{to}"))?;
            wh.close()?;
            println!("✓ DimTiempo: {added} new dates ({from} to {to})");
        }
        Command::Load { mode, boundary } => {
            if let Some(boundary) = boundary {
                config.boundary_policy = boundary.into();
            }
            let log = run_log(&config)?;
            let report = run_from_config(&config, mode.into(), log.as_ref())
                .with_context(|| format!("{} load failed", LoadMode::from(mode)))?;

            println!("✓ {}", report.summary());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Export { out } => {
            let wh = open_warehouse(&config)?;
            let counts = export_warehouse(&wh, &out)
                .with_context(|| format!("failed to export to {}", out.display()))?;
            wh.close()?;
            println!(
                "✓ Exported {} transactions, {} customers, {} products, {} expenses to {}",
                counts.transactions,
                counts.customers,
                counts.products,
                counts.expenses,
                out.display()
            );
        }
        Command::Status => {
            let wh = open_warehouse(&config)?;
            let counts = wh.table_counts()?;
            let marks = read_watermarks(wh.conn())?;

            println!("📊 {}", config.warehouse_path.display());
            println!("   DimTiempo   {:>8}", counts.dim_tiempo);
            println!("   DimCliente  {:>8}", counts.dim_cliente);
            println!("   DimProducto {:>8}", counts.dim_producto);
            println!("   FactVentas  {:>8}  watermark {}", counts.fact_ventas, marks.sales);
            println!("   FactGastos  {:>8}  watermark {}", counts.fact_gastos, marks.expenses);

            let runs = wh.recent_runs(5)?;
            if !runs.is_empty() {
                println!("\n   Recent runs:");
                for r in runs {
                    println!(
                        "   {}  {:<11} {:<9} {}",
                        r.started_at.format("%Y-%m-%d %H:%M:%S"),
                        r.mode,
                        r.status,
                        r.run_id
                    );
                }
            }
            wh.close()?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Config file (if any), then CLI/env overrides.
fn resolve_config(cli: &Cli) -> Result<EtlConfig> {
    let mut config = match &cli.config {
        Some(path) => EtlConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EtlConfig::new("data", "warehouse.sqlite"),
    };

    if let Some(dir) = &cli.source_dir {
        config.source_dir = dir.clone();
    }
    if let Some(path) = &cli.warehouse {
        config.warehouse_path = path.clone();
    }
    if let Some(path) = &cli.run_log {
        config.run_log_path = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

fn open_warehouse(config: &EtlConfig) -> Result<Warehouse> {
    Warehouse::open(&config.warehouse_path)
        .with_context(|| format!("failed to open warehouse {}", config.warehouse_path.display()))
}

fn run_log(config: &EtlConfig) -> Result<Box<dyn RunLog>> {
    match &config.run_log_path {
        Some(path) => {
            let file = FileRunLog::open(path)
                .with_context(|| format!("failed to open run log {}", path.display()))?;
            Ok(Box::new((TracingRunLog, file)))
        }
        None => Ok(Box::new(TracingRunLog)),
    }
}
