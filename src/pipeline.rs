// Load orchestration - full reload and incremental runs
//
// Incremental: transform -> watermarks -> filter -> upsert dimensions -> append facts
// Full:        transform -> clear (facts, then dimensions) -> insert dimensions -> append facts
//
// Every arrow after the watermark read is its own committed step. A failure
// aborts the run and leaves earlier steps in place; re-running is safe because
// dimensions are upserted and facts are filtered by watermark.

use crate::config::{EtlConfig, LoadMode};
use crate::db::{RunRecord, RunStatus, Warehouse};
use crate::error::Result;
use crate::facts::{load_expenses, load_sales, loaded_expense_ids, loaded_sale_keys};
use crate::incremental::{partition, subtract_loaded, BoundaryPolicy, Partition};
use crate::model::{Dated, ExpenseRow, FactStream, TransactionRow};
use crate::reconciliation::{insert_dimension, reconcile_dimension, UpsertStats};
use crate::runlog::RunLog;
use crate::source::{load_source, SourceData};
use crate::transform::{transform, TransformReport, Transformed};
use crate::watermark::{read_watermarks, Watermark, Watermarks};
use serde::Serialize;

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub stream: FactStream,
    pub watermark: Option<Watermark>,
    /// Rows past the watermark (all rows in full mode)
    pub selected: usize,
    /// Rows dated on the watermark that were loaded under `Reconcile`
    pub boundary_loaded: usize,
    /// Rows dated on the watermark that were skipped
    pub boundary_skipped: usize,
    pub already_loaded: usize,
    pub inserted: usize,
}

impl StreamReport {
    fn new(stream: FactStream) -> Self {
        StreamReport {
            stream,
            watermark: None,
            selected: 0,
            boundary_loaded: 0,
            boundary_skipped: 0,
            already_loaded: 0,
            inserted: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: LoadMode,
    pub boundary_policy: BoundaryPolicy,
    pub source_rows: usize,
    pub transform: TransformReport,
    pub cleared_rows: usize,
    pub customers: UpsertStats,
    pub products: UpsertStats,
    pub sales: StreamReport,
    pub expenses: StreamReport,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{} load: {} customers, {} products, {} sales, {} expenses inserted ({} incomplete rows dropped)",
            self.mode,
            self.customers.total(),
            self.products.total(),
            self.sales.inserted,
            self.expenses.inserted,
            self.transform.dropped()
        )
    }
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Open the warehouse and source named by `config` and run one load.
pub fn run_from_config(config: &EtlConfig, mode: LoadMode, log: &dyn RunLog) -> Result<RunReport> {
    config.validate()?;
    let mut wh = Warehouse::open(&config.warehouse_path)?;
    log.record(
        "extract.start",
        &[("source_dir", &config.source_dir.display())],
    );
    let source = load_source(&config.source_dir)?;
    let report = run(&mut wh, &source, mode, config.boundary_policy, log)?;
    wh.close()?;
    Ok(report)
}

/// Run one load against an open session, recording it in `etl_runs`.
pub fn run(
    wh: &mut Warehouse,
    source: &SourceData,
    mode: LoadMode,
    policy: BoundaryPolicy,
    log: &dyn RunLog,
) -> Result<RunReport> {
    let record = RunRecord::new(mode.as_str(), &source.fingerprint);
    wh.begin_run(&record)?;
    log.record(
        "load.start",
        &[("mode", &mode), ("run_id", &record.run_id)],
    );

    let result = match mode {
        LoadMode::Full => run_full_reload(wh, source, &record.run_id, log),
        LoadMode::Incremental => run_incremental(wh, source, &record.run_id, policy, log),
    };

    match result {
        Ok(report) => {
            let summary = serde_json::to_value(&report)?;
            wh.finish_run(&record.run_id, RunStatus::Succeeded, Some(&summary), None)?;
            log.record("load.finish", &[("summary", &report.summary())]);
            Ok(report)
        }
        Err(err) => {
            let message = err.to_string();
            if let Err(audit_err) =
                wh.finish_run(&record.run_id, RunStatus::Failed, None, Some(&message))
            {
                tracing::warn!("could not mark run {} failed: {audit_err}", record.run_id);
            }
            log.record("load.failed", &[("error", &message)]);
            Err(err)
        }
    }
}

// ============================================================================
// STAGES
// ============================================================================

fn run_transform(source: &SourceData, log: &dyn RunLog) -> Transformed {
    log.record("extract.done", &[("rows", &source.row_count())]);

    let transformed = transform(source);
    let r = &transformed.report;
    log.record(
        "transform.done",
        &[
            ("transactions", &r.transactions.kept),
            ("customers", &r.customers.kept),
            ("products", &r.products.kept),
            ("expenses", &r.expenses.kept),
            ("dropped", &r.dropped()),
        ],
    );
    transformed
}

fn empty_report(
    run_id: &str,
    mode: LoadMode,
    policy: BoundaryPolicy,
    source: &SourceData,
    transform: TransformReport,
) -> RunReport {
    RunReport {
        run_id: run_id.to_string(),
        mode,
        boundary_policy: policy,
        source_rows: source.row_count(),
        transform,
        cleared_rows: 0,
        customers: UpsertStats::default(),
        products: UpsertStats::default(),
        sales: StreamReport::new(FactStream::Sales),
        expenses: StreamReport::new(FactStream::Expenses),
    }
}

pub fn run_full_reload(
    wh: &mut Warehouse,
    source: &SourceData,
    run_id: &str,
    log: &dyn RunLog,
) -> Result<RunReport> {
    // Transform before clearing so a broken source never empties the warehouse
    let data = run_transform(source, log);
    let mut report = empty_report(run_id, LoadMode::Full, BoundaryPolicy::Strict, source, data.report);

    report.cleared_rows = wh.clear_for_reload()?;
    log.record("clear.done", &[("rows", &report.cleared_rows)]);

    let customers = wh.step(|conn| insert_dimension(conn, &data.customers))?;
    report.customers.inserted = customers;
    log.record("dimension.loaded", &[("table", &"DimCliente"), ("inserted", &customers)]);

    let products = wh.step(|conn| insert_dimension(conn, &data.products))?;
    report.products.inserted = products;
    log.record("dimension.loaded", &[("table", &"DimProducto"), ("inserted", &products)]);

    report.sales.selected = data.transactions.len();
    report.sales.inserted = wh.step(|conn| load_sales(conn, &data.transactions))?;
    log.record(
        "facts.loaded",
        &[("stream", &FactStream::Sales), ("inserted", &report.sales.inserted)],
    );

    report.expenses.selected = data.expenses.len();
    report.expenses.inserted = wh.step(|conn| load_expenses(conn, &data.expenses))?;
    log.record(
        "facts.loaded",
        &[("stream", &FactStream::Expenses), ("inserted", &report.expenses.inserted)],
    );

    Ok(report)
}

pub fn run_incremental(
    wh: &mut Warehouse,
    source: &SourceData,
    run_id: &str,
    policy: BoundaryPolicy,
    log: &dyn RunLog,
) -> Result<RunReport> {
    let data = run_transform(source, log);
    let mut report = empty_report(run_id, LoadMode::Incremental, policy, source, data.report);

    let marks: Watermarks = read_watermarks(wh.conn())?;
    for (stream, mark) in [(FactStream::Sales, marks.sales), (FactStream::Expenses, marks.expenses)] {
        log.record("watermark.read", &[("stream", &stream), ("watermark", &mark)]);
    }
    report.sales.watermark = Some(marks.sales);
    report.expenses.watermark = Some(marks.expenses);

    // Filter each stream against its own watermark
    let sales = partition(data.transactions, marks.sales);
    let sales = settle_boundary(
        sales,
        marks.sales,
        policy,
        &mut report.sales,
        |date| loaded_sale_keys(wh.conn(), date),
        TransactionRow::boundary_key,
    )?;

    let expenses = partition(data.expenses, marks.expenses);
    let expenses = settle_boundary(
        expenses,
        marks.expenses,
        policy,
        &mut report.expenses,
        |date| loaded_expense_ids(wh.conn(), date),
        |row: &ExpenseRow| row.expense_id.clone(),
    )?;

    for stream in [&report.sales, &report.expenses] {
        log.record(
            "filter.done",
            &[
                ("stream", &stream.stream),
                ("selected", &stream.selected),
                ("boundary_loaded", &stream.boundary_loaded),
                ("boundary_skipped", &stream.boundary_skipped),
                ("already_loaded", &stream.already_loaded),
            ],
        );
    }

    // Dimensions before facts: facts reference them by natural key
    report.customers = wh.step(|conn| reconcile_dimension(conn, &data.customers))?;
    log.record(
        "dimension.reconciled",
        &[
            ("table", &"DimCliente"),
            ("updated", &report.customers.updated),
            ("inserted", &report.customers.inserted),
        ],
    );

    report.products = wh.step(|conn| reconcile_dimension(conn, &data.products))?;
    log.record(
        "dimension.reconciled",
        &[
            ("table", &"DimProducto"),
            ("updated", &report.products.updated),
            ("inserted", &report.products.inserted),
        ],
    );

    if sales.is_empty() {
        log.record("facts.skipped", &[("stream", &FactStream::Sales), ("reason", &"no new rows")]);
    } else {
        report.sales.inserted = wh.step(|conn| load_sales(conn, &sales))?;
        log.record(
            "facts.loaded",
            &[("stream", &FactStream::Sales), ("inserted", &report.sales.inserted)],
        );
    }

    if expenses.is_empty() {
        log.record("facts.skipped", &[("stream", &FactStream::Expenses), ("reason", &"no new rows")]);
    } else {
        report.expenses.inserted = wh.step(|conn| load_expenses(conn, &expenses))?;
        log.record(
            "facts.loaded",
            &[("stream", &FactStream::Expenses), ("inserted", &report.expenses.inserted)],
        );
    }

    Ok(report)
}

/// Apply the boundary policy to one stream's partition and return the rows to load.
fn settle_boundary<R, K, L, F>(
    parts: Partition<R>,
    mark: Watermark,
    policy: BoundaryPolicy,
    stream: &mut StreamReport,
    loaded_on: L,
    key: F,
) -> Result<Vec<R>>
where
    R: Dated,
    K: Eq + std::hash::Hash,
    L: FnOnce(chrono::NaiveDate) -> Result<Vec<K>>,
    F: Fn(&R) -> K,
{
    let Partition {
        mut new,
        boundary,
        already_loaded,
    } = parts;
    stream.selected = new.len();
    stream.already_loaded = already_loaded;

    match (policy, mark.date()) {
        (BoundaryPolicy::Reconcile, Some(date)) if !boundary.is_empty() => {
            let considered = boundary.len();
            let missing = subtract_loaded(boundary, loaded_on(date)?, key);
            stream.boundary_loaded = missing.len();
            stream.boundary_skipped = considered - missing.len();
            new.extend(missing);
        }
        _ => stream.boundary_skipped = boundary.len(),
    }

    Ok(new)
}
