use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use dw_etl::{
    run_from_config, BoundaryPolicy, EtlConfig, EtlError, FileRunLog, LoadMode, MemoryRunLog,
    Warehouse, Watermark,
};

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn write_workbook(dir: &Path, transactions: &str, expenses: &str) {
    fs::write(
        dir.join("Transacciones.csv"),
        format!("Fecha,ID_Cliente,ID_Producto,Cantidad,Precio_Unitario,Estado\n{transactions}"),
    )
    .unwrap();
    fs::write(
        dir.join("Clientes.csv"),
        "ID_Cliente,Nombre,Segmento,Región,Fecha_Registro\nC1,Ana Pérez,Retail,Norte,2023-05-01\n",
    )
    .unwrap();
    fs::write(
        dir.join("Productos.csv"),
        "ID_Producto,Categoría,Subcategoría,Costo_Unitario,Margen_Beneficio\nP1,Hogar,Cocina,10,20\n",
    )
    .unwrap();
    fs::write(
        dir.join("Gastos.csv"),
        format!("ID_Gasto,Fecha,Monto,Categoría_Gasto\n{expenses}"),
    )
    .unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    config: EtlConfig,
}

fn fixture(seed_from: NaiveDate, seed_to: NaiveDate) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let source_dir = dir.path().join("source");
    fs::create_dir_all(&source_dir).unwrap();
    let config = EtlConfig::new(source_dir, dir.path().join("dw.sqlite"));

    let mut wh = Warehouse::open(&config.warehouse_path).unwrap();
    wh.seed_calendar(seed_from, seed_to).unwrap();
    wh.close().unwrap();

    Fixture { _dir: dir, config }
}

#[test]
fn empty_warehouse_single_sale() {
    let fx = fixture(ymd(2024, 1, 1), ymd(2024, 12, 31));
    write_workbook(
        &fx.config.source_dir,
        "2024-02-01,C1,P1,2,15,Completada\n",
        "",
    );

    let report = run_from_config(&fx.config, LoadMode::Incremental, &MemoryRunLog::new()).unwrap();

    assert_eq!(report.customers.inserted, 1);
    assert_eq!(report.products.inserted, 1);
    assert_eq!(report.sales.inserted, 1);

    let wh = Warehouse::open(&fx.config.warehouse_path).unwrap();
    let counts = wh.table_counts().unwrap();
    assert_eq!(counts.dim_cliente, 1);
    assert_eq!(counts.dim_producto, 1);
    assert_eq!(counts.fact_ventas, 1);

    let (fecha, ingreso, costo, utilidad): (String, f64, f64, f64) = wh
        .conn()
        .query_row(
            "SELECT T.Fecha, F.IngresoBruto, F.CostoTotal, F.Utilidad
             FROM FactVentas F JOIN DimTiempo T ON F.IdTiempo = T.IdTiempo",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .unwrap();
    assert_eq!(fecha, "2024-02-01");
    assert_eq!(ingreso, 30.0);
    assert_eq!(costo, 20.0);
    assert_eq!(utilidad, 10.0);
}

#[test]
fn load_fails_when_time_dimension_lacks_the_date() {
    // Calendar stops before the sale's date
    let fx = fixture(ymd(2024, 1, 1), ymd(2024, 1, 31));
    write_workbook(
        &fx.config.source_dir,
        "2024-02-01,C1,P1,2,15,Completada\n",
        "",
    );

    let err = run_from_config(&fx.config, LoadMode::Incremental, &MemoryRunLog::new()).unwrap_err();

    match err {
        EtlError::MissingTimeKey { date, .. } => assert_eq!(date, ymd(2024, 2, 1)),
        other => panic!("unexpected error: {other}"),
    }
    let wh = Warehouse::open(&fx.config.warehouse_path).unwrap();
    assert_eq!(wh.table_counts().unwrap().fact_ventas, 0);
    assert_eq!(wh.recent_runs(1).unwrap()[0].status, "failed");
}

#[test]
fn unknown_product_row_is_dropped_silently() {
    let fx = fixture(ymd(2024, 1, 1), ymd(2024, 12, 31));
    write_workbook(
        &fx.config.source_dir,
        "2024-02-01,C1,P404,2,15,Completada\n",
        "",
    );

    let report = run_from_config(&fx.config, LoadMode::Incremental, &MemoryRunLog::new()).unwrap();

    assert_eq!(report.transform.transactions.kept, 0);
    assert_eq!(report.transform.transactions.dropped, 1);
    let wh = Warehouse::open(&fx.config.warehouse_path).unwrap();
    assert_eq!(wh.table_counts().unwrap().fact_ventas, 0);
}

#[test]
fn incremental_then_full_reload_with_run_log_file() {
    let fx = fixture(ymd(2024, 1, 1), ymd(2024, 12, 31));
    let log_path = fx.config.source_dir.parent().unwrap().join("logs").join("etl.log");
    let log = FileRunLog::open(&log_path).unwrap();

    write_workbook(
        &fx.config.source_dir,
        "2024-01-09,C1,P1,1,15,Completada\n2024-01-10,C1,P1,1,15,Completada\n",
        "G1,2024-01-10 00:00:00,120.5,Renta\n",
    );
    run_from_config(&fx.config, LoadMode::Incremental, &log).unwrap();

    // A later workbook repeats old rows and adds one day
    write_workbook(
        &fx.config.source_dir,
        "2024-01-09,C1,P1,1,15,Completada\n2024-01-10,C1,P1,1,15,Completada\n2024-01-11,C1,P1,3,15,Completada\n",
        "G1,2024-01-10,120.5,Renta\nG2,2024-01-12,40,Luz\n",
    );
    let report = run_from_config(&fx.config, LoadMode::Incremental, &log).unwrap();

    assert_eq!(report.sales.watermark, Some(Watermark::At(ymd(2024, 1, 10))));
    assert_eq!(report.sales.inserted, 1);
    assert_eq!(report.expenses.inserted, 1);
    assert_eq!(report.boundary_policy, BoundaryPolicy::Strict);

    let full = run_from_config(&fx.config, LoadMode::Full, &log).unwrap();
    assert_eq!(full.sales.inserted, 3);
    assert_eq!(full.expenses.inserted, 2);

    let wh = Warehouse::open(&fx.config.warehouse_path).unwrap();
    let counts = wh.table_counts().unwrap();
    assert_eq!(counts.fact_ventas, 3);
    assert_eq!(counts.fact_gastos, 2);
    assert_eq!(wh.recent_runs(10).unwrap().len(), 3);

    let text = fs::read_to_string(&log_path).unwrap();
    assert_eq!(text.matches("load.start").count(), 3);
    assert!(text.contains("facts.loaded stream=sales inserted=1"));
    assert!(text.contains("clear.done"));
}
