use archprobe_core::{Column, CsvTableSink, ProbeError, Table, TableSink, Value};

fn bandwidth_table() -> Table {
    Table::new([
        Column::int("range"),
        Column::float("bandwidth"),
        Column::text("level"),
    ])
}

#[test]
fn rows_must_match_schema() {
    let mut table = bandwidth_table();
    let err = table
        .push_row([Value::Int(1)])
        .expect_err("arity mismatch");
    assert_eq!(err.info().code, "table_arity");

    let err = table
        .push_row([Value::Float(1.0), Value::Float(2.0), Value::from("L1")])
        .expect_err("float in an int column");
    assert_eq!(err.info().code, "table_kind");
    assert_eq!(err.info().context.get("column").map(String::as_str), Some("range"));
    assert!(table.is_empty());
}

#[test]
fn float_columns_widen_integers() -> Result<(), ProbeError> {
    let mut table = bandwidth_table();
    table.push_row([Value::Int(1024), Value::Int(10), Value::from("L1")])?;
    assert_eq!(table.len(), 1);
    Ok(())
}

#[test]
fn csv_has_header_and_rows() -> Result<(), ProbeError> {
    let mut table = bandwidth_table();
    table.push_row([Value::Int(1024), Value::Float(12.5), Value::from("L1")])?;
    table.push_row([Value::Int(2048), Value::Float(7.25), Value::from("L2, shared")])?;
    let mut out = Vec::new();
    table.write_csv(&mut out)?;
    let text = String::from_utf8(out).expect("utf8");
    assert_eq!(
        text,
        "range,bandwidth,level\n1024,12.5,L1\n2048,7.25,\"L2, shared\"\n"
    );
    Ok(())
}

#[test]
fn csv_sink_writes_one_file_per_aspect() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut sink = CsvTableSink::new(dir.path().join("tables"));
    let mut table = Table::new([Column::int("stride"), Column::bool("hit")]);
    table.push_row([Value::Int(64), Value::Bool(true)])?;
    sink.export("BufferCacheHierarchy", &table)?;

    let path = sink.path_for("BufferCacheHierarchy");
    assert!(path.ends_with("tables/BufferCacheHierarchy.csv"));
    let mut reader = csv::Reader::from_path(&path).expect("csv reader");
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), ["stride", "hit"]);
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.expect("row")).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][1], "true");
    Ok(())
}
