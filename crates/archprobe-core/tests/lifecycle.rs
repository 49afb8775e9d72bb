mod common;

use archprobe_core::{AspectState, Column, ProbeError, Table, TableSink, Value};
use common::{env_in, read_json, write_report};

#[derive(Default)]
struct MemorySink {
    exported: Vec<(String, Table)>,
}

impl TableSink for MemorySink {
    fn export(&mut self, aspect: &str, table: &Table) -> Result<(), ProbeError> {
        self.exported.push((aspect.to_string(), table.clone()));
        Ok(())
    }
}

#[test]
fn completed_aspect_is_skipped_by_a_later_run() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    {
        let mut env = env_in(dir.path());
        env.report_started("Timing")?;
        env.report_value("niter", 128u32)?;
        env.report_ready(true)?;
        env.finish(&mut MemorySink::default())?;
    }

    let mut env = env_in(dir.path());
    assert!(env.report_started_lazy("Timing")?);
    assert_eq!(env.cur_aspect(), None);
    assert_eq!(env.aspect_state("Timing"), AspectState::NotStarted);
    assert_eq!(env.try_get_aspect_report::<u32>("Timing", "niter"), Some(128));
    Ok(())
}

#[test]
fn fresh_aspect_is_started_lazily() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    assert!(!env.report_started_lazy("Timing")?);
    assert_eq!(env.cur_aspect(), Some("Timing"));
    assert_eq!(env.aspect_state("Timing"), AspectState::Started);
    Ok(())
}

#[test]
fn overlapping_scopes_are_rejected() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    env.report_started("A")?;
    let err = env.report_started("B").expect_err("second scope must fail");
    assert!(matches!(err, ProbeError::Contract(_)));
    assert!(err.is_fatal());
    assert_eq!(err.info().code, "aspect_active");
    assert_eq!(env.cur_aspect(), Some("A"));

    let err = env
        .report_started_lazy("B")
        .expect_err("lazy start inside a scope must fail");
    assert_eq!(err.info().code, "aspect_active");
    Ok(())
}

#[test]
fn ready_without_scope_is_a_contract_violation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    let err = env.report_ready(true).expect_err("no scope is open");
    assert!(matches!(err, ProbeError::Contract(_)));
    assert_eq!(err.info().code, "no_active_aspect");
}

#[test]
fn accessors_outside_scope_fail() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    assert!(env.report_value("x", 1u32).is_err());
    assert!(env.try_get_report::<u32>("x").is_err());
    assert!(env.must_get_report::<u32>("x").is_err());
    assert!(env.cfg_num("x", 1u32).is_err());
    assert!(env.table().is_err());
    assert!(env.init_table([Column::int("x")]).is_err());
}

#[test]
fn done_report_survives_lazy_start() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    write_report(dir.path(), r#"{"Warp": {"done": true, "nthread_warp": 32}}"#);
    let mut env = env_in(dir.path());
    assert!(env.report_started_lazy("Warp")?);
    assert_eq!(env.try_get_aspect_report::<u32>("Warp", "nthread_warp"), Some(32));
    Ok(())
}

#[test]
fn incomplete_report_is_cleared_on_rerun() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    write_report(dir.path(), r#"{"Warp": {"done": false, "nthread_warp": 32}}"#);
    let mut env = env_in(dir.path());
    assert!(!env.report_started_lazy("Warp")?);
    assert_eq!(env.try_get_report::<u32>("nthread_warp")?, None);
    env.report_value("nthread_warp", 64u32)?;
    env.report_ready(true)?;

    let saved = read_json(&dir.path().join("ArchProbeReport.json"));
    assert_eq!(saved["Warp"]["done"], serde_json::json!(true));
    assert_eq!(saved["Warp"]["nthread_warp"], serde_json::json!(64));
    Ok(())
}

#[test]
fn report_is_flushed_on_every_ready() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    env.report_started("A")?;
    env.report_value("x", 1.5f64)?;
    env.report_ready(false)?;

    let saved = read_json(&dir.path().join("ArchProbeReport.json"));
    assert_eq!(saved["A"]["done"], serde_json::json!(false));
    assert_eq!(saved["A"]["x"], serde_json::json!(1.5));
    assert_eq!(env.aspect_state("A"), AspectState::ReadyIncomplete);
    Ok(())
}

#[test]
fn aspect_completed_in_this_run_is_rerun_when_started_lazily() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    env.report_started("A")?;
    env.report_value("x", 1u32)?;
    env.report_ready(true)?;

    assert!(!env.report_started_lazy("A")?);
    assert_eq!(env.try_get_report::<u32>("x")?, None);
    env.report_ready(true)?;
    Ok(())
}

#[test]
fn must_get_reports_missing_field() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    env.report_started("A")?;
    let err = env
        .must_get_aspect_report::<u32>("Timing", "niter")
        .expect_err("nothing was reported");
    assert_eq!(err.info().code, "report_missing");
    assert_eq!(err.info().context.get("aspect").map(String::as_str), Some("Timing"));
    Ok(())
}

#[test]
fn wrong_kind_report_field_reads_as_absent() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    write_report(dir.path(), r#"{"Timing": {"done": true, "niter": "many"}}"#);
    let env = env_in(dir.path());
    assert_eq!(env.try_get_aspect_report::<u32>("Timing", "niter"), None);
    assert_eq!(
        env.try_get_aspect_report::<String>("Timing", "niter").as_deref(),
        Some("many")
    );
    Ok(())
}

#[test]
fn finish_rejects_open_scope() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    env.report_started("A")?;
    let err = env
        .finish(&mut MemorySink::default())
        .expect_err("scope still open");
    assert_eq!(err.info().code, "aspect_active");
    Ok(())
}

#[test]
fn tables_are_exported_at_finish() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());

    env.report_started("Bandwidth")?;
    env.init_table([Column::int("range"), Column::float("bandwidth")])?;
    env.table()?.push_row([Value::Int(1024), Value::Float(12.5)])?;
    env.table()?.push_row([Value::Int(2048), Value::Float(13.0)])?;
    env.report_ready(true)?;

    env.report_started("NoTable")?;
    env.report_ready(true)?;

    let mut sink = MemorySink::default();
    env.finish(&mut sink)?;
    assert_eq!(sink.exported.len(), 1);
    let (aspect, table) = &sink.exported[0];
    assert_eq!(aspect, "Bandwidth");
    assert_eq!(table.len(), 2);
    assert_eq!(
        table.row_map(1).and_then(|row| row.get("range").copied().cloned()),
        Some(Value::Int(2048))
    );
    Ok(())
}

#[test]
fn rerun_replaces_exported_table() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    for rows in [1, 3] {
        env.report_started("A")?;
        env.init_table([Column::int("i")])?;
        for i in 0..rows {
            env.table()?.push_row([Value::Int(i)])?;
        }
        env.report_ready(true)?;
    }
    let mut sink = MemorySink::default();
    env.finish(&mut sink)?;
    assert_eq!(sink.exported.len(), 1);
    assert_eq!(sink.exported[0].1.len(), 3);
    Ok(())
}

#[test]
fn empty_aspect_name_is_rejected() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut env = env_in(dir.path());
    let err = env.report_started("").expect_err("empty name");
    assert_eq!(err.info().code, "empty_aspect");
}
