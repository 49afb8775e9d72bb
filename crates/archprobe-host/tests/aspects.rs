use std::path::Path;
use std::time::Duration;

use archprobe_core::{
    run_pipeline, AspectOutcome, ConvergencePolicy, CsvTableSink, EnvOpts, Environment,
    ProbeError, RunOpts,
};
use archprobe_host::{default_aspects, HostBackend};

const QUICK_CONFIG: &str = r#"{
  "Timing": {"minTimeUs": 50.0},
  "BufferBandwidth": {"rangeMin": 4096, "rangeMax": 16384, "minTimeUs": 50.0},
  "BufferCacheHierarchy": {"rangeMin": 1024, "rangeMax": 8192, "nstep": 256, "minTimeUs": 50.0},
  "Gflops": {"nloop": 64, "nitem": 4, "minTimeUs": 50.0}
}"#;

fn quick_env(dir: &Path) -> Environment<HostBackend> {
    let opts = EnvOpts {
        config_path: dir.join("ArchProbe.json"),
        report_path: dir.join("ArchProbeReport.json"),
        convergence: ConvergencePolicy {
            max_rounds: 6,
            wall_budget: Duration::from_secs(2),
            ..ConvergencePolicy::default()
        },
    };
    Environment::new(HostBackend::open(0).expect("host device"), opts).expect("environment")
}

fn write_quick_config(dir: &Path) {
    std::fs::write(dir.join("ArchProbe.json"), QUICK_CONFIG).expect("write config");
}

#[test]
fn host_pipeline_characterizes_and_resumes() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    write_quick_config(dir.path());

    let mut env = quick_env(dir.path());
    let mut aspects = default_aspects();
    let summary = run_pipeline(&mut env, &mut aspects, &RunOpts::default())?;
    for name in ["Timing", "BufferBandwidth", "BufferCacheHierarchy", "Gflops"] {
        assert_eq!(summary.outcome(name), Some(&AspectOutcome::Done), "{name}");
    }
    let tables = dir.path().join("tables");
    let profiled = env.finish(&mut CsvTableSink::new(&tables))?;
    assert!(profiled.buf_bandwidth > 0.0);
    assert!(profiled.gflops_fp32 > 0.0);
    assert_eq!(profiled.buf_cacheline_size, 64);

    let report: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("ArchProbeReport.json")).expect("read report"),
    )
    .expect("report json");
    assert!(report["Timing"]["niter"].as_u64().unwrap_or(0) >= 1);
    assert_eq!(report["BufferCacheHierarchy"]["cachelineSize"], 64);
    assert!(report["BufferCacheHierarchy"]["cacheSizes"].is_array());

    let bandwidth = std::fs::read_to_string(tables.join("BufferBandwidth.csv")).expect("csv");
    assert_eq!(bandwidth.lines().count(), 4);
    assert!(bandwidth.starts_with("range,niter,usPerDispatch,bandwidthGBps"));
    let cache = std::fs::read_to_string(tables.join("BufferCacheHierarchy.csv")).expect("csv");
    assert_eq!(cache.lines().count(), 5);
    assert!(!tables.join("Timing.csv").exists());

    let mut env = quick_env(dir.path());
    let summary = run_pipeline(&mut env, &mut aspects, &RunOpts::default())?;
    assert!(summary
        .aspects
        .iter()
        .all(|(_, outcome)| *outcome == AspectOutcome::Skipped));
    let resumed = env.finish(&mut CsvTableSink::new(&tables))?;
    assert_eq!(resumed.buf_bandwidth, profiled.buf_bandwidth);
    assert_eq!(resumed.gflops_fp32, profiled.gflops_fp32);
    assert_eq!(resumed.buf_cacheline_size, 64);
    assert_eq!(resumed.buf_cache_sizes, profiled.buf_cache_sizes);
    assert_eq!(resumed.timing_std, profiled.timing_std);
    Ok(())
}

#[test]
fn dependents_start_from_the_timing_niter() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    write_quick_config(dir.path());
    std::fs::write(
        dir.path().join("ArchProbeReport.json"),
        r#"{"Timing": {"done": true, "niter": 4096, "timingStd": 0.01}}"#,
    )
    .expect("write report");
    let mut env = quick_env(dir.path());
    let only = RunOpts {
        only: Some(["Timing".to_string(), "Gflops".to_string()].into_iter().collect()),
        ..RunOpts::default()
    };
    let summary = run_pipeline(&mut env, &mut default_aspects(), &only)?;
    assert_eq!(summary.outcome("Timing"), Some(&AspectOutcome::Skipped));
    assert_eq!(summary.outcome("Gflops"), Some(&AspectOutcome::Done));
    assert!(env.last_convergence().expect("gflops timed").niter >= 4096 / (4 * 64));
    let profiled = env.finish(&mut CsvTableSink::new(dir.path().join("tables")))?;
    assert_eq!(profiled.timing_std, 0.01);
    assert!(profiled.gflops_fp32 > 0.0);
    Ok(())
}

#[test]
fn defaults_are_written_back_to_the_configuration() -> Result<(), ProbeError> {
    let dir = tempfile::tempdir().expect("tmp dir");
    std::fs::write(
        dir.path().join("ArchProbe.json"),
        r#"{"Timing": {"minTimeUs": "fast"}}"#,
    )
    .expect("write config");
    let mut env = quick_env(dir.path());
    let only = RunOpts {
        only: Some(["Timing".to_string()].into_iter().collect()),
        ..RunOpts::default()
    };
    run_pipeline(&mut env, &mut default_aspects(), &only)?;
    env.finish(&mut CsvTableSink::new(dir.path().join("tables")))?;

    let cfg: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("ArchProbe.json")).expect("read config"),
    )
    .expect("config json");
    assert_eq!(cfg["Timing"]["minTimeUs"], 1000.0);
    Ok(())
}

#[test]
fn dependents_refuse_to_run_without_timing() {
    let dir = tempfile::tempdir().expect("tmp dir");
    write_quick_config(dir.path());
    let mut env = quick_env(dir.path());
    let only = RunOpts {
        only: Some(["Gflops".to_string()].into_iter().collect()),
        ..RunOpts::default()
    };
    let err = run_pipeline(&mut env, &mut default_aspects(), &only).expect_err("Timing missing");
    assert_eq!(err.info().code, "dep_missing");
}
