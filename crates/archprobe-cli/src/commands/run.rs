use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use archprobe_core::{
    run_pipeline, CsvTableSink, EnvOpts, Environment, PipelineSummary, ProfiledReport, RunOpts,
    DEFAULT_CONFIG_PATH, DEFAULT_REPORT_PATH,
};
use archprobe_host::{default_aspects, HostBackend};
use clap::Args;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Index of the device to characterize.
    #[arg(default_value_t = 0)]
    pub device: usize,
    /// Configuration document; created with defaults when missing.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Report document read on start and rewritten after every aspect.
    #[arg(long, default_value = DEFAULT_REPORT_PATH)]
    pub report: PathBuf,
    /// Directory receiving one CSV table per aspect.
    #[arg(long, default_value = "tables")]
    pub tables: PathBuf,
    /// Rerun an aspect even if it is already done. Repeatable.
    #[arg(long = "force", value_name = "ASPECT")]
    pub force: Vec<String>,
    /// Run only the named aspects. Repeatable.
    #[arg(long = "only", value_name = "ASPECT")]
    pub only: Vec<String>,
    /// Also write the run summary to this file.
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    created_at: String,
    device: String,
    config: PathBuf,
    report: PathBuf,
    pipeline: PipelineSummary,
    profiled: ProfiledReport,
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let backend = HostBackend::open(args.device)?;
    let opts = EnvOpts {
        config_path: args.config.clone(),
        report_path: args.report.clone(),
        ..EnvOpts::default()
    };
    let mut env = Environment::new(backend, opts)?;
    let device = env.dev_report().name.clone();

    let mut aspects = default_aspects();
    let known: BTreeSet<&str> = aspects.iter().map(|aspect| aspect.name()).collect();
    for name in args.force.iter().chain(&args.only) {
        if !known.contains(name.as_str()) {
            log::warn!("'{name}' does not name an aspect of this backend");
        }
    }
    let run_opts = RunOpts {
        force: args.force.iter().cloned().collect(),
        only: (!args.only.is_empty()).then(|| args.only.iter().cloned().collect()),
    };

    let pipeline = match run_pipeline(&mut env, &mut aspects, &run_opts) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            log::error!("characterization aborted: {err}");
            return Err(err.into());
        }
    };
    let profiled = env.finish(&mut CsvTableSink::new(&args.tables))?;
    if !pipeline.all_done() {
        log::warn!("some aspects did not complete; rerun to resume them");
    }

    let summary = RunSummary {
        created_at: chrono::Utc::now().to_rfc3339(),
        device,
        config: args.config.clone(),
        report: args.report.clone(),
        pipeline,
        profiled,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    if let Some(path) = &args.summary {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &json)?;
    }
    println!("{json}");
    Ok(())
}
