use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;

use archprobe_core::format::read_document;
use archprobe_core::{Document, Value, DEFAULT_REPORT_PATH, DONE_FIELD};
use clap::Args;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Report document to inspect.
    #[arg(long, default_value = DEFAULT_REPORT_PATH)]
    pub report: PathBuf,
    /// Emit the listing as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &ShowArgs) -> Result<(), Box<dyn Error>> {
    let Some(report) = read_document::<Document>(&args.report)? else {
        return Err(format!("report '{}' does not exist", args.report.display()).into());
    };
    let states: BTreeMap<&str, bool> = report
        .iter()
        .map(|(aspect, record)| {
            let done = record
                .as_doc()
                .and_then(|doc| doc.get(DONE_FIELD))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            (aspect.as_str(), done)
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }
    for (aspect, done) in states {
        println!("{aspect}\t{}", if done { "done" } else { "incomplete" });
    }
    Ok(())
}
