//! Run provenance written next to the results.

use crate::error::Result;
use crate::model::{CalcType, RunRecord};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const RUN_RECORD_FILE: &str = "run_parameters.json";

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| "now".into())
}

/// Write `run_parameters.json` into `output_dir`. Not retried; any write
/// error is returned to the caller.
pub fn record(
    output_dir: &Path,
    calc_type: CalcType,
    model: &str,
    cmd: &str,
    dataset_snapshot: &Path,
    start_time: OffsetDateTime,
) -> Result<RunRecord> {
    let end_time = OffsetDateTime::now_utc();
    let record = RunRecord {
        version: env!("CARGO_PKG_VERSION").to_string(),
        calc_type,
        model: model.to_string(),
        cmd: cmd.to_string(),
        dataset: dataset_snapshot.to_path_buf(),
        start_time: rfc3339(start_time),
        end_time: rfc3339(end_time),
        elapsed: std::time::Duration::try_from(end_time - start_time).unwrap_or_default(),
    };
    let json = serde_json::to_string_pretty(&record)?;
    std::fs::write(output_dir.join(RUN_RECORD_FILE), json)?;
    Ok(record)
}

pub fn read_record(output_dir: &Path) -> Result<RunRecord> {
    let text = std::fs::read_to_string(output_dir.join(RUN_RECORD_FILE))?;
    Ok(serde_json::from_str(&text)?)
}
