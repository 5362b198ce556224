//! Text summary builder for CLI output.

use crate::orchestrator::RunSummary;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary for a finished calculation.
pub(crate) fn build_text_summary(summary: &RunSummary) -> TextSummary {
    let record = &summary.record;
    let mut lines = vec![
        format!("Calculation: {:?}", record.calc_type),
        format!("Model: {}", record.model),
        format!("Command: {}", record.cmd),
        format!(
            "Elapsed: {}",
            humantime::format_duration(std::time::Duration::from_secs(record.elapsed.as_secs()))
        ),
        format!("Output: {}", summary.output_dir.display()),
    ];

    let collected = &summary.collected;
    if collected.carried_forward > 0 {
        lines.push(format!(
            "Trees carried forward: {}",
            collected.carried_forward
        ));
    }
    if collected.events_tree {
        lines.push("Reconciliation events: tree_events.newick".to_string());
    }
    if collected.bootstrap_replicates > 0 {
        lines.push(format!(
            "Bootstrap replicates: {}",
            collected.bootstrap_replicates
        ));
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CalcType, RunRecord};
    use crate::orchestrator::Collected;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn elapsed_is_rounded_to_seconds() {
        let summary = RunSummary {
            run_dir: PathBuf::from("run"),
            output_dir: PathBuf::from("run/output"),
            record: RunRecord {
                version: "0.1.0".into(),
                calc_type: CalcType::MlTree,
                model: "LG+G8".into(),
                cmd: "raxml-ng --search".into(),
                dataset: PathBuf::from("input/dataset.csv"),
                start_time: String::new(),
                end_time: String::new(),
                elapsed: Duration::from_millis(61_250),
            },
            collected: Collected {
                bootstrap_replicates: 3,
                ..Default::default()
            },
        };
        let lines = build_text_summary(&summary).lines;
        assert!(lines.contains(&"Elapsed: 1m 1s".to_string()));
        assert!(lines.contains(&"Bootstrap replicates: 3".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("Trees carried")));
    }
}
