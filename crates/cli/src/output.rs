use serde_json::{json, Value};
use shelfscan_core::pipeline::RunOutcome;

pub fn outcome_json(session: &str, outcome: &RunOutcome) -> Value {
    match outcome {
        RunOutcome::Completed {
            summary,
            reports,
            archive,
        } => json!({
            "status": "completed",
            "session": session,
            "summary": summary,
            "reports": {
                "csv": reports.csv.display().to_string(),
                "xlsx": reports.xlsx.display().to_string(),
            },
            "archive": archive.display().to_string(),
        }),
        RunOutcome::NoInput => json!({
            "status": "no_input",
            "session": session,
        }),
    }
}

pub fn outcome_text(session: &str, outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed {
            summary,
            reports,
            archive,
        } => [
            format!("session {session}"),
            format!("images analyzed: {}", summary.total),
            format!("complete: {}", summary.complete),
            format!("partial: {}", summary.partial),
            format!("errors: {}", summary.error),
            format!("success rate: {:.1}%", summary.success_rate),
            format!("mean completeness: {:.1}%", summary.mean_score),
            format!("csv: {}", reports.csv.display()),
            format!("xlsx: {}", reports.xlsx.display()),
            format!("archive: {}", archive.display()),
        ]
        .join("\n"),
        RunOutcome::NoInput => format!("session {session}: no images to process"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelfscan_core::models::RunSummary;
    use shelfscan_core::report::ReportPaths;
    use std::path::PathBuf;

    fn completed() -> RunOutcome {
        RunOutcome::Completed {
            summary: RunSummary {
                total: 3,
                complete: 1,
                partial: 1,
                error: 1,
                success_rate: 200.0 / 3.0,
                mean_score: 50.0,
            },
            reports: ReportPaths {
                csv: PathBuf::from("out/a.csv"),
                xlsx: PathBuf::from("out/a.xlsx"),
            },
            archive: PathBuf::from("archive/session_s"),
        }
    }

    #[test]
    fn json_carries_summary_and_paths() {
        let value = outcome_json("s", &completed());
        assert_eq!(value["status"], "completed");
        assert_eq!(value["summary"]["total"], 3);
        assert_eq!(value["reports"]["csv"], "out/a.csv");
        assert_eq!(outcome_json("s", &RunOutcome::NoInput)["status"], "no_input");
    }

    #[test]
    fn text_rounds_rates() {
        let text = outcome_text("s", &completed());
        assert!(text.contains("success rate: 66.7%"), "{text}");
        assert!(text.contains("errors: 1"));
    }
}
