use std::fmt::Write as _;

use camino::Utf8Path;

use crate::batch::{FailureEntry, ImportReport};
use crate::error::ImportError;
use crate::fs_util;

/// Renders the consolidated run report. Operators diff successive runs,
/// so the layout is stable and every list keeps its sort order.
pub fn render(report: &ImportReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Import report generated {}", report.generated_on);

    let _ = writeln!(out, "\nSuccessful imports:");
    for entry in &report.successes {
        let _ = writeln!(out, "{} ({})", entry.library_id, entry.external_library_id);
    }

    let _ = writeln!(out, "\nFailed imports:");
    for entry in report.failed_imports() {
        render_failure(&mut out, entry);
    }

    let _ = writeln!(
        out,
        "\nLibraries expected from sequencing center (submitted < {} days):",
        report.recent_days
    );
    for entry in report.expected_from_center() {
        render_failure(&mut out, entry);
    }

    out
}

fn render_failure(out: &mut String, entry: &FailureEntry) {
    let _ = writeln!(
        out,
        "{} ({}): {}",
        entry.library_id, entry.external_library_id, entry.message
    );
}

/// Overwrites the previous report in one atomic rename.
pub fn write_report(path: &Utf8Path, report: &ImportReport) -> Result<(), ImportError> {
    fs_util::write_text_atomic(path, &render(report))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::batch::SuccessEntry;

    fn sample_report() -> ImportReport {
        let today = NaiveDate::from_ymd_opt(2025, 8, 20).unwrap();
        ImportReport {
            generated_on: today,
            recent_days: 10,
            successes: vec![SuccessEntry {
                library_id: "A96213A".to_string(),
                external_library_id: "PX1234".to_string(),
                submission_date: NaiveDate::from_ymd_opt(2025, 8, 2).unwrap(),
                new_lane_count: 2,
            }],
            failures: vec![
                FailureEntry {
                    library_id: "A90554B".to_string(),
                    external_library_id: "PX0099".to_string(),
                    submission_date: NaiveDate::from_ymd_opt(2025, 8, 18).unwrap(),
                    message: "no sequencing-center records yet".to_string(),
                },
                FailureEntry {
                    library_id: "A90553A".to_string(),
                    external_library_id: "PX0077".to_string(),
                    submission_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
                    message: "corrupt gzip source: /archive/r1.fastq.gz".to_string(),
                },
            ],
        }
    }

    #[test]
    fn report_layout_is_stable() {
        let text = render(&sample_report());
        assert_eq!(
            text,
            "Import report generated 2025-08-20\n\
             \n\
             Successful imports:\n\
             A96213A (PX1234)\n\
             \n\
             Failed imports:\n\
             A90553A (PX0077): corrupt gzip source: /archive/r1.fastq.gz\n\
             \n\
             Libraries expected from sequencing center (submitted < 10 days):\n\
             A90554B (PX0099): no sequencing-center records yet\n"
        );
    }

    #[test]
    fn report_overwrites_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path =
            camino::Utf8PathBuf::from_path_buf(dir.path().join("import.txt")).unwrap();
        std::fs::write(path.as_std_path(), "stale contents").unwrap();

        write_report(&path, &sample_report()).unwrap();
        let text = std::fs::read_to_string(path.as_std_path()).unwrap();
        assert!(text.starts_with("Import report generated 2025-08-20"));
        assert!(!text.contains("stale contents"));
    }
}
