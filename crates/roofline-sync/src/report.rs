use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::pipeline::{JobStatus, RunSummary};

pub const SUMMARY_FILE: &str = "ingest_summary.json";
pub const BRIEF_FILE: &str = "ingest_brief.md";

/// Writes `<reports_root>/<run_id>/{ingest_summary.json, ingest_brief.md}`.
pub async fn write_run_reports(reports_root: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = reports_root.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(run_dir.join(SUMMARY_FILE), json)
        .await
        .with_context(|| format!("writing {SUMMARY_FILE}"))?;

    fs::write(run_dir.join(BRIEF_FILE), render_brief(summary))
        .await
        .with_context(|| format!("writing {BRIEF_FILE}"))?;

    Ok(run_dir)
}

pub fn render_brief(summary: &RunSummary) -> String {
    let totals = &summary.totals;
    let mut lines = vec![
        "# Roofline Ingest Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Jobs: {} ({} failed)", totals.jobs, totals.failed_jobs),
        format!(
            "- Items: {} fetched, {} mapped, {} skipped",
            totals.items_fetched, totals.items_mapped, totals.skipped
        ),
        format!(
            "- Listings: {} new, {} duplicates",
            totals.new_records, totals.duplicates
        ),
        String::new(),
        "## Jobs".to_string(),
    ];

    for job in &summary.jobs {
        lines.push(String::new());
        lines.push(format!("### `{}` ({} via {})", job.job_id, job.adapter, job.provider));
        lines.push(format!("- status: {}", status_label(job.status)));
        if let Some(error) = &job.error {
            lines.push(format!("- error: {error}"));
        }
        lines.push(format!(
            "- fetched {}, mapped {}, new {}, duplicates {}",
            job.items_fetched, job.items_mapped, job.new_records, job.duplicates
        ));
        for skipped in &job.skipped {
            lines.push(format!("- skipped item {}: {}", skipped.index, skipped.reason));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Completed => "completed",
        JobStatus::FetchFailed => "fetch failed",
        JobStatus::PersistFailed => "persist failed",
        JobStatus::Misconfigured => "misconfigured",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{JobSummary, SkippedItem};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn summary() -> RunSummary {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).single().unwrap();
        RunSummary::from_jobs(
            Uuid::new_v4(),
            at,
            at,
            vec![
                JobSummary {
                    job_id: "daft-ie-dublin".into(),
                    adapter: "daft-ie".into(),
                    provider: "blagoysimandoff/daft-property-scraper".into(),
                    status: JobStatus::Completed,
                    error: None,
                    items_fetched: 3,
                    items_mapped: 2,
                    skipped: vec![SkippedItem {
                        index: 1,
                        reason: "price is not a non-negative number: \"POA\"".into(),
                    }],
                    new_records: 1,
                    duplicates: 1,
                    archived_batch: None,
                },
                JobSummary {
                    job_id: "idealista-es-madrid".into(),
                    adapter: "idealista-es".into(),
                    provider: "datacut/idealista-scraper".into(),
                    status: JobStatus::FetchFailed,
                    error: Some("provider request failed".into()),
                    items_fetched: 0,
                    items_mapped: 0,
                    skipped: vec![],
                    new_records: 0,
                    duplicates: 0,
                    archived_batch: None,
                },
            ],
        )
    }

    #[test]
    fn brief_lists_totals_and_skips() {
        let brief = render_brief(&summary());
        assert!(brief.contains("- Jobs: 2 (1 failed)"));
        assert!(brief.contains("- Listings: 1 new, 1 duplicates"));
        assert!(brief.contains("- skipped item 1: price is not"));
        assert!(brief.contains("- status: fetch failed"));
    }

    #[tokio::test]
    async fn reports_land_under_the_run_id() {
        let dir = tempdir().unwrap();
        let summary = summary();
        let run_dir = write_run_reports(dir.path(), &summary).await.unwrap();
        assert_eq!(run_dir, dir.path().join(summary.run_id.to_string()));

        let json = std::fs::read_to_string(run_dir.join(SUMMARY_FILE)).unwrap();
        let parsed: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.totals, summary.totals);
        assert_eq!(parsed.jobs[1].status, JobStatus::FetchFailed);
        assert!(run_dir.join(BRIEF_FILE).exists());
    }
}
