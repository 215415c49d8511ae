use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::{RecordOutcome, RunSummary};

pub async fn write_run_report(dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let run_dir = dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing import summary")?;
    fs::write(run_dir.join("import_summary.json"), json)
        .await
        .context("writing import_summary.json")?;

    fs::write(run_dir.join("import_brief.md"), brief_markdown(summary))
        .await
        .context("writing import_brief.md")?;

    Ok(run_dir)
}

pub fn brief_markdown(summary: &RunSummary) -> String {
    let problems = summary
        .records
        .iter()
        .filter_map(|report| match &report.outcome {
            RecordOutcome::Rejected { reason } => Some(format!("- line {}: rejected ({reason})", report.line)),
            RecordOutcome::Failed { uid, error } => Some(format!("- line {} ({uid}): {error}", report.line)),
            RecordOutcome::SkippedCollision { uid, path } => {
                Some(format!("- line {} ({uid}): {path} already exists", report.line))
            }
            _ => None,
        })
        .collect::<Vec<_>>();

    format!(
        "# LMS Import Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Feed: {} ({} bytes, sha256 `{}`)\n- Index: {}\n\n## Counts\n- created: {}\n- updated: {}\n- replaced: {}\n- collisions: {}\n- rejected: {}\n- failed: {}\n- activated: {}\n- deactivated: {}\n- publication failures: {}\n\n## Problems\n{}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.feed_url,
        summary.feed_bytes,
        summary.feed_sha256,
        summary.index_status,
        summary.created,
        summary.updated,
        summary.replaced,
        summary.collisions,
        summary.rejected,
        summary.failed,
        summary.activated,
        summary.deactivated,
        summary.publication_failures,
        if problems.is_empty() {
            "none".to_string()
        } else {
            problems.join("\n")
        }
    )
}
