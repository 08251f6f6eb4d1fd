use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::PipelineRun;

#[derive(Debug, Clone)]
pub struct RunReportPaths {
    pub dir: PathBuf,
    pub summary_json: PathBuf,
    pub brief_markdown: PathBuf,
}

/// Write `reports/<run_id>/profiling_summary.json` and `profiling_brief.md` under `workspace_root`.
pub async fn write_run_report(run: &PipelineRun, workspace_root: &Path) -> Result<RunReportPaths> {
    let dir = workspace_root.join("reports").join(run.run_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let summary_json = dir.join("profiling_summary.json");
    let bytes = serde_json::to_vec_pretty(run).context("serializing profiling summary")?;
    fs::write(&summary_json, bytes)
        .await
        .with_context(|| format!("writing {}", summary_json.display()))?;

    let brief_markdown = dir.join("profiling_brief.md");
    fs::write(&brief_markdown, render_brief_markdown(run))
        .await
        .with_context(|| format!("writing {}", brief_markdown.display()))?;

    Ok(RunReportPaths {
        dir,
        summary_json,
        brief_markdown,
    })
}

pub fn render_brief_markdown(run: &PipelineRun) -> String {
    let stats = &run.stats;
    let mut out = format!(
        "# Profiling Brief: {}\n\n- Run ID: `{}`\n- Organization: {} ({})\n- Model: {}\n- Mode: {}\n- Started: {}\n- Finished: {}\n\n## Totals\n- Dogs: {}\n- Succeeded: {}\n- Failed: {}\n- Validation failures: {}\n- Persisted: {}\n- Flagged for review: {}\n- LLM attempts: {} ({} retried successfully, {} model fallbacks)\n",
        run.organization_name,
        run.run_id,
        run.organization_name,
        run.organization_id,
        run.model,
        if run.dry_run { "dry run" } else { "live" },
        run.started_at,
        run.finished_at,
        stats.total,
        stats.succeeded,
        stats.failed,
        stats.validation_failures,
        stats.persisted,
        stats.review_recommended,
        run.retry.total_attempts,
        run.retry.successful_retries,
        run.retry.model_fallbacks,
    );

    let review: Vec<String> = run
        .dogs
        .iter()
        .filter_map(|dog| {
            let quality = dog.quality.as_ref()?;
            (!quality.passes).then(|| {
                format!(
                    "- {} ({}): {:.2}, {} issue(s)",
                    dog.name,
                    dog.animal_id,
                    quality.total_score,
                    quality.issues.len()
                )
            })
        })
        .collect();
    if !review.is_empty() {
        out.push_str("\n## Needs Review\n");
        out.push_str(&review.join("\n"));
        out.push('\n');
    }

    if !stats.errors.is_empty() {
        out.push_str("\n## Errors\n");
        for error in &stats.errors {
            out.push_str(&format!("- {error}\n"));
        }
    }
    out
}
