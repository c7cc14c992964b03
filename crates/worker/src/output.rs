use anyhow::Context;
use std::future::Future;
use std::path::{Path, PathBuf};
use surge_core::domain::SelectionReport;

pub fn artifact_path(dir: &Path, report: &SelectionReport) -> PathBuf {
    dir.join(format!("{}_{}.json", report.as_of_date, report.session))
}

/// Writes the report as `<dir>/<date>_<session>.json`.
///
/// The JSON goes to a sibling temp file first and is renamed into place, so a
/// reader never sees a partial artifact.
pub async fn write_artifact(dir: &Path, report: &SelectionReport) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create output dir failed: {}", dir.display()))?;

    let path = artifact_path(dir, report);
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(report).context("serialize selection report failed")?;

    tokio::fs::write(&tmp, &body)
        .await
        .with_context(|| format!("write temp artifact failed: {}", tmp.display()))?;

    if let Err(err) = tokio::fs::rename(&tmp, &path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err).with_context(|| format!("rename artifact failed: {}", path.display()));
    }

    Ok(path)
}

/// Runs `persist` (the database write, when configured) and only then writes
/// the artifact. A failed persist leaves no file behind.
pub async fn publish<F, Fut>(dir: &Path, report: &SelectionReport, persist: F) -> anyhow::Result<PathBuf>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    persist().await.context("persisting selection failed; no artifact written")?;
    write_artifact(dir, report).await
}
