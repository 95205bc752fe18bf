use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::reconcile::RunMode;

/// What happens to a processed extract file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageVerdict {
    KeepPending,
    MoveToSuccess,
    MoveToFailed,
}

/// Dry runs leave everything in place; real runs sort files by outcome so the
/// pending directory only ever holds unprocessed work.
pub fn verdict_for(mode: RunMode, success: bool) -> TriageVerdict {
    match (mode, success) {
        (RunMode::DryRun, _) => TriageVerdict::KeepPending,
        (RunMode::Apply, true) => TriageVerdict::MoveToSuccess,
        (RunMode::Apply, false) => TriageVerdict::MoveToFailed,
    }
}

/// Move the file per the verdict. Returns the new location, or None when the
/// file stays put.
pub fn apply_verdict(
    file: &Path,
    verdict: TriageVerdict,
    success_dir: &Path,
    failed_dir: &Path,
) -> Result<Option<PathBuf>> {
    let dest_dir = match verdict {
        TriageVerdict::KeepPending => return Ok(None),
        TriageVerdict::MoveToSuccess => success_dir,
        TriageVerdict::MoveToFailed => failed_dir,
    };
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("create {}", dest_dir.display()))?;
    let name = file
        .file_name()
        .with_context(|| format!("no file name in {}", file.display()))?;
    let dest = dest_dir.join(name);
    std::fs::rename(file, &dest)
        .with_context(|| format!("move {} -> {}", file.display(), dest.display()))?;
    info!(from = %file.display(), to = %dest.display(), "triaged");
    Ok(Some(dest))
}
