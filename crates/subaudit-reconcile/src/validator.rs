//! Checks an asserted commit out and confirms the repository agrees.

use std::path::Path;

use chrono::FixedOffset;
use subaudit_adapters::{VcsClient, VcsError, VcsOperation};
use subaudit_core::{parse_vcs_timestamp, CommitHash, Timestamp, TimestampError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CommitTimeError {
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

/// Drop quoting and any trailing `/path` a shell may have added to git output.
pub fn strip_shell_artifacts(output: &str) -> &str {
    let first_line = output.lines().next().unwrap_or_default().trim();
    let unquoted = first_line.trim_matches(|c| c == '\'' || c == '"');
    unquoted.split('/').next().unwrap_or_default().trim()
}

/// Check out `commit` and compare the resolved head with it.
///
/// On success the clone is tagged with `tag`. Any VCS failure is a `false`.
pub fn validate_commit(vcs: &dyn VcsClient, repo_path: &Path, commit: &CommitHash, tag: &str) -> bool {
    let checkout = VcsOperation::Checkout {
        commit: commit.as_str().to_string(),
    };
    if let Err(err) = vcs.execute(repo_path, &checkout) {
        debug!(commit = %commit, error = %err, "checkout failed");
        return false;
    }
    let head = match vcs.execute(repo_path, &VcsOperation::ShowHead) {
        Ok(head) => head,
        Err(err) => {
            warn!(commit = %commit, error = %err, "could not read back checked-out commit");
            return false;
        }
    };
    if strip_shell_artifacts(&head) != commit.as_str() {
        return false;
    }

    let tag_op = VcsOperation::Tag {
        name: tag.to_string(),
    };
    if let Err(err) = vcs.execute(repo_path, &tag_op) {
        warn!(commit = %commit, tag, error = %err, "tagging validated commit failed");
    }
    true
}

/// Committer time of `commit`, shifted into `reference`.
pub fn commit_time(
    vcs: &dyn VcsClient,
    repo_path: &Path,
    commit: &CommitHash,
    reference: FixedOffset,
) -> Result<Timestamp, CommitTimeError> {
    let raw = vcs.execute(
        repo_path,
        &VcsOperation::ShowCommitTime {
            commit: commit.as_str().to_string(),
        },
    )?;
    Ok(parse_vcs_timestamp(&raw, reference)?)
}
