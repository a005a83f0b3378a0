//! Version-control operations the reconciler needs, and a git subprocess client.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

pub const UNDECODABLE_OUTPUT: &str = "<undecodable error output>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsOperation {
    /// Clone `url` into the repository path.
    Clone { url: String },
    /// Discard uncommitted changes and untracked files.
    Reset,
    /// Refresh every remote ref and tag.
    Pull,
    Checkout { commit: String },
    Tag { name: String },
    /// Full hash of the checked-out commit.
    ShowHead,
    /// Committer time of `commit` in strict ISO 8601 with offset.
    ShowCommitTime { commit: String },
}

impl VcsOperation {
    pub fn name(&self) -> &'static str {
        match self {
            VcsOperation::Clone { .. } => "clone",
            VcsOperation::Reset => "reset",
            VcsOperation::Pull => "pull",
            VcsOperation::Checkout { .. } => "checkout",
            VcsOperation::Tag { .. } => "tag",
            VcsOperation::ShowHead => "show-head",
            VcsOperation::ShowCommitTime { .. } => "show-commit-time",
        }
    }
}

impl fmt::Display for VcsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("{op}: could not start {program}")]
    Spawn {
        op: &'static str,
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{op} failed ({status}): {stderr}")]
    Failed {
        op: &'static str,
        status: String,
        stderr: String,
    },
}

/// Blocking VCS capability. Calls run one at a time on the caller's thread.
pub trait VcsClient {
    fn execute(&self, repo_path: &Path, op: &VcsOperation) -> Result<String, VcsError>;
}

/// Decode failure output, falling back to a fixed placeholder.
pub fn decode_error_output(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim().to_string(),
        Err(_) => UNDECODABLE_OUTPUT.to_string(),
    }
}

/// Runs the `git` binary as a subprocess.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Argument lists for each git invocation `op` expands to, run in order.
    pub fn invocations(repo_path: &Path, op: &VcsOperation) -> Vec<Vec<OsString>> {
        let in_repo = |args: &[&str]| -> Vec<OsString> {
            let mut argv = vec![OsString::from("-C"), repo_path.as_os_str().to_owned()];
            argv.extend(args.iter().map(OsString::from));
            argv
        };
        match op {
            VcsOperation::Clone { url } => vec![vec![
                OsString::from("clone"),
                OsString::from(url),
                repo_path.as_os_str().to_owned(),
            ]],
            VcsOperation::Reset => vec![in_repo(&["reset", "--hard"]), in_repo(&["clean", "-fd"])],
            VcsOperation::Pull => vec![in_repo(&["fetch", "--all", "--tags", "--force"])],
            VcsOperation::Checkout { commit } => {
                vec![in_repo(&["checkout", "--quiet", commit.as_str()])]
            }
            VcsOperation::Tag { name } => vec![in_repo(&["tag", "-f", name.as_str()])],
            VcsOperation::ShowHead => {
                vec![in_repo(&["show", "--no-patch", "--pretty=format:%H"])]
            }
            VcsOperation::ShowCommitTime { commit } => {
                vec![in_repo(&["show", "-s", "--format=%cI", commit.as_str()])]
            }
        }
    }
}

impl VcsClient for GitCli {
    fn execute(&self, repo_path: &Path, op: &VcsOperation) -> Result<String, VcsError> {
        let mut stdout = String::new();
        for argv in Self::invocations(repo_path, op) {
            debug!(op = op.name(), repo = %repo_path.display(), "running git");
            let output = Command::new(&self.program)
                .args(&argv)
                .output()
                .map_err(|source| VcsError::Spawn {
                    op: op.name(),
                    program: self.program.display().to_string(),
                    source,
                })?;
            if !output.status.success() {
                return Err(VcsError::Failed {
                    op: op.name(),
                    status: output.status.to_string(),
                    stderr: decode_error_output(&output.stderr),
                });
            }
            stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        Ok(stdout)
    }
}
