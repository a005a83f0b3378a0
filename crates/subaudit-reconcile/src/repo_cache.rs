//! Local clones of student and team repositories.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use subaudit_adapters::{VcsClient, VcsError, VcsOperation};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Vcs(#[from] VcsError),
    #[error("repository {suffix} already failed this pass: {reason}")]
    Unavailable { suffix: String, reason: String },
}

/// Clones live at `{repo_dir}/{folder_prefix}{suffix}`.
///
/// `refreshed` is the per-run visited set: a suffix shared by several team
/// members is pulled at most once. `failed` remembers suffixes whose clone,
/// reset or pull failed during the current pass, so every entity sharing one
/// gets the same verdict without another attempt.
#[derive(Debug)]
pub struct RepoCache {
    repo_dir: PathBuf,
    folder_prefix: String,
    remote_base: String,
    refreshed: HashSet<String>,
    failed: HashMap<String, String>,
}

impl RepoCache {
    pub fn new(
        repo_dir: impl Into<PathBuf>,
        folder_prefix: impl Into<String>,
        vcs_domain: &str,
        vcs_context: &str,
    ) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            folder_prefix: folder_prefix.into(),
            remote_base: format!("https://{vcs_domain}/{vcs_context}"),
            refreshed: HashSet::new(),
            failed: HashMap::new(),
        }
    }

    pub fn repo_path(&self, suffix: &str) -> PathBuf {
        self.repo_dir.join(format!("{}{suffix}", self.folder_prefix))
    }

    pub fn remote_url(&self, suffix: &str) -> String {
        format!("{}/{}{suffix}.git", self.remote_base, self.folder_prefix)
    }

    /// Forget failures from the previous assignment pass.
    pub fn start_pass(&mut self) {
        self.failed.clear();
    }

    /// Make sure a clean clone for `suffix` exists and return its path.
    ///
    /// Clones when absent, always resets, and pulls only when `pull` is set and
    /// the suffix is either freshly cloned or not yet refreshed this run. A
    /// suffix that failed earlier in the pass is not tried again.
    pub fn ensure_repo(
        &mut self,
        vcs: &dyn VcsClient,
        suffix: &str,
        pull: bool,
    ) -> Result<PathBuf, RepoError> {
        if let Some(reason) = self.failed.get(suffix) {
            return Err(RepoError::Unavailable {
                suffix: suffix.to_string(),
                reason: reason.clone(),
            });
        }
        self.prepare(vcs, suffix, pull).map_err(|err| {
            self.failed.insert(suffix.to_string(), err.to_string());
            RepoError::Vcs(err)
        })
    }

    fn prepare(&mut self, vcs: &dyn VcsClient, suffix: &str, pull: bool) -> Result<PathBuf, VcsError> {
        let path = self.repo_path(suffix);
        let fresh = !path.is_dir();
        let cloned = if fresh {
            let url = self.remote_url(suffix);
            info!(repo_suffix = suffix, url = %url, "cloning repository");
            vcs.execute(&path, &VcsOperation::Clone { url }).map(drop)
        } else {
            Ok(())
        };

        let reset = vcs.execute(&path, &VcsOperation::Reset).map(drop);
        if let (Err(_), Err(err)) = (&cloned, &reset) {
            debug!(repo_suffix = suffix, error = %err, "reset after failed clone");
        }
        cloned?;
        reset?;

        if pull && (fresh || !self.refreshed.contains(suffix)) {
            debug!(repo_suffix = suffix, "refreshing repository");
            vcs.execute(&path, &VcsOperation::Pull)?;
            self.refreshed.insert(suffix.to_string());
        }
        Ok(path)
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fs;

    use super::*;

    #[derive(Default)]
    struct RecordingVcs {
        calls: RefCell<Vec<String>>,
        failing: Option<&'static str>,
    }

    impl RecordingVcs {
        fn failing(op: &'static str) -> Self {
            Self {
                failing: Some(op),
                ..Self::default()
            }
        }
    }

    impl VcsClient for RecordingVcs {
        fn execute(&self, repo_path: &Path, op: &VcsOperation) -> Result<String, VcsError> {
            self.calls.borrow_mut().push(op.name().to_string());
            if self.failing == Some(op.name()) {
                return Err(VcsError::Failed {
                    op: op.name(),
                    status: "exit status: 128".into(),
                    stderr: "fatal: could not read from remote repository".into(),
                });
            }
            if let VcsOperation::Clone { .. } = op {
                fs::create_dir_all(repo_path).expect("create clone dir");
            }
            Ok(String::new())
        }
    }

    fn cache(dir: &Path) -> RepoCache {
        RepoCache::new(dir, "6300Fall18", "github.example.edu", "course-2018fall")
    }

    #[test]
    fn paths_and_remotes_follow_the_prefix() {
        let cache = cache(Path::new("/srv/Repos"));
        assert_eq!(
            cache.repo_path("Team07"),
            PathBuf::from("/srv/Repos/6300Fall18Team07")
        );
        assert_eq!(
            cache.remote_url("jdoe3"),
            "https://github.example.edu/course-2018fall/6300Fall18jdoe3.git"
        );
    }

    #[test]
    fn shared_suffix_is_cloned_and_pulled_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vcs = RecordingVcs::default();
        let mut cache = cache(dir.path());

        cache.ensure_repo(&vcs, "Team07", true).expect("first member");
        cache.ensure_repo(&vcs, "Team07", true).expect("second member");

        assert_eq!(
            *vcs.calls.borrow(),
            vec!["clone", "reset", "pull", "reset"]
        );
    }

    #[test]
    fn existing_clone_is_pulled_once_then_only_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vcs = RecordingVcs::default();
        let mut cache = cache(dir.path());
        fs::create_dir_all(cache.repo_path("jdoe3")).expect("existing clone");

        cache.ensure_repo(&vcs, "jdoe3", true).expect("first");
        cache.ensure_repo(&vcs, "jdoe3", true).expect("second");
        assert_eq!(*vcs.calls.borrow(), vec!["reset", "pull", "reset"]);
        assert!(cache.refreshed.contains("jdoe3"));
    }

    #[test]
    fn pulling_disabled_never_pulls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vcs = RecordingVcs::default();
        let mut cache = cache(dir.path());

        cache.ensure_repo(&vcs, "jdoe3", false).expect("clone");
        assert_eq!(*vcs.calls.borrow(), vec!["clone", "reset"]);
    }

    #[test]
    fn failed_clone_is_reset_once_and_not_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vcs = RecordingVcs::failing("clone");
        let mut cache = cache(dir.path());

        assert!(matches!(
            cache.ensure_repo(&vcs, "Team07", true),
            Err(RepoError::Vcs(_))
        ));
        assert!(matches!(
            cache.ensure_repo(&vcs, "Team07", true),
            Err(RepoError::Unavailable { .. })
        ));
        assert_eq!(*vcs.calls.borrow(), vec!["clone", "reset"]);
    }

    #[test]
    fn failed_pull_fails_every_later_member_of_the_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vcs = RecordingVcs::failing("pull");
        let mut cache = cache(dir.path());
        fs::create_dir_all(cache.repo_path("Team07")).expect("existing clone");

        assert!(cache.ensure_repo(&vcs, "Team07", true).is_err());
        assert!(cache.ensure_repo(&vcs, "Team07", true).is_err());
        assert_eq!(*vcs.calls.borrow(), vec!["reset", "pull"]);

        cache.start_pass();
        assert!(cache.ensure_repo(&vcs, "Team07", true).is_err());
        assert_eq!(*vcs.calls.borrow(), vec!["reset", "pull", "reset", "pull"]);
        assert!(!cache.refreshed.contains("Team07"));
    }
}
