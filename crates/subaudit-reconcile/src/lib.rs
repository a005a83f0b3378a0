//! Reconciliation engine: one pass per assignment over every graded entity.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use subaudit_adapters::{
    source_for_platform, GitCli, SubmissionArtifacts, SubmissionSource, VcsClient, VcsOperation,
};
use subaudit_core::{
    classify_submission, classify_vcs, GradingMode, Platform, ReconciliationResult, Roster,
    Status, TeamRoster, VcsStamp,
};
use subaudit_storage::{RecordStore, StoreError};
use thiserror::Error;
use tracing::{info, info_span, warn};
use uuid::Uuid;

pub mod config;
pub mod identity;
pub mod repo_cache;
pub mod report;
pub mod validator;

pub use config::{
    load_whitelist, AssignmentJob, AssignmentSpec, AssignmentTable, ConfigError, CourseSettings,
    EngineSettings, RunConfig,
};
pub use identity::{IdentityError, IdentityResolver};
pub use repo_cache::{RepoCache, RepoError};
pub use report::{generate_report, report_entities, Report, ReportEntity, TeeWriter};
pub use validator::{commit_time, strip_shell_artifacts, validate_commit};

pub const CRATE_NAME: &str = "subaudit-reconcile";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("submission folder {} not found; download it from {platform:?} first", .path.display())]
    SubmissionsMissing { path: PathBuf, platform: Platform },
    #[error("creating repository directory {}", .path.display())]
    RepoDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub run_id: Uuid,
    pub assignment: String,
    pub alias: String,
    pub mode: GradingMode,
    pub processed: usize,
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

struct Reconciled {
    platform_id: String,
    repo_suffix: String,
    result: ReconciliationResult,
}

/// Owns the loaded stores and the per-run repository cache.
///
/// Build one per run; nothing here outlives it except what is saved to disk.
pub struct Reconciler {
    settings: EngineSettings,
    store: RecordStore,
    roster: Roster,
    teams: Option<TeamRoster>,
    source: Box<dyn SubmissionSource>,
    vcs: Box<dyn VcsClient>,
    cache: RepoCache,
}

impl Reconciler {
    /// Loads the roster up front; a missing or malformed store stops the run here.
    pub fn new(settings: EngineSettings, vcs: Box<dyn VcsClient>) -> Result<Self, ReconcileError> {
        let store = RecordStore::new(&settings.store_dir);
        let roster = store.load_roster()?;
        let cache = RepoCache::new(
            &settings.repo_dir,
            &settings.folder_prefix,
            &settings.vcs_domain,
            &settings.vcs_context,
        );
        Ok(Self {
            source: source_for_platform(settings.platform),
            settings,
            store,
            roster,
            teams: None,
            vcs,
            cache,
        })
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn cache(&self) -> &RepoCache {
        &self.cache
    }

    fn load_teams(&mut self) -> Result<TeamRoster, ReconcileError> {
        if let Some(teams) = &self.teams {
            return Ok(teams.clone());
        }
        let teams = self.store.load_teams()?;
        self.teams = Some(teams.clone());
        Ok(teams)
    }

    fn resolver(&mut self, mode: GradingMode) -> Result<IdentityResolver, ReconcileError> {
        Ok(match mode {
            GradingMode::Individual => IdentityResolver::individual(),
            GradingMode::Team => IdentityResolver::team(self.load_teams()?),
        })
    }

    pub fn process_assignment(&mut self, job: &AssignmentJob) -> Result<ProcessSummary, ReconcileError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("assignment", code = %job.code, %run_id);
        let _guard = span.enter();

        let resolver = self.resolver(job.mode)?;
        let assignment_dir = self.settings.submissions_dir.join(&job.alias);
        if !assignment_dir.is_dir() {
            return Err(ReconcileError::SubmissionsMissing {
                path: assignment_dir,
                platform: self.settings.platform,
            });
        }
        let repo_dir = self.cache.repo_dir().to_path_buf();
        fs::create_dir_all(&repo_dir).map_err(|source| ReconcileError::RepoDir {
            path: repo_dir.clone(),
            source,
        })?;

        let grouped = job.mode == GradingMode::Team
            && job.group_submission
            && self.source.supports_group_submissions();
        let entities = if grouped {
            resolver.expand_teams(job.whitelist.as_deref())
        } else {
            resolver.expand_accounts(&self.roster, job.whitelist.as_deref())
        };
        info!(
            entities = entities.len(),
            grouped,
            deadline = %job.deadline,
            pull = job.pull,
            "processing assignment"
        );

        self.cache.start_pass();
        let mut processed = 0usize;
        let mut skipped = 0usize;
        let mut touched_suffixes = BTreeSet::new();
        for entity in &entities {
            let outcome = if grouped {
                self.reconcile_group(job, &resolver, &assignment_dir, entity)
            } else {
                self.reconcile_entity(job, &resolver, &assignment_dir, entity)
            };
            match outcome {
                Ok(reconciled) => {
                    self.roster
                        .record_result(&reconciled.platform_id, &job.alias, reconciled.result);
                    touched_suffixes.insert(reconciled.repo_suffix);
                    processed += 1;
                }
                Err(err) => {
                    warn!(entity = %entity, error = %err, "skipping entity");
                    skipped += 1;
                }
            }
        }

        self.store.save_records(&self.roster)?;

        if job.mode == GradingMode::Team {
            self.finalize_teams(job, &resolver, &touched_suffixes);
        }

        let finished_at = Utc::now();
        info!(processed, skipped, "assignment complete");
        Ok(ProcessSummary {
            run_id,
            assignment: job.code.clone(),
            alias: job.alias.clone(),
            mode: job.mode,
            processed,
            skipped,
            started_at,
            finished_at,
        })
    }

    fn reconcile_entity(
        &mut self,
        job: &AssignmentJob,
        resolver: &IdentityResolver,
        assignment_dir: &Path,
        account: &str,
    ) -> Result<Reconciled, IdentityError> {
        let entry = IdentityResolver::entry_for(&self.roster, account)?;
        let repo_suffix = resolver.resolve_repo_suffix(account)?;
        let folder = IdentityResolver::folder_name_for(&entry);
        let artifacts = self.source.read_submission(assignment_dir, &folder, &entry);
        let result = self.reconcile_artifacts(job, account, &repo_suffix, artifacts);
        Ok(Reconciled {
            platform_id: entry.platform_id,
            repo_suffix,
            result,
        })
    }

    /// One upload for the whole team; the result lands on the submitter's record.
    fn reconcile_group(
        &mut self,
        job: &AssignmentJob,
        resolver: &IdentityResolver,
        assignment_dir: &Path,
        team_id: &str,
    ) -> Result<Reconciled, IdentityError> {
        let repo_suffix = resolver.resolve_repo_suffix(team_id)?;
        let members = resolver.team_entries(&self.roster, team_id)?;
        let group = self
            .source
            .read_group_submission(assignment_dir, team_id, &members)
            .ok_or_else(|| IdentityError::NoGroupSubmission(team_id.to_string()))?;
        let submitter = group.submitter;
        let result = self.reconcile_artifacts(job, &submitter.account_id, &repo_suffix, group.artifacts);
        Ok(Reconciled {
            platform_id: submitter.platform_id,
            repo_suffix,
            result,
        })
    }

    fn reconcile_artifacts(
        &mut self,
        job: &AssignmentJob,
        account: &str,
        repo_suffix: &str,
        artifacts: SubmissionArtifacts,
    ) -> ReconciliationResult {
        let repo = match self.cache.ensure_repo(self.vcs.as_ref(), repo_suffix, job.pull) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(account, repo_suffix, error = %err, "repository unavailable");
                None
            }
        };

        let not_applicable = (VcsStamp::NotApplicable, Status::NotApplicable);
        let (commit_valid, (vcs_timestamp, vcs_status)) = match (artifacts.commit.hash(), repo) {
            (None, _) => (None, not_applicable),
            (Some(_), None) => (Some(false), not_applicable),
            (Some(hash), Some(path)) => {
                if !validate_commit(self.vcs.as_ref(), &path, hash, &job.code) {
                    (Some(false), not_applicable)
                } else {
                    match commit_time(
                        self.vcs.as_ref(),
                        &path,
                        hash,
                        self.settings.reference_offset,
                    ) {
                        Ok(committed) => {
                            let status = classify_vcs(&committed, &job.deadline);
                            (Some(true), (VcsStamp::At(committed), status))
                        }
                        Err(err) => {
                            warn!(account, commit = %hash, error = %err, "commit time unavailable");
                            (Some(true), not_applicable)
                        }
                    }
                }
            }
        };

        let submission_status = classify_submission(&artifacts.stamp, &job.deadline);
        ReconciliationResult {
            commit_id: artifacts.commit,
            commit_valid,
            submission_timestamp: artifacts.stamp,
            vcs_timestamp,
            submission_status,
            vcs_status,
        }
    }

    /// Leave each team clone on its most recent valid member commit, tagged.
    fn finalize_teams(
        &self,
        job: &AssignmentJob,
        resolver: &IdentityResolver,
        suffixes: &BTreeSet<String>,
    ) {
        let Some(teams) = resolver.teams() else {
            return;
        };
        for team_id in suffixes {
            let newest = teams
                .members(team_id)
                .unwrap_or_default()
                .iter()
                .filter_map(|member| self.roster.result_for(member, &job.alias))
                .filter(|result| result.commit_valid == Some(true))
                .filter_map(|result| Some((result.vcs_timestamp.timestamp()?, result.commit_id.hash()?)))
                .max();
            let Some((_, commit)) = newest else {
                warn!(team = %team_id, "no valid commit for team");
                continue;
            };

            let path = self.cache.repo_path(team_id);
            let ops = [
                VcsOperation::Checkout {
                    commit: commit.as_str().to_string(),
                },
                VcsOperation::Tag {
                    name: job.code.clone(),
                },
            ];
            match ops
                .iter()
                .try_for_each(|op| self.vcs.execute(&path, op).map(drop))
            {
                Ok(()) => info!(team = %team_id, commit = %commit, "team head tagged"),
                Err(err) => warn!(team = %team_id, error = %err, "could not settle team head"),
            }
        }
    }

    /// Build the report for `alias` from the loaded records.
    pub fn generate_report(
        &mut self,
        alias: &str,
        mode: GradingMode,
        ids: Option<&[String]>,
    ) -> Result<Report, ReconcileError> {
        let teams = match mode {
            GradingMode::Team => Some(self.load_teams()?),
            GradingMode::Individual => None,
        };
        let entities = report_entities(mode, &self.roster, teams.as_ref(), ids);
        Ok(generate_report(alias, &self.roster, &entities))
    }
}

/// `report_<code>_<team|student>.txt`
pub fn default_report_filename(code: &str, mode: GradingMode) -> String {
    let kind = match mode {
        GradingMode::Team => "team",
        GradingMode::Individual => "student",
    };
    format!("report_{code}_{kind}.txt")
}

/// Configuration and engine wiring for the current environment.
pub struct Workspace {
    pub run: RunConfig,
    pub table: AssignmentTable,
    pub settings: EngineSettings,
}

impl Workspace {
    pub fn from_env() -> anyhow::Result<Self> {
        let run = RunConfig::from_env();
        let table = run
            .load_table()
            .with_context(|| format!("loading {}", run.config_path.display()))?;
        let settings = table
            .engine_settings(&run.root)
            .context("resolving course settings")?;
        Ok(Self {
            run,
            table,
            settings,
        })
    }

    pub fn store(&self) -> RecordStore {
        RecordStore::new(&self.settings.store_dir)
    }

    pub fn roster_columns(&self) -> subaudit_core::RosterColumns {
        source_for_platform(self.settings.platform).roster_columns()
    }

    pub fn reconciler(&self) -> anyhow::Result<Reconciler> {
        Reconciler::new(self.settings.clone(), Box::new(GitCli::default()))
            .context("loading roster stores")
    }

    pub fn job(
        &self,
        code: &str,
        pull: Option<bool>,
        whitelist: Option<&Path>,
    ) -> anyhow::Result<AssignmentJob> {
        self.table
            .job(code, &self.run.root, pull, whitelist)
            .with_context(|| format!("preparing assignment {code}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_filenames_follow_the_mode() {
        assert_eq!(
            default_report_filename("A1", GradingMode::Individual),
            "report_A1_student.txt"
        );
        assert_eq!(default_report_filename("T2", GradingMode::Team), "report_T2_team.txt");
    }
}
