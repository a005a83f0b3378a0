//! Course settings and the per-assignment deadline table.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::Deserialize;
use subaudit_core::{parse_reference_offset, GradingMode, Platform, Timestamp, TimestampError};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILENAME: &str = "assignments.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("assignment {code}: deadline must be YYYY-MM-DDTHH:MM:SS in the reference offset")]
    Deadline {
        code: String,
        #[source]
        source: TimestampError,
    },
    #[error("course reference_offset is not a ±HH:MM offset")]
    ReferenceOffset(#[source] TimestampError),
    #[error("unknown assignment code {0:?}")]
    UnknownAssignment(String),
    #[error("assignment code {0:?} is listed more than once")]
    DuplicateAssignment(String),
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from("Repos")
}

fn default_submissions_dir() -> PathBuf {
    PathBuf::from("submissions")
}

fn default_reference_offset() -> String {
    "+00:00".to_string()
}

fn default_pull() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CourseSettings {
    /// Prepended to every account or team id to name its repository.
    pub folder_prefix: String,
    pub vcs_domain: String,
    pub vcs_context: String,
    pub platform: Platform,
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,
    #[serde(default = "default_submissions_dir")]
    pub submissions_dir: PathBuf,
    #[serde(default = "default_reference_offset")]
    pub reference_offset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentSpec {
    pub code: String,
    /// Submission folder name; doubles as the key results are stored under.
    pub alias: String,
    pub deadline: String,
    #[serde(default)]
    pub team: bool,
    #[serde(default = "default_pull")]
    pub pull: bool,
    #[serde(default)]
    pub whitelist: Option<PathBuf>,
    /// Team assignments only: one upload per team rather than per member.
    /// Defaults to on; individual team deliverables set it to false.
    #[serde(default)]
    pub group_submission: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentTable {
    pub course: CourseSettings,
    pub assignments: Vec<AssignmentSpec>,
}

/// Everything the engine needs about the course, with paths resolved.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub store_dir: PathBuf,
    pub submissions_dir: PathBuf,
    pub repo_dir: PathBuf,
    pub folder_prefix: String,
    pub vcs_domain: String,
    pub vcs_context: String,
    pub platform: Platform,
    pub reference_offset: FixedOffset,
}

/// One assignment pass, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentJob {
    pub code: String,
    pub alias: String,
    pub deadline: Timestamp,
    pub mode: GradingMode,
    pub pull: bool,
    pub whitelist: Option<Vec<String>>,
    pub group_submission: bool,
}

impl AssignmentTable {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        table.validate()?;
        Ok(table)
    }

    /// Deadlines and the reference offset are checked up front so a bad table
    /// fails before any entity is touched.
    fn validate(&self) -> Result<(), ConfigError> {
        parse_reference_offset(&self.course.reference_offset).map_err(ConfigError::ReferenceOffset)?;
        let mut seen = std::collections::BTreeSet::new();
        for spec in &self.assignments {
            if !seen.insert(spec.code.as_str()) {
                return Err(ConfigError::DuplicateAssignment(spec.code.clone()));
            }
            spec.parsed_deadline()?;
        }
        Ok(())
    }

    pub fn assignment(&self, code: &str) -> Result<&AssignmentSpec, ConfigError> {
        self.assignments
            .iter()
            .find(|spec| spec.code == code)
            .ok_or_else(|| ConfigError::UnknownAssignment(code.to_string()))
    }

    pub fn engine_settings(&self, root: &Path) -> Result<EngineSettings, ConfigError> {
        let course = &self.course;
        Ok(EngineSettings {
            store_dir: root.to_path_buf(),
            submissions_dir: root.join(&course.submissions_dir),
            repo_dir: root.join(&course.repo_dir),
            folder_prefix: course.folder_prefix.clone(),
            vcs_domain: course.vcs_domain.clone(),
            vcs_context: course.vcs_context.clone(),
            platform: course.platform,
            reference_offset: parse_reference_offset(&course.reference_offset)
                .map_err(ConfigError::ReferenceOffset)?,
        })
    }

    /// Resolve `code` into a job. `pull` and `whitelist` override the table when given.
    pub fn job(
        &self,
        code: &str,
        root: &Path,
        pull: Option<bool>,
        whitelist: Option<&Path>,
    ) -> Result<AssignmentJob, ConfigError> {
        let spec = self.assignment(code)?;
        let whitelist_path = whitelist
            .map(Path::to_path_buf)
            .or_else(|| spec.whitelist.as_ref().map(|path| root.join(path)));
        let whitelist = match whitelist_path {
            Some(path) => load_whitelist(&path)?,
            None => None,
        };
        Ok(AssignmentJob {
            code: spec.code.clone(),
            alias: spec.alias.clone(),
            deadline: spec.parsed_deadline()?,
            mode: spec.mode(),
            pull: pull.unwrap_or(spec.pull),
            whitelist,
            group_submission: spec.group_submission(),
        })
    }
}

impl AssignmentSpec {
    pub fn parsed_deadline(&self) -> Result<Timestamp, ConfigError> {
        Timestamp::parse_canonical(&self.deadline).map_err(|source| ConfigError::Deadline {
            code: self.code.clone(),
            source,
        })
    }

    pub fn group_submission(&self) -> bool {
        self.team && self.group_submission.unwrap_or(true)
    }

    pub fn mode(&self) -> GradingMode {
        if self.team {
            GradingMode::Team
        } else {
            GradingMode::Individual
        }
    }
}

/// Newline-separated ids. A file that does not exist means "everyone".
pub fn load_whitelist(path: &Path) -> Result<Option<Vec<String>>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Where the workspace and its configuration live, taken from the environment.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub root: PathBuf,
    pub config_path: PathBuf,
}

impl RunConfig {
    pub fn from_env() -> Self {
        let root = std::env::var("SUBAUDIT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let config_path = std::env::var("SUBAUDIT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join(DEFAULT_CONFIG_FILENAME));
        Self { root, config_path }
    }

    pub fn load_table(&self) -> Result<AssignmentTable, ConfigError> {
        AssignmentTable::load(&self.config_path)
    }
}
