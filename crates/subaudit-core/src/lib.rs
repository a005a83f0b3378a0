//! Core domain model for submission lateness audits.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod time;

pub use time::{
    classify_submission, classify_vcs, normalize_platform_timestamp, parse_reference_offset,
    parse_vcs_timestamp, Timestamp, TimestampError,
};

pub const CRATE_NAME: &str = "subaudit-core";

pub const MISSING: &str = "Missing";
pub const INVALID: &str = "Invalid";
pub const NOT_APPLICABLE: &str = "N/A";
pub const ON_TIME: &str = "Ok";
pub const LATE: &str = "Late";

/// Classification of one time signal against a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Late,
    Missing,
    Invalid,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => ON_TIME,
            Status::Late => LATE,
            Status::Missing => MISSING,
            Status::Invalid => INVALID,
            Status::NotApplicable => NOT_APPLICABLE,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitParseError {
    #[error("commit id must be {expected} characters, got {len}", expected = CommitHash::LEN)]
    Length { len: usize },
    #[error("commit id contains non-alphanumeric character {0:?}")]
    Character(char),
}

/// A 40-character commit token as asserted by a student.
///
/// Alphanumeric rather than strictly hex: submissions are matched with the same
/// loose pattern the platform exports are scanned with, and validity is decided
/// later by checking the token out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitHash(String);

impl CommitHash {
    pub const LEN: usize = 40;

    pub fn parse(value: &str) -> Result<Self, CommitParseError> {
        if let Some(bad) = value.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(CommitParseError::Character(bad));
        }
        if value.len() != Self::LEN {
            return Err(CommitParseError::Length { len: value.len() });
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The commit identifier found in a submission, or the sentinel explaining its absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CommitRef {
    Hash(CommitHash),
    /// No submission artifact, or no platform timestamp for it.
    Missing,
    /// The artifact exists but holds no commit-shaped token.
    Invalid,
}

impl CommitRef {
    pub fn is_present(&self) -> bool {
        matches!(self, CommitRef::Hash(_))
    }

    pub fn hash(&self) -> Option<&CommitHash> {
        match self {
            CommitRef::Hash(hash) => Some(hash),
            CommitRef::Missing | CommitRef::Invalid => None,
        }
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitRef::Hash(hash) => f.write_str(hash.as_str()),
            CommitRef::Missing => f.write_str(MISSING),
            CommitRef::Invalid => f.write_str(INVALID),
        }
    }
}

impl From<CommitRef> for String {
    fn from(value: CommitRef) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for CommitRef {
    type Error = CommitParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            MISSING => Ok(CommitRef::Missing),
            INVALID => Ok(CommitRef::Invalid),
            other => CommitHash::parse(other).map(CommitRef::Hash),
        }
    }
}

/// Platform-side submission time signal.
///
/// T-Square exports an actual timestamp; Canvas only says whether the upload was
/// flagged late, so both shapes have to flow through the same classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubmissionStamp {
    At(Timestamp),
    FlaggedOnTime,
    FlaggedLate,
    Missing,
}

impl SubmissionStamp {
    pub fn is_missing(&self) -> bool {
        matches!(self, SubmissionStamp::Missing)
    }
}

impl fmt::Display for SubmissionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStamp::At(ts) => f.write_str(ts.as_str()),
            SubmissionStamp::FlaggedOnTime => f.write_str(ON_TIME),
            SubmissionStamp::FlaggedLate => f.write_str(LATE),
            SubmissionStamp::Missing => f.write_str(MISSING),
        }
    }
}

impl From<SubmissionStamp> for String {
    fn from(value: SubmissionStamp) -> Self {
        value.to_string()
    }
}

impl From<String> for SubmissionStamp {
    fn from(value: String) -> Self {
        match value.as_str() {
            MISSING => SubmissionStamp::Missing,
            ON_TIME => SubmissionStamp::FlaggedOnTime,
            LATE => SubmissionStamp::FlaggedLate,
            other => SubmissionStamp::At(Timestamp::from_normalized(other)),
        }
    }
}

/// Commit time read back from the repository, normalized to the reference offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VcsStamp {
    At(Timestamp),
    NotApplicable,
}

impl VcsStamp {
    pub fn timestamp(&self) -> Option<&Timestamp> {
        match self {
            VcsStamp::At(ts) => Some(ts),
            VcsStamp::NotApplicable => None,
        }
    }
}

impl fmt::Display for VcsStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VcsStamp::At(ts) => f.write_str(ts.as_str()),
            VcsStamp::NotApplicable => f.write_str(NOT_APPLICABLE),
        }
    }
}

impl From<VcsStamp> for String {
    fn from(value: VcsStamp) -> Self {
        value.to_string()
    }
}

impl From<String> for VcsStamp {
    fn from(value: String) -> Self {
        match value.as_str() {
            NOT_APPLICABLE => VcsStamp::NotApplicable,
            other => VcsStamp::At(Timestamp::from_normalized(other)),
        }
    }
}

/// Outcome of reconciling one entity against one assignment deadline.
///
/// Serialized field names are the ones graders read in the record store and in
/// the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    #[serde(rename = "commitID")]
    pub commit_id: CommitRef,
    #[serde(rename = "commitID valid", default, skip_serializing_if = "Option::is_none")]
    pub commit_valid: Option<bool>,
    #[serde(rename = "Timestamp Submission")]
    pub submission_timestamp: SubmissionStamp,
    #[serde(rename = "Timestamp VCS")]
    pub vcs_timestamp: VcsStamp,
    #[serde(rename = "Submission Time")]
    pub submission_status: Status,
    #[serde(rename = "Submission VCS")]
    pub vcs_status: Status,
}

impl ReconciliationResult {
    pub const FIELD_COMMIT_ID: &'static str = "commitID";
    pub const FIELD_COMMIT_VALID: &'static str = "commitID valid";
    pub const FIELD_SUBMISSION_TIMESTAMP: &'static str = "Timestamp Submission";
    pub const FIELD_VCS_TIMESTAMP: &'static str = "Timestamp VCS";
    pub const FIELD_SUBMISSION_STATUS: &'static str = "Submission Time";
    pub const FIELD_VCS_STATUS: &'static str = "Submission VCS";

    /// Every populated field as `(name, rendered value)`, sorted by name descending.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            (Self::FIELD_COMMIT_ID, self.commit_id.to_string()),
            (
                Self::FIELD_SUBMISSION_TIMESTAMP,
                self.submission_timestamp.to_string(),
            ),
            (Self::FIELD_VCS_TIMESTAMP, self.vcs_timestamp.to_string()),
            (Self::FIELD_SUBMISSION_STATUS, self.submission_status.to_string()),
            (Self::FIELD_VCS_STATUS, self.vcs_status.to_string()),
        ];
        if let Some(valid) = self.commit_valid {
            fields.push((Self::FIELD_COMMIT_VALID, valid.to_string()));
        }
        fields.sort_by(|a, b| b.0.cmp(a.0));
        fields
    }
}

/// Which external learning platform produced the submission export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(alias = "CANVAS")]
    Canvas,
    #[serde(alias = "TSQUARE", alias = "t-square")]
    TSquare,
}

/// Column order of a tab-separated roster export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterColumns {
    NameAccountPlatform,
    NamePlatformAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradingMode {
    Individual,
    Team,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub platform_id: String,
    pub account_id: String,
    pub display_name: String,
}

/// Persisted per-student record: identity plus one result per assignment alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    pub gt_id: String,
    #[serde(flatten)]
    pub assignments: BTreeMap<String, ReconciliationResult>,
}

impl StudentRecord {
    pub fn new(name: impl Into<String>, gt_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gt_id: gt_id.into(),
            assignments: BTreeMap::new(),
        }
    }
}

/// Student records keyed by platform id, plus the account -> platform id index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    pub records: BTreeMap<String, StudentRecord>,
    pub aliases: BTreeMap<String, String>,
}

impl Roster {
    pub fn insert(&mut self, entry: RosterEntry) {
        self.aliases
            .insert(entry.account_id.clone(), entry.platform_id.clone());
        self.records.insert(
            entry.platform_id,
            StudentRecord::new(entry.display_name, entry.account_id),
        );
    }

    pub fn platform_id_for(&self, account_id: &str) -> Option<&str> {
        self.aliases.get(account_id).map(String::as_str)
    }

    pub fn entry_for_account(&self, account_id: &str) -> Option<RosterEntry> {
        let platform_id = self.platform_id_for(account_id)?;
        let record = self.records.get(platform_id)?;
        Some(RosterEntry {
            platform_id: platform_id.to_string(),
            account_id: record.gt_id.clone(),
            display_name: record.name.clone(),
        })
    }

    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    pub fn record_for_account(&self, account_id: &str) -> Option<&StudentRecord> {
        self.records.get(self.platform_id_for(account_id)?)
    }

    pub fn result_for(&self, account_id: &str, alias: &str) -> Option<&ReconciliationResult> {
        self.record_for_account(account_id)?.assignments.get(alias)
    }

    /// Replace the stored result for `alias` wholesale. Other aliases are untouched.
    pub fn record_result(
        &mut self,
        platform_id: &str,
        alias: &str,
        result: ReconciliationResult,
    ) -> bool {
        match self.records.get_mut(platform_id) {
            Some(record) => {
                record.assignments.insert(alias.to_string(), result);
                true
            }
            None => false,
        }
    }
}

/// Team membership in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeamRoster {
    pub team_of: BTreeMap<String, String>,
    pub members: BTreeMap<String, Vec<String>>,
}

impl TeamRoster {
    pub fn insert(&mut self, account_id: impl Into<String>, team_id: impl Into<String>) {
        let account_id = account_id.into();
        let team_id = team_id.into();
        self.team_of.insert(account_id.clone(), team_id.clone());
        let members = self.members.entry(team_id).or_default();
        if !members.contains(&account_id) {
            members.push(account_id);
        }
    }

    pub fn team_of(&self, account_id: &str) -> Option<&str> {
        self.team_of.get(account_id).map(String::as_str)
    }

    pub fn members(&self, team_id: &str) -> Option<&[String]> {
        self.members.get(team_id).map(Vec::as_slice)
    }

    pub fn is_team(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    pub fn team_ids(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }
}
