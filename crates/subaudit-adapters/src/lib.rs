//! Submission-source strategies for platform exports, plus the VCS client seam.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use subaudit_core::{
    normalize_platform_timestamp, CommitHash, CommitRef, Platform, RosterColumns, RosterEntry,
    SubmissionStamp,
};
use tracing::{debug, warn};

pub mod vcs;

pub use vcs::{GitCli, VcsClient, VcsError, VcsOperation};

pub const CRATE_NAME: &str = "subaudit-adapters";

pub const TIMESTAMP_FILENAME: &str = "timestamp.txt";

static COMMIT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9A-Za-z]{40}").expect("commit token pattern is valid")
});

/// What a platform export says about one student's submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionArtifacts {
    pub commit: CommitRef,
    pub stamp: SubmissionStamp,
}

impl SubmissionArtifacts {
    pub fn missing() -> Self {
        Self {
            commit: CommitRef::Missing,
            stamp: SubmissionStamp::Missing,
        }
    }
}

/// A team's single uploaded file and the member who uploaded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSubmission {
    pub submitter: RosterEntry,
    pub artifacts: SubmissionArtifacts,
}

pub trait SubmissionSource {
    fn platform(&self) -> Platform;

    /// Column order of this platform's roster export.
    fn roster_columns(&self) -> RosterColumns;

    /// Read the submission text and time signal for `entry`.
    ///
    /// `folder` is the `Name(platform_id)` folder name; flat exports ignore it.
    fn read_submission(
        &self,
        assignment_dir: &Path,
        folder: &str,
        entry: &RosterEntry,
    ) -> SubmissionArtifacts;

    /// Whether this platform exports one file per team for group assignments.
    fn supports_group_submissions(&self) -> bool {
        false
    }

    /// Find the file `team_id` uploaded as a group, trying each member in order.
    fn read_group_submission(
        &self,
        _assignment_dir: &Path,
        _team_id: &str,
        _members: &[RosterEntry],
    ) -> Option<GroupSubmission> {
        None
    }
}

pub fn source_for_platform(platform: Platform) -> Box<dyn SubmissionSource> {
    match platform {
        Platform::TSquare => Box::new(TSquareSource),
        Platform::Canvas => Box::new(CanvasSource),
    }
}

/// First 40-character alphanumeric run in `text`, or `Invalid` when there is none.
pub fn extract_commit_token(text: &str) -> CommitRef {
    COMMIT_TOKEN
        .find(text)
        .and_then(|m| CommitHash::parse(m.as_str()).ok())
        .map(CommitRef::Hash)
        .unwrap_or(CommitRef::Invalid)
}

/// Scan a submission text file. An unreadable file yields `Missing`.
pub fn read_commit_token(path: &Path) -> CommitRef {
    match fs::read(path) {
        Ok(bytes) => extract_commit_token(&String::from_utf8_lossy(&bytes)),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "submission text unreadable");
            CommitRef::Missing
        }
    }
}

/// One folder per student holding the submission text and a compact timestamp file.
#[derive(Debug, Clone, Copy, Default)]
pub struct TSquareSource;

impl TSquareSource {
    pub fn submission_file_name(folder: &str) -> String {
        format!("{folder}_submissionText.html")
    }

    fn read_stamp(path: &Path) -> SubmissionStamp {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return SubmissionStamp::Missing,
        };
        match normalize_platform_timestamp(&raw) {
            Ok(ts) => SubmissionStamp::At(ts),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unusable platform timestamp");
                SubmissionStamp::Missing
            }
        }
    }
}

impl SubmissionSource for TSquareSource {
    fn platform(&self) -> Platform {
        Platform::TSquare
    }

    fn roster_columns(&self) -> RosterColumns {
        RosterColumns::NameAccountPlatform
    }

    fn read_submission(
        &self,
        assignment_dir: &Path,
        folder: &str,
        _entry: &RosterEntry,
    ) -> SubmissionArtifacts {
        let dir = assignment_dir.join(folder);
        let stamp = Self::read_stamp(&dir.join(TIMESTAMP_FILENAME));
        if stamp.is_missing() {
            // No platform time means the submission never completed.
            return SubmissionArtifacts::missing();
        }
        SubmissionArtifacts {
            commit: read_commit_token(&dir.join(Self::submission_file_name(folder))),
            stamp,
        }
    }
}

/// A single flat folder; lateness is encoded in the file name rather than a timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanvasSource;

impl CanvasSource {
    pub fn squash_name(display_name: &str) -> String {
        display_name
            .chars()
            .filter(|c| !matches!(c, ',' | ' ' | '-' | '.' | '\''))
            .collect::<String>()
            .to_lowercase()
    }

    pub fn submission_file_name(display_name: &str, platform_id: &str, late: bool) -> String {
        let label = if late { "late_" } else { "" };
        format!(
            "{}_{label}{platform_id}_text.html",
            Self::squash_name(display_name)
        )
    }

    fn candidates(
        assignment_dir: &Path,
        name: &str,
        platform_id: &str,
    ) -> [(PathBuf, SubmissionStamp); 2] {
        [
            (
                assignment_dir.join(Self::submission_file_name(name, platform_id, false)),
                SubmissionStamp::FlaggedOnTime,
            ),
            (
                assignment_dir.join(Self::submission_file_name(name, platform_id, true)),
                SubmissionStamp::FlaggedLate,
            ),
        ]
    }

    fn read_named(assignment_dir: &Path, name: &str, platform_id: &str) -> Option<SubmissionArtifacts> {
        Self::candidates(assignment_dir, name, platform_id)
            .into_iter()
            .find_map(|(path, stamp)| {
                let bytes = fs::read(&path).ok()?;
                Some(SubmissionArtifacts {
                    commit: extract_commit_token(&String::from_utf8_lossy(&bytes)),
                    stamp,
                })
            })
    }
}

impl SubmissionSource for CanvasSource {
    fn platform(&self) -> Platform {
        Platform::Canvas
    }

    fn roster_columns(&self) -> RosterColumns {
        RosterColumns::NamePlatformAccount
    }

    fn read_submission(
        &self,
        assignment_dir: &Path,
        _folder: &str,
        entry: &RosterEntry,
    ) -> SubmissionArtifacts {
        Self::read_named(assignment_dir, &entry.display_name, &entry.platform_id)
            .unwrap_or_else(SubmissionArtifacts::missing)
    }

    fn supports_group_submissions(&self) -> bool {
        true
    }

    /// Group files are named after the team, with the uploader's platform id:
    /// `team07_<platform_id>[_late]_text.html`.
    fn read_group_submission(
        &self,
        assignment_dir: &Path,
        team_id: &str,
        members: &[RosterEntry],
    ) -> Option<GroupSubmission> {
        let found = members.iter().find_map(|member| {
            Self::read_named(assignment_dir, team_id, &member.platform_id).map(|artifacts| {
                GroupSubmission {
                    submitter: member.clone(),
                    artifacts,
                }
            })
        });
        if found.is_none() {
            let tried: Vec<&str> = members.iter().map(|m| m.account_id.as_str()).collect();
            warn!(team = team_id, tried = ?tried, "no group submission file found");
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subaudit_core::Timestamp;

    const HASH: &str = "f556b4ba7e222de302b367b1dceeff89bd233191";

    fn fixture_dir(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .join(name)
    }

    fn jane() -> RosterEntry {
        RosterEntry {
            platform_id: "12345".into(),
            account_id: "jdoe3".into(),
            display_name: "Doe, Jane".into(),
        }
    }

    #[test]
    fn first_token_wins_and_absence_is_invalid() {
        let text = format!("<p>commit {HASH}</p><p>{}</p>", "a".repeat(40));
        assert_eq!(extract_commit_token(&text).to_string(), HASH);
        assert_eq!(extract_commit_token("<p>forgot it</p>"), CommitRef::Invalid);
        assert_eq!(extract_commit_token(&HASH[..39]), CommitRef::Invalid);
    }

    #[test]
    fn unreadable_submission_text_is_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(read_commit_token(&dir.path().join("nope.html")), CommitRef::Missing);
    }

    #[test]
    fn tsquare_export_yields_commit_and_normalized_timestamp() {
        let folder = "Doe, Jane(12345)";
        let artifacts = TSquareSource.read_submission(&fixture_dir("tsquare-export"), folder, &jane());

        assert_eq!(artifacts.commit.to_string(), HASH);
        assert_eq!(
            artifacts.stamp,
            SubmissionStamp::At(Timestamp::parse_canonical("2018-09-01T23:10:05").expect("ts"))
        );
    }

    #[test]
    fn tsquare_missing_timestamp_voids_the_commit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let folder = "Doe, Jane(12345)";
        fs::create_dir_all(dir.path().join(folder)).expect("mkdir");
        fs::write(
            dir.path().join(folder).join(TSquareSource::submission_file_name(folder)),
            HASH,
        )
        .expect("write");

        let artifacts = TSquareSource.read_submission(dir.path(), folder, &jane());
        assert_eq!(artifacts, SubmissionArtifacts::missing());
    }

    #[test]
    fn canvas_names_are_squashed() {
        assert_eq!(CanvasSource::squash_name("O'Neil-Smith, Mary J."), "oneilsmithmaryj");
        assert_eq!(
            CanvasSource::submission_file_name("Doe, Jane", "98765", true),
            "doejane_late_98765_text.html"
        );
    }

    #[test]
    fn canvas_export_uses_the_late_flag_as_the_time_signal() {
        let dir = fixture_dir("canvas-export");
        let on_time = RosterEntry {
            platform_id: "98765".into(),
            account_id: "jdoe3".into(),
            display_name: "Doe, Jane".into(),
        };
        let late = RosterEntry {
            platform_id: "55501".into(),
            account_id: "jroe7".into(),
            display_name: "Roe, John".into(),
        };
        let absent = RosterEntry {
            platform_id: "11111".into(),
            account_id: "nobody1".into(),
            display_name: "Body, No".into(),
        };

        let first = CanvasSource.read_submission(&dir, "", &on_time);
        assert_eq!(first.stamp, SubmissionStamp::FlaggedOnTime);
        assert_eq!(first.commit.to_string(), HASH);

        let second = CanvasSource.read_submission(&dir, "", &late);
        assert_eq!(second.stamp, SubmissionStamp::FlaggedLate);
        assert_eq!(second.commit, CommitRef::Invalid);

        assert_eq!(
            CanvasSource.read_submission(&dir, "", &absent),
            SubmissionArtifacts::missing()
        );
    }

    #[test]
    fn platforms_pick_their_roster_layout() {
        assert_eq!(
            source_for_platform(Platform::TSquare).roster_columns(),
            RosterColumns::NameAccountPlatform
        );
        assert_eq!(
            source_for_platform(Platform::Canvas).roster_columns(),
            RosterColumns::NamePlatformAccount
        );
    }

    #[test]
    fn canvas_group_file_is_found_under_any_member() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("team07_55501_late_text.html"), HASH).expect("write");
        let members = [
            jane(),
            RosterEntry {
                platform_id: "55501".into(),
                account_id: "jroe7".into(),
                display_name: "Roe, John".into(),
            },
        ];

        let group = CanvasSource
            .read_group_submission(dir.path(), "Team07", &members)
            .expect("group file");
        assert_eq!(group.submitter.account_id, "jroe7");
        assert_eq!(group.artifacts.stamp, SubmissionStamp::FlaggedLate);
        assert_eq!(group.artifacts.commit.to_string(), HASH);

        assert_eq!(CanvasSource.read_group_submission(dir.path(), "Team02", &members), None);
        assert!(!TSquareSource.supports_group_submissions());
        assert_eq!(TSquareSource.read_group_submission(dir.path(), "Team07", &members), None);
    }
}
