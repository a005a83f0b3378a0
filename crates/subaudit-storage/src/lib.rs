//! Durable JSON stores for rosters, teams and reconciliation results.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use subaudit_core::{Roster, StudentRecord, TeamRoster};
use thiserror::Error;
use uuid::Uuid;

pub mod import;

pub use import::{parse_roster, parse_teams};

pub const CRATE_NAME: &str = "subaudit-storage";

pub const STUDENT_RECORDS_FILENAME: &str = "student_records.json";
pub const STUDENT_ALIASES_FILENAME: &str = "student_aliases.json";
pub const TEAM_RECORDS_FILENAME: &str = "student_records_teams.json";
pub const TEAM_MEMBERS_FILENAME: &str = "student_records_team_members.json";

const ROSTER_HINT: &str = "import the roster first";
const TEAMS_HINT: &str = "import the team list first";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("missing file {}: {hint}", .path.display())]
    Missing { path: PathBuf, hint: &'static str },
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
        source: serde_json::Error,
    },
    #[error("serializing {}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("writing {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The four JSON stores, all living under one directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn load_roster(&self) -> Result<Roster, StoreError> {
        let records: BTreeMap<String, StudentRecord> =
            read_json_file(&self.path(STUDENT_RECORDS_FILENAME), ROSTER_HINT)?;
        let aliases: BTreeMap<String, String> =
            read_json_file(&self.path(STUDENT_ALIASES_FILENAME), ROSTER_HINT)?;
        Ok(Roster { records, aliases })
    }

    pub fn save_roster(&self, roster: &Roster) -> Result<(), StoreError> {
        self.save_records(roster)?;
        write_json_atomic(&self.path(STUDENT_ALIASES_FILENAME), &roster.aliases)
    }

    /// Persist student records only; the alias index never changes during a pass.
    pub fn save_records(&self, roster: &Roster) -> Result<(), StoreError> {
        write_json_atomic(&self.path(STUDENT_RECORDS_FILENAME), &roster.records)
    }

    pub fn load_teams(&self) -> Result<TeamRoster, StoreError> {
        let team_of: BTreeMap<String, String> =
            read_json_file(&self.path(TEAM_RECORDS_FILENAME), TEAMS_HINT)?;
        let members: BTreeMap<String, Vec<String>> =
            read_json_file(&self.path(TEAM_MEMBERS_FILENAME), TEAMS_HINT)?;
        Ok(TeamRoster { team_of, members })
    }

    pub fn save_teams(&self, teams: &TeamRoster) -> Result<(), StoreError> {
        write_json_atomic(&self.path(TEAM_RECORDS_FILENAME), &teams.team_of)?;
        write_json_atomic(&self.path(TEAM_MEMBERS_FILENAME), &teams.members)
    }
}

pub(crate) fn read_text_file(path: &Path, hint: &'static str) -> Result<String, StoreError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            StoreError::Missing {
                path: path.to_path_buf(),
                hint,
            }
        } else {
            StoreError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn read_json_file<T: DeserializeOwned>(path: &Path, hint: &'static str) -> Result<T, StoreError> {
    let data = read_text_file(path, hint)?;
    serde_json::from_str(&data).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `value` and replace `path` through a temp file in the same directory.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');

    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(write_err)?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let written = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .and_then(|mut file| {
            file.write_all(&bytes)?;
            file.flush()
        });
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(write_err(err));
    }

    fs::rename(&temp_path, path).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        write_err(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use subaudit_core::RosterEntry;
    use tempfile::tempdir;

    fn roster() -> Roster {
        let mut roster = Roster::default();
        roster.insert(RosterEntry {
            platform_id: "12345".into(),
            account_id: "jdoe3".into(),
            display_name: "Jane Doe".into(),
        });
        roster
    }

    #[test]
    fn roster_round_trips_through_both_files() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        store.save_roster(&roster()).expect("save");

        assert!(store.path(STUDENT_RECORDS_FILENAME).exists());
        assert!(store.path(STUDENT_ALIASES_FILENAME).exists());
        assert_eq!(store.load_roster().expect("load"), roster());
    }

    #[test]
    fn rewriting_unchanged_state_is_byte_identical() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        let path = store.path(STUDENT_RECORDS_FILENAME);

        store.save_records(&roster()).expect("first save");
        let first = fs::read(&path).expect("read first");
        store.save_records(&roster()).expect("second save");
        let second = fs::read(&path).expect("read second");

        assert_eq!(first, second);
        let leftovers = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn missing_store_reports_the_path_and_a_hint() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());

        match store.load_teams() {
            Err(StoreError::Missing { path, hint }) => {
                assert!(path.ends_with(TEAM_RECORDS_FILENAME));
                assert_eq!(hint, TEAMS_HINT);
            }
            other => panic!("expected missing store error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_store_is_a_parse_error() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path());
        fs::write(store.path(STUDENT_RECORDS_FILENAME), "{not json").expect("write");
        fs::write(store.path(STUDENT_ALIASES_FILENAME), "{}").expect("write");

        assert!(matches!(store.load_roster(), Err(StoreError::Parse { .. })));
    }
}
