//! Tab-separated roster and team exports from the learning platform.

use std::path::Path;

use subaudit_core::{Roster, RosterColumns, RosterEntry, TeamRoster};
use tracing::{info, warn};

use crate::{read_text_file, RecordStore, StoreError};

const IMPORT_HINT: &str = "export it from the learning platform";
const DEFAULT_TEAM: &str = "None";

pub fn parse_roster(text: &str, columns: RosterColumns) -> Roster {
    let mut roster = Roster::default();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() < 3 {
            warn!(line = index + 1, content = line, "skipping roster line with fewer than 3 columns");
            continue;
        }
        let (platform_id, account_id) = match columns {
            RosterColumns::NameAccountPlatform => (fields[2], fields[1]),
            RosterColumns::NamePlatformAccount => (fields[1], fields[2]),
        };
        roster.insert(RosterEntry {
            platform_id: platform_id.to_string(),
            account_id: account_id.to_string(),
            display_name: fields[0].to_string(),
        });
    }
    roster
}

/// `account \t <unused> \t team`; a missing team column means team `"None"`.
pub fn parse_teams(text: &str) -> TeamRoster {
    let mut teams = TeamRoster::default();
    for line in text.lines() {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        let account = fields[0];
        if account.is_empty() {
            continue;
        }
        let team = fields
            .get(2)
            .copied()
            .filter(|team| !team.is_empty())
            .unwrap_or(DEFAULT_TEAM);
        teams.insert(account, team);
    }
    teams
}

impl RecordStore {
    /// Replace the record store and alias index with the contents of `input`.
    pub fn import_roster(
        &self,
        input: &Path,
        columns: RosterColumns,
    ) -> Result<Roster, StoreError> {
        let text = read_text_file(input, IMPORT_HINT)?;
        let roster = parse_roster(&text, columns);
        self.save_roster(&roster)?;
        info!(
            input = %input.display(),
            students = roster.records.len(),
            "roster imported"
        );
        Ok(roster)
    }

    pub fn import_teams(&self, input: &Path) -> Result<TeamRoster, StoreError> {
        let text = read_text_file(input, IMPORT_HINT)?;
        let teams = parse_teams(&text);
        self.save_teams(&teams)?;
        info!(
            input = %input.display(),
            teams = teams.members.len(),
            "team list imported"
        );
        Ok(teams)
    }
}
