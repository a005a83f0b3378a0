//! Maps roster entries to submission folders and accounts to repository suffixes.

use subaudit_core::{GradingMode, Roster, RosterEntry, TeamRoster};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("{0} is not in the roster")]
    NotInRoster(String),
    #[error("no team found for {0}")]
    UnknownTeam(String),
    #[error("no member of {0} uploaded a group submission")]
    NoGroupSubmission(String),
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    mode: GradingMode,
    teams: Option<TeamRoster>,
}

impl IdentityResolver {
    pub fn individual() -> Self {
        Self {
            mode: GradingMode::Individual,
            teams: None,
        }
    }

    pub fn team(teams: TeamRoster) -> Self {
        Self {
            mode: GradingMode::Team,
            teams: Some(teams),
        }
    }

    pub fn mode(&self) -> GradingMode {
        self.mode
    }

    pub fn teams(&self) -> Option<&TeamRoster> {
        self.teams.as_ref()
    }

    /// The account itself in individual mode, its team otherwise.
    ///
    /// An id that already names a team resolves to itself.
    pub fn resolve_repo_suffix(&self, entity_id: &str) -> Result<String, IdentityError> {
        match (self.mode, &self.teams) {
            (GradingMode::Individual, _) => Ok(entity_id.to_string()),
            (GradingMode::Team, Some(teams)) if teams.is_team(entity_id) => {
                Ok(entity_id.to_string())
            }
            (GradingMode::Team, Some(teams)) => teams
                .team_of(entity_id)
                .map(str::to_string)
                .ok_or_else(|| IdentityError::UnknownTeam(entity_id.to_string())),
            (GradingMode::Team, None) => Err(IdentityError::UnknownTeam(entity_id.to_string())),
        }
    }

    pub fn folder_name_for(entry: &RosterEntry) -> String {
        format!("{}({})", entry.display_name, entry.platform_id)
    }

    pub fn entry_for(roster: &Roster, account_id: &str) -> Result<RosterEntry, IdentityError> {
        roster
            .entry_for_account(account_id)
            .ok_or_else(|| IdentityError::NotInRoster(account_id.to_string()))
    }

    /// Teams to process, in order: the whitelist when given, otherwise every team.
    pub fn expand_teams(&self, whitelist: Option<&[String]>) -> Vec<String> {
        match (whitelist, &self.teams) {
            (Some(ids), _) => ids.to_vec(),
            (None, Some(teams)) => teams.team_ids().map(str::to_string).collect(),
            (None, None) => Vec::new(),
        }
    }

    /// Accounts to process, in order.
    ///
    /// Individual mode takes the whitelist as accounts. Team mode takes it as
    /// team ids and expands each into its members. Without a whitelist every
    /// account (or every team) is used.
    pub fn expand_accounts(&self, roster: &Roster, whitelist: Option<&[String]>) -> Vec<String> {
        match (self.mode, &self.teams) {
            (GradingMode::Team, Some(teams)) => {
                let mut accounts = Vec::new();
                for team_id in self.expand_teams(whitelist) {
                    for member in teams.members(&team_id).unwrap_or_default() {
                        if !accounts.contains(member) {
                            accounts.push(member.clone());
                        }
                    }
                }
                accounts
            }
            _ => match whitelist {
                Some(ids) => ids.to_vec(),
                None => roster.accounts().map(str::to_string).collect(),
            },
        }
    }

    /// Roster entries for a team's members; members who left the roster are dropped.
    pub fn team_entries(&self, roster: &Roster, team_id: &str) -> Result<Vec<RosterEntry>, IdentityError> {
        let members = self
            .teams
            .as_ref()
            .and_then(|teams| teams.members(team_id))
            .ok_or_else(|| IdentityError::UnknownTeam(team_id.to_string()))?;
        Ok(members
            .iter()
            .filter_map(|account| roster.entry_for_account(account))
            .collect())
    }
}
