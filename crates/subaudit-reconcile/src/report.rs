//! Grader-facing audit report and the tee sink it is written through.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use subaudit_core::{CommitRef, GradingMode, ReconciliationResult, Roster, Status, TeamRoster};

pub const NO_RECORDS: &str = "No records found";
pub const NOT_IN_ROSTER: &str = "Missing in roster";

/// One row of the entity walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEntity {
    TeamHeader(String),
    Account(String),
}

/// Rendered detail lines plus the failure buckets they produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub lines: Vec<String>,
    pub late_submissions: Vec<String>,
    pub late_vcs: Vec<String>,
    pub missing: Vec<String>,
    pub bad_commits: Vec<String>,
    pub not_in_roster: Vec<String>,
}

/// Team headers followed by their members in team mode, plain accounts otherwise.
pub fn report_entities(
    mode: GradingMode,
    roster: &Roster,
    teams: Option<&TeamRoster>,
    ids: Option<&[String]>,
) -> Vec<ReportEntity> {
    let clean = |ids: &[String]| -> Vec<String> {
        ids.iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    };
    match (mode, teams) {
        (GradingMode::Team, Some(teams)) => {
            let team_ids = match ids {
                Some(ids) => clean(ids),
                None => teams.team_ids().map(str::to_string).collect(),
            };
            let mut entities = Vec::new();
            for team_id in team_ids {
                let members = teams.members(&team_id).unwrap_or_default().to_vec();
                entities.push(ReportEntity::TeamHeader(team_id));
                entities.extend(members.into_iter().map(ReportEntity::Account));
            }
            entities
        }
        _ => {
            let accounts = match ids {
                Some(ids) => clean(ids),
                None => roster.accounts().map(str::to_string).collect(),
            };
            accounts.into_iter().map(ReportEntity::Account).collect()
        }
    }
}

pub fn generate_report(alias: &str, roster: &Roster, entities: &[ReportEntity]) -> Report {
    let mut report = Report::default();
    report.lines.push(format!("Report: {alias}"));
    report.lines.push(String::new());

    for entity in entities {
        let account = match entity {
            ReportEntity::TeamHeader(team_id) => {
                report.lines.push(String::new());
                report.lines.push(format!("========== {team_id} =========="));
                continue;
            }
            ReportEntity::Account(account) => account,
        };
        report.lines.push(account.clone());

        if roster.record_for_account(account).is_none() {
            report.lines.push(format!("\t{NOT_IN_ROSTER}"));
            report.not_in_roster.push(account.clone());
            continue;
        }
        match roster.result_for(account, alias) {
            None => {
                report.lines.push(format!("\t{NO_RECORDS}"));
                report.missing.push(account.clone());
            }
            Some(result) => {
                for (field, value) in result.fields() {
                    report.lines.push(format!("\t{field}: {value}"));
                }
                report.bucket(account, result);
            }
        }
    }
    report
}

impl Report {
    fn bucket(&mut self, account: &str, result: &ReconciliationResult) {
        match result.submission_status {
            Status::Late => self.late_submissions.push(account.to_string()),
            Status::Ok | Status::Missing | Status::Invalid | Status::NotApplicable => {}
        }
        match result.vcs_status {
            Status::Late => self.late_vcs.push(account.to_string()),
            Status::Ok | Status::Missing | Status::Invalid | Status::NotApplicable => {}
        }
        match result.commit_id {
            CommitRef::Missing => self.missing.push(account.to_string()),
            CommitRef::Hash(_) | CommitRef::Invalid => {}
        }
        match result.commit_valid {
            Some(false) => self.bad_commits.push(account.to_string()),
            Some(true) | None => {}
        }
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let line = |label: &str, ids: &[String]| format!("{label} ({}): {}", ids.len(), ids.join(", "));
        let mut lines = vec![
            String::new(),
            "========== RESULTS ==========".to_string(),
            line("Late submissions", &self.late_submissions),
            line("Late commits", &self.late_vcs),
            line("Missing submissions", &self.missing),
            line("Bad commits", &self.bad_commits),
        ];
        if !self.not_in_roster.is_empty() {
            lines.push(line("Missing in roster", &self.not_in_roster));
        }
        lines
    }

    pub fn write_to(&self, sink: &mut TeeWriter) -> io::Result<()> {
        let summary = self.summary_lines();
        for line in self.lines.iter().chain(summary.iter()) {
            sink.write_line(line)?;
        }
        Ok(())
    }
}

/// Writes every line to each sink in turn and flushes before the next line.
pub struct TeeWriter {
    sinks: Vec<Box<dyn Write>>,
}

impl TeeWriter {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn stdout() -> Self {
        Self::new().with_sink(Box::new(io::stdout()))
    }

    pub fn with_sink(mut self, sink: Box<dyn Write>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_file(self, path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(self.with_sink(Box::new(file)))
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        for sink in &mut self.sinks {
            writeln!(sink, "{line}")?;
            sink.flush()?;
        }
        Ok(())
    }
}

impl Default for TeeWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use subaudit_core::{CommitHash, RosterEntry, SubmissionStamp, Timestamp, VcsStamp};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn roster() -> Roster {
        let mut roster = Roster::default();
        for (pid, account, name) in [
            ("1", "jdoe3", "Jane Doe"),
            ("2", "asmith9", "Al Smith"),
            ("3", "bwayne1", "Bruce Wayne"),
        ] {
            roster.insert(RosterEntry {
                platform_id: pid.into(),
                account_id: account.into(),
                display_name: name.into(),
            });
        }
        roster
    }

    fn late_commit() -> ReconciliationResult {
        ReconciliationResult {
            commit_id: CommitRef::Hash(
                CommitHash::parse("f556b4ba7e222de302b367b1dceeff89bd233191").unwrap(),
            ),
            commit_valid: Some(true),
            submission_timestamp: SubmissionStamp::At(
                Timestamp::parse_canonical("2018-09-01T23:00:00").unwrap(),
            ),
            vcs_timestamp: VcsStamp::At(Timestamp::parse_canonical("2018-09-02T00:00:00").unwrap()),
            submission_status: Status::Ok,
            vcs_status: Status::Late,
        }
    }

    fn bad_commit() -> ReconciliationResult {
        ReconciliationResult {
            commit_valid: Some(false),
            vcs_timestamp: VcsStamp::NotApplicable,
            vcs_status: Status::NotApplicable,
            ..late_commit()
        }
    }

    #[test]
    fn entity_without_a_result_lands_in_missing_once() {
        let mut roster = roster();
        roster.record_result("1", "A2", late_commit());
        let entities = report_entities(GradingMode::Individual, &roster, None, Some(&["jdoe3".into()]));

        let report = generate_report("A3", &roster, &entities);
        assert_eq!(report.lines, vec!["Report: A3", "", "jdoe3", "\tNo records found"]);
        assert_eq!(report.missing, vec!["jdoe3"]);
        assert!(report.late_vcs.is_empty());
    }

    #[test]
    fn results_are_bucketed_by_typed_fields() {
        let mut roster = roster();
        roster.record_result("1", "A1", late_commit());
        roster.record_result("2", "A1", bad_commit());
        let entities = report_entities(GradingMode::Individual, &roster, None, None);

        let report = generate_report("A1", &roster, &entities);
        assert_eq!(report.late_vcs, vec!["jdoe3"]);
        assert_eq!(report.bad_commits, vec!["asmith9"]);
        assert_eq!(report.missing, vec!["bwayne1"]);
        assert!(report.late_submissions.is_empty());

        let jdoe = report.lines.iter().position(|l| l == "jdoe3").unwrap();
        assert_eq!(report.lines[jdoe + 1], "\tcommitID valid: true");
        assert_eq!(report.lines[jdoe + 6], "\tSubmission Time: Ok");
    }

    #[test]
    fn team_mode_emits_headers_then_members() {
        let mut teams = TeamRoster::default();
        teams.insert("jdoe3", "Team07");
        teams.insert("ghost9", "Team07");
        let roster = roster();

        let entities = report_entities(GradingMode::Team, &roster, Some(&teams), None);
        assert_eq!(
            entities,
            vec![
                ReportEntity::TeamHeader("Team07".into()),
                ReportEntity::Account("jdoe3".into()),
                ReportEntity::Account("ghost9".into()),
            ]
        );

        let report = generate_report("T_D1", &roster, &entities);
        assert!(report.lines.contains(&"========== Team07 ==========".to_string()));
        assert_eq!(report.not_in_roster, vec!["ghost9"]);
        assert_eq!(
            report.summary_lines().last().unwrap(),
            "Missing in roster (1): ghost9"
        );
    }

    #[test]
    fn summary_always_has_four_lines() {
        let summary = Report::default().summary_lines();
        assert_eq!(
            &summary[2..],
            &[
                "Late submissions (0): ",
                "Late commits (0): ",
                "Missing submissions (0): ",
                "Bad commits (0): ",
            ]
        );
    }

    #[test]
    fn both_sinks_receive_identical_lines() {
        let first = SharedBuf::default();
        let second = SharedBuf::default();
        let mut tee = TeeWriter::new()
            .with_sink(Box::new(first.clone()))
            .with_sink(Box::new(second.clone()));

        let mut report = Report::default();
        report.lines = vec!["Report: A1".into(), "jdoe3".into()];
        report.late_vcs.push("jdoe3".into());
        report.write_to(&mut tee).unwrap();

        let a = String::from_utf8(first.0.borrow().clone()).unwrap();
        let b = String::from_utf8(second.0.borrow().clone()).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("Late commits (1): jdoe3\n"));
    }
}
