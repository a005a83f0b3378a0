use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use subaudit_core::GradingMode;
use subaudit_reconcile::{default_report_filename, load_whitelist, TeeWriter, Workspace};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "subaudit")]
#[command(about = "Audit student submissions against commit history and deadlines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import a tab-separated roster export, replacing the record stores.
    ImportRoster { file: PathBuf },
    /// Import a tab-separated team list.
    ImportTeams { file: PathBuf },
    /// Reconcile one or more assignments and print their reports.
    Process {
        #[arg(required = true)]
        codes: Vec<String>,
        /// Override the table's pull setting.
        #[arg(long)]
        pull: Option<bool>,
        #[arg(long)]
        whitelist: Option<PathBuf>,
        /// Report file; defaults to report_<code>_<team|student>.txt.
        #[arg(long, conflicts_with = "no_report")]
        report: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        no_report: bool,
    },
    /// Print the report for an already processed assignment.
    Report {
        code: String,
        #[arg(long)]
        whitelist: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workspace = Workspace::from_env()?;

    match cli.command {
        Commands::ImportRoster { file } => {
            let roster = workspace
                .store()
                .import_roster(&file, workspace.roster_columns())
                .with_context(|| format!("importing roster {}", file.display()))?;
            println!("imported {} students", roster.records.len());
        }
        Commands::ImportTeams { file } => {
            let teams = workspace
                .store()
                .import_teams(&file)
                .with_context(|| format!("importing teams {}", file.display()))?;
            println!(
                "imported {} teams ({} students)",
                teams.members.len(),
                teams.team_of.len()
            );
        }
        Commands::Process {
            codes,
            pull,
            whitelist,
            report,
            no_report,
        } => {
            let mut reconciler = workspace.reconciler()?;
            for code in &codes {
                let job = workspace.job(code, pull, whitelist.as_deref())?;
                let summary = reconciler
                    .process_assignment(&job)
                    .with_context(|| format!("processing assignment {code}"))?;
                println!("{}", serde_json::to_string(&summary)?);

                if no_report {
                    continue;
                }
                let path = report_path(&workspace, report.as_deref(), code, job.mode);
                let built = reconciler.generate_report(&job.alias, job.mode, job.whitelist.as_deref())?;
                write_report(&built, &path)?;
            }
        }
        Commands::Report {
            code,
            whitelist,
            output,
        } => {
            let spec = workspace.table.assignment(&code)?;
            let ids = match whitelist {
                Some(path) => load_whitelist(&path)?,
                None => None,
            };
            let mut reconciler = workspace.reconciler()?;
            let built = reconciler.generate_report(&spec.alias, spec.mode(), ids.as_deref())?;
            let path = report_path(&workspace, output.as_deref(), &code, spec.mode());
            write_report(&built, &path)?;
        }
    }

    Ok(())
}

fn report_path(workspace: &Workspace, explicit: Option<&Path>, code: &str, mode: GradingMode) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => workspace.run.root.join(default_report_filename(code, mode)),
    }
}

fn write_report(report: &subaudit_reconcile::Report, path: &Path) -> Result<()> {
    let mut sink = TeeWriter::stdout()
        .with_file(path)
        .with_context(|| format!("creating {}", path.display()))?;
    report
        .write_to(&mut sink)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}
