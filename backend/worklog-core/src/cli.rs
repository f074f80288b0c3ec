// src/cli.rs
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "worklog",
    version,
    about = "Reconcile daily activity logs and report productivity"
)]
pub struct Cli {
    /// Override DATABASE_URL from the environment
    #[arg(long, global = true, value_name = "URL")]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Cmds>,
}

#[derive(Subcommand, Debug)]
pub enum Cmds {
    /// Run the HTTP server (default)
    Serve,
    /// Print one subject's monthly report
    Report(ReportCmd),
    /// Print the manager rollup for a month
    Fleet(PeriodArgs),
    /// Write one subject's monthly table as CSV
    Export(ExportCmd),
}

#[derive(Parser, Debug, Clone, Default)]
pub struct PeriodArgs {
    /// Month, 1-12 or zero-padded. Defaults to the current month
    #[arg(short, long)]
    pub month: Option<String>,

    /// Year. Defaults to the current year
    #[arg(short, long)]
    pub year: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ReportCmd {
    #[arg(value_name = "SUBJECT")]
    pub subject: String,

    #[command(flatten)]
    pub period: PeriodArgs,

    /// Include the activities of one day (YYYY-MM-DD)
    #[arg(short, long, value_name = "DATE")]
    pub day: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ExportCmd {
    #[arg(value_name = "SUBJECT")]
    pub subject: String,

    #[command(flatten)]
    pub period: PeriodArgs,

    /// Output file; stdout when omitted
    #[arg(short, long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_takes_subject_and_period_flags() {
        let cli = Cli::try_parse_from(["worklog", "export", "alice", "-m", "3", "-y", "2024"]).unwrap();
        match cli.command {
            Some(Cmds::Export(cmd)) => {
                assert_eq!(cmd.subject, "alice");
                assert_eq!(cmd.period.month.as_deref(), Some("3"));
                assert_eq!(cmd.period.year.as_deref(), Some("2024"));
                assert!(cmd.out.is_none());
            }
            other => panic!("Expected export command, got {:?}", other),
        }
        assert!(cli.database_url.is_none());
    }

    #[test]
    fn database_url_is_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "worklog",
            "report",
            "bob",
            "--day",
            "2024-03-05",
            "--database-url",
            "sqlite::memory:",
        ])
        .unwrap();
        assert_eq!(cli.database_url.as_deref(), Some("sqlite::memory:"));
        assert!(matches!(cli.command, Some(Cmds::Report(ref cmd)) if cmd.day.as_deref() == Some("2024-03-05")));
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["worklog"]).unwrap();
        assert!(cli.command.is_none());
    }
}
