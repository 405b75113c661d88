//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mailscore_core::config::{MAX_LOOKBACK_DAYS, MAX_LOOKBACK_HOURS};

/// Score, label and audit a mailbox with a local language model.
#[derive(Parser, Debug)]
#[command(name = "mailscore")]
#[command(about = "Score, label and audit email with a local language model", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "MAILSCORE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Score new email once
    Run {
        /// Look back this many hours instead of resuming from the last run
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_LOOKBACK_HOURS))]
        hours: Option<i64>,

        /// Score emails again even if they already have a record
        #[arg(long)]
        process_all: bool,
    },

    /// Score new email continuously until interrupted
    Watch,

    /// Print the scoring report
    Report {
        /// Days covered (defaults to report.days_back)
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_LOOKBACK_DAYS))]
        days: Option<i64>,
    },

    /// Estimate classification accuracy from how labelled mail was handled
    Accuracy {
        /// Days covered (defaults to report.days_back)
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_LOOKBACK_DAYS))]
        days: Option<i64>,
    },

    /// Check configuration, database, mailbox and inference endpoint
    Doctor,

    /// Move the processing window back so recent email is picked up again
    ResetWindow {
        /// Hours before now to restart from
        #[arg(
            long,
            default_value = "24",
            value_parser = clap::value_parser!(i64).range(0..=MAX_LOOKBACK_HOURS)
        )]
        hours: i64,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli =
            Cli::try_parse_from(["mailscore", "run", "--hours", "6", "--process-all"]).unwrap();
        match cli.command {
            Command::Run { hours, process_all } => {
                assert_eq!(hours, Some(6));
                assert!(process_all);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["mailscore", "report", "--config", "/tmp/mailscore.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/mailscore.toml")));
        assert!(matches!(cli.command, Command::Report { days: None }));
    }

    #[test]
    fn test_reset_window_default() {
        let cli = Cli::try_parse_from(["mailscore", "reset-window"]).unwrap();
        assert!(matches!(cli.command, Command::ResetWindow { hours: 24 }));
    }

    #[test]
    fn test_look_back_is_bounded() {
        assert!(Cli::try_parse_from(["mailscore", "run", "--hours", "100000000000"]).is_err());
        assert!(Cli::try_parse_from(["mailscore", "run", "--hours", "0"]).is_err());
        assert!(Cli::try_parse_from(["mailscore", "report", "--days", "-3"]).is_err());
        assert!(Cli::try_parse_from(["mailscore", "accuracy", "--days", "99999999"]).is_err());
        assert!(Cli::try_parse_from(["mailscore", "reset-window", "--hours", "-1"]).is_err());

        let cli = Cli::try_parse_from(["mailscore", "reset-window", "--hours", "0"]).unwrap();
        assert!(matches!(cli.command, Command::ResetWindow { hours: 0 }));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
