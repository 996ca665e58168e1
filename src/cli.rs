use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::commands::sync::{self, SyncOptions};
use crate::logging;
use crate::spot::config::load_config;

/// Collect SPOT messenger messages from the public feed into a local archive
/// and optionally print them as a GPX track.
///
/// The feed only keeps about seven days of messages; run this regularly (e.g.
/// from cron) to keep a complete history.
#[derive(Debug, Parser)]
#[command(name = "spotkeeper", version, about)]
pub struct Cli {
    /// Name of message database file
    #[arg(long, value_name = "FILE")]
    pub messages: Option<PathBuf>,

    /// SPOT messenger feed ID
    #[arg(long = "feedid", value_name = "ID")]
    pub feed_id: Option<String>,

    /// Be more verbose about what is happening
    #[arg(short, long)]
    pub verbose: bool,

    /// Be quiet about temporary and network errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Name of file to print messages in GPX format to
    #[arg(long = "printgpx", value_name = "FILE")]
    pub print_gpx: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Saved feed responses to merge before querying the live feed
    #[arg(value_name = "FEED_JSON")]
    pub files: Vec<PathBuf>,
}

/// Text-mode lines for stdout and stderr. Details need `--verbose`; issues
/// are shown unless `--quiet` alone asked for silence.
fn text_lines(report: &CommandReport, verbose: bool, quiet: bool) -> (Vec<String>, Vec<String>) {
    let mut out = Vec::new();
    let mut err = Vec::new();
    if verbose {
        for detail in &report.details {
            out.push(format!("{}: {detail}", report.command));
        }
    }
    if verbose || !quiet {
        for issue in &report.issues {
            err.push(format!("{}: issue: {issue}", report.command));
        }
    }
    (out, err)
}

fn print_report(report: &CommandReport, cli: &Cli) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let (out, err) = text_lines(report, cli.verbose, cli.quiet);
    for line in out {
        println!("{line}");
    }
    for line in err {
        eprintln!("{line}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let cfg = load_config()?;
    let opts = SyncOptions {
        archive_path: cli.messages.clone().unwrap_or(cfg.archive.path),
        feed_id: cli.feed_id.clone().or(cfg.feed.feed_id.clone()),
        import_files: cli.files.clone(),
        export_path: cli.print_gpx.clone(),
        quiet: cli.quiet,
        quiet_codes: cfg.feed.quiet_codes.clone(),
        gpx_creator: cfg.gpx.creator.clone(),
    };

    let report = sync::run(&opts, &cfg.feed.client())?;
    print_report(&report, &cli)
}

#[cfg(test)]
mod tests {
    use super::{Cli, text_lines};
    use crate::commands::CommandReport;
    use clap::{CommandFactory, Parser};
    use std::path::PathBuf;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_original_flag_names() {
        let cli = Cli::try_parse_from([
            "spotkeeper",
            "--messages",
            "spot.db",
            "--feedid",
            "0abc",
            "--quiet",
            "--printgpx",
            "out.gpx",
            "a.json",
            "b.json",
        ])
        .expect("parse");

        assert_eq!(cli.messages, Some(PathBuf::from("spot.db")));
        assert_eq!(cli.feed_id.as_deref(), Some("0abc"));
        assert!(cli.quiet);
        assert!(!cli.verbose);
        assert_eq!(cli.print_gpx, Some(PathBuf::from("out.gpx")));
        assert_eq!(cli.files.len(), 2);
    }

    fn skipped_feed_report() -> CommandReport {
        let mut report = CommandReport::new("sync");
        report.detail("archive.saved=false");
        report.issue("feed skipped: feed answered with status 503 Service Unavailable");
        report
    }

    #[test]
    fn issues_go_to_stderr_unless_quiet() {
        let report = skipped_feed_report();

        let (out, err) = text_lines(&report, false, false);
        assert!(out.is_empty());
        assert_eq!(
            err,
            vec!["sync: issue: feed skipped: feed answered with status 503 Service Unavailable"]
        );

        let (out, err) = text_lines(&report, false, true);
        assert!(out.is_empty());
        assert!(err.is_empty());
    }

    #[test]
    fn verbose_shows_details_and_issues_even_when_quiet() {
        let (out, err) = text_lines(&skipped_feed_report(), true, true);
        assert_eq!(out, vec!["sync: archive.saved=false"]);
        assert_eq!(err.len(), 1);
    }
}
