use anyhow::{Context, Result};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::commands::CommandReport;
use crate::spot::archive::{self, ArchiveFormat};
use crate::spot::feed::{FeedSource, decode_feed};
use crate::spot::gpx;
use crate::spot::merge::merge;
use crate::spot::message::{Message, is_time_ordered, sort_by_time};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub archive_path: PathBuf,
    pub feed_id: Option<String>,
    pub import_files: Vec<PathBuf>,
    pub export_path: Option<PathBuf>,
    /// Tolerate transient and allow-listed feed failures.
    pub quiet: bool,
    pub quiet_codes: Vec<String>,
    pub gpx_creator: String,
}

#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: String,
    pub added: usize,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub format: ArchiveFormat,
    pub loaded: usize,
    pub sources: Vec<SourceOutcome>,
    pub skipped_feed: Option<String>,
    pub total: usize,
    pub saved: bool,
    pub exported: Option<PathBuf>,
}

fn read_import(path: &Path) -> Result<Vec<Message>> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let page = decode_feed(BufReader::new(file))
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok(page.messages)
}

/// Load, merge every source, sort, then save and export as needed.
pub fn sync(opts: &SyncOptions, feed: &dyn FeedSource) -> Result<SyncOutcome> {
    let loaded = archive::load(&opts.archive_path)?;
    let format = loaded.format;
    let mut messages = loaded.messages;
    let mut modified = format.needs_rewrite();

    let mut out = SyncOutcome {
        format,
        loaded: messages.len(),
        sources: Vec::new(),
        skipped_feed: None,
        total: 0,
        saved: false,
        exported: None,
    };

    let mut batches = Vec::new();
    for path in &opts.import_files {
        log::debug!("importing {}", path.display());
        batches.push((path.display().to_string(), read_import(path)?));
    }

    if let Some(feed_id) = opts.feed_id.as_deref().filter(|id| !id.trim().is_empty()) {
        match feed.retrieve_messages(feed_id) {
            Ok(batch) => batches.push((format!("feed {feed_id}"), batch)),
            Err(err) if opts.quiet && err.is_tolerable(&opts.quiet_codes) => {
                log::warn!("feed {feed_id}: {err}; keeping archive as is");
                out.skipped_feed = Some(err.to_string());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to retrieve feed {feed_id}"));
            }
        }
    }

    for (source, batch) in batches {
        let (next, added) = merge(messages, batch);
        messages = next;
        if added > 0 {
            modified = true;
            log::info!("added {added} messages via {source}");
        }
        out.sources.push(SourceOutcome { source, added });
    }

    sort_by_time(&mut messages);
    debug_assert!(is_time_ordered(&messages));
    out.total = messages.len();

    if modified {
        archive::save(&opts.archive_path, &messages)?;
        log::info!(
            "saved {} messages to {}",
            messages.len(),
            opts.archive_path.display()
        );
        out.saved = true;
    }

    if let Some(path) = &opts.export_path {
        gpx::export(path, &messages, &opts.gpx_creator)?;
        log::info!("wrote {} waypoints to {}", messages.len(), path.display());
        out.exported = Some(path.clone());
    }

    Ok(out)
}

pub fn run(opts: &SyncOptions, feed: &dyn FeedSource) -> Result<CommandReport> {
    let outcome = sync(opts, feed)?;
    let mut report = CommandReport::new("sync");

    report.detail(format!("archive={}", opts.archive_path.display()));
    report.detail(format!("archive.format={}", outcome.format.label()));
    report.detail(format!("archive.loaded={}", outcome.loaded));
    for source in &outcome.sources {
        report.detail(format!("added={} source={}", source.added, source.source));
    }
    if let Some(reason) = &outcome.skipped_feed {
        report.issue(format!("feed skipped: {reason}"));
    }
    report.detail(format!("archive.total={}", outcome.total));
    report.detail(format!("archive.saved={}", outcome.saved));
    if let Some(path) = &outcome.exported {
        report.detail(format!("gpx={}", path.display()));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spot::feed::{FeedError, NO_MESSAGES_CODE};
    use crate::spot::legacy;
    use crate::spot::message::msg;
    use reqwest::StatusCode;
    use tempfile::tempdir;

    type Respond = fn() -> std::result::Result<Vec<Message>, FeedError>;

    struct FakeFeed {
        respond: Respond,
    }

    impl FeedSource for FakeFeed {
        fn retrieve_messages(&self, _feed_id: &str) -> std::result::Result<Vec<Message>, FeedError> {
            (self.respond)()
        }
    }

    fn scenario_batch() -> std::result::Result<Vec<Message>, FeedError> {
        Ok(vec![
            msg("A1", 1000, 99.0, 20.0, "changed"),
            msg("B2", 900, 11.0, 21.0, "hi"),
        ])
    }

    fn no_messages() -> std::result::Result<Vec<Message>, FeedError> {
        Err(FeedError::Service {
            code: NO_MESSAGES_CODE.to_string(),
            text: "No Messages to display".to_string(),
        })
    }

    fn unavailable() -> std::result::Result<Vec<Message>, FeedError> {
        Err(FeedError::Status(StatusCode::SERVICE_UNAVAILABLE))
    }

    fn not_found() -> std::result::Result<Vec<Message>, FeedError> {
        Err(FeedError::Status(StatusCode::NOT_FOUND))
    }

    fn options(root: &Path) -> SyncOptions {
        SyncOptions {
            archive_path: root.join("messages.db"),
            feed_id: Some("0feed".to_string()),
            quiet_codes: vec![NO_MESSAGES_CODE.to_string()],
            gpx_creator: gpx::DEFAULT_CREATOR.to_string(),
            ..SyncOptions::default()
        }
    }

    #[test]
    fn merges_sorts_saves_and_exports_the_example_run() {
        let tmp = tempdir().expect("tempdir");
        let mut opts = options(tmp.path());
        opts.export_path = Some(tmp.path().join("track.gpx"));
        archive::save(&opts.archive_path, &[msg("A1", 1000, 10.0, 20.0, "")]).expect("seed");

        let out = sync(&opts, &FakeFeed { respond: scenario_batch }).expect("sync");
        assert_eq!(out.sources.len(), 1);
        assert_eq!(out.sources[0].added, 1);
        assert!(out.saved);

        let stored = archive::load(&opts.archive_path).expect("load").messages;
        let ids: Vec<&str> = stored.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["B2", "A1"]);
        assert_eq!(stored[1].latitude, 10.0);

        let doc = fs::read_to_string(tmp.path().join("track.gpx")).expect("gpx");
        assert!(doc.contains("<name>B2</name><time>1970-01-01T00:15:00Z</time><cmt>hi</cmt></wpt>"));
        assert!(doc.contains("<name>A1</name><time>1970-01-01T00:16:40Z</time></wpt>"));
    }

    #[test]
    fn unchanged_archive_is_not_rewritten() {
        let tmp = tempdir().expect("tempdir");
        let opts = options(tmp.path());

        let first = sync(&opts, &FakeFeed { respond: scenario_batch }).expect("first");
        assert!(first.saved);
        let before = fs::read(&opts.archive_path).expect("read");

        let second = sync(&opts, &FakeFeed { respond: scenario_batch }).expect("second");
        assert!(!second.saved);
        assert_eq!(second.sources[0].added, 0);
        assert_eq!(fs::read(&opts.archive_path).expect("reread"), before);
    }

    #[test]
    fn legacy_archive_is_rewritten_as_json_without_new_data() {
        let tmp = tempdir().expect("tempdir");
        let mut opts = options(tmp.path());
        opts.feed_id = None;
        fs::write(&opts.archive_path, legacy::THREE_RECORDS).expect("seed legacy");

        let out = sync(&opts, &FakeFeed { respond: not_found }).expect("sync");
        assert_eq!(out.format, ArchiveFormat::Legacy);
        assert!(out.saved);

        let reloaded = archive::load(&opts.archive_path).expect("reload");
        assert_eq!(reloaded.format, ArchiveFormat::Canonical);
        let ids: Vec<&str> = reloaded.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["B2", "A1", "C3"]);
    }

    #[test]
    fn missing_archive_without_sources_writes_nothing() {
        let tmp = tempdir().expect("tempdir");
        let mut opts = options(tmp.path());
        opts.feed_id = None;

        let out = sync(&opts, &FakeFeed { respond: not_found }).expect("sync");
        assert_eq!(out.format, ArchiveFormat::Missing);
        assert!(!out.saved);
        assert!(!opts.archive_path.exists());
    }

    #[test]
    fn quiet_mode_tolerates_allow_listed_and_transient_failures() {
        let tmp = tempdir().expect("tempdir");
        let mut opts = options(tmp.path());
        opts.quiet = true;

        let responders: [Respond; 2] = [no_messages, unavailable];
        for respond in responders {
            let out = sync(&opts, &FakeFeed { respond }).expect("tolerated");
            assert!(out.skipped_feed.is_some());
            assert!(!out.saved);
        }
    }

    #[test]
    fn quiet_mode_still_fails_on_other_errors() {
        let tmp = tempdir().expect("tempdir");
        let mut opts = options(tmp.path());
        opts.quiet = true;

        let err = sync(&opts, &FakeFeed { respond: not_found }).expect_err("fatal");
        assert!(format!("{err:#}").contains("failed to retrieve feed 0feed"));
    }

    #[test]
    fn feed_errors_are_fatal_without_quiet() {
        let tmp = tempdir().expect("tempdir");
        let opts = options(tmp.path());
        assert!(sync(&opts, &FakeFeed { respond: no_messages }).is_err());
    }

    #[test]
    fn import_files_merge_before_the_feed() {
        let tmp = tempdir().expect("tempdir");
        let mut opts = options(tmp.path());
        let import = tmp.path().join("saved.json");
        fs::write(
            &import,
            r#"{"response":{"feedMessageResponse":{"count":2,"totalCount":2,"messages":{"message":[
                {"id":"A1","unixTime":1000,"latitude":1.0,"longitude":1.0,"messageContent":"from file"},
                {"id":"C3","unixTime":500,"latitude":3.0,"longitude":3.0}
            ]}}}}"#,
        )
        .expect("write import");
        opts.import_files = vec![import];

        let out = sync(&opts, &FakeFeed { respond: scenario_batch }).expect("sync");
        let added: Vec<usize> = out.sources.iter().map(|s| s.added).collect();
        assert_eq!(added, vec![2, 1]);

        let stored = archive::load(&opts.archive_path).expect("load").messages;
        assert!(is_time_ordered(&stored));
        let a1 = stored.iter().find(|m| m.id == "A1").expect("A1");
        assert_eq!(a1.message_content, "from file");
    }

    #[test]
    fn unreadable_import_file_is_fatal() {
        let tmp = tempdir().expect("tempdir");
        let mut opts = options(tmp.path());
        opts.import_files = vec![tmp.path().join("absent.json")];

        assert!(sync(&opts, &FakeFeed { respond: scenario_batch }).is_err());
        assert!(!opts.archive_path.exists());
    }

    #[test]
    fn export_runs_even_when_nothing_changed() {
        let tmp = tempdir().expect("tempdir");
        let mut opts = options(tmp.path());
        opts.feed_id = None;
        opts.export_path = Some(tmp.path().join("track.gpx"));
        archive::save(&opts.archive_path, &[msg("A1", 1000, 10.0, 20.0, "")]).expect("seed");

        let out = sync(&opts, &FakeFeed { respond: not_found }).expect("sync");
        assert!(!out.saved);
        assert!(tmp.path().join("track.gpx").exists());
    }

    #[test]
    fn report_lists_counts() {
        let tmp = tempdir().expect("tempdir");
        let opts = options(tmp.path());

        let report = run(&opts, &FakeFeed { respond: scenario_batch }).expect("run");
        assert_eq!(report.command, "sync");
        assert!(report.details.contains(&"added=2 source=feed 0feed".to_string()));
        assert!(report.details.contains(&"archive.saved=true".to_string()));
        assert!(report.ok);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn skipped_feed_becomes_a_report_issue() {
        let tmp = tempdir().expect("tempdir");
        let mut opts = options(tmp.path());
        opts.quiet = true;

        let report = run(&opts, &FakeFeed { respond: unavailable }).expect("run");
        assert!(!report.ok);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].starts_with("feed skipped: feed answered with status 503"));
        assert!(report.details.contains(&"archive.saved=false".to_string()));
    }
}
