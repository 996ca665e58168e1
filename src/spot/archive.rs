use crate::error::KeeperError;
use crate::spot::message::Message;
use crate::spot::legacy;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// No archive file yet.
    Missing,
    /// Pretty-printed JSON array.
    Canonical,
    /// Gob stream written by older releases. Never written again.
    Legacy,
}

impl ArchiveFormat {
    pub fn label(self) -> &'static str {
        match self {
            ArchiveFormat::Missing => "missing",
            ArchiveFormat::Canonical => "json",
            ArchiveFormat::Legacy => "legacy-gob",
        }
    }

    /// A legacy archive is rewritten as JSON even when nothing new was merged.
    pub fn needs_rewrite(self) -> bool {
        self == ArchiveFormat::Legacy
    }
}

#[derive(Debug, Clone)]
pub struct LoadedArchive {
    pub messages: Vec<Message>,
    pub format: ArchiveFormat,
}

type Decoder = fn(&[u8]) -> std::result::Result<Vec<Message>, String>;

// Tried in order against the same buffered bytes.
const DECODERS: [(ArchiveFormat, Decoder); 2] = [
    (ArchiveFormat::Canonical, decode_canonical),
    (ArchiveFormat::Legacy, decode_legacy),
];

fn decode_canonical(bytes: &[u8]) -> std::result::Result<Vec<Message>, String> {
    // `null` is what an empty archive looked like before the JSON format settled.
    serde_json::from_slice::<Option<Vec<Message>>>(bytes)
        .map(Option::unwrap_or_default)
        .map_err(|err| err.to_string())
}

fn decode_legacy(bytes: &[u8]) -> std::result::Result<Vec<Message>, String> {
    legacy::decode(bytes).map_err(|err| err.to_string())
}

pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

pub fn load(path: &Path) -> Result<LoadedArchive> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            log::warn!("{}: {err}; starting with an empty archive", path.display());
            return Ok(LoadedArchive {
                messages: Vec::new(),
                format: ArchiveFormat::Missing,
            });
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let mut failures = Vec::with_capacity(DECODERS.len());
    for (format, decode) in DECODERS {
        match decode(&bytes) {
            Ok(messages) => {
                if format.needs_rewrite() {
                    log::warn!(
                        "{}: {}; read as {} format",
                        path.display(),
                        failures.join("; "),
                        format.label()
                    );
                }
                return Ok(LoadedArchive { messages, format });
            }
            Err(err) => failures.push(err),
        }
    }

    let mut failures = failures.into_iter();
    Err(KeeperError::ArchiveUnreadable {
        path: path.to_path_buf(),
        canonical: failures.next().unwrap_or_default(),
        legacy: failures.next().unwrap_or_default(),
    }
    .into())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))?;
    Ok(())
}

/// Replace the archive at `path` with `messages` as pretty JSON.
///
/// The data goes to `<path>.tmp` first and is renamed into place, so readers
/// see either the old archive or the new one.
pub fn save(path: &Path, messages: &[Message]) -> Result<()> {
    let mut data = serde_json::to_string_pretty(messages).context("failed to encode archive")?;
    data.push('\n');

    let tmp = temp_path_for(path);
    if let Err(err) = write_synced(&tmp, data.as_bytes()) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    fs::rename(&tmp, path).with_context(|| {
        format!("failed to rename {} to {}", tmp.display(), path.display())
    })?;
    Ok(())
}
