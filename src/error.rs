use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error(
        "archive {} is unreadable: not canonical json ({canonical}) and not legacy binary ({legacy})",
        .path.display()
    )]
    ArchiveUnreadable {
        path: PathBuf,
        canonical: String,
        legacy: String,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
