pub mod archive;
pub mod config;
pub mod feed;
pub mod gpx;
pub mod legacy;
pub mod merge;
pub mod message;
