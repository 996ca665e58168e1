//! GPX 1.1 rendering of the archive.
//!
//! Each message becomes one `<wpt>`; the caller decides the order.

use crate::spot::message::Message;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub const DEFAULT_CREATOR: &str = "spotkeeper";

fn header(creator: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<gpx
 version="1.1"
 creator="{}"
 xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
 xmlns="http://www.topografix.com/GPX/1/1"
 xsi:schemaLocation="http://www.topografix.com/GPX/1/1 http://www.topografix.com/GPX/1/1/gpx.xsd">
"#,
        escape_markup(creator)
    )
}

const FOOTER: &str = "</gpx>\n";

/// Escape text for use in XML content and attribute values.
pub fn escape_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(ch),
        }
    }
    out
}

/// RFC 3339 UTC timestamp with a `Z` suffix, e.g. `2007-02-21T15:33:00Z`.
pub fn format_time(unix_time: i64) -> String {
    match DateTime::from_timestamp(unix_time, 0) {
        Some(at) => at.to_rfc3339_opts(SecondsFormat::Secs, true),
        // Outside chrono's range; keep the raw value rather than dropping the point.
        None => unix_time.to_string(),
    }
}

fn write_waypoint<W: Write>(out: &mut W, message: &Message) -> io::Result<()> {
    write!(
        out,
        "<wpt lat=\"{:.6}\" lon=\"{:.6}\"><name>{}</name><time>{}</time>",
        message.latitude,
        message.longitude,
        escape_markup(&message.id),
        format_time(message.unix_time)
    )?;
    if message.has_content() {
        write!(out, "<cmt>{}</cmt>", escape_markup(&message.message_content))?;
    }
    out.write_all(b"</wpt>\n")
}

pub fn write_track<W: Write>(out: &mut W, messages: &[Message], creator: &str) -> io::Result<()> {
    out.write_all(header(creator).as_bytes())?;
    for message in messages {
        write_waypoint(out, message)?;
    }
    out.write_all(FOOTER.as_bytes())
}

pub fn render(messages: &[Message], creator: &str) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_track(&mut out, messages, creator);
    out
}

pub fn export(path: &Path, messages: &[Message], creator: &str) -> Result<()> {
    let doc = render(messages, creator);
    let mut file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(&doc)
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))?;
    Ok(())
}
