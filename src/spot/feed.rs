//! Client and decoder for the SPOT public feed.
//!
//! The feed answers with a JSON envelope holding either a page of messages or
//! an error object with a code such as `E-0195` (nothing to display).

use crate::spot::message::Message;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::error::Error as StdError;
use std::io::Read;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_FEED_URL: &str =
    "https://api.findmespot.com/spot-main-web/consumer/rest-api/2.0/public/feed";

/// The feed's "no displayable messages" code.
pub const NO_MESSAGES_CODE: &str = "E-0195";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed error {code}: {text}")]
    Service { code: String, text: String },
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed answered with status {0}")]
    Status(StatusCode),
    #[error("failed to decode feed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to read feed: {0}")]
    Io(#[from] std::io::Error),
}

impl FeedError {
    pub fn code(&self) -> Option<&str> {
        match self {
            FeedError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            FeedError::Http(err) => err.is_timeout(),
            FeedError::Status(status) => *status == StatusCode::REQUEST_TIMEOUT,
            FeedError::Io(err) => timed_out(err),
            // A reader that times out mid-body surfaces through the JSON decoder.
            FeedError::Decode(err) => {
                err.io_error_kind() == Some(std::io::ErrorKind::TimedOut) || timed_out(err)
            }
            _ => false,
        }
    }

    pub fn is_temporary(&self) -> bool {
        match self {
            FeedError::Http(err) => err.is_connect(),
            FeedError::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FeedError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// Whether a scheduled run may treat this failure as "no data this time".
    pub fn is_tolerable(&self, quiet_codes: &[String]) -> bool {
        if self.is_timeout() || self.is_temporary() {
            return true;
        }
        self.code()
            .is_some_and(|code| quiet_codes.iter().any(|c| c == code))
    }
}

// A reader built on reqwest hands out io::Error of kind `Other` wrapping the
// reqwest::Error, and io::Error::source() skips the wrapped error itself.
fn timed_out(err: &(dyn StdError + 'static)) -> bool {
    let mut next = Some(err);
    while let Some(err) = next {
        if let Some(http) = err.downcast_ref::<reqwest::Error>() {
            if http.is_timeout() {
                return true;
            }
        }
        let io = err.downcast_ref::<std::io::Error>();
        if io.is_some_and(|io| io.kind() == std::io::ErrorKind::TimedOut) {
            return true;
        }
        next = match io.and_then(|io| io.get_ref()) {
            Some(inner) => Some(inner as &(dyn StdError + 'static)),
            None => err.source(),
        };
    }
    false
}

#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    response: FeedResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedResponse {
    feed_message_response: Option<FeedMessageResponse>,
    errors: Option<FeedErrors>,
}

#[derive(Debug, Deserialize)]
struct FeedErrors {
    error: FeedServiceError,
}

#[derive(Debug, Deserialize)]
struct FeedServiceError {
    code: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedMessageResponse {
    #[serde(default)]
    total_count: Option<usize>,
    #[serde(default)]
    messages: Option<FeedMessages>,
}

#[derive(Debug, Deserialize)]
struct FeedMessages {
    message: OneOrMany,
}

// A page holding a single message carries an object instead of an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<FeedMessage>),
    One(FeedMessage),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedId {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedMessage {
    id: FeedId,
    unix_time: i64,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    message_content: Option<String>,
}

impl From<FeedMessage> for Message {
    fn from(raw: FeedMessage) -> Self {
        let id = match raw.id {
            FeedId::Text(s) => s,
            FeedId::Number(n) => n.to_string(),
        };
        Message {
            id,
            unix_time: raw.unix_time,
            latitude: raw.latitude,
            longitude: raw.longitude,
            message_content: raw.message_content.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub messages: Vec<Message>,
    pub total_count: Option<usize>,
}

pub fn decode_feed<R: Read>(reader: R) -> Result<FeedPage, FeedError> {
    let envelope: FeedEnvelope = serde_json::from_reader(reader)?;
    if let Some(errors) = envelope.response.errors {
        return Err(FeedError::Service {
            code: errors.error.code,
            text: errors.error.text,
        });
    }
    let Some(page) = envelope.response.feed_message_response else {
        return Ok(FeedPage::default());
    };
    let messages = match page.messages.map(|m| m.message) {
        Some(OneOrMany::Many(list)) => list.into_iter().map(Message::from).collect(),
        Some(OneOrMany::One(one)) => vec![Message::from(one)],
        None => Vec::new(),
    };
    Ok(FeedPage {
        messages,
        total_count: page.total_count,
    })
}

/// Anything that can hand over the current batch of messages for a feed.
pub trait FeedSource {
    fn retrieve_messages(&self, feed_id: &str) -> Result<Vec<Message>, FeedError>;
}

#[derive(Debug, Clone)]
pub struct SpotFeedClient {
    pub base_url: String,
    pub feed_password: Option<String>,
    pub request_timeout_secs: u64,
    pub max_pages: u32,
}

impl SpotFeedClient {
    fn page_url(&self, feed_id: &str) -> String {
        format!("{}/{}/message.json", self.base_url.trim_end_matches('/'), feed_id)
    }

    fn fetch_page(&self, client: &Client, feed_id: &str, start: usize) -> Result<FeedPage, FeedError> {
        let mut request = client.get(self.page_url(feed_id));
        if start > 0 {
            request = request.query(&[("start", start.to_string())]);
        }
        if let Some(password) = self.feed_password.as_deref().filter(|p| !p.is_empty()) {
            request = request.query(&[("feedPassword", password)]);
        }
        let response = request.send()?;
        let status = response.status();
        // The feed reports its own errors in a 200 body; other statuses carry no envelope.
        if !status.is_success() {
            return Err(FeedError::Status(status));
        }
        // Read through reqwest so a stalled body reports as a timeout.
        let body = response.bytes()?;
        decode_feed(body.as_ref())
    }
}

impl FeedSource for SpotFeedClient {
    fn retrieve_messages(&self, feed_id: &str) -> Result<Vec<Message>, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()?;

        let mut out = Vec::new();
        for page_no in 0..self.max_pages {
            let page = match self.fetch_page(&client, feed_id, out.len()) {
                Ok(page) => page,
                // Running past the last page yields "no messages" rather than an empty page.
                Err(err) if page_no > 0 && err.code() == Some(NO_MESSAGES_CODE) => break,
                // Keep what earlier pages returned; the next run fetches the rest.
                Err(err) if page_no > 0 && (err.is_timeout() || err.is_temporary()) => {
                    log::warn!(
                        "feed {feed_id}: page {page_no} failed: {err}; keeping {} messages",
                        out.len()
                    );
                    break;
                }
                Err(err) => return Err(err),
            };
            let fetched = page.messages.len();
            out.extend(page.messages);
            log::debug!("feed {feed_id}: page {page_no} returned {fetched} messages");

            let total = page.total_count.unwrap_or(out.len());
            if fetched == 0 || out.len() >= total {
                break;
            }
        }
        Ok(out)
    }
}
