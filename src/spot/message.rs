use serde::{Deserialize, Deserializer, Serialize};

/// One tracker ping as kept in the archive.
///
/// Field names follow the archive's on-disk JSON keys (`Id`, `UnixTime`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub unix_time: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub message_content: String,
}

impl Message {
    pub fn has_content(&self) -> bool {
        !self.message_content.is_empty()
    }
}

/// Stable ascending sort by `unix_time`. Equal timestamps keep their order.
pub fn sort_by_time(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.unix_time);
}

pub fn is_time_ordered(messages: &[Message]) -> bool {
    messages.windows(2).all(|w| w[0].unix_time <= w[1].unix_time)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

// Older archives and the feed itself carry numeric ids.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Signed(n) => n.to_string(),
        RawId::Unsigned(n) => n.to_string(),
    })
}

#[cfg(test)]
pub(crate) fn msg(id: &str, unix_time: i64, lat: f64, lon: f64, content: &str) -> Message {
    Message {
        id: id.to_string(),
        unix_time,
        latitude: lat,
        longitude: lon,
        message_content: content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_is_stable_for_equal_timestamps() {
        let mut messages = vec![
            msg("c", 300, 0.0, 0.0, ""),
            msg("a", 100, 0.0, 0.0, ""),
            msg("b1", 200, 0.0, 0.0, ""),
            msg("b2", 200, 0.0, 0.0, ""),
            msg("b3", 200, 0.0, 0.0, ""),
        ];
        sort_by_time(&mut messages);

        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b1", "b2", "b3", "c"]);
        assert!(is_time_ordered(&messages));
    }

    #[test]
    fn json_uses_archive_field_names() {
        let value = serde_json::to_value(msg("A1", 1000, 10.0, 20.0, "")).expect("to_value");
        let obj = value.as_object().expect("object");
        for key in ["Id", "UnixTime", "Latitude", "Longitude", "MessageContent"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn numeric_ids_are_read_as_opaque_strings() {
        let raw = r#"{"Id":912345678,"UnixTime":5,"Latitude":1.5,"Longitude":2.5}"#;
        let parsed: Message = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.id, "912345678");
        assert_eq!(parsed.message_content, "");
    }

    #[test]
    fn string_ids_are_not_normalized() {
        let raw = r#"{"Id":"007","UnixTime":5,"Latitude":0,"Longitude":0,"MessageContent":"x"}"#;
        let parsed: Message = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.id, "007");
        assert!(parsed.has_content());
    }
}
