use crate::spot::message::Message;
use std::collections::HashSet;

/// Fold `incoming` into `existing`, keeping the first copy seen for every id.
///
/// Returns the merged collection and the number of incoming messages that were
/// accepted. Existing messages keep their position; accepted ones are appended
/// in batch order.
pub fn merge<I>(existing: Vec<Message>, incoming: I) -> (Vec<Message>, usize)
where
    I: IntoIterator<Item = Message>,
{
    let mut seen: HashSet<String> = existing.iter().map(|m| m.id.clone()).collect();
    let mut merged = existing;
    let before = merged.len();

    for message in incoming {
        if seen.insert(message.id.clone()) {
            merged.push(message);
        }
    }

    let added = merged.len() - before;
    (merged, added)
}
