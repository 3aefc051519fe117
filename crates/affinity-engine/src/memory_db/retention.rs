//! Bounded history retention applied after every append.

use crate::memory::Role;
use crate::memory_db::schema::StoredMessage;

/// Trim `messages` to at most `cap` entries, dropping the oldest non-system messages first.
///
/// System messages are all kept and moved to the front, in their original order, followed
/// by the newest `cap - |system|` other messages. If the system messages alone reach the
/// cap, every other message is dropped and the result may exceed `cap`.
///
/// Returns how many messages were dropped.
pub fn apply_retention(messages: &mut Vec<StoredMessage>, cap: usize) -> usize {
    if messages.len() <= cap {
        return 0;
    }

    let before = messages.len();
    let (system, rest): (Vec<StoredMessage>, Vec<StoredMessage>) =
        std::mem::take(messages).into_iter().partition(|m| m.role == Role::System);

    let keep = cap.saturating_sub(system.len());
    let skip = rest.len().saturating_sub(keep);

    messages.extend(system);
    messages.extend(rest.into_iter().skip(skip));

    before - messages.len()
}
