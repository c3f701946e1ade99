//! Reply-thread integrity.
//!
//! Messages form a forest of reply chains; a candidate message's
//! `reply_to` edge must be validated before persistence. Validation only
//! inspects the message list it is given: a parent missing from that list is
//! tolerated (it may live in another chat or have been pruned), but
//! self-references, cycles, and over-deep chains always reject the write.

use confab_core::{Message, MessageId, ThreadError, MAX_THREAD_DEPTH};
use std::collections::{HashMap, HashSet};

/// Validate a candidate message's reply edge against the in-scope messages.
///
/// Rules:
/// - no `reply_to`: always valid (root message);
/// - `reply_to == message_id`: rejected as a self-reference;
/// - traversal that revisits a message: rejected as a circular reference;
/// - traversal longer than [`MAX_THREAD_DEPTH`] hops: rejected;
/// - a parent id absent from `messages`: tolerated, the chain simply ends.
pub fn validate_reply(candidate: &Message, messages: &[Message]) -> Result<(), ThreadError> {
    let Some(reply_to) = candidate.reply_to else {
        return Ok(());
    };

    if reply_to == candidate.message_id {
        return Err(ThreadError::SelfReference {
            message_id: candidate.message_id,
        });
    }

    let by_id: HashMap<MessageId, &Message> =
        messages.iter().map(|m| (m.message_id, m)).collect();

    let mut visited: HashSet<MessageId> = HashSet::new();
    visited.insert(candidate.message_id);

    let mut current = reply_to;
    let mut depth = 1usize;
    loop {
        if !visited.insert(current) {
            return Err(ThreadError::CircularReference {
                message_id: current,
            });
        }
        if depth > MAX_THREAD_DEPTH {
            return Err(ThreadError::DepthExceeded {
                depth,
                max: MAX_THREAD_DEPTH,
            });
        }
        match by_id.get(&current).and_then(|m| m.reply_to) {
            Some(parent) => {
                current = parent;
                depth += 1;
            }
            // Root reached, or the parent lives outside the supplied list.
            None => return Ok(()),
        }
    }
}

/// Number of reply hops from `message` to its root within `messages`.
///
/// Traversal stops at the first missing parent, repeated id, or the depth
/// bound, so the result is always finite. Diagnostic helper; persistence
/// decisions go through [`validate_reply`].
pub fn thread_depth(message: &Message, messages: &[Message]) -> usize {
    let by_id: HashMap<MessageId, &Message> =
        messages.iter().map(|m| (m.message_id, m)).collect();

    let mut visited: HashSet<MessageId> = HashSet::new();
    visited.insert(message.message_id);

    let mut depth = 0usize;
    let mut current = message.reply_to;
    while let Some(id) = current {
        if !visited.insert(id) || depth >= MAX_THREAD_DEPTH {
            break;
        }
        depth += 1;
        current = by_id.get(&id).and_then(|m| m.reply_to);
    }
    depth
}

// =============================================================================
// TESTS
// =============================================================================


// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================
