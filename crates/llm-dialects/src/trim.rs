//! Fitting a conversation into a model's prompt budget.
//!
//! [`trim_messages`] is shared by every dialect. It caps the system text at
//! its share of the budget, keeps the newest messages that fit, and drops
//! any tool result whose originating call did not survive.

use std::collections::HashSet;

use crate::prompt::Message;
use crate::tokenizer::Tokenizer;

/// Budget parameters for one trimming pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimLimits {
    /// Total tokens available to the system text plus the messages.
    pub max_tokens: usize,
    /// Fraction of `max_tokens` the system text may use.
    pub reserved_for_system: f64,
    /// Tokens a dialect's message framing adds to every message.
    pub per_message_overhead: usize,
}

impl TrimLimits {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn system_cap(&self) -> usize {
        let share = self.reserved_for_system.clamp(0.0, 1.0);
        (self.max_tokens as f64 * share).floor() as usize
    }
}

/// The output of [`trim_messages`]: the (possibly truncated) system text and
/// the surviving messages in chronological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trimmed {
    /// System text, truncated to its share when it was too long.
    pub system: String,
    /// Surviving messages, oldest first.
    pub messages: Vec<Message>,
}

/// Trims `messages` (oldest first) so that the system text and the
/// surviving messages together cost at most `limits.max_tokens`.
///
/// Newer messages win ties. When the oldest message that would still be
/// kept does not fit whole and holds plain user or model text, its content
/// is truncated to the remaining budget and it becomes the first surviving
/// message. Tool calls are kept whole or not at all. When the walk would
/// keep no user message, the oldest kept messages are evicted until the
/// newest user message fits. The input is not modified.
pub fn trim_messages(
    system: &str,
    messages: &[Message],
    limits: &TrimLimits,
    tokenizer: &dyn Tokenizer,
) -> Trimmed {
    let overhead = limits.per_message_overhead;
    let system_cost = |text: &str| {
        if text.is_empty() {
            0
        } else {
            tokenizer.size(text) + overhead
        }
    };

    let cap = limits.system_cap();
    let mut system = system.to_owned();
    if system_cost(&system) > cap {
        system = tokenizer.truncate(&system, cap.saturating_sub(overhead));
        tracing::debug!(cap, "system prompt truncated");
    }
    let mut remaining = limits.max_tokens.saturating_sub(system_cost(&system));

    let mut kept: Vec<Message> = Vec::new();
    for message in messages.iter().rev() {
        let cost = tokenizer.size(&message.token_text()) + overhead;
        if cost <= remaining {
            remaining -= cost;
            kept.push(message.clone());
            continue;
        }
        if matches!(message, Message::User { .. } | Message::Model { .. }) {
            if let Some(shortened) = shorten(message, remaining, overhead, tokenizer) {
                remaining -= tokenizer.size(&shortened.token_text()) + overhead;
                kept.push(shortened);
            }
        }
        break;
    }
    if !kept.iter().any(is_user) {
        if let Some(user) = messages.iter().rev().find(|m| is_user(m)) {
            make_room_for_user(&mut kept, user, remaining, overhead, tokenizer);
        }
    }
    kept.reverse();

    let surviving_calls: HashSet<String> = kept
        .iter()
        .filter(|m| matches!(m, Message::ToolCall { .. }))
        .filter_map(Message::tool_id)
        .map(str::to_owned)
        .collect();
    let before = kept.len();
    let messages: Vec<Message> = kept
        .into_iter()
        .filter(|m| match m {
            Message::Tool { id, .. } => surviving_calls.contains(id),
            _ => true,
        })
        .collect();
    if messages.len() < before {
        tracing::debug!(dropped = before - messages.len(), "orphaned tool results dropped");
    }

    Trimmed { system, messages }
}

fn is_user(message: &Message) -> bool {
    matches!(message, Message::User { .. })
}

/// Evicts the oldest of `kept` (newest first) until `user` fits, whole or
/// shortened, then keeps it as the oldest message.
fn make_room_for_user(
    kept: &mut Vec<Message>,
    user: &Message,
    mut remaining: usize,
    overhead: usize,
    tokenizer: &dyn Tokenizer,
) {
    loop {
        let fits = tokenizer.size(&user.token_text()) + overhead <= remaining;
        let candidate = if fits {
            Some(user.clone())
        } else {
            shorten(user, remaining, overhead, tokenizer)
        };
        if let Some(candidate) = candidate {
            tracing::debug!(kept = kept.len(), "evicted messages to keep a user turn");
            kept.push(candidate);
            return;
        }
        let Some(evicted) = kept.pop() else { return };
        remaining += tokenizer.size(&evicted.token_text()) + overhead;
    }
}

/// Truncates a user or model message so that it costs at most `budget`
/// tokens including `overhead`. Returns `None` when nothing non-empty fits.
fn shorten(
    message: &Message,
    budget: usize,
    overhead: usize,
    tokenizer: &dyn Tokenizer,
) -> Option<Message> {
    let mut content_budget = budget.checked_sub(overhead)?;
    while content_budget > 0 {
        let content = tokenizer.truncate(message.content(), content_budget);
        if content.trim().is_empty() {
            return None;
        }
        let candidate = message.with_content(content);
        // a participant name also counts, and BPE may merge across the join
        if tokenizer.size(&candidate.token_text()) + overhead <= budget {
            return Some(candidate);
        }
        content_budget -= 1;
    }
    None
}
