//! Token estimation without a tokenizer.
//!
//! DESIGN
//! ======
//! Roughly one token per four characters of ordinary text. Role-boundary
//! markers used by the fallback prompt format are counted as exactly one
//! token each, and their characters are removed before the character-based
//! estimate. Lists of turns add a fixed structural overhead per message.
//!
//! The estimate is deterministic and never decreases as text grows.

use crate::llm::types::Turn;

pub const CHARS_PER_TOKEN: usize = 4;
pub const MESSAGE_OVERHEAD_TOKENS: usize = 3;

/// Marker substrings that each count as a single token.
pub const SPECIAL_TOKENS: &[&str] = &[
    "<|begin_of_text|>",
    "<|end_of_text|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
    "<|eot_id|>",
];

/// Estimate the token cost of a piece of text.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    let mut special = 0usize;
    let mut plain_chars = text.chars().count();
    for marker in SPECIAL_TOKENS {
        let hits = text.matches(marker).count();
        special += hits;
        plain_chars = plain_chars.saturating_sub(hits * marker.chars().count());
    }
    special + plain_chars.div_ceil(CHARS_PER_TOKEN)
}

/// Estimate the cost of a single turn, including message overhead.
#[must_use]
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    estimate_tokens(&turn.content) + MESSAGE_OVERHEAD_TOKENS
}

/// Estimate the cost of a list of turns.
#[must_use]
pub fn estimate_turns_tokens(turns: &[Turn]) -> usize {
    turns.iter().map(estimate_turn_tokens).sum()
}
