//! Context trimming shared by every provider.
//!
//! System turns are always kept. Non-system turns are taken newest-first
//! while the accumulated cost stays within the budget, then reassembled in
//! chronological order after the system turns. The kept non-system turns are
//! therefore always a contiguous suffix of the input.

use crate::llm::types::Turn;
use crate::tokens;

/// How a provider measures the size of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostMetric {
    /// Estimated tokens, including per-message overhead.
    Tokens,
    /// Raw character count of the content.
    Chars,
}

impl CostMetric {
    #[must_use]
    pub fn cost(self, turn: &Turn) -> usize {
        match self {
            Self::Tokens => tokens::estimate_turn_tokens(turn),
            Self::Chars => turn.content.chars().count(),
        }
    }
}

/// Trim `turns` to fit `budget` under `metric`.
///
/// System turns count against the budget but are never dropped. The newest
/// non-system turn is always kept so the upstream sees the message it must
/// answer, even when that turn alone exceeds the budget.
#[must_use]
pub fn trim_to_budget(turns: &[Turn], budget: usize, metric: CostMetric) -> Vec<Turn> {
    let (system, rest): (Vec<&Turn>, Vec<&Turn>) = turns.iter().partition(|t| t.is_system());

    let mut used: usize = system.iter().map(|t| metric.cost(t)).sum();
    let mut keep_from = rest.len();
    for (idx, turn) in rest.iter().enumerate().rev() {
        let cost = metric.cost(turn);
        let is_newest = idx + 1 == rest.len();
        if !is_newest && used.saturating_add(cost) > budget {
            break;
        }
        used = used.saturating_add(cost);
        keep_from = idx;
    }

    system
        .into_iter()
        .chain(rest[keep_from..].iter().copied())
        .cloned()
        .collect()
}

#[cfg(test)]
#[path = "trim_test.rs"]
mod tests;
