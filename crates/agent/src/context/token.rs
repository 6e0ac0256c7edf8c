//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Only used for
//! logging how large an assembled context is, never for truncation.

use lectern_core::message::Turn;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a single turn including per-message overhead.
///
/// Each turn costs ~4 tokens of overhead for role name and delimiters in the
/// API wire format.
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    4 + estimate_tokens(&turn.render())
}

/// Estimate tokens for a slice of turns.
pub fn estimate_turns_tokens(turns: &[Turn]) -> usize {
    turns.iter().map(estimate_turn_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn turn_includes_overhead() {
        // "Learner: test" is 13 chars → 4 tokens, plus 4 overhead
        assert_eq!(estimate_turn_tokens(&Turn::user("test")), 8);
    }

    #[test]
    fn multiple_turns() {
        let turns = vec![Turn::user("test"), Turn::model("ok")];
        // "Tutor: ok" is 9 chars → 3 tokens + 4
        assert_eq!(estimate_turns_tokens(&turns), 15);
    }
}
