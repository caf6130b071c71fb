/// Estimates the number of tokens contained in a string.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens for the provided text.
    fn estimate_tokens(&self, text: &str) -> usize;
}

/// A simple estimator that divides characters by a fixed ratio.
///
/// The ratio is treated as a coarse upper bound: the estimate is only used
/// to shrink candidates toward a generous ceiling before exact counting
/// takes over, never to accept a message list against the hard budget.
#[derive(Debug, Clone)]
pub struct CharacterRatioTokenEstimator {
    chars_per_token: usize,
}

impl CharacterRatioTokenEstimator {
    /// Create a new estimator that assumes the provided number of characters per token.
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    /// Access the configured character-per-token ratio.
    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }
}

impl Default for CharacterRatioTokenEstimator {
    fn default() -> Self {
        Self::new(crate::config::constants::defaults::CHARS_PER_TOKEN)
    }
}

impl TokenEstimator for CharacterRatioTokenEstimator {
    fn estimate_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let byte_len = text.len();
        let tokens = byte_len.div_ceil(self.chars_per_token);
        tokens.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_estimates_zero() {
        let estimator = CharacterRatioTokenEstimator::default();
        assert_eq!(estimator.estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_rounds_up() {
        let estimator = CharacterRatioTokenEstimator::new(4);
        assert_eq!(estimator.estimate_tokens("abcd"), 1);
        assert_eq!(estimator.estimate_tokens("abcde"), 2);
    }

    #[test]
    fn zero_ratio_is_normalized() {
        let estimator = CharacterRatioTokenEstimator::new(0);
        assert_eq!(estimator.chars_per_token(), 1);
    }
}
