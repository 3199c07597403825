use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One unit of work in a batch fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItem<P> {
    pub symbol: String,
    pub payload: P,
}

impl<P> BatchItem<P> {
    pub fn new(symbol: impl Into<String>, payload: P) -> Self {
        Self {
            symbol: symbol.into(),
            payload,
        }
    }
}

/// Result for one batch item. Failed items carry the task's default value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchOutcome<O> {
    pub symbol: String,
    pub result: O,
    pub success: bool,
    /// Failure cause when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

/// Complete, input-ordered result of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchReport<O> {
    pub outcomes: Vec<BatchOutcome<O>>,
    /// Number of outcomes carrying a default value.
    pub failed: usize,
    /// Whether the enrichment store accepted the write.
    pub persisted: bool,
}

impl<O> BatchReport<O> {
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

/// Chart-pattern flags from the vision enrichment stage. Default: all false.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PatternFlags {
    #[serde(default)]
    pub breakout: bool,
    #[serde(default)]
    pub bull_flag: bool,
    #[serde(default)]
    pub double_bottom: bool,
    #[serde(default)]
    pub cup_and_handle: bool,
    #[serde(default)]
    pub head_and_shoulders: bool,
    #[serde(default)]
    pub descending_triangle: bool,
}

impl PatternFlags {
    pub fn any(&self) -> bool {
        self.breakout
            || self.bull_flag
            || self.double_bottom
            || self.cup_and_handle
            || self.head_and_shoulders
            || self.descending_triangle
    }

    pub fn bullish_count(&self) -> usize {
        [
            self.breakout,
            self.bull_flag,
            self.double_bottom,
            self.cup_and_handle,
        ]
        .iter()
        .filter(|f| **f)
        .count()
    }
}

/// Social enrichment score. Default: neutral 0 with no mentions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SocialScore {
    /// -1.0 (bearish) .. 1.0 (bullish).
    pub score: Decimal,
    #[serde(default)]
    pub mentions: u64,
    #[serde(default)]
    pub summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_defaults_are_all_false() {
        let flags = PatternFlags::default();
        assert!(!flags.any());
        assert_eq!(flags.bullish_count(), 0);
    }

    #[test]
    fn bearish_patterns_do_not_count_as_bullish() {
        let flags = PatternFlags {
            head_and_shoulders: true,
            breakout: true,
            ..Default::default()
        };
        assert!(flags.any());
        assert_eq!(flags.bullish_count(), 1);
    }

    #[test]
    fn social_default_is_neutral() {
        let score = SocialScore::default();
        assert!(score.score.is_zero());
        assert_eq!(score.mentions, 0);
    }
}
