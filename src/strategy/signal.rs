//! Classification of free-text oracle recommendations.

/// Strength of buy signal a strategy requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuySignal {
    /// Any mention of "BUY".
    Buy,
    /// Only "STRONG BUY".
    StrongBuy,
}

impl BuySignal {
    pub fn keyword(&self) -> &'static str {
        match self {
            BuySignal::Buy => "BUY",
            BuySignal::StrongBuy => "STRONG BUY",
        }
    }
}

/// Case-insensitive substring match of the signal keyword.
///
/// Deliberately naive: "don't buy" and "BUYER" both match `Buy`.
pub fn is_affirmative(recommendation: &str, required: BuySignal) -> bool {
    recommendation.to_uppercase().contains(required.keyword())
}
