//! Danger score: five adverse signals, each clipped at zero on the favorable side,
//! weighted and summed. Unbounded above.

use crate::config::DangerConfig;
use crate::types::{BookSide, PriceSample};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;

/// Inputs for one evaluation. Identical inputs always give an identical result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DangerInputs {
    pub peak_confidence: Decimal,
    pub current_confidence: Decimal,
    /// Our side's book imbalance in [-1, 1]; negative means sellers dominate.
    pub our_side_imbalance: Decimal,
    /// Signed price change over the velocity window, positive in our favor.
    pub velocity: Decimal,
    pub opposing_ask: Option<Decimal>,
    pub remaining_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SignalValue {
    pub raw: Decimal,
    pub weighted: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DangerComponents {
    pub confidence_drop: SignalValue,
    pub book_imbalance: SignalValue,
    pub price_velocity: SignalValue,
    pub opposing_ask: SignalValue,
    pub time_decay: SignalValue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DangerScoreResult {
    pub score: Decimal,
    pub components: DangerComponents,
}

fn signal(raw: Decimal, weight: Decimal) -> SignalValue {
    let raw = raw.max(Decimal::ZERO);
    SignalValue {
        raw,
        weighted: raw * weight,
    }
}

/// Side-effect-free scoring.
pub fn score(inputs: &DangerInputs, config: &DangerConfig) -> DangerScoreResult {
    let w = &config.weights;

    let confidence_drop = signal(inputs.peak_confidence - inputs.current_confidence, w.confidence_drop);
    let book_imbalance = signal(
        -inputs.our_side_imbalance - config.imbalance_floor,
        w.book_imbalance,
    );
    let price_velocity = signal(-inputs.velocity, w.price_velocity);
    let opposing_ask = signal(
        inputs
            .opposing_ask
            .map(|ask| ask - config.opposing_ask_floor)
            .unwrap_or(Decimal::ZERO),
        w.opposing_ask,
    );
    let time_decay = signal(time_decay_ramp(inputs.remaining_secs, config.time_decay_window_secs), w.time_decay);

    let components = DangerComponents {
        confidence_drop,
        book_imbalance,
        price_velocity,
        opposing_ask,
        time_decay,
    };
    let score = components.confidence_drop.weighted
        + components.book_imbalance.weighted
        + components.price_velocity.weighted
        + components.opposing_ask.weighted
        + components.time_decay.weighted;

    DangerScoreResult { score, components }
}

/// 0 outside the final window, rising linearly to 1 at close.
fn time_decay_ramp(remaining_secs: u64, window_secs: u64) -> Decimal {
    if window_secs == 0 || remaining_secs >= window_secs {
        return Decimal::ZERO;
    }
    Decimal::from(window_secs - remaining_secs) / Decimal::from(window_secs)
}

/// (bid depth - ask depth) / total over the top `levels`. Zero for an empty book.
pub fn book_imbalance(side: &BookSide, levels: usize) -> Decimal {
    let (bid, ask) = side.top_depth(levels);
    let total = bid + ask;
    if total.is_zero() {
        return Decimal::ZERO;
    }
    (bid - ask) / total
}

/// Bounded, time-ordered ring of price samples for the velocity signal.
#[derive(Debug, Clone)]
pub struct PriceRing {
    capacity: usize,
    samples: VecDeque<PriceSample>,
}

impl PriceRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            samples: VecDeque::with_capacity(capacity.max(2)),
        }
    }

    /// Out-of-order samples are dropped.
    pub fn push(&mut self, sample: PriceSample) {
        if let Some(last) = self.samples.back() {
            if sample.timestamp_ms < last.timestamp_ms {
                return;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Newest minus oldest price; zero with fewer than two samples.
    pub fn velocity(&self) -> Decimal {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if self.samples.len() >= 2 => last.price - first.price,
            _ => Decimal::ZERO,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BookLevel;
    use rust_decimal_macros::dec;

    fn inputs() -> DangerInputs {
        DangerInputs {
            peak_confidence: dec!(0.95),
            current_confidence: dec!(0.85),
            our_side_imbalance: dec!(-0.35),
            velocity: dec!(-0.02),
            opposing_ask: Some(dec!(0.20)),
            remaining_secs: 200,
        }
    }

    #[test]
    fn worked_example_scores_below_alert() {
        let cfg = DangerConfig::default();
        let r = score(&inputs(), &cfg);
        assert_eq!(r.components.confidence_drop.weighted, dec!(0.30));
        assert_eq!(r.components.book_imbalance.weighted, dec!(0.02));
        assert_eq!(r.components.price_velocity.weighted, dec!(0.04));
        assert_eq!(r.components.opposing_ask.weighted, dec!(0.025));
        assert_eq!(r.components.time_decay.weighted, dec!(0));
        assert_eq!(r.score, dec!(0.385));
        assert!(r.score < dec!(0.40));
    }

    #[test]
    fn identical_inputs_identical_result() {
        let cfg = DangerConfig::default();
        let a = score(&inputs(), &cfg);
        let b = score(&inputs(), &cfg);
        assert_eq!(a, b);
    }

    #[test]
    fn favorable_signals_clip_to_zero() {
        let cfg = DangerConfig::default();
        let r = score(
            &DangerInputs {
                peak_confidence: dec!(0.95),
                current_confidence: dec!(0.97),
                our_side_imbalance: dec!(0.8),
                velocity: dec!(0.03),
                opposing_ask: Some(dec!(0.03)),
                remaining_secs: 120,
            },
            &cfg,
        );
        assert_eq!(r.score, dec!(0));
    }

    #[test]
    fn time_decay_ramps_to_full_weight() {
        let cfg = DangerConfig::default();
        let mut i = inputs();
        i.remaining_secs = 30;
        assert_eq!(score(&i, &cfg).components.time_decay.raw, dec!(0));
        i.remaining_secs = 15;
        assert_eq!(score(&i, &cfg).components.time_decay.raw, dec!(0.5));
        i.remaining_secs = 0;
        assert_eq!(score(&i, &cfg).components.time_decay.weighted, cfg.weights.time_decay);
    }

    #[test]
    fn score_is_not_capped() {
        let cfg = DangerConfig::default();
        let r = score(
            &DangerInputs {
                peak_confidence: dec!(0.99),
                current_confidence: dec!(0.01),
                our_side_imbalance: dec!(-1),
                velocity: dec!(-0.9),
                opposing_ask: Some(dec!(0.99)),
                remaining_secs: 0,
            },
            &cfg,
        );
        assert!(r.score > dec!(4));
    }

    #[test]
    fn ring_needs_two_samples() {
        let mut ring = PriceRing::new(5);
        assert_eq!(ring.velocity(), dec!(0));
        ring.push(PriceSample { timestamp_ms: 0, price: dec!(0.95) });
        assert_eq!(ring.velocity(), dec!(0));
        ring.push(PriceSample { timestamp_ms: 1000, price: dec!(0.90) });
        assert_eq!(ring.velocity(), dec!(-0.05));
    }

    #[test]
    fn ring_is_bounded() {
        let mut ring = PriceRing::new(3);
        for (i, p) in [dec!(0.90), dec!(0.91), dec!(0.92), dec!(0.97)].into_iter().enumerate() {
            ring.push(PriceSample { timestamp_ms: i as u64 * 1000, price: p });
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.velocity(), dec!(0.06));
    }

    #[test]
    fn imbalance_against_sellers() {
        let side = BookSide::from_levels(
            vec![BookLevel::new(dec!(0.90), dec!(10))],
            vec![BookLevel::new(dec!(0.92), dec!(30))],
        );
        assert_eq!(book_imbalance(&side, 5), dec!(-0.5));
        assert_eq!(book_imbalance(&BookSide::default(), 5), dec!(0));
    }
}
