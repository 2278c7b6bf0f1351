//! Shared data model: sides, order books, price samples, exit tiers and decisions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a trading window (the market slug, e.g. `btc-updown-5m-1771997100`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(String);

impl WindowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which of the two binary outcomes was purchased: Up (YES) or Down (NO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Up => "Up",
            Side::Down => "Down",
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" | "yes" => Ok(Side::Up),
            "down" | "no" => Ok(Side::Down),
            other => Err(format!("unknown side {other:?}")),
        }
    }
}

/// Resting limit (GTC) vs. immediate-or-cancel liquidation (FAK).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Resting,
    ImmediateOrCancel,
}

/// One price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Book for one outcome token. Bids sorted descending, asks ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSide {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl BookSide {
    /// Build from unsorted levels; zero prices and sizes are dropped.
    pub fn from_levels(bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> Self {
        let mut bids: Vec<BookLevel> = bids
            .into_iter()
            .filter(|l| !l.price.is_zero() && !l.size.is_zero())
            .collect();
        let mut asks: Vec<BookLevel> = asks
            .into_iter()
            .filter(|l| !l.price.is_zero() && !l.size.is_zero())
            .collect();
        // Do not assume API sort order
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self { bids, asks }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price, or whichever side exists.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }

    /// Total bid size resting at or above `min_price`.
    pub fn bid_depth_at_or_above(&self, min_price: Decimal) -> Decimal {
        self.bids
            .iter()
            .take_while(|l| l.price >= min_price)
            .map(|l| l.size)
            .sum()
    }

    /// Sum of sizes over the top `levels` bids and asks.
    pub fn top_depth(&self, levels: usize) -> (Decimal, Decimal) {
        let bid: Decimal = self.bids.iter().take(levels).map(|l| l.size).sum();
        let ask: Decimal = self.asks.iter().take(levels).map(|l| l.size).sum();
        (bid, ask)
    }
}

/// Books for both outcome tokens at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub timestamp_ms: u64,
    pub up: BookSide,
    pub down: BookSide,
}

impl OrderBookSnapshot {
    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Up => &self.up,
            Side::Down => &self.down,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Up => &mut self.up,
            Side::Down => &mut self.down,
        }
    }

    pub fn has_data(&self) -> bool {
        let any = |s: &BookSide| !s.bids.is_empty() || !s.asks.is_empty();
        any(&self.up) || any(&self.down)
    }
}

/// `(timestamp, price)` sample for the velocity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceSample {
    pub timestamp_ms: u64,
    pub price: Decimal,
}

/// Where a reported share count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareSource {
    /// Fill confirmation delivered by the entry component.
    FillConfirmation,
    /// `getOrderStatus` on the entry order.
    OrderStatus,
    /// `getPositions`; lags settlement by up to a few seconds.
    PositionsApi,
}

/// Exit tiers in ascending order of aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExitTier {
    ProfitLock = 0,
    DangerExit = 1,
    HardStop = 2,
    SafetyExit = 3,
}

impl ExitTier {
    pub const ALL: [ExitTier; 4] = [
        ExitTier::ProfitLock,
        ExitTier::DangerExit,
        ExitTier::HardStop,
        ExitTier::SafetyExit,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Next tier up; `None` for the most aggressive tier.
    pub fn next(self) -> Option<ExitTier> {
        match self {
            ExitTier::ProfitLock => Some(ExitTier::DangerExit),
            ExitTier::DangerExit => Some(ExitTier::HardStop),
            ExitTier::HardStop => Some(ExitTier::SafetyExit),
            ExitTier::SafetyExit => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExitTier::ProfitLock => "PROFIT_LOCK",
            ExitTier::DangerExit => "DANGER_EXIT",
            ExitTier::HardStop => "HARD_STOP",
            ExitTier::SafetyExit => "SAFETY_EXIT",
        }
    }
}

impl fmt::Display for ExitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitState {
    Holding,
    ProfitLockPending,
    Exiting,
    Exited,
}

/// One liquidation attempt batch, appended to telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDecision {
    pub tier: ExitTier,
    pub trigger_value: Decimal,
    pub requested_qty: Decimal,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub pnl_delta: Decimal,
}

/// Per-side quantity reported by the positions endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SidePosition {
    pub size: Decimal,
    pub avg_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionReport {
    pub up: SidePosition,
    pub down: SidePosition,
}

impl PositionReport {
    pub fn side(&self, side: Side) -> SidePosition {
        match side {
            Side::Up => self.up,
            Side::Down => self.down,
        }
    }
}

/// Resolved 5m market from Gamma.
#[derive(Debug, Clone)]
pub struct ResolvedMarket {
    pub slug: String,
    pub condition_id: String,
    pub close_time_unix: u64,
    pub interval_start_unix: u64,
    pub token_id_up: String,
    pub token_id_down: String,
}

impl ResolvedMarket {
    pub fn window_id(&self) -> WindowId {
        WindowId::new(self.slug.clone())
    }

    pub fn token_id(&self, side: Side) -> &str {
        match side {
            Side::Up => &self.token_id_up,
            Side::Down => &self.token_id_down,
        }
    }

    pub fn close_time_ms(&self) -> u64 {
        self.close_time_unix * 1000
    }
}

/// Gamma API market response (minimal).
#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    #[serde(rename = "conditionId")]
    pub condition_id: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    #[serde(rename = "endDateIso")]
    pub end_date_iso: Option<String>,
    #[serde(rename = "clobTokenIds")]
    pub clob_token_ids: Option<String>,
    pub tokens: Option<Vec<GammaToken>>,
    pub closed: Option<bool>,
    #[serde(rename = "outcomePrices")]
    pub outcome_prices: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GammaToken {
    #[serde(rename = "token_id")]
    pub token_id: Option<String>,
    pub outcome: Option<String>,
}

/// Gamma event response (for /events/slug/...).
#[derive(Debug, Clone, Deserialize)]
pub struct GammaEvent {
    pub markets: Option<Vec<GammaMarket>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn book_side_sorts_unordered_levels() {
        let side = BookSide::from_levels(
            vec![
                BookLevel::new(dec!(0.50), dec!(10)),
                BookLevel::new(dec!(0.55), dec!(4)),
                BookLevel::new(dec!(0), dec!(100)),
            ],
            vec![
                BookLevel::new(dec!(0.60), dec!(3)),
                BookLevel::new(dec!(0.57), dec!(8)),
            ],
        );
        assert_eq!(side.best_bid(), Some(dec!(0.55)));
        assert_eq!(side.best_ask(), Some(dec!(0.57)));
        assert_eq!(side.bids.len(), 2);
        assert_eq!(side.mid(), Some(dec!(0.56)));
    }

    #[test]
    fn bid_depth_stops_at_price() {
        let side = BookSide::from_levels(
            vec![
                BookLevel::new(dec!(0.50), dec!(3)),
                BookLevel::new(dec!(0.49), dec!(2)),
                BookLevel::new(dec!(0.40), dec!(50)),
            ],
            vec![],
        );
        assert_eq!(side.bid_depth_at_or_above(dec!(0.49)), dec!(5));
        assert_eq!(side.bid_depth_at_or_above(dec!(0.60)), dec!(0));
    }

    #[test]
    fn tier_escalation_order() {
        assert_eq!(ExitTier::ProfitLock.next(), Some(ExitTier::DangerExit));
        assert_eq!(ExitTier::HardStop.next(), Some(ExitTier::SafetyExit));
        assert_eq!(ExitTier::SafetyExit.next(), None);
        assert!(ExitTier::DangerExit < ExitTier::HardStop);
    }
}
