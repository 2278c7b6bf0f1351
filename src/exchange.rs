//! Exchange client abstraction (paper or live). Every order here is a sell of one outcome.

use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{
    BookSide, OrderBookSnapshot, OrderKind, PositionReport, ResolvedMarket, Side, SidePosition,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::info;

/// Venue acknowledgement of a placed order. For IOC orders `filled` is final.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub filled: Decimal,
    pub avg_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatus {
    /// Cumulative filled quantity.
    pub filled: Decimal,
    pub avg_price: Option<Decimal>,
    /// Still resting on the book.
    pub open: bool,
}

#[async_trait]
pub trait Exchange: Send + Sync {
    /// Sell `qty` of `side` at limit `price`.
    async fn place_order(
        &self,
        market: &ResolvedMarket,
        side: Side,
        price: Decimal,
        qty: Decimal,
        kind: OrderKind,
    ) -> ExchangeResult<OrderAck>;

    async fn order_status(&self, order_id: &str) -> ExchangeResult<OrderStatus>;

    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<()>;

    /// Per-side quantity held. Lags settlement by up to a few seconds.
    async fn positions(&self, market: &ResolvedMarket) -> ExchangeResult<PositionReport>;

    async fn order_book(&self, market: &ResolvedMarket) -> ExchangeResult<OrderBookSnapshot>;

    /// Winning side, or `ResolutionUnavailable` while unresolved.
    async fn resolution(&self, market: &ResolvedMarket) -> ExchangeResult<Side>;
}

/// Order as sent to the paper venue.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub kind: OrderKind,
    /// Filled immediately on placement.
    pub filled: Decimal,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    side: Side,
    price: Decimal,
    qty: Decimal,
    filled: Decimal,
    notional: Decimal,
    open: bool,
}

impl PaperOrder {
    fn avg_price(&self) -> Option<Decimal> {
        (self.filled > Decimal::ZERO).then(|| self.notional / self.filled)
    }
}

#[derive(Default)]
struct PaperState {
    book: OrderBookSnapshot,
    holdings: HashMap<Side, Decimal>,
    reported_positions: Option<PositionReport>,
    orders: HashMap<String, PaperOrder>,
    next_order: u64,
    place_failures: VecDeque<ExchangeError>,
    cancel_failures: VecDeque<ExchangeError>,
    resting_delay: Option<Duration>,
    book_failure: Option<ExchangeError>,
    book_delay: Option<Duration>,
    resolution: Option<Side>,
    placed: Vec<PlacedOrder>,
}

impl PaperState {
    fn locked(&self, side: Side) -> Decimal {
        self.orders
            .values()
            .filter(|o| o.open && o.side == side)
            .map(|o| o.qty - o.filled)
            .sum()
    }

    /// Match open resting orders against the current bids.
    fn match_resting(&mut self) {
        let PaperState {
            book,
            holdings,
            orders,
            ..
        } = self;
        for order in orders.values_mut().filter(|o| o.open) {
            let remaining = order.qty - order.filled;
            let (filled, notional) = take_bids(book.side_mut(order.side), order.price, remaining);
            if filled > Decimal::ZERO {
                order.filled += filled;
                order.notional += notional;
                *holdings.entry(order.side).or_default() -= filled;
                if order.filled >= order.qty {
                    order.open = false;
                }
            }
        }
    }
}

/// Consume bid levels at or above `limit`, best first, up to `qty`. Returns (filled, notional).
fn take_bids(side: &mut BookSide, limit: Decimal, qty: Decimal) -> (Decimal, Decimal) {
    let mut filled = Decimal::ZERO;
    let mut notional = Decimal::ZERO;
    for level in side.bids.iter_mut() {
        if filled >= qty || level.price < limit {
            break;
        }
        let take = level.size.min(qty - filled);
        level.size -= take;
        filled += take;
        notional += take * level.price;
    }
    side.bids.retain(|l| l.size > Decimal::ZERO);
    (filled, notional)
}

/// Public order books for the paper venue.
#[derive(Clone)]
struct PublicFeed {
    client: reqwest::Client,
    clob_host: String,
    gamma_base_url: String,
}

/// Simulated venue. Fills against its current book; used for dry-run and tests.
#[derive(Default)]
pub struct PaperExchange {
    state: Mutex<PaperState>,
    feed: Option<PublicFeed>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read real books from the public CLOB and resolutions from Gamma.
    pub fn with_public_feed(client: reqwest::Client, clob_host: &str, gamma_base_url: &str) -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            feed: Some(PublicFeed {
                client,
                clob_host: clob_host.trim_end_matches('/').to_string(),
                gamma_base_url: gamma_base_url.trim_end_matches('/').to_string(),
            }),
        }
    }

    pub fn set_book(&self, book: OrderBookSnapshot) {
        let mut state = self.state.lock();
        state.book = book;
        state.match_resting();
    }

    /// Simulated entry fill.
    pub fn credit(&self, side: Side, qty: Decimal) {
        *self.state.lock().holdings.entry(side).or_default() += qty;
    }

    pub fn holdings(&self, side: Side) -> Decimal {
        self.state.lock().holdings.get(&side).copied().unwrap_or_default()
    }

    /// Override what `positions` reports (simulates a lagging ledger). `None` reports holdings.
    pub fn set_reported_positions(&self, report: Option<PositionReport>) {
        self.state.lock().reported_positions = report;
    }

    pub fn fail_next_place(&self, err: ExchangeError) {
        self.state.lock().place_failures.push_back(err);
    }

    pub fn fail_next_cancel(&self, err: ExchangeError) {
        self.state.lock().cancel_failures.push_back(err);
    }

    /// Hold resting placements for `delay` before they reach the book.
    pub fn set_resting_delay(&self, delay: Option<Duration>) {
        self.state.lock().resting_delay = delay;
    }

    pub fn set_book_failure(&self, err: Option<ExchangeError>) {
        self.state.lock().book_failure = err;
    }

    pub fn set_book_delay(&self, delay: Option<Duration>) {
        self.state.lock().book_delay = delay;
    }

    pub fn set_resolution(&self, winner: Option<Side>) {
        self.state.lock().resolution = winner;
    }

    pub fn placed(&self) -> Vec<PlacedOrder> {
        self.state.lock().placed.clone()
    }

    pub fn open_orders(&self) -> usize {
        self.state.lock().orders.values().filter(|o| o.open).count()
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn place_order(
        &self,
        _market: &ResolvedMarket,
        side: Side,
        price: Decimal,
        qty: Decimal,
        kind: OrderKind,
    ) -> ExchangeResult<OrderAck> {
        if kind == OrderKind::Resting {
            let delay = self.state.lock().resting_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        let mut state = self.state.lock();
        if let Some(err) = state.place_failures.pop_front() {
            return Err(err);
        }
        let held = state.holdings.get(&side).copied().unwrap_or_default();
        if qty > held - state.locked(side) {
            return Err(ExchangeError::from_venue_message(
                "not enough balance / allowance",
            ));
        }

        let no_bids = state.book.side(side).bids.is_empty();
        let (filled, notional) = take_bids(state.book.side_mut(side), price, qty);
        *state.holdings.entry(side).or_default() -= filled;
        state.next_order += 1;
        let order_id = format!("paper-{}", state.next_order);
        let order = PaperOrder {
            side,
            price,
            qty,
            filled,
            notional,
            open: kind == OrderKind::Resting && filled < qty,
        };
        let avg_price = order.avg_price();
        state.orders.insert(order_id.clone(), order);
        state.placed.push(PlacedOrder {
            order_id: order_id.clone(),
            side,
            price,
            qty,
            kind,
            filled,
        });
        info!(order_id = %order_id, side = side.as_str(), %price, %qty, ?kind, %filled, "[Paper] sell placed");

        if kind == OrderKind::ImmediateOrCancel && no_bids {
            return Err(ExchangeError::CatastrophicLiquidity(
                "no bids on the book".to_string(),
            ));
        }
        if kind == OrderKind::ImmediateOrCancel && filled.is_zero() {
            return Err(ExchangeError::from_venue_message(
                "no orders found to match with FAK order",
            ));
        }
        Ok(OrderAck {
            order_id,
            filled,
            avg_price,
        })
    }

    async fn order_status(&self, order_id: &str) -> ExchangeResult<OrderStatus> {
        let mut state = self.state.lock();
        state.match_resting();
        let order = state
            .orders
            .get(order_id)
            .ok_or_else(|| ExchangeError::RejectedOrder(format!("unknown order {order_id}")))?;
        Ok(OrderStatus {
            filled: order.filled,
            avg_price: order.avg_price(),
            open: order.open,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.cancel_failures.pop_front() {
            return Err(err);
        }
        match state.orders.get_mut(order_id) {
            Some(order) => {
                order.open = false;
                Ok(())
            }
            None => Err(ExchangeError::RejectedOrder(format!("unknown order {order_id}"))),
        }
    }

    async fn positions(&self, _market: &ResolvedMarket) -> ExchangeResult<PositionReport> {
        let state = self.state.lock();
        if let Some(report) = state.reported_positions {
            return Ok(report);
        }
        let held = |side| SidePosition {
            size: state.holdings.get(&side).copied().unwrap_or_default(),
            avg_price: None,
        };
        Ok(PositionReport {
            up: held(Side::Up),
            down: held(Side::Down),
        })
    }

    async fn order_book(&self, market: &ResolvedMarket) -> ExchangeResult<OrderBookSnapshot> {
        let (delay, failure) = {
            let state = self.state.lock();
            (state.book_delay, state.book_failure.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }
        if let Some(feed) = &self.feed {
            let book = crate::clob::fetch_book_snapshot(&feed.client, &feed.clob_host, market).await?;
            let mut state = self.state.lock();
            state.book = book;
            state.match_resting();
        }
        Ok(self.state.lock().book.clone())
    }

    async fn resolution(&self, market: &ResolvedMarket) -> ExchangeResult<Side> {
        let preset = self.state.lock().resolution;
        if let Some(winner) = preset {
            return Ok(winner);
        }
        match &self.feed {
            Some(feed) => {
                crate::market::fetch_resolution(&feed.client, &feed.gamma_base_url, &market.slug).await
            }
            None => Err(ExchangeError::ResolutionUnavailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BookLevel;
    use rust_decimal_macros::dec;

    fn market() -> ResolvedMarket {
        ResolvedMarket {
            slug: "btc-updown-5m-1000".into(),
            condition_id: "0xc".into(),
            close_time_unix: 1300,
            interval_start_unix: 1000,
            token_id_up: "1".into(),
            token_id_down: "2".into(),
        }
    }

    fn book(bids: Vec<(Decimal, Decimal)>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            timestamp_ms: 0,
            up: BookSide::from_levels(
                bids.into_iter().map(|(p, s)| BookLevel::new(p, s)).collect(),
                vec![BookLevel::new(dec!(0.995), dec!(100))],
            ),
            down: BookSide::default(),
        }
    }

    #[tokio::test]
    async fn ioc_fills_against_depth_only() {
        let ex = PaperExchange::new();
        ex.credit(Side::Up, dec!(10));
        ex.set_book(book(vec![(dec!(0.50), dec!(4)), (dec!(0.48), dec!(3))]));
        let ack = ex
            .place_order(&market(), Side::Up, dec!(0.49), dec!(10), OrderKind::ImmediateOrCancel)
            .await
            .unwrap();
        assert_eq!(ack.filled, dec!(4));
        assert_eq!(ex.holdings(Side::Up), dec!(6));
        assert_eq!(ex.open_orders(), 0);
    }

    #[tokio::test]
    async fn resting_order_locks_balance_until_cancelled() {
        let ex = PaperExchange::new();
        ex.credit(Side::Up, dec!(10));
        ex.set_book(book(vec![(dec!(0.90), dec!(50))]));
        let ack = ex
            .place_order(&market(), Side::Up, dec!(0.99), dec!(10), OrderKind::Resting)
            .await
            .unwrap();
        assert_eq!(ack.filled, dec!(0));
        let err = ex
            .place_order(&market(), Side::Up, dec!(0.50), dec!(5), OrderKind::ImmediateOrCancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientBalance(_)));

        ex.set_book(book(vec![(dec!(0.99), dec!(6))]));
        let status = ex.order_status(&ack.order_id).await.unwrap();
        assert_eq!(status.filled, dec!(6));
        assert!(status.open);
        ex.cancel_order(&ack.order_id).await.unwrap();
        assert_eq!(ex.open_orders(), 0);
    }

    #[tokio::test]
    async fn unmatched_ioc_is_rejected() {
        let ex = PaperExchange::new();
        ex.credit(Side::Up, dec!(5));
        ex.set_book(book(vec![(dec!(0.40), dec!(5))]));
        let err = ex
            .place_order(&market(), Side::Up, dec!(0.45), dec!(5), OrderKind::ImmediateOrCancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::RejectedOrder(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn ioc_into_empty_bids_reports_no_liquidity() {
        let ex = PaperExchange::new();
        ex.credit(Side::Up, dec!(5));
        ex.set_book(book(vec![]));
        let err = ex
            .place_order(&market(), Side::Up, dec!(0.01), dec!(5), OrderKind::ImmediateOrCancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::CatastrophicLiquidity(_)));
        assert_eq!(ex.holdings(Side::Up), dec!(5));
    }

    #[tokio::test]
    async fn failed_cancel_leaves_order_resting() {
        let ex = PaperExchange::new();
        ex.credit(Side::Up, dec!(10));
        ex.set_book(book(vec![(dec!(0.90), dec!(50))]));
        let ack = ex
            .place_order(&market(), Side::Up, dec!(0.99), dec!(10), OrderKind::Resting)
            .await
            .unwrap();
        ex.fail_next_cancel(ExchangeError::NetworkTransient("reset".into()));
        assert!(ex.cancel_order(&ack.order_id).await.is_err());
        assert_eq!(ex.open_orders(), 1);
        ex.cancel_order(&ack.order_id).await.unwrap();
        assert_eq!(ex.open_orders(), 0);
    }
}
