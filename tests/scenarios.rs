//! End-to-end ladder scenarios against the paper venue.

use capture_guard::config::Config;
use capture_guard::danger::{self, DangerInputs};
use capture_guard::engine::Engine;
use capture_guard::error::ExchangeError;
use capture_guard::exchange::PaperExchange;
use capture_guard::ladder::{ExitLadder, TickObservation};
use capture_guard::position::Reconciler;
use capture_guard::telemetry::{EventKind, MemoryTelemetry};
use capture_guard::types::{
    BookLevel, BookSide, ExitTier, OrderBookSnapshot, OrderKind, PositionReport, ResolvedMarket,
    Side, SidePosition, WindowId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const OPEN_MS: u64 = 1_000_000;

fn fast_config() -> Config {
    let mut c = Config::default();
    c.session_log_enabled = false;
    c.read_timeout = Duration::from_millis(50);
    c.position_poll_ticks = 1;
    c.retry.profit_lock_backoff = Duration::from_millis(10);
    c.retry.profit_lock_poll_interval = Duration::from_millis(10);
    c.retry.danger_exit.backoff = Duration::from_millis(10);
    c.retry.hard_stop.backoff = Duration::from_millis(10);
    c.retry.max_task_duration = Duration::from_secs(5);
    c.retry.resolution_attempts = 3;
    c.retry.resolution_backoff = Duration::from_millis(10);
    c
}

fn market(start: u64) -> ResolvedMarket {
    ResolvedMarket {
        slug: format!("btc-updown-5m-{start}"),
        condition_id: "0xabc".into(),
        close_time_unix: start + 300,
        interval_start_unix: start,
        token_id_up: "111".into(),
        token_id_down: "222".into(),
    }
}

fn book(up_bids: &[(Decimal, Decimal)], up_ask: Decimal, down_ask: Decimal) -> OrderBookSnapshot {
    OrderBookSnapshot {
        timestamp_ms: 0,
        up: BookSide::from_levels(
            up_bids.iter().map(|(p, s)| BookLevel::new(*p, *s)).collect(),
            vec![BookLevel::new(up_ask, dec!(5))],
        ),
        down: BookSide::from_levels(
            vec![BookLevel::new(dec!(0.01), dec!(100))],
            vec![BookLevel::new(down_ask, dec!(100))],
        ),
    }
}

fn calm_book() -> OrderBookSnapshot {
    book(&[(dec!(0.94), dec!(50))], dec!(0.95), dec!(0.06))
}

/// Own bid holds above the hard stop while confidence drops and the other side firms up.
fn reversal_book() -> OrderBookSnapshot {
    book(
        &[(dec!(0.70), dec!(2)), (dec!(0.69), dec!(3)), (dec!(0.66), dec!(20))],
        dec!(0.72),
        dec!(0.30),
    )
}

struct Harness {
    engine: Engine,
    paper: Arc<PaperExchange>,
    telemetry: Arc<MemoryTelemetry>,
    window: WindowId,
}

impl Harness {
    fn new(config: Config) -> Self {
        let paper = Arc::new(PaperExchange::new());
        let telemetry = Arc::new(MemoryTelemetry::default());
        let mut engine = Engine::new(config, paper.clone(), telemetry.clone());
        engine.start_window(market(1_000));
        let window = engine.window_id().cloned().unwrap();
        Self {
            engine,
            paper,
            telemetry,
            window,
        }
    }

    /// Capture fill of `qty` Up shares at 0.95, credited on the paper venue.
    fn fill(&mut self, qty: Decimal) {
        self.fill_at(qty, OPEN_MS);
    }

    fn fill_at(&mut self, qty: Decimal, now_ms: u64) {
        self.paper.credit(Side::Up, qty);
        self.paper.set_book(calm_book());
        self.engine
            .on_fill(&self.window, Side::Up, qty, qty, dec!(0.95), now_ms)
            .unwrap();
    }

    fn exited(&self) -> bool {
        self.engine
            .reconciler()
            .snapshot()
            .map_or(false, |p| p.is_exited())
    }

    fn ioc_orders(&self) -> Vec<(Decimal, Decimal)> {
        self.paper
            .placed()
            .into_iter()
            .filter(|o| o.kind == OrderKind::ImmediateOrCancel)
            .map(|o| (o.price, o.qty))
            .collect()
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn profit_lock_fill_exits_with_locked_spread() {
    let mut h = Harness::new(fast_config());
    h.fill(dec!(10));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockPlaced) == 1).await);

    let placed = h.paper.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].kind, OrderKind::Resting);
    assert_eq!(placed[0].price, dec!(0.99));
    assert_eq!(placed[0].qty, dec!(10));

    h.paper
        .set_book(book(&[(dec!(0.99), dec!(20))], dec!(0.995), dec!(0.02)));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockFilled) == 1).await);

    let pos = h.engine.reconciler().snapshot().unwrap();
    assert!(pos.is_exited());
    assert_eq!(pos.realized_pnl, dec!(0.40));
    assert_eq!(h.telemetry.count(EventKind::Exited), 1);
    assert_eq!(h.telemetry.count(EventKind::LiquidationAttempt), 0);
    assert!(!pos.tier_has_fired(ExitTier::HardStop));
}

#[tokio::test]
async fn crash_cancels_profit_lock_then_hard_stop_chunks_to_depth() {
    let mut h = Harness::new(fast_config());
    h.fill(dec!(10));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockPlaced) == 1).await);

    let crash = book(
        &[(dec!(0.55), dec!(4)), (dec!(0.50), dec!(3)), (dec!(0.48), dec!(10))],
        dec!(0.56),
        dec!(0.45),
    );
    h.paper.set_book(crash.clone());

    let first = h.engine.evaluate_tick(OPEN_MS + 1_000, Some(&crash));
    assert!(first.fired.is_empty());
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockCancelled) == 1).await);

    let second = h.engine.evaluate_tick(OPEN_MS + 2_000, Some(&crash));
    assert!(second.fired.iter().any(|t| t.tier == ExitTier::HardStop));
    assert!(wait_until(|| h.exited() && h.telemetry.count(EventKind::ExitDecision) == 1).await);

    let iocs = h.ioc_orders();
    assert_eq!(iocs.first(), Some(&(dec!(0.50), dec!(7))));
    let total: Decimal = iocs.iter().map(|(_, q)| *q).sum();
    assert!(total <= dec!(10));

    let pos = h.engine.reconciler().snapshot().unwrap();
    assert_eq!(pos.sold_shares, dec!(10));
    // 4 @ 0.55 + 3 @ 0.50 + 3 @ 0.48 against a 0.95 entry.
    assert!((pos.realized_pnl - dec!(-4.36)).abs() < dec!(0.0001));
    assert_eq!(h.telemetry.count(EventKind::Exited), 1);
    let decision = &pos.decisions[0];
    assert_eq!(decision.tier, ExitTier::HardStop);
    assert_eq!(decision.filled_qty, dec!(10));
}

#[test]
fn worked_danger_example_does_not_fire() {
    let config = Config::default();
    let result = danger::score(
        &DangerInputs {
            peak_confidence: dec!(0.95),
            current_confidence: dec!(0.85),
            our_side_imbalance: dec!(-0.35),
            velocity: dec!(-0.02),
            opposing_ask: Some(dec!(0.20)),
            remaining_secs: 200,
        },
        &config.danger,
    );
    assert_eq!(result.score, dec!(0.385));

    let rec = Reconciler::new(config.venue.clone(), Arc::new(MemoryTelemetry::default()));
    let w = WindowId::new("btc-updown-5m-1000");
    rec.open_window(w.clone());
    rec.open_position(&w, Side::Up, dec!(10), dec!(10), dec!(0.95), 0)
        .unwrap();
    let ladder = ExitLadder::new(config.ladder.clone(), config.venue.clone());
    for tick in 1..=5u64 {
        let outcome = rec
            .update(&w, |pos| {
                ladder.evaluate(
                    pos,
                    &TickObservation {
                        now_ms: tick * 1_000,
                        remaining_secs: 200,
                        own_bid: Some(dec!(0.85)),
                        opposing_ask: Some(dec!(0.20)),
                        danger: Some(result),
                    },
                )
            })
            .unwrap();
        assert!(outcome.fired.is_empty());
    }
}

#[tokio::test]
async fn lagging_positions_report_never_lowers_trusted_shares() {
    let mut h = Harness::new(fast_config());
    h.fill(dec!(6));
    h.paper.set_reported_positions(Some(PositionReport {
        up: SidePosition {
            size: dec!(0),
            avg_price: None,
        },
        down: SidePosition::default(),
    }));

    h.engine.tick(OPEN_MS + 1_000).await;
    h.engine.tick(OPEN_MS + 2_000).await;

    let pos = h.engine.reconciler().snapshot().unwrap();
    assert_eq!(pos.trusted_shares(), dec!(6));
    assert!(h.telemetry.count(EventKind::StaleData) >= 1);
}

#[tokio::test]
async fn safety_exit_sends_one_floor_order() {
    let mut h = Harness::new(fast_config());
    h.fill(dec!(10));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockPlaced) == 1).await);

    let thin = book(&[(dec!(0.45), dec!(3))], dec!(0.50), dec!(0.60));
    h.paper.set_book(thin.clone());
    // 8 seconds before close.
    let report = h.engine.evaluate_tick(1_292_000, Some(&thin));
    assert_eq!(report.remaining_secs, 8);
    assert!(report.fired.iter().any(|t| t.tier == ExitTier::SafetyExit));

    assert!(wait_until(|| h.exited() && h.telemetry.count(EventKind::ExitDecision) == 1).await);
    assert_eq!(h.ioc_orders(), vec![(dec!(0.01), dec!(10))]);
    assert_eq!(h.telemetry.count(EventKind::LiquidationAttempt), 1);
    assert_eq!(h.telemetry.count(EventKind::Exited), 1);
    let pos = h.engine.reconciler().snapshot().unwrap();
    assert_eq!(pos.sold_shares, dec!(3));
    assert_eq!(pos.realized_pnl, dec!(-1.50));
}

#[tokio::test]
async fn background_task_stops_after_window_change() {
    let mut config = fast_config();
    config.retry.hard_stop.max_attempts = 200;
    config.retry.hard_stop.backoff = Duration::from_millis(20);
    let mut h = Harness::new(config);
    h.fill(dec!(10));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockPlaced) == 1).await);

    // Asks but no bids: every IOC reports no liquidity.
    let empty = book(&[], dec!(0.40), dec!(0.70));
    h.paper.set_book(empty.clone());
    h.paper.set_resolution(Some(Side::Down));
    h.engine.evaluate_tick(OPEN_MS + 1_000, Some(&empty));
    h.engine.evaluate_tick(OPEN_MS + 2_000, Some(&empty));
    assert!(wait_until(|| h.telemetry.count(EventKind::LiquidationAttempt) >= 2).await);

    h.engine.start_window(market(1_300));
    let attempts = h.telemetry.count(EventKind::LiquidationAttempt);
    let placed = h.paper.placed().len();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(h.telemetry.count(EventKind::LiquidationAttempt), attempts);
    assert_eq!(h.paper.placed().len(), placed);
    assert_eq!(h.telemetry.count(EventKind::WindowArchived), 1);
    assert!(wait_until(|| h.telemetry.count(EventKind::Resolution) == 1).await);
    let resolution = h
        .telemetry
        .events()
        .into_iter()
        .find(|(k, _)| *k == EventKind::Resolution)
        .map(|(_, v)| v)
        .unwrap();
    assert_eq!(resolution["won"], false);
    assert!(h.engine.scheduler().drain(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn exhausted_hard_stop_escalates_to_safety_exit_once() {
    let mut config = fast_config();
    config.retry.hard_stop.max_attempts = 2;
    let mut h = Harness::new(config);
    h.fill(dec!(10));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockPlaced) == 1).await);

    let empty = book(&[], dec!(0.40), dec!(0.70));
    h.paper.set_book(empty.clone());
    h.engine.evaluate_tick(OPEN_MS + 1_000, Some(&empty));
    let fired = h.engine.evaluate_tick(OPEN_MS + 2_000, Some(&empty));
    assert!(fired.fired.iter().any(|t| t.tier == ExitTier::HardStop));
    assert!(wait_until(|| h.telemetry.count(EventKind::Escalation) == 1).await);
    assert!(!h.exited());

    let recovered = book(&[(dec!(0.30), dec!(100))], dec!(0.35), dec!(0.70));
    h.paper.set_book(recovered.clone());
    let report = h.engine.evaluate_tick(OPEN_MS + 3_000, Some(&recovered));
    assert!(report.fired.iter().any(|t| t.tier == ExitTier::SafetyExit));

    assert!(wait_until(|| h.exited()).await);
    assert!(h.engine.scheduler().drain(Duration::from_secs(2)).await);
    assert_eq!(h.telemetry.count(EventKind::Exited), 1);
    let pos = h.engine.reconciler().snapshot().unwrap();
    assert_eq!(pos.sold_shares, dec!(10));
    assert!(pos.tier_has_fired(ExitTier::HardStop));
    assert!(pos.tier_has_fired(ExitTier::SafetyExit));
}

#[tokio::test]
async fn insufficient_balance_marks_position_exited() {
    let mut h = Harness::new(fast_config());
    h.fill(dec!(10));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockPlaced) == 1).await);

    let crash = book(&[(dec!(0.50), dec!(50))], dec!(0.52), dec!(0.45));
    h.paper.set_book(crash.clone());
    h.engine.evaluate_tick(OPEN_MS + 1_000, Some(&crash));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockCancelled) == 1).await);

    h.paper.fail_next_place(ExchangeError::from_venue_message(
        "not enough balance / allowance",
    ));
    h.engine.evaluate_tick(OPEN_MS + 2_000, Some(&crash));

    assert!(wait_until(|| h.exited()).await);
    assert!(h.engine.scheduler().drain(Duration::from_secs(2)).await);
    assert_eq!(h.telemetry.count(EventKind::Exited), 1);
    assert_eq!(h.ioc_orders().len(), 0);
    assert_eq!(h.engine.reconciler().snapshot().unwrap().sold_shares, dec!(0));
}

#[tokio::test]
async fn slow_book_read_does_not_block_the_tick() {
    let mut h = Harness::new(fast_config());
    h.fill(dec!(10));
    h.paper.set_book_delay(Some(Duration::from_millis(500)));

    let started = std::time::Instant::now();
    let report = h.engine.tick(OPEN_MS + 1_000).await;
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(report.stale);
    assert!(report.fired.is_empty());
    assert_eq!(h.engine.reconciler().snapshot().unwrap().trusted_shares(), dec!(10));
}

#[tokio::test]
async fn danger_exit_sells_in_depth_sized_chunks() {
    let mut h = Harness::new(fast_config());
    h.fill(dec!(10));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockPlaced) == 1).await);

    h.engine.evaluate_tick(OPEN_MS + 1_000, Some(&calm_book()));
    let reversal = reversal_book();
    h.paper.set_book(reversal.clone());
    let first = h.engine.evaluate_tick(OPEN_MS + 2_000, Some(&reversal));
    assert!(first.fired.is_empty());
    assert!(first.danger.unwrap().score >= dec!(0.40));
    let second = h.engine.evaluate_tick(OPEN_MS + 3_000, Some(&reversal));
    assert!(second.fired.iter().any(|t| t.tier == ExitTier::DangerExit));
    assert!(!second.fired.iter().any(|t| t.tier == ExitTier::HardStop));

    assert!(wait_until(|| h.exited() && h.telemetry.count(EventKind::ExitDecision) == 1).await);
    assert_eq!(h.telemetry.count(EventKind::ProfitLockCancelled), 1);
    assert_eq!(h.ioc_orders(), vec![(dec!(0.68), dec!(5)), (dec!(0.64), dec!(5))]);

    let pos = h.engine.reconciler().snapshot().unwrap();
    assert_eq!(pos.sold_shares, dec!(10));
    // 2 @ 0.70 + 3 @ 0.69 + 5 @ 0.66 against a 0.95 entry.
    assert_eq!(pos.realized_pnl, dec!(-2.73));
    assert_eq!(pos.decisions[0].tier, ExitTier::DangerExit);
    assert_eq!(h.paper.open_orders(), 0);
}

#[tokio::test]
async fn exhausted_danger_exit_hands_over_to_hard_stop() {
    let mut config = fast_config();
    config.retry.danger_exit.max_attempts = 2;
    let mut h = Harness::new(config);
    h.fill(dec!(10));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockPlaced) == 1).await);

    for _ in 0..2 {
        h.paper.fail_next_place(ExchangeError::from_venue_message(
            "no orders found to match with FAK order",
        ));
    }
    h.engine.evaluate_tick(OPEN_MS + 1_000, Some(&calm_book()));
    let reversal = reversal_book();
    h.paper.set_book(reversal.clone());
    h.engine.evaluate_tick(OPEN_MS + 2_000, Some(&reversal));
    let fired = h.engine.evaluate_tick(OPEN_MS + 3_000, Some(&reversal));
    assert!(fired.fired.iter().any(|t| t.tier == ExitTier::DangerExit));
    assert!(wait_until(|| h.telemetry.count(EventKind::Escalation) == 1).await);
    assert!(!h.exited());

    let report = h.engine.evaluate_tick(OPEN_MS + 4_000, Some(&reversal));
    assert!(report.fired.iter().any(|t| t.tier == ExitTier::HardStop));
    assert!(wait_until(|| h.exited()).await);
    assert!(h.engine.scheduler().drain(Duration::from_secs(2)).await);

    // The two rejected attempts never reached the book.
    assert_eq!(h.ioc_orders(), vec![(dec!(0.65), dec!(10))]);
    let pos = h.engine.reconciler().snapshot().unwrap();
    assert_eq!(pos.sold_shares, dec!(10));
    let tiers: Vec<_> = pos.decisions.iter().map(|d| (d.tier, d.filled_qty)).collect();
    assert_eq!(
        tiers,
        vec![(ExitTier::DangerExit, dec!(0)), (ExitTier::HardStop, dec!(10))]
    );
    assert_eq!(h.telemetry.count(EventKind::Exited), 1);
}

#[tokio::test]
async fn failed_profit_lock_cancel_keeps_shares_until_it_succeeds() {
    let mut h = Harness::new(fast_config());
    h.fill(dec!(10));
    assert!(wait_until(|| h.telemetry.count(EventKind::ProfitLockPlaced) == 1).await);

    for _ in 0..2 {
        h.paper
            .fail_next_cancel(ExchangeError::NetworkTransient("connection reset".into()));
    }
    let crash = book(&[(dec!(0.50), dec!(50))], dec!(0.52), dec!(0.45));
    h.paper.set_book(crash.clone());
    h.engine.evaluate_tick(OPEN_MS + 1_000, Some(&crash));
    let fired = h.engine.evaluate_tick(OPEN_MS + 2_000, Some(&crash));
    assert!(fired.fired.iter().any(|t| t.tier == ExitTier::HardStop));

    assert!(wait_until(|| h.exited()).await);
    assert!(h.engine.scheduler().drain(Duration::from_secs(2)).await);

    let pos = h.engine.reconciler().snapshot().unwrap();
    assert_eq!(pos.sold_shares, dec!(10));
    assert_eq!(pos.realized_pnl, dec!(-4.50));
    assert_eq!(h.paper.holdings(Side::Up), dec!(0));
    assert_eq!(h.paper.open_orders(), 0);
    assert_eq!(h.telemetry.count(EventKind::ProfitLockCancelled), 1);
    assert_eq!(h.telemetry.count(EventKind::Exited), 1);
}

#[tokio::test]
async fn safety_exit_waits_for_pending_profit_lock_placement() {
    let mut h = Harness::new(fast_config());
    h.paper.set_resting_delay(Some(Duration::from_millis(600)));
    // 20 seconds before close.
    h.fill_at(dec!(10), 1_280_000);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.telemetry.count(EventKind::ProfitLockPlaced), 0);

    let thin = book(&[(dec!(0.45), dec!(3))], dec!(0.50), dec!(0.60));
    h.paper.set_book(thin.clone());
    let report = h.engine.evaluate_tick(1_292_000, Some(&thin));
    assert!(report.fired.iter().any(|t| t.tier == ExitTier::SafetyExit));

    assert!(wait_until(|| h.exited()).await);
    assert!(h.engine.scheduler().drain(Duration::from_secs(2)).await);

    assert_eq!(h.ioc_orders(), vec![(dec!(0.01), dec!(10))]);
    assert_eq!(h.paper.open_orders(), 0);
    assert_eq!(h.paper.holdings(Side::Up), dec!(7));
    let pos = h.engine.reconciler().snapshot().unwrap();
    assert_eq!(pos.sold_shares, dec!(3));
    assert_eq!(pos.realized_pnl, dec!(-1.50));
    assert_eq!(h.telemetry.count(EventKind::Exited), 1);
}
