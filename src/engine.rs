//! Tick loop: snapshot read, danger scoring, ladder evaluation, dispatch, window rollover.
//!
//! `evaluate_tick` is synchronous and never sleeps or retries. The only awaits on the tick
//! path are the book and position reads in `tick`, each under `read_timeout`.

use crate::config::Config;
use crate::danger::{self, DangerInputs, DangerScoreResult, PriceRing};
use crate::error::PositionError;
use crate::exchange::Exchange;
use crate::ladder::{ExitLadder, LadderAction, ProfitLockPlan, TickObservation};
use crate::liquidation::{self, TaskContext};
use crate::position::{Reconciler, TierTrigger, WindowPosition};
use crate::scheduler::RetryScheduler;
use crate::telemetry::{EventKind, SharedTelemetry, TickSnapshot};
use crate::types::{
    ExitTier, OrderBookSnapshot, PriceSample, ResolvedMarket, ShareSource, Side, WindowId,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct WindowRuntime {
    market: Arc<ResolvedMarket>,
    window_id: WindowId,
    ring: PriceRing,
    ticks: u64,
}

/// What one tick saw and decided.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub window: Option<WindowId>,
    pub remaining_secs: u64,
    /// No usable book this tick; nothing was scored and debounce counters were left alone.
    pub stale: bool,
    pub own_bid: Option<Decimal>,
    pub book: Option<OrderBookSnapshot>,
    pub danger: Option<DangerScoreResult>,
    pub fired: Vec<TierTrigger>,
    pub actions: Vec<LadderAction>,
}

pub struct Engine {
    config: Arc<Config>,
    reconciler: Reconciler,
    exchange: Arc<dyn Exchange>,
    telemetry: SharedTelemetry,
    scheduler: RetryScheduler,
    ladder: ExitLadder,
    window: Option<WindowRuntime>,
}

impl Engine {
    pub fn new(config: Config, exchange: Arc<dyn Exchange>, telemetry: SharedTelemetry) -> Self {
        let reconciler = Reconciler::new(config.venue.clone(), telemetry.clone());
        let scheduler = RetryScheduler::new(config.retry.max_task_duration, telemetry.clone());
        let ladder = ExitLadder::new(config.ladder.clone(), config.venue.clone());
        Self {
            config: Arc::new(config),
            reconciler,
            exchange,
            telemetry,
            scheduler,
            ladder,
            window: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    pub fn market(&self) -> Option<&ResolvedMarket> {
        self.window.as_ref().map(|w| w.market.as_ref())
    }

    pub fn window_id(&self) -> Option<&WindowId> {
        self.window.as_ref().map(|w| &w.window_id)
    }

    /// Switch to `market`'s window. The previous position, if any, is archived and
    /// every background task bound to it yields at its next check.
    pub fn start_window(&mut self, market: ResolvedMarket) {
        let window_id = market.window_id();
        if self.window_id() == Some(&window_id) {
            return;
        }
        let archived = self.reconciler.open_window(window_id.clone());
        if let Some(prev) = self.window.take() {
            self.archive(prev.market, archived);
        }
        info!(
            window = %window_id,
            close_time = market.close_time_unix,
            "window started"
        );
        self.window = Some(WindowRuntime {
            market: Arc::new(market),
            window_id,
            ring: PriceRing::new(self.config.danger.velocity_samples),
            ticks: 0,
        });
    }

    /// Close the live window without a successor.
    pub fn end_window(&mut self) {
        let archived = self.reconciler.close_window();
        if let Some(prev) = self.window.take() {
            self.archive(prev.market, archived);
        }
    }

    fn archive(&self, market: Arc<ResolvedMarket>, position: Option<WindowPosition>) {
        let Some(pos) = position else {
            return;
        };
        let triggers: Vec<&str> = pos.triggers.iter().map(|t| t.tier.as_str()).collect();
        info!(
            window = %pos.window_id,
            exited = pos.is_exited(),
            held = %pos.held(),
            realized_pnl = %pos.realized_pnl,
            "window archived"
        );
        self.telemetry.append_event(
            EventKind::WindowArchived,
            serde_json::json!({
                "window": pos.window_id.as_str(),
                "side": pos.side.as_str(),
                "entry_price": pos.entry_price.to_string(),
                "trusted_shares": pos.trusted_shares().to_string(),
                "sold_shares": pos.sold_shares.to_string(),
                "realized_pnl": pos.realized_pnl.to_string(),
                "exited": pos.is_exited(),
                "triggers": triggers,
                "decisions": pos.decisions.len(),
            }),
        );

        if pos.is_exited() || pos.held() < self.config.venue.min_sell_size {
            return;
        }
        let retry = &self.config.retry;
        let cap = retry.resolution_backoff * retry.resolution_attempts + retry.max_task_duration;
        let window_id = pos.window_id.clone();
        self.scheduler.schedule_with_cap(
            &window_id,
            "resolution",
            cap,
            liquidation::grade_resolution(
                self.exchange.clone(),
                self.telemetry.clone(),
                market,
                pos,
                retry.resolution_attempts,
                retry.resolution_backoff,
            ),
        );
    }

    fn task_context(&self, side: Side) -> Option<TaskContext> {
        let rt = self.window.as_ref()?;
        Some(TaskContext {
            window_id: rt.window_id.clone(),
            market: rt.market.clone(),
            side,
            reconciler: self.reconciler.clone(),
            exchange: self.exchange.clone(),
            telemetry: self.telemetry.clone(),
            config: self.config.clone(),
        })
    }

    /// Fill confirmation from the entry component. Opens the position and arms the
    /// profit lock. Returns the trusted share count.
    pub fn on_fill(
        &mut self,
        window_id: &WindowId,
        side: Side,
        requested: Decimal,
        filled: Decimal,
        entry_price: Decimal,
        now_ms: u64,
    ) -> Result<Decimal, PositionError> {
        let trusted = self
            .reconciler
            .open_position(window_id, side, requested, filled, entry_price, now_ms)?;
        info!(window = %window_id, side = side.as_str(), %filled, %entry_price, "position opened");
        if let Some(rt) = self.window.as_mut() {
            rt.ring.clear();
        }

        let ladder = &self.ladder;
        let plan = self
            .reconciler
            .update(window_id, |pos| ladder.arm_profit_lock(pos, now_ms))
            .flatten();
        match plan {
            Some(plan) => self.launch_profit_lock(side, plan, now_ms),
            None => warn!(window = %window_id, %entry_price, "no profit lock armed"),
        }
        Ok(trusted)
    }

    fn launch_profit_lock(&self, side: Side, plan: ProfitLockPlan, now_ms: u64) {
        let Some(ctx) = self.task_context(side) else {
            return;
        };
        self.telemetry.append_event(
            EventKind::TierTriggered,
            serde_json::json!({
                "window": ctx.window_id.as_str(),
                "tier": ExitTier::ProfitLock,
                "trigger_value": plan.price.to_string(),
                "qty": plan.qty.to_string(),
            }),
        );
        // The monitor lives until the window closes, plus the usual cap.
        let until_close = Duration::from_millis(ctx.market.close_time_ms().saturating_sub(now_ms));
        let cap = until_close + self.config.retry.max_task_duration;
        let window_id = ctx.window_id.clone();
        self.scheduler
            .schedule_with_cap(&window_id, "profit_lock", cap, liquidation::run_profit_lock(ctx, plan));
    }

    /// One synchronous evaluation against `book` (`None` when the read failed or timed out).
    pub fn evaluate_tick(&mut self, now_ms: u64, book: Option<&OrderBookSnapshot>) -> TickReport {
        let Some(rt) = self.window.as_mut() else {
            return TickReport::default();
        };
        rt.ticks += 1;
        let window_id = rt.window_id.clone();
        let remaining_secs = rt.market.close_time_ms().saturating_sub(now_ms) / 1000;
        let book = book.filter(|b| b.has_data());
        let mut report = TickReport {
            window: Some(window_id.clone()),
            remaining_secs,
            stale: book.is_none(),
            book: book.cloned(),
            ..TickReport::default()
        };

        let snapshot = self.reconciler.snapshot().filter(|p| p.window_id == window_id);
        let Some(pos) = snapshot else {
            self.telemetry.append_tick(&TickSnapshot {
                window: window_id.to_string(),
                timestamp_ms: now_ms,
                remaining_secs,
                side: None,
                own_bid: None,
                own_ask: None,
                opposing_ask: None,
                trusted_shares: None,
                sold_shares: None,
                danger_score: None,
                exit_state: None,
                stale: report.stale,
            });
            return report;
        };

        let own = book.map(|b| b.side(pos.side));
        let own_bid = own
            .filter(|s| !s.bids.is_empty() || !s.asks.is_empty())
            .map(|s| s.best_bid().unwrap_or(Decimal::ZERO));
        let own_ask = own.and_then(|s| s.best_ask());
        let opposing_ask = book.and_then(|b| b.side(pos.side.opposite()).best_ask());
        let confidence = own.and_then(|s| s.mid());
        if let Some(price) = confidence {
            rt.ring.push(PriceSample {
                timestamp_ms: now_ms,
                price,
            });
        }
        let velocity = rt.ring.velocity();
        let imbalance = own
            .map(|s| danger::book_imbalance(s, self.config.danger.imbalance_depth_levels))
            .unwrap_or(Decimal::ZERO);

        let ladder = &self.ladder;
        let danger_cfg = &self.config.danger;
        let evaluated = self.reconciler.update(&window_id, |pos| {
            let peak = match (pos.peak_confidence, confidence) {
                (Some(p), Some(c)) => Some(p.max(c)),
                (p, c) => p.or(c),
            };
            pos.peak_confidence = peak;
            let danger = match (peak, confidence) {
                (Some(peak_confidence), Some(current_confidence)) => {
                    let result = danger::score(
                        &DangerInputs {
                            peak_confidence,
                            current_confidence,
                            our_side_imbalance: imbalance,
                            velocity,
                            opposing_ask,
                            remaining_secs,
                        },
                        danger_cfg,
                    );
                    pos.danger = Some(result);
                    Some(result)
                }
                _ => None,
            };
            let obs = TickObservation {
                now_ms,
                remaining_secs,
                own_bid,
                opposing_ask,
                danger,
            };
            (danger, ladder.evaluate(pos, &obs))
        });

        if let Some((danger, outcome)) = evaluated {
            report.danger = danger;
            report.fired = outcome.fired;
            report.actions = outcome.actions;
        }
        report.own_bid = own_bid;

        for trigger in &report.fired {
            info!(
                window = %window_id,
                tier = %trigger.tier,
                trigger = %trigger.trigger_value,
                remaining_secs,
                "tier triggered"
            );
            self.telemetry.append_event(
                EventKind::TierTriggered,
                serde_json::json!({
                    "window": window_id.as_str(),
                    "tier": trigger.tier,
                    "trigger_value": trigger.trigger_value.to_string(),
                    "remaining_secs": remaining_secs,
                    "danger": report.danger.map(|d| d.score.to_string()),
                }),
            );
        }
        for action in &report.actions {
            self.dispatch(pos.side, action);
        }

        let after = self.reconciler.snapshot().filter(|p| p.window_id == window_id);
        self.telemetry.append_tick(&TickSnapshot {
            window: window_id.to_string(),
            timestamp_ms: now_ms,
            remaining_secs,
            side: Some(pos.side.as_str().to_string()),
            own_bid,
            own_ask,
            opposing_ask,
            trusted_shares: after.as_ref().map(|p| p.trusted_shares()),
            sold_shares: after.as_ref().map(|p| p.sold_shares),
            danger_score: report.danger.map(|d| d.score),
            exit_state: after.as_ref().map(|p| format!("{:?}", p.exit_state)),
            stale: report.stale,
        });
        report
    }

    fn dispatch(&self, side: Side, action: &LadderAction) {
        let Some(ctx) = self.task_context(side) else {
            return;
        };
        let window_id = ctx.window_id.clone();
        match *action {
            LadderAction::CancelProfitLock { .. } => {
                let retry = &self.config.retry;
                let wait = retry.profit_lock_backoff * retry.profit_lock_place_attempts;
                self.scheduler.schedule(&window_id, "profit_lock_cancel", async move {
                    liquidation::cancel_profit_lock(&ctx, wait).await;
                });
            }
            LadderAction::Liquidate {
                tier: ExitTier::SafetyExit,
                trigger_value,
            } => {
                self.scheduler.schedule(
                    &window_id,
                    "safety_exit",
                    liquidation::run_safety_exit(ctx, trigger_value),
                );
            }
            LadderAction::Liquidate { tier, trigger_value } => {
                self.scheduler.schedule(
                    &window_id,
                    "liquidation",
                    liquidation::run_chunked_liquidation(ctx, tier, trigger_value),
                );
            }
        }
    }

    /// Read book and (every few ticks) positions under `read_timeout`, then evaluate.
    /// A failed or slow read is "no fresh data", never an error.
    pub async fn tick(&mut self, now_ms: u64) -> TickReport {
        let Some(rt) = self.window.as_ref() else {
            return TickReport::default();
        };
        let market = rt.market.clone();
        let window_id = rt.window_id.clone();
        let poll_every = self.config.position_poll_ticks.max(1);
        let held_side = self
            .reconciler
            .snapshot()
            .filter(|p| p.window_id == window_id && !p.is_exited())
            .map(|p| p.side);
        let poll_positions = held_side.is_some() && (rt.ticks + 1) % poll_every == 0;
        let timeout = self.config.read_timeout;

        let book_read = tokio::time::timeout(timeout, self.exchange.order_book(&market));
        let positions_read = async {
            if !poll_positions {
                return None;
            }
            match tokio::time::timeout(timeout, self.exchange.positions(&market)).await {
                Ok(Ok(report)) => Some(report),
                Ok(Err(e)) => {
                    debug!(window = %window_id, error = %e, "positions read failed");
                    None
                }
                Err(_) => {
                    debug!(window = %window_id, "positions read timed out");
                    None
                }
            }
        };
        let (book, positions) = tokio::join!(book_read, positions_read);

        let book = match book {
            Ok(Ok(book)) => Some(book),
            Ok(Err(e)) => {
                debug!(window = %window_id, error = %e, "book read failed");
                None
            }
            Err(_) => {
                debug!(window = %window_id, "book read timed out");
                None
            }
        };
        if let (Some(report), Some(side)) = (positions, held_side) {
            self.reconciler
                .reconcile(&window_id, report.side(side).size, ShareSource::PositionsApi);
        }
        self.evaluate_tick(now_ms, book.as_ref())
    }

    /// End the live window and wait for background tasks to finish.
    pub async fn shutdown(&mut self, within: Duration) -> bool {
        self.end_window();
        let drained = self.scheduler.drain(within).await;
        if !drained {
            warn!(active = self.scheduler.active(), "background tasks still running at shutdown");
        }
        drained
    }
}

/// Side whose best ask sits inside `[min, max]`, preferring the higher ask.
pub fn capture_candidate(
    book: &OrderBookSnapshot,
    min_price: Decimal,
    max_price: Decimal,
) -> Option<(Side, Decimal)> {
    [Side::Up, Side::Down]
        .into_iter()
        .filter_map(|side| book.side(side).best_ask().map(|ask| (side, ask)))
        .filter(|(_, ask)| *ask >= min_price && *ask <= max_price)
        .max_by_key(|(_, ask)| *ask)
}
