//! Bodies of the background sequences launched by the engine through the scheduler:
//! profit-lock placement and monitoring, cancel-before-sell, chunked liquidation
//! (Danger Exit, Hard Stop), the Safety Exit fast path, and resolution grading.
//!
//! Every sequence re-checks its window before each attempt and writes results back
//! only through the `Reconciler`.

use crate::config::{Config, LiquidationBudget};
use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::ladder::ProfitLockPlan;
use crate::position::{floor_to_decimals, ReservationId, Reconciler, WindowPosition};
use crate::telemetry::{EventKind, SharedTelemetry};
use crate::types::{
    BookSide, ExitDecision, ExitState, ExitTier, OrderKind, ResolvedMarket, Side, WindowId,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything a background sequence needs, cloned into the task.
#[derive(Clone)]
pub struct TaskContext {
    pub window_id: WindowId,
    pub market: Arc<ResolvedMarket>,
    pub side: Side,
    pub reconciler: Reconciler,
    pub exchange: Arc<dyn Exchange>,
    pub telemetry: SharedTelemetry,
    pub config: Arc<Config>,
}

/// Gives the in-flight slot back when a sequence ends, including when the scheduler's
/// cap drops the future mid-sequence. Escalates unless disarmed.
struct SlotGuard {
    reconciler: Reconciler,
    window_id: WindowId,
    tier: ExitTier,
    escalate_to: Option<ExitTier>,
}

impl SlotGuard {
    fn new(ctx: &TaskContext, tier: ExitTier) -> Self {
        Self {
            reconciler: ctx.reconciler.clone(),
            window_id: ctx.window_id.clone(),
            tier,
            escalate_to: tier.next(),
        }
    }

    fn disarm(&mut self) {
        self.escalate_to = None;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.reconciler
            .release_tier(&self.window_id, self.tier, self.escalate_to);
    }
}

/// Returns the unfilled part of a reservation to the sellable pool on drop.
struct ReservationGuard {
    reconciler: Reconciler,
    window_id: WindowId,
    id: ReservationId,
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        self.reconciler.release(&self.window_id, self.id);
    }
}

/// Per-run totals reported as one `ExitDecision`.
#[derive(Debug, Default)]
struct Batch {
    requested: Decimal,
    filled: Decimal,
    notional: Decimal,
    pnl: Decimal,
}

impl Batch {
    fn decision(&self, tier: ExitTier, trigger_value: Decimal) -> ExitDecision {
        ExitDecision {
            tier,
            trigger_value,
            requested_qty: self.requested,
            filled_qty: self.filled,
            avg_fill_price: (self.filled > Decimal::ZERO).then(|| self.notional / self.filled),
            pnl_delta: self.pnl,
        }
    }
}

fn event(ctx: &TaskContext, kind: EventKind, mut payload: serde_json::Value) {
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("window".into(), ctx.window_id.as_str().into());
        obj.insert("side".into(), ctx.side.as_str().into());
    }
    ctx.telemetry.append_event(kind, payload);
}

/// Close out the profit lock if it is still `reservation`. True for the caller that did it.
fn finish_profit_lock(ctx: &TaskContext, reservation: ReservationId) -> bool {
    ctx.reconciler
        .update(&ctx.window_id, |pos| {
            if pos.profit_lock.as_ref().map(|l| l.reservation) != Some(reservation) {
                return false;
            }
            pos.profit_lock = None;
            pos.release_reservation(reservation);
            if pos.exit_state == ExitState::ProfitLockPending {
                pos.exit_state = ExitState::Holding;
            }
            true
        })
        .unwrap_or_else(|| {
            // Exited: drop the reservation so accounting stays clean.
            ctx.reconciler.release(&ctx.window_id, reservation);
            false
        })
}

/// Cancel the resting order and book its final fill count. True once the venue no longer
/// holds it open; until then its shares stay reserved.
async fn cancel_resting(ctx: &TaskContext, reservation: ReservationId, order_id: &str, price: Decimal) -> bool {
    let cancelled = match ctx.exchange.cancel_order(order_id).await {
        Ok(()) => true,
        Err(e) => {
            warn!(window = %ctx.window_id, order_id, error = %e, "profit lock cancel failed");
            false
        }
    };
    match ctx.exchange.order_status(order_id).await {
        Ok(status) => {
            ctx.reconciler.report_fill(
                &ctx.window_id,
                reservation,
                status.filled,
                status.avg_price.unwrap_or(price),
            );
            cancelled || !status.open
        }
        Err(e) => {
            warn!(window = %ctx.window_id, order_id, error = %e, "final profit lock status unavailable");
            cancelled
        }
    }
}

/// Cancel-before-sell. Waits up to `wait` for an in-progress placement to return an order id.
/// True when no profit lock holds shares any more; false while its order may still rest.
pub async fn cancel_profit_lock(ctx: &TaskContext, wait: Duration) -> bool {
    let requested = ctx.reconciler.update(&ctx.window_id, |pos| {
        pos.profit_lock.as_mut().map(|lock| {
            lock.cancel_requested = true;
            lock.reservation
        })
    });
    let Some(Some(reservation)) = requested else {
        return true;
    };

    let poll = Duration::from_millis(25);
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let lock = ctx
            .reconciler
            .snapshot()
            .and_then(|p| p.profit_lock)
            .filter(|l| l.reservation == reservation);
        let Some(lock) = lock else {
            return true;
        };
        if let Some(order_id) = lock.order_id.as_deref() {
            if !cancel_resting(ctx, reservation, order_id, lock.price).await {
                return false;
            }
            if finish_profit_lock(ctx, reservation) {
                info!(window = %ctx.window_id, order_id, "profit lock cancelled");
                event(
                    ctx,
                    EventKind::ProfitLockCancelled,
                    serde_json::json!({ "order_id": order_id, "price": lock.price.to_string() }),
                );
            }
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            // The placement task sees `cancel_requested` and cancels its own order.
            debug!(window = %ctx.window_id, "profit lock still placing; leaving cancel to placer");
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Tier 1: place the resting sell with retries, then monitor it until filled, cancelled,
/// or the window changes.
pub async fn run_profit_lock(ctx: TaskContext, plan: ProfitLockPlan) {
    let retry = &ctx.config.retry;
    let mut order_id = None;

    for attempt in 1..=retry.profit_lock_place_attempts {
        let cancelled = ctx
            .reconciler
            .snapshot()
            .and_then(|p| p.profit_lock)
            .map_or(true, |l| l.reservation != plan.reservation || l.cancel_requested);
        if ctx.reconciler.should_yield(&ctx.window_id, ExitTier::ProfitLock) || cancelled {
            finish_profit_lock(&ctx, plan.reservation);
            return;
        }
        match ctx
            .exchange
            .place_order(&ctx.market, ctx.side, plan.price, plan.qty, OrderKind::Resting)
            .await
        {
            Ok(ack) => {
                ctx.reconciler.report_fill(
                    &ctx.window_id,
                    plan.reservation,
                    ack.filled,
                    ack.avg_price.unwrap_or(plan.price),
                );
                order_id = Some(ack.order_id);
                break;
            }
            // Shares may not be credited yet right after the fill; retry within the budget.
            Err(e) if attempt < retry.profit_lock_place_attempts => {
                warn!(window = %ctx.window_id, attempt, error = %e, "profit lock placement failed, retrying");
                tokio::time::sleep(retry.profit_lock_backoff).await;
            }
            Err(e) => {
                warn!(window = %ctx.window_id, attempt, error = %e, "profit lock placement failed");
            }
        }
    }

    let Some(order_id) = order_id else {
        if finish_profit_lock(&ctx, plan.reservation) {
            warn!(window = %ctx.window_id, "profit lock not placed; holding");
        }
        return;
    };

    let still_wanted = ctx
        .reconciler
        .update(&ctx.window_id, |pos| match pos.profit_lock.as_mut() {
            Some(lock) if lock.reservation == plan.reservation => {
                lock.order_id = Some(order_id.clone());
                !lock.cancel_requested
            }
            _ => false,
        })
        .unwrap_or(false);

    if !still_wanted && cancel_resting(&ctx, plan.reservation, &order_id, plan.price).await {
        finish_profit_lock(&ctx, plan.reservation);
        return;
    }

    info!(
        window = %ctx.window_id,
        order_id = %order_id,
        price = %plan.price,
        qty = %plan.qty,
        "profit lock placed"
    );
    event(
        &ctx,
        EventKind::ProfitLockPlaced,
        serde_json::json!({
            "order_id": order_id,
            "price": plan.price.to_string(),
            "qty": plan.qty.to_string(),
        }),
    );

    monitor_profit_lock(&ctx, &plan, &order_id).await;
}

async fn monitor_profit_lock(ctx: &TaskContext, plan: &ProfitLockPlan, order_id: &str) {
    let retry = &ctx.config.retry;
    loop {
        tokio::time::sleep(retry.profit_lock_poll_interval).await;
        if !ctx.reconciler.is_current(&ctx.window_id) {
            return;
        }
        let Some(pos) = ctx.reconciler.snapshot() else {
            return;
        };
        let Some(lock) = pos.profit_lock.as_ref().filter(|l| l.reservation == plan.reservation) else {
            // Cancelled or finished by another task.
            return;
        };
        if lock.cancel_requested || pos.is_exited() {
            // An earlier cancel did not go through; keep trying while the order is ours.
            if cancel_resting(ctx, plan.reservation, order_id, plan.price).await {
                if finish_profit_lock(ctx, plan.reservation) {
                    info!(window = %ctx.window_id, order_id, "profit lock cancelled");
                    event(
                        ctx,
                        EventKind::ProfitLockCancelled,
                        serde_json::json!({ "order_id": order_id, "price": plan.price.to_string() }),
                    );
                }
                return;
            }
            continue;
        }

        let status = match ctx.exchange.order_status(order_id).await {
            Ok(s) => s,
            Err(e) => {
                debug!(window = %ctx.window_id, order_id, error = %e, "profit lock status unavailable");
                continue;
            }
        };
        ctx.reconciler.report_fill(
            &ctx.window_id,
            plan.reservation,
            status.filled,
            status.avg_price.unwrap_or(plan.price),
        );

        if status.filled >= plan.qty {
            let booked = ctx
                .reconciler
                .snapshot()
                .and_then(|p| p.reservation(plan.reservation).cloned());
            let (filled, notional) = booked
                .map(|r| (r.filled, r.fill_notional))
                .unwrap_or((status.filled, status.filled * plan.price));
            let entry = ctx.reconciler.snapshot().map(|p| p.entry_price).unwrap_or_default();
            let pnl = notional - filled * entry;
            finish_profit_lock(ctx, plan.reservation);
            let decision = ExitDecision {
                tier: ExitTier::ProfitLock,
                trigger_value: plan.price,
                requested_qty: plan.qty,
                filled_qty: filled,
                avg_fill_price: (filled > Decimal::ZERO).then(|| notional / filled),
                pnl_delta: pnl,
            };
            info!(window = %ctx.window_id, order_id, filled = %filled, pnl = %pnl, "profit lock filled");
            event(
                ctx,
                EventKind::ProfitLockFilled,
                serde_json::json!({
                    "order_id": order_id,
                    "filled": filled.to_string(),
                    "pnl_delta": pnl.to_string(),
                }),
            );
            ctx.reconciler.record_decision(&ctx.window_id, decision);
            return;
        }
        if !status.open {
            if finish_profit_lock(ctx, plan.reservation) {
                warn!(window = %ctx.window_id, order_id, filled = %status.filled, "profit lock closed by venue before filling");
                event(
                    ctx,
                    EventKind::ProfitLockCancelled,
                    serde_json::json!({ "order_id": order_id, "filled": status.filled.to_string(), "by_venue": true }),
                );
            }
            return;
        }
    }
}

/// Limit price and chunk size for one IOC pass. `None` skips the attempt.
///
/// The limit is `best bid - slippage` (never below the floor) and the chunk is capped at
/// the bid depth at or above it. An empty bid side, or the final attempt, sells
/// everything at the floor price.
pub fn size_chunk(
    book: Option<&BookSide>,
    sellable: Decimal,
    budget: &LiquidationBudget,
    floor_price: Decimal,
    share_decimals: u32,
    min_sell_size: Decimal,
    final_attempt: bool,
) -> Option<(Decimal, Decimal)> {
    if final_attempt {
        return Some((floor_price, sellable));
    }
    let side = book?;
    let Some(bid) = side.best_bid() else {
        return Some((floor_price, sellable));
    };
    let limit = (bid - budget.slippage).max(floor_price);
    let depth = floor_to_decimals(side.bid_depth_at_or_above(limit), share_decimals);
    if depth < min_sell_size {
        return Some((floor_price, sellable));
    }
    Some((limit, sellable.min(depth)))
}

/// Danger Exit and Hard Stop: chunked IOC passes sized to visible depth, fixed backoff,
/// bounded attempts. Unfilled quantity escalates to the next tier on exhaustion.
pub async fn run_chunked_liquidation(ctx: TaskContext, tier: ExitTier, trigger_value: Decimal) {
    let cfg = &ctx.config;
    let budget = match tier {
        ExitTier::DangerExit => &cfg.retry.danger_exit,
        _ => &cfg.retry.hard_stop,
    };
    let venue = ctx.reconciler.venue().clone();
    let mut slot = SlotGuard::new(&ctx, tier);
    let mut batch = Batch::default();
    let mut floor_only = false;

    info!(window = %ctx.window_id, %tier, trigger = %trigger_value, "liquidation started");
    cancel_profit_lock(&ctx, budget.backoff).await;

    for attempt in 1..=budget.max_attempts {
        if ctx.reconciler.should_yield(&ctx.window_id, tier) {
            slot.disarm();
            break;
        }
        let Some(pos) = ctx.reconciler.snapshot() else {
            slot.disarm();
            break;
        };
        let sellable = pos.sellable(venue.share_decimals);
        if sellable < venue.min_sell_size {
            if pos.held() < venue.min_sell_size {
                ctx.reconciler.mark_exited(&ctx.window_id, "cleared");
                slot.disarm();
                break;
            }
            // Balance still tied to the resting order.
            cancel_profit_lock(&ctx, budget.backoff).await;
            tokio::time::sleep(budget.backoff).await;
            continue;
        }

        let book = match tokio::time::timeout(cfg.read_timeout, ctx.exchange.order_book(&ctx.market)).await {
            Ok(Ok(book)) => Some(book),
            Ok(Err(e)) => {
                debug!(window = %ctx.window_id, attempt, error = %e, "book read failed");
                None
            }
            Err(_) => None,
        };
        let chunk = size_chunk(
            book.as_ref().map(|b| b.side(ctx.side)),
            sellable,
            budget,
            cfg.retry.liquidation_floor_price,
            venue.share_decimals,
            venue.min_sell_size,
            floor_only || attempt == budget.max_attempts,
        );
        let Some((limit, qty)) = chunk else {
            tokio::time::sleep(budget.backoff).await;
            continue;
        };
        let Some((reservation, qty)) = ctx.reconciler.reserve(&ctx.window_id, tier, qty) else {
            tokio::time::sleep(budget.backoff).await;
            continue;
        };
        let held = ReservationGuard {
            reconciler: ctx.reconciler.clone(),
            window_id: ctx.window_id.clone(),
            id: reservation,
        };

        batch.requested += qty;
        debug!(window = %ctx.window_id, %tier, attempt, %limit, %qty, "liquidation attempt");
        event(
            &ctx,
            EventKind::LiquidationAttempt,
            serde_json::json!({
                "tier": tier,
                "attempt": attempt,
                "limit": limit.to_string(),
                "qty": qty.to_string(),
            }),
        );

        match ctx
            .exchange
            .place_order(&ctx.market, ctx.side, limit, qty, OrderKind::ImmediateOrCancel)
            .await
        {
            Ok(ack) => {
                let price = ack.avg_price.unwrap_or(limit);
                if let Some(progress) = ctx.reconciler.report_fill(&ctx.window_id, reservation, ack.filled, price) {
                    batch.filled += progress.delta;
                    batch.notional += progress.delta * price;
                    batch.pnl += progress.pnl_delta;
                }
            }
            Err(ExchangeError::InsufficientBalance(msg)) => {
                let lock_open = ctx
                    .reconciler
                    .snapshot()
                    .map_or(false, |p| p.profit_lock.is_some());
                if lock_open {
                    // The venue still holds the shares behind our own resting order.
                    warn!(window = %ctx.window_id, %tier, error = %msg, "balance locked by profit lock; cancelling");
                    cancel_profit_lock(&ctx, budget.backoff).await;
                } else {
                    warn!(window = %ctx.window_id, %tier, error = %msg, "balance gone; treating as liquidated");
                    ctx.reconciler.mark_exited(&ctx.window_id, "insufficient balance");
                    slot.disarm();
                    break;
                }
            }
            Err(e) if e.is_retryable() => {
                // No depth at any price: go straight to the floor next time.
                floor_only |= matches!(e, ExchangeError::CatastrophicLiquidity(_));
                warn!(window = %ctx.window_id, %tier, attempt, error = %e, "liquidation attempt failed");
            }
            Err(e) => {
                error!(window = %ctx.window_id, %tier, attempt, error = %e, "liquidation attempt failed permanently; escalating");
                break;
            }
        }
        drop(held);

        if ctx.reconciler.snapshot().map_or(true, |p| p.is_exited()) {
            slot.disarm();
            break;
        }
        if attempt < budget.max_attempts {
            tokio::time::sleep(budget.backoff).await;
        }
    }

    if batch.requested > Decimal::ZERO {
        ctx.reconciler
            .record_decision(&ctx.window_id, batch.decision(tier, trigger_value));
    }
    if slot.escalate_to.is_some() {
        warn!(window = %ctx.window_id, %tier, filled = %batch.filled, "retry budget exhausted");
    }
}

/// Tier 4: one immediate best-effort IOC at the floor price for everything sellable, then
/// the position is exited whatever the result.
///
/// Shares behind a resting or still-placing profit lock are freed first; the wait is bounded
/// only by the task cap and the window.
pub async fn run_safety_exit(ctx: TaskContext, trigger_value: Decimal) {
    let mut slot = SlotGuard::new(&ctx, ExitTier::SafetyExit);
    slot.disarm();
    let cfg = &ctx.config;
    let floor = cfg.retry.liquidation_floor_price;
    loop {
        if ctx.reconciler.should_yield(&ctx.window_id, ExitTier::SafetyExit) {
            return;
        }
        if cancel_profit_lock(&ctx, cfg.retry.profit_lock_backoff).await {
            break;
        }
        debug!(window = %ctx.window_id, "safety exit waiting on profit lock");
        tokio::time::sleep(cfg.retry.profit_lock_backoff).await;
    }

    let mut batch = Batch::default();
    let sellable = ctx
        .reconciler
        .snapshot()
        .map(|p| p.sellable(ctx.reconciler.venue().share_decimals))
        .unwrap_or_default();
    if let Some((reservation, qty)) = ctx
        .reconciler
        .reserve(&ctx.window_id, ExitTier::SafetyExit, sellable)
    {
        let _guard = ReservationGuard {
            reconciler: ctx.reconciler.clone(),
            window_id: ctx.window_id.clone(),
            id: reservation,
        };
        batch.requested = qty;
        info!(window = %ctx.window_id, %qty, %floor, "safety exit");
        event(
            &ctx,
            EventKind::LiquidationAttempt,
            serde_json::json!({
                "tier": ExitTier::SafetyExit,
                "attempt": 1,
                "limit": floor.to_string(),
                "qty": qty.to_string(),
            }),
        );
        match ctx
            .exchange
            .place_order(&ctx.market, ctx.side, floor, qty, OrderKind::ImmediateOrCancel)
            .await
        {
            Ok(ack) => {
                let price = ack.avg_price.unwrap_or(floor);
                if let Some(progress) = ctx.reconciler.report_fill(&ctx.window_id, reservation, ack.filled, price) {
                    batch.filled = progress.delta;
                    batch.notional = progress.delta * price;
                    batch.pnl = progress.pnl_delta;
                }
            }
            Err(e) => error!(window = %ctx.window_id, error = %e, "safety exit order failed"),
        }
    }

    ctx.reconciler
        .record_decision(&ctx.window_id, batch.decision(ExitTier::SafetyExit, trigger_value));
    ctx.reconciler.mark_exited(&ctx.window_id, "safety exit");
}

/// Poll for the market outcome after close and append the hold-to-resolution result.
/// Works on the archived position, so it never touches live state.
pub async fn grade_resolution(
    exchange: Arc<dyn Exchange>,
    telemetry: SharedTelemetry,
    market: Arc<ResolvedMarket>,
    position: WindowPosition,
    attempts: u32,
    backoff: Duration,
) {
    let held = position.held();
    for attempt in 1..=attempts {
        match exchange.resolution(&market).await {
            Ok(winner) => {
                let won = winner == position.side;
                let payout = if won { Decimal::ONE } else { Decimal::ZERO };
                let hold_pnl = held * (payout - position.entry_price);
                info!(window = %position.window_id, winner = winner.as_str(), won, %held, %hold_pnl, "market resolved");
                telemetry.append_event(
                    EventKind::Resolution,
                    serde_json::json!({
                        "window": position.window_id.as_str(),
                        "side": position.side.as_str(),
                        "winner": winner.as_str(),
                        "won": won,
                        "held": held.to_string(),
                        "hold_pnl": hold_pnl.to_string(),
                        "realized_pnl": position.realized_pnl.to_string(),
                    }),
                );
                return;
            }
            Err(ExchangeError::ResolutionUnavailable) => {
                debug!(window = %position.window_id, attempt, "resolution not yet available");
            }
            Err(e) if e.is_retryable() => {
                warn!(window = %position.window_id, attempt, error = %e, "resolution query failed");
            }
            Err(e) => {
                warn!(window = %position.window_id, attempt, error = %e, "resolution query rejected; giving up");
                break;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
        }
    }
    warn!(window = %position.window_id, attempts, "resolution unavailable; grading deferred");
    telemetry.append_event(
        EventKind::Resolution,
        serde_json::json!({
            "window": position.window_id.as_str(),
            "side": position.side.as_str(),
            "unresolved": true,
            "held": held.to_string(),
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BookLevel;
    use rust_decimal_macros::dec;

    fn budget() -> LiquidationBudget {
        LiquidationBudget {
            max_attempts: 4,
            backoff: Duration::from_millis(10),
            slippage: dec!(0.05),
        }
    }

    fn side(bids: &[(Decimal, Decimal)]) -> BookSide {
        BookSide::from_levels(
            bids.iter().map(|(p, s)| BookLevel::new(*p, *s)).collect(),
            vec![BookLevel::new(dec!(0.60), dec!(10))],
        )
    }

    #[test]
    fn chunk_never_exceeds_visible_depth() {
        let book = side(&[(dec!(0.55), dec!(4)), (dec!(0.50), dec!(3)), (dec!(0.40), dec!(100))]);
        let (limit, qty) = size_chunk(Some(&book), dec!(10), &budget(), dec!(0.01), 2, dec!(0.01), false).unwrap();
        assert_eq!(limit, dec!(0.50));
        assert_eq!(qty, dec!(7));
    }

    #[test]
    fn chunk_is_capped_by_sellable() {
        let book = side(&[(dec!(0.55), dec!(40))]);
        let (_, qty) = size_chunk(Some(&book), dec!(6), &budget(), dec!(0.01), 2, dec!(0.01), false).unwrap();
        assert_eq!(qty, dec!(6));
    }

    #[test]
    fn empty_bids_fall_back_to_floor() {
        let book = side(&[]);
        let (limit, qty) = size_chunk(Some(&book), dec!(10), &budget(), dec!(0.01), 2, dec!(0.01), false).unwrap();
        assert_eq!(limit, dec!(0.01));
        assert_eq!(qty, dec!(10));
    }

    #[test]
    fn missing_book_skips_until_final_attempt() {
        assert!(size_chunk(None, dec!(10), &budget(), dec!(0.01), 2, dec!(0.01), false).is_none());
        let (limit, qty) = size_chunk(None, dec!(10), &budget(), dec!(0.01), 2, dec!(0.01), true).unwrap();
        assert_eq!((limit, qty), (dec!(0.01), dec!(10)));
    }
}
