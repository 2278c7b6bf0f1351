//! Exit Ladder Controller. Runs synchronously under the reconciler lock once per tick and
//! only returns actions; every side effect is dispatched by the engine to the scheduler.
//!
//! Tiers are evaluated in ascending order of aggressiveness. A tier's guard, once set,
//! keeps that tier from firing again but never blocks a higher tier.

use crate::config::{LadderConfig, VenueConfig};
use crate::danger::DangerScoreResult;
use crate::position::{ProfitLockOrder, ReservationId, TierTrigger, WindowPosition};
use crate::types::{ExitState, ExitTier};
use rust_decimal::Decimal;

/// What the tick loop observed. `None` fields mean no fresh data this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickObservation {
    pub now_ms: u64,
    pub remaining_secs: u64,
    pub own_bid: Option<Decimal>,
    pub opposing_ask: Option<Decimal>,
    pub danger: Option<DangerScoreResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LadderAction {
    /// Own bid fell under the cancel threshold while the profit lock rests.
    CancelProfitLock { reservation: ReservationId },
    /// The in-flight slot was claimed for `tier`; run its liquidation sequence.
    Liquidate { tier: ExitTier, trigger_value: Decimal },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LadderOutcome {
    pub fired: Vec<TierTrigger>,
    pub actions: Vec<LadderAction>,
}

/// Resting sell requested on fill.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfitLockPlan {
    pub reservation: ReservationId,
    pub price: Decimal,
    pub qty: Decimal,
}

#[derive(Debug, Clone)]
pub struct ExitLadder {
    config: LadderConfig,
    venue: VenueConfig,
}

impl ExitLadder {
    pub fn new(config: LadderConfig, venue: VenueConfig) -> Self {
        Self { config, venue }
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    /// `min(entry + offset, max)`, floored to the tick. `None` when that is not above entry.
    pub fn profit_lock_price(&self, entry_price: Decimal) -> Option<Decimal> {
        let raw = (entry_price + self.config.profit_lock_offset).min(self.config.profit_lock_max_price);
        let tick = self.venue.tick_size;
        let price = if tick > Decimal::ZERO {
            (raw / tick).floor() * tick
        } else {
            raw
        };
        (price > entry_price).then_some(price)
    }

    /// Tier 1, run once on fill: reserve everything sellable for a resting sell.
    pub fn arm_profit_lock(&self, pos: &mut WindowPosition, now_ms: u64) -> Option<ProfitLockPlan> {
        if pos.is_exited() || pos.tier_has_fired(ExitTier::ProfitLock) {
            return None;
        }
        let price = self.profit_lock_price(pos.entry_price)?;
        let (reservation, qty) = pos.reserve(ExitTier::ProfitLock, pos.trusted_shares(), &self.venue)?;
        pos.fire_tier(ExitTier::ProfitLock, price, now_ms);
        pos.profit_lock = Some(ProfitLockOrder {
            reservation,
            order_id: None,
            price,
            qty,
            cancel_requested: false,
        });
        pos.exit_state = ExitState::ProfitLockPending;
        Some(ProfitLockPlan {
            reservation,
            price,
            qty,
        })
    }

    pub fn evaluate(&self, pos: &mut WindowPosition, obs: &TickObservation) -> LadderOutcome {
        let mut out = LadderOutcome::default();
        if pos.is_exited() {
            return out;
        }
        let cfg = &self.config;

        if let (Some(bid), Some(lock)) = (obs.own_bid, pos.profit_lock.as_mut()) {
            if !lock.cancel_requested && bid < cfg.profit_lock_cancel_bid {
                lock.cancel_requested = true;
                out.actions.push(LadderAction::CancelProfitLock {
                    reservation: lock.reservation,
                });
            }
        }

        if let Some(danger) = obs.danger {
            let hot = danger.score >= cfg.danger_alert_threshold
                && obs
                    .opposing_ask
                    .map_or(false, |ask| ask > cfg.danger_opposing_ask_gate);
            self.debounce(
                pos,
                ExitTier::DangerExit,
                hot,
                danger.score,
                cfg.danger_debounce_ticks,
                obs.now_ms,
                &mut out,
            );
        }

        if let Some(bid) = obs.own_bid {
            self.debounce(
                pos,
                ExitTier::HardStop,
                bid < cfg.hard_stop_trigger,
                bid,
                cfg.hard_stop_debounce_ticks,
                obs.now_ms,
                &mut out,
            );

            if obs.remaining_secs < cfg.safety_final_secs && bid < cfg.safety_bid_floor {
                record_fire(pos, ExitTier::SafetyExit, bid, obs.now_ms, &mut out);
            }
        }

        self.dispatch(pos, obs, &mut out);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn debounce(
        &self,
        pos: &mut WindowPosition,
        tier: ExitTier,
        hot: bool,
        value: Decimal,
        required: u32,
        now_ms: u64,
        out: &mut LadderOutcome,
    ) {
        let i = tier.index();
        pos.consecutive_ticks[i] = if hot {
            pos.consecutive_ticks[i].saturating_add(1)
        } else {
            0
        };
        if pos.consecutive_ticks[i] >= required {
            record_fire(pos, tier, value, now_ms, out);
        }
    }

    /// Hand the most aggressive fired or pending tier to the in-flight slot, or queue it
    /// behind a less aggressive running tier.
    fn dispatch(&self, pos: &mut WindowPosition, obs: &TickObservation, out: &mut LadderOutcome) {
        let newest = out
            .fired
            .iter()
            .map(|t| t.tier)
            .filter(|t| *t != ExitTier::ProfitLock)
            .max();

        if let Some(running) = pos.in_flight {
            if let Some(tier) = newest.filter(|t| *t > running) {
                pos.pending_escalation = pos.pending_escalation.max(Some(tier));
            }
            return;
        }

        let Some(tier) = newest.max(pos.pending_escalation) else {
            return;
        };
        if !pos.tier_has_fired(tier) {
            // Reached by escalation rather than by its own trigger.
            let value = obs.own_bid.unwrap_or(Decimal::ZERO);
            record_fire(pos, tier, value, obs.now_ms, out);
        }
        if pos.claim(tier) {
            let trigger_value = pos
                .triggers
                .iter()
                .rev()
                .find(|t| t.tier == tier)
                .map(|t| t.trigger_value)
                .unwrap_or(Decimal::ZERO);
            out.actions.push(LadderAction::Liquidate {
                tier,
                trigger_value,
            });
        }
    }
}

fn record_fire(
    pos: &mut WindowPosition,
    tier: ExitTier,
    value: Decimal,
    now_ms: u64,
    out: &mut LadderOutcome,
) {
    if pos.fire_tier(tier, value, now_ms) {
        out.fired.push(TierTrigger {
            tier,
            trigger_value: value,
            at_ms: now_ms,
        });
    }
}
