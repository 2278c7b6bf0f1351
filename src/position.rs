//! `WindowPosition` and the Position Reconciler: the single serialized write path
//! for everything the tick loop and background tasks know about the held position.

use crate::config::VenueConfig;
use crate::danger::DangerScoreResult;
use crate::error::PositionError;
use crate::telemetry::{EventKind, SharedTelemetry};
use crate::types::{ExitDecision, ExitState, ExitTier, ShareSource, Side, WindowId};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Floor `x` to `decimals` places (never round up a sell size).
pub fn floor_to_decimals(x: Decimal, decimals: u32) -> Decimal {
    let factor = Decimal::from(10u64.pow(decimals));
    (x * factor).trunc() / factor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservationId(u64);

/// Quantity set aside for one sell request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: ReservationId,
    pub tier: ExitTier,
    pub requested: Decimal,
    /// Cumulative fill already booked against this reservation.
    pub filled: Decimal,
    pub fill_notional: Decimal,
}

impl Reservation {
    pub fn outstanding(&self) -> Decimal {
        (self.requested - self.filled).max(Decimal::ZERO)
    }
}

/// Resting profit-lock order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfitLockOrder {
    pub reservation: ReservationId,
    pub order_id: Option<String>,
    pub price: Decimal,
    pub qty: Decimal,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierTrigger {
    pub tier: ExitTier,
    pub trigger_value: Decimal,
    pub at_ms: u64,
}

/// The unit of work: exists from fill until the window closes or the position is fully exited.
#[derive(Debug, Clone)]
pub struct WindowPosition {
    pub window_id: WindowId,
    pub side: Side,
    pub requested_shares: Decimal,
    /// Maximum ever observed across all sources. Never decreases.
    trusted_shares: Decimal,
    pub entry_price: Decimal,
    pub opened_at_ms: u64,
    pub peak_confidence: Option<Decimal>,
    pub danger: Option<DangerScoreResult>,
    pub exit_state: ExitState,
    exited: bool,
    pub consecutive_ticks: [u32; 4],
    /// Per-tier guard: once set, that tier never fires again.
    pub tier_fired: [bool; 4],
    pub realized_pnl: Decimal,
    pub sold_shares: Decimal,
    reservations: HashMap<ReservationId, Reservation>,
    next_reservation: u64,
    /// Tier whose liquidation sequence is currently running. At most one.
    pub in_flight: Option<ExitTier>,
    /// Tier waiting to run once `in_flight` clears.
    pub pending_escalation: Option<ExitTier>,
    pub profit_lock: Option<ProfitLockOrder>,
    pub triggers: Vec<TierTrigger>,
    pub decisions: Vec<ExitDecision>,
    source_reports: HashMap<ShareSource, Decimal>,
    reconcile_calls: u32,
    precision_warned: bool,
}

impl WindowPosition {
    pub fn new(
        window_id: WindowId,
        side: Side,
        requested_shares: Decimal,
        entry_price: Decimal,
        opened_at_ms: u64,
    ) -> Self {
        Self {
            window_id,
            side,
            requested_shares,
            trusted_shares: Decimal::ZERO,
            entry_price,
            opened_at_ms,
            peak_confidence: None,
            danger: None,
            exit_state: ExitState::Holding,
            exited: false,
            consecutive_ticks: [0; 4],
            tier_fired: [false; 4],
            realized_pnl: Decimal::ZERO,
            sold_shares: Decimal::ZERO,
            reservations: HashMap::new(),
            next_reservation: 1,
            in_flight: None,
            pending_escalation: None,
            profit_lock: None,
            triggers: Vec::new(),
            decisions: Vec::new(),
            source_reports: HashMap::new(),
            reconcile_calls: 0,
            precision_warned: false,
        }
    }

    pub fn trusted_shares(&self) -> Decimal {
        self.trusted_shares
    }

    pub fn is_exited(&self) -> bool {
        self.exited
    }

    /// Shares still held (trusted minus sold).
    pub fn held(&self) -> Decimal {
        (self.trusted_shares - self.sold_shares).max(Decimal::ZERO)
    }

    pub fn reserved(&self) -> Decimal {
        self.reservations.values().map(Reservation::outstanding).sum()
    }

    /// Quantity that may be put into a new sell request, floored to venue precision.
    pub fn sellable(&self, decimals: u32) -> Decimal {
        floor_to_decimals((self.held() - self.reserved()).max(Decimal::ZERO), decimals)
    }

    pub fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.get(&id)
    }

    pub fn tier_has_fired(&self, tier: ExitTier) -> bool {
        self.tier_fired[tier.index()]
    }

    /// Record a tier trigger. Sets its guard; returns false if it had already fired.
    pub fn fire_tier(&mut self, tier: ExitTier, trigger_value: Decimal, at_ms: u64) -> bool {
        if self.tier_fired[tier.index()] {
            return false;
        }
        self.tier_fired[tier.index()] = true;
        self.triggers.push(TierTrigger {
            tier,
            trigger_value,
            at_ms,
        });
        true
    }

    /// The single terminal transition. Returns true only the first time.
    fn set_exited(&mut self) -> bool {
        if self.exited {
            return false;
        }
        self.exited = true;
        self.exit_state = ExitState::Exited;
        self.in_flight = None;
        self.pending_escalation = None;
        true
    }

    /// Set aside up to `qty` (clamped to what is sellable) for one sell request.
    pub fn reserve(
        &mut self,
        tier: ExitTier,
        qty: Decimal,
        venue: &VenueConfig,
    ) -> Option<(ReservationId, Decimal)> {
        let granted = floor_to_decimals(qty.min(self.sellable(venue.share_decimals)), venue.share_decimals);
        if granted < venue.min_sell_size {
            return None;
        }
        let id = ReservationId(self.next_reservation);
        self.next_reservation += 1;
        self.reservations.insert(
            id,
            Reservation {
                id,
                tier,
                requested: granted,
                filled: Decimal::ZERO,
                fill_notional: Decimal::ZERO,
            },
        );
        Some((id, granted))
    }

    pub fn release_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        self.reservations.remove(&id)
    }

    /// Take the single in-flight liquidation slot.
    pub fn claim(&mut self, tier: ExitTier) -> bool {
        if self.exited || self.in_flight.is_some() {
            return false;
        }
        self.in_flight = Some(tier);
        if self.pending_escalation.map_or(false, |p| p <= tier) {
            self.pending_escalation = None;
        }
        self.exit_state = ExitState::Exiting;
        true
    }

    fn raise_trusted(&mut self, reported: Decimal) -> bool {
        if reported > self.trusted_shares {
            self.trusted_shares = reported;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Raised { from: Decimal, to: Decimal },
    Unchanged,
    /// Lower than already trusted; ignored.
    StaleIgnored { reported: Decimal },
    /// The caller's window is not the live window; no-op.
    WrongWindow,
    NoPosition,
}

/// Result of booking a fill against a reservation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillProgress {
    pub delta: Decimal,
    pub pnl_delta: Decimal,
    pub newly_exited: bool,
}

#[derive(Debug, Default)]
struct PositionCell {
    window_id: Option<WindowId>,
    position: Option<WindowPosition>,
}

/// Clonable handle to the one shared `WindowPosition`. Every mutation goes through here;
/// the lock is never held across an await.
#[derive(Clone)]
pub struct Reconciler {
    cell: Arc<Mutex<PositionCell>>,
    venue: VenueConfig,
    telemetry: SharedTelemetry,
}

impl Reconciler {
    pub fn new(venue: VenueConfig, telemetry: SharedTelemetry) -> Self {
        Self {
            cell: Arc::new(Mutex::new(PositionCell::default())),
            venue,
            telemetry,
        }
    }

    pub fn venue(&self) -> &VenueConfig {
        &self.venue
    }

    /// Roll over to a new window. Returns the previous window's position for archiving.
    pub fn open_window(&self, window_id: WindowId) -> Option<WindowPosition> {
        let mut cell = self.cell.lock();
        if cell.window_id.as_ref() == Some(&window_id) {
            return None;
        }
        info!(window = %window_id, "window opened");
        cell.window_id = Some(window_id);
        cell.position.take()
    }

    /// Window closed with no successor yet. Background tasks of the old window yield.
    pub fn close_window(&self) -> Option<WindowPosition> {
        let mut cell = self.cell.lock();
        if let Some(w) = cell.window_id.take() {
            info!(window = %w, "window closed");
        }
        cell.position.take()
    }

    pub fn current_window(&self) -> Option<WindowId> {
        self.cell.lock().window_id.clone()
    }

    pub fn is_current(&self, window_id: &WindowId) -> bool {
        self.cell.lock().window_id.as_ref() == Some(window_id)
    }

    /// Create the position on fill confirmation. The confirmed quantity is the first reconcile sample.
    pub fn open_position(
        &self,
        window_id: &WindowId,
        side: Side,
        requested: Decimal,
        filled: Decimal,
        entry_price: Decimal,
        now_ms: u64,
    ) -> Result<Decimal, PositionError> {
        if filled <= Decimal::ZERO || entry_price <= Decimal::ZERO {
            return Err(PositionError::InvalidFill(format!(
                "filled={filled} entry_price={entry_price}"
            )));
        }
        {
            let mut cell = self.cell.lock();
            if cell.window_id.as_ref() != Some(window_id) {
                return Err(PositionError::WindowMismatch {
                    got: window_id.to_string(),
                    live: cell.window_id.as_ref().map(|w| w.to_string()),
                });
            }
            if cell.position.is_some() {
                return Err(PositionError::AlreadyOpen(window_id.to_string()));
            }
            cell.position = Some(WindowPosition::new(
                window_id.clone(),
                side,
                requested,
                entry_price,
                now_ms,
            ));
        }
        let trusted = self
            .reconcile(window_id, filled, ShareSource::FillConfirmation)
            .unwrap_or(filled);
        self.telemetry.append_event(
            EventKind::Fill,
            serde_json::json!({
                "window": window_id.as_str(),
                "side": side.as_str(),
                "requested": requested.to_string(),
                "filled": filled.to_string(),
                "entry_price": entry_price.to_string(),
            }),
        );
        Ok(trusted)
    }

    /// `trusted = max(trusted, reported)` when `window_id` is live; otherwise a no-op.
    /// Returns the trusted count, or `None` on a stale window or missing position.
    pub fn reconcile(
        &self,
        window_id: &WindowId,
        reported: Decimal,
        source: ShareSource,
    ) -> Option<Decimal> {
        self.reconcile_detailed(window_id, reported, source).0
    }

    pub fn reconcile_detailed(
        &self,
        window_id: &WindowId,
        reported: Decimal,
        source: ShareSource,
    ) -> (Option<Decimal>, ReconcileOutcome) {
        let mut precision_spread = None;
        let (trusted, outcome) = {
            let mut cell = self.cell.lock();
            if cell.window_id.as_ref() != Some(window_id) {
                return (None, ReconcileOutcome::WrongWindow);
            }
            let Some(pos) = cell.position.as_mut() else {
                return (None, ReconcileOutcome::NoPosition);
            };
            if pos.window_id != *window_id {
                return (None, ReconcileOutcome::WrongWindow);
            }

            pos.reconcile_calls += 1;
            pos.source_reports.insert(source, reported);

            let before = pos.trusted_shares;
            let outcome = if pos.raise_trusted(reported) {
                ReconcileOutcome::Raised {
                    from: before,
                    to: reported,
                }
            } else if reported < before {
                ReconcileOutcome::StaleIgnored { reported }
            } else {
                ReconcileOutcome::Unchanged
            };

            if !pos.precision_warned
                && pos.reconcile_calls >= self.venue.fill_precision_samples
                && pos.source_reports.len() >= 2
            {
                let max = pos.source_reports.values().copied().max();
                let min = pos.source_reports.values().copied().min();
                if let (Some(max), Some(min)) = (max, min) {
                    if max - min > self.venue.fill_precision_epsilon {
                        pos.precision_warned = true;
                        precision_spread = Some((min, max));
                    }
                }
            }
            (pos.trusted_shares, outcome)
        };

        match &outcome {
            ReconcileOutcome::Raised { from, to } => {
                info!(window = %window_id, ?source, from = %from, to = %to, "trusted shares raised");
            }
            ReconcileOutcome::StaleIgnored { reported } => {
                debug!(window = %window_id, ?source, reported = %reported, trusted = %trusted, "stale share report ignored");
                self.telemetry.append_event(
                    EventKind::StaleData,
                    serde_json::json!({
                        "window": window_id.as_str(),
                        "source": format!("{source:?}"),
                        "reported": reported.to_string(),
                        "trusted": trusted.to_string(),
                    }),
                );
            }
            _ => {}
        }
        if let Some((min, max)) = precision_spread {
            warn!(window = %window_id, min = %min, max = %max, trusted = %trusted, "FILL_PRECISION: share sources disagree");
            self.telemetry.append_event(
                EventKind::FillPrecision,
                serde_json::json!({
                    "window": window_id.as_str(),
                    "min_reported": min.to_string(),
                    "max_reported": max.to_string(),
                    "trusted": trusted.to_string(),
                }),
            );
        }
        (Some(trusted), outcome)
    }

    /// Consistent copy of the position for readers.
    pub fn snapshot(&self) -> Option<WindowPosition> {
        self.cell.lock().position.clone()
    }

    /// Run `f` on the live, non-exited position of `window_id` under the lock.
    pub fn update<R>(
        &self,
        window_id: &WindowId,
        f: impl FnOnce(&mut WindowPosition) -> R,
    ) -> Option<R> {
        let mut cell = self.cell.lock();
        if cell.window_id.as_ref() != Some(window_id) {
            return None;
        }
        let pos = cell.position.as_mut()?;
        if pos.exited {
            return None;
        }
        Some(f(pos))
    }

    /// Set aside up to `qty` for a sell. Clamped so reserved + sold never exceeds trusted.
    pub fn reserve(
        &self,
        window_id: &WindowId,
        tier: ExitTier,
        qty: Decimal,
    ) -> Option<(ReservationId, Decimal)> {
        let venue = &self.venue;
        self.update(window_id, |pos| pos.reserve(tier, qty, venue))
            .flatten()
    }

    /// Book a cumulative fill for a reservation at `price`. Idempotent: only the increase
    /// over what was already booked counts. Sets the exited flag once the position is cleared.
    pub fn report_fill(
        &self,
        window_id: &WindowId,
        id: ReservationId,
        cumulative_filled: Decimal,
        price: Decimal,
    ) -> Option<FillProgress> {
        let min = self.venue.min_sell_size;
        let progress = {
            let mut cell = self.cell.lock();
            if cell.window_id.as_ref() != Some(window_id) {
                return None;
            }
            let pos = cell.position.as_mut()?;
            let entry = pos.entry_price;
            let res = pos.reservations.get_mut(&id)?;
            let cumulative = cumulative_filled.min(res.requested);
            let delta = cumulative - res.filled;
            if delta <= Decimal::ZERO {
                return Some(FillProgress {
                    delta: Decimal::ZERO,
                    pnl_delta: Decimal::ZERO,
                    newly_exited: false,
                });
            }
            res.filled = cumulative;
            res.fill_notional += delta * price;
            let pnl_delta = delta * (price - entry);
            pos.sold_shares += delta;
            pos.realized_pnl += pnl_delta;
            let newly_exited = pos.held() < min && pos.set_exited();
            FillProgress {
                delta,
                pnl_delta,
                newly_exited,
            }
        };
        info!(
            window = %window_id,
            filled = %progress.delta,
            price = %price,
            pnl_delta = %progress.pnl_delta,
            "sell fill booked"
        );
        if progress.newly_exited {
            self.emit_exited(window_id, "cleared");
        }
        Some(progress)
    }

    /// Drop a reservation; its unfilled remainder becomes sellable again.
    pub fn release(&self, window_id: &WindowId, id: ReservationId) -> Option<Reservation> {
        let mut cell = self.cell.lock();
        if cell.window_id.as_ref() != Some(window_id) {
            return None;
        }
        cell.position.as_mut()?.release_reservation(id)
    }

    /// Terminal transition. True only for the caller that performed it.
    pub fn mark_exited(&self, window_id: &WindowId, reason: &str) -> bool {
        let done = {
            let mut cell = self.cell.lock();
            if cell.window_id.as_ref() != Some(window_id) {
                return false;
            }
            match cell.position.as_mut() {
                Some(pos) => pos.set_exited(),
                None => false,
            }
        };
        if done {
            self.emit_exited(window_id, reason);
        }
        done
    }

    /// Claim the single in-flight liquidation slot for `tier`.
    pub fn claim_tier(&self, window_id: &WindowId, tier: ExitTier) -> bool {
        self.update(window_id, |pos| pos.claim(tier)).unwrap_or(false)
    }

    /// Give the slot back, optionally handing the remainder to `escalate_to`.
    pub fn release_tier(&self, window_id: &WindowId, tier: ExitTier, escalate_to: Option<ExitTier>) {
        let escalated = self
            .update(window_id, |pos| {
                if pos.in_flight == Some(tier) {
                    pos.in_flight = None;
                }
                match escalate_to {
                    Some(next) if pos.pending_escalation.map_or(true, |p| next > p) => {
                        pos.pending_escalation = Some(next);
                        true
                    }
                    _ => false,
                }
            })
            .unwrap_or(false);
        if let Some(next) = escalate_to.filter(|_| escalated) {
            warn!(window = %window_id, from = %tier, to = %next, "escalating remaining shares");
            self.telemetry.append_event(
                EventKind::Escalation,
                serde_json::json!({
                    "window": window_id.as_str(),
                    "from": tier.as_str(),
                    "to": next.as_str(),
                }),
            );
        }
    }

    /// True when a background sequence for `tier` must stop: window changed, position exited,
    /// or a more aggressive tier is waiting.
    pub fn should_yield(&self, window_id: &WindowId, tier: ExitTier) -> bool {
        let cell = self.cell.lock();
        if cell.window_id.as_ref() != Some(window_id) {
            return true;
        }
        match cell.position.as_ref() {
            Some(pos) => pos.exited || pos.pending_escalation.map_or(false, |p| p > tier),
            None => true,
        }
    }

    pub fn record_decision(&self, window_id: &WindowId, decision: ExitDecision) {
        let recorded = {
            let mut cell = self.cell.lock();
            if cell.window_id.as_ref() != Some(window_id) {
                false
            } else if let Some(pos) = cell.position.as_mut() {
                pos.decisions.push(decision.clone());
                true
            } else {
                false
            }
        };
        if recorded {
            self.telemetry.append_event(
                EventKind::ExitDecision,
                serde_json::to_value(&decision).unwrap_or_default(),
            );
        }
    }

    fn emit_exited(&self, window_id: &WindowId, reason: &str) {
        let snap = self.snapshot();
        let (pnl, sold) = snap
            .map(|p| (p.realized_pnl, p.sold_shares))
            .unwrap_or_default();
        info!(window = %window_id, reason, realized_pnl = %pnl, sold = %sold, "position exited");
        self.telemetry.append_event(
            EventKind::Exited,
            serde_json::json!({
                "window": window_id.as_str(),
                "reason": reason,
                "realized_pnl": pnl.to_string(),
                "sold_shares": sold.to_string(),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemoryTelemetry;
    use rust_decimal_macros::dec;

    fn setup() -> (Reconciler, Arc<MemoryTelemetry>, WindowId) {
        let telemetry = Arc::new(MemoryTelemetry::default());
        let rec = Reconciler::new(VenueConfig::default(), telemetry.clone());
        let w = WindowId::new("btc-updown-5m-1000");
        rec.open_window(w.clone());
        (rec, telemetry, w)
    }

    #[test]
    fn zero_report_after_fill_never_regresses() {
        let (rec, _, w) = setup();
        rec.open_position(&w, Side::Up, dec!(6), dec!(6), dec!(0.95), 0).unwrap();
        assert_eq!(rec.reconcile(&w, dec!(0), ShareSource::PositionsApi), Some(dec!(6)));
        assert_eq!(rec.snapshot().unwrap().trusted_shares(), dec!(6));
    }

    #[test]
    fn trusted_is_monotonic_over_any_sequence() {
        let (rec, _, w) = setup();
        rec.open_position(&w, Side::Down, dec!(10), dec!(4), dec!(0.94), 0).unwrap();
        let reports = [dec!(3), dec!(9.5), dec!(0), dec!(10), dec!(7), dec!(10)];
        let mut last = dec!(0);
        for r in reports {
            let t = rec.reconcile(&w, r, ShareSource::OrderStatus).unwrap();
            assert!(t >= last);
            last = t;
        }
        assert_eq!(last, dec!(10));
    }

    #[test]
    fn stale_window_is_noop() {
        let (rec, _, w) = setup();
        rec.open_position(&w, Side::Up, dec!(5), dec!(5), dec!(0.95), 0).unwrap();
        let old = WindowId::new("btc-updown-5m-700");
        let (t, outcome) = rec.reconcile_detailed(&old, dec!(50), ShareSource::PositionsApi);
        assert_eq!(t, None);
        assert_eq!(outcome, ReconcileOutcome::WrongWindow);
        assert_eq!(rec.snapshot().unwrap().trusted_shares(), dec!(5));
    }

    #[test]
    fn disagreement_warns_once_but_returns_max() {
        let (rec, telemetry, w) = setup();
        rec.open_position(&w, Side::Up, dec!(10), dec!(10), dec!(0.95), 0).unwrap();
        rec.reconcile(&w, dec!(9.5), ShareSource::PositionsApi);
        let t = rec.reconcile(&w, dec!(9.5), ShareSource::PositionsApi);
        assert_eq!(t, Some(dec!(10)));
        rec.reconcile(&w, dec!(9.5), ShareSource::PositionsApi);
        assert_eq!(telemetry.count(EventKind::FillPrecision), 1);
    }

    #[test]
    fn reservations_never_exceed_trusted() {
        let (rec, _, w) = setup();
        rec.open_position(&w, Side::Up, dec!(10), dec!(10), dec!(0.95), 0).unwrap();
        let (_, a) = rec.reserve(&w, ExitTier::ProfitLock, dec!(7)).unwrap();
        let (_, b) = rec.reserve(&w, ExitTier::HardStop, dec!(7)).unwrap();
        assert_eq!(a, dec!(7));
        assert_eq!(b, dec!(3));
        assert!(rec.reserve(&w, ExitTier::SafetyExit, dec!(1)).is_none());
    }

    #[test]
    fn sell_size_is_floored_to_precision() {
        let (rec, _, w) = setup();
        rec.open_position(&w, Side::Up, dec!(6), dec!(5.999), dec!(0.95), 0).unwrap();
        let (_, granted) = rec.reserve(&w, ExitTier::HardStop, dec!(100)).unwrap();
        assert_eq!(granted, dec!(5.99));
    }

    #[test]
    fn cumulative_fill_reports_are_idempotent() {
        let (rec, _, w) = setup();
        rec.open_position(&w, Side::Up, dec!(10), dec!(10), dec!(0.95), 0).unwrap();
        let (id, _) = rec.reserve(&w, ExitTier::ProfitLock, dec!(10)).unwrap();
        rec.report_fill(&w, id, dec!(4), dec!(0.99)).unwrap();
        let again = rec.report_fill(&w, id, dec!(4), dec!(0.99)).unwrap();
        assert_eq!(again.delta, dec!(0));
        let done = rec.report_fill(&w, id, dec!(10), dec!(0.99)).unwrap();
        assert!(done.newly_exited);
        let pos = rec.snapshot().unwrap();
        assert_eq!(pos.realized_pnl, dec!(0.40));
        assert!(pos.is_exited());
    }

    #[test]
    fn exited_flag_transitions_once() {
        let (rec, telemetry, w) = setup();
        rec.open_position(&w, Side::Up, dec!(10), dec!(10), dec!(0.95), 0).unwrap();
        assert!(rec.mark_exited(&w, "test"));
        assert!(!rec.mark_exited(&w, "test"));
        assert_eq!(telemetry.count(EventKind::Exited), 1);
        assert!(rec.reserve(&w, ExitTier::HardStop, dec!(1)).is_none());
    }

    #[test]
    fn single_in_flight_slot() {
        let (rec, _, w) = setup();
        rec.open_position(&w, Side::Up, dec!(10), dec!(10), dec!(0.95), 0).unwrap();
        assert!(rec.claim_tier(&w, ExitTier::DangerExit));
        assert!(!rec.claim_tier(&w, ExitTier::HardStop));
        rec.release_tier(&w, ExitTier::DangerExit, Some(ExitTier::HardStop));
        assert!(rec.should_yield(&w, ExitTier::DangerExit));
        assert!(rec.claim_tier(&w, ExitTier::HardStop));
        assert_eq!(rec.snapshot().unwrap().pending_escalation, None);
    }

    #[test]
    fn rollover_archives_previous_position() {
        let (rec, _, w) = setup();
        rec.open_position(&w, Side::Up, dec!(10), dec!(10), dec!(0.95), 0).unwrap();
        let next = WindowId::new("btc-updown-5m-1300");
        let archived = rec.open_window(next.clone()).unwrap();
        assert_eq!(archived.window_id, w);
        assert!(rec.snapshot().is_none());
        assert!(rec.should_yield(&w, ExitTier::HardStop));
        assert!(rec.is_current(&next));
    }
}
