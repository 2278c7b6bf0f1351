//! Named configuration for every weight, threshold, debounce count, floor and retry budget.
//! Loaded from the environment (optionally `.env`), with defaults.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

/// Weights of the five danger signals.
#[derive(Debug, Clone, PartialEq)]
pub struct DangerWeights {
    /// Dominant signal.
    pub confidence_drop: Decimal,
    pub book_imbalance: Decimal,
    pub price_velocity: Decimal,
    pub opposing_ask: Decimal,
    /// Full value reached when remaining time hits zero.
    pub time_decay: Decimal,
}

impl Default for DangerWeights {
    fn default() -> Self {
        Self {
            confidence_drop: dec!(3.0),
            book_imbalance: dec!(0.4),
            price_velocity: dec!(2.0),
            opposing_ask: dec!(0.5),
            time_decay: dec!(0.2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DangerConfig {
    pub weights: DangerWeights,
    /// Imbalance against our side below this magnitude counts as neutral.
    pub imbalance_floor: Decimal,
    /// Book levels per side summed for the imbalance signal.
    pub imbalance_depth_levels: usize,
    /// Opposing ask at or below this is routine end-of-window noise.
    pub opposing_ask_floor: Decimal,
    /// Samples held in the velocity ring (one per tick).
    pub velocity_samples: usize,
    /// Time decay is zero outside this many final seconds.
    pub time_decay_window_secs: u64,
}

impl Default for DangerConfig {
    fn default() -> Self {
        Self {
            weights: DangerWeights::default(),
            imbalance_floor: dec!(0.30),
            imbalance_depth_levels: 5,
            opposing_ask_floor: dec!(0.15),
            velocity_samples: 5,
            time_decay_window_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LadderConfig {
    /// Profit-lock sell price = entry + offset (e.g. 0.95 -> 0.99).
    pub profit_lock_offset: Decimal,
    pub profit_lock_max_price: Decimal,
    /// Cancel the resting profit lock when our best bid falls below this. Must sit above `hard_stop_trigger`.
    pub profit_lock_cancel_bid: Decimal,
    pub danger_alert_threshold: Decimal,
    /// Danger Exit also requires the opposing ask above this gate.
    pub danger_opposing_ask_gate: Decimal,
    pub danger_debounce_ticks: u32,
    pub hard_stop_trigger: Decimal,
    pub hard_stop_debounce_ticks: u32,
    pub safety_final_secs: u64,
    /// Safety Exit fires only while our best bid is below this.
    pub safety_bid_floor: Decimal,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            profit_lock_offset: dec!(0.04),
            profit_lock_max_price: dec!(0.99),
            profit_lock_cancel_bid: dec!(0.70),
            danger_alert_threshold: dec!(0.40),
            danger_opposing_ask_gate: dec!(0.15),
            danger_debounce_ticks: 2,
            hard_stop_trigger: dec!(0.60),
            hard_stop_debounce_ticks: 2,
            safety_final_secs: 10,
            safety_bid_floor: dec!(0.80),
        }
    }
}

/// Retry budget of one chunked liquidation tier.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidationBudget {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Limit = best bid - slippage, never below the floor.
    pub slippage: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub profit_lock_place_attempts: u32,
    pub profit_lock_backoff: Duration,
    pub profit_lock_poll_interval: Duration,
    pub danger_exit: LiquidationBudget,
    pub hard_stop: LiquidationBudget,
    /// Price that accepts any fill; used when the book has no depth and by Safety Exit.
    pub liquidation_floor_price: Decimal,
    /// Wall-clock cap on every background task.
    pub max_task_duration: Duration,
    pub resolution_attempts: u32,
    pub resolution_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            profit_lock_place_attempts: 3,
            profit_lock_backoff: Duration::from_millis(250),
            profit_lock_poll_interval: Duration::from_millis(1000),
            danger_exit: LiquidationBudget {
                max_attempts: 4,
                backoff: Duration::from_millis(300),
                slippage: dec!(0.02),
            },
            hard_stop: LiquidationBudget {
                max_attempts: 8,
                backoff: Duration::from_millis(500),
                slippage: dec!(0.05),
            },
            liquidation_floor_price: dec!(0.01),
            max_task_duration: Duration::from_secs(30),
            resolution_attempts: 20,
            resolution_backoff: Duration::from_secs(15),
        }
    }
}

/// Venue precision and reconciliation tolerances.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueConfig {
    /// Sell sizes are floored to this many decimals.
    pub share_decimals: u32,
    pub min_sell_size: Decimal,
    pub tick_size: Decimal,
    /// Sources disagreeing by more than this raise a FILL_PRECISION warning.
    pub fill_precision_epsilon: Decimal,
    /// Reconcile calls observed before disagreement is judged.
    pub fill_precision_samples: u32,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            share_decimals: 2,
            min_sell_size: dec!(0.01),
            tick_size: dec!(0.01),
            fill_precision_epsilon: dec!(0.01),
            fill_precision_samples: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dry_run: bool,
    pub clob_host: String,
    pub gamma_base_url: String,
    pub data_api_url: String,
    pub tick_interval: Duration,
    /// Budget for order-book and position reads on the tick path.
    pub read_timeout: Duration,
    pub position_poll_ticks: u64,
    pub session_log_enabled: bool,
    pub session_log_dir: String,
    /// Paper mode only: simulate a capture fill when a side's ask is inside [min, max].
    pub paper_capture_min: Decimal,
    pub paper_capture_max: Decimal,
    pub paper_capture_shares: Decimal,
    pub danger: DangerConfig,
    pub ladder: LadderConfig,
    pub retry: RetryConfig,
    pub venue: VenueConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dry_run: true,
            clob_host: "https://clob.polymarket.com".into(),
            gamma_base_url: "https://gamma-api.polymarket.com".into(),
            data_api_url: "https://data-api.polymarket.com".into(),
            tick_interval: Duration::from_millis(1000),
            read_timeout: Duration::from_millis(400),
            position_poll_ticks: 3,
            session_log_enabled: true,
            session_log_dir: "logs".into(),
            paper_capture_min: dec!(0.93),
            paper_capture_max: dec!(0.95),
            paper_capture_shares: dec!(10),
            danger: DangerConfig::default(),
            ladder: LadderConfig::default(),
            retry: RetryConfig::default(),
            venue: VenueConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let d = Config::default();

        let weights = DangerWeights {
            confidence_drop: parse_env_decimal("W_CONFIDENCE_DROP", d.danger.weights.confidence_drop)?,
            book_imbalance: parse_env_decimal("W_BOOK_IMBALANCE", d.danger.weights.book_imbalance)?,
            price_velocity: parse_env_decimal("W_PRICE_VELOCITY", d.danger.weights.price_velocity)?,
            opposing_ask: parse_env_decimal("W_OPPOSING_ASK", d.danger.weights.opposing_ask)?,
            time_decay: parse_env_decimal("W_TIME_DECAY", d.danger.weights.time_decay)?,
        };
        let danger = DangerConfig {
            weights,
            imbalance_floor: parse_env_decimal("IMBALANCE_FLOOR", d.danger.imbalance_floor)?,
            imbalance_depth_levels: parse_env_u64("IMBALANCE_DEPTH_LEVELS", d.danger.imbalance_depth_levels as u64)? as usize,
            opposing_ask_floor: parse_env_decimal("OPPOSING_ASK_FLOOR", d.danger.opposing_ask_floor)?,
            velocity_samples: parse_env_u64("VELOCITY_SAMPLES", d.danger.velocity_samples as u64)? as usize,
            time_decay_window_secs: parse_env_u64("TIME_DECAY_WINDOW_SECS", d.danger.time_decay_window_secs)?,
        };

        let ladder = LadderConfig {
            profit_lock_offset: parse_env_decimal("PROFIT_LOCK_OFFSET", d.ladder.profit_lock_offset)?,
            profit_lock_max_price: parse_env_decimal("PROFIT_LOCK_MAX_PRICE", d.ladder.profit_lock_max_price)?,
            profit_lock_cancel_bid: parse_env_decimal("PROFIT_LOCK_CANCEL_BID", d.ladder.profit_lock_cancel_bid)?,
            danger_alert_threshold: parse_env_decimal("DANGER_ALERT_THRESHOLD", d.ladder.danger_alert_threshold)?,
            danger_opposing_ask_gate: parse_env_decimal("DANGER_OPPOSING_ASK_GATE", d.ladder.danger_opposing_ask_gate)?,
            danger_debounce_ticks: parse_env_u32("DANGER_DEBOUNCE_TICKS", d.ladder.danger_debounce_ticks)?,
            hard_stop_trigger: parse_env_decimal("HARD_STOP_TRIGGER", d.ladder.hard_stop_trigger)?,
            hard_stop_debounce_ticks: parse_env_u32("HARD_STOP_DEBOUNCE_TICKS", d.ladder.hard_stop_debounce_ticks)?,
            safety_final_secs: parse_env_u64("SAFETY_FINAL_SECS", d.ladder.safety_final_secs)?,
            safety_bid_floor: parse_env_decimal("SAFETY_BID_FLOOR", d.ladder.safety_bid_floor)?,
        };

        let retry = RetryConfig {
            profit_lock_place_attempts: parse_env_u32("PROFIT_LOCK_PLACE_ATTEMPTS", d.retry.profit_lock_place_attempts)?,
            profit_lock_backoff: parse_env_ms("PROFIT_LOCK_BACKOFF_MS", d.retry.profit_lock_backoff)?,
            profit_lock_poll_interval: parse_env_ms("PROFIT_LOCK_POLL_MS", d.retry.profit_lock_poll_interval)?,
            danger_exit: LiquidationBudget {
                max_attempts: parse_env_u32("DANGER_EXIT_ATTEMPTS", d.retry.danger_exit.max_attempts)?,
                backoff: parse_env_ms("DANGER_EXIT_BACKOFF_MS", d.retry.danger_exit.backoff)?,
                slippage: parse_env_decimal("DANGER_EXIT_SLIPPAGE", d.retry.danger_exit.slippage)?,
            },
            hard_stop: LiquidationBudget {
                max_attempts: parse_env_u32("HARD_STOP_ATTEMPTS", d.retry.hard_stop.max_attempts)?,
                backoff: parse_env_ms("HARD_STOP_BACKOFF_MS", d.retry.hard_stop.backoff)?,
                slippage: parse_env_decimal("HARD_STOP_SLIPPAGE", d.retry.hard_stop.slippage)?,
            },
            liquidation_floor_price: parse_env_decimal("LIQUIDATION_FLOOR_PRICE", d.retry.liquidation_floor_price)?,
            max_task_duration: parse_env_ms("MAX_TASK_DURATION_MS", d.retry.max_task_duration)?,
            resolution_attempts: parse_env_u32("RESOLUTION_ATTEMPTS", d.retry.resolution_attempts)?,
            resolution_backoff: parse_env_ms("RESOLUTION_BACKOFF_MS", d.retry.resolution_backoff)?,
        };

        let venue = VenueConfig {
            share_decimals: parse_env_u32("SHARE_DECIMALS", d.venue.share_decimals)?,
            min_sell_size: parse_env_decimal("MIN_SELL_SIZE", d.venue.min_sell_size)?,
            tick_size: parse_env_decimal("TICK_SIZE", d.venue.tick_size)?,
            fill_precision_epsilon: parse_env_decimal("FILL_PRECISION_EPSILON", d.venue.fill_precision_epsilon)?,
            fill_precision_samples: parse_env_u32("FILL_PRECISION_SAMPLES", d.venue.fill_precision_samples)?,
        };

        let config = Self {
            dry_run: parse_env_bool("DRY_RUN", d.dry_run)?,
            clob_host: std::env::var("POLYMARKET_CLOB_HOST").unwrap_or(d.clob_host),
            gamma_base_url: std::env::var("GAMMA_BASE_URL").unwrap_or(d.gamma_base_url),
            data_api_url: std::env::var("DATA_API_URL").unwrap_or(d.data_api_url),
            tick_interval: parse_env_ms("TICK_INTERVAL_MS", d.tick_interval)?,
            read_timeout: parse_env_ms("READ_TIMEOUT_MS", d.read_timeout)?,
            position_poll_ticks: parse_env_u64("POSITION_POLL_TICKS", d.position_poll_ticks)?,
            session_log_enabled: parse_env_bool("SESSION_LOG_ENABLED", d.session_log_enabled)?,
            session_log_dir: std::env::var("SESSION_LOG_DIR").unwrap_or(d.session_log_dir),
            paper_capture_min: parse_env_decimal("PAPER_CAPTURE_MIN", d.paper_capture_min)?,
            paper_capture_max: parse_env_decimal("PAPER_CAPTURE_MAX", d.paper_capture_max)?,
            paper_capture_shares: parse_env_decimal("PAPER_CAPTURE_SHARES", d.paper_capture_shares)?,
            danger,
            ladder,
            retry,
            venue,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the ladder's ordering guarantees.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let l = &self.ladder;
        if l.profit_lock_cancel_bid <= l.hard_stop_trigger {
            return Err(ConfigError::Inconsistent(format!(
                "PROFIT_LOCK_CANCEL_BID ({}) must be strictly above HARD_STOP_TRIGGER ({})",
                l.profit_lock_cancel_bid, l.hard_stop_trigger
            )));
        }
        if l.danger_debounce_ticks == 0 || l.hard_stop_debounce_ticks == 0 {
            return Err(ConfigError::Inconsistent(
                "debounce tick counts must be at least 1".into(),
            ));
        }
        let w = &self.danger.weights;
        for (name, v) in [
            ("W_CONFIDENCE_DROP", w.confidence_drop),
            ("W_BOOK_IMBALANCE", w.book_imbalance),
            ("W_PRICE_VELOCITY", w.price_velocity),
            ("W_OPPOSING_ASK", w.opposing_ask),
            ("W_TIME_DECAY", w.time_decay),
        ] {
            if v.is_sign_negative() {
                return Err(ConfigError::InvalidValue {
                    key: name.into(),
                    value: v.to_string(),
                });
            }
        }
        if self.danger.velocity_samples < 2 {
            return Err(ConfigError::InvalidValue {
                key: "VELOCITY_SAMPLES".into(),
                value: self.danger.velocity_samples.to_string(),
            });
        }
        let r = &self.retry;
        if r.danger_exit.max_attempts == 0
            || r.hard_stop.max_attempts == 0
            || r.profit_lock_place_attempts == 0
        {
            return Err(ConfigError::Inconsistent(
                "retry attempt budgets must be at least 1".into(),
            ));
        }
        if r.liquidation_floor_price <= Decimal::ZERO || r.liquidation_floor_price >= l.hard_stop_trigger {
            return Err(ConfigError::Inconsistent(format!(
                "LIQUIDATION_FLOOR_PRICE ({}) must be in (0, HARD_STOP_TRIGGER)",
                r.liquidation_floor_price
            )));
        }
        if self.venue.share_decimals > 6 {
            return Err(ConfigError::InvalidValue {
                key: "SHARE_DECIMALS".into(),
                value: self.venue.share_decimals.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse().with_context(|| format!("Invalid {key}")),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse().with_context(|| format!("Invalid {key}")),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(key: &str, default: u32) -> Result<u32> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse().with_context(|| format!("Invalid {key}")),
        Err(_) => Ok(default),
    }
}

fn parse_env_ms(key: &str, default: Duration) -> Result<Duration> {
    let ms = parse_env_u64(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

fn parse_env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => anyhow::bail!("Invalid {key}: {val}"),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn cancel_threshold_must_sit_above_hard_stop() {
        let mut c = Config::default();
        c.ladder.profit_lock_cancel_bid = dec!(0.60);
        c.ladder.hard_stop_trigger = dec!(0.60);
        assert!(matches!(c.validate(), Err(ConfigError::Inconsistent(_))));
    }

    #[test]
    fn zero_debounce_rejected() {
        let mut c = Config::default();
        c.ladder.hard_stop_debounce_ticks = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn negative_weight_rejected() {
        let mut c = Config::default();
        c.danger.weights.opposing_ask = dec!(-0.1);
        assert!(matches!(c.validate(), Err(ConfigError::InvalidValue { .. })));
    }
}
