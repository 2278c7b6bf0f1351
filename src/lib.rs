//! Post-fill risk engine for Polymarket 5-minute capture positions.
//!
//! After a capture fill the engine reconciles the held quantity, scores adverse signals
//! every tick and walks a four-tier exit ladder (profit lock, danger exit, hard stop,
//! safety exit). Slow order sequences run as window-scoped background tasks so the tick
//! loop never blocks.

pub mod clob;
pub mod config;
pub mod danger;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod ladder;
pub mod liquidation;
pub mod market;
pub mod position;
pub mod scheduler;
pub mod signing;
pub mod telemetry;
pub mod types;
