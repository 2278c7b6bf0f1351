//! 5-minute window discovery and outcome lookup via the Gamma API.
//! Slug pattern: `{asset}-updown-5m-{window_start_unix}`.

use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{GammaEvent, GammaMarket, ResolvedMarket, Side};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;

pub const WINDOW_SECONDS: u64 = 300;

const USER_AGENT: &str = "capture-guard-rust";

/// Start of the window containing `now_unix` (the number used in slugs).
pub fn window_start_unix(now_unix: u64) -> u64 {
    (now_unix / WINDOW_SECONDS) * WINDOW_SECONDS
}

pub fn window_slug(asset: &str, window_start: u64) -> String {
    format!("{}-updown-5m-{}", asset.to_lowercase(), window_start)
}

/// Slug of the live window at `now_unix`.
pub fn active_window_slug(asset: &str, now_unix: u64) -> String {
    window_slug(asset, window_start_unix(now_unix))
}

/// Fetch market by slug: tries /markets/slug/{slug} first, then /events/slug/{slug} on 404.
pub async fn fetch_market_by_slug(client: &Client, base_url: &str, slug: &str) -> Result<ResolvedMarket> {
    let m = fetch_gamma_market(client, base_url, slug).await?;
    parse_gamma_market(&m, slug)
}

async fn fetch_gamma_market(client: &Client, base_url: &str, slug: &str) -> Result<GammaMarket> {
    let base = base_url.trim_end_matches('/');
    let market_url = format!("{}/markets/slug/{}", base, urlencoding::encode(slug));

    let res = client
        .get(&market_url)
        .header("user-agent", USER_AGENT)
        .send()
        .await
        .context("Gamma API request")?;

    if res.status() == 404 {
        let event_url = format!("{}/events/slug/{}", base, urlencoding::encode(slug));
        let event: GammaEvent = client
            .get(&event_url)
            .header("user-agent", USER_AGENT)
            .send()
            .await
            .context("Gamma API event request")?
            .error_for_status()
            .context("Gamma API event status")?
            .json()
            .await
            .context("Gamma event JSON")?;
        return event
            .markets
            .and_then(|v| v.into_iter().next())
            .context("Event has no markets");
    }
    res.error_for_status()
        .context("Gamma API status")?
        .json::<GammaMarket>()
        .await
        .context("Gamma market JSON")
}

/// Winning side of a closed market, `ResolutionUnavailable` while it is still open.
pub async fn fetch_resolution(client: &Client, base_url: &str, slug: &str) -> ExchangeResult<Side> {
    let m = fetch_gamma_market(client, base_url, slug)
        .await
        .map_err(|e| ExchangeError::NetworkTransient(format!("{e:#}")))?;
    parse_resolution(&m).ok_or(ExchangeError::ResolutionUnavailable)
}

/// `outcomePrices` settles to `["1","0"]` (Up) or `["0","1"]` (Down) once closed.
pub fn parse_resolution(m: &GammaMarket) -> Option<Side> {
    if m.closed != Some(true) {
        return None;
    }
    let raw = m.outcome_prices.as_deref()?;
    let prices: Vec<String> = serde_json::from_str(raw.trim()).ok()?;
    let up = Decimal::from_str(prices.first()?.trim()).ok()?;
    let down = Decimal::from_str(prices.get(1)?.trim()).ok()?;
    if up == Decimal::ONE && down.is_zero() {
        Some(Side::Up)
    } else if down == Decimal::ONE && up.is_zero() {
        Some(Side::Down)
    } else {
        None
    }
}

fn parse_gamma_market(m: &GammaMarket, slug: &str) -> Result<ResolvedMarket> {
    let condition_id = m
        .condition_id
        .as_deref()
        .or(m.id.as_deref())
        .unwrap_or("")
        .trim()
        .to_string();
    if condition_id.is_empty() {
        anyhow::bail!("Market slug \"{}\" has no conditionId", slug);
    }

    let end_date_str = m
        .end_date
        .as_deref()
        .filter(|s| s.contains('T'))
        .or(m.end_date_iso.as_deref())
        .or(m.end_date.as_deref())
        .unwrap_or("");
    let close_time_unix = parse_end_date_to_unix(end_date_str)?;
    let interval_start_unix = close_time_unix.saturating_sub(WINDOW_SECONDS);

    let (token_id_up, token_id_down) = parse_token_ids(m)?;

    Ok(ResolvedMarket {
        slug: slug.to_string(),
        condition_id,
        close_time_unix,
        interval_start_unix,
        token_id_up,
        token_id_down,
    })
}

fn parse_end_date_to_unix(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Market has no endDate/endDateIso");
    }
    if let Ok(t) = s.parse::<u64>() {
        return Ok(t);
    }
    let dt = DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .context("Invalid endDate")?;
    Ok(dt.with_timezone(&Utc).timestamp().max(0) as u64)
}

fn parse_token_ids(m: &GammaMarket) -> Result<(String, String)> {
    let mut up = None;
    let mut down = None;

    // Outcome labels first so array order does not matter.
    for t in m.tokens.iter().flatten() {
        let id = t.token_id.as_deref().unwrap_or("").trim();
        if id.is_empty() {
            continue;
        }
        match t.outcome.as_deref().map(Side::from_str) {
            Some(Ok(Side::Up)) => up = Some(id.to_string()),
            Some(Ok(Side::Down)) => down = Some(id.to_string()),
            _ => {}
        }
    }

    if let (Some(up), Some(down)) = (up, down) {
        return Ok((up, down));
    }

    // clobTokenIds order is [Yes, No] = [Up, Down].
    let raw = m.clob_token_ids.as_deref().unwrap_or("").trim();
    let parts: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw).unwrap_or_default()
    } else {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };
    match parts.as_slice() {
        [up, down, ..] => Ok((up.clone(), down.clone())),
        _ => anyhow::bail!(
            "Market could not resolve Up/Down token IDs (clobTokenIds={:?})",
            m.clob_token_ids
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gamma(json: &str) -> GammaMarket {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn slug_uses_window_start() {
        assert_eq!(window_start_unix(1_771_997_234), 1_771_997_100);
        assert_eq!(active_window_slug("BTC", 1_771_997_234), "btc-updown-5m-1771997100");
    }

    #[test]
    fn parses_market_with_clob_token_ids() {
        let m = gamma(
            r#"{"conditionId":"0xabc","endDate":"2026-02-25T05:30:00Z","clobTokenIds":"[\"111\", \"222\"]"}"#,
        );
        let r = parse_gamma_market(&m, "btc-updown-5m-1771997100").unwrap();
        assert_eq!(r.token_id_up, "111");
        assert_eq!(r.token_id_down, "222");
        assert_eq!(r.interval_start_unix + WINDOW_SECONDS, r.close_time_unix);
    }

    #[test]
    fn resolution_requires_closed_and_settled_prices() {
        let open = gamma(r#"{"closed":false,"outcomePrices":"[\"0.97\", \"0.03\"]"}"#);
        assert_eq!(parse_resolution(&open), None);
        let pending = gamma(r#"{"closed":true,"outcomePrices":"[\"0.5\", \"0.5\"]"}"#);
        assert_eq!(parse_resolution(&pending), None);
        let down = gamma(r#"{"closed":true,"outcomePrices":"[\"0\", \"1\"]"}"#);
        assert_eq!(parse_resolution(&down), Some(Side::Down));
    }
}
