//! Live CLOB client: REST order placement/status/cancel with L2 auth, public books,
//! data-api positions and Gamma resolution.

use crate::error::{ExchangeError, ExchangeResult};
use crate::exchange::{Exchange, OrderAck, OrderStatus};
use crate::signing::{L2Credentials, OrderSigner};
use crate::types::{
    BookLevel, BookSide, OrderBookSnapshot, OrderKind, PositionReport, ResolvedMarket, Side,
    SidePosition,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct RawBook {
    bids: Option<Vec<RawLevel>>,
    asks: Option<Vec<RawLevel>>,
}

fn parse_levels(raw: Option<Vec<RawLevel>>) -> Vec<BookLevel> {
    raw.unwrap_or_default()
        .iter()
        .filter_map(|l| {
            let price = Decimal::from_str(l.price.trim()).ok()?;
            let size = Decimal::from_str(l.size.trim()).ok()?;
            Some(BookLevel::new(price, size))
        })
        .collect()
}

/// GET /book for one token (no auth).
async fn fetch_book_side(client: &Client, clob_host: &str, token_id: &str) -> ExchangeResult<BookSide> {
    let url = format!("{}/book?token_id={}", clob_host, urlencoding::encode(token_id));
    let res = client
        .get(&url)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !res.status().is_success() {
        let status = res.status();
        let text = res.text().await.unwrap_or_default();
        let msg = format!("CLOB {}: {}", status, text.chars().take(200).collect::<String>());
        return Err(ExchangeError::from_venue_message(&msg));
    }
    let raw: RawBook = res.json().await?;
    Ok(BookSide::from_levels(parse_levels(raw.bids), parse_levels(raw.asks)))
}

/// Books for both outcome tokens, fetched concurrently.
pub async fn fetch_book_snapshot(
    client: &Client,
    clob_host: &str,
    market: &ResolvedMarket,
) -> ExchangeResult<OrderBookSnapshot> {
    let (up, down) = tokio::join!(
        fetch_book_side(client, clob_host, &market.token_id_up),
        fetch_book_side(client, clob_host, &market.token_id_down),
    );
    Ok(OrderBookSnapshot {
        timestamp_ms: now_ms(),
        up: up?,
        down: down?,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error_msg: Option<String>,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    /// For a SELL, shares given.
    #[serde(default)]
    making_amount: Option<String>,
    /// For a SELL, USDC received.
    #[serde(default)]
    taking_amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenOrderResponse {
    status: Option<String>,
    size_matched: Option<String>,
    price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataApiPosition {
    asset: Option<String>,
    size: Option<f64>,
    #[serde(rename = "avgPrice")]
    avg_price: Option<f64>,
}

fn parse_decimal(s: Option<&str>) -> Decimal {
    s.and_then(|v| Decimal::from_str(v.trim()).ok())
        .unwrap_or_default()
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Live client (HMAC auth + EIP-712 signing).
pub struct ClobExchange {
    clob_host: String,
    data_api_url: String,
    gamma_base_url: String,
    signer: OrderSigner,
    creds: L2Credentials,
    client: Client,
}

impl ClobExchange {
    pub fn from_env(clob_host: &str, data_api_url: &str, gamma_base_url: &str) -> Result<Self> {
        let private_key = std::env::var("PRIVATE_KEY").context("PRIVATE_KEY required for live CLOB")?;
        let api_key = std::env::var("API_KEY").context("API_KEY required")?;
        let secret = std::env::var("SECRET")
            .or_else(|_| std::env::var("API_SECRET"))
            .context("SECRET or API_SECRET required")?;
        let passphrase = std::env::var("PASSPHRASE")
            .or_else(|_| std::env::var("API_PASSPHRASE"))
            .context("PASSPHRASE required")?;
        let chain_id: u64 = std::env::var("POLYMARKET_CHAIN_ID")
            .unwrap_or_else(|_| "137".to_string())
            .parse()
            .context("Invalid POLYMARKET_CHAIN_ID")?;
        let signature_type: u8 = std::env::var("SIGNATURE_TYPE")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .context("Invalid SIGNATURE_TYPE")?;
        let funder = std::env::var("FUNDER").ok();

        let signer = OrderSigner::new(&private_key, chain_id, funder.as_deref(), signature_type)?;
        let creds = L2Credentials {
            address: format!("{:?}", signer.address()),
            api_key,
            secret,
            passphrase,
        };
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            clob_host: clob_host.trim_end_matches('/').to_string(),
            data_api_url: data_api_url.trim_end_matches('/').to_string(),
            gamma_base_url: gamma_base_url.trim_end_matches('/').to_string(),
            signer,
            creds,
            client,
        })
    }

    async fn authed(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<String>,
    ) -> ExchangeResult<reqwest::Response> {
        let timestamp = now_ms() / 1000;
        let headers = self
            .creds
            .headers(timestamp, method.as_str(), path, body.as_deref())
            .map_err(|e| ExchangeError::RejectedOrder(format!("auth headers: {e:#}")))?;
        let mut req = self
            .client
            .request(method, format!("{}{}", self.clob_host, path))
            .header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(k, v);
        }
        if let Some(b) = body {
            req = req.body(b);
        }
        Ok(req.send().await?)
    }
}

#[async_trait]
impl Exchange for ClobExchange {
    async fn place_order(
        &self,
        market: &ResolvedMarket,
        side: Side,
        price: Decimal,
        qty: Decimal,
        kind: OrderKind,
    ) -> ExchangeResult<OrderAck> {
        let salt = now_ms();
        let order = self
            .signer
            .sign_sell(market.token_id(side), qty, price, salt)
            .map_err(|e| ExchangeError::RejectedOrder(format!("sign: {e:#}")))?;
        let order_type = match kind {
            OrderKind::Resting => "GTC",
            OrderKind::ImmediateOrCancel => "FAK",
        };
        let body = serde_json::json!({
            "order": order,
            "owner": self.creds.api_key,
            "orderType": order_type,
        })
        .to_string();
        info!(side = side.as_str(), %price, %qty, order_type, "sending sell");

        let res = self.authed(reqwest::Method::POST, "/order", Some(body)).await?;
        let status = res.status();
        let text = res.text().await?;
        let parsed: Option<PostOrderResponse> = serde_json::from_str(&text).ok();
        let resp = match parsed {
            Some(r) if status.is_success() && r.success => r,
            Some(r) => {
                let msg = r.error_msg.unwrap_or_else(|| format!("HTTP {status}"));
                warn!(%status, error = %msg, "sell rejected");
                return Err(ExchangeError::from_venue_message(&msg));
            }
            None => {
                let msg = format!("HTTP {}: {}", status, text.chars().take(200).collect::<String>());
                return Err(ExchangeError::from_venue_message(&msg));
            }
        };

        let filled = parse_decimal(resp.making_amount.as_deref());
        let usdc = parse_decimal(resp.taking_amount.as_deref());
        let avg_price = (filled > Decimal::ZERO).then(|| usdc / filled);
        info!(
            order_id = ?resp.order_id,
            venue_status = ?resp.status,
            making = %filled,
            taking = %usdc,
            "sell order response"
        );
        Ok(OrderAck {
            order_id: resp.order_id.unwrap_or_default(),
            filled,
            avg_price,
        })
    }

    async fn order_status(&self, order_id: &str) -> ExchangeResult<OrderStatus> {
        let path = format!("/data/order/{}", order_id);
        let res = self.authed(reqwest::Method::GET, &path, None).await?;
        if !res.status().is_success() {
            let msg = format!("order status HTTP {}", res.status());
            return Err(ExchangeError::from_venue_message(&msg));
        }
        let o: OpenOrderResponse = res.json().await?;
        let filled = parse_decimal(o.size_matched.as_deref());
        let open = o
            .status
            .as_deref()
            .map_or(false, |s| s.eq_ignore_ascii_case("live"));
        debug!(order_id, %filled, open, "order status");
        Ok(OrderStatus {
            filled,
            avg_price: o.price.as_deref().and_then(|p| Decimal::from_str(p).ok()),
            open,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<()> {
        let body = serde_json::json!({ "orderID": order_id }).to_string();
        let res = self.authed(reqwest::Method::DELETE, "/order", Some(body)).await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ExchangeError::from_venue_message(&format!("cancel HTTP {status}: {text}")));
        }
        info!(order_id, "order cancelled");
        Ok(())
    }

    async fn positions(&self, market: &ResolvedMarket) -> ExchangeResult<PositionReport> {
        let url = format!(
            "{}/positions?user={:?}&market={}",
            self.data_api_url,
            self.signer.funder(),
            urlencoding::encode(&market.condition_id)
        );
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(ExchangeError::NetworkTransient(format!(
                "positions HTTP {}",
                res.status()
            )));
        }
        let rows: Vec<DataApiPosition> = res.json().await?;
        let mut report = PositionReport::default();
        for row in rows {
            let Some(asset) = row.asset.as_deref() else {
                continue;
            };
            let entry = SidePosition {
                size: row
                    .size
                    .and_then(Decimal::from_f64_retain)
                    .unwrap_or_default(),
                avg_price: row.avg_price.and_then(Decimal::from_f64_retain),
            };
            if asset == market.token_id_up {
                report.up = entry;
            } else if asset == market.token_id_down {
                report.down = entry;
            }
        }
        Ok(report)
    }

    async fn order_book(&self, market: &ResolvedMarket) -> ExchangeResult<OrderBookSnapshot> {
        fetch_book_snapshot(&self.client, &self.clob_host, market).await
    }

    async fn resolution(&self, market: &ResolvedMarket) -> ExchangeResult<Side> {
        crate::market::fetch_resolution(&self.client, &self.gamma_base_url, &market.slug).await
    }
}
