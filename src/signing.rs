//! EIP-712 sell-order signing and HMAC L2 request auth for the Polymarket CLOB.

use anyhow::{Context, Result};
use base64::Engine;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{H160, H256, U256};
use ethers::utils::keccak256;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;

const PROTOCOL_NAME: &str = "Polymarket CTF Exchange";
const PROTOCOL_VERSION: &str = "1";

/// Polygon mainnet CTF Exchange (non-neg-risk).
pub const EXCHANGE_ADDRESS_POLYGON: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

const SIDE_SELL: u8 = 1;
/// Conditional tokens and USDC both use 6 decimals on-chain.
const AMOUNT_SCALE: u32 = 6;

fn word_u256(u: U256) -> [u8; 32] {
    let mut buf = [0u8; 32];
    u.to_big_endian(&mut buf);
    buf
}

fn word_address(addr: &H160) -> [u8; 32] {
    let mut buf = [0u8; 32];
    buf[12..32].copy_from_slice(addr.as_bytes());
    buf
}

fn domain_separator(verifying_contract: H160, chain_id: u64) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(32 * 5);
    encoded.extend_from_slice(&keccak256(
        "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
    ));
    encoded.extend_from_slice(&keccak256(PROTOCOL_NAME.as_bytes()));
    encoded.extend_from_slice(&keccak256(PROTOCOL_VERSION.as_bytes()));
    encoded.extend_from_slice(&word_u256(U256::from(chain_id)));
    encoded.extend_from_slice(&word_address(&verifying_contract));
    keccak256(encoded)
}

/// Fields of the exchange's `Order` struct, in type-hash order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFields {
    pub salt: U256,
    pub maker: H160,
    pub signer: H160,
    pub taker: H160,
    pub token_id: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub expiration: U256,
    pub nonce: U256,
    pub fee_rate_bps: U256,
    pub side: u8,
    pub signature_type: u8,
}

impl OrderFields {
    fn struct_hash(&self) -> [u8; 32] {
        let type_hash = keccak256(
            "Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)",
        );
        let mut encoded = Vec::with_capacity(32 * 13);
        encoded.extend_from_slice(&type_hash);
        for word in [
            word_u256(self.salt),
            word_address(&self.maker),
            word_address(&self.signer),
            word_address(&self.taker),
            word_u256(self.token_id),
            word_u256(self.maker_amount),
            word_u256(self.taker_amount),
            word_u256(self.expiration),
            word_u256(self.nonce),
            word_u256(self.fee_rate_bps),
            word_u256(U256::from(self.side)),
            word_u256(U256::from(self.signature_type)),
        ] {
            encoded.extend_from_slice(&word);
        }
        keccak256(encoded)
    }

    /// keccak256("\x19\x01" || domain separator || struct hash).
    pub fn digest(&self, verifying_contract: H160, chain_id: u64) -> [u8; 32] {
        let mut prefixed = Vec::with_capacity(2 + 32 + 32);
        prefixed.extend_from_slice(b"\x19\x01");
        prefixed.extend_from_slice(&domain_separator(verifying_contract, chain_id));
        prefixed.extend_from_slice(&self.struct_hash());
        keccak256(prefixed)
    }
}

/// Order body as POSTed to `/order`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: u64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: &'static str,
    pub signature_type: u8,
    pub signature: String,
}

/// Parse token_id string (hex 0x... or decimal) to U256.
pub fn parse_token_id(token_id: &str) -> Result<U256> {
    let t = token_id.trim();
    match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16).context("token_id hex parse"),
        None => U256::from_dec_str(t).context("token_id decimal parse"),
    }
}

/// Decimal amount in 6-decimal base units, truncated.
fn to_base_units(x: Decimal) -> Result<U256> {
    let scaled = (x * Decimal::from(10u64.pow(AMOUNT_SCALE))).trunc();
    U256::from_dec_str(&scaled.to_string()).context("amount to base units")
}

/// Sell amounts: maker gives `size` shares (2 decimals), taker pays `size * price` USDC (4 decimals).
pub fn sell_amounts(size: Decimal, price: Decimal) -> Result<(U256, U256)> {
    let size = size.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::ToZero);
    let usdc = (size * price).round_dp_with_strategy(4, rust_decimal::RoundingStrategy::ToZero);
    Ok((to_base_units(size)?, to_base_units(usdc)?))
}

/// Signs sell orders for one wallet / funder pair.
pub struct OrderSigner {
    wallet: LocalWallet,
    chain_id: u64,
    exchange: H160,
    /// Address holding the funds (proxy wallet or the signer itself).
    funder: H160,
    signature_type: u8,
}

impl OrderSigner {
    pub fn new(private_key: &str, chain_id: u64, funder: Option<&str>, signature_type: u8) -> Result<Self> {
        let wallet: LocalWallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .context("PRIVATE_KEY parse")?
            .with_chain_id(chain_id);
        let funder = match funder {
            Some(addr) => addr.trim().parse::<H160>().context("FUNDER address parse")?,
            None => wallet.address(),
        };
        let exchange = EXCHANGE_ADDRESS_POLYGON
            .parse::<H160>()
            .context("exchange address parse")?;
        Ok(Self {
            wallet,
            chain_id,
            exchange,
            funder,
            signature_type,
        })
    }

    pub fn address(&self) -> H160 {
        self.wallet.address()
    }

    pub fn funder(&self) -> H160 {
        self.funder
    }

    pub fn sign_sell(&self, token_id: &str, size: Decimal, price: Decimal, salt: u64) -> Result<SignedOrder> {
        let (maker_amount, taker_amount) = sell_amounts(size, price)?;
        let fields = OrderFields {
            salt: U256::from(salt),
            maker: self.funder,
            signer: self.wallet.address(),
            taker: H160::zero(),
            token_id: parse_token_id(token_id)?,
            maker_amount,
            taker_amount,
            expiration: U256::zero(),
            nonce: U256::zero(),
            fee_rate_bps: U256::zero(),
            side: SIDE_SELL,
            signature_type: self.signature_type,
        };
        let digest = fields.digest(self.exchange, self.chain_id);
        let sig = self
            .wallet
            .sign_hash(H256::from(digest))
            .context("sign order digest")?;
        Ok(SignedOrder {
            salt,
            maker: format!("{:?}", fields.maker),
            signer: format!("{:?}", fields.signer),
            taker: format!("{:?}", fields.taker),
            token_id: token_id.trim().to_string(),
            maker_amount: maker_amount.to_string(),
            taker_amount: taker_amount.to_string(),
            expiration: "0".into(),
            nonce: "0".into(),
            fee_rate_bps: "0".into(),
            side: "SELL",
            signature_type: self.signature_type,
            signature: format!("0x{}", hex::encode(sig.to_vec())),
        })
    }
}

/// L2 API credentials.
#[derive(Clone)]
pub struct L2Credentials {
    pub address: String,
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl L2Credentials {
    /// POLY_* headers for one request.
    pub fn headers(
        &self,
        timestamp: u64,
        method: &str,
        request_path: &str,
        body: Option<&str>,
    ) -> Result<Vec<(&'static str, String)>> {
        let signature = build_poly_hmac(&self.secret, timestamp, method, request_path, body)?;
        Ok(vec![
            ("POLY_ADDRESS", self.address.clone()),
            ("POLY_SIGNATURE", signature),
            ("POLY_TIMESTAMP", timestamp.to_string()),
            ("POLY_API_KEY", self.api_key.clone()),
            ("POLY_PASSPHRASE", self.passphrase.clone()),
        ])
    }
}

/// POLY_SIGNATURE: HMAC-SHA256(secret, timestamp + method + path + body), base64url.
pub fn build_poly_hmac(
    secret_b64: &str,
    timestamp: u64,
    method: &str,
    request_path: &str,
    body: Option<&str>,
) -> Result<String> {
    let message = format!("{}{}{}{}", timestamp, method, request_path, body.unwrap_or(""));
    let secret_bytes = base64::engine::general_purpose::STANDARD
        .decode(secret_b64.trim().replace('-', "+").replace('_', "/").as_bytes())
        .context("SECRET base64 decode")?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&secret_bytes).context("HMAC key")?;
    mac.update(message.as_bytes());
    let sig_b64 = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    Ok(sig_b64.replace('+', "-").replace('/', "_"))
}
