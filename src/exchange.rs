//! Trading client collaborator boundary
//!
//! The engine only sees the `TradingClient` trait: place, cancel, poll
//! fills. `PaperTradingClient` simulates fills against the tick's intrabar
//! range; `RestClient` is a thin signed HTTP wrapper for live mode. Client
//! failures surface as `TransientExchange` and are retried by the order
//! manager, never treated as fatal.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::oms::types::{Fill, Order};
use crate::snapshot::MarketSnapshot;
use crate::types::{Money, Side, Symbol};

type HmacSha256 = Hmac<Sha256>;

/// Exchange operations the core depends on
pub trait TradingClient: Send {
    /// Submit a limit order; returns the exchange-assigned identifier
    fn place_order(&mut self, order: &Order) -> EngineResult<String>;

    /// Cancel a resting order
    fn cancel_order(&mut self, order: &Order) -> EngineResult<()>;

    /// Drain fills observed since the last poll for the given live orders
    fn poll_fills(
        &mut self,
        open_orders: &[&Order],
        snapshot: &MarketSnapshot,
    ) -> EngineResult<Vec<Fill>>;

    /// Market-equivalent close of a net position; the liquidation path only.
    /// Returns the resulting fill.
    fn close_position(
        &mut self,
        symbol: &Symbol,
        side: Side,
        quantity: Money,
        snapshot: &MarketSnapshot,
    ) -> EngineResult<Fill>;
}

// ============================================================================
// Paper / simulated client
// ============================================================================

/// Fill simulator used by paper mode and the backtest driver.
///
/// An order fills when the snapshot's intrabar range crosses its price; the
/// fill price carries the configured slippage against the order and the fee
/// is charged on fill notional.
pub struct PaperTradingClient {
    fee_rate: f64,
    slippage: f64,
    next_ack: u64,
}

impl PaperTradingClient {
    pub fn new(fee_rate: f64, slippage: f64) -> Self {
        Self {
            fee_rate,
            slippage,
            next_ack: 1,
        }
    }
}

impl TradingClient for PaperTradingClient {
    fn place_order(&mut self, order: &Order) -> EngineResult<String> {
        let ack = format!("paper-{}", self.next_ack);
        self.next_ack += 1;
        debug!(
            id = order.id,
            side = order.side.as_str(),
            price = %order.price,
            size = %order.size,
            "[paper] order placed"
        );
        Ok(ack)
    }

    fn cancel_order(&mut self, order: &Order) -> EngineResult<()> {
        debug!(id = order.id, "[paper] order cancelled");
        Ok(())
    }

    fn poll_fills(
        &mut self,
        open_orders: &[&Order],
        snapshot: &MarketSnapshot,
    ) -> EngineResult<Vec<Fill>> {
        let mut fills = Vec::new();

        for order in open_orders {
            let crossed = match order.side {
                Side::Buy => snapshot.low <= order.price.to_f64(),
                Side::Sell => snapshot.high >= order.price.to_f64(),
            };
            if !crossed {
                continue;
            }

            let slip = match order.side {
                Side::Buy => 1.0 + self.slippage,
                Side::Sell => 1.0 - self.slippage,
            };
            let fill_price = (order.price * Money::from_f64(slip)).round_dp(2);
            let fee = (fill_price * order.remaining * Money::from_f64(self.fee_rate)).round_dp(8);

            fills.push(Fill {
                order_id: order.id,
                side: order.side,
                price: fill_price,
                quantity: order.remaining,
                fee,
                ts: snapshot.ts,
            });
        }

        Ok(fills)
    }

    fn close_position(
        &mut self,
        _symbol: &Symbol,
        side: Side,
        quantity: Money,
        snapshot: &MarketSnapshot,
    ) -> EngineResult<Fill> {
        let slip = match side {
            Side::Buy => 1.0 + self.slippage,
            Side::Sell => 1.0 - self.slippage,
        };
        let fill_price = (Money::from_f64(snapshot.price) * Money::from_f64(slip)).round_dp(2);
        let fee = (fill_price * quantity * Money::from_f64(self.fee_rate)).round_dp(8);

        debug!(side = side.as_str(), qty = %quantity, price = %fill_price, "[paper] position closed");

        Ok(Fill {
            order_id: 0,
            side,
            price: fill_price,
            quantity,
            fee,
            ts: snapshot.ts,
        })
    }
}

// ============================================================================
// Live REST client
// ============================================================================

const API_BASE_URL: &str = "https://api.gridai.exchange";

/// Thin signed HTTP wrapper over the exchange order API
pub struct RestClient {
    api_key: String,
    api_secret: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Serialize)]
struct PlaceOrderRequest<'a> {
    market: &'a str,
    side: &'a str,
    order_type: &'a str,
    price_per_unit: f64,
    total_quantity: f64,
    client_order_id: u64,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct PlaceOrderResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct CancelOrderRequest<'a> {
    id: &'a str,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    status: String,
    #[serde(default)]
    avg_fill_price: f64,
    #[serde(default)]
    filled_quantity: f64,
    #[serde(default)]
    fee_amount: f64,
}

impl RestClient {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts keys of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> EngineResult<R> {
        let url = format!("{API_BASE_URL}{path}");
        let payload = serde_json::to_string(body)
            .map_err(|e| EngineError::TransientExchange(e.to_string()))?;
        let signature = self.sign(&payload);

        let response = self
            .client
            .post(&url)
            .header("X-AUTH-APIKEY", &self.api_key)
            .header("X-AUTH-SIGNATURE", signature)
            .json(body)
            .send()?;

        if !response.status().is_success() {
            return Err(EngineError::TransientExchange(format!(
                "{path} returned {}",
                response.status()
            )));
        }
        Ok(response.json()?)
    }
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

impl RestClient {
    /// Fetch recent candles from the public market-data endpoint; feeds the
    /// live/paper tick loop
    pub fn fetch_recent_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
    ) -> EngineResult<Vec<crate::types::Candle>> {
        let url = format!(
            "{API_BASE_URL}/market_data/candles?pair={}&interval={}&limit={}",
            symbol.as_str(),
            timeframe,
            limit
        );
        let response = self.client.get(&url).send()?;
        if !response.status().is_success() {
            return Err(EngineError::TransientExchange(format!(
                "candles returned {}",
                response.status()
            )));
        }
        let rows: Vec<CandleResponse> = response.json()?;

        let mut candles: Vec<crate::types::Candle> = rows
            .into_iter()
            .filter_map(|r| {
                let ts = chrono::DateTime::from_timestamp_millis(r.time)?;
                crate::types::Candle::new(ts, r.open, r.high, r.low, r.close, r.volume).ok()
            })
            .collect();
        candles.sort_by_key(|c| c.ts);
        Ok(candles)
    }
}

impl TradingClient for RestClient {
    fn place_order(&mut self, order: &Order) -> EngineResult<String> {
        let request = PlaceOrderRequest {
            market: order.symbol.as_str(),
            side: order.side.as_str(),
            order_type: "limit_order",
            price_per_unit: order.price.to_f64(),
            total_quantity: order.size.to_f64(),
            client_order_id: order.id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let response: PlaceOrderResponse = self.post("/v1/orders/create", &request)?;
        Ok(response.id)
    }

    fn cancel_order(&mut self, order: &Order) -> EngineResult<()> {
        let Some(exchange_id) = order.exchange_id.as_deref() else {
            // Never acknowledged; nothing to cancel upstream
            return Ok(());
        };
        let request = CancelOrderRequest {
            id: exchange_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let _: serde_json::Value = self.post("/v1/orders/cancel", &request)?;
        Ok(())
    }

    fn poll_fills(
        &mut self,
        open_orders: &[&Order],
        snapshot: &MarketSnapshot,
    ) -> EngineResult<Vec<Fill>> {
        let mut fills = Vec::new();

        for order in open_orders {
            let Some(exchange_id) = order.exchange_id.as_deref() else {
                continue;
            };
            let request = CancelOrderRequest {
                id: exchange_id,
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            let status: OrderStatusResponse = self.post("/v1/orders/status", &request)?;

            if status.status == "filled" && status.filled_quantity > 0.0 {
                fills.push(Fill {
                    order_id: order.id,
                    side: order.side,
                    price: Money::from_f64(status.avg_fill_price),
                    quantity: Money::from_f64(status.filled_quantity),
                    fee: Money::from_f64(status.fee_amount),
                    ts: snapshot.ts,
                });
            }
        }

        Ok(fills)
    }

    fn close_position(
        &mut self,
        symbol: &Symbol,
        side: Side,
        quantity: Money,
        snapshot: &MarketSnapshot,
    ) -> EngineResult<Fill> {
        #[derive(Serialize)]
        struct MarketOrderRequest<'a> {
            market: &'a str,
            side: &'a str,
            order_type: &'a str,
            total_quantity: f64,
            timestamp: i64,
        }

        let request = MarketOrderRequest {
            market: symbol.as_str(),
            side: side.as_str(),
            order_type: "market_order",
            total_quantity: quantity.to_f64(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let response: OrderStatusResponse = self.post("/v1/orders/create", &request)?;

        Ok(Fill {
            order_id: 0,
            side,
            price: Money::from_f64(response.avg_fill_price),
            quantity: Money::from_f64(response.filled_quantity),
            fee: Money::from_f64(response.fee_amount),
            ts: snapshot.ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oms::types::OrderKind;
    use crate::types::Symbol;
    use chrono::Utc;

    fn open_order(side: Side, price: f64) -> Order {
        let mut o = Order::new(
            Symbol::new("BTCUSDT"),
            side,
            Money::from_f64(price),
            Money::from_f64(0.001),
            if side == Side::Buy { -1 } else { 1 },
            OrderKind::GridLevel,
            Utc::now(),
        );
        o.acknowledge("paper-0".into(), Utc::now());
        o
    }

    fn snapshot(low: f64, high: f64) -> MarketSnapshot {
        MarketSnapshot {
            ts: Utc::now(),
            price: (low + high) / 2.0,
            low,
            high,
        }
    }

    #[test]
    fn test_buy_fills_when_low_crosses() {
        let mut client = PaperTradingClient::new(0.001, 0.0);
        let order = open_order(Side::Buy, 49_750.0);

        let fills = client
            .poll_fills(&[&order], &snapshot(49_700.0, 50_100.0))
            .unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity, order.size);
        assert_eq!(fills[0].price.to_f64(), 49_750.0);
    }

    #[test]
    fn test_buy_rests_above_range() {
        let mut client = PaperTradingClient::new(0.001, 0.0);
        let order = open_order(Side::Buy, 49_000.0);

        let fills = client
            .poll_fills(&[&order], &snapshot(49_700.0, 50_100.0))
            .unwrap();
        assert!(fills.is_empty());
    }

    #[test]
    fn test_sell_fill_carries_slippage_and_fee() {
        let mut client = PaperTradingClient::new(0.001, 0.001);
        let order = open_order(Side::Sell, 50_000.0);

        let fills = client
            .poll_fills(&[&order], &snapshot(49_900.0, 50_200.0))
            .unwrap();
        assert_eq!(fills.len(), 1);
        // Sell slips downward
        assert_eq!(fills[0].price.to_f64(), 49_950.0);
        let expected_fee = 49_950.0 * 0.001 * 0.001;
        assert!((fills[0].fee.to_f64() - expected_fee).abs() < 1e-9);
    }

    #[test]
    fn test_signature_is_deterministic_hex() {
        let client = RestClient::new("key".into(), "secret".into());
        let a = client.sign("{\"x\":1}");
        let b = client.sign("{\"x\":1}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
