use super::{
    AssetBalance, BracketOrder, ExchangeClient, ExchangeError, MarketOrder, OrderAck, PriceMode,
    SymbolFilters,
};
use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

pub const BINANCE_API_BASE: &str = "https://api.binance.com";
pub const BINANCE_TESTNET_API_BASE: &str = "https://testnet.binance.vision";

const RECV_WINDOW_MS: u64 = 5000;
const REQUEST_TIMEOUT_SECS: u64 = 10;
// "Unknown order sent." - returned when there is nothing to cancel
const NO_OPEN_ORDERS_CODE: i64 = -2011;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance spot REST client
///
/// Cloneable so every loop can hold its own handle. All clones share the
/// same rate limiter. Calls are never retried.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    rate_limiter: Arc<BinanceRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum RawFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price {
        min_price: String,
        max_price: String,
        tick_size: String,
    },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        min_qty: String,
        max_qty: String,
        step_size: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<AssetBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OcoResponse {
    order_list_id: i64,
    list_order_status: String,
}

// ============== Implementation ==============

impl BinanceClient {
    /// Create a client for `base_url` allowing at most `requests_per_second`
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        requests_per_second: u32,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            rate_limiter,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// HMAC-SHA256 of the payload, hex encoded
    fn sign(&self, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(
        &self,
        params: &[(&str, String)],
        timestamp_ms: i64,
    ) -> Result<String, ExchangeError> {
        let mut query = params
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            RECV_WINDOW_MS, timestamp_ms
        ));

        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;
        Self::decode(response).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let query = self.signed_query(params, Utc::now().timestamp_millis())?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let (code, msg) = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => (err.code, err.msg),
                Err(_) => (0, body),
            };
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                code,
                msg,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    /// Endpoint: GET /api/v3/exchangeInfo?symbol={symbol}
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters, ExchangeError> {
        let info: ExchangeInfoResponse = self
            .public_get("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;

        let entry = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;

        let mut lot = None;
        let mut price = None;
        for filter in entry.filters {
            match filter {
                RawFilter::LotSize {
                    min_qty,
                    max_qty,
                    step_size,
                } => lot = Some((min_qty, max_qty, step_size)),
                RawFilter::Price {
                    min_price,
                    max_price,
                    tick_size,
                } => price = Some((min_price, max_price, tick_size)),
                RawFilter::Other => {}
            }
        }

        let (min_qty, max_qty, step_size) = lot.ok_or_else(|| ExchangeError::MissingFilter {
            symbol: symbol.to_string(),
            filter: "LOT_SIZE",
        })?;
        let (min_price, max_price, tick_size) =
            price.ok_or_else(|| ExchangeError::MissingFilter {
                symbol: symbol.to_string(),
                filter: "PRICE_FILTER",
            })?;

        tracing::debug!(
            symbol,
            %min_qty,
            %step_size,
            %min_price,
            %tick_size,
            "Loaded symbol filters"
        );

        Ok(SymbolFilters {
            symbol: symbol.to_string(),
            min_qty,
            max_qty,
            step_size,
            min_price,
            max_price,
            tick_size,
        })
    }

    /// Endpoint: GET /api/v3/avgPrice or GET /api/v3/ticker/price
    async fn price(&self, symbol: &str, mode: PriceMode) -> Result<f64, ExchangeError> {
        let path = match mode {
            PriceMode::Average => "/api/v3/avgPrice",
            PriceMode::Realtime => "/api/v3/ticker/price",
        };

        let response: PriceResponse = self
            .public_get(path, &[("symbol", symbol.to_string())])
            .await?;

        response
            .price
            .parse::<f64>()
            .map_err(|_| ExchangeError::InvalidPrice {
                symbol: symbol.to_string(),
                value: response.price,
            })
    }

    /// Endpoint: GET /api/v3/account (signed)
    async fn account_snapshot(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        let account: AccountResponse = self
            .signed_request(Method::GET, "/api/v3/account", &[])
            .await?;
        Ok(account.balances)
    }

    /// Endpoint: POST /api/v3/order (signed), MARKET BUY by quote amount
    async fn market_buy(
        &self,
        symbol: &str,
        quote_amount: &str,
    ) -> Result<MarketOrder, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", "BUY".to_string()),
            ("type", "MARKET".to_string()),
            ("quoteOrderQty", quote_amount.to_string()),
            ("newOrderRespType", "FULL".to_string()),
        ];
        self.signed_request(Method::POST, "/api/v3/order", &params)
            .await
    }

    /// Endpoint: POST /api/v3/order (signed), MARKET SELL by base quantity
    async fn market_sell(&self, symbol: &str, quantity: &str) -> Result<OrderAck, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", "SELL".to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
        ];
        let response: OrderResponse = self
            .signed_request(Method::POST, "/api/v3/order", &params)
            .await?;

        Ok(OrderAck {
            order_id: response.order_id,
            status: response.status,
        })
    }

    /// Endpoint: POST /api/v3/order/oco (signed)
    async fn bracket_sell(&self, order: &BracketOrder) -> Result<OrderAck, ExchangeError> {
        let params = [
            ("symbol", order.symbol.clone()),
            ("side", "SELL".to_string()),
            ("quantity", order.quantity.clone()),
            ("price", order.limit_price.clone()),
            ("stopPrice", order.stop_price.clone()),
            ("stopLimitPrice", order.stop_limit_price.clone()),
            ("stopLimitTimeInForce", "GTC".to_string()),
        ];
        let response: OcoResponse = self
            .signed_request(Method::POST, "/api/v3/order/oco", &params)
            .await?;

        Ok(OrderAck {
            order_id: response.order_list_id,
            status: response.list_order_status,
        })
    }

    /// Endpoint: DELETE /api/v3/openOrders (signed)
    async fn cancel_open_orders(&self, symbol: &str) -> Result<(), ExchangeError> {
        let result: Result<Vec<serde_json::Value>, _> = self
            .signed_request(
                Method::DELETE,
                "/api/v3/openOrders",
                &[("symbol", symbol.to_string())],
            )
            .await;

        match result {
            Ok(cancelled) => {
                tracing::debug!(symbol, count = cancelled.len(), "Cancelled open orders");
                Ok(())
            }
            Err(ExchangeError::Api { code, .. }) if code == NO_OPEN_ORDERS_CODE => {
                tracing::debug!(symbol, "No open orders to cancel");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
