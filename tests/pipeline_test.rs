use basketbot::api::{BinanceClient, ExchangeClient};
use basketbot::config::BotConfig;
use basketbot::execution::{Quantizer, Trader};
use basketbot::risk::{RiskPolicy, TradingWindow};
use basketbot::strategy::{OracleSettings, TrendOracle};
use basketbot::{shutdown, Pipeline, Sample};
use mockito::{Matcher, Mock, Server, ServerGuard};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const BASKET: [&str; 3] = ["BTCUSDT", "ETHUSDT", "BNBUSDT"];

fn exchange_info(symbol: &str, min_qty: &str) -> String {
    format!(
        r#"{{"symbols": [{{
            "symbol": "{symbol}",
            "filters": [
                {{"filterType": "PRICE_FILTER", "minPrice": "0.01000000", "maxPrice": "1000000.00000000", "tickSize": "0.01000000"}},
                {{"filterType": "LOT_SIZE", "minQty": "{min_qty}", "maxQty": "9000.00000000", "stepSize": "{min_qty}"}}
            ]
        }}]}}"#
    )
}

async fn mock_filters(server: &mut ServerGuard) -> Vec<Mock> {
    let mut mocks = Vec::new();
    for (symbol, min_qty) in BASKET.iter().zip(["0.00001000", "0.00010000", "0.00100000"]) {
        mocks.push(
            server
                .mock("GET", "/api/v3/exchangeInfo")
                .match_query(Matcher::UrlEncoded("symbol".into(), symbol.to_string()))
                .with_status(200)
                .with_body(exchange_info(symbol, min_qty))
                .create_async()
                .await,
        );
    }
    mocks
}

fn basket() -> Vec<String> {
    BASKET.iter().map(|s| s.to_string()).collect()
}

async fn wait_matched(mock: &Mock) {
    let matched = async {
        while !mock.matched_async().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), matched)
        .await
        .expect("exchange call never happened");
}

#[tokio::test]
async fn test_broad_fall_liquidates_basket() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut server = Server::new_async().await;
    let _filters = mock_filters(&mut server).await;

    let cancel = server
        .mock("DELETE", "/api/v3/openOrders")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("[]")
        .expect(3)
        .create_async()
        .await;
    let account = server
        .mock("GET", "/api/v3/account")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"balances": [
                {"asset": "BTC", "free": "0.01234567", "locked": "0.00000000"},
                {"asset": "ETH", "free": "0.00000000", "locked": "0.00000000"},
                {"asset": "BNB", "free": "1.20000000", "locked": "0.30000000"},
                {"asset": "USDT", "free": "15.00000000", "locked": "0.00000000"}
            ]}"#,
        )
        .create_async()
        .await;
    let sell_btc = server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
            Matcher::UrlEncoded("side".into(), "SELL".into()),
            Matcher::UrlEncoded("quantity".into(), "0.01234".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"orderId": 101, "status": "FILLED"}"#)
        .create_async()
        .await;
    let sell_bnb = server
        .mock("POST", "/api/v3/order")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".into(), "BNBUSDT".into()),
            Matcher::UrlEncoded("side".into(), "SELL".into()),
            Matcher::UrlEncoded("quantity".into(), "1.500".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"orderId": 102, "status": "FILLED"}"#)
        .create_async()
        .await;

    println!("1. Loading filters from the mock exchange...");
    let client: Arc<dyn ExchangeClient> =
        Arc::new(BinanceClient::new(server.url(), "key", "secret", 100).unwrap());
    let mut filters = Vec::new();
    for symbol in BASKET {
        filters.push(client.symbol_filters(symbol).await.unwrap());
    }
    let quantizer = Arc::new(Quantizer::from_filters(&filters).unwrap());
    assert_eq!(quantizer.len(), 3);

    println!("2. Wiring oracle and trader...");
    let oracle = TrendOracle::new(
        basket(),
        OracleSettings {
            window_len: 3,
            slide: true,
            buy_threshold: 0.6,
            sell_threshold: 0.6,
        },
    );
    let trader = Trader::new(
        client.clone(),
        quantizer,
        RiskPolicy {
            stop_loss: 0.05,
            stop_profit: 0.1,
            position: 0.5,
            usdt_per_buy: 20.0,
            max_usdt_per_buy: 50.0,
            one_by_one: false,
            dry_run: false,
            window: TradingWindow::new(0, 2 * 86400),
            quote_asset: "USDT".to_string(),
        },
    );

    let (price_tx, price_rx) = mpsc::channel(20);
    let (order_tx, order_rx) = mpsc::channel(40);
    let (stop_tx, stop_rx) = shutdown::channel();
    let oracle_task = tokio::spawn(oracle.run(price_rx, order_tx, stop_rx.clone()));
    let trader_task = tokio::spawn(trader.run(order_rx, stop_rx));

    println!("3. Feeding three falling ticks...");
    for tick in 1..=3u64 {
        for (i, symbol) in BASKET.iter().enumerate() {
            let price = (i as f64 + 1.0) * 100.0 - tick as f64;
            price_tx.send(Sample::new(tick, *symbol, price)).await.unwrap();
        }
    }

    println!("4. Waiting for the liquidation...");
    wait_matched(&sell_btc).await;
    wait_matched(&sell_bnb).await;
    cancel.assert_async().await;
    account.assert_async().await;

    stop_tx.send(true).unwrap();
    oracle_task.await.unwrap();
    trader_task.await.unwrap();

    println!("=== Liquidation flow passed ===");
}

#[tokio::test]
async fn test_pipeline_builds_against_rest_client() {
    let mut server = Server::new_async().await;
    let filters = mock_filters(&mut server).await;

    let config = BotConfig::from_toml_str(&format!(
        r#"
[exchange]
api_url = "{}"
api_key = "key"
secret_key = "secret"

[policy]
name = "e2e"
dryrun = true
symbols = ["BTCUSDT", "ETHUSDT", "BNBUSDT"]

[policy.sample]
interval_secs = 60
window_secs = 300

[policy.trigger]
buy_threshold = 0.6
sell_threshold = 0.6

[policy.trade]
stop_loss = 0.05
stop_profit = 0.1
position = 0.5
usdt_per_buy = 20.0
max_usdt_per_buy = 50.0
"#,
        server.url()
    ))
    .unwrap();
    assert_eq!(config.base_url(), server.url());
    assert_eq!(config.window_len(), 5);

    let client = BinanceClient::new(config.base_url(), "key", "secret", 100).unwrap();
    let pipeline = Pipeline::build(config, Arc::new(client)).await.unwrap();

    let bnb = pipeline.quantizer().extra("BNBUSDT").unwrap();
    assert_eq!(bnb.qty_precision, 3);
    assert_eq!(bnb.price_precision, 2);
    for mock in &filters {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn test_pipeline_build_fails_on_unknown_symbol() {
    let mut server = Server::new_async().await;
    let _filters = mock_filters(&mut server).await;
    let _unknown = server
        .mock("GET", "/api/v3/exchangeInfo")
        .match_query(Matcher::UrlEncoded("symbol".into(), "XRPUSDT".into()))
        .with_status(400)
        .with_body(r#"{"code": -1121, "msg": "Invalid symbol."}"#)
        .create_async()
        .await;

    let mut config = BotConfig::from_toml_str(
        r#"
[exchange]
api_key = "key"
secret_key = "secret"

[policy]
symbols = ["BTCUSDT", "XRPUSDT"]

[policy.sample]
interval_secs = 60
window_secs = 300

[policy.trigger]
buy_threshold = 0.6
sell_threshold = 0.6

[policy.trade]
stop_loss = 0.05
stop_profit = 0.1
position = 0.5
usdt_per_buy = 20.0
max_usdt_per_buy = 50.0
"#,
    )
    .unwrap();
    config.exchange.api_url = Some(server.url());

    let client = BinanceClient::new(config.base_url(), "key", "secret", 100).unwrap();
    let err = Pipeline::build(config, Arc::new(client)).await.err().unwrap();
    assert!(format!("{:#}", err).contains("Invalid symbol."));
}
