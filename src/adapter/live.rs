//! Live broker adapter: a thin REST client in front of the actual trading
//! terminal's bridge process. Connection loss is only ever set explicitly
//! from a transport-level failure, never inferred from a single non-200.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::adapter::{AccountInfo, BrokerAdapter};
use crate::error::{EngineError, EngineResult};
use crate::models::{Candle, ExecutionIntent, ExecutionResult, Timeframe, Tick};

pub struct LiveBrokerAdapter {
    client: Client,
    base_url: String,
    connected: AtomicBool,
}

impl LiveBrokerAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Fatal(format!("http client build failed: {e}")))?;
        Ok(Self { client, base_url: base_url.into(), connected: AtomicBool::new(true) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> EngineResult<Option<T>> {
        let response = match self.client.get(self.url(path)).send().await {
            Ok(r) => r,
            Err(e) => {
                self.mark_disconnected();
                return Err(transport_error(e));
            }
        };
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(EngineError::invariant(format!("{path} returned {}", response.status())));
        }
        self.connected.store(true, Ordering::SeqCst);
        response.json().await.map(Some).map_err(transport_error)
    }

    async fn get_required<T: DeserializeOwned>(&self, path: &str) -> EngineResult<T> {
        self.get_optional(path).await?.ok_or_else(|| EngineError::invariant(format!("{path} returned no body")))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> EngineResult<T> {
        let response = match self.client.post(self.url(path)).json(body).send().await {
            Ok(r) => r,
            Err(e) => {
                self.mark_disconnected();
                return Err(transport_error(e));
            }
        };
        if !response.status().is_success() {
            return Err(EngineError::invariant(format!("{path} returned {}", response.status())));
        }
        self.connected.store(true, Ordering::SeqCst);
        response.json().await.map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> EngineError {
    EngineError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string()))
}

#[async_trait]
impl BrokerAdapter for LiveBrokerAdapter {
    async fn tick(&self, symbol: &str) -> EngineResult<Option<Tick>> {
        self.get_optional(&format!("ticks/{symbol}")).await
    }

    async fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> EngineResult<Vec<Candle>> {
        self.get_required(&format!("candles/{symbol}/{timeframe:?}?count={count}")).await
    }

    async fn account(&self) -> EngineResult<AccountInfo> {
        self.get_required("account").await
    }

    async fn send_order(&self, intent: &ExecutionIntent) -> EngineResult<ExecutionResult> {
        self.post_json("orders", intent).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> LiveBrokerAdapter {
        LiveBrokerAdapter::new("http://127.0.0.1:1".to_string(), Duration::from_millis(50)).unwrap()
    }

    #[test]
    fn url_joins_base_and_path_regardless_of_slashes() {
        let adapter = LiveBrokerAdapter::new("http://broker.local/".to_string(), Duration::from_secs(1)).unwrap();
        assert_eq!(adapter.url("/ticks/EURUSD"), "http://broker.local/ticks/EURUSD");
    }

    #[test]
    fn starts_connected() {
        assert!(adapter().is_connected());
    }

    #[tokio::test]
    async fn transport_failure_marks_disconnected() {
        let adapter = adapter();
        let _ = adapter.tick("EURUSD").await;
        assert!(!adapter.is_connected());
    }
}
