/*
 * RPC client for the configured EVM chain
 */

use crate::models::{AqyntError, Result};
use ethers::providers::{Http, Middleware, Provider};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct RpcClient {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
}

impl RpcClient {
    pub async fn new(rpc_url: &str, chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| AqyntError::RpcError(format!("Failed to create provider: {e}")))?
            .interval(Duration::from_millis(1_000));

        let chain = provider
            .get_chainid()
            .await
            .map_err(|e| AqyntError::RpcError(format!("Failed to get chain ID: {e}")))?;

        if chain.as_u64() != chain_id {
            return Err(AqyntError::RpcError(format!(
                "Chain ID mismatch: expected {}, got {}",
                chain_id,
                chain.as_u64()
            )));
        }

        info!("Connected to {} (chain {})", rpc_url, chain_id);

        Ok(Self {
            provider: Arc::new(provider),
            chain_id,
        })
    }

    #[must_use]
    pub fn provider(&self) -> Arc<Provider<Http>> {
        self.provider.clone()
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn chain_id_body(hex: &str) -> String {
        format!(r#"{{"jsonrpc":"2.0","id":1,"result":"{hex}"}}"#)
    }

    #[tokio::test]
    async fn accepts_matching_chain() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJsonString(r#"{"method":"eth_chainId"}"#.to_string()))
            .with_header("content-type", "application/json")
            .with_body(chain_id_body("0xc488"))
            .create_async()
            .await;

        let client = RpcClient::new(&server.url(), 50312).await.unwrap();
        assert_eq!(client.chain_id(), 50312);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejects_chain_mismatch() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_header("content-type", "application/json")
            .with_body(chain_id_body("0x1"))
            .create_async()
            .await;

        let err = RpcClient::new(&server.url(), 50312).await.err().unwrap();
        assert!(err.to_string().contains("Chain ID mismatch"));
    }
}
