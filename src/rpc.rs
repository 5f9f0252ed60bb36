use std::str::FromStr;
use std::time::Duration;

use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::orchestrator::{ContractCall, ContractCaller};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// [`ContractCaller`] over JSON-RPC. Each call builds its own provider, signing with the key
/// carried by the call.
#[derive(Debug, Clone)]
pub struct RpcCaller {
    rpc_url: Url,
    timeout: Duration,
}

impl RpcCaller {
    pub fn new(rpc_url: Url) -> Self {
        Self {
            rpc_url,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }
}

#[async_trait]
impl ContractCaller for RpcCaller {
    async fn transact(&self, call: &ContractCall) -> Result<TxHash> {
        let signer = PrivateKeySigner::from_str(call.signing_key.trim())
            .context("invalid signing key")?;
        let from = signer.address();
        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect_http(self.rpc_url.clone());

        let tx_request = TransactionRequest::default()
            .with_from(from)
            .with_to(call.to)
            .with_input(call.calldata.clone());
        debug!(to = %call.to, method = %call.method, "sending transaction");

        let receipt = tokio::time::timeout(self.timeout, async {
            provider
                .send_transaction(tx_request)
                .await?
                .get_receipt()
                .await
                .map_err(anyhow::Error::from)
        })
        .await
        .map_err(|_| anyhow!("{} timed out after {:?}", call.method, self.timeout))??;

        if !receipt.status() {
            bail!("transaction {} reverted", receipt.transaction_hash);
        }
        Ok(receipt.transaction_hash)
    }

    async fn read(&self, to: Address, calldata: Bytes) -> Result<Bytes> {
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());
        let tx_request = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata);
        let result = tokio::time::timeout(self.timeout, async { provider.call(tx_request).await })
            .await
            .map_err(|_| anyhow!("eth_call to {to} timed out after {:?}", self.timeout))?
            .with_context(|| format!("eth_call to {to} failed"))?;
        Ok(result)
    }
}
