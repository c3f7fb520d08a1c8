//! Ledger store speaking JSON-RPC 2.0 to a signing gateway.
//!
//! The gateway owns the account keys and transaction encoding; this client
//! only names the contract method and its arguments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use super::transport::{check_status, from_reqwest};
use super::{CommitOutcome, LedgerStore, StoreError};
use crate::config::{CollectionKind, LedgerMethods, LedgerStoreConfig};
use crate::error::SyncError;
use crate::record::{Record, decode_records};

const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";

pub struct GatewayLedgerStore {
    client: Client,
    gateway_url: String,
    contract_id: String,
    gas: String,
    deposit: String,
    poll_attempts: u32,
    poll_interval: Duration,
    methods: BTreeMap<CollectionKind, LedgerMethods>,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcError {
    /// Transaction hash of a commit that timed out while waiting for finality.
    fn timed_out_tx(&self) -> Option<Option<String>> {
        let name = self
            .data
            .as_ref()
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !name.contains(TIMEOUT_ERROR) && !self.message.contains(TIMEOUT_ERROR) {
            return None;
        }
        let hash = self
            .data
            .as_ref()
            .and_then(|d| d.get("transaction_hash"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        Some(hash)
    }

    fn into_store_error(self) -> StoreError {
        match self.timed_out_tx() {
            Some(_) => StoreError::Timeout(self.message),
            None => StoreError::Rejected(format!("gateway error {}: {}", self.code, self.message)),
        }
    }
}

/// Where a submitted transaction currently stands.
#[derive(Debug, PartialEq, Eq)]
enum TxStatus {
    Final(CommitOutcome),
    Pending,
}

impl GatewayLedgerStore {
    pub fn new(config: &LedgerStoreConfig) -> Result<Self, SyncError> {
        let gateway_url = config
            .gateway_url
            .clone()
            .ok_or_else(|| SyncError::config("LEDGER_GATEWAY_URL is not set"))?;
        let contract_id = config
            .contract_id
            .clone()
            .ok_or_else(|| SyncError::config("LEDGER_CONTRACT_ID is not set"))?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::config(format!("build ledger http client: {e}")))?;
        Ok(Self {
            client,
            gateway_url,
            contract_id,
            gas: config.gas.clone(),
            deposit: config.deposit.clone(),
            poll_attempts: config.poll_attempts,
            poll_interval: config.poll_interval,
            methods: config.methods.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    fn methods(&self, collection: CollectionKind) -> Result<&LedgerMethods, StoreError> {
        self.methods
            .get(&collection)
            .ok_or(StoreError::Unmapped(collection))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<RpcResponse, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .client
            .post(&self.gateway_url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let response = check_status(response).await?;
        response.json().await.map_err(from_reqwest)
    }

    async fn rpc_result(&self, method: &str, params: Value) -> Result<Value, StoreError> {
        let response = self.rpc(method, params).await?;
        if let Some(error) = response.error {
            return Err(error.into_store_error());
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Poll `tx_status` until the transaction is final or attempts run out.
    async fn await_final(&self, tx_hash: &str) -> Result<CommitOutcome, StoreError> {
        for attempt in 1..=self.poll_attempts {
            tokio::time::sleep(self.poll_interval).await;
            let result = match self.rpc_result("tx_status", json!({ "tx_hash": tx_hash })).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(tx_hash, attempt, error = %err, "transaction status poll failed");
                    continue;
                }
            };
            match parse_tx_status(&result) {
                Ok(TxStatus::Final(outcome)) => {
                    tracing::info!(tx_hash, attempt, "transaction finalized after timeout");
                    return Ok(outcome);
                }
                Ok(TxStatus::Pending) => {
                    tracing::debug!(tx_hash, attempt, "transaction still pending");
                }
                Err(StoreError::Rejected(reason)) => return Err(StoreError::Rejected(reason)),
                Err(err) => {
                    tracing::warn!(tx_hash, attempt, error = %err, "unreadable transaction status");
                }
            }
        }
        Err(StoreError::PollExhausted {
            tx_hash: tx_hash.to_string(),
            attempts: self.poll_attempts,
        })
    }
}

#[async_trait]
impl LedgerStore for GatewayLedgerStore {
    async fn fetch_committed(&self, collection: CollectionKind) -> Result<Vec<Record>, StoreError> {
        let methods = self.methods(collection)?;
        let result = self
            .rpc_result(
                "view_function",
                json!({
                    "contract_id": self.contract_id,
                    "method_name": methods.view,
                    "args": {},
                }),
            )
            .await?;
        decode_records(result).map_err(StoreError::Decode)
    }

    async fn commit(
        &self,
        collection: CollectionKind,
        records: &[Record],
    ) -> Result<CommitOutcome, StoreError> {
        let methods = self.methods(collection)?;
        let encoded =
            serde_json::to_string(records).map_err(|e| StoreError::Decode(e.to_string()))?;
        let mut args = serde_json::Map::new();
        args.insert(methods.commit_arg.clone(), Value::String(encoded));

        let response = self
            .rpc(
                "call_function",
                json!({
                    "contract_id": self.contract_id,
                    "method_name": methods.commit,
                    "args": args,
                    "gas": self.gas,
                    "deposit": self.deposit,
                }),
            )
            .await?;

        if let Some(error) = response.error {
            return match error.timed_out_tx() {
                Some(Some(tx_hash)) => {
                    tracing::warn!(
                        collection = %collection,
                        tx_hash = %tx_hash,
                        "commit timed out; polling transaction status"
                    );
                    self.await_final(&tx_hash).await
                }
                _ => Err(error.into_store_error()),
            };
        }

        let result = response.result.unwrap_or(Value::Null);
        match parse_tx_status(&result)? {
            TxStatus::Final(outcome) => Ok(outcome),
            TxStatus::Pending => {
                let tx_hash = transaction_id(&result).ok_or_else(|| {
                    StoreError::Decode("pending outcome without transaction id".into())
                })?;
                self.await_final(&tx_hash).await
            }
        }
    }
}

fn transaction_id(outcome: &Value) -> Option<String> {
    outcome
        .pointer("/transaction_outcome/id")
        .or_else(|| outcome.pointer("/transaction/hash"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Interpret an execution outcome returned by `call_function` or `tx_status`.
fn parse_tx_status(outcome: &Value) -> Result<TxStatus, StoreError> {
    let status = outcome
        .get("status")
        .ok_or_else(|| StoreError::Decode("execution outcome has no status".into()))?;

    if let Some(failure) = status.get("Failure") {
        return Err(StoreError::Rejected(failure.to_string()));
    }
    let Some(success) = status.get("SuccessValue") else {
        return Ok(TxStatus::Pending);
    };

    let tx_hash = transaction_id(outcome)
        .ok_or_else(|| StoreError::Decode("execution outcome has no transaction id".into()))?;
    let success_value = match success.as_str() {
        Some("") | None => None,
        Some(encoded) => {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| StoreError::Decode(format!("SuccessValue is not base64: {e}")))?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
    };
    let logs = outcome
        .get("receipts_outcome")
        .and_then(Value::as_array)
        .map(|receipts| {
            receipts
                .iter()
                .filter_map(|r| r.pointer("/outcome/logs").and_then(Value::as_array))
                .flatten()
                .filter_map(|log| log.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();

    Ok(TxStatus::Final(CommitOutcome {
        tx_hash,
        success_value,
        logs,
    }))
}
