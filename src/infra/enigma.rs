use super::secret_network::SecretNetwork;
use crate::error::{CoordinatorError, Result};
use crate::module::secret_task::model::{SecretTask, TaskKeyPair};
use crate::module::secret_task::schema::{TaskRequest, TaskStatus};
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::core::k256::elliptic_curve::sec1::ToEncodedPoint;
use ethers::core::rand::thread_rng;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;
use ethers::types::Address;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

abigen!(
    Enigma,
    r#"[
        function getEpochSize() external view returns (uint256)
    ]"#
);

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
    result: Option<R>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskStatusResult {
    eth_status: TaskStatus,
    #[serde(default)]
    transaction_hash: Option<ethers::types::H256>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskOutputResult {
    eth_status: TaskStatus,
    #[serde(default, alias = "encryptedAbiEncodedOutputs")]
    encrypted_output: Option<String>,
    #[serde(default)]
    worker_encryption_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptResult {
    decrypted_output: String,
}

#[derive(Debug, Default)]
struct KeyRegistry {
    current: Option<TaskKeyPair>,
    by_sender_nonce: HashMap<(Address, u64), TaskKeyPair>,
    by_task_id: HashMap<String, TaskKeyPair>,
}

/// JSON-RPC client for the Enigma gateway. The gateway runs next to the
/// operator, so user private keys are sent to it for decryption.
///
/// Every call is an HTTP POST of a JSON-RPC 2.0 request to the gateway URL.
/// The result object of each method is camelCase:
///
/// | method | params | result |
/// |---|---|---|
/// | `submitTask` | `{ task: TaskRequest, userPubKey }` | `SecretTask` (`taskId`, `ethStatus`, `nonce`) |
/// | `getTaskStatus` | `{ taskId }` | `{ ethStatus, transactionHash? }` |
/// | `getTaskResult` | `{ taskId }` | `{ ethStatus, encryptedOutput?, workerEncryptionKey? }` |
/// | `decryptTaskResult` | `{ taskId, encryptedOutput, workerEncryptionKey, userPrivateKey }` | `{ decryptedOutput }` |
/// | `getEpochSize` | `{}` | epoch number, used only without an Enigma contract address |
///
/// `ethStatus` is 1 pending, 2 success or 3 failed. A response carrying `error`
/// or missing `result` fails with `SecretNetwork`.
pub struct EnigmaRpcClient {
    http: Client,
    url: String,
    enigma: Option<Enigma<Provider<Http>>>,
    keys: Mutex<KeyRegistry>,
    next_id: AtomicU64,
}

impl EnigmaRpcClient {
    pub fn new(
        url: &str,
        eth_rpc_url: Option<&str>,
        enigma_contract_address: Option<&str>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoordinatorError::SecretNetwork(format!("failed to build http client: {e}")))?;

        let enigma = match (eth_rpc_url, enigma_contract_address) {
            (Some(rpc_url), Some(address)) => {
                let provider = Provider::<Http>::try_from(rpc_url).map_err(|e| {
                    CoordinatorError::SecretNetwork(format!("provider init failed: {e}"))
                })?;
                let address = Address::from_str(address).map_err(|e| {
                    CoordinatorError::Config(format!("invalid enigma contract address: {e}"))
                })?;
                Some(Enigma::new(address, Arc::new(provider)))
            }
            _ => None,
        };

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            enigma,
            keys: Mutex::new(KeyRegistry::default()),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoordinatorError::SecretNetwork(format!("{method} request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(CoordinatorError::SecretNetwork(format!(
                "{method} returned non-success status: {}",
                resp.status()
            )));
        }

        let payload = resp.json::<RpcResponse<R>>().await.map_err(|e| {
            CoordinatorError::SecretNetwork(format!("failed to parse {method} payload: {e}"))
        })?;
        if let Some(err) = payload.error {
            return Err(CoordinatorError::SecretNetwork(format!(
                "{method} failed with code {}: {}",
                err.code, err.message
            )));
        }
        payload
            .result
            .ok_or_else(|| CoordinatorError::SecretNetwork(format!("{method} returned no result")))
    }

    fn lock_keys(&self) -> Result<MutexGuard<'_, KeyRegistry>> {
        self.keys
            .lock()
            .map_err(|_| CoordinatorError::SecretNetwork("key registry lock poisoned".to_string()))
    }

    fn current_key_pair(&self) -> Result<TaskKeyPair> {
        let mut keys = self.lock_keys()?;
        if let Some(pair) = &keys.current {
            return Ok(pair.clone());
        }
        let pair = generate_key_pair();
        keys.current = Some(pair.clone());
        Ok(pair)
    }
}

fn generate_key_pair() -> TaskKeyPair {
    let wallet = LocalWallet::new(&mut thread_rng());
    let signer = wallet.signer();
    let point = signer.verifying_key().to_encoded_point(false);
    TaskKeyPair {
        // Uncompressed point without the 0x04 tag.
        public_key: hex::encode(&point.as_bytes()[1..]),
        private_key: hex::encode(signer.to_bytes()),
    }
}

#[async_trait]
impl SecretNetwork for EnigmaRpcClient {
    async fn submit_task(&self, request: TaskRequest) -> Result<SecretTask> {
        let key_pair = self.current_key_pair()?;
        let sender = request.sender;
        let task: SecretTask = self
            .call(
                "submitTask",
                json!({ "task": request, "userPubKey": key_pair.public_key }),
            )
            .await
            .map_err(|e| CoordinatorError::TaskSubmission(e.to_string()))?;

        let mut keys = self.lock_keys()?;
        keys.by_sender_nonce
            .insert((sender, task.nonce), key_pair.clone());
        keys.by_task_id.insert(task.task_id.clone(), key_pair);
        debug!(task_id = %task.task_id, nonce = task.nonce, "task submitted to gateway");
        Ok(task)
    }

    async fn task_status(&self, task: &SecretTask) -> Result<SecretTask> {
        let status: TaskStatusResult = self
            .call("getTaskStatus", json!({ "taskId": task.task_id }))
            .await?;
        let mut updated = task.clone();
        updated.eth_status = status.eth_status;
        if status.transaction_hash.is_some() {
            updated.transaction_hash = status.transaction_hash;
        }
        Ok(updated)
    }

    async fn task_result(&self, task: &SecretTask) -> Result<SecretTask> {
        let output: TaskOutputResult = self
            .call("getTaskResult", json!({ "taskId": task.task_id }))
            .await?;
        let mut updated = task.clone();
        updated.eth_status = output.eth_status;
        updated.encrypted_output = output.encrypted_output;
        updated.worker_encryption_key = output.worker_encryption_key;
        Ok(updated)
    }

    async fn decrypt_task_result(&self, task: &SecretTask) -> Result<SecretTask> {
        let key_pair = self
            .lock_keys()?
            .by_task_id
            .get(&task.task_id)
            .cloned()
            .ok_or_else(|| {
                CoordinatorError::SecretNetwork(format!(
                    "no key pair recorded for task {}",
                    task.task_id
                ))
            })?;
        let decrypted: DecryptResult = self
            .call(
                "decryptTaskResult",
                json!({
                    "taskId": task.task_id,
                    "encryptedOutput": task.encrypted_output,
                    "workerEncryptionKey": task.worker_encryption_key,
                    "userPrivateKey": key_pair.private_key,
                }),
            )
            .await?;
        let mut updated = task.clone();
        updated.decrypted_output = Some(decrypted.decrypted_output);
        Ok(updated)
    }

    async fn epoch_size(&self) -> Result<u64> {
        match &self.enigma {
            Some(enigma) => {
                let size = enigma.get_epoch_size().call().await.map_err(|e| {
                    CoordinatorError::SecretNetwork(format!("getEpochSize failed: {e}"))
                })?;
                u64::try_from(size).map_err(|_| {
                    CoordinatorError::SecretNetwork(format!("epoch size does not fit in u64: {size}"))
                })
            }
            None => self.call("getEpochSize", json!({})).await,
        }
    }

    async fn obtain_task_key_pair(&self, sender: Address, nonce: u64) -> Result<TaskKeyPair> {
        self.lock_keys()?
            .by_sender_nonce
            .get(&(sender, nonce))
            .cloned()
            .ok_or_else(|| {
                CoordinatorError::SecretNetwork(format!(
                    "no key pair recorded for sender {sender:#x} nonce {nonce}"
                ))
            })
    }

    async fn rotate_task_key_pair(&self) -> Result<()> {
        self.lock_keys()?.current = Some(generate_key_pair());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_pair_has_raw_point_and_scalar() {
        let pair = generate_key_pair();
        assert_eq!(pair.public_key.len(), 128);
        assert_eq!(pair.private_key.len(), 64);
    }

    #[test]
    fn gateway_payloads_decode() {
        let status: RpcResponse<TaskStatusResult> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": { "ethStatus": 2, "transactionHash": format!("0x{}", "11".repeat(32)) }
        }))
        .unwrap();
        let status = status.result.unwrap();
        assert_eq!(status.eth_status, TaskStatus::Success);
        assert!(status.transaction_hash.is_some());

        let output: TaskOutputResult = serde_json::from_value(json!({
            "ethStatus": 3,
            "encryptedAbiEncodedOutputs": "abcd",
            "workerEncryptionKey": "ff"
        }))
        .unwrap();
        assert_eq!(output.eth_status, TaskStatus::Failed);
        assert_eq!(output.encrypted_output.as_deref(), Some("abcd"));

        let failed: RpcResponse<DecryptResult> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": { "code": -32000, "message": "unknown task" }
        }))
        .unwrap();
        assert!(failed.result.is_none());
        assert_eq!(failed.error.unwrap().code, -32000);
    }

    #[tokio::test]
    async fn rotation_replaces_current_key_pair() {
        let client = EnigmaRpcClient::new("http://127.0.0.1:3346", None, None).unwrap();
        let before = client.current_key_pair().unwrap();
        assert_eq!(client.current_key_pair().unwrap(), before);
        client.rotate_task_key_pair().await.unwrap();
        assert_ne!(client.current_key_pair().unwrap(), before);
    }
}
