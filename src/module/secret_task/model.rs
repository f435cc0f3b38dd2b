use super::schema::TaskStatus;
use ethers::types::H256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretTask {
    pub task_id: String,
    pub eth_status: TaskStatus,
    pub nonce: u64,
    #[serde(default, alias = "encryptedAbiEncodedOutputs")]
    pub encrypted_output: Option<String>,
    #[serde(default)]
    pub decrypted_output: Option<String>,
    #[serde(default)]
    pub worker_encryption_key: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<H256>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskKeyPair {
    pub public_key: String,
    pub private_key: String,
}

/// Secret contract encryption key as returned by the `get_pub_key` task,
/// together with what the operator needs to decrypt it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionPubKey {
    pub task_id: String,
    pub encrypted_output: String,
    pub user_private_key: String,
    pub worker_pub_key: String,
}
