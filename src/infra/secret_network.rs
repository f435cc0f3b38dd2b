use crate::error::Result;
use crate::module::secret_task::model::{SecretTask, TaskKeyPair};
use crate::module::secret_task::schema::TaskRequest;
use async_trait::async_trait;
use ethers::types::Address;

/// Task submission and result retrieval on the secret-computation network.
#[async_trait]
pub trait SecretNetwork: Send + Sync {
    /// Creates, signs and sends a task record. The returned task carries the
    /// nonce its user key pair is recorded under.
    async fn submit_task(&self, request: TaskRequest) -> Result<SecretTask>;

    async fn task_status(&self, task: &SecretTask) -> Result<SecretTask>;

    /// Fetches the encrypted output of a finished task.
    async fn task_result(&self, task: &SecretTask) -> Result<SecretTask>;

    async fn decrypt_task_result(&self, task: &SecretTask) -> Result<SecretTask>;

    async fn epoch_size(&self) -> Result<u64>;

    /// Key pair used for the task sent by `sender` with `nonce`.
    async fn obtain_task_key_pair(&self, sender: Address, nonce: u64) -> Result<TaskKeyPair>;

    /// Replaces the key pair used for subsequent submissions.
    async fn rotate_task_key_pair(&self) -> Result<()>;
}
