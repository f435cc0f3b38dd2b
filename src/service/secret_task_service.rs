use crate::app::AppState;
use crate::error::{CoordinatorError, Result};
use crate::module::deposit::model::Deposit;
use crate::module::secret_task::model::{EncryptionPubKey, SecretTask};
use crate::module::secret_task::schema::{
    EXECUTE_DEAL_FN, GET_PUB_KEY_FN, TaskArg, TaskRecordOpts, TaskRequest, TaskStatus,
    VERIFY_DEPOSITS_FN,
};
use crate::service::metrics_service;
use chrono::Utc;
use ethers::types::{Address, Bytes, U256};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Per-deposit columns passed to the secret contract, in deposit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepositParams {
    pub pub_keys: Vec<Bytes>,
    pub enc_recipients: Vec<Bytes>,
    pub senders: Vec<Address>,
    pub signatures: Vec<Bytes>,
}

pub fn prepare_deposit_params(deposits: &[Deposit]) -> DepositParams {
    let mut params = DepositParams::default();
    for deposit in deposits {
        params.pub_keys.push(deposit.pub_key.clone());
        params.enc_recipients.push(deposit.enc_recipient.clone());
        params.senders.push(deposit.sender);
        params.signatures.push(deposit.signature.clone());
    }
    params
}

pub async fn submit_task(
    state: &AppState,
    task_fn: &str,
    args: Vec<TaskArg>,
    opts: TaskRecordOpts,
    sender: Address,
    contract_address: &str,
) -> Result<SecretTask> {
    let request = TaskRequest {
        task_fn: task_fn.to_string(),
        args,
        gas_limit: opts.task_gas_limit,
        gas_price: opts.task_gas_price,
        sender,
        contract_address: contract_address.to_string(),
    };
    let task = state
        .secret_network
        .submit_task(request)
        .await
        .map_err(|e| match e {
            CoordinatorError::TaskSubmission(_) => e,
            other => CoordinatorError::TaskSubmission(other.to_string()),
        })?;
    info!(task_id = %task.task_id, task_fn = %task_fn, "secret task submitted");
    Ok(task)
}

/// Polls `task` until it leaves PENDING. Every sample that shows a newer
/// epoch spends one unit of grace; an advance with no grace left fails.
pub async fn wait_for_success(state: &AppState, task: SecretTask) -> Result<SecretTask> {
    let started = Instant::now();
    let interval = Duration::from_millis(state.config.task_poll_interval_ms);
    let mut grace = state.config.task_epoch_grace;
    // Seeded by the first sample taken inside the loop.
    let mut previous_epoch: Option<u64> = None;
    let mut task = task;

    loop {
        sleep(interval).await;

        let epoch = state.secret_network.epoch_size().await?;
        if previous_epoch.is_some_and(|previous| epoch > previous) {
            if grace == 0 {
                metrics_service::inc_epoch_expirations();
                metrics_service::set_last_error_ts(Utc::now().timestamp());
                return Err(CoordinatorError::EpochExpired {
                    task_id: task.task_id,
                });
            }
            grace -= 1;
            debug!(task_id = %task.task_id, epoch, grace_left = grace, "epoch advanced while polling");
        }
        previous_epoch = Some(epoch);

        task = state.secret_network.task_status(&task).await?;
        if task.eth_status != TaskStatus::Pending {
            break;
        }
    }
    metrics_service::record_task_duration_ms(started.elapsed().as_millis() as u64);

    let task = state.secret_network.task_result(&task).await?;
    let task = state.secret_network.decrypt_task_result(&task).await?;

    if task.eth_status == TaskStatus::Failed {
        let reason = task
            .decrypted_output
            .as_deref()
            .map(decode_diagnostic)
            .unwrap_or_default();
        metrics_service::inc_task_failures();
        metrics_service::set_last_error_ts(Utc::now().timestamp());
        warn!(task_id = %task.task_id, reason = %reason, "secret task failed");
        return Err(CoordinatorError::SecretTaskFailed {
            task_id: task.task_id,
            reason,
        });
    }

    info!(task_id = %task.task_id, status = task.eth_status.as_str(), "secret task completed");
    Ok(task)
}

/// Decrypted output of a failed task is the hex encoding of a UTF-8 message.
fn decode_diagnostic(output: &str) -> String {
    let raw = output.trim_start_matches("0x");
    match hex::decode(raw) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => output.to_string(),
    }
}

/// Runs the `get_pub_key` task and rotates the task key pair afterwards, so
/// the user private key returned here is not reused for later tasks.
pub async fn fetch_public_key(state: &AppState, opts: TaskRecordOpts) -> Result<EncryptionPubKey> {
    let operator = state.ledger.operator();
    let task = submit_task(
        state,
        GET_PUB_KEY_FN,
        Vec::new(),
        opts,
        operator,
        &state.secret_contract_address,
    )
    .await?;
    let task = wait_for_success(state, task).await?;

    let key_pair = state
        .secret_network
        .obtain_task_key_pair(operator, task.nonce)
        .await?;
    let encrypted_output = task.encrypted_output.clone().ok_or_else(|| {
        CoordinatorError::KeyFetchFailure(format!("task {} has no encrypted output", task.task_id))
    })?;
    let worker_pub_key = task.worker_encryption_key.clone().ok_or_else(|| {
        CoordinatorError::KeyFetchFailure(format!(
            "task {} has no worker encryption key",
            task.task_id
        ))
    })?;

    let pub_key = EncryptionPubKey {
        task_id: task.task_id,
        encrypted_output,
        user_private_key: key_pair.private_key,
        worker_pub_key,
    };
    state.secret_network.rotate_task_key_pair().await?;
    info!(task_id = %pub_key.task_id, "encryption public key fetched");
    Ok(pub_key)
}

/// Cached encryption public key. The cache lock is held for the whole fetch,
/// and failed fetches are retried until one succeeds.
pub async fn get_pub_key_data(state: &AppState, opts: TaskRecordOpts) -> EncryptionPubKey {
    let mut cached = state.pub_key_cache.lock().await;
    if let Some(pub_key) = cached.as_ref() {
        return pub_key.clone();
    }

    loop {
        match fetch_public_key(state, opts).await {
            Ok(pub_key) => {
                *cached = Some(pub_key.clone());
                return pub_key;
            }
            Err(e) => {
                let err = CoordinatorError::KeyFetchFailure(e.to_string());
                metrics_service::inc_key_fetch_retries();
                metrics_service::set_last_error_ts(Utc::now().timestamp());
                warn!(
                    code = err.code(),
                    error = %err,
                    retry_in_seconds = state.config.pub_key_retry_seconds,
                    "public key fetch failed; retrying"
                );
                sleep(Duration::from_secs(state.config.pub_key_retry_seconds)).await;
            }
        }
    }
}

pub async fn execute_deal_task(
    state: &AppState,
    deposit_amount: U256,
    deposits: &[Deposit],
    nonce: U256,
    chain_id: u64,
    opts: TaskRecordOpts,
) -> Result<SecretTask> {
    let operator = state.ledger.operator();
    let params = prepare_deposit_params(deposits);
    let args = vec![
        TaskArg::Address(operator),
        TaskArg::Uint256(nonce),
        TaskArg::Uint256(deposit_amount),
        TaskArg::BytesArray(params.pub_keys),
        TaskArg::BytesArray(params.enc_recipients),
        TaskArg::AddressArray(params.senders),
        TaskArg::BytesArray(params.signatures),
        TaskArg::Uint256(U256::from(chain_id)),
    ];
    let task = submit_task(
        state,
        EXECUTE_DEAL_FN,
        args,
        opts,
        operator,
        &state.secret_contract_address,
    )
    .await?;
    wait_for_success(state, task).await
}

pub async fn verify_deposits_task(
    state: &AppState,
    deposit_amount: U256,
    deposits: &[Deposit],
    chain_id: u64,
    opts: TaskRecordOpts,
) -> Result<SecretTask> {
    let params = prepare_deposit_params(deposits);
    let args = vec![
        TaskArg::Uint256(deposit_amount),
        TaskArg::BytesArray(params.pub_keys),
        TaskArg::BytesArray(params.enc_recipients),
        TaskArg::AddressArray(params.senders),
        TaskArg::BytesArray(params.signatures),
        TaskArg::Uint256(U256::from(chain_id)),
    ];
    let task = submit_task(
        state,
        VERIFY_DEPOSITS_FN,
        args,
        opts,
        state.ledger.operator(),
        &state.secret_contract_address,
    )
    .await?;
    wait_for_success(state, task).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_output_is_hex_decoded() {
        let encoded = hex::encode("invalid signature");
        assert_eq!(decode_diagnostic(&encoded), "invalid signature");
        assert_eq!(decode_diagnostic(&format!("0x{encoded}")), "invalid signature");
    }

    #[test]
    fn non_hex_diagnostic_is_kept_verbatim() {
        assert_eq!(decode_diagnostic("not hex"), "not hex");
    }
}
