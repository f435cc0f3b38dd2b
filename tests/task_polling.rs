mod common;

use common::test_harness;
use mixer_operator::error::CoordinatorError;
use mixer_operator::module::secret_task::schema::{
    EXECUTE_DEAL_FN, GET_PUB_KEY_FN, TaskRecordOpts, TaskStatus,
};
use mixer_operator::service::secret_task_service::{
    get_pub_key_data, submit_task, wait_for_success,
};
use std::sync::atomic::Ordering;

fn opts() -> TaskRecordOpts {
    TaskRecordOpts::from_config(&common::test_config())
}

#[tokio::test]
async fn long_pending_task_without_epoch_change_succeeds() {
    let h = test_harness();
    h.network.script_statuses(&[TaskStatus::Pending; 50]);

    let task = submit_task(
        &h.state,
        EXECUTE_DEAL_FN,
        Vec::new(),
        opts(),
        h.ledger.operator,
        &h.state.secret_contract_address,
    )
    .await
    .unwrap();
    let done = wait_for_success(&h.state, task).await.unwrap();

    assert_eq!(done.eth_status, TaskStatus::Success);
    assert_eq!(h.network.status_calls.load(Ordering::SeqCst), 51);
    assert!(done.encrypted_output.is_some());
}

#[tokio::test]
async fn eleventh_consecutive_epoch_advance_expires_the_task() {
    let h = test_harness();
    h.network.set_default_status(TaskStatus::Pending);
    h.network.advance_epoch_on_sample.store(true, Ordering::SeqCst);

    let task = submit_task(
        &h.state,
        EXECUTE_DEAL_FN,
        Vec::new(),
        opts(),
        h.ledger.operator,
        &h.state.secret_contract_address,
    )
    .await
    .unwrap();
    let err = wait_for_success(&h.state, task).await.unwrap_err();

    assert!(matches!(err, CoordinatorError::EpochExpired { ref task_id } if task_id == "task-0"));
    assert_eq!(err.code(), "EPOCH_EXPIRED");
    // The first sample seeds the baseline. Ten advances are absorbed by the
    // grace budget and the eleventh fails before the status is refreshed.
    assert_eq!(h.network.status_calls.load(Ordering::SeqCst), 11);
    assert_eq!(h.network.epoch_calls.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn ten_epoch_advances_are_tolerated() {
    let h = test_harness();
    h.network.advance_epoch_on_sample.store(true, Ordering::SeqCst);
    h.network.script_statuses(&[TaskStatus::Pending; 10]);

    let task = submit_task(
        &h.state,
        EXECUTE_DEAL_FN,
        Vec::new(),
        opts(),
        h.ledger.operator,
        &h.state.secret_contract_address,
    )
    .await
    .unwrap();
    let done = wait_for_success(&h.state, task).await.unwrap();

    assert_eq!(done.eth_status, TaskStatus::Success);
    assert_eq!(h.network.status_calls.load(Ordering::SeqCst), 11);
}

#[tokio::test]
async fn epoch_change_before_first_poll_spends_no_grace() {
    let mut config = common::test_config();
    config.task_epoch_grace = 0;
    let h = common::test_harness_with(config);
    h.network.advance_epoch_on_sample.store(true, Ordering::SeqCst);
    h.network.script_statuses(&[TaskStatus::Pending]);

    let task = submit_task(
        &h.state,
        EXECUTE_DEAL_FN,
        Vec::new(),
        opts(),
        h.ledger.operator,
        &h.state.secret_contract_address,
    )
    .await
    .unwrap();
    // Moves the epoch between submission and the first poll.
    h.network.epoch.fetch_add(5, Ordering::SeqCst);

    let err = wait_for_success(&h.state, task).await.unwrap_err();

    // The first sample only seeds the baseline, so the task survives one
    // poll and the advance seen by the second sample expires it.
    assert_eq!(err.code(), "EPOCH_EXPIRED");
    assert_eq!(h.network.epoch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.network.status_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn task_done_on_first_poll_ignores_epoch_movement() {
    let mut config = common::test_config();
    config.task_epoch_grace = 0;
    let h = common::test_harness_with(config);
    h.network.advance_epoch_on_sample.store(true, Ordering::SeqCst);

    let task = submit_task(
        &h.state,
        EXECUTE_DEAL_FN,
        Vec::new(),
        opts(),
        h.ledger.operator,
        &h.state.secret_contract_address,
    )
    .await
    .unwrap();
    let done = wait_for_success(&h.state, task).await.unwrap();

    assert_eq!(done.eth_status, TaskStatus::Success);
    assert_eq!(h.network.epoch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_task_surfaces_decoded_diagnostic() {
    let h = test_harness();
    h.network.set_default_status(TaskStatus::Failed);

    let task = submit_task(
        &h.state,
        EXECUTE_DEAL_FN,
        Vec::new(),
        opts(),
        h.ledger.operator,
        &h.state.secret_contract_address,
    )
    .await
    .unwrap();
    let err = wait_for_success(&h.state, task).await.unwrap_err();

    match err {
        CoordinatorError::SecretTaskFailed { task_id, reason } => {
            assert_eq!(task_id, "task-0");
            assert_eq!(reason, "invalid deposit signature");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn submission_errors_are_reported_as_task_submission() {
    let h = test_harness();
    h.network.failing_submissions.store(1, Ordering::SeqCst);

    let err = submit_task(
        &h.state,
        EXECUTE_DEAL_FN,
        Vec::new(),
        opts(),
        h.ledger.operator,
        &h.state.secret_contract_address,
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), "TASK_SUBMISSION_FAILED");
}

#[tokio::test]
async fn public_key_is_fetched_once_and_key_pair_rotated() {
    let h = test_harness();

    let first = get_pub_key_data(&h.state, opts()).await;
    let second = get_pub_key_data(&h.state, opts()).await;

    assert_eq!(first, second);
    assert_eq!(first.task_id, "task-0");
    assert_eq!(first.encrypted_output, "enc-task-0");
    assert_eq!(first.worker_pub_key, "worker-key");
    // Key pair in use when the task was submitted, before rotation.
    assert_eq!(first.user_private_key, "priv-0");
    assert_eq!(h.network.submitted_fns(), vec![GET_PUB_KEY_FN.to_string()]);
    assert_eq!(h.network.rotations.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn public_key_fetch_retries_after_failure() {
    let h = test_harness();
    h.network.failing_submissions.store(2, Ordering::SeqCst);

    let pub_key = get_pub_key_data(&h.state, opts()).await;

    assert_eq!(pub_key.task_id, "task-0");
    assert_eq!(h.network.submitted_fns().len(), 1);
    assert!(h.state.pub_key_cache.lock().await.is_some());
}
