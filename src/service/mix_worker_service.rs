use crate::app::AppState;
use crate::module::deal::schema::MixOutcome;
use crate::module::secret_task::schema::TaskRecordOpts;
use crate::service::{deal_service, metrics_service, secret_task_service};
use chrono::Utc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub async fn run_worker(state: AppState) -> Result<(), String> {
    info!("mix worker started");
    let opts = TaskRecordOpts::from_config(&state.config);
    let pub_key = secret_task_service::get_pub_key_data(&state, opts).await;
    info!(task_id = %pub_key.task_id, "encryption public key loaded");

    loop {
        tick(&state, opts).await;
        let metrics = metrics_service::snapshot();
        debug!(
            deposits_registered = metrics.deposits_registered,
            deposits_discarded = metrics.deposits_discarded,
            deals_executed = metrics.deals_executed,
            task_failures = metrics.task_failures,
            epoch_expirations = metrics.epoch_expirations,
            task_duration_avg_ms = metrics.task_duration_avg_ms,
            "mix worker metrics"
        );
        sleep(Duration::from_secs(
            state.config.worker_poll_seconds.max(1) as u64,
        ))
        .await;
    }
}

/// Handles one mix trigger and logs its outcome. Errors do not stop the worker.
pub async fn tick(state: &AppState, opts: TaskRecordOpts) -> Option<MixOutcome> {
    match deal_service::handle_deal_execution(state, opts).await {
        Ok(outcome) => {
            match &outcome {
                MixOutcome::NotDue { blocks_left } => {
                    info!(outcome = outcome.as_str(), blocks_left, "mix not due");
                }
                MixOutcome::QuorumNotReached { quorum, threshold } => {
                    info!(outcome = outcome.as_str(), quorum, threshold, "mix postponed");
                }
                MixOutcome::Executed { deal } => {
                    info!(
                        outcome = outcome.as_str(),
                        deal_id = %format!("{:#x}", deal.deal_id),
                        participants = deal.participants.len(),
                        "mix executed"
                    );
                    report_distribution(state).await;
                }
            }
            Some(outcome)
        }
        Err(e) => {
            metrics_service::set_last_error_ts(Utc::now().timestamp());
            if e.is_task_failure() {
                warn!(code = e.code(), error = %e, "mix task failed; deal stays executable");
            } else {
                error!(code = e.code(), error = %e, "mix trigger failed");
            }
            None
        }
    }
}

async fn report_distribution(state: &AppState) {
    let from_block = match deal_service::get_last_mix_block_number(state).await {
        Ok(block_number) => block_number,
        Err(e) => {
            warn!(error = %e, "last mix block lookup failed");
            return;
        }
    };
    match deal_service::distribution_events(state, from_block).await {
        Ok(events) => {
            for event in events {
                info!(
                    block_number = ?event.block_number,
                    tx_hash = ?event.tx_hash,
                    fields = ?event.fields,
                    "distribution"
                );
            }
        }
        Err(e) => warn!(error = %e, "distribution event query failed"),
    }
}
