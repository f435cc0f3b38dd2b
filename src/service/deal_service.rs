use crate::app::AppState;
use crate::error::{CoordinatorError, Result};
use crate::infra::ledger::LedgerEvent;
use crate::module::deal::crud;
use crate::module::deal::model::Deal;
use crate::module::deal::schema::{DealStatus, DealStatusTransition, MixOutcome};
use crate::module::deposit::crud as deposit_crud;
use crate::module::deposit::model::Deposit;
use crate::module::secret_task::model::SecretTask;
use crate::module::secret_task::schema::TaskRecordOpts;
use crate::service::deposit_service::{get_deposit_amount, verify_amount};
use crate::service::hash_service::compute_deal_id;
use crate::service::{metrics_service, secret_task_service};
use chrono::Utc;
use ethers::types::{H256, U256};
use std::str::FromStr;
use tracing::{error, info, warn};

pub const NEW_DEAL_EVENT: &str = "NewDeal";
pub const DISTRIBUTE_EVENT: &str = "Distribute";

/// Creates a deal from `deposits` and registers it on the ledger. The deal is
/// EXECUTABLE once the `newDeal` receipt confirms the locally derived id.
pub async fn create_deal(
    state: &AppState,
    deposit_amount: U256,
    deposits: &[Deposit],
) -> Result<Deal> {
    if let Some(active) = crud::active_deal_id(state)? {
        return Err(CoordinatorError::DealAlreadyExecutable(active));
    }

    let operator = state.ledger.operator();
    let participants = deposits.iter().map(|d| d.sender).collect::<Vec<_>>();
    let nonce = state.ledger.transaction_count(operator).await?;
    let deal_id = compute_deal_id(deposit_amount, &participants, operator, nonce)?;

    let now = Utc::now().timestamp();
    let mut deal = Deal {
        deal_id,
        deposit_amount,
        participants: participants.clone(),
        deposit_ids: deposits.iter().map(|d| d.deposit_id.clone()).collect(),
        nonce,
        status: DealStatus::New,
        tx_hash: None,
        receipt_deal_id: None,
        task_id: None,
        execution_tx_hash: None,
        created_at: now,
        updated_at: now,
        transitions: vec![DealStatusTransition {
            from_status: None,
            to_status: DealStatus::New,
            transitioned_at: now,
        }],
    };
    crud::insert_deal(state, &deal).await?;
    metrics_service::inc_deals_created();
    info!(
        deal_id = %format!("{deal_id:#x}"),
        participants = participants.len(),
        nonce = %nonce,
        "deal created"
    );

    let receipt = match state
        .ledger
        .new_deal(
            deposit_amount,
            &participants,
            nonce,
            state.config.create_deal_gas,
        )
        .await
    {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!(deal_id = %format!("{deal_id:#x}"), code = e.code(), error = %e, "newDeal failed; releasing deposits");
            if let Err(release_err) = crud::abandon_deal(state, deal_id).await {
                error!(deal_id = %format!("{deal_id:#x}"), error = %release_err, "deposit release failed");
            }
            return Err(e);
        }
    };

    if receipt.deal_id != deal_id {
        error!(
            deal_id = %format!("{deal_id:#x}"),
            receipt_deal_id = %format!("{:#x}", receipt.deal_id),
            tx_hash = %format!("{:#x}", receipt.tx_hash),
            "deal id mismatch"
        );
        deal.tx_hash = Some(receipt.tx_hash);
        deal.receipt_deal_id = Some(receipt.deal_id);
        crud::update_deal(state, &deal).await?;
        return Err(CoordinatorError::DealIdMismatch {
            expected: deal_id,
            receipt: receipt.deal_id,
        });
    }

    deal.tx_hash = Some(receipt.tx_hash);
    deal.transition_to(DealStatus::Executable);
    crud::update_deal(state, &deal).await?;
    info!(
        deal_id = %format!("{deal_id:#x}"),
        tx_hash = %format!("{:#x}", receipt.tx_hash),
        block_number = ?receipt.block_number,
        "deal executable"
    );
    Ok(deal)
}

/// Fillable deposits whose senders still hold the claimed balance. Deposits
/// failing the check are discarded.
pub async fn balance_fillable_deposits(state: &AppState, min_amount: U256) -> Result<Vec<Deposit>> {
    let deposits = deposit_crud::query_fillable_deposits(state, min_amount)?;
    let mut discarded = false;
    for deposit in &deposits {
        match verify_amount(state, deposit.sender, deposit.amount).await {
            Ok(()) => {}
            Err(e @ CoordinatorError::InsufficientBalance { .. }) => {
                warn!(deposit_id = %deposit.deposit_id, code = e.code(), error = %e, "discarding deposit");
                deposit_crud::discard_deposit(state, &deposit.deposit_id).await?;
                metrics_service::inc_deposits_discarded();
                discarded = true;
            }
            Err(e) => return Err(e),
        }
    }

    if discarded {
        deposit_crud::query_fillable_deposits(state, min_amount)
    } else {
        Ok(deposits)
    }
}

/// Runs the execute-deal task with the amount recorded on the deal. A failed
/// task leaves the deal EXECUTABLE.
pub async fn execute_deal(state: &AppState, deal: &Deal, opts: TaskRecordOpts) -> Result<Deal> {
    let deal_id = deal.deal_id;
    let deposits = deposit_crud::get_deposits_for_deal(state, deal_id)?;
    if let Some(mismatch) = deposits.iter().find(|d| d.amount != deal.deposit_amount) {
        return Err(CoordinatorError::DepositAmountMismatch {
            expected: deal.deposit_amount,
            actual: mismatch.amount,
        });
    }
    let chain_id = state.ledger.chain_id().await?;

    let task = match secret_task_service::execute_deal_task(
        state,
        deal.deposit_amount,
        &deposits,
        deal.nonce,
        chain_id,
        opts,
    )
    .await
    {
        Ok(task) => task,
        Err(e) => {
            warn!(deal_id = %format!("{deal_id:#x}"), code = e.code(), error = %e, "deal execution failed");
            return Err(e);
        }
    };

    let mut executed = deal.clone();
    executed.task_id = Some(task.task_id.clone());
    executed.execution_tx_hash = task.transaction_hash;
    executed.transition_to(DealStatus::Executed);
    crud::update_deal(state, &executed).await?;

    let last_execution = state.ledger.last_execution_block_number().await?;
    crud::set_last_mix_block_number(state, last_execution).await?;
    metrics_service::inc_deals_executed();
    info!(
        deal_id = %format!("{deal_id:#x}"),
        task_id = %task.task_id,
        last_mix_block_number = last_execution,
        "deal executed"
    );
    Ok(executed)
}

/// Dry run of the secret contract's deposit checks. Changes no state.
pub async fn verify_deposits(
    state: &AppState,
    deposit_amount: U256,
    deposits: &[Deposit],
    opts: TaskRecordOpts,
) -> Result<SecretTask> {
    let chain_id = state.ledger.chain_id().await?;
    secret_task_service::verify_deposits_task(state, deposit_amount, deposits, chain_id, opts)
        .await
}

/// Blocks left before the next mix window opens. Negative once overdue.
pub async fn get_blocks_until_mix(state: &AppState) -> Result<i64> {
    let last_mix = get_last_mix_block_number(state).await?;
    let interval = state.ledger.deal_interval_in_blocks().await?;
    let current = state.ledger.block_number().await?;
    Ok((last_mix as i64 + interval as i64) - current as i64)
}

pub async fn update_last_mix_block_number(state: &AppState) -> Result<u64> {
    let current = state.ledger.block_number().await?;
    crud::set_last_mix_block_number(state, current).await?;
    Ok(current)
}

pub async fn get_last_mix_block_number(state: &AppState) -> Result<u64> {
    if let Some(block_number) = crud::get_last_mix_block_number(state)? {
        return Ok(block_number);
    }
    let block_number = state.ledger.last_execution_block_number().await?;
    crud::set_last_mix_block_number(state, block_number).await?;
    Ok(block_number)
}

pub fn get_quorum(state: &AppState) -> Result<usize> {
    let amount = state.config.deposit_amount_wei()?;
    Ok(deposit_crud::query_fillable_deposits(state, amount)?.len())
}

/// One mix trigger: resume a stuck deal, or wait for the window, or reset
/// the window when quorum is short, or create and execute a new deal.
pub async fn handle_deal_execution(state: &AppState, opts: TaskRecordOpts) -> Result<MixOutcome> {
    reconcile_active_deal(state).await?;

    if let Some(pending) = crud::query_deals(state, DealStatus::Executable)?
        .into_iter()
        .next()
    {
        info!(deal_id = %format!("{:#x}", pending.deal_id), "resuming executable deal");
        let deal = execute_deal(state, &pending, opts).await?;
        return Ok(MixOutcome::Executed { deal });
    }

    let blocks_left = get_blocks_until_mix(state).await?;
    if blocks_left > 0 {
        return Ok(MixOutcome::NotDue { blocks_left });
    }

    let min_amount = state.config.deposit_amount_wei()?;
    let deposits = balance_fillable_deposits(state, min_amount).await?;
    let threshold = state.config.participation_threshold;
    if deposits.len() < threshold {
        let block_number = update_last_mix_block_number(state).await?;
        info!(
            quorum = deposits.len(),
            threshold,
            last_mix_block_number = block_number,
            "quorum not reached"
        );
        return Ok(MixOutcome::QuorumNotReached {
            quorum: deposits.len(),
            threshold,
        });
    }

    let deposit_amount = get_deposit_amount(state, &deposits)?;
    if state.config.verify_deposits_before_deal {
        verify_deposits(state, deposit_amount, &deposits, opts).await?;
    }
    let deal = create_deal(state, deposit_amount, &deposits).await?;
    let deal = execute_deal(state, &deal, opts).await?;
    Ok(MixOutcome::Executed { deal })
}

/// Brings the holder of the active-deal slot in line with the ledger. A NEW
/// deal whose `newDeal` landed becomes EXECUTABLE, one that never reached the
/// ledger is abandoned, and a settled deal gives the slot back. A NEW deal
/// stopped on an id mismatch stays put and keeps failing.
pub async fn reconcile_active_deal(state: &AppState) -> Result<()> {
    let Some(deal_id) = crud::active_deal_id(state)? else {
        return Ok(());
    };
    let Some(mut deal) = crud::get_deal(state, deal_id)? else {
        return Err(CoordinatorError::DealNotFound(deal_id));
    };

    match deal.status {
        DealStatus::Executable => Ok(()),
        DealStatus::Executed => {
            info!(deal_id = %format!("{deal_id:#x}"), "releasing slot of executed deal");
            crud::release_active_deal(state, deal_id).await
        }
        DealStatus::New => {
            if let Some(receipt) = deal.receipt_deal_id {
                return Err(CoordinatorError::DealIdMismatch {
                    expected: deal_id,
                    receipt,
                });
            }

            // The newDeal transaction of a pending deal is sent after the last
            // mix marker was taken, so scanning from it is enough.
            let from_block = get_last_mix_block_number(state).await?;
            let landed = state
                .ledger
                .past_events(NEW_DEAL_EVENT, from_block, None)
                .await?
                .into_iter()
                .find(|event| event_deal_id(event) == Some(deal_id));

            match landed {
                Some(event) => {
                    deal.tx_hash = event.tx_hash;
                    deal.transition_to(DealStatus::Executable);
                    crud::update_deal(state, &deal).await?;
                    info!(
                        deal_id = %format!("{deal_id:#x}"),
                        block_number = ?event.block_number,
                        "recovered deal found on ledger"
                    );
                }
                None => {
                    let released = crud::abandon_deal(state, deal_id).await?;
                    warn!(
                        deal_id = %format!("{deal_id:#x}"),
                        released = released.len(),
                        "deal never reached the ledger; abandoned"
                    );
                }
            }
            Ok(())
        }
    }
}

fn event_deal_id(event: &LedgerEvent) -> Option<H256> {
    event
        .fields
        .get("_dealId")
        .and_then(|raw| H256::from_str(raw.trim_start_matches("0x")).ok())
}

pub async fn distribution_events(state: &AppState, from_block: u64) -> Result<Vec<LedgerEvent>> {
    state
        .ledger
        .past_events(DISTRIBUTE_EVENT, from_block, None)
        .await
}
