use super::model::Deposit;
use super::schema::{DepositStatus, RegisterDepositRequest};
use crate::app::AppState;
use crate::error::{CoordinatorError, Result};
use crate::module::store::{lock_store, persist_deposit};
use crate::service::hash_service::deposit_id;
use chrono::Utc;
use ethers::types::{H256, U256};

pub async fn insert_deposit(state: &AppState, req: RegisterDepositRequest) -> Result<Deposit> {
    let deposit_id = deposit_id(&req.sender, &req.signature);
    let deposit = {
        let mut inner = lock_store(&state.store)?;
        if inner.deposits_by_id.contains_key(&deposit_id) {
            return Err(CoordinatorError::InvalidDeposit(format!(
                "deposit {deposit_id} already registered"
            )));
        }

        let now = Utc::now().timestamp();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        let deposit = Deposit {
            deposit_id: deposit_id.clone(),
            sequence,
            sender: req.sender,
            amount: req.amount,
            enc_recipient: req.enc_recipient,
            pub_key: req.pub_key,
            signature: req.signature,
            status: DepositStatus::Pending,
            deal_id: None,
            created_at: now,
            updated_at: now,
        };
        inner.deposits_by_id.insert(deposit_id, deposit.clone());
        deposit
    };

    persist_deposit(state, &deposit).await?;
    Ok(deposit)
}

/// Deposits neither consumed by a deal nor discarded, in registration order.
pub fn query_fillable_deposits(state: &AppState, min_amount: U256) -> Result<Vec<Deposit>> {
    let inner = lock_store(&state.store)?;
    let mut deposits = inner
        .deposits_by_id
        .values()
        .filter(|d| d.is_fillable(min_amount))
        .cloned()
        .collect::<Vec<_>>();
    deposits.sort_by_key(|d| d.sequence);
    Ok(deposits)
}

pub async fn discard_deposit(state: &AppState, deposit_id: &str) -> Result<Deposit> {
    let deposit = {
        let mut inner = lock_store(&state.store)?;
        let deposit = inner.deposits_by_id.get_mut(deposit_id).ok_or_else(|| {
            CoordinatorError::Store(format!("deposit {deposit_id} not found"))
        })?;
        deposit.status = DepositStatus::Discarded;
        deposit.updated_at = Utc::now().timestamp();
        deposit.clone()
    };
    persist_deposit(state, &deposit).await?;
    Ok(deposit)
}

/// Deposits linked to a deal, in the deal's participant order.
pub fn get_deposits_for_deal(state: &AppState, deal_id: H256) -> Result<Vec<Deposit>> {
    let inner = lock_store(&state.store)?;
    let deal = inner
        .deals_by_id
        .get(&deal_id)
        .ok_or(CoordinatorError::DealNotFound(deal_id))?;
    deal.deposit_ids
        .iter()
        .map(|id| {
            inner.deposits_by_id.get(id).cloned().ok_or_else(|| {
                CoordinatorError::Store(format!(
                    "deposit {id} of deal {deal_id:#x} missing from store"
                ))
            })
        })
        .collect()
}

pub fn get_deposit(state: &AppState, deposit_id: &str) -> Result<Option<Deposit>> {
    let inner = lock_store(&state.store)?;
    Ok(inner.deposits_by_id.get(deposit_id).cloned())
}
