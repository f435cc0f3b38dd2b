use super::model::Deal;
use super::schema::DealStatus;
use crate::app::AppState;
use crate::error::{CoordinatorError, Result};
use crate::infra::LAST_MIX_BLOCK_NUMBER_KEY;
use crate::module::deposit::model::Deposit;
use crate::module::deposit::schema::DepositStatus;
use crate::module::store::{
    claim_active_deal, lock_store, persist_cache, persist_deal, persist_deposit,
    release_active_deal_claim,
};
use chrono::Utc;
use ethers::types::H256;
use tracing::warn;

/// Stores a NEW deal and consumes its deposits. The check for a pending deal
/// and the reservation of the active-deal slot happen under one lock.
pub async fn insert_deal(state: &AppState, deal: &Deal) -> Result<()> {
    let consumed = {
        let mut inner = lock_store(&state.store)?;
        if let Some(active) = inner.active_deal_id {
            return Err(CoordinatorError::DealAlreadyExecutable(active));
        }
        if let Some(executable) = inner
            .deals_by_id
            .values()
            .find(|d| d.status == DealStatus::Executable)
        {
            return Err(CoordinatorError::DealAlreadyExecutable(executable.deal_id));
        }
        // An abandoned NEW record with the same id is replaced on retry.
        if let Some(existing) = inner.deals_by_id.get(&deal.deal_id) {
            if existing.status != DealStatus::New {
                return Err(CoordinatorError::Store(format!(
                    "deal {:#x} already stored as {}",
                    deal.deal_id,
                    existing.status.as_str()
                )));
            }
        }
        for id in &deal.deposit_ids {
            let deposit = inner.deposits_by_id.get(id).ok_or_else(|| {
                CoordinatorError::InvalidDeposit(format!("deposit {id} not found"))
            })?;
            if deposit.status != DepositStatus::Pending {
                return Err(CoordinatorError::InvalidDeposit(format!(
                    "deposit {id} is {} and cannot join a deal",
                    deposit.status.as_str()
                )));
            }
        }

        let now = Utc::now().timestamp();
        let mut consumed = Vec::with_capacity(deal.deposit_ids.len());
        for id in &deal.deposit_ids {
            if let Some(deposit) = inner.deposits_by_id.get_mut(id) {
                deposit.status = DepositStatus::Consumed;
                deposit.deal_id = Some(deal.deal_id);
                deposit.updated_at = now;
                consumed.push(deposit.clone());
            }
        }
        inner.deals_by_id.insert(deal.deal_id, deal.clone());
        inner.active_deal_id = Some(deal.deal_id);
        consumed
    };

    match claim_active_deal(state, deal.deal_id).await {
        Ok(None) => {}
        Ok(Some(holder)) => {
            rollback_insert(state, deal.deal_id)?;
            return Err(CoordinatorError::DealAlreadyExecutable(holder));
        }
        Err(e) => {
            rollback_insert(state, deal.deal_id)?;
            return Err(e);
        }
    }

    if let Err(e) = persist_new_deal(state, deal, &consumed).await {
        warn!(deal_id = %format!("{:#x}", deal.deal_id), error = %e, "deal write failed; rolling back");
        rollback_insert(state, deal.deal_id)?;
        if let Err(release_err) = release_active_deal_claim(state, deal.deal_id).await {
            warn!(deal_id = %format!("{:#x}", deal.deal_id), error = %release_err, "active deal claim release failed");
        }
        return Err(e);
    }
    Ok(())
}

async fn persist_new_deal(state: &AppState, deal: &Deal, consumed: &[Deposit]) -> Result<()> {
    persist_deal(state, deal).await?;
    for deposit in consumed {
        persist_deposit(state, deposit).await?;
    }
    Ok(())
}

/// Stores `deal`. A deal that is no longer pending gives up the active-deal
/// slot once the persisted claim is gone.
pub async fn update_deal(state: &AppState, deal: &Deal) -> Result<()> {
    let release = {
        let mut inner = lock_store(&state.store)?;
        let stored = inner
            .deals_by_id
            .get_mut(&deal.deal_id)
            .ok_or(CoordinatorError::DealNotFound(deal.deal_id))?;
        *stored = deal.clone();
        !deal.status.is_pending() && inner.active_deal_id == Some(deal.deal_id)
    };

    persist_deal(state, deal).await?;
    if release {
        release_active_deal(state, deal.deal_id).await?;
    }
    Ok(())
}

/// Drops the persisted claim of `deal_id`, then frees the in-memory slot.
pub async fn release_active_deal(state: &AppState, deal_id: H256) -> Result<()> {
    release_active_deal_claim(state, deal_id).await?;
    let mut inner = lock_store(&state.store)?;
    if inner.active_deal_id == Some(deal_id) {
        inner.active_deal_id = None;
    }
    Ok(())
}

/// Hands a NEW deal's deposits back to the fillable set and frees the
/// active-deal slot. The deal record itself is kept.
pub async fn abandon_deal(state: &AppState, deal_id: H256) -> Result<Vec<Deposit>> {
    let released = {
        let mut inner = lock_store(&state.store)?;
        let deal = inner
            .deals_by_id
            .get(&deal_id)
            .cloned()
            .ok_or(CoordinatorError::DealNotFound(deal_id))?;
        if deal.status != DealStatus::New {
            return Err(CoordinatorError::Store(format!(
                "deal {deal_id:#x} is {} and cannot be abandoned",
                deal.status.as_str()
            )));
        }
        let now = Utc::now().timestamp();
        let mut released = Vec::with_capacity(deal.deposit_ids.len());
        for id in &deal.deposit_ids {
            if let Some(deposit) = inner.deposits_by_id.get_mut(id) {
                if deposit.deal_id == Some(deal_id) {
                    deposit.status = DepositStatus::Pending;
                    deposit.deal_id = None;
                    deposit.updated_at = now;
                    released.push(deposit.clone());
                }
            }
        }
        released
    };

    for deposit in &released {
        persist_deposit(state, deposit).await?;
    }
    release_active_deal(state, deal_id).await?;
    Ok(released)
}

pub fn query_deals(state: &AppState, status: DealStatus) -> Result<Vec<Deal>> {
    let inner = lock_store(&state.store)?;
    let mut deals = inner
        .deals_by_id
        .values()
        .filter(|d| d.status == status)
        .cloned()
        .collect::<Vec<_>>();
    deals.sort_by_key(|d| d.created_at);
    Ok(deals)
}

pub fn get_deal(state: &AppState, deal_id: H256) -> Result<Option<Deal>> {
    let inner = lock_store(&state.store)?;
    Ok(inner.deals_by_id.get(&deal_id).cloned())
}

pub fn active_deal_id(state: &AppState) -> Result<Option<H256>> {
    let inner = lock_store(&state.store)?;
    Ok(inner.active_deal_id)
}

pub fn get_last_mix_block_number(state: &AppState) -> Result<Option<u64>> {
    let inner = lock_store(&state.store)?;
    Ok(inner.last_mix_block_number)
}

pub async fn set_last_mix_block_number(state: &AppState, block_number: u64) -> Result<()> {
    {
        let mut inner = lock_store(&state.store)?;
        inner.last_mix_block_number = Some(block_number);
    }
    persist_cache(state, LAST_MIX_BLOCK_NUMBER_KEY, block_number.to_string()).await
}

fn rollback_insert(state: &AppState, deal_id: H256) -> Result<()> {
    let mut inner = lock_store(&state.store)?;
    if let Some(deal) = inner.deals_by_id.remove(&deal_id) {
        for id in &deal.deposit_ids {
            if let Some(deposit) = inner.deposits_by_id.get_mut(id) {
                deposit.status = DepositStatus::Pending;
                deposit.deal_id = None;
            }
        }
    }
    if inner.active_deal_id == Some(deal_id) {
        inner.active_deal_id = None;
    }
    Ok(())
}
