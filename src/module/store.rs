use crate::app::AppState;
use crate::error::{CoordinatorError, Result};
use crate::infra::{
    ACTIVE_DEAL_KEY, CACHE_COLLECTION, DEALS_COLLECTION, DEPOSITS_COLLECTION, InfraClients,
    LAST_MIX_BLOCK_NUMBER_KEY,
};
use crate::module::deal::model::{CacheEntry, Deal};
use crate::module::deposit::model::Deposit;
use ethers::types::H256;
use mongodb::bson::doc;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::Collection;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Working set of deposits and deals for the operator process. Writes go
/// through to MongoDB when it is configured.
#[derive(Debug, Default)]
pub struct MixerStore {
    inner: Mutex<MixerStoreInner>,
}

#[derive(Debug, Default)]
pub(crate) struct MixerStoreInner {
    pub(crate) deposits_by_id: HashMap<String, Deposit>,
    pub(crate) next_sequence: u64,
    pub(crate) deals_by_id: HashMap<H256, Deal>,
    pub(crate) active_deal_id: Option<H256>,
    pub(crate) last_mix_block_number: Option<u64>,
}

pub(crate) fn lock_store(store: &MixerStore) -> Result<MutexGuard<'_, MixerStoreInner>> {
    store
        .inner
        .lock()
        .map_err(|_| CoordinatorError::Store("mixer store lock poisoned".to_string()))
}

/// Loads persisted deposits, deals and cache entries into memory.
pub async fn hydrate(state: &AppState) -> Result<()> {
    let Some(infra) = &state.infra else {
        return Ok(());
    };

    let deposits = load_all::<Deposit>(&deposits_collection(infra)).await?;
    let deals = load_all::<Deal>(&deals_collection(infra)).await?;
    let active_claim = read_cache(infra, ACTIVE_DEAL_KEY).await?;
    let last_mix = read_cache(infra, LAST_MIX_BLOCK_NUMBER_KEY).await?;

    let mut inner = lock_store(&state.store)?;
    inner.next_sequence = deposits.iter().map(|d| d.sequence + 1).max().unwrap_or(0);
    for deposit in deposits {
        inner
            .deposits_by_id
            .insert(deposit.deposit_id.clone(), deposit);
    }
    let pending_deal = deals
        .iter()
        .find(|d| d.status.is_pending())
        .map(|d| d.deal_id);
    for deal in deals {
        inner.deals_by_id.insert(deal.deal_id, deal);
    }
    inner.active_deal_id = match active_claim {
        Some(raw) => Some(
            H256::from_str(&raw)
                .map_err(|e| CoordinatorError::Store(format!("invalid active deal claim: {e}")))?,
        ),
        None => pending_deal,
    };
    inner.last_mix_block_number = last_mix
        .map(|raw| {
            raw.parse::<u64>().map_err(|e| {
                CoordinatorError::Store(format!("invalid last mix block number `{raw}`: {e}"))
            })
        })
        .transpose()?;

    info!(
        deposits = inner.deposits_by_id.len(),
        deals = inner.deals_by_id.len(),
        active_deal = ?inner.active_deal_id,
        last_mix_block_number = ?inner.last_mix_block_number,
        "store hydrated from mongodb"
    );
    Ok(())
}

pub(crate) async fn persist_deposit(state: &AppState, deposit: &Deposit) -> Result<()> {
    let Some(infra) = &state.infra else {
        return Ok(());
    };
    deposits_collection(infra)
        .replace_one(doc! { "deposit_id": &deposit.deposit_id }, deposit)
        .upsert(true)
        .await
        .map_err(|e| CoordinatorError::Store(format!("mongodb deposit write failed: {e}")))?;
    Ok(())
}

pub(crate) async fn persist_deal(state: &AppState, deal: &Deal) -> Result<()> {
    let Some(infra) = &state.infra else {
        return Ok(());
    };
    deals_collection(infra)
        .replace_one(doc! { "deal_id": format!("{:#x}", deal.deal_id) }, deal)
        .upsert(true)
        .await
        .map_err(|e| CoordinatorError::Store(format!("mongodb deal write failed: {e}")))?;
    Ok(())
}

pub(crate) async fn persist_cache(state: &AppState, key: &str, value: String) -> Result<()> {
    let Some(infra) = &state.infra else {
        return Ok(());
    };
    let entry = CacheEntry {
        key: key.to_string(),
        value,
    };
    cache_collection(infra)
        .replace_one(doc! { "_id": key }, &entry)
        .upsert(true)
        .await
        .map_err(|e| CoordinatorError::Store(format!("mongodb cache write failed: {e}")))?;
    Ok(())
}

/// Claims the active-deal sentinel document. Returns the holder's deal id
/// when another deal already owns it.
pub(crate) async fn claim_active_deal(state: &AppState, deal_id: H256) -> Result<Option<H256>> {
    let Some(infra) = &state.infra else {
        return Ok(None);
    };
    let entry = CacheEntry {
        key: ACTIVE_DEAL_KEY.to_string(),
        value: format!("{deal_id:#x}"),
    };
    match cache_collection(infra).insert_one(&entry).await {
        Ok(_) => Ok(None),
        Err(e) if is_duplicate_key(&e) => {
            let holder = read_cache(infra, ACTIVE_DEAL_KEY)
                .await?
                .and_then(|raw| H256::from_str(&raw).ok())
                .unwrap_or_default();
            Ok(Some(holder))
        }
        Err(e) => Err(CoordinatorError::Store(format!(
            "mongodb active deal claim failed: {e}"
        ))),
    }
}

pub(crate) async fn release_active_deal_claim(state: &AppState, deal_id: H256) -> Result<()> {
    let Some(infra) = &state.infra else {
        return Ok(());
    };
    cache_collection(infra)
        .delete_one(doc! { "_id": ACTIVE_DEAL_KEY, "value": format!("{deal_id:#x}") })
        .await
        .map_err(|e| CoordinatorError::Store(format!("mongodb active deal release failed: {e}")))?;
    Ok(())
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY_CODE
    )
}

async fn read_cache(infra: &InfraClients, key: &str) -> Result<Option<String>> {
    let entry = cache_collection(infra)
        .find_one(doc! { "_id": key })
        .await
        .map_err(|e| CoordinatorError::Store(format!("mongodb cache read failed: {e}")))?;
    Ok(entry.map(|e| e.value))
}

async fn load_all<T>(collection: &Collection<T>) -> Result<Vec<T>>
where
    T: serde::de::DeserializeOwned + Send + Sync,
{
    let mut cursor = collection
        .find(doc! {})
        .await
        .map_err(|e| CoordinatorError::Store(format!("mongodb query failed: {e}")))?;
    let mut out = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| CoordinatorError::Store(format!("mongodb cursor failed: {e}")))?
    {
        out.push(
            cursor
                .deserialize_current()
                .map_err(|e| CoordinatorError::Store(format!("mongodb decode failed: {e}")))?,
        );
    }
    Ok(out)
}

fn deposits_collection(infra: &InfraClients) -> Collection<Deposit> {
    infra.mongo_db.collection(DEPOSITS_COLLECTION)
}

fn deals_collection(infra: &InfraClients) -> Collection<Deal> {
    infra.mongo_db.collection(DEALS_COLLECTION)
}

fn cache_collection(infra: &InfraClients) -> Collection<CacheEntry> {
    infra.mongo_db.collection(CACHE_COLLECTION)
}
