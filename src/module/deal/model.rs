use super::schema::{DealStatus, DealStatusTransition};
use chrono::Utc;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deal {
    pub deal_id: H256,
    pub deposit_amount: U256,
    pub participants: Vec<Address>,
    pub deposit_ids: Vec<String>,
    pub nonce: U256,
    pub status: DealStatus,
    /// `newDeal` transaction on the ledger.
    pub tx_hash: Option<H256>,
    /// `_dealId` emitted by a `newDeal` receipt that did not match `deal_id`.
    #[serde(default)]
    pub receipt_deal_id: Option<H256>,
    pub task_id: Option<String>,
    /// Ledger callback transaction of the execute-deal task.
    pub execution_tx_hash: Option<H256>,
    pub created_at: i64,
    pub updated_at: i64,
    pub transitions: Vec<DealStatusTransition>,
}

impl Deal {
    pub fn transition_to(&mut self, next: DealStatus) {
        let now = Utc::now().timestamp();
        self.transitions.push(DealStatusTransition {
            from_status: Some(self.status),
            to_status: next,
            transitioned_at: now,
        });
        self.status = next;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "_id")]
    pub key: String,
    pub value: String,
}
