use super::schema::DepositStatus;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deposit {
    pub deposit_id: String,
    pub sequence: u64,
    pub sender: Address,
    pub amount: U256,
    pub enc_recipient: Bytes,
    pub pub_key: Bytes,
    pub signature: Bytes,
    pub status: DepositStatus,
    pub deal_id: Option<H256>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Deposit {
    pub fn is_fillable(&self, min_amount: U256) -> bool {
        self.status == DepositStatus::Pending && self.amount >= min_amount
    }
}
