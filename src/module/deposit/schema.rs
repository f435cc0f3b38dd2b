use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    Pending,
    Consumed,
    Discarded,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Consumed => "CONSUMED",
            Self::Discarded => "DISCARDED",
        }
    }
}

/// Signed deposit metadata as submitted by a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDepositRequest {
    pub sender: Address,
    pub amount: U256,
    #[serde(alias = "pubKey")]
    pub pub_key: Bytes,
    #[serde(alias = "encRecipient")]
    pub enc_recipient: Bytes,
    pub signature: Bytes,
}
