use crate::config::environment::AppConfig;
use ethers::types::{Address, Bytes, U256};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};

pub const GET_PUB_KEY_FN: &str = "get_pub_key()";
pub const EXECUTE_DEAL_FN: &str =
    "execute_deal(address,uint256,uint256,uint256,bytes[],bytes[],address[],bytes[])";
pub const VERIFY_DEPOSITS_FN: &str = "verify_deposits(uint256,uint256,bytes[],bytes[],address[],bytes[])";

/// `ethStatus` of a task record on the secret network.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskStatus {
    Pending,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending => 1,
            TaskStatus::Success => 2,
            TaskStatus::Failed => 3,
        }
    }
}

impl TryFrom<u8> for TaskStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Pending),
            2 => Ok(Self::Success),
            3 => Ok(Self::Failed),
            other => Err(format!("unknown task ethStatus {other}")),
        }
    }
}

/// Positional argument of a secret contract call, tagged with its ABI type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskArg {
    Address(Address),
    Uint256(U256),
    BytesArray(Vec<Bytes>),
    AddressArray(Vec<Address>),
}

impl TaskArg {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Uint256(_) => "uint256",
            Self::BytesArray(_) => "bytes[]",
            Self::AddressArray(_) => "address[]",
        }
    }
}

impl Serialize for TaskArg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut pair = serializer.serialize_tuple(2)?;
        match self {
            Self::Address(addr) => pair.serialize_element(addr)?,
            Self::Uint256(v) => pair.serialize_element(&v.to_string())?,
            Self::BytesArray(items) => pair.serialize_element(items)?,
            Self::AddressArray(items) => pair.serialize_element(items)?,
        }
        pair.serialize_element(self.type_tag())?;
        pair.end()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_fn: String,
    pub args: Vec<TaskArg>,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub sender: Address,
    pub contract_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRecordOpts {
    pub task_gas_limit: u64,
    pub task_gas_price: u64,
}

impl TaskRecordOpts {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            task_gas_limit: config.task_gas_limit,
            task_gas_price: config.task_gas_price,
        }
    }
}
