use ethers::types::{Address, H256, U256};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    #[error("sender {sender:#x} balance (in wei) less than deposit: {balance} < {amount}")]
    InsufficientBalance {
        sender: Address,
        balance: U256,
        amount: U256,
    },

    #[error("invalid deposit: {0}")]
    InvalidDeposit(String),

    #[error("mismatching deposit amount: expected {expected}, got {actual}")]
    DepositAmountMismatch { expected: U256, actual: U256 },

    #[error("cannot create a new deal until deal {0:#x} is executed")]
    DealAlreadyExecutable(H256),

    #[error("deal id in receipt does not match generated value: {receipt:#x} != {expected:#x}")]
    DealIdMismatch { expected: H256, receipt: H256 },

    #[error("deal not found: {0:#x}")]
    DealNotFound(H256),

    #[error("secret task submission failed: {0}")]
    TaskSubmission(String),

    #[error("epoch changed and grace period expired for task {task_id}")]
    EpochExpired { task_id: String },

    #[error("secret network error with task {task_id}: {reason}")]
    SecretTaskFailed { task_id: String, reason: String },

    #[error("unable to fetch encryption public key: {0}")]
    KeyFetchFailure(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("secret network error: {0}")]
    SecretNetwork(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),
}

impl CoordinatorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InvalidDeposit(_) => "INVALID_DEPOSIT",
            Self::DepositAmountMismatch { .. } => "DEPOSIT_AMOUNT_MISMATCH",
            Self::DealAlreadyExecutable(_) => "DEAL_ALREADY_EXECUTABLE",
            Self::DealIdMismatch { .. } => "DEAL_ID_MISMATCH",
            Self::DealNotFound(_) => "DEAL_NOT_FOUND",
            Self::TaskSubmission(_) => "TASK_SUBMISSION_FAILED",
            Self::EpochExpired { .. } => "EPOCH_EXPIRED",
            Self::SecretTaskFailed { .. } => "SECRET_TASK_FAILED",
            Self::KeyFetchFailure(_) => "KEY_FETCH_FAILURE",
            Self::Ledger(_) => "LEDGER_ERROR",
            Self::SecretNetwork(_) => "SECRET_NETWORK_ERROR",
            Self::Store(_) => "STORE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Task failures after which the deal keeps its status and can be retried.
    pub fn is_task_failure(&self) -> bool {
        matches!(
            self,
            Self::EpochExpired { .. } | Self::SecretTaskFailed { .. }
        )
    }
}
