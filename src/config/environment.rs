use crate::error::{CoordinatorError, Result};
use ethers::types::U256;
use ethers::utils::parse_ether;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rust_env: String,
    pub mongodb_url: Option<String>,
    pub mongodb_database: Option<String>,
    pub eth_rpc_url: Option<String>,
    pub private_key: Option<String>,
    pub mixer_contract_address: Option<String>,
    pub enigma_url: String,
    pub enigma_contract_address: Option<String>,
    pub secret_contract_address: Option<String>,
    pub artifacts_dir: String,
    pub secret_contract_filename: String,
    pub deposit_amount_eth: String,
    pub participation_threshold: usize,
    pub create_deal_gas: u64,
    pub task_gas_limit: u64,
    pub task_gas_price: u64,
    pub task_poll_interval_ms: u64,
    pub task_epoch_grace: u32,
    pub pub_key_retry_seconds: u64,
    pub worker_enabled: bool,
    pub worker_poll_seconds: i64,
    pub verify_deposits_before_deal: bool,
}

impl AppConfig {
    pub fn from_env() -> std::result::Result<Self, String> {
        load_dotenv_layers();
        Ok(Self {
            rust_env: read_var("RUST_ENV")?,
            mongodb_url: env::var("MONGODB_URL").ok(),
            mongodb_database: env::var("MONGODB_DATABASE").ok(),
            eth_rpc_url: env::var("ETH_RPC_URL").ok(),
            private_key: env::var("PRIVATE_KEY").ok(),
            mixer_contract_address: env::var("MIXER_CONTRACT_ADDRESS").ok(),
            enigma_url: read_optional_string("ENIGMA_URL", "http://127.0.0.1:3346"),
            enigma_contract_address: env::var("ENIGMA_CONTRACT_ADDRESS").ok(),
            secret_contract_address: env::var("SECRET_CONTRACT_ADDRESS").ok(),
            artifacts_dir: read_optional_string("ARTIFACTS_DIR", "test"),
            secret_contract_filename: read_optional_string(
                "SECRET_CONTRACT_FILENAME",
                "mixer.wasm",
            ),
            deposit_amount_eth: read_optional_string("DEPOSIT_AMOUNT", "0.01"),
            participation_threshold: read_optional_narrow("PARTICIPATION_THRESHOLD", 2)?,
            create_deal_gas: read_optional_u64("CREATE_DEAL_GAS", 4_712_388)?,
            task_gas_limit: read_optional_u64("TASK_GAS_LIMIT", 4_712_388)?,
            task_gas_price: read_optional_u64("TASK_GAS_PRICE", 100_000_000)?,
            task_poll_interval_ms: read_optional_u64("TASK_POLL_INTERVAL_MS", 600)?,
            task_epoch_grace: read_optional_narrow("TASK_EPOCH_GRACE", 10)?,
            pub_key_retry_seconds: read_optional_u64("PUB_KEY_RETRY_SECONDS", 30)?,
            worker_enabled: read_optional_bool("WORKER_ENABLED", true),
            worker_poll_seconds: read_optional_i64("WORKER_POLL_SECONDS", 15)?,
            verify_deposits_before_deal: read_optional_bool("VERIFY_DEPOSITS_BEFORE_DEAL", true),
        })
    }

    /// Fixed deposit size every participant has to lock, in wei.
    pub fn deposit_amount_wei(&self) -> Result<U256> {
        parse_ether(self.deposit_amount_eth.trim()).map_err(|e| {
            CoordinatorError::Config(format!(
                "invalid DEPOSIT_AMOUNT `{}`: {e}",
                self.deposit_amount_eth
            ))
        })
    }
}

fn read_var(key: &str) -> std::result::Result<String, String> {
    env::var(key).map_err(|_| format!("missing required env var: {key}"))
}

fn read_optional_i64(key: &str, default: i64) -> std::result::Result<i64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<i64>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn read_optional_u64(key: &str, default: u64) -> std::result::Result<u64, String> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|e| format!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Reads an unsigned value that must fit `T` without truncation.
fn read_optional_narrow<T>(key: &str, default: T) -> std::result::Result<T, String>
where
    T: TryFrom<u64>,
    T::Error: std::fmt::Display,
{
    match env::var(key) {
        Ok(_) => {
            let wide = read_optional_u64(key, 0)?;
            T::try_from(wide).map_err(|e| format!("invalid {key}: {e}"))
        }
        Err(_) => Ok(default),
    }
}

fn read_optional_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn read_optional_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_dotenv_layers() {
    for path in [".env", "../.env"] {
        let _ = dotenvy::from_path_override(path);
    }
}
