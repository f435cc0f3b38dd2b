use crate::config::environment::AppConfig;
use crate::error::Result;
use crate::infra::InfraClients;
use crate::infra::artifacts::read_contract_address;
use crate::infra::ledger::Ledger;
use crate::infra::secret_network::SecretNetwork;
use crate::module::secret_task::model::EncryptionPubKey;
use crate::module::store::MixerStore;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<MixerStore>,
    pub infra: Option<InfraClients>,
    pub ledger: Arc<dyn Ledger>,
    pub secret_network: Arc<dyn SecretNetwork>,
    /// Held across the fetch so concurrent callers wait for one task.
    pub pub_key_cache: Arc<AsyncMutex<Option<EncryptionPubKey>>>,
    pub secret_contract_address: String,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        infra: Option<InfraClients>,
        ledger: Arc<dyn Ledger>,
        secret_network: Arc<dyn SecretNetwork>,
        secret_contract_address: String,
    ) -> Self {
        Self {
            config,
            store: Arc::new(MixerStore::default()),
            infra,
            ledger,
            secret_network,
            pub_key_cache: Arc::new(AsyncMutex::new(None)),
            secret_contract_address,
        }
    }
}

/// Explicit configuration wins over the deployment artifact.
pub fn resolve_secret_contract_address(config: &AppConfig) -> Result<String> {
    match &config.secret_contract_address {
        Some(address) => Ok(address.clone()),
        None => read_contract_address(&config.artifacts_dir, &config.secret_contract_filename),
    }
}
