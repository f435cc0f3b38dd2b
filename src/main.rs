use mixer_operator::app::{AppState, resolve_secret_contract_address};
use mixer_operator::config::db::MongoConfig;
use mixer_operator::config::environment::AppConfig;
use mixer_operator::infra::enigma::EnigmaRpcClient;
use mixer_operator::infra::init_infra;
use mixer_operator::infra::ledger::EthersLedger;
use mixer_operator::module::store;
use mixer_operator::service::mix_worker_service;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_logging();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "config error");
            std::process::exit(1);
        }
    };

    let (Some(rpc_url), Some(private_key), Some(mixer_address)) = (
        config.eth_rpc_url.clone(),
        config.private_key.clone(),
        config.mixer_contract_address.clone(),
    ) else {
        error!("ETH_RPC_URL, PRIVATE_KEY and MIXER_CONTRACT_ADDRESS are required");
        std::process::exit(1);
    };

    let secret_contract_address = match resolve_secret_contract_address(&config) {
        Ok(a) => a,
        Err(e) => {
            error!(code = e.code(), error = %e, "secret contract address unavailable");
            std::process::exit(1);
        }
    };

    let ledger = match EthersLedger::connect(&rpc_url, &private_key, &mixer_address).await {
        Ok(l) => l,
        Err(e) => {
            error!(code = e.code(), error = %e, "ledger init failed");
            std::process::exit(1);
        }
    };

    let secret_network = match EnigmaRpcClient::new(
        &config.enigma_url,
        Some(&rpc_url),
        config.enigma_contract_address.as_deref(),
    ) {
        Ok(c) => c,
        Err(e) => {
            error!(code = e.code(), error = %e, "secret network client init failed");
            std::process::exit(1);
        }
    };

    let infra = match init_infra(MongoConfig::from_app(&config).as_ref()).await {
        Ok(i) => i,
        Err(e) => {
            warn!(error = %e, "infra init failed; running without persistence");
            None
        }
    };

    info!(
        env = %config.rust_env,
        mixer_contract = %mixer_address,
        secret_contract = %secret_contract_address,
        enigma_url = %config.enigma_url,
        persistence = infra.is_some(),
        "mixer-operator started"
    );

    let state = AppState::new(
        config,
        infra,
        Arc::new(ledger),
        Arc::new(secret_network),
        secret_contract_address,
    );
    if let Err(e) = store::hydrate(&state).await {
        error!(code = e.code(), error = %e, "store hydration failed");
        std::process::exit(1);
    }

    if !state.config.worker_enabled {
        info!("mix worker disabled");
        return;
    }
    if let Err(e) = mix_worker_service::run_worker(state).await {
        error!(error = %e, "mix worker exited");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
