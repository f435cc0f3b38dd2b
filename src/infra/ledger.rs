use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use ethers::abi::RawLog;
use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Filter, H256, U256, U64};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

abigen!(
    Mixer,
    r#"[
        function getParticipantBalance(address account) external view returns (uint256)
        function newDeal(uint256 depositInWei, address[] participants, uint256 nonce) external
        function lastExecutionBlockNumber() external view returns (uint256)
        function dealIntervalInBlocks() external view returns (uint256)
        event NewDeal(address indexed user, bytes32 indexed _dealId, uint256 _startTime, uint256 _depositInWei, uint256 _numParticipants, bool _success, string _err)
        event Distribute(bytes32 indexed _dealId, uint256 _individualAmountInWei, uint256 _nbTransfers, address[] _recipients)
    ]"#
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDealReceipt {
    pub deal_id: H256,
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerEvent {
    pub name: String,
    pub block_number: Option<u64>,
    pub tx_hash: Option<H256>,
    pub fields: BTreeMap<String, String>,
}

/// Reads and writes against the ledger hosting the mixer contract.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Account that signs operator transactions.
    fn operator(&self) -> Address;

    async fn participant_balance(&self, account: Address) -> Result<U256>;
    async fn block_number(&self) -> Result<u64>;
    async fn transaction_count(&self, account: Address) -> Result<U256>;
    async fn chain_id(&self) -> Result<u64>;

    /// Sends `newDeal` and waits for its receipt. `deal_id` is taken from the
    /// emitted `NewDeal` event.
    async fn new_deal(
        &self,
        deposit_amount: U256,
        participants: &[Address],
        nonce: U256,
        gas_limit: u64,
    ) -> Result<NewDealReceipt>;

    async fn last_execution_block_number(&self) -> Result<u64>;
    async fn deal_interval_in_blocks(&self) -> Result<u64>;

    async fn past_events(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<LedgerEvent>>;
}

/// Narrows a contract value to `u64`, failing instead of truncating.
pub(crate) fn to_u64(value: U256, what: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| CoordinatorError::Ledger(format!("{what} does not fit in u64: {value}")))
}

type OperatorClient = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EthersLedger {
    client: Arc<OperatorClient>,
    contract: Mixer<OperatorClient>,
    contract_address: Address,
}

impl EthersLedger {
    pub async fn connect(rpc_url: &str, private_key: &str, mixer_address: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| CoordinatorError::Ledger(format!("provider init failed: {e}")))?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| CoordinatorError::Ledger(format!("chain id lookup failed: {e}")))?;
        let wallet = private_key
            .parse::<LocalWallet>()
            .map_err(|e| CoordinatorError::Config(format!("invalid private key: {e}")))?
            .with_chain_id(to_u64(chain_id, "chain id")?);
        let contract_address = Address::from_str(mixer_address)
            .map_err(|e| CoordinatorError::Config(format!("invalid mixer address: {e}")))?;

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = Mixer::new(contract_address, client.clone());
        Ok(Self {
            client,
            contract,
            contract_address,
        })
    }
}

#[async_trait]
impl Ledger for EthersLedger {
    fn operator(&self) -> Address {
        self.client.address()
    }

    async fn participant_balance(&self, account: Address) -> Result<U256> {
        self.contract
            .get_participant_balance(account)
            .call()
            .await
            .map_err(|e| CoordinatorError::Ledger(format!("getParticipantBalance failed: {e}")))
    }

    async fn block_number(&self) -> Result<u64> {
        self.client
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| CoordinatorError::Ledger(format!("block number lookup failed: {e}")))
    }

    async fn transaction_count(&self, account: Address) -> Result<U256> {
        self.client
            .get_transaction_count(account, None)
            .await
            .map_err(|e| CoordinatorError::Ledger(format!("transaction count lookup failed: {e}")))
    }

    // The secret contract signs against the network id, not the EIP-155 chain id.
    async fn chain_id(&self) -> Result<u64> {
        let version = self
            .client
            .get_net_version()
            .await
            .map_err(|e| CoordinatorError::Ledger(format!("net version lookup failed: {e}")))?;
        version
            .trim()
            .parse::<u64>()
            .map_err(|e| CoordinatorError::Ledger(format!("invalid net version `{version}`: {e}")))
    }

    async fn new_deal(
        &self,
        deposit_amount: U256,
        participants: &[Address],
        nonce: U256,
        gas_limit: u64,
    ) -> Result<NewDealReceipt> {
        let call = self
            .contract
            .new_deal(deposit_amount, participants.to_vec(), nonce)
            .gas(gas_limit);
        let pending = call
            .send()
            .await
            .map_err(|e| CoordinatorError::Ledger(format!("newDeal call failed: {e}")))?;
        let tx_hash = pending.tx_hash();
        let receipt = pending
            .await
            .map_err(|e| CoordinatorError::Ledger(format!("tx confirmation failed: {e}")))?
            .ok_or_else(|| CoordinatorError::Ledger("missing transaction receipt".to_string()))?;

        if receipt.status != Some(U64::from(1u64)) {
            return Err(CoordinatorError::Ledger(format!(
                "newDeal reverted onchain: tx={tx_hash:#x}"
            )));
        }

        let signature = MIXER_ABI
            .event("NewDeal")
            .map_err(|e| CoordinatorError::Ledger(format!("NewDeal abi lookup failed: {e}")))?
            .signature();
        let deal_id = receipt
            .logs
            .iter()
            .filter(|log| log.address == self.contract_address)
            .find(|log| log.topics.first() == Some(&signature))
            .and_then(|log| log.topics.get(2).copied())
            .ok_or_else(|| {
                CoordinatorError::Ledger(format!("no NewDeal event in receipt of tx {tx_hash:#x}"))
            })?;

        Ok(NewDealReceipt {
            deal_id,
            tx_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
        })
    }

    async fn last_execution_block_number(&self) -> Result<u64> {
        let value = self
            .contract
            .last_execution_block_number()
            .call()
            .await
            .map_err(|e| {
                CoordinatorError::Ledger(format!("lastExecutionBlockNumber failed: {e}"))
            })?;
        to_u64(value, "lastExecutionBlockNumber")
    }

    async fn deal_interval_in_blocks(&self) -> Result<u64> {
        let value = self
            .contract
            .deal_interval_in_blocks()
            .call()
            .await
            .map_err(|e| CoordinatorError::Ledger(format!("dealIntervalInBlocks failed: {e}")))?;
        to_u64(value, "dealIntervalInBlocks")
    }

    async fn past_events(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<LedgerEvent>> {
        let event = MIXER_ABI
            .event(event_name)
            .map_err(|e| CoordinatorError::Ledger(format!("unknown event `{event_name}`: {e}")))?;
        let mut filter = Filter::new()
            .address(self.contract_address)
            .topic0(event.signature())
            .from_block(from_block);
        if let Some(to_block) = to_block {
            filter = filter.to_block(to_block);
        }

        let logs = self
            .client
            .get_logs(&filter)
            .await
            .map_err(|e| CoordinatorError::Ledger(format!("event query failed: {e}")))?;

        logs.into_iter()
            .map(|log| {
                let parsed = event
                    .parse_log(RawLog {
                        topics: log.topics.clone(),
                        data: log.data.to_vec(),
                    })
                    .map_err(|e| {
                        CoordinatorError::Ledger(format!("{event_name} decode failed: {e}"))
                    })?;
                Ok(LedgerEvent {
                    name: event_name.to_string(),
                    block_number: log.block_number.map(|n| n.as_u64()),
                    tx_hash: log.transaction_hash,
                    fields: parsed
                        .params
                        .into_iter()
                        .map(|p| (p.name, p.value.to_string()))
                        .collect(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_u64_rejects_oversized_values() {
        assert_eq!(to_u64(U256::from(42u64), "block").unwrap(), 42);
        let err = to_u64(U256::from(u64::MAX) + U256::one(), "block").unwrap_err();
        assert_eq!(err.code(), "LEDGER_ERROR");
    }
}
