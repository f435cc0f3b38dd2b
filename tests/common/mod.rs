#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::parse_ether;
use mixer_operator::app::AppState;
use mixer_operator::config::environment::AppConfig;
use mixer_operator::error::{CoordinatorError, Result};
use mixer_operator::infra::InfraClients;
use mixer_operator::infra::ledger::{Ledger, LedgerEvent, NewDealReceipt};
use mixer_operator::infra::secret_network::SecretNetwork;
use mixer_operator::module::deposit::schema::RegisterDepositRequest;
use mixer_operator::module::secret_task::model::{SecretTask, TaskKeyPair};
use mixer_operator::module::secret_task::schema::{TaskRequest, TaskStatus};
use mixer_operator::service::hash_service::compute_deal_id;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const CHAIN_ID: u64 = 4447;

pub fn test_config() -> AppConfig {
    AppConfig {
        rust_env: "test".to_string(),
        mongodb_url: None,
        mongodb_database: None,
        eth_rpc_url: None,
        private_key: None,
        mixer_contract_address: None,
        enigma_url: "http://127.0.0.1:3346".to_string(),
        enigma_contract_address: None,
        secret_contract_address: Some("0x00000000000000000000000000000000000000ee".to_string()),
        artifacts_dir: "test".to_string(),
        secret_contract_filename: "mixer.wasm".to_string(),
        deposit_amount_eth: "0.01".to_string(),
        participation_threshold: 3,
        create_deal_gas: 4_712_388,
        task_gas_limit: 4_712_388,
        task_gas_price: 100_000_000,
        task_poll_interval_ms: 1,
        task_epoch_grace: 10,
        pub_key_retry_seconds: 1,
        worker_enabled: false,
        worker_poll_seconds: 1,
        verify_deposits_before_deal: false,
    }
}

pub fn deposit_amount() -> U256 {
    parse_ether("0.01").unwrap()
}

pub fn sender(n: u64) -> Address {
    Address::from_low_u64_be(0x1000 + n)
}

pub fn deposit_request(n: u64) -> RegisterDepositRequest {
    RegisterDepositRequest {
        sender: sender(n),
        amount: deposit_amount(),
        pub_key: Bytes::from(vec![n as u8; 64]),
        enc_recipient: Bytes::from(vec![n as u8 + 1; 32]),
        signature: Bytes::from(vec![n as u8 + 2; 65]),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewDealMode {
    Confirm,
    Fail,
    WrongDealId,
}

pub struct MockLedger {
    pub operator: Address,
    pub balances: Mutex<HashMap<Address, U256>>,
    pub block_number: AtomicU64,
    pub transaction_count: AtomicU64,
    pub last_execution_block_number: AtomicU64,
    pub deal_interval_in_blocks: AtomicU64,
    pub new_deal_mode: Mutex<NewDealMode>,
    pub new_deal_calls: AtomicU32,
    /// `NewDeal` events emitted by confirmed `newDeal` calls.
    pub new_deal_events: Mutex<Vec<LedgerEvent>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            operator: Address::from_low_u64_be(0xabc),
            balances: Mutex::new(HashMap::new()),
            block_number: AtomicU64::new(100),
            transaction_count: AtomicU64::new(7),
            last_execution_block_number: AtomicU64::new(50),
            deal_interval_in_blocks: AtomicU64::new(10),
            new_deal_mode: Mutex::new(NewDealMode::Confirm),
            new_deal_calls: AtomicU32::new(0),
            new_deal_events: Mutex::new(Vec::new()),
        }
    }

    pub fn set_balance(&self, account: Address, balance: U256) {
        self.balances.lock().unwrap().insert(account, balance);
    }

    pub fn set_new_deal_mode(&self, mode: NewDealMode) {
        *self.new_deal_mode.lock().unwrap() = mode;
    }
}

#[async_trait]
impl Ledger for MockLedger {
    fn operator(&self) -> Address {
        self.operator
    }

    async fn participant_balance(&self, account: Address) -> Result<U256> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&account)
            .copied()
            .unwrap_or_default())
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.block_number.load(Ordering::SeqCst))
    }

    async fn transaction_count(&self, _account: Address) -> Result<U256> {
        Ok(U256::from(self.transaction_count.load(Ordering::SeqCst)))
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(CHAIN_ID)
    }

    async fn new_deal(
        &self,
        deposit_amount: U256,
        participants: &[Address],
        nonce: U256,
        _gas_limit: u64,
    ) -> Result<NewDealReceipt> {
        self.new_deal_calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.new_deal_mode.lock().unwrap();
        match mode {
            NewDealMode::Fail => Err(CoordinatorError::Ledger("newDeal reverted".to_string())),
            NewDealMode::Confirm | NewDealMode::WrongDealId => {
                self.transaction_count.fetch_add(1, Ordering::SeqCst);
                let deal_id = if mode == NewDealMode::Confirm {
                    compute_deal_id(deposit_amount, participants, self.operator, nonce)?
                } else {
                    H256::repeat_byte(0x42)
                };
                let block_number = self.block_number.load(Ordering::SeqCst);
                let mut fields = BTreeMap::new();
                fields.insert("_dealId".to_string(), hex::encode(deal_id.as_bytes()));
                self.new_deal_events.lock().unwrap().push(LedgerEvent {
                    name: "NewDeal".to_string(),
                    block_number: Some(block_number),
                    tx_hash: Some(H256::repeat_byte(0x11)),
                    fields,
                });
                Ok(NewDealReceipt {
                    deal_id,
                    tx_hash: H256::repeat_byte(0x11),
                    block_number: Some(block_number),
                })
            }
        }
    }

    async fn last_execution_block_number(&self) -> Result<u64> {
        Ok(self.last_execution_block_number.load(Ordering::SeqCst))
    }

    async fn deal_interval_in_blocks(&self) -> Result<u64> {
        Ok(self.deal_interval_in_blocks.load(Ordering::SeqCst))
    }

    async fn past_events(
        &self,
        event_name: &str,
        from_block: u64,
        _to_block: Option<u64>,
    ) -> Result<Vec<LedgerEvent>> {
        if event_name == "NewDeal" {
            return Ok(self
                .new_deal_events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.block_number.unwrap_or_default() >= from_block)
                .cloned()
                .collect());
        }
        let mut fields = BTreeMap::new();
        fields.insert("_nbTransfers".to_string(), "3".to_string());
        Ok(vec![LedgerEvent {
            name: event_name.to_string(),
            block_number: Some(from_block),
            tx_hash: Some(H256::repeat_byte(0x22)),
            fields,
        }])
    }
}

/// Scriptable secret network. Status polls pop `status_script` and fall back
/// to `default_status` once it is empty.
pub struct MockSecretNetwork {
    pub epoch: AtomicU64,
    pub advance_epoch_on_sample: AtomicBool,
    pub status_script: Mutex<VecDeque<TaskStatus>>,
    pub default_status: Mutex<TaskStatus>,
    pub failure_reason: String,
    pub failing_submissions: AtomicU32,
    pub submitted: Mutex<Vec<TaskRequest>>,
    pub status_calls: AtomicU32,
    pub epoch_calls: AtomicU32,
    pub rotations: AtomicU32,
    next_nonce: AtomicU64,
    key_pairs: Mutex<HashMap<(Address, u64), TaskKeyPair>>,
}

impl MockSecretNetwork {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU64::new(1),
            advance_epoch_on_sample: AtomicBool::new(false),
            status_script: Mutex::new(VecDeque::new()),
            default_status: Mutex::new(TaskStatus::Success),
            failure_reason: "invalid deposit signature".to_string(),
            failing_submissions: AtomicU32::new(0),
            submitted: Mutex::new(Vec::new()),
            status_calls: AtomicU32::new(0),
            epoch_calls: AtomicU32::new(0),
            rotations: AtomicU32::new(0),
            next_nonce: AtomicU64::new(0),
            key_pairs: Mutex::new(HashMap::new()),
        }
    }

    pub fn script_statuses(&self, statuses: &[TaskStatus]) {
        self.status_script.lock().unwrap().extend(statuses.iter().copied());
    }

    pub fn set_default_status(&self, status: TaskStatus) {
        *self.default_status.lock().unwrap() = status;
    }

    pub fn submitted_fns(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.task_fn.clone())
            .collect()
    }
}

#[async_trait]
impl SecretNetwork for MockSecretNetwork {
    async fn submit_task(&self, request: TaskRequest) -> Result<SecretTask> {
        if self
            .failing_submissions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CoordinatorError::SecretNetwork(
                "gateway unavailable".to_string(),
            ));
        }

        let nonce = self.next_nonce.fetch_add(1, Ordering::SeqCst);
        let generation = self.rotations.load(Ordering::SeqCst);
        self.key_pairs.lock().unwrap().insert(
            (request.sender, nonce),
            TaskKeyPair {
                public_key: format!("pub-{generation}"),
                private_key: format!("priv-{generation}"),
            },
        );
        self.submitted.lock().unwrap().push(request);
        Ok(SecretTask {
            task_id: format!("task-{nonce}"),
            eth_status: TaskStatus::Pending,
            nonce,
            encrypted_output: None,
            decrypted_output: None,
            worker_encryption_key: None,
            transaction_hash: None,
        })
    }

    async fn task_status(&self, task: &SecretTask) -> Result<SecretTask> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .status_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*self.default_status.lock().unwrap());
        let mut updated = task.clone();
        updated.eth_status = status;
        if status == TaskStatus::Success {
            updated.transaction_hash = Some(H256::repeat_byte(0x33));
        }
        Ok(updated)
    }

    async fn task_result(&self, task: &SecretTask) -> Result<SecretTask> {
        let mut updated = task.clone();
        updated.encrypted_output = Some(format!("enc-{}", task.task_id));
        updated.worker_encryption_key = Some("worker-key".to_string());
        Ok(updated)
    }

    async fn decrypt_task_result(&self, task: &SecretTask) -> Result<SecretTask> {
        let mut updated = task.clone();
        updated.decrypted_output = Some(match task.eth_status {
            TaskStatus::Failed => hex::encode(&self.failure_reason),
            _ => "00".to_string(),
        });
        Ok(updated)
    }

    async fn epoch_size(&self) -> Result<u64> {
        self.epoch_calls.fetch_add(1, Ordering::SeqCst);
        if self.advance_epoch_on_sample.load(Ordering::SeqCst) {
            Ok(self.epoch.fetch_add(1, Ordering::SeqCst))
        } else {
            Ok(self.epoch.load(Ordering::SeqCst))
        }
    }

    async fn obtain_task_key_pair(&self, sender: Address, nonce: u64) -> Result<TaskKeyPair> {
        self.key_pairs
            .lock()
            .unwrap()
            .get(&(sender, nonce))
            .cloned()
            .ok_or_else(|| CoordinatorError::SecretNetwork("unknown task key pair".to_string()))
    }

    async fn rotate_task_key_pair(&self) -> Result<()> {
        self.rotations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub ledger: Arc<MockLedger>,
    pub network: Arc<MockSecretNetwork>,
}

pub fn test_harness() -> TestHarness {
    test_harness_with(test_config())
}

pub fn test_harness_with(config: AppConfig) -> TestHarness {
    let ledger = Arc::new(MockLedger::new());
    let network = Arc::new(MockSecretNetwork::new());
    let secret_contract_address = config.secret_contract_address.clone().unwrap_or_default();
    let state = AppState::new(
        config,
        None,
        ledger.clone(),
        network.clone(),
        secret_contract_address,
    );
    TestHarness {
        state,
        ledger,
        network,
    }
}

/// Copy of `h.state` sharing its store whose MongoDB write-through always
/// fails, because nothing listens on the configured port.
pub async fn unreachable_store_state(h: &TestHarness) -> AppState {
    let client = mongodb::Client::with_uri_str(
        "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=100&connectTimeoutMS=100",
    )
    .await
    .unwrap();
    let mut state = h.state.clone();
    state.infra = Some(InfraClients {
        mongo_db: client.database("mixer_operator_test"),
    });
    state
}

/// Funds `n` senders with exactly one deposit each and registers them.
pub async fn register_funded_deposits(h: &TestHarness, senders: std::ops::RangeInclusive<u64>) {
    for n in senders {
        h.ledger.set_balance(sender(n), deposit_amount());
        mixer_operator::service::deposit_service::register_deposit(&h.state, deposit_request(n))
            .await
            .unwrap();
    }
}
