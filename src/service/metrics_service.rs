use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

static DEPOSITS_REGISTERED: AtomicU64 = AtomicU64::new(0);
static DEPOSITS_DISCARDED: AtomicU64 = AtomicU64::new(0);
static DEALS_CREATED: AtomicU64 = AtomicU64::new(0);
static DEALS_EXECUTED: AtomicU64 = AtomicU64::new(0);
static TASK_FAILURES: AtomicU64 = AtomicU64::new(0);
static EPOCH_EXPIRATIONS: AtomicU64 = AtomicU64::new(0);
static KEY_FETCH_RETRIES: AtomicU64 = AtomicU64::new(0);

static TASK_DURATION_COUNT: AtomicU64 = AtomicU64::new(0);
static TASK_DURATION_TOTAL_MS: AtomicU64 = AtomicU64::new(0);

static LAST_ERROR_TS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub deposits_registered: u64,
    pub deposits_discarded: u64,
    pub deals_created: u64,
    pub deals_executed: u64,
    pub task_failures: u64,
    pub epoch_expirations: u64,
    pub key_fetch_retries: u64,
    pub task_duration_count: u64,
    pub task_duration_avg_ms: u64,
    pub last_error_ts: i64,
}

pub fn inc_deposits_registered() {
    DEPOSITS_REGISTERED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_deposits_discarded() {
    DEPOSITS_DISCARDED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_deals_created() {
    DEALS_CREATED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_deals_executed() {
    DEALS_EXECUTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_task_failures() {
    TASK_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_epoch_expirations() {
    EPOCH_EXPIRATIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_key_fetch_retries() {
    KEY_FETCH_RETRIES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_task_duration_ms(duration_ms: u64) {
    TASK_DURATION_COUNT.fetch_add(1, Ordering::Relaxed);
    TASK_DURATION_TOTAL_MS.fetch_add(duration_ms, Ordering::Relaxed);
}

pub fn set_last_error_ts(ts: i64) {
    LAST_ERROR_TS.store(ts, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    let task_count = TASK_DURATION_COUNT.load(Ordering::Relaxed);

    MetricsSnapshot {
        deposits_registered: DEPOSITS_REGISTERED.load(Ordering::Relaxed),
        deposits_discarded: DEPOSITS_DISCARDED.load(Ordering::Relaxed),
        deals_created: DEALS_CREATED.load(Ordering::Relaxed),
        deals_executed: DEALS_EXECUTED.load(Ordering::Relaxed),
        task_failures: TASK_FAILURES.load(Ordering::Relaxed),
        epoch_expirations: EPOCH_EXPIRATIONS.load(Ordering::Relaxed),
        key_fetch_retries: KEY_FETCH_RETRIES.load(Ordering::Relaxed),
        task_duration_count: task_count,
        task_duration_avg_ms: if task_count > 0 {
            TASK_DURATION_TOTAL_MS.load(Ordering::Relaxed) / task_count
        } else {
            0
        },
        last_error_ts: LAST_ERROR_TS.load(Ordering::Relaxed),
    }
}
