pub mod deal_service;
pub mod deposit_service;
pub mod hash_service;
pub mod metrics_service;
pub mod mix_worker_service;
pub mod secret_task_service;
