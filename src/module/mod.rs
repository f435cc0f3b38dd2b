pub mod deal;
pub mod deposit;
pub mod secret_task;
pub mod store;
