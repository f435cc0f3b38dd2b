use crate::app::AppState;
use crate::error::{CoordinatorError, Result};
use crate::module::deposit::crud;
use crate::module::deposit::model::Deposit;
use crate::module::deposit::schema::RegisterDepositRequest;
use crate::service::metrics_service;
use ethers::types::{Address, U256};
use tracing::{info, warn};

const SIGNATURE_LEN: usize = 65;

/// Fails when the sender's balance locked in the mixer contract is below
/// `claimed`.
pub async fn verify_amount(state: &AppState, sender: Address, claimed: U256) -> Result<()> {
    let balance = state.ledger.participant_balance(sender).await?;
    if balance < claimed {
        return Err(CoordinatorError::InsufficientBalance {
            sender,
            balance,
            amount: claimed,
        });
    }
    Ok(())
}

pub async fn register_deposit(state: &AppState, req: RegisterDepositRequest) -> Result<Deposit> {
    validate_shape(state, &req)?;

    if let Err(e) = verify_amount(state, req.sender, req.amount).await {
        warn!(sender = %format!("{:#x}", req.sender), code = e.code(), error = %e, "deposit rejected");
        return Err(e);
    }

    let deposit = crud::insert_deposit(state, req).await?;
    metrics_service::inc_deposits_registered();
    info!(
        deposit_id = %deposit.deposit_id,
        sender = %format!("{:#x}", deposit.sender),
        amount = %deposit.amount,
        "deposit registered"
    );
    Ok(deposit)
}

/// Configured deposit size in wei. Every deposit of a deal must carry exactly
/// this amount.
pub fn get_deposit_amount(state: &AppState, deposits: &[Deposit]) -> Result<U256> {
    let expected = state.config.deposit_amount_wei()?;
    if let Some(mismatch) = deposits.iter().find(|d| d.amount != expected) {
        return Err(CoordinatorError::DepositAmountMismatch {
            expected,
            actual: mismatch.amount,
        });
    }
    Ok(expected)
}

fn validate_shape(state: &AppState, req: &RegisterDepositRequest) -> Result<()> {
    if req.signature.len() != SIGNATURE_LEN {
        return Err(CoordinatorError::InvalidDeposit(format!(
            "signature must be {SIGNATURE_LEN} bytes, got {}",
            req.signature.len()
        )));
    }
    if req.pub_key.is_empty() {
        return Err(CoordinatorError::InvalidDeposit(
            "pub_key is required".to_string(),
        ));
    }
    if req.enc_recipient.is_empty() {
        return Err(CoordinatorError::InvalidDeposit(
            "enc_recipient is required".to_string(),
        ));
    }
    let expected = state.config.deposit_amount_wei()?;
    if req.amount != expected {
        return Err(CoordinatorError::InvalidDeposit(format!(
            "amount must be {expected} wei, got {}",
            req.amount
        )));
    }
    Ok(())
}
