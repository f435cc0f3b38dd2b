use crate::error::{CoordinatorError, Result};
use ethers::abi::{Token, encode_packed};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use sha2::{Digest, Sha256};

pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// Identity of a signed deposit payload: `sha256(sender || signature)`.
pub fn deposit_id(sender: &Address, signature: &Bytes) -> String {
    let mut preimage = Vec::with_capacity(20 + signature.len());
    preimage.extend_from_slice(sender.as_bytes());
    preimage.extend_from_slice(signature.as_ref());
    sha256_hex(&preimage)
}

/// `keccak256(abi.encodePacked(uint256, address[], address, uint256))`, the
/// same value the mixer contract emits as `_dealId`.
pub fn compute_deal_id(
    deposit_amount: U256,
    participants: &[Address],
    operator: Address,
    nonce: U256,
) -> Result<H256> {
    let packed = encode_packed(&[
        Token::Uint(deposit_amount),
        Token::Array(participants.iter().copied().map(Token::Address).collect()),
        Token::Address(operator),
        Token::Uint(nonce),
    ])
    .map_err(|e| CoordinatorError::InvalidDeposit(format!("deal id encoding failed: {e}")))?;
    Ok(H256::from(keccak256(packed)))
}
