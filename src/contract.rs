//! ERC20 calldata encoding and call-result decoding.
//!
//! Encoding is pure and stateless; nothing here touches the network. The
//! four selectors are the first four bytes of the keccak-256 hash of the
//! canonical method signature.

use alloy_primitives::{Address, Bytes, U256};

use crate::error::SyncError;

/// `balanceOf(address)`
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// `allowance(address,address)`
pub const ALLOWANCE_SELECTOR: [u8; 4] = [0xdd, 0x62, 0xed, 0x3e];
/// `approve(address,uint256)`
pub const APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];
/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

fn push_address(out: &mut Vec<u8>, address: Address) {
    // Addresses occupy the low 20 bytes of a 32-byte ABI word.
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(address.as_slice());
}

fn push_uint(out: &mut Vec<u8>, value: U256) {
    out.extend_from_slice(&value.to_be_bytes::<32>());
}

/// Calldata for `balanceOf(owner)`.
pub fn encode_balance_of(owner: Address) -> Bytes {
    let mut out = Vec::with_capacity(4 + 32);
    out.extend_from_slice(&BALANCE_OF_SELECTOR);
    push_address(&mut out, owner);
    out.into()
}

/// Calldata for `allowance(owner, spender)`.
pub fn encode_allowance(owner: Address, spender: Address) -> Bytes {
    let mut out = Vec::with_capacity(4 + 64);
    out.extend_from_slice(&ALLOWANCE_SELECTOR);
    push_address(&mut out, owner);
    push_address(&mut out, spender);
    out.into()
}

/// Calldata for `approve(spender, amount)`.
pub fn encode_approve(spender: Address, amount: U256) -> Bytes {
    let mut out = Vec::with_capacity(4 + 64);
    out.extend_from_slice(&APPROVE_SELECTOR);
    push_address(&mut out, spender);
    push_uint(&mut out, amount);
    out.into()
}

/// Calldata for `transfer(to, value)`.
pub fn encode_transfer(to: Address, value: U256) -> Bytes {
    let mut out = Vec::with_capacity(4 + 64);
    out.extend_from_slice(&TRANSFER_SELECTOR);
    push_address(&mut out, to);
    push_uint(&mut out, value);
    out.into()
}

/// Decode a call result that must be exactly one ABI-encoded uint256 word.
pub fn decode_uint(raw: &[u8]) -> Result<U256, SyncError> {
    if raw.len() != 32 {
        return Err(SyncError::Decode(format!(
            "expected a 32-byte uint word, got {} bytes",
            raw.len()
        )));
    }
    Ok(U256::from_be_slice(raw))
}
