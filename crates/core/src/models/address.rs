//! Address encodings: bech32 account/operator/consensus forms and the
//! hex consensus address carried in blocks and commits.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bech32::{Bech32, Hrp};
use sha2::{Digest, Sha256};

use crate::error::{DomainError, DomainResult};

const OPERATOR_SUFFIX: &str = "valoper";
const CONSENSUS_SUFFIX: &str = "valcons";

/// Hex consensus address of a base64 ed25519 public key: `sha256(key)[..20]`.
pub fn consensus_hex_address(pubkey_b64: &str) -> DomainResult<String> {
    let key = STANDARD
        .decode(pubkey_b64)
        .map_err(|e| DomainError::InvalidAddress(format!("pubkey {pubkey_b64}: {e}")))?;
    let digest = Sha256::digest(&key);
    Ok(hex::encode_upper(&digest[..20]))
}

/// Account prefix of a bech32 address (`cosmosvaloper1..` -> `cosmos`).
pub fn account_prefix(address: &str) -> DomainResult<String> {
    let (hrp, _) = decode(address)?;
    let hrp = hrp.to_string();
    Ok(hrp
        .strip_suffix(OPERATOR_SUFFIX)
        .or_else(|| hrp.strip_suffix(CONSENSUS_SUFFIX))
        .unwrap_or(&hrp)
        .to_string())
}

/// Bech32 consensus address for the hex address, using the prefix of `operator`.
pub fn consensus_bech32_address(operator: &str, consensus_hex: &str) -> DomainResult<String> {
    let bytes = hex::decode(consensus_hex)
        .map_err(|e| DomainError::InvalidAddress(format!("{consensus_hex}: {e}")))?;
    let prefix = format!("{}{CONSENSUS_SUFFIX}", account_prefix(operator)?);
    encode(&prefix, &bytes)
}

/// Operator (`valoper`) form of an account address.
pub fn account_to_operator(account: &str) -> DomainResult<String> {
    let (hrp, data) = decode(account)?;
    encode(&format!("{hrp}{OPERATOR_SUFFIX}"), &data)
}

/// Account form of an operator (`valoper`) address.
pub fn operator_to_account(operator: &str) -> DomainResult<String> {
    let data = decode(operator)?.1;
    encode(&account_prefix(operator)?, &data)
}

fn decode(address: &str) -> DomainResult<(Hrp, Vec<u8>)> {
    bech32::decode(address).map_err(|e| DomainError::InvalidAddress(format!("{address}: {e}")))
}

fn encode(prefix: &str, data: &[u8]) -> DomainResult<String> {
    let hrp = Hrp::parse(prefix).map_err(|e| DomainError::InvalidAddress(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| DomainError::InvalidAddress(e.to_string()))
}
