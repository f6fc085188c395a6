//! Account credential file: one `address,private_key` pair per line.

use std::collections::HashSet;
use std::fs;

use ethers::signers::Signer;
use ethers::types::Address;

use crate::sweep::error::SweepError;
use crate::sweep::rpc::parse_signing_key;
use crate::sweep::types::AccountCredential;

pub fn load_wallets(path: &str) -> Result<Vec<AccountCredential>, SweepError> {
    let text = fs::read_to_string(path)
        .map_err(|e| SweepError::WalletFile(format!("{}: {}", path, e)))?;
    let wallets = parse_wallets(&text)?;
    log::info!("Loaded {} wallets from {}", wallets.len(), path);
    Ok(wallets)
}

/// Malformed lines are skipped with a warning; duplicates keep the first entry.
pub fn parse_wallets(text: &str) -> Result<Vec<AccountCredential>, SweepError> {
    let mut seen = HashSet::new();
    let mut wallets = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok(cred) => {
                if seen.insert(cred.address) {
                    wallets.push(cred);
                } else {
                    log::warn!("Line {}: duplicate wallet {:?} ignored", line_no + 1, cred.address);
                }
            }
            Err(reason) => log::warn!("Line {}: skipped, {}", line_no + 1, reason),
        }
    }

    if wallets.is_empty() {
        return Err(SweepError::NoValidAccounts);
    }
    Ok(wallets)
}

fn parse_line(line: &str) -> Result<AccountCredential, String> {
    let (address, key) = line
        .split_once(',')
        .ok_or_else(|| "expected 'address,private_key'".to_string())?;
    let address = address
        .trim()
        .parse::<Address>()
        .map_err(|e| format!("invalid address: {}", e))?;
    let key = key.trim();
    let wallet = parse_signing_key(key).map_err(|e| e.to_string())?;
    if wallet.address() != address {
        return Err(format!("key does not belong to {:?}", address));
    }
    Ok(AccountCredential::new(address, key))
}
