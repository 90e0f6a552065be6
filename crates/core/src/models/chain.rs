use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Immutable per-chain context shared by every component of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainContext {
    /// Chain identifier reported by the node (e.g. `cosmoshub-4`).
    pub chain_id: String,
    /// Integer key used by every table, resolved from `chains`.
    pub chain_num: i32,
    /// Staking denomination (e.g. `uatom`).
    pub bond_denom: String,
    /// First height the chain produced.
    pub genesis_height: u64,
}

impl ChainContext {
    pub fn is_genesis(&self, height: u64) -> bool {
        height == self.genesis_height
    }
}

/// Chain-id to chain-number lookup, populated once at startup.
#[derive(Debug, Clone, Default)]
pub struct ChainDirectory {
    by_id: HashMap<String, i32>,
    by_num: HashMap<i32, String>,
}

impl ChainDirectory {
    pub fn from_rows(rows: impl IntoIterator<Item = (i32, String)>) -> Self {
        let mut directory = Self::default();
        for (num, id) in rows {
            directory.by_id.insert(id.clone(), num);
            directory.by_num.insert(num, id);
        }
        directory
    }

    pub fn number_of(&self, chain_id: &str) -> Option<i32> {
        self.by_id.get(chain_id).copied()
    }

    pub fn id_of(&self, chain_num: i32) -> Option<&str> {
        self.by_num.get(&chain_num).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_resolves_both_ways() {
        let dir = ChainDirectory::from_rows([(1, "cosmoshub-4".to_string()), (2, "osmosis-1".into())]);
        assert_eq!(dir.number_of("osmosis-1"), Some(2));
        assert_eq!(dir.id_of(1), Some("cosmoshub-4"));
        assert_eq!(dir.number_of("juno-1"), None);
        assert_eq!(dir.len(), 2);
    }
}
