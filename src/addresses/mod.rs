//! Wallet address book
//!
//! Holds the addresses a wallet considers its own. Hashes and derivation
//! indices are both unique; entries change only through discovery, explicit
//! user additions, or settings updates, and are never dropped implicitly.

pub mod derivation;

pub use derivation::{AddressDeriver, DerivedAddress, Ed25519Deriver, WalletSeed};

use crate::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub hash: String,
    pub derivation_index: u32,
    pub group: u8,
    pub is_default: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl Address {
    pub fn from_derived(derived: &DerivedAddress) -> Self {
        Self {
            hash: derived.hash.clone(),
            derivation_index: derived.index,
            group: derived.group,
            is_default: false,
            label: None,
            color: None,
        }
    }
}

/// User-editable address settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSettings {
    pub label: Option<String>,
    pub color: Option<String>,
    pub is_default: bool,
}

#[derive(Debug, Default, Clone)]
pub struct AddressBook {
    by_hash: HashMap<String, Address>,
    by_index: BTreeMap<u32, String>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted addresses, rejecting duplicates
    pub fn from_addresses(addresses: impl IntoIterator<Item = Address>) -> SyncResult<Self> {
        let mut book = Self::new();
        for address in addresses {
            book.insert(address)?;
        }
        book.ensure_default();
        Ok(book)
    }

    /// Insert an address; re-inserting an identical `(hash, index)` pair is a no-op
    ///
    /// Returns whether the address was new.
    pub fn insert(&mut self, address: Address) -> SyncResult<bool> {
        if let Some(existing) = self.by_hash.get(&address.hash) {
            if existing.derivation_index == address.derivation_index {
                return Ok(false);
            }
            return Err(SyncError::InvalidState(format!(
                "address {} already registered at index {}",
                address.hash, existing.derivation_index
            )));
        }
        if let Some(owner) = self.by_index.get(&address.derivation_index) {
            return Err(SyncError::InvalidState(format!(
                "derivation index {} already used by {}",
                address.derivation_index, owner
            )));
        }

        if address.is_default {
            self.clear_default();
        }
        self.by_index
            .insert(address.derivation_index, address.hash.clone());
        self.by_hash.insert(address.hash.clone(), address);
        Ok(true)
    }

    /// Register addresses confirmed by discovery; returns how many were new
    pub fn insert_discovered(&mut self, derived: &[DerivedAddress]) -> SyncResult<usize> {
        let mut added = 0;
        for d in derived {
            if self.insert(Address::from_derived(d))? {
                added += 1;
            }
        }
        self.ensure_default();
        Ok(added)
    }

    /// Derive and add the next unused address, optionally constrained to a group
    pub fn add_user_address(
        &mut self,
        deriver: &dyn AddressDeriver,
        seed: &WalletSeed,
        group: Option<u8>,
    ) -> SyncResult<Address> {
        let mut index = self.next_free_index();
        let derived = loop {
            if !self.by_index.contains_key(&index) {
                let candidate = deriver.derive(seed, index);
                if group.map_or(true, |g| g == candidate.group) {
                    break candidate;
                }
            }
            index = index
                .checked_add(1)
                .ok_or_else(|| {
                    SyncError::InvalidState("derivation index space exhausted".to_string())
                })?;
        };

        let address = Address::from_derived(&derived);
        self.insert(address)?;
        self.ensure_default();
        self.get(&derived.hash)
            .cloned()
            .ok_or_else(|| SyncError::internal("address vanished after insert"))
    }

    pub fn update_settings(&mut self, hash: &str, settings: AddressSettings) -> SyncResult<()> {
        if !self.by_hash.contains_key(hash) {
            return Err(SyncError::not_found(format!("address {}", hash)));
        }
        if settings.is_default {
            self.clear_default();
        }
        if let Some(address) = self.by_hash.get_mut(hash) {
            address.label = settings.label;
            address.color = settings.color;
            address.is_default = settings.is_default;
        }
        self.ensure_default();
        Ok(())
    }

    /// Explicit removal; the only way an address leaves the book
    pub fn remove(&mut self, hash: &str) -> Option<Address> {
        let removed = self.by_hash.remove(hash)?;
        self.by_index.remove(&removed.derivation_index);
        self.ensure_default();
        Some(removed)
    }

    pub fn get(&self, hash: &str) -> Option<&Address> {
        self.by_hash.get(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Address hashes in derivation order
    pub fn hashes(&self) -> Vec<String> {
        self.by_index.values().cloned().collect()
    }

    /// Addresses in derivation order
    pub fn addresses(&self) -> Vec<Address> {
        self.by_index
            .values()
            .filter_map(|hash| self.by_hash.get(hash).cloned())
            .collect()
    }

    pub fn used_indices(&self) -> BTreeSet<u32> {
        self.by_index.keys().copied().collect()
    }

    /// Lowest index not yet in the book
    pub fn next_free_index(&self) -> u32 {
        let mut expected = 0u32;
        for index in self.by_index.keys() {
            if *index != expected {
                break;
            }
            expected += 1;
        }
        expected
    }

    pub fn default_address(&self) -> Option<&Address> {
        self.by_hash.values().find(|a| a.is_default)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    fn clear_default(&mut self) {
        for address in self.by_hash.values_mut() {
            address.is_default = false;
        }
    }

    /// Exactly one default while the book is non-empty: the lowest index wins
    fn ensure_default(&mut self) {
        if self.by_hash.values().any(|a| a.is_default) {
            return;
        }
        if let Some(first) = self.by_index.values().next().cloned() {
            if let Some(address) = self.by_hash.get_mut(&first) {
                address.is_default = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived(index: u32) -> DerivedAddress {
        DerivedAddress {
            hash: format!("addr-{}", index),
            index,
            group: (index % 4) as u8,
        }
    }

    #[test]
    fn duplicate_hash_or_index_is_rejected() {
        let mut book = AddressBook::new();
        assert!(book.insert(Address::from_derived(&derived(0))).unwrap());
        assert!(!book.insert(Address::from_derived(&derived(0))).unwrap());

        let mut clash = Address::from_derived(&derived(0));
        clash.hash = "other".to_string();
        assert!(book.insert(clash).is_err());

        let mut moved = Address::from_derived(&derived(0));
        moved.derivation_index = 9;
        assert!(book.insert(moved).is_err());
    }

    #[test]
    fn first_discovered_address_becomes_default() {
        let mut book = AddressBook::new();
        let added = book
            .insert_discovered(&[derived(1), derived(0), derived(2)])
            .unwrap();
        assert_eq!(added, 3);
        assert_eq!(book.default_address().unwrap().derivation_index, 0);
        assert_eq!(book.hashes(), vec!["addr-0", "addr-1", "addr-2"]);
    }

    #[test]
    fn changing_default_keeps_exactly_one() {
        let mut book = AddressBook::new();
        book.insert_discovered(&[derived(0), derived(1)]).unwrap();
        book.update_settings(
            "addr-1",
            AddressSettings {
                label: Some("savings".to_string()),
                color: Some("#00ff00".to_string()),
                is_default: true,
            },
        )
        .unwrap();

        let defaults: Vec<_> = book.addresses().into_iter().filter(|a| a.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].hash, "addr-1");
        assert_eq!(defaults[0].label.as_deref(), Some("savings"));
    }

    #[test]
    fn next_free_index_fills_gaps() {
        let mut book = AddressBook::new();
        book.insert_discovered(&[derived(0), derived(1), derived(3)]).unwrap();
        assert_eq!(book.next_free_index(), 2);
    }

    #[test]
    fn user_address_respects_requested_group() {
        let deriver = Ed25519Deriver::new(4);
        let seed = WalletSeed::new(vec![9u8; 32]);
        let mut book = AddressBook::new();

        let address = book.add_user_address(&deriver, &seed, Some(2)).unwrap();
        assert_eq!(address.group, 2);
        assert!(book.contains(&address.hash));
        assert_eq!(deriver.derive(&seed, address.derivation_index).hash, address.hash);
    }

    #[test]
    fn settings_update_for_unknown_address_fails() {
        let mut book = AddressBook::new();
        assert!(book.update_settings("missing", AddressSettings::default()).is_err());
    }
}
