//! Two-way lookup between asset codes and on-chain addresses.

use std::collections::HashMap;

/// Code ↔ address table for one chain.
///
/// Both directions are kept in sync on every insert. Address lookups
/// are case-insensitive since EVM addresses arrive checksummed or not.
#[derive(Debug, Clone, Default)]
pub struct CodeAddressMap {
    by_code: HashMap<String, String>,
    by_address: HashMap<String, String>,
}

impl CodeAddressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair, evicting any previous mapping of either side.
    pub fn insert(&mut self, code: impl Into<String>, address: impl Into<String>) {
        let code = code.into();
        let address = address.into();
        let address_key = address.to_lowercase();

        if let Some(old_address) = self.by_code.remove(&code) {
            self.by_address.remove(&old_address.to_lowercase());
        }
        if let Some(old_code) = self.by_address.remove(&address_key) {
            self.by_code.remove(&old_code);
        }

        self.by_address.insert(address_key, code.clone());
        self.by_code.insert(code, address);
    }

    pub fn address_of(&self, code: &str) -> Option<&str> {
        self.by_code.get(code).map(String::as_str)
    }

    pub fn code_of(&self, address: &str) -> Option<&str> {
        self.by_address
            .get(&address.to_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

impl<C, A> FromIterator<(C, A)> for CodeAddressMap
where
    C: Into<String>,
    A: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (C, A)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (code, address) in iter {
            map.insert(code, address);
        }
        map
    }
}
