// 🏪 Merchant Registry
// The Merchants allow-list: exact, case-sensitive names

use super::{add_names, list_names, remove_name, ReferenceList};
use crate::error::Result;
use rusqlite::Connection;
use std::collections::HashSet;

/// Borrowed view over the Merchants table of the setup database
pub struct MerchantRegistry<'conn> {
    conn: &'conn Connection,
}

impl<'conn> MerchantRegistry<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        MerchantRegistry { conn }
    }

    /// All merchant names, sorted
    pub fn names(&self) -> Result<Vec<String>> {
        list_names(self.conn, ReferenceList::Merchants)
    }

    pub fn name_set(&self) -> Result<HashSet<String>> {
        Ok(self.names()?.into_iter().collect())
    }

    /// Returns true if the name was new
    pub fn add(&self, name: &str) -> Result<bool> {
        Ok(add_names(self.conn, ReferenceList::Merchants, [name])? > 0)
    }

    /// Add many names in one transaction; duplicates, blanks and names
    /// already registered are skipped. Returns how many were new.
    pub fn add_all<I, S>(&self, names: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        add_names(self.conn, ReferenceList::Merchants, names)
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        remove_name(self.conn, ReferenceList::Merchants, name)
    }
}
