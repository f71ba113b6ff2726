// 💳 Card Scheme Registry

use super::{add_names, list_names, remove_name, ReferenceList};
use crate::error::Result;
use rusqlite::Connection;
use std::collections::HashSet;

pub struct CardSchemeRegistry<'conn> {
    conn: &'conn Connection,
}

impl<'conn> CardSchemeRegistry<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        CardSchemeRegistry { conn }
    }

    pub fn names(&self) -> Result<Vec<String>> {
        list_names(self.conn, ReferenceList::CardSchemes)
    }

    pub fn name_set(&self) -> Result<HashSet<String>> {
        Ok(self.names()?.into_iter().collect())
    }

    pub fn add(&self, name: &str) -> Result<bool> {
        Ok(add_names(self.conn, ReferenceList::CardSchemes, [name])? > 0)
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        remove_name(self.conn, ReferenceList::CardSchemes, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Storage;

    #[test]
    fn test_card_schemes_are_distinct() {
        let storage = Storage::open_in_memory().unwrap();
        let schemes = CardSchemeRegistry::new(storage.setup());

        assert!(schemes.add("VISA").unwrap());
        assert!(schemes.add("MC").unwrap());
        assert!(!schemes.add("VISA").unwrap());

        assert_eq!(schemes.names().unwrap(), vec!["MC", "VISA"]);
        assert!(schemes.remove("MC").unwrap());
        assert_eq!(schemes.name_set().unwrap().len(), 1);
    }
}
