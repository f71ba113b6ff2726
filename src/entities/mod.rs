// Reference Lists - Merchants & Card Schemes
//
// Allow-lists consulted by ReferenceFilter on the transaction path.
// Each list is a set of distinct names in the setup database:
// - adding a name that already exists is a no-op
// - removing a name never touches stored transactions

use crate::error::Result;
use rusqlite::{params, Connection};

pub mod card_scheme;
pub mod merchant;

pub use card_scheme::CardSchemeRegistry;
pub use merchant::MerchantRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceList {
    Merchants,
    CardSchemes,
}

impl ReferenceList {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceList::Merchants => "Merchants",
            ReferenceList::CardSchemes => "CardSchemes",
        }
    }

    fn select_sql(&self) -> &'static str {
        match self {
            ReferenceList::Merchants => "SELECT name FROM Merchants ORDER BY name",
            ReferenceList::CardSchemes => "SELECT name FROM CardSchemes ORDER BY name",
        }
    }

    fn insert_sql(&self) -> &'static str {
        match self {
            ReferenceList::Merchants => "INSERT OR IGNORE INTO Merchants (name) VALUES (?1)",
            ReferenceList::CardSchemes => "INSERT OR IGNORE INTO CardSchemes (name) VALUES (?1)",
        }
    }

    fn delete_sql(&self) -> &'static str {
        match self {
            ReferenceList::Merchants => "DELETE FROM Merchants WHERE name = ?1",
            ReferenceList::CardSchemes => "DELETE FROM CardSchemes WHERE name = ?1",
        }
    }
}

// ============================================================================
// SHARED OPERATIONS
// ============================================================================

pub(crate) fn list_names(conn: &Connection, list: ReferenceList) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(list.select_sql())?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Insert every name not already present; returns how many were new
pub(crate) fn add_names<I, S>(conn: &Connection, list: ReferenceList, names: I) -> Result<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let tx = conn.unchecked_transaction()?;
    let mut added = 0;
    {
        let mut stmt = tx.prepare_cached(list.insert_sql())?;
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            added += stmt.execute(params![name])?;
        }
    }
    tx.commit()?;

    tracing::debug!(list = list.as_str(), added, "reference names added");
    Ok(added)
}

pub(crate) fn remove_name(conn: &Connection, list: ReferenceList, name: &str) -> Result<bool> {
    let removed = conn.execute(list.delete_sql(), params![name])?;
    Ok(removed > 0)
}
