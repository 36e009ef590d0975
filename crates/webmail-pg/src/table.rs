// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::fmt::Display;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid SQL identifier {0:?}")]
pub struct InvalidIdentifier(pub String);

/// A validated, quoted SQL identifier, optionally qualified by a schema
#[derive(Debug, Clone, PartialEq, Eq)]
struct Identifier(String);

impl Identifier {
    fn parse(raw: &str, allow_schema: bool) -> Result<Self, InvalidIdentifier> {
        let parts: Vec<&str> = if allow_schema {
            raw.split('.').collect()
        } else {
            vec![raw]
        };

        if parts.len() > 2 || !parts.iter().all(|part| is_plain_identifier(part)) {
            return Err(InvalidIdentifier(raw.to_owned()));
        }

        let quoted: Vec<String> = parts.iter().map(|part| format!("\"{part}\"")).collect();
        Ok(Self(quoted.join(".")))
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_plain_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    part.len() <= 63
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Where the webmail client records its users.
///
/// Identifiers end up in SQL statements, so they are restricted to plain
/// ASCII identifiers and always quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebmailTable {
    table: Identifier,
    column: Identifier,
}

impl WebmailTable {
    /// # Errors
    ///
    /// Returns an error if the table or the column is not a plain SQL
    /// identifier. The table may be qualified with a schema.
    pub fn new(table: &str, column: &str) -> Result<Self, InvalidIdentifier> {
        Ok(Self {
            table: Identifier::parse(table, true)?,
            column: Identifier::parse(column, false)?,
        })
    }

    pub(crate) fn exists_query(&self) -> String {
        format!(
            "SELECT EXISTS (SELECT 1 FROM {table} WHERE {column} = $1)",
            table = self.table,
            column = self.column,
        )
    }

    pub(crate) fn delete_query(&self) -> String {
        format!(
            "DELETE FROM {table} WHERE {column} = $1",
            table = self.table,
            column = self.column,
        )
    }
}

impl Default for WebmailTable {
    fn default() -> Self {
        Self {
            table: Identifier("\"users\"".to_owned()),
            column: Identifier("\"username\"".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_default_table() {
        assert_eq!(
            WebmailTable::default(),
            WebmailTable::new("users", "username").unwrap()
        );
        assert_eq!(
            WebmailTable::default().delete_query(),
            "DELETE FROM \"users\" WHERE \"username\" = $1"
        );
    }

    #[test]
    fn test_schema_qualified_table() {
        let table = WebmailTable::new("roundcube.users", "username").unwrap();
        assert_eq!(
            table.exists_query(),
            "SELECT EXISTS (SELECT 1 FROM \"roundcube\".\"users\" WHERE \"username\" = $1)"
        );
    }

    #[test]
    fn test_rejects_injection() {
        assert_matches!(
            WebmailTable::new("users; DROP TABLE users", "username"),
            Err(InvalidIdentifier(_))
        );
        assert_matches!(
            WebmailTable::new("users", "user\"name"),
            Err(InvalidIdentifier(_))
        );
        assert_matches!(
            WebmailTable::new("users", "schema.column"),
            Err(InvalidIdentifier(_))
        );
        assert_matches!(WebmailTable::new("", "username"), Err(InvalidIdentifier(_)));
        assert_matches!(
            WebmailTable::new("a.b.c", "username"),
            Err(InvalidIdentifier(_))
        );
        assert_matches!(
            WebmailTable::new("1users", "username"),
            Err(InvalidIdentifier(_))
        );
    }
}
