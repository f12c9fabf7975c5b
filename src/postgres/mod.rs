// ABOUTME: PostgreSQL connection adapter for the source and destination collaborator traits
// ABOUTME: Wraps one tokio-postgres client; reads use portals, writes use chunked inserts

pub mod connection;
pub mod converter;
pub mod reader;
pub mod writer;

pub use connection::{connect, connect_with_retry};

use anyhow::Result;
use std::collections::HashMap;
use tokio_postgres::Client;

/// One PostgreSQL session usable as a source or a destination
pub struct PostgresConnection {
    client: Client,
    /// Declared type names per destination table, filled on first insert
    column_types: HashMap<String, HashMap<String, String>>,
}

impl PostgresConnection {
    /// Connect with keepalives, TLS and retries for transient failures
    pub async fn open(url: &str) -> Result<Self> {
        let client = connect_with_retry(url).await?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            column_types: HashMap::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Split `schema.table` into its parts; a bare name has no schema
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => (Some(schema), table),
        _ => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_qualified("app.users"), (Some("app"), "users"));
        assert_eq!(split_qualified("users"), (None, "users"));
        assert_eq!(split_qualified(".users"), (None, ".users"));
    }
}
