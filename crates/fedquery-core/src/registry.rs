// SPDX-License-Identifier: Apache-2.0

//! Table Registry
//!
//! Static mapping from logical table name to the remote container hosting it.
//! Loaded once at start-up and read-only afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FederationError, FederationResult};

/// One entry of the JSON configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub url: String,
    pub port: u16,
    pub table_name: String,
}

/// Accepted shapes of the configuration file: the `{"tables": {...}}`
/// wrapper or the bare mapping.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegistryFile {
    Wrapped { tables: HashMap<String, TableEntry> },
    Bare(HashMap<String, TableEntry>),
}

impl RegistryFile {
    pub fn into_entries(self) -> HashMap<String, TableEntry> {
        match self {
            Self::Wrapped { tables } => tables,
            Self::Bare(tables) => tables,
        }
    }
}

/// A logical table and where it lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRegistration {
    pub logical_name: String,
    pub endpoint_url: String,
    pub port: u16,
    pub remote_table_name: String,
}

impl TableRegistration {
    pub fn new(
        logical_name: impl Into<String>,
        endpoint_url: impl Into<String>,
        port: u16,
        remote_table_name: impl Into<String>,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            endpoint_url: endpoint_url.into(),
            port,
            remote_table_name: remote_table_name.into(),
        }
    }

    /// Normalized base URL of the container (scheme, host, port, trailing `/`).
    pub fn base_url(&self) -> FederationResult<Url> {
        normalize_endpoint(&self.endpoint_url, self.port)
    }

    /// URL of one endpoint of the container, e.g. `metadata` or `query`.
    pub fn endpoint(&self, path: &str) -> FederationResult<Url> {
        self.base_url()?.join(path).map_err(|e| {
            FederationError::configuration(format!(
                "Invalid endpoint '{path}' for table '{}': {e}",
                self.logical_name
            ))
        })
    }
}

/// Accepts a host with or without scheme and pins the configured port.
pub fn normalize_endpoint(raw: &str, port: u16) -> FederationResult<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(FederationError::configuration("Endpoint URL cannot be empty"));
    }

    let lower = trimmed.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| {
        FederationError::configuration(format!("Invalid endpoint URL '{raw}': {e}"))
    })?;

    url.set_port(Some(port)).map_err(|_| {
        FederationError::configuration(format!("Endpoint URL '{raw}' cannot carry a port"))
    })?;

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

/// Read-only lookup of logical tables (case-insensitive)
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<String, TableRegistration>,
}

impl TableRegistry {
    /// Builds and validates a registry from configuration entries.
    pub fn from_entries<I>(entries: I) -> FederationResult<Self>
    where
        I: IntoIterator<Item = (String, TableEntry)>,
    {
        let mut tables = HashMap::new();

        for (name, entry) in entries {
            if !identifier_pattern().is_match(&name) {
                return Err(FederationError::configuration(format!(
                    "Logical table name '{name}' is not a valid SQL identifier"
                )));
            }
            if entry.table_name.trim().is_empty() {
                return Err(FederationError::configuration(format!(
                    "Table '{name}' has an empty table_name"
                )));
            }
            normalize_endpoint(&entry.url, entry.port)?;

            let key = name.to_lowercase();
            if tables.contains_key(&key) {
                return Err(FederationError::configuration(format!(
                    "Logical table '{name}' is registered more than once"
                )));
            }

            tables.insert(
                key.clone(),
                TableRegistration::new(key, entry.url, entry.port, entry.table_name),
            );
        }

        Ok(Self { tables })
    }

    /// Parses the JSON configuration document.
    pub fn from_json(json: &str) -> FederationResult<Self> {
        let file: RegistryFile = serde_json::from_str(json).map_err(|e| {
            FederationError::configuration(format!("Invalid table configuration: {e}"))
        })?;
        Self::from_entries(file.into_entries())
    }

    pub fn get(&self, logical_name: &str) -> Option<&TableRegistration> {
        self.tables.get(&logical_name.to_lowercase())
    }

    /// Resolves every name or fails with one error listing all missing tables.
    pub fn resolve_all<'a, I>(&self, names: I) -> FederationResult<Vec<&TableRegistration>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut found = Vec::new();
        let mut missing = Vec::new();

        for name in names {
            match self.get(name) {
                Some(registration) => found.push(registration),
                None => missing.push(name.to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(FederationError::configuration(format!(
                "Tables not found in configuration: {}",
                missing.join(", ")
            )));
        }

        Ok(found)
    }

    /// Registered logical names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, port: u16, table: &str) -> TableEntry {
        TableEntry {
            url: url.to_string(),
            port,
            table_name: table.to_string(),
        }
    }

    #[test]
    fn normalizes_host_without_scheme() {
        let url = normalize_endpoint("data-1", 8001).unwrap();
        assert_eq!(url.as_str(), "http://data-1:8001/");
    }

    #[test]
    fn keeps_existing_scheme_and_path() {
        let url = normalize_endpoint("https://data.example.com/api/", 9443).unwrap();
        assert_eq!(url.as_str(), "https://data.example.com:9443/api/");

        let reg = TableRegistration::new("t", "https://data.example.com/api", 9443, "t");
        assert_eq!(
            reg.endpoint("query").unwrap().as_str(),
            "https://data.example.com:9443/api/query"
        );
    }

    #[test]
    fn configured_port_wins_over_url_port() {
        let url = normalize_endpoint("http://localhost:1234", 8002).unwrap();
        assert_eq!(url.port(), Some(8002));
    }

    #[test]
    fn rejects_empty_endpoint() {
        assert!(normalize_endpoint("  ", 80).is_err());
    }

    #[test]
    fn loads_wrapped_and_bare_configs() {
        let wrapped = r#"{"tables": {"accounts": {"url": "localhost", "port": 8001, "table_name": "accounts"}}}"#;
        let bare = r#"{"accounts": {"url": "localhost", "port": 8001, "table_name": "accounts"}}"#;

        assert_eq!(TableRegistry::from_json(wrapped).unwrap().len(), 1);
        assert_eq!(TableRegistry::from_json(bare).unwrap().len(), 1);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = TableRegistry::from_entries([(
            "Accounts".to_string(),
            entry("localhost", 8001, "accounts_v2"),
        )])
        .unwrap();

        let reg = registry.get("ACCOUNTS").expect("registered");
        assert_eq!(reg.logical_name, "accounts");
        assert_eq!(reg.remote_table_name, "accounts_v2");
    }

    #[test]
    fn rejects_case_insensitive_duplicates() {
        let result = TableRegistry::from_entries([
            ("accounts".to_string(), entry("a", 1, "a")),
            ("ACCOUNTS".to_string(), entry("b", 2, "b")),
        ]);
        assert!(matches!(result, Err(FederationError::Configuration { .. })));
    }

    #[test]
    fn rejects_non_identifier_names() {
        let result =
            TableRegistry::from_entries([("bad-name".to_string(), entry("a", 1, "a"))]);
        assert!(result.is_err());
    }

    #[test]
    fn resolve_all_lists_every_missing_table() {
        let registry =
            TableRegistry::from_entries([("accounts".to_string(), entry("a", 1, "a"))]).unwrap();

        let err = registry
            .resolve_all(["accounts", "ghost", "phantom"])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Tables not found in configuration: ghost, phantom"
        );
    }
}
