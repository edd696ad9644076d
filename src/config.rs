use std::collections::HashSet;
use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use uuid::Uuid;

use libjetex::fragment::Fragment;
use libjetex::{Namespace, Table};

use crate::error::{ConfigError, Result};

/// On-disk shape of the namespace config file (SPEC_FULL.md §4.6). Loaded
/// once at startup, never reloaded.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub listen: Vec<SocketAddr>,
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Deserialize)]
pub struct TableConfig {
    pub uuid: Uuid,
    pub fragments: Vec<PathBuf>,
}

pub struct Config {
    pub listen: Vec<SocketAddr>,
    pub namespace: Namespace,
}

impl Config {
    pub fn load(path: &PathBuf) -> Result<Config> {
        let file = File::open(path)?;
        let raw: ConfigFile = serde_json::from_reader(file)?;

        if raw.listen.is_empty() {
            return Err(ConfigError::NoListenAddresses.into());
        }

        let mut seen = HashSet::new();
        let mut tables = Vec::with_capacity(raw.tables.len());

        for table_config in raw.tables {
            if !seen.insert(table_config.uuid) {
                return Err(ConfigError::DuplicateTableUuid(table_config.uuid.to_string()).into());
            }
            if table_config.fragments.is_empty() {
                return Err(ConfigError::NoFragmentsForTable(table_config.uuid.to_string()).into());
            }

            let mut fragments = Vec::with_capacity(table_config.fragments.len());
            for path in &table_config.fragments {
                let file = File::open(path)?;
                fragments.push(Fragment::open(&file)?);
            }

            let (table, _refcounts) = Table::create(table_config.uuid, fragments)?;
            tables.push(table);
        }

        Ok(Config {
            listen: raw.listen,
            namespace: Namespace::create(tables),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libjetex::fragment::{FRAGMENT_MAGIC, HEADER_SIZE};
    use std::io::Write;

    /// Writes a minimal, valid single-item fragment file (key_size=1,
    /// item_size=1, global pattern) and returns its path.
    fn write_trivial_fragment(dir: &std::path::Path, name: &str) -> PathBuf {
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&FRAGMENT_MAGIC.to_le_bytes());
        header[17] = 1; // key_size
        header[18..20].copy_from_slice(&1u16.to_le_bytes()); // item_size
        let table_size = HEADER_SIZE as u64 + 8;
        header[24..32].copy_from_slice(&table_size.to_le_bytes());

        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(&header).unwrap();
        f.write_all(&0u64.to_le_bytes()).unwrap();
        f.flush().unwrap();
        path
    }

    #[test]
    fn well_formed_config_round_trips_into_a_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let frag_path = write_trivial_fragment(dir.path(), "a.frag");
        let uuid = Uuid::from_u128(1);

        let config_json = serde_json::json!({
            "listen": ["127.0.0.1:4747"],
            "tables": [{
                "uuid": uuid.to_string(),
                "fragments": [frag_path],
            }],
        });
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, config_json.to_string()).unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.listen, vec!["127.0.0.1:4747".parse::<SocketAddr>().unwrap()]);
        assert_eq!(config.namespace.len(), 1);
        assert!(config.namespace.table(uuid).is_some());
    }

    #[test]
    fn config_naming_an_invalid_fragment_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let bad_path = dir.path().join("bad.frag");
        std::fs::write(&bad_path, [0u8; HEADER_SIZE]).unwrap(); // bad magic

        let config_json = serde_json::json!({
            "listen": ["127.0.0.1:4747"],
            "tables": [{
                "uuid": Uuid::from_u128(2).to_string(),
                "fragments": [bad_path],
            }],
        });
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, config_json.to_string()).unwrap();

        assert!(Config::load(&config_path).is_err());
    }

    #[test]
    fn config_with_no_listen_addresses_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"listen": [], "tables": []}"#).unwrap();

        assert!(Config::load(&config_path).is_err());
    }
}
