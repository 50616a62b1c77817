use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// This bank's listen ports and the dial-out peers it should connect to,
/// as parsed from `bank-addrs.csv`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankTopology {
    pub listen_ports: Vec<u16>,
    pub dial_peers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BankConfig {
    pub bank_id: String,
    pub topology: BankTopology,
    pub collector_addr: String,
}

impl BankConfig {
    /// Loads `bank-addrs.csv` and `state-collector.csv` from `dir` for the
    /// given bank id. Both files are required to exist; a missing state
    /// collector entry for this bank id is also fatal, matching spec.md §7's
    /// "configuration errors: fatal at startup".
    pub fn load(bank_id: &str, dir: &Path) -> Result<Self> {
        let topology = load_topology(bank_id, &dir.join("bank-addrs.csv"))?;
        let collector_addr = load_collector_addr(bank_id, &dir.join("state-collector.csv"))?;
        Ok(BankConfig {
            bank_id: bank_id.to_string(),
            topology,
            collector_addr,
        })
    }
}

/// `bank-addrs.csv` has lines `id,field,field,…`. The first line seen for a
/// given id supplies its listen ports; a later line for the same id
/// supplies its dial-out peers. This mirrors the original's single linear
/// pass building up one dict entry per id before anything is looked up.
fn load_topology(bank_id: &str, path: &Path) -> Result<BankTopology> {
    require_exists(path)?;
    let mut reader = open_flexible_csv(path)?;

    let mut by_id: HashMap<String, BankTopology> = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::Config(e.to_string()))?;
        let mut fields = record.iter();
        let id = match fields.next() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => continue,
        };
        let rest: Vec<String> = fields.map(str::to_owned).collect();

        match by_id.entry(id) {
            Entry::Vacant(entry) => {
                let listen_ports = rest.iter().filter_map(|p| p.parse::<u16>().ok()).collect();
                entry.insert(BankTopology {
                    listen_ports,
                    dial_peers: Vec::new(),
                });
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().dial_peers = rest;
            }
        }
    }

    Ok(by_id.remove(bank_id).unwrap_or_default())
}

/// `state-collector.csv` has lines `bank_id,host:port`.
fn load_collector_addr(bank_id: &str, path: &Path) -> Result<String> {
    require_exists(path)?;
    let mut reader = open_flexible_csv(path)?;

    let mut by_id: HashMap<String, String> = HashMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::Config(e.to_string()))?;
        if record.len() < 2 {
            continue;
        }
        by_id.insert(record[0].to_string(), record[1].to_string());
    }

    by_id.remove(bank_id).ok_or_else(|| {
        Error::Config(format!(
            "no state collector configured for bank '{bank_id}'"
        ))
    })
}

fn require_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "missing configuration file '{}'",
            path.display()
        )));
    }
    Ok(())
}

fn open_flexible_csv(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn parses_ports_and_dial_peers() {
        let dir = tempdir();
        write_file(
            dir.path(),
            "bank-addrs.csv",
            "a,5000,5001\nb,6000\na,localhost:6000\n",
        );
        write_file(dir.path(), "state-collector.csv", "a,localhost:9000\n");

        let config = BankConfig::load("a", dir.path()).unwrap();
        assert_eq!(config.topology.listen_ports, vec![5000, 5001]);
        assert_eq!(config.topology.dial_peers, vec!["localhost:6000".to_string()]);
        assert_eq!(config.collector_addr, "localhost:9000");
    }

    #[test]
    fn bank_with_no_entry_gets_empty_topology() {
        let dir = tempdir();
        write_file(dir.path(), "bank-addrs.csv", "a,5000\n");
        write_file(dir.path(), "state-collector.csv", "a,localhost:9000\nb,localhost:9001\n");

        let config = BankConfig::load("b", dir.path()).unwrap();
        assert_eq!(config.topology, BankTopology::default());
    }

    #[test]
    fn missing_collector_entry_is_fatal() {
        let dir = tempdir();
        write_file(dir.path(), "bank-addrs.csv", "a,5000\n");
        write_file(dir.path(), "state-collector.csv", "b,localhost:9001\n");

        assert!(BankConfig::load("a", dir.path()).is_err());
    }

    /// Minimal self-contained tempdir helper so this crate doesn't need a
    /// `tempfile` dev-dependency just for three tests.
    struct TempDir(std::path::PathBuf);

    impl TempDir {
        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn tempdir() -> TempDir {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "bank-commons-test-{}-{}",
            std::process::id(),
            std::ptr::addr_of!(dir) as usize
        ));
        std::fs::create_dir_all(&dir).unwrap();
        TempDir(dir)
    }
}
