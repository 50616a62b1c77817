use std::path::Path;

use anyhow::{bail, Context, Result};

/// The ports this collector listens on, one per non-empty line of
/// `collector.txt`, matching the original's `load_configuration`
/// (`dict(ports=lines)` read from a file of the same name).
pub fn load_ports(dir: &Path) -> Result<Vec<u16>> {
    let path = dir.join("collector.txt");
    if !path.is_file() {
        bail!("missing configuration file '{}'", path.display());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("reading configuration file '{}'", path.display()))?;

    let mut ports = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let port: u16 = line
            .parse()
            .with_context(|| format!("invalid port '{line}' in '{}'", path.display()))?;
        ports.push(port);
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir(tag: &str) -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "state-collector-test-{tag}-{}-{}",
            std::process::id(),
            std::ptr::addr_of!(dir) as usize
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn parses_one_port_per_line() {
        let dir = tempdir("parses");
        std::fs::write(dir.join("collector.txt"), "9000\n9001\n\n9002\n").unwrap();

        let ports = load_ports(&dir).unwrap();
        assert_eq!(ports, vec![9000, 9001, 9002]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir("missing");
        assert!(load_ports(&dir).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
