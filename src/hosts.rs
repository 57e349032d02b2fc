//! Host list loading.
//!
//! One host per line. Surrounding whitespace is ignored, as are blank lines
//! and lines starting with `#`. A host listed twice runs two benchmark
//! instances.

use crate::target::HostId;
use anyhow::{Context, Result};
use std::path::Path;

pub fn parse_hosts(text: &str) -> Vec<HostId> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(HostId::from)
        .collect()
}

pub fn read_hosts(path: &Path) -> Result<Vec<HostId>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading host file {}", path.display()))?;
    Ok(parse_hosts(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_skips_blanks_and_comments() {
        let hosts = parse_hosts("# fleet\n  bench-1  \n\n\tbench-2\n#bench-3\nbench-1\n");
        assert_eq!(
            hosts,
            vec![
                HostId::from("bench-1"),
                HostId::from("bench-2"),
                HostId::from("bench-1")
            ]
        );
    }

    #[test]
    fn test_parse_empty_file() {
        assert!(parse_hosts("\n# nothing here\n   \n").is_empty());
    }

    #[test]
    fn test_read_hosts_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "user@10.0.0.1").unwrap();
        writeln!(file, "10.0.0.2").unwrap();

        let hosts = read_hosts(file.path()).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].as_str(), "user@10.0.0.1");
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_hosts(&dir.path().join("nope")).is_err());
    }
}
