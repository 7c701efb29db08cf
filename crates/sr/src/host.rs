//! Spawning workers onto a hostfile-listed set of machines.
//!
//! The in-process worker pool in [`crate::builder`] covers the common
//! case (one machine, several threads). `HostSpawner` covers the
//! "spawn one worker per listed host" path without pulling in an actual
//! cluster/SSH transport, which belongs to the excluded orchestration
//! layer.

use std::io;
use std::process::{Child, Command};

/// Launches one worker process per host. `ProcessHostSpawner` is the
/// only implementation shipped; tests can supply a stub.
pub trait HostSpawner {
    /// # Errors
    /// Returns the underlying process-spawn error.
    fn spawn(&self, host: &str) -> io::Result<Child>;
}

/// Builds a `std::process::Command` from a template string by
/// substituting `{host}`, e.g. `"ssh {host} inmap worker --listen 9090"`.
pub struct ProcessHostSpawner {
    pub command_template: String,
}

impl HostSpawner for ProcessHostSpawner {
    fn spawn(&self, host: &str) -> io::Result<Child> {
        let rendered = self.command_template.replace("{host}", host);
        let mut parts = rendered.split_whitespace();
        let program = parts.next().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty worker command template"))?;
        Command::new(program).args(parts).spawn()
    }
}

/// Read a hostfile (one hostname per line, blank lines and `#` comments
/// ignored).
///
/// # Errors
/// Returns the underlying I/O error if `path` cannot be read.
pub fn read_hostfile(path: &std::path::Path) -> io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
.lines()
.map(str::trim)
.filter(|line| !line.is_empty() && !line.starts_with('#'))
.map(str::to_string)
.collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_substitutes_host() {
        let spawner = ProcessHostSpawner { command_template: "echo {host}".to_string() };
        let mut child = spawner.spawn("node-1").unwrap();
        let status = child.wait().unwrap();
        assert!(status.success());
    }

    #[test]
    fn hostfile_skips_blanks_and_comments() {
        let dir = std::env::temp_dir();
        let path = dir.join("inmap_sr_test_hostfile.txt");
        std::fs::write(&path, "node-1\n# a comment\n\nnode-2\n").unwrap();
        let hosts = read_hostfile(&path).unwrap();
        assert_eq!(hosts, vec!["node-1".to_string(), "node-2".to_string()]);
        let _ = std::fs::remove_file(&path);
    }
}
