//! Preflight check of the cryptographic library and trust-store tools.

use std::path::PathBuf;

use tracing::debug;

use crate::toolkit::OpensslToolkit;

/// One external command looked up on `PATH`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: &'static str,
    pub description: &'static str,
    pub path: Option<PathBuf>,
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemReport {
    /// Version of the linked OpenSSL library
    pub openssl_version: &'static str,
    pub tools: Vec<ToolStatus>,
}

impl SystemReport {
    /// Whether at least one trust-update command is installed
    pub fn has_trust_tool(&self) -> bool {
        self.tools
            .iter()
            .any(|tool| tool.name != "sudo" && tool.is_available())
    }
}

const LINUX_TOOLS: &[(&str, &str)] = &[
    (
        "update-ca-certificates",
        "trust bundle rebuild on Debian/Ubuntu and SUSE",
    ),
    ("update-ca-trust", "trust bundle rebuild on Fedora/RHEL"),
    ("trust", "trust bundle rebuild on Arch/Manjaro"),
    ("sudo", "privilege elevation for trust-store changes"),
];

/// Check the host this process runs on
pub fn run() -> SystemReport {
    run_for(std::env::consts::OS)
}

const MACOS_TOOLS: &[(&str, &str)] = &[
    ("security", "System keychain import and removal"),
    ("sudo", "privilege elevation for trust-store changes"),
];

const WINDOWS_TOOLS: &[(&str, &str)] = &[("certutil", "LocalMachine Root store import and removal")];

/// Check the tools relevant to `platform`
pub fn run_for(platform: &str) -> SystemReport {
    let tools: &[(&str, &str)] = match platform {
        "linux" => LINUX_TOOLS,
        "macos" => MACOS_TOOLS,
        "windows" => WINDOWS_TOOLS,
        _ => &[],
    };
    let tools = tools
        .iter()
        .map(|&(name, description)| {
            let path = which::which(name).ok();
            debug!(tool = name, found = path.is_some(), "Checked tool");
            ToolStatus {
                name,
                description,
                path,
            }
        })
        .collect();

    SystemReport {
        openssl_version: OpensslToolkit::version(),
        tools,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_openssl_version() {
        let report = run_for("linux");
        assert!(report.openssl_version.contains("SSL"));
        let names: Vec<&str> = report.tools.iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["update-ca-certificates", "update-ca-trust", "trust", "sudo"]
        );
    }

    #[test]
    fn test_native_store_tools() {
        let names: Vec<&str> = run_for("macos").tools.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["security", "sudo"]);
        let names: Vec<&str> = run_for("windows").tools.iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["certutil"]);
    }

    #[test]
    fn test_other_platforms_have_no_trust_tools() {
        let report = run_for("freebsd");
        assert!(report.tools.is_empty());
        assert!(!report.has_trust_tool());
    }
}
