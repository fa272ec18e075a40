//! ---
//! ingest_section: "01-core-functionality"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Shared primitives and utilities for the ingestion runtime."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use std::fmt;

/// Build metadata reported by the daemon at startup and via `--version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub semver: String,
    pub package: String,
    pub profile: String,
}

impl VersionInfo {
    /// Metadata for the crate that is currently compiled.
    pub fn current() -> Self {
        let profile = if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        };
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            package: env!("CARGO_PKG_NAME").to_owned(),
            profile: profile.to_owned(),
        }
    }

    /// Short form used in log lines.
    pub fn cli_string(&self) -> String {
        format!("v{} ({})", self.semver, self.profile)
    }

    /// Multi-line form printed by `--version`.
    pub fn extended(&self) -> String {
        format!(
            "package: {}\nversion: {}\nprofile: {}",
            self.package, self.semver, self.profile
        )
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cli_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_string_mentions_semver() {
        let info = VersionInfo::current();
        assert!(info.cli_string().contains(&info.semver));
        assert!(info.extended().contains("profile:"));
    }
}
