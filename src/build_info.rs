/// Compile-time facts about this binary, filled in by build.rs
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    /// YYYYMMDD.HHMMSS, UTC
    pub timestamp: &'static str,
    pub revision: &'static str,
    pub target: &'static str,
    pub profile: &'static str,
}

impl BuildInfo {
    pub const CURRENT: BuildInfo = BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: env!("DETLENS_BUILD_TIMESTAMP"),
        revision: env!("DETLENS_GIT_REVISION"),
        target: env!("DETLENS_TARGET"),
        profile: env!("DETLENS_PROFILE"),
    };

    /// One line for log headers: "0.1.0 (20260101.120000)"
    pub fn version_line(&self) -> String {
        format!("{} ({})", self.version, self.timestamp)
    }
}

/// Multi-line report printed by `--build-info`
impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Build: {}", self.timestamp)?;
        writeln!(f, "Commit: {}", self.revision)?;
        writeln!(f, "Platform: {}", self.target)?;
        write!(f, "Profile: {}", self.profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lists_every_field() {
        let info = BuildInfo {
            version: "1.2.3",
            timestamp: "20260101.120000",
            revision: "abc1234-dirty",
            target: "x86_64-linux",
            profile: "debug",
        };
        assert_eq!(info.version_line(), "1.2.3 (20260101.120000)");
        assert_eq!(
            info.to_string(),
            "Version: 1.2.3\nBuild: 20260101.120000\nCommit: abc1234-dirty\nPlatform: x86_64-linux\nProfile: debug"
        );
    }

    #[test]
    fn test_current_matches_package() {
        assert_eq!(BuildInfo::CURRENT.version, env!("CARGO_PKG_VERSION"));
        assert!(!BuildInfo::CURRENT.timestamp.is_empty());
    }
}
