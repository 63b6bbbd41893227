use std::fmt;

pub fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => {
            tracing::error!(
                message = %panic,
                panic.file = loc.file(),
                panic.line = loc.line(),
                panic.column = loc.column(),
            );
        }
        None => tracing::error!(message = %panic),
    }));
}

/// Compile-time facts about this binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub build_profile: &'static str,
    pub build_features: Vec<&'static str>,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vaultfs {} ({})", self.version, self.build_profile)?;
        if !self.build_features.is_empty() {
            write!(f, " features: {}", self.build_features.join(","))?;
        }
        Ok(())
    }
}

pub fn build_info() -> BuildInfo {
    let mut build_features = Vec::new();
    if cfg!(feature = "fuse") {
        build_features.push("fuse");
    }
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        build_profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
        build_features,
    }
}

pub fn report_build_info() {
    let build = build_info();

    tracing::info!(
        build_profile = build.build_profile,
        features = ?build.build_features,
        version = build.version,
        "vaultfs starting up"
    );
}
