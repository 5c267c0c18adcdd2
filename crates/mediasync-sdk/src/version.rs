//! SDK 版本与构建元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Build Metadata** → build.rs 中由 vergen 生成

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// build time（由 vergen 在 build.rs 中生成；生成失败时为 "unknown"）
pub const BUILD_TIME: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(timestamp) => timestamp,
    None => "unknown",
};

/// 版本摘要，用于日志
pub fn version_string() -> String {
    format!("mediasync-sdk {} (built {})", SDK_VERSION, BUILD_TIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(SDK_VERSION, env!("CARGO_PKG_VERSION"));
        assert!(!BUILD_TIME.is_empty());
        assert!(version_string().starts_with("mediasync-sdk "));
    }
}
