//! SDK 版本与构建元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Build Metadata** → build.rs（vergen）

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// 用于日志与 HTTP 头的客户端标识
pub fn client_info() -> String {
    format!("sheetsync-sdk/{}", SDK_VERSION)
}
