//! 日志初始化
//!
//! 宿主应用若已经安装了自己的 subscriber，这里什么也不做。

use tracing_subscriber::{fmt, EnvFilter};

/// 安装 fmt subscriber；`RUST_LOG` 优先，否则使用 `default_directive`（例如 `"sheetsync_sdk=debug"`）
///
/// 返回是否由本次调用完成了安装。
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing("sheetsync_sdk=debug");
        assert!(!init_tracing("info"));
    }
}
