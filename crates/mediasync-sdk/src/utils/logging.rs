//! 日志初始化
//!
//! SDK 内部只使用 `tracing` 宏；宿主应用可自行安装 subscriber，
//! 否则调用 [`init_tracing`] 安装一个默认的 fmt subscriber。

use tracing::Level;

/// 安装默认 fmt subscriber（重复调用无副作用）
///
/// `debug_mode` 为 true 时输出 DEBUG 级别（包含每个分片、每帧消息的细节）。
pub fn init_tracing(debug_mode: bool) -> bool {
    let level = if debug_mode { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_twice_does_not_panic() {
        let _ = init_tracing(true);
        // 第二次安装一定失败（全局 subscriber 已存在）
        assert!(!init_tracing(false));
    }
}
