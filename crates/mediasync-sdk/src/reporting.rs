//! 异常上报
//!
//! 编排器和连接循环里出现的意外错误不会向上抛出：交给观测端记录，
//! 同时以 `SDKEvent::ErrorReported` 广播，循环继续运行。

use std::sync::Arc;
use tracing::error;

use crate::error::MediaSyncError;
use crate::events::{EventManager, SDKEvent};
use crate::utils::now_millis;

/// 观测端（由宿主应用实现，例如接入 Sentry）
pub trait ErrorReporter: Send + Sync + std::fmt::Debug {
    fn report(&self, context: &str, error: &MediaSyncError);
}

/// 默认实现：写 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, context: &str, error: &MediaSyncError) {
        error!("❌ [{}] {}", context, error);
    }
}

/// 上报出口：观测端 + 事件总线
#[derive(Debug, Clone)]
pub struct ErrorSink {
    reporter: Arc<dyn ErrorReporter>,
    events: Arc<EventManager>,
}

impl ErrorSink {
    pub fn new(reporter: Arc<dyn ErrorReporter>, events: Arc<EventManager>) -> Self {
        Self { reporter, events }
    }

    pub fn report(&self, context: &str, error: &MediaSyncError) {
        self.reporter.report(context, error);
        self.events.emit(SDKEvent::ErrorReported {
            context: context.to_string(),
            message: error.to_string(),
            timestamp: now_millis(),
        });
    }
}
