//! Hook surface (C9): a level-filtered logger and a metrics sink, both
//! invoked synchronously on the evaluating thread. Separate from, and in
//! addition to, this crate's own internal `tracing` diagnostics: these are
//! for host-supplied business observability.

use std::sync::Arc;

use crate::flag::DecisionKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A level-filtered logger with a deferred message callback: `message` is
/// only invoked if `enabled(level)` returns true, so expensive formatting
/// is skipped when the level is filtered out.
pub trait Logger: Send + Sync {
    fn enabled(&self, level: LogLevel) -> bool;
    fn log(&self, level: LogLevel, message: &dyn std::fmt::Display);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluationMode {
    Normal,
    Explain,
}

/// Emitted once per evaluation (and once per registry transition where
/// noted), carrying enough context for a metrics sink to build dashboards
/// without reaching back into the registry.
#[derive(Clone, Debug)]
pub struct EvaluationEvent {
    pub namespace_id: String,
    pub feature_key: String,
    pub mode: EvaluationMode,
    pub duration_nanos: u64,
    pub decision: DecisionKind,
    pub config_version: Option<String>,
    pub bucket: Option<u32>,
    pub matched_rule_specificity: Option<u32>,
}

pub trait MetricsSink: Send + Sync {
    fn record_evaluation(&self, event: &EvaluationEvent);
}

/// The pair of hooks a [`crate::registry::NamespaceRegistry`] is
/// constructed with.
#[derive(Clone)]
pub struct Hooks {
    pub logger: Arc<dyn Logger>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Default for Hooks {
    fn default() -> Self {
        Hooks {
            logger: Arc::new(NoopLogger),
            metrics: Arc::new(NoopMetricsSink),
        }
    }
}

pub struct NoopLogger;

impl Logger for NoopLogger {
    fn enabled(&self, _level: LogLevel) -> bool {
        false
    }
    fn log(&self, _level: LogLevel, _message: &dyn std::fmt::Display) {}
}

pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_evaluation(&self, _event: &EvaluationEvent) {}
}

/// Forwards to the crate's `tracing` diagnostics, so a host that hasn't
/// supplied its own [`Logger`] still gets structured log lines rather than
/// silence.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn enabled(&self, _level: LogLevel) -> bool {
        true
    }

    fn log(&self, level: LogLevel, message: &dyn std::fmt::Display) {
        match level {
            LogLevel::Trace => tracing::trace!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMetrics(AtomicUsize);

    impl MetricsSink for CountingMetrics {
        fn record_evaluation(&self, _event: &EvaluationEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn metrics_sink_is_invoked() {
        let metrics = CountingMetrics(AtomicUsize::new(0));
        metrics.record_evaluation(&EvaluationEvent {
            namespace_id: "ns".to_string(),
            feature_key: "feature::ns::darkMode".to_string(),
            mode: EvaluationMode::Normal,
            duration_nanos: 10,
            decision: DecisionKind::Default,
            config_version: None,
            bucket: None,
            matched_rule_specificity: None,
        });
        assert_eq!(metrics.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_logger_is_disabled_at_every_level() {
        let logger = NoopLogger;
        assert!(!logger.enabled(LogLevel::Error));
    }
}
