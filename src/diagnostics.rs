// src/diagnostics.rs

/// Destination for messages meant for the performer.
///
/// Called only on the control thread. Implementations must not block for
/// long; a live edit waits on them.
pub trait DiagnosticSink: Send {
    fn report_log(&self, message: &str);
    fn report_error(&self, message: &str);
}

/// Forwards diagnostics to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report_log(&self, message: &str) {
        log::info!("{message}");
    }

    fn report_error(&self, message: &str) {
        log::error!("{message}");
    }
}
