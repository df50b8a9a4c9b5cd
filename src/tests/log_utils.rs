use serde_json::Value;
use slog_extlog::slog_test;

/// A logger that captures structured log output so tests can assert on it.
pub struct CapturingLogger {
    pub logger: slog::Logger,
    buffer: iobuffer::IoBuffer,
}

impl CapturingLogger {
    pub fn new() -> Self {
        let buffer = iobuffer::IoBuffer::new();
        let logger = slog_test::new_test_logger(buffer.clone());
        Self { logger, buffer }
    }

    /// All captured log entries, in order.
    pub fn logs(&mut self) -> Vec<Value> {
        slog_test::read_json_values(&mut self.buffer)
    }

    /// Captured entries at warning level or above.
    pub fn warnings(&mut self) -> Vec<Value> {
        self.logs()
            .into_iter()
            .filter(|entry| matches!(entry["level"].as_str(), Some("WARN" | "ERRO" | "CRIT")))
            .collect()
    }
}

/// A logger that swallows everything, for tests that only check results.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}
