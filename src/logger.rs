use tracing::Level;

pub trait Logger: Send + Sync {
    fn write_line(&self, level: Level, line: &str);
}

#[derive(Debug, Clone, Copy)]
pub struct TracingLogger {
    source: &'static str,
}

impl TracingLogger {
    pub const fn new(source: &'static str) -> Self {
        Self { source }
    }
}

impl Logger for TracingLogger {
    fn write_line(&self, level: Level, line: &str) {
        if level == Level::ERROR {
            tracing::error!(source = self.source, "{line}");
        } else if level == Level::WARN {
            tracing::warn!(source = self.source, "{line}");
        } else if level == Level::INFO {
            tracing::info!(source = self.source, "{line}");
        } else {
            tracing::debug!(source = self.source, "{line}");
        }
    }
}
