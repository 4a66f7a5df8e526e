use log::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Where user-facing engine messages go. Injected into the scanner, the
/// session, the deleter and the app controller.
pub trait Sink: Send + Sync {
    fn emit(&self, message: &str, severity: Severity);

    fn info(&self, message: &str) { self.emit(message, Severity::Info) }
    fn warning(&self, message: &str) { self.emit(message, Severity::Warning) }
    fn error(&self, message: &str) { self.emit(message, Severity::Error) }
}

/// Forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Sink for LogSink {
    fn emit(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }
    }
}

#[cfg(test)]
pub use memory::MemorySink;

#[cfg(test)]
mod memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemorySink {
        pub messages: Mutex<Vec<(String, Severity)>>,
    }

    impl MemorySink {
        pub fn count(&self, severity: Severity) -> usize {
            self.messages.lock().unwrap().iter().filter(|(_, s)| *s == severity).count()
        }

        pub fn contains(&self, needle: &str, severity: Severity) -> bool {
            self.messages.lock().unwrap().iter().any(|(m, s)| *s == severity && m.contains(needle))
        }
    }

    impl Sink for MemorySink {
        fn emit(&self, message: &str, severity: Severity) {
            self.messages.lock().unwrap().push((message.to_string(), severity));
        }
    }
}
