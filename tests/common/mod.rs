//! Logging helpers shared by the integration tests.
#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex, Once};

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a global subscriber once per test binary.
///
/// Filtered by `RUST_LOG`; silent when it is unset.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buffer);
        Ok(buffer.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `body` with a thread-local subscriber and returns what it logged.
pub fn capture_logs<T>(body: impl FnOnce() -> T) -> (T, String) {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("lambars_fx=trace"))
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    let value = tracing::subscriber::with_default(subscriber, body);
    let logs = String::from_utf8_lossy(&captured.0.lock().unwrap()).into_owned();
    (value, logs)
}
