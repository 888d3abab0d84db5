pub mod fake_server;
pub mod scripts;
pub mod timeouts;

// Re-export commonly used items
pub use fake_server::{fake_server, ClientEnds, FakeServer};

/// Check if running in CI environment.
pub fn is_ci() -> bool {
    std::env::var("CI").is_ok()
}
