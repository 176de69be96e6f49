// Defaults for the chat surfaces, overridable from the environment or a .env file.

use std::env;
use std::time::Duration;

/// Reveal cadence used when a caller does not pick one.
pub const DEFAULT_CADENCE: Duration = Duration::from_millis(50);

/// Cadence the chat surfaces reveal responses at.
pub const CHAT_CADENCE_MS: u64 = 30;

/// Simulated round-trip of the mock response source.
pub const MOCK_LATENCY_MS: u64 = 1000;

pub const DEFAULT_PORT: u16 = 9900;

/// Shown in place of the response while a query is in flight.
pub const THINKING_LABEL: &str = "Thinking...";

pub const PAGE_TITLE: &str = "ChatGPT-like UI";

// Use lazy_static to initialize static variables safely.
lazy_static::lazy_static! {
    pub static ref TEMPLATE_DIR: String = env::var("TYPIST_TEMPLATE_DIR").unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("TYPIST_STATIC_DIR").unwrap_or_else(|_| "static".to_string());
}
