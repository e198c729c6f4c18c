// src/common/timing.rs

use core::time::Duration;

// Defaults applied when a schema does not declare its own values. They match
// what typical LAN/USB-TMC instruments tolerate; per-model schemas override them.

// === Device defaults ===

/// Interval between samples when polling.
pub const DEFAULT_POLL_RATE: Duration = Duration::from_millis(100);
/// Maximum time from the end of a command to the reply sentinel.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
/// Reply terminator (and outgoing message terminator).
pub const DEFAULT_SENTINEL: &[u8] = b"\r\n";
/// Largest reply accepted before the sentinel arrives.
pub const DEFAULT_MAX_REPLY_LEN: usize = 64 * 1024;

// === Session internals ===

/// Sleep between non-blocking I/O attempts while waiting on the transport.
/// Keeps the wait loop from spinning at 100% CPU.
pub const IO_POLL_INTERVAL_US: u32 = 100;
