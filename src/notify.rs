//! Haptic/attention signals

use std::io::Write;

/// Pattern used when a rest ran out while nobody was watching
pub const REST_ELAPSED_PATTERN: &[u32] = &[200, 100, 200];

pub trait Notifier {
    /// Vibrate with alternating on/off durations in ms. No-op where unsupported.
    fn vibrate(&self, pattern: &[u32]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn vibrate(&self, _pattern: &[u32]) {}
}

/// Rings the terminal bell once per pulse
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl Notifier for TerminalBell {
    fn vibrate(&self, pattern: &[u32]) {
        let pulses = pattern.len().div_ceil(2);
        let mut out = std::io::stdout();
        let _ = out.write_all("\x07".repeat(pulses).as_bytes());
        let _ = out.flush();
    }
}
