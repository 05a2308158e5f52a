//! Newline-delimited JSON platform signals.
//!
//! ```text
//! {"signal":"window","package":"com.bank","class_name":"com.bank.Main"}
//! {"signal":"screen_off"}
//! {"signal":"user_present"}
//! {"signal":"unlocked","package":"com.bank"}
//! ```

use anyhow::Result;
use applock_core::platform::{AccessibilityEvent, AccessibilityEventType};
use applock_core::signals::DeviceSignal;
use applock_core::supervisor::Supervisor;
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::host::{FeedAccessibility, HostDevice};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum FeedSignal {
    /// Window-state change observed by the accessibility service. The
    /// timestamp is informational; decisions use the daemon clock.
    Window {
        package: String,
        #[serde(default)]
        class_name: Option<String>,
        #[serde(default)]
        timestamp_millis: Option<i64>,
    },
    ScreenOff,
    UserPresent,
    /// The user passed the lock screen for `package`.
    Unlocked { package: String },
}

/// Parse one feed line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<FeedSignal>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

pub struct Feed {
    supervisor: Arc<Supervisor>,
    accessibility: Arc<FeedAccessibility>,
    device: Arc<HostDevice>,
}

impl Feed {
    pub fn new(
        supervisor: Arc<Supervisor>,
        accessibility: Arc<FeedAccessibility>,
        device: Arc<HostDevice>,
    ) -> Self {
        Self {
            supervisor,
            accessibility,
            device,
        }
    }

    pub async fn apply(&self, signal: FeedSignal) {
        let clock = self.supervisor.clock();
        match signal {
            FeedSignal::Window {
                package,
                class_name,
                timestamp_millis,
            } => {
                let event = AccessibilityEvent {
                    event_type: AccessibilityEventType::WindowStateChanged,
                    package_name: Some(package),
                    class_name,
                    timestamp_millis: timestamp_millis.unwrap_or_else(|| clock.now_millis()),
                };
                if !self.accessibility.deliver(event).await {
                    debug!("window event dropped, accessibility backend not running");
                }
            }
            FeedSignal::ScreenOff => {
                self.device.set_locked(true);
                self.supervisor
                    .handle_device_signal(DeviceSignal::ScreenOff)
                    .await;
            }
            FeedSignal::UserPresent => {
                self.device.set_locked(false);
                self.supervisor
                    .handle_device_signal(DeviceSignal::UserPresent)
                    .await;
            }
            FeedSignal::Unlocked { package } => {
                self.supervisor
                    .engine()
                    .record_unlock(&package, clock.now_millis());
            }
        }
    }

    /// Apply every signal from `reader` until EOF, in order: a window signal
    /// is decided on before the next line is read. Malformed lines are
    /// logged and skipped. Returns the number of signals applied.
    pub async fn run<R>(&self, reader: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut applied = 0;
        while let Some(line) = lines.next_line().await? {
            match parse_line(&line) {
                Ok(Some(signal)) => {
                    self.apply(signal).await;
                    applied += 1;
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "malformed feed line skipped"),
            }
        }
        info!(applied, "signal feed closed");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_signal() {
        assert_eq!(
            parse_line(r#"{"signal":"window","package":"com.bank"}"#).unwrap(),
            Some(FeedSignal::Window {
                package: "com.bank".into(),
                class_name: None,
                timestamp_millis: None,
            })
        );
        assert_eq!(
            parse_line(r#"{"signal":"screen_off"}"#).unwrap(),
            Some(FeedSignal::ScreenOff)
        );
        assert_eq!(
            parse_line(r#" {"signal":"unlocked","package":"com.bank"} "#).unwrap(),
            Some(FeedSignal::Unlocked {
                package: "com.bank".into()
            })
        );
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   # replay of session 3").unwrap(), None);
    }

    #[test]
    fn unknown_signal_is_an_error() {
        assert!(parse_line(r#"{"signal":"reboot"}"#).is_err());
        assert!(parse_line("not json").is_err());
    }
}
