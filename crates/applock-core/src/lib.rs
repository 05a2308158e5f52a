//! Foreground-app monitoring and lock enforcement.
//!
//! A [`supervisor::Supervisor`] owns exactly one live [`detector::Detector`]
//! at a time. Detectors turn platform signals into [`event::ForegroundEvent`]s
//! and hand them to the [`decision::LockEngine`], which consults the
//! [`registry::LockRegistry`] and the [`unlock_cache::UnlockCache`] and asks
//! the [`platform::TriggerSink`] to present a lock screen when needed.

pub mod clock;
pub mod decision;
pub mod detector;
pub mod error;
pub mod event;
pub mod paths;
pub mod platform;
pub mod registry;
pub mod restart;
pub mod settings;
pub mod signals;
pub mod supervisor;
pub mod task;
pub mod unlock_cache;

pub use decision::{IgnoreReason, LockDecision, LockEngine};
pub use error::{DetectorError, SettingsError, SupervisorError};
pub use event::ForegroundEvent;
pub use settings::{Backend, LockSettings, UnlockPolicy};
pub use supervisor::{Supervisor, SupervisorState, SupervisorStatus};
