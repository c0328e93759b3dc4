//! Hand-gesture vehicle control.
//!
//! Turns a live stream of hand-landmark observations into discrete drive commands (STOP, FORWARD,
//! BACKWARD, LEFT, RIGHT) and forwards them to a remote actuator as UDP datagrams, while the
//! operator adjusts control zones and detection sensitivity concurrently.
//!
//! The pipeline, one iteration per captured frame:
//!
//! ```text
//! FrameSource -> LandmarkSource -> classify -> CommandDispatcher -> UDP
//!                                     |
//!                                     +-> Observation (annotated frame + command)
//! ```
//!
//! The camera and the landmark detector are *not* part of this crate; they are plugged in through
//! the [`FrameSource`] and [`LandmarkSource`] traits. [`ControlSession`] owns the loop and its
//! lifecycle, [`ConfigStore`] carries the hot-swappable configuration between the operator's
//! thread and the session.
//!
//! [`FrameSource`]: video::FrameSource
//! [`LandmarkSource`]: hand::LandmarkSource
//! [`ControlSession`]: session::ControlSession
//! [`ConfigStore`]: config::ConfigStore

use log::LevelFilter;

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod draw;
pub mod hand;
pub mod session;
pub mod timer;
pub mod video;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
