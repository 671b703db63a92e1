//! Progressive container readiness
//!
//! A player can start decoding an ISO-BMFF style file as soon as its
//! top-level metadata box (`moov` by default) is on disk, long before the
//! whole file has arrived. This module finds the smallest downloaded prefix
//! that already holds that box.
//!
//! - [`boxes`] - top-level box header walker (compact, 64-bit extended and
//!   to-end-of-file sizes)
//! - [`validator`] - polling state machine bounded by an overall timeout
//! - [`config`] - thresholds, poll interval and scan budget

pub mod boxes;
pub mod config;
pub mod validator;

pub use boxes::{BoxLocation, FourCc, ScanOutcome};
pub use config::ReadinessConfig;
pub use validator::{ReadinessPhase, ReadinessValidator, ReadyFile};
