//! The binge streaming-log load harness.
//!
//! This library supports the binge binary found elsewhere in this project. One
//! half synthesizes viewer traffic -- many concurrent simulated watch sessions
//! emitting playback events over persistent `WebSocket` connections -- and the
//! other half bridges those events, one confirmed publish at a time, into a
//! Kafka topic. The bits and pieces here are not intended to be used outside
//! of supporting binge, although if they are helpful in other domains that's a
//! nice surprise.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod control;
pub mod event;
pub mod generator;
pub mod session;
pub mod signals;
