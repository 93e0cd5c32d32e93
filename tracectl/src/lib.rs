// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Crate to set up tracing for a single plugin invocation

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod control;

// re-exports
pub use control::DEFAULT_LOGLEVEL;
pub use control::{LogLevel, TraceCtlError};
pub use control::{init_tracing, subscriber};
pub use tracing_subscriber::filter::LevelFilter;
