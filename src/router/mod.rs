//! Operation routing subsystem
//!
//! Pulls `(device, operation)` commands off a FIFO queue and dispatches
//! them by operation tag to the device request handler, choosing between
//! top-level and sub-device call shapes based on hierarchy position.
//! Failures are isolated per command; the dispatch loop never dies from
//! a single bad operation.

pub mod command;
pub mod dispatch;
pub mod handler;

pub use command::{Command, Operation, OperationTag};
pub use dispatch::{OperationRouter, RouterError};
pub use handler::{DeviceRequestHandler, HandlerError, LogRequestHandler};
