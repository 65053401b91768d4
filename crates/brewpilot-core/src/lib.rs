//! Core types and logic for brewpilot.
//!
//! brewpilot drives an appliance that has no command interface of its own:
//! a companion microcontroller captures the appliance display and emulates
//! button presses, and the controller recognizes screens by comparing the
//! captured framebuffer against a catalog of stored patterns.
//!
//! This crate holds the I/O-free parts, shared by the daemon and the CLI.
//!
//! # Modules
//!
//! - [`registers`]: input/command register bits and framebuffer assembly
//! - [`rtu`]: Modbus RTU request/response frames
//! - [`screen`]: the captured framebuffer
//! - [`art`]: bitmap-art text form of a framebuffer
//! - [`pattern`]: exact and mask patterns
//! - [`catalog`]: the pattern database
//! - [`state`]: appliance states and request kinds
//! - [`protocol`]: JSON-line request/response protocol
//! - [`error`]: API error types with suggestions
//!
//! # Pattern matching
//!
//! | Kind | Fits when |
//! |------|-----------|
//! | **Exact** | every framebuffer byte equals the pattern |
//! | **Mask** | every lit pattern pixel is lit on screen |

pub mod art;
pub mod catalog;
pub mod error;
pub mod pattern;
pub mod protocol;
pub mod registers;
pub mod rtu;
pub mod screen;
pub mod state;
