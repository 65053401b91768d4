//! Fault taxonomy for device and controller operations.
//!
//! | Fault | Raised when | Recovery |
//! |-------|-------------|----------|
//! | `ManualInterference` | a human pressed a physical button | settle window, then reset |
//! | `Device` | register inconsistency, push never completes | microcontroller reset |
//! | `SoftPanic` | an expected screen never appeared | request fails, then reset |
//! | `Timeout` | the bus stopped answering | reset once, fatal on repeat |
//! | `Fatal` | state cannot be determined | terminal |
//! | `Bus` | serial I/O failure | terminal |

use std::fmt;

use brewpilot_core::registers::{CommandRegister, InputRegister};
use thiserror::Error;

use super::bus::BusError;

/// Register values at the moment a fault was raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub input: InputRegister,
    pub command: CommandRegister,
}

impl fmt::Display for RegisterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input=0x{:04x} command=0x{:04x}",
            self.input.raw(),
            self.command.raw()
        )
    }
}

#[derive(Debug, Error)]
pub enum Fault {
    #[error("manual button push detected [{snapshot}]")]
    ManualInterference { snapshot: RegisterSnapshot },
    #[error("{message} [{snapshot}]")]
    Device {
        message: String,
        snapshot: RegisterSnapshot,
    },
    #[error("{message} [{snapshot}]")]
    SoftPanic {
        message: String,
        snapshot: RegisterSnapshot,
    },
    #[error("communication timeout: {0}")]
    Timeout(String),
    #[error("{0}")]
    Fatal(String),
    #[error("bus failure: {0}")]
    Bus(BusError),
}

impl Fault {
    pub fn fatal(message: impl Into<String>) -> Self {
        Fault::Fatal(message.into())
    }

    pub fn is_soft_panic(&self) -> bool {
        matches!(self, Fault::SoftPanic { .. })
    }
}

impl From<BusError> for Fault {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Timeout(after) => Fault::Timeout(format!("no response within {after:?}")),
            BusError::Rtu(rtu) => Fault::Device {
                message: format!("malformed response: {rtu}"),
                snapshot: RegisterSnapshot::default(),
            },
            other => Fault::Bus(other),
        }
    }
}

pub type FaultResult<T> = Result<T, Fault>;
