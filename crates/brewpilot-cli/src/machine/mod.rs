//! Appliance control: register transport, device session, procedures and
//! the control loop that ties them together.

pub mod bus;
pub mod controller;
pub mod device;
pub mod event_log;
pub mod fault;
pub mod pins;
mod procedures;
pub mod timings;

#[cfg(test)]
pub mod sim;
