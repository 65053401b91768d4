//! Appliance controller: the control loop and its recovery policy.
//!
//! The controller owns the device session and runs on a dedicated thread.
//! Everything outside that thread talks to it through a
//! [`ControllerHandle`]: requests go in through a one-slot channel guarded
//! by the busy flag, and the published [`StatusReport`] comes back out.
//!
//! One loop cycle either resynchronizes (state `Resetting`) or fulfills the
//! pending request, and faults raised along the way pick the recovery:
//! a device fault resets the microcontroller, a manual push waits for the
//! appliance to settle, a bus timeout resets once and is fatal on repeat.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use brewpilot_core::catalog::names::{MAKING_HOT_WATER, PROGRESS_BAR};
use brewpilot_core::error::ApiError;
use brewpilot_core::protocol::EventEntry;
use brewpilot_core::state::{ApplianceState, Request, RequestKind, StatusReport};
use tracing::{error, info, warn};

use super::device::DeviceSession;
use super::event_log::EventLog;
use super::fault::{Fault, FaultResult};
use super::pins::ControlPins;

#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    /// A milk carafe is fitted, so its prompts are expected.
    pub carafe_attached: bool,
    /// Where the pattern catalog, including archived screens, is saved on
    /// shutdown.
    pub archive_path: Option<PathBuf>,
}

/// State shared between the control thread and its handles.
struct Shared {
    status: RwLock<StatusReport>,
    busy: AtomicBool,
    stop: AtomicBool,
}

impl Shared {
    fn report(&self) -> StatusReport {
        let mut report = self
            .status
            .read()
            .map(|status| status.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());
        report.busy = self.busy.load(Ordering::SeqCst);
        report
    }

    fn update(&self, apply: impl FnOnce(&mut StatusReport)) {
        match self.status.write() {
            Ok(mut status) => apply(&mut status),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}

pub struct Controller {
    pub(super) session: DeviceSession,
    pins: Box<dyn ControlPins>,
    shared: Arc<Shared>,
    requests: Receiver<Request>,
    pending: Option<Request>,
    pub(super) state: ApplianceState,
    pub(super) out_of_coffee: bool,
    pub(super) carafe_attached: bool,
    timed_out: bool,
    archive_path: Option<PathBuf>,
}

/// Cloneable access to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    shared: Arc<Shared>,
    requests: SyncSender<Request>,
    events: Arc<EventLog>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ControllerHandle {
    /// Offer a request to the controller.
    ///
    /// Refused in `FatalError`, while another request is in flight, and for
    /// drink and setting requests outside `Idle`. At most one caller wins
    /// per idle window.
    pub fn set_request(&self, kind: RequestKind, parameter: i32) -> bool {
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        // The control loop only moves the state while busy, so it is stable
        // from here on.
        let state = self.shared.report().state;
        let accepted = state != ApplianceState::FatalError
            && (kind.allowed_from_any_state() || state == ApplianceState::Idle)
            && self.requests.try_send(Request::new(kind, parameter)).is_ok();
        if !accepted {
            self.shared.busy.store(false, Ordering::SeqCst);
        }
        accepted
    }

    /// Like [`set_request`](Self::set_request), with the reason on refusal.
    pub fn submit(&self, kind: RequestKind, parameter: i32) -> Result<(), ApiError> {
        if !self.is_running() {
            return Err(ApiError::controller_unavailable());
        }
        if self.set_request(kind, parameter) {
            return Ok(());
        }
        let status = self.status();
        Err(ApiError::request_rejected(kind, status.state, status.busy))
    }

    pub fn status(&self) -> StatusReport {
        self.shared.report()
    }

    pub fn events_after(&self, after: u64) -> Vec<EventEntry> {
        self.events.entries_after(after)
    }

    /// Whether the control thread is still alive. Handles that never had a
    /// thread attached count as running.
    pub fn is_running(&self) -> bool {
        match self.thread.lock() {
            Ok(thread) => thread.as_ref().map_or(true, |t| !t.is_finished()),
            Err(_) => false,
        }
    }

    fn attach(&self, thread: JoinHandle<()>) {
        if let Ok(mut slot) = self.thread.lock() {
            *slot = Some(thread);
        }
    }

    /// Ask the control loop to exit and wait for it. Blocks for up to one
    /// procedure.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let thread = match self.thread.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("Control thread panicked");
            }
        }
    }
}

impl Controller {
    pub fn new(
        session: DeviceSession,
        pins: Box<dyn ControlPins>,
        options: ControllerOptions,
    ) -> (Self, ControllerHandle) {
        let (sender, receiver) = mpsc::sync_channel(1);
        let shared = Arc::new(Shared {
            status: RwLock::new(StatusReport::default()),
            busy: AtomicBool::new(true),
            stop: AtomicBool::new(false),
        });
        let handle = ControllerHandle {
            shared: Arc::clone(&shared),
            requests: sender,
            events: Arc::clone(session.events()),
            thread: Arc::new(Mutex::new(None)),
        };
        let controller = Self {
            session,
            pins,
            shared,
            requests: receiver,
            pending: None,
            state: ApplianceState::Resetting,
            out_of_coffee: false,
            carafe_attached: options.carafe_attached,
            timed_out: false,
            archive_path: options.archive_path,
        };
        (controller, handle)
    }

    /// Spawn the control loop on its own thread.
    pub fn start(
        session: DeviceSession,
        pins: Box<dyn ControlPins>,
        options: ControllerOptions,
    ) -> anyhow::Result<ControllerHandle> {
        let (controller, handle) = Self::new(session, pins, options);
        let thread = std::thread::Builder::new()
            .name("brewpilot-control".into())
            .spawn(move || controller.run())
            .context("spawning control thread")?;
        handle.attach(thread);
        Ok(handle)
    }

    pub(super) fn set_state(&mut self, state: ApplianceState) {
        if self.state != state {
            info!("state {} -> {}", self.state, state);
        }
        self.state = state;
        self.shared.update(|status| status.state = state);
    }

    pub(super) fn set_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.shared.update(|status| status.error = error);
    }

    pub(super) fn set_out_of_coffee(&mut self, out_of_coffee: bool) {
        self.out_of_coffee = out_of_coffee;
        self.shared.update(|status| status.out_of_coffee = out_of_coffee);
    }

    fn set_busy(&self, busy: bool) {
        self.shared.busy.store(busy, Ordering::SeqCst);
    }

    pub fn run(mut self) {
        self.startup();
        while !self.shared.stop.load(Ordering::SeqCst) {
            self.step();
        }
        self.shutdown();
    }

    /// Reset the microcontroller and start resynchronizing.
    pub(crate) fn startup(&mut self) {
        self.session.events().info("Controller started");
        self.reset_pico();
        self.pending = None;
        self.set_busy(true);
        self.set_state(ApplianceState::Resetting);
    }

    fn shutdown(&mut self) {
        if let Some(path) = &self.archive_path {
            match self.session.catalog().save(path) {
                Ok(()) => info!("Saved pattern catalog to {}", path.display()),
                Err(e) => error!("Failed to save pattern catalog: {}", e),
            }
        }
        self.session.events().info("Controller stopped");
    }

    /// One pass of the control loop.
    pub fn step(&mut self) {
        if self.pending.is_none() {
            if let Ok(request) = self.requests.try_recv() {
                self.pending = Some(request);
            }
        }

        if self.state == ApplianceState::FatalError {
            let idle = self.session.timings().fatal_idle;
            self.session.sleep(idle);
        } else if let Err(fault) = self.cycle() {
            self.handle_fault(fault);
        }

        self.check_new_data();
        let pause = self.session.timings().main_loop;
        self.session.sleep(pause);
    }

    fn cycle(&mut self) -> FaultResult<()> {
        if self.state == ApplianceState::Resetting {
            self.resynchronize()?;
        }

        let Some(request) = self.pending else {
            return Ok(());
        };
        if self.fulfill(request)? {
            if matches!(
                self.state,
                ApplianceState::Brewing | ApplianceState::Configuring
            ) {
                self.set_state(ApplianceState::Idle);
            }
            self.pending = None;
            self.set_busy(false);
        } else {
            self.pending = None;
            self.set_state(ApplianceState::Resetting);
        }
        Ok(())
    }

    /// Work out where the appliance is and bring it back to a known state.
    fn resynchronize(&mut self) -> FaultResult<()> {
        self.session.events().info("Resetting started!");
        self.diagnose()?;

        if self.state == ApplianceState::Running {
            while self.session.wait_for_initialization()? {}
            let refresh = self.session.timings().screen_refresh;
            self.session.sleep(refresh);
            self.diagnose()?;
        }

        if self.state == ApplianceState::Running
            && self.session.check_any(&[PROGRESS_BAR, MAKING_HOT_WATER])?
        {
            // A drink started before the reset; let it finish.
            self.session.events().info("Waiting for running procedure to finish");
            let limit = self.session.timings().max_procedure_wait;
            if self.session.shows(MAKING_HOT_WATER)? {
                self.session.wait_while(MAKING_HOT_WATER, limit)?;
            } else {
                self.session.wait_until_done(limit)?;
            }
            let refresh = self.session.timings().screen_refresh;
            self.session.sleep(refresh);
            self.diagnose()?;
        }

        if self.state == ApplianceState::Running {
            if !self.return_home()? {
                return Err(Fault::fatal(
                    "Resetting failed, machine state cannot be determined!",
                ));
            }
            self.set_state(ApplianceState::Idle);
        }

        self.session.events().info("Resetting done!");
        self.set_busy(self.pending.is_some());
        self.timed_out = false;
        Ok(())
    }

    fn fulfill(&mut self, request: Request) -> FaultResult<bool> {
        self.session.events().info(format!(
            "Request {} started with additional parameter: {}",
            request.kind, request.parameter
        ));
        self.set_state(request.kind.working_state());

        let result = match request.kind {
            RequestKind::GetState => {
                self.diagnose()?;
                if self.state == ApplianceState::Running {
                    if self.is_home_screen()? {
                        self.set_state(ApplianceState::Idle);
                        true
                    } else {
                        false
                    }
                } else {
                    true
                }
            }
            RequestKind::PowerOn => self.power_on()?,
            RequestKind::PowerOff => {
                self.power_off()?;
                true
            }
            RequestKind::Espresso => self.make_espresso()?,
            RequestKind::Coffee => self.make_coffee()?,
            RequestKind::Americano => self.make_americano()?,
            RequestKind::HotWater => self.make_hot_water()?,
            RequestKind::SetAroma => self.set_aroma(request.parameter)?,
            RequestKind::SetTemperature => self.set_temperature(request.parameter)?,
        };

        self.session.events().info(format!(
            "Request {} fulfilled with result: {}",
            request.kind, result
        ));
        Ok(result)
    }

    fn handle_fault(&mut self, fault: Fault) {
        self.set_busy(true);
        match fault {
            Fault::Device { .. } => {
                self.set_state(ApplianceState::Resetting);
                self.session.events().error(format!("Device error: {fault}"));
                self.reset_pico();
            }
            Fault::ManualInterference { .. } => {
                self.session.events().warn(format!("{fault}"));
                self.settle_after_manual_push();
            }
            Fault::Timeout(_) => {
                self.set_state(ApplianceState::Resetting);
                self.recover_from_timeout(&fault);
            }
            Fault::Fatal(message) => {
                self.session.events().error(format!("Fatal error: {message}"));
                self.set_error(message);
                self.set_state(ApplianceState::FatalError);
            }
            other => {
                self.session
                    .events()
                    .error(format!("Unknown exception: {other}"));
                self.set_error("Unknown exception!");
                self.set_state(ApplianceState::FatalError);
            }
        }
    }

    /// Reset the microcontroller after a first timeout; a second one in a
    /// row is fatal. Returns whether the controller is still usable.
    fn recover_from_timeout(&mut self, fault: &Fault) -> bool {
        self.session.events().error(format!("{fault}"));
        if self.timed_out {
            self.session
                .events()
                .error("Multiple communication timeouts occurred!");
            self.set_error("Communication timeout!");
            self.set_state(ApplianceState::FatalError);
            return false;
        }
        self.reset_pico();
        self.timed_out = true;
        true
    }

    /// Wait for a quiet window after a manual push, dismissing carafe
    /// prompts meanwhile. Further pushes and device faults restart the
    /// window. Timeouts follow the reset-once rule of the main loop.
    fn settle_after_manual_push(&mut self) {
        let step = self.session.timings().status_poll;
        let window = self.session.timings().manual_settle;
        let mut quiet = Duration::ZERO;
        while quiet < window {
            self.set_state(ApplianceState::Resetting);
            match self.guard_carafe() {
                Ok(()) => {
                    self.session.sleep(step);
                    quiet += step;
                }
                Err(Fault::ManualInterference { .. }) => {
                    quiet = Duration::ZERO;
                }
                Err(fault @ Fault::Device { .. }) => {
                    self.session.events().error(format!("Device error: {fault}"));
                    self.reset_pico();
                    quiet = Duration::ZERO;
                }
                Err(fault @ Fault::Timeout(_)) => {
                    if !self.recover_from_timeout(&fault) {
                        return;
                    }
                    quiet = Duration::ZERO;
                }
                Err(fault) => {
                    self.session
                        .events()
                        .error(format!("Settling after manual push failed: {fault}"));
                    self.set_error(fault.to_string());
                    self.set_state(ApplianceState::FatalError);
                    return;
                }
            }
        }
    }

    /// Pulse the microcontroller reset line.
    fn reset_pico(&mut self) {
        self.session.events().info("Resetting microcontroller");
        if let Err(e) = self.pins.set_reset(false) {
            self.session.events().error(format!("{e:#}"));
        }
        let low = self.session.timings().reset_low;
        self.session.sleep(low);
        if let Err(e) = self.pins.set_reset(true) {
            self.session.events().error(format!("{e:#}"));
        }
        let settle = self.session.timings().reset_settle;
        self.session.sleep(settle);
    }

    /// Queue a state check when the microcontroller flags new data and
    /// nothing else is in flight.
    fn check_new_data(&mut self) {
        let raised = match self.pins.new_data() {
            Ok(raised) => raised,
            Err(e) => {
                warn!("Reading new-data line failed: {:#}", e);
                false
            }
        };
        if raised
            && self
                .shared
                .busy
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.session.events().info("New data detected!");
            self.pending = Some(Request::new(RequestKind::GetState, 0));
        }
    }
}
