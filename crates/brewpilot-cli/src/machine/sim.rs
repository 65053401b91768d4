//! Scripted microcontroller for tests.
//!
//! A script is a list of frames, each pairing a status word with a
//! framebuffer. Each complete screen poll consumes one frame: the first read
//! after the last screen block moves on to the next frame, and the last frame
//! repeats forever. Status reads report the current frame; a manual push is
//! reported once and then cleared, as the firmware does. A holding-register
//! write that presses buttons is echoed as "pushed" on the next status read
//! only, unless buttons are stuck.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use brewpilot_core::catalog::{PatternCatalog, REQUIRED_PATTERNS};
use brewpilot_core::pattern::PatternRecord;
use brewpilot_core::registers::{
    INPUT_REGISTER_ADDRESS, RAW_CAPTURE_LEN, SCREEN_BLOCK_ADDRESSES, SCREEN_BLOCK_LEN,
};
use brewpilot_core::screen::{Screen, PLANE_COUNT, PLANE_WIDTH, SCREEN_LEN};

use super::bus::{BusError, RegisterBus};
use super::controller::{Controller, ControllerHandle, ControllerOptions};
use super::device::{Delay, DeviceSession};
use super::event_log::EventLog;
use super::pins::ControlPins;
use super::timings::Timings;

pub const MANUAL_PUSH: u16 = 1 << 4;
pub const POWERED: u16 = 1 << 10;
pub const STANDBY: u16 = 1 << 11;
pub const ERROR_SCREEN: u16 = 1 << 12;
pub const RUNNING_SCREEN: u16 = 1 << 13;
pub const CAPTURE_HEALTHY: u16 = 1 << 14;
pub const REGISTER_HEALTHY: u16 = 1 << 15;

/// Switched on, white screen, capture healthy.
pub const RUNNING: u16 = POWERED | RUNNING_SCREEN | CAPTURE_HEALTHY | REGISTER_HEALTHY;
/// Switched on, red screen, capture healthy.
pub const ERROR: u16 = POWERED | ERROR_SCREEN | CAPTURE_HEALTHY | REGISTER_HEALTHY;

const BUTTON_BITS: u16 = 0x01FF;
const POWER_BUTTON: u16 = 1 << 8;

/// Byte index that marks pattern `id` in fixture screens.
fn marker_index(id: &str) -> usize {
    REQUIRED_PATTERNS
        .iter()
        .position(|candidate| *candidate == id)
        .unwrap_or_else(|| panic!("{id} is not a required pattern"))
}

/// A screen showing every pattern in `ids`.
pub fn screen_of(ids: &[&str]) -> Screen {
    let mut bytes = [0u8; SCREEN_LEN];
    for id in ids {
        bytes[marker_index(id)] |= 0x01;
    }
    Screen::from_array(bytes)
}

/// Catalog with one marker byte per required pattern.
///
/// Every pattern is a mask, so fixture screens can combine several.
pub fn catalog() -> PatternCatalog {
    let records = REQUIRED_PATTERNS
        .iter()
        .map(|&id| PatternRecord::mask(id, id.starts_with("Error_"), screen_of(&[id])))
        .collect();
    match PatternCatalog::from_records(records) {
        Ok(catalog) => catalog,
        Err(e) => panic!("fixture catalog invalid: {e}"),
    }
}

#[derive(Debug, Clone)]
pub struct SimFrame {
    pub status: u16,
    pub screen: Screen,
    manual_once: bool,
}

impl SimFrame {
    pub fn with_status(status: u16, ids: &[&str]) -> Self {
        Self {
            status,
            screen: screen_of(ids),
            manual_once: false,
        }
    }

    pub fn running(ids: &[&str]) -> Self {
        Self::with_status(RUNNING, ids)
    }

    pub fn error(ids: &[&str]) -> Self {
        Self::with_status(ERROR, ids)
    }

    /// Same frame, reporting a manual push on its first status read.
    pub fn manual(mut self) -> Self {
        self.manual_once = true;
        self
    }
}

/// Script for a chain of navigation steps starting at `from`.
///
/// A step polls the screen three times: to check the push is allowed, to
/// see it change, and to find its target. The last target shows once more
/// for whatever follows the walk.
pub fn walk(from: SimFrame, steps: &[SimFrame]) -> Vec<SimFrame> {
    let mut frames = vec![from];
    for step in steps {
        frames.extend(std::iter::repeat(step.clone()).take(3));
    }
    frames
}

/// Raw register blocks carrying `screen`.
fn blocks_for(screen: &Screen) -> Vec<Vec<u16>> {
    let mut raw = vec![0xA5u8; 15];
    for plane in 0..PLANE_COUNT {
        raw.extend([0x5A; 3]);
        raw.extend_from_slice(&screen.as_bytes()[plane * PLANE_WIDTH..(plane + 1) * PLANE_WIDTH]);
    }
    debug_assert_eq!(raw.len(), RAW_CAPTURE_LEN);
    let block_len = usize::from(SCREEN_BLOCK_LEN);
    raw.resize(SCREEN_BLOCK_ADDRESSES.len() * block_len * 2, 0);

    let words: Vec<u16> = raw
        .chunks(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    words.chunks(block_len).map(|chunk| chunk.to_vec()).collect()
}

struct SimState {
    current: SimFrame,
    upcoming: VecDeque<SimFrame>,
    advance_pending: bool,
    echo: u16,
    stuck_buttons: bool,
    timeout: bool,
    timeouts_left: usize,
    wake: Option<SimFrame>,
    writes: Vec<u16>,
    screen_reads: usize,
}

impl SimState {
    fn times_out(&mut self) -> bool {
        if self.timeouts_left > 0 {
            self.timeouts_left -= 1;
            return true;
        }
        self.timeout
    }
}

/// Cloneable handle; clones share one scripted device.
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    pub fn new(frames: Vec<SimFrame>) -> Self {
        let mut upcoming: VecDeque<SimFrame> = frames.into();
        let current = upcoming
            .pop_front()
            .unwrap_or_else(|| SimFrame::with_status(0, &[]));
        Self {
            state: Arc::new(Mutex::new(SimState {
                current,
                upcoming,
                advance_pending: false,
                echo: 0,
                stuck_buttons: false,
                timeout: false,
                timeouts_left: 0,
                wake: None,
                writes: Vec::new(),
                screen_reads: 0,
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Replace the remaining script, starting from the next screen read.
    pub fn script(&self, frames: Vec<SimFrame>) {
        let mut state = self.state();
        let mut upcoming: VecDeque<SimFrame> = frames.into();
        if let Some(first) = upcoming.pop_front() {
            state.current = first;
        }
        state.upcoming = upcoming;
        state.advance_pending = false;
    }

    pub fn set_stuck_buttons(&self, stuck: bool) {
        self.state().stuck_buttons = stuck;
    }

    pub fn set_timeout(&self, timeout: bool) {
        self.state().timeout = timeout;
    }

    /// Time out the next `count` transactions only.
    pub fn set_timeouts(&self, count: usize) {
        self.state().timeouts_left = count;
    }

    /// Switch to `frame` for good once the power button is pressed.
    pub fn set_wake_on_power(&self, frame: SimFrame) {
        self.state().wake = Some(frame);
    }

    pub fn writes(&self) -> Vec<u16> {
        self.state().writes.clone()
    }

    pub fn screen_reads(&self) -> usize {
        self.state().screen_reads
    }
}

impl RegisterBus for SimBus {
    fn read_input_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError> {
        let mut state = self.state();
        if state.times_out() {
            return Err(BusError::Timeout(Duration::from_millis(100)));
        }
        if state.advance_pending {
            state.advance_pending = false;
            if let Some(next) = state.upcoming.pop_front() {
                state.current = next;
            }
        }

        if address == INPUT_REGISTER_ADDRESS {
            let mut status = state.current.status;
            if state.current.manual_once {
                status |= MANUAL_PUSH;
                state.current.manual_once = false;
            }
            if state.echo != 0 {
                status |= state.echo;
                if !state.stuck_buttons {
                    state.echo = 0;
                }
            }
            return Ok(vec![status; usize::from(count)]);
        }

        let Some(index) = SCREEN_BLOCK_ADDRESSES.iter().position(|&a| a == address) else {
            return Ok(vec![0; usize::from(count)]);
        };
        if index == 0 {
            state.screen_reads += 1;
        }
        if index == SCREEN_BLOCK_ADDRESSES.len() - 1 {
            state.advance_pending = true;
        }
        Ok(blocks_for(&state.current.screen).swap_remove(index))
    }

    fn write_holding_register(&mut self, _address: u16, value: u16) -> Result<(), BusError> {
        let mut state = self.state();
        if state.times_out() {
            return Err(BusError::Timeout(Duration::from_millis(100)));
        }
        state.writes.push(value);
        state.echo = value & BUTTON_BITS;
        if value & POWER_BUTTON != 0 {
            if let Some(frame) = state.wake.take() {
                state.current = frame;
                state.upcoming.clear();
                state.advance_pending = false;
            }
        }
        Ok(())
    }
}

/// Delay that records requested sleeps instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingDelay {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingDelay {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps().iter().sum()
    }

    pub fn clear(&self) {
        self.sleeps.lock().unwrap().clear();
    }
}

impl Delay for RecordingDelay {
    fn sleep(&mut self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Pins that record reset-line levels.
#[derive(Clone, Default)]
pub struct RecordingPins {
    resets: Arc<Mutex<Vec<bool>>>,
    new_data: Arc<AtomicBool>,
}

impl RecordingPins {
    pub fn reset_levels(&self) -> Vec<bool> {
        self.resets.lock().unwrap().clone()
    }

    pub fn set_new_data(&self, high: bool) {
        self.new_data.store(high, Ordering::SeqCst);
    }
}

impl ControlPins for RecordingPins {
    fn set_reset(&mut self, high: bool) -> anyhow::Result<()> {
        self.resets.lock().unwrap().push(high);
        Ok(())
    }

    fn new_data(&mut self) -> anyhow::Result<bool> {
        Ok(self.new_data.load(Ordering::SeqCst))
    }
}

/// A controller wired to a scripted device.
pub struct Rig {
    pub controller: Controller,
    pub handle: ControllerHandle,
    pub bus: SimBus,
    pub delay: RecordingDelay,
    pub pins: RecordingPins,
}

impl Rig {
    pub fn new(frames: Vec<SimFrame>) -> Self {
        Self::with_options(frames, ControllerOptions::default())
    }

    pub fn with_carafe(frames: Vec<SimFrame>) -> Self {
        Self::with_options(
            frames,
            ControllerOptions {
                carafe_attached: true,
                ..ControllerOptions::default()
            },
        )
    }

    pub fn with_options(frames: Vec<SimFrame>, options: ControllerOptions) -> Self {
        let bus = SimBus::new(frames);
        let delay = RecordingDelay::default();
        let pins = RecordingPins::default();
        let session = DeviceSession::new(
            Box::new(bus.clone()),
            Box::new(delay.clone()),
            catalog(),
            Timings::default(),
            Arc::new(EventLog::in_memory()),
        );
        let (controller, handle) = Controller::new(session, Box::new(pins.clone()), options);
        Self {
            controller,
            handle,
            bus,
            delay,
            pins,
        }
    }
}
