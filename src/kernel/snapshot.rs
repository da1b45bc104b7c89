// Last-known-good charge status for readers outside the charge task
//
// The charge task publishes one Snapshot at the end of every tick.
// Readers copy it out under a critical section, so a read never mixes
// fields from two ticks.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::charger::dc5v::Dc5vState;
use crate::charger::state::ChargeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub voltage_mv: u32,
    pub percent: u8,
    pub permillage: u16,
    pub state: ChargeState,
    pub dc5v: Option<Dc5vState>,
    pub full: bool,
    pub exists: bool,
    pub consume_ma: u16,
    pub low_battery: bool,
}

impl Snapshot {
    pub const fn empty() -> Self {
        Self {
            voltage_mv: 0,
            percent: 0,
            permillage: 0,
            state: ChargeState::Init,
            dc5v: None,
            full: false,
            exists: false,
            consume_ma: 0,
            low_battery: false,
        }
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

pub struct SharedSnapshot {
    inner: Mutex<CriticalSectionRawMutex, Cell<Snapshot>>,
}

impl SharedSnapshot {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(Snapshot::empty())),
        }
    }

    pub fn publish(&self, snapshot: Snapshot) {
        self.inner.lock(|cell| cell.set(snapshot));
    }

    pub fn get(&self) -> Snapshot {
        self.inner.lock(|cell| cell.get())
    }

    pub fn percent(&self) -> u8 {
        self.get().percent
    }

    pub fn permillage(&self) -> u16 {
        self.get().permillage
    }

    pub fn voltage_mv(&self) -> u32 {
        self.get().voltage_mv
    }

    pub fn state(&self) -> ChargeState {
        self.get().state
    }

    pub fn is_full(&self) -> bool {
        self.get().full
    }

    pub fn is_exists(&self) -> bool {
        self.get().exists
    }
}

impl Default for SharedSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Status published by the charge task.
pub static CHARGE_STATUS: SharedSnapshot = SharedSnapshot::new();
