use std::collections::BTreeMap;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::info;

use crate::collab::{Level, OutputPins};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Digital(Level),
    Duty(u8),
}

/// Records pin writes and logs them. Used on benches without GPIO.
#[derive(Debug, Default)]
pub struct SimulatedPins {
    pins: Mutex<BTreeMap<u8, PinState>>,
}

impl SimulatedPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, pin: u8) -> Option<PinState> {
        self.pins.lock().get(&pin).copied()
    }
}

impl OutputPins for SimulatedPins {
    fn set_output(&self, pin: u8, level: Level) -> Result<()> {
        info!("[sim] gpio {} -> {:?}", pin, level);
        self.pins.lock().insert(pin, PinState::Digital(level));
        Ok(())
    }

    fn set_duty(&self, pin: u8, percent: u8) -> Result<()> {
        anyhow::ensure!(percent <= 100, "duty {} out of range", percent);
        info!("[sim] pwm {} -> {}%", pin, percent);
        self.pins.lock().insert(pin, PinState::Duty(percent));
        Ok(())
    }
}
