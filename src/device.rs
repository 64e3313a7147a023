// Device-class hint and power/thermal signals supplied by collaborators.
// The core never computes these; it only reads them to pick TTLs and intervals.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// Battery level below which a device on battery is treated as power saving.
pub const LOW_BATTERY_PERCENT: u8 = 20;

/// Thermal status above which the device is treated as throttled (0 = none, 3 = severe).
pub const THERMAL_THROTTLE_STATUS: u8 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    #[default]
    Mobile,
    Tv,
    LowPower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerState {
    pub on_battery: bool,
    pub battery_percent: u8,
    /// 0 = none .. 6 = shutdown, same scale as the platform thermal status.
    pub thermal_status: u8,
    pub low_power_mode: bool,
}

impl Default for PowerState {
    fn default() -> Self {
        Self {
            on_battery: false,
            battery_percent: 100,
            thermal_status: 0,
            low_power_mode: false,
        }
    }
}

impl PowerState {
    pub fn is_thermal_throttled(&self) -> bool {
        self.thermal_status > THERMAL_THROTTLE_STATUS
    }

    pub fn is_low_battery(&self) -> bool {
        self.on_battery && self.battery_percent < LOW_BATTERY_PERCENT
    }
}

/// Shared, externally updated view of the device.
#[derive(Debug)]
pub struct DeviceSignals {
    class: DeviceClass,
    power: RwLock<PowerState>,
}

impl Default for DeviceSignals {
    fn default() -> Self {
        Self::new(DeviceClass::default())
    }
}

impl DeviceSignals {
    pub fn new(class: DeviceClass) -> Self {
        Self::with_power(class, PowerState::default())
    }

    pub fn with_power(class: DeviceClass, power: PowerState) -> Self {
        Self {
            class,
            power: RwLock::new(power),
        }
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub fn update_power(&self, power: PowerState) {
        let mut guard = self.power.write().unwrap_or_else(|e| e.into_inner());
        *guard = power;
    }

    /// Current power state. Fails only if a writer panicked mid-update.
    pub fn try_power(&self) -> anyhow::Result<PowerState> {
        self.power
            .read()
            .map(|g| *g)
            .map_err(|e| anyhow::anyhow!("device signals lock poisoned: {}", e))
    }

    /// Current power state, recovering from a poisoned lock.
    pub fn power(&self) -> PowerState {
        *self.power.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_tv(&self) -> bool {
        self.class == DeviceClass::Tv
    }

    pub fn power_saving(&self) -> bool {
        is_power_saving(self.class, &self.power())
    }
}

/// TV and low-power classes always save power; external power never does;
/// otherwise low-power mode, a low battery or severe thermal status do.
pub fn is_power_saving(class: DeviceClass, power: &PowerState) -> bool {
    match class {
        DeviceClass::Tv | DeviceClass::LowPower => true,
        DeviceClass::Mobile if !power.on_battery => false,
        DeviceClass::Mobile => {
            power.low_power_mode || power.is_low_battery() || power.is_thermal_throttled()
        }
    }
}
