use serde::Serialize;

/// One complete set of readings decoded from a status packet.
///
/// Serializes to a flat JSON object; the field names are the stable external
/// representation consumed by downstream tools, so renaming them is a
/// breaking change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Device serial number as reported in the status packet
    pub serial_no: String,
    /// Battery state of charge in %
    pub battery_percent: u8,
    /// Power currently charging the battery in W (0 when discharging)
    pub charge_power_w: f64,
    /// Power currently drawn from the battery in W
    pub discharge_power_w: f64,
    /// Battery temperature in °C
    pub temperature_c: f64,
    /// AC output power in W
    pub ac_power_out_w: f64,
    /// Solar input power in W
    pub solar_power_in_w: f64,
    /// State of the light bar on the front of the unit
    pub light_bar_state: LightBarState,
    /// Lifetime solar energy harvested in kWh
    pub energy_solar_total_kwh: f64,
    /// Lifetime energy stored into the battery in kWh
    pub energy_battery_total_kwh: f64,
    /// Lifetime energy delivered to loads in kWh
    pub energy_total_out_kwh: f64,
}

/// The state of the light bar. The device distinguishes three brightness
/// levels but this crate only reports whether it is lit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LightBarState {
    Off,
    On,
    Unknown,
}
