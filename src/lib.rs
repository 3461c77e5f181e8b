//! Read telemetry from Anker Solix power stations over Bluetooth Low Energy
//!
//! Tested with a Solix C300X. No cloud account or vendor pairing is needed;
//! the device answers a proprietary status request on a GATT characteristic
//! and this crate speaks just enough of that protocol to ask for a status
//! packet, reassemble the fragmented reply and decode it.
//!
//! Currently the following data can be accessed:
//!
//! - Serial number
//! - Battery state of charge (%)
//! - Battery charge/discharge power (W)
//! - Battery temperature (°C)
//! - Solar input and AC output power (W)
//! - Light bar state
//! - Lifetime energy counters (kWh)
//!
//! Everything else about the BLE link (adapter state, pairing, the platform
//! bindings) is delegated to [`bluest`].
//!
//! # Example
//!
//! ```no_run
//! # use std::time::Duration;
//! #
//! # #[tokio::main]
//! # pub async fn main(){
//!     let mut client = solixread::StationClient::new("Solix C300X").await.unwrap();
//!     loop {
//!         let snapshot = client.fetch(Duration::from_secs(10)).await.unwrap();
//!         println!("battery at {}%", snapshot.battery_percent);
//!         tokio::time::sleep(Duration::from_secs(30)).await;
//!     }
//! # }
//! ```

mod error;
mod frame;
mod reassembler;
mod station_client;
mod telemetry;

pub use error::Error;
pub use station_client::StationClient;
pub use telemetry::{LightBarState, TelemetrySnapshot};
