//! The device session: one BLE connection to one power station.

use crate::error::Error;
use crate::frame;
use crate::reassembler::Reassembler;
use crate::telemetry::TelemetrySnapshot;
use bluest::Adapter;
use bluest::Characteristic;
use bluest::Device;
use bluest::Uuid;
use futures_util::Stream;
use futures_util::StreamExt;
use tokio::time::timeout;
use tokio::time::Duration;

/// A session with one power station.
///
/// Owns the BLE connection and the write/notify characteristics. At most one
/// fetch can be in flight at a time; a second call while one is pending
/// fails with [`Error::SessionBusy`]. Use one client per device, there is no
/// cross-session state.
pub struct StationClient {
    adapter: Adapter,
    device: Device,
    write: Characteristic,
    notify: Characteristic,
    state: SessionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Awaiting,
    Disconnected,
}

/// Clears the `Awaiting` state when a fetch finishes, including when the
/// caller cancels it by dropping the future.
struct AwaitingGuard<'a>(&'a mut SessionState);

impl Drop for AwaitingGuard<'_> {
    fn drop(&mut self) {
        *self.0 = SessionState::Idle;
    }
}

impl StationClient {
    const TELEMETRY_SERVICE_ID: &'static str = "8c850001-0302-41c5-b46e-cf057c562025";
    const WRITE_CHARACTERISTIC_ID: &'static str = "8c850002-0302-41c5-b46e-cf057c562025";
    // Subscribable telemetry characteristic, handle 17 on the C300X
    const TELEMETRY_CHARACTERISTIC_ID: &'static str = "8c850003-0302-41c5-b46e-cf057c562025";
    // Solix devices advertise this UUID, used as the scan filter
    const IDENTIFIER_SERVICE_ID: &'static str = "0000ff09-0000-1000-8000-00805f9b34fb";
    // How long to scan before giving up on finding the device
    const DISCOVERY_TIMEOUT_S: u64 = 30;

    /// Create a new `StationClient`, which includes attempting to discover
    /// the device by its advertised name and connect to it.
    pub async fn new(device_name: &str) -> Result<Self, Error> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| Error::ConnectionFailed("default Bluetooth adapter not found".into()))?;
        adapter.wait_available().await.map_err(connection_failed)?;

        let device = timeout(
            Duration::from_secs(Self::DISCOVERY_TIMEOUT_S),
            Self::discover_device(device_name, &adapter),
        )
        .await
        .map_err(|_| Error::ConnectionFailed(format!("device '{device_name}' not found")))??;

        adapter
            .connect_device(&device)
            .await
            .map_err(connection_failed)?;
        tracing::debug!(device = %device_name, "connected");

        let service = device
            .discover_services_with_uuid(Self::telemetry_service_id())
            .await
            .map_err(connection_failed)?
            .first()
            .ok_or_else(|| {
                Error::ConnectionFailed("device does not offer the telemetry service".into())
            })?
            .clone();
        let write = service
            .discover_characteristics_with_uuid(Self::write_characteristic_id())
            .await
            .map_err(connection_failed)?
            .first()
            .ok_or_else(|| {
                Error::ConnectionFailed("device does not offer the command characteristic".into())
            })?
            .clone();
        let notify = service
            .discover_characteristics_with_uuid(Self::telemetry_characteristic_id())
            .await
            .map_err(connection_failed)?
            .first()
            .ok_or_else(|| {
                Error::ConnectionFailed("device does not offer the telemetry characteristic".into())
            })?
            .clone();

        Ok(Self {
            adapter,
            device,
            write,
            notify,
            state: SessionState::Idle,
        })
    }

    /// Request one status packet and decode it.
    ///
    /// Writes the status command, subscribes to telemetry notifications and
    /// reassembles the fragmented response. Fails with [`Error::Timeout`] if
    /// no complete response arrives within `fetch_timeout` (the connection
    /// is kept) and with [`Error::ConnectionLost`] if the device drops the
    /// connection mid-fetch. Cancelling the returned future unsubscribes and
    /// leaves the session idle.
    pub async fn fetch(&mut self, fetch_timeout: Duration) -> Result<TelemetrySnapshot, Error> {
        if self.state == SessionState::Awaiting {
            return Err(Error::SessionBusy);
        }

        self.try_connect().await?;

        self.state = SessionState::Awaiting;
        let result = {
            let _guard = AwaitingGuard(&mut self.state);
            Self::request_status(&self.write, &self.notify, fetch_timeout).await
        };

        if matches!(result, Err(Error::ConnectionLost)) {
            self.state = SessionState::Disconnected;
        }

        result
    }

    /// Disconnect from the device.
    pub async fn stop(self) -> Result<(), Error> {
        self.adapter
            .disconnect_device(&self.device)
            .await
            .map_err(connection_failed)?;
        Ok(())
    }

    async fn discover_device(name: &str, adapter: &Adapter) -> Result<Device, Error> {
        let required_services = [Self::identifier_service_id()];
        let mut adapter_events = adapter
            .scan(&required_services)
            .await
            .map_err(connection_failed)?;

        while let Some(discovered) = adapter_events.next().await {
            let device_name = discovered
                .device
                .name_async()
                .await
                .unwrap_or_else(|_| String::new());
            tracing::trace!(device = %device_name, "discovered");
            if device_name == name {
                return Ok(discovered.device);
            }
        }

        Err(Error::ConnectionFailed(format!("device '{name}' not found")))
    }

    /// Re-connect through the adapter if the connection has dropped. The
    /// adapter owns the actual reconnection machinery, this just asks it
    /// a few times.
    async fn try_connect(&mut self) -> Result<(), Error> {
        if !self.device.is_connected().await {
            let mut retries = 2;
            loop {
                match self.adapter.connect_device(&self.device).await {
                    Ok(()) => break,
                    Err(err) if retries > 0 => {
                        tracing::debug!(%err, "connect attempt failed, retrying");
                        retries -= 1;
                    }
                    Err(err) => return Err(connection_failed(err)),
                }
            }
            self.state = SessionState::Idle;
        }

        Ok(())
    }

    async fn request_status(
        write: &Characteristic,
        notify: &Characteristic,
        fetch_timeout: Duration,
    ) -> Result<TelemetrySnapshot, Error> {
        // Subscribe before writing so the first fragment cannot race the
        // subscription. Dropping the reader unsubscribes.
        let reader = notify.notify().await.map_err(|err| {
            tracing::warn!(%err, "failed to subscribe to telemetry");
            Error::ConnectionLost
        })?;

        let command = frame::encode(frame::STATUS_COMMAND);
        tracing::debug!(frame = %hex::encode(&command), "TX status request");
        write.write(&command).await.map_err(|err| {
            tracing::warn!(%err, "failed to write command");
            Error::ConnectionLost
        })?;

        match timeout(fetch_timeout, Self::read_response(reader)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(fetch_timeout)),
        }
    }

    /// Read notification fragments until the reassembler reports a complete
    /// response, then decode it. An end of stream or a stream error means
    /// the connection is gone.
    async fn read_response<T>(mut reader: T) -> Result<TelemetrySnapshot, Error>
    where
        T: Stream<Item = Result<Vec<u8>, bluest::Error>> + Send + Unpin,
    {
        let mut reassembler = Reassembler::new();

        while let Some(read_result) = reader.next().await {
            let fragment = read_result.map_err(|err| {
                tracing::warn!(%err, "notification error");
                Error::ConnectionLost
            })?;
            tracing::trace!(fragment = %hex::encode(&fragment), "RX notification");

            reassembler.feed(&fragment)?;
            if reassembler.is_complete() {
                return frame::decode(reassembler.buffer());
            }
        }

        tracing::debug!("end of notification stream");
        Err(Error::ConnectionLost)
    }

    fn telemetry_service_id() -> Uuid {
        Uuid::parse_str(Self::TELEMETRY_SERVICE_ID).unwrap()
    }

    fn write_characteristic_id() -> Uuid {
        Uuid::parse_str(Self::WRITE_CHARACTERISTIC_ID).unwrap()
    }

    fn telemetry_characteristic_id() -> Uuid {
        Uuid::parse_str(Self::TELEMETRY_CHARACTERISTIC_ID).unwrap()
    }

    fn identifier_service_id() -> Uuid {
        Uuid::parse_str(Self::IDENTIFIER_SERVICE_ID).unwrap()
    }
}

fn connection_failed(err: bluest::Error) -> Error {
    Error::ConnectionFailed(err.to_string())
}

#[cfg(test)]
fn fragments(packet: &[u8], split: usize) -> Vec<Result<Vec<u8>, bluest::Error>> {
    let mut first = frame::MSG_HEADER.to_vec();
    first.extend_from_slice(&(packet.len() as u16).to_le_bytes());
    first.extend_from_slice(&packet[..split]);
    vec![Ok(first), Ok(packet[split..].to_vec())]
}

#[tokio::test]
async fn test_read_response_assembles_fragments() {
    let packet = frame::reference_packet();
    let reader = futures_util::stream::iter(fragments(&packet, 100));
    let snapshot = StationClient::read_response(reader).await.unwrap();
    assert_eq!(snapshot.battery_percent, 72);
    assert_eq!(snapshot.serial_no, "AZV1234567");
}

#[tokio::test]
async fn test_read_response_end_of_stream() {
    let reader = futures_util::stream::iter(Vec::<Result<Vec<u8>, bluest::Error>>::new());
    let result = StationClient::read_response(reader).await;
    assert!(matches!(result, Err(Error::ConnectionLost)));
}

#[tokio::test]
async fn test_read_response_malformed_packet() {
    // Correctly fragmented but one byte too short to be a status packet
    let packet = frame::reference_packet();
    let reader = futures_util::stream::iter(fragments(&packet[..packet.len() - 1], 50));
    let result = StationClient::read_response(reader).await;
    assert!(matches!(result, Err(Error::MalformedResponse(_))));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_times_out_after_exactly_the_configured_duration() {
    let reader = futures_util::stream::pending::<Result<Vec<u8>, bluest::Error>>();
    let configured = Duration::from_secs(5);

    let started = tokio::time::Instant::now();
    let result = timeout(configured, StationClient::read_response(reader)).await;

    assert!(result.is_err());
    assert_eq!(started.elapsed(), configured);
}
