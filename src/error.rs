use std::time::Duration;

/// Errors surfaced by a [`crate::StationClient`] fetch.
///
/// There are no silent retries inside this crate; every failure is returned
/// to the caller, who owns the polling loop and any retry policy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Could not establish (or re-establish) the BLE connection.
    #[error("failed to connect to the device: {0}")]
    ConnectionFailed(String),
    /// The connection dropped while a fetch was in flight. The session must
    /// be reconnected before the next fetch.
    #[error("connection lost while awaiting a response")]
    ConnectionLost,
    /// No complete response arrived within the configured fetch timeout.
    /// The connection is preserved and the session stays usable.
    #[error("no complete response within {0:?}")]
    Timeout(Duration),
    /// The reassembled response could not be decoded as a status packet.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
    /// A fetch was attempted while another one was still in flight.
    #[error("a fetch is already in progress on this session")]
    SessionBusy,
    /// A notification fragment violated the reassembly protocol.
    #[error("unexpected fragment: {0}")]
    UnexpectedFragment(&'static str),
}
