//! Reassembly of notification fragments into one response buffer.
//!
//! A response arrives as a series of notifications on the telemetry
//! characteristic. The first fragment carries a 4-byte header:
//!
//! Start Byte | End Byte | Meaning
//! 0          | 1        | A constant header with value [0x05, 0x13]
//! 2          | 3        | Total payload length in bytes, little endian,
//!            |          | not counting this header
//!
//! The remainder of the first fragment and every later fragment are opaque
//! payload. The transport delivers notifications in order and without loss,
//! so no reordering or gap-filling is attempted; anything that breaks the
//! protocol is an [`Error::UnexpectedFragment`].

use crate::error::Error;
use crate::frame::MSG_HEADER;

const FRAGMENT_HEADER_LEN: usize = 4;

/// Accumulates notification fragments until the length declared by the
/// first fragment has been reached. One instance is used per fetch.
pub(crate) struct Reassembler {
    expected_len: Option<usize>,
    buffer: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            expected_len: None,
            buffer: Vec::new(),
        }
    }

    /// Append a fragment in arrival order.
    pub fn feed(&mut self, fragment: &[u8]) -> Result<(), Error> {
        match self.expected_len {
            None => {
                if fragment.len() < FRAGMENT_HEADER_LEN {
                    return Err(Error::UnexpectedFragment(
                        "first fragment shorter than its header",
                    ));
                }
                if fragment[0..2] != MSG_HEADER {
                    return Err(Error::UnexpectedFragment("bad first fragment header"));
                }
                let expected = u16::from_le_bytes([fragment[2], fragment[3]]) as usize;
                let payload = &fragment[FRAGMENT_HEADER_LEN..];
                if payload.len() > expected {
                    return Err(Error::UnexpectedFragment(
                        "payload exceeds the declared length",
                    ));
                }
                self.expected_len = Some(expected);
                self.buffer.extend_from_slice(payload);
            }
            Some(expected) => {
                if self.buffer.len() >= expected {
                    return Err(Error::UnexpectedFragment("fragment after completion"));
                }
                if self.buffer.len() + fragment.len() > expected {
                    return Err(Error::UnexpectedFragment(
                        "payload exceeds the declared length",
                    ));
                }
                self.buffer.extend_from_slice(fragment);
            }
        }

        Ok(())
    }

    /// True once the accumulated payload has reached the declared length.
    pub fn is_complete(&self) -> bool {
        self.expected_len
            .is_some_and(|expected| self.buffer.len() == expected)
    }

    /// The concatenated payload. Only meaningful once complete.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
fn header(total: u16) -> Vec<u8> {
    let mut fragment = MSG_HEADER.to_vec();
    fragment.extend_from_slice(&total.to_le_bytes());
    fragment
}

#[test]
fn test_two_fragments() {
    let mut reassembler = Reassembler::new();
    let mut first = header(10);
    first.extend_from_slice(&[1, 2, 3, 4]);

    reassembler.feed(&first).unwrap();
    assert!(!reassembler.is_complete());

    reassembler.feed(&[5, 6, 7, 8, 9, 10]).unwrap();
    assert!(reassembler.is_complete());
    assert_eq!(reassembler.buffer(), [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
}

#[test]
fn test_complete_only_after_last_fragment() {
    let payload: Vec<u8> = (0..20).collect();

    // Every in-order split of the payload into two fragments, plus the
    // whole payload in the first fragment.
    for split in 0..=payload.len() {
        let mut reassembler = Reassembler::new();
        let mut first = header(payload.len() as u16);
        first.extend_from_slice(&payload[..split]);

        reassembler.feed(&first).unwrap();
        assert_eq!(reassembler.is_complete(), split == payload.len());

        if split < payload.len() {
            reassembler.feed(&payload[split..]).unwrap();
        }
        assert!(reassembler.is_complete());
        assert_eq!(reassembler.buffer(), payload);
    }
}

#[test]
fn test_fragment_after_completion() {
    let mut reassembler = Reassembler::new();
    let mut first = header(2);
    first.extend_from_slice(&[1, 2]);
    reassembler.feed(&first).unwrap();
    assert!(reassembler.is_complete());

    let result = reassembler.feed(&[3]);
    assert!(matches!(result, Err(Error::UnexpectedFragment(_))));
}

#[test]
fn test_fragment_overflows_declared_length() {
    let mut reassembler = Reassembler::new();
    reassembler.feed(&header(4)).unwrap();

    let result = reassembler.feed(&[1, 2, 3, 4, 5]);
    assert!(matches!(result, Err(Error::UnexpectedFragment(_))));
}

#[test]
fn test_first_fragment_too_short() {
    let mut reassembler = Reassembler::new();
    let result = reassembler.feed(&[0x05, 0x13, 0x00]);
    assert!(matches!(result, Err(Error::UnexpectedFragment(_))));
}

#[test]
fn test_first_fragment_bad_header() {
    let mut reassembler = Reassembler::new();
    let result = reassembler.feed(&[0xff, 0xff, 0x0a, 0x00]);
    assert!(matches!(result, Err(Error::UnexpectedFragment(_))));
}
