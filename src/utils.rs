//! Utility functions for the ble-central-session crate.

use std::fmt::Write as _;

/// Maximum number of bytes rendered by [`hex_preview`].
pub const HEX_PREVIEW_LIMIT: usize = 20;

/// Render a payload as hex for log output.
///
/// At most [`HEX_PREVIEW_LIMIT`] bytes are shown; longer payloads end in `..`.
///
/// # Example
///
/// ```
/// use ble_central_session::utils::hex_preview;
///
/// assert_eq!(hex_preview(&[0x01, 0xAB]), "01ab");
/// ```
pub fn hex_preview(payload: &[u8]) -> String {
    let shown = &payload[..payload.len().min(HEX_PREVIEW_LIMIT)];
    let mut out = String::with_capacity(shown.len() * 2 + 2);
    for byte in shown {
        let _ = write!(out, "{:02x}", byte);
    }
    if payload.len() > HEX_PREVIEW_LIMIT {
        out.push_str("..");
    }
    out
}

/// Encode a value as a 2-byte little-endian payload.
///
/// # Example
///
/// ```
/// use ble_central_session::utils::u16_le_payload;
///
/// assert_eq!(u16_le_payload(0x005A), vec![0x5A, 0x00]);
/// ```
#[inline]
pub fn u16_le_payload(value: u16) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}
