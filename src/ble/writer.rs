//! Characteristic value writes.

use tracing::{debug, trace, warn};

use crate::ble::connection::Connection;
use crate::ble::services::{CharacteristicRef, ServiceTree};
use crate::ble::stack::{BleStack, StackError};
use crate::error::{Error, Result};
use crate::utils::hex_preview;

/// Acknowledgement of a characteristic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    /// Value handle that was written.
    pub handle: u16,
    /// Number of bytes written.
    pub len: usize,
    /// Whether the peripheral confirmed the write.
    pub confirmed: bool,
}

/// Writes raw payloads to characteristic value handles.
///
/// Payload encoding is the caller's job; the writer only surfaces length
/// rejections from the stack as [`Error::InvalidPayload`].
pub struct AttributeWriter<'a, S: ?Sized> {
    stack: &'a S,
}

impl<'a, S: BleStack + ?Sized> AttributeWriter<'a, S> {
    /// Create a writer on top of a stack.
    pub fn new(stack: &'a S) -> Self {
        Self { stack }
    }

    /// Write `payload` to a characteristic.
    ///
    /// With `with_response = false` the write is fire-and-forget; otherwise
    /// this waits for the stack to confirm it.
    pub async fn write(
        &self,
        tree: &ServiceTree,
        connection: &Connection,
        reference: CharacteristicRef,
        payload: &[u8],
        with_response: bool,
    ) -> Result<WriteAck> {
        tree.ensure_current(connection)?;

        let characteristic = tree.find_characteristic(reference)?;
        let handle = characteristic.handle;

        if !characteristic.can_write(with_response) {
            warn!(
                "Characteristic {:#06x} does not advertise write{} support",
                handle,
                if with_response { "" } else { " without response" }
            );
        }

        trace!(
            "Writing {} bytes to {:#06x}: {}",
            payload.len(),
            handle,
            hex_preview(payload)
        );

        self.stack
            .write(handle, payload, with_response)
            .await
            .map_err(|source| match source {
                StackError::InvalidLength(len) => Error::InvalidPayload { handle, len },
                source => Error::WriteError { handle, source },
            })?;

        debug!("Wrote {} bytes to characteristic {:#06x}", payload.len(), handle);

        Ok(WriteAck {
            handle,
            len: payload.len(),
            confirmed: with_response,
        })
    }
}
