// src/session/io_helpers.rs

use super::AttributeSession;
use crate::common::{
    error::ScpiError,
    hal_traits::{ScpiInstant, ScpiTimer, ScpiTransport},
    reply::ReplyFramer,
    timing,
};
use alloc::vec::Vec;
use core::fmt::Debug;
use core::time::Duration;
use nb::Result as NbResult;

// Implementation block for I/O related helpers
impl<IF> AttributeSession<IF>
where
    IF: ScpiTransport + ScpiTimer,
    IF::Error: Debug,
    IF::Instant: ScpiInstant,
{
    /// Executes a non-blocking I/O operation (`f`) repeatedly until it stops
    /// returning `WouldBlock`, the deadline passes, or the call is cancelled.
    pub(super) fn execute_blocking_io_until<FN, T>(
        &mut self,
        deadline: IF::Instant,
        mut f: FN,
    ) -> Result<T, ScpiError<IF::Error>>
    where
        FN: FnMut(&mut IF) -> NbResult<T, IF::Error>,
    {
        loop {
            match f(&mut self.interface) {
                Ok(result) => return Ok(result),
                Err(nb::Error::WouldBlock) => {
                    if self.cancel.is_cancelled() {
                        return Err(ScpiError::Cancelled);
                    }
                    if self.interface.now() >= deadline {
                        return Err(ScpiError::Timeout);
                    }
                    self.interface.delay_us(timing::IO_POLL_INTERVAL_US);
                }
                Err(nb::Error::Other(e)) => return Err(ScpiError::Io(e)),
            }
        }
    }

    /// Writes `message` followed by the schema sentinel, then flushes.
    pub(super) fn send_message(&mut self, message: &[u8]) -> Result<(), ScpiError<IF::Error>> {
        let schema = self.schema.clone();
        let settings = schema.settings();
        let deadline = self.interface.now() + settings.timeout;

        let result = message
            .iter()
            .chain(settings.sentinel.iter())
            .try_for_each(|byte| self.execute_blocking_io_until(deadline, |iface| iface.write_byte(*byte)))
            .and_then(|()| self.execute_blocking_io_until(deadline, |iface| iface.flush()));

        match result {
            Ok(()) => {
                tracing::trace!(bytes = message.len(), "message sent");
                Ok(())
            }
            Err(ScpiError::Timeout) => {
                tracing::warn!(
                    bytes = message.len(),
                    timeout_ms = settings.timeout.as_millis() as u64,
                    "transport did not accept the message before timeout"
                );
                Err(ScpiError::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    /// Reads until the schema sentinel, returning the bytes before it.
    ///
    /// The whole reply must arrive within the schema timeout. A sentinel
    /// inside definite-length block data does not end the reply.
    pub(super) fn receive_reply(&mut self) -> Result<Vec<u8>, ScpiError<IF::Error>> {
        let schema = self.schema.clone();
        let settings = schema.settings();
        let sentinel = settings.sentinel.as_slice();
        let limit = settings.max_reply_len;
        let deadline = self.interface.now() + settings.timeout;

        let mut framer = ReplyFramer::new(settings.reply_separator().as_bytes());
        let mut buffer = Vec::new();
        loop {
            let byte = match self.execute_blocking_io_until(deadline, |iface| iface.read_byte()) {
                Ok(byte) => byte,
                Err(ScpiError::Timeout) => {
                    tracing::warn!(
                        received = buffer.len(),
                        timeout_ms = settings.timeout.as_millis() as u64,
                        "no complete reply before timeout"
                    );
                    return Err(ScpiError::Timeout);
                }
                Err(e) => return Err(e),
            };
            buffer.push(byte);

            if framer.push(&buffer, sentinel) {
                buffer.truncate(buffer.len() - sentinel.len());
                tracing::trace!(bytes = buffer.len(), "reply received");
                return Ok(buffer);
            }
            if buffer.len() >= limit + sentinel.len() {
                return Err(ScpiError::BufferOverflow { limit });
            }
        }
    }

    /// Sleeps for `duration` on the interface timer, in millisecond steps so
    /// a cancel request is noticed promptly.
    pub(super) fn sleep(&mut self, duration: Duration) -> Result<(), ScpiError<IF::Error>> {
        let mut remaining = duration;
        let step = Duration::from_millis(1);
        while remaining >= step {
            if self.cancel.is_cancelled() {
                return Err(ScpiError::Cancelled);
            }
            self.interface.delay_ms(1);
            remaining -= step;
        }
        if !remaining.is_zero() {
            self.interface.delay_us(remaining.as_micros() as u32);
        }
        Ok(())
    }
}
