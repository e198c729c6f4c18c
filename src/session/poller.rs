// src/session/poller.rs

use super::AttributeSession;
use crate::common::{
    error::ScpiError,
    hal_traits::{ScpiInstant, ScpiTimer, ScpiTransport},
    value::Value,
};
use core::fmt::Debug;
use core::ops::ControlFlow;

impl<IF> AttributeSession<IF>
where
    IF: ScpiTransport + ScpiTimer,
    IF::Error: Debug,
    IF::Instant: ScpiInstant,
{
    /// Repeats [`get`](Self::get) on `names`, sleeping the schema poll rate
    /// between samples, until `on_sample` breaks or a call fails.
    ///
    /// Returns the number of samples delivered. Failures end the loop; there
    /// is no retry.
    pub fn poll<F>(&mut self, names: &[&str], mut on_sample: F) -> Result<usize, ScpiError<IF::Error>>
    where
        F: FnMut(&[Value]) -> ControlFlow<()>,
    {
        let poll_rate = self.schema.settings().poll_rate;
        let mut samples = 0;
        loop {
            let values = self.get(names)?;
            samples += 1;
            if on_sample(&values).is_break() {
                tracing::debug!(samples, "polling stopped");
                return Ok(samples);
            }
            if let Err(e) = self.sleep(poll_rate) {
                self.cancel.clear();
                return Err(e);
            }
        }
    }
}
