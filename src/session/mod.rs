// src/session/mod.rs

//! Blocking attribute session over a non-blocking transport.

mod io_helpers;
mod poller;
mod transaction;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::{self, Debug};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::common::{
    command::{AttributeRequest, Operation},
    error::{ReplyError, ScpiError},
    hal_traits::{ScpiInstant, ScpiTimer, ScpiTransport},
    schema::AttributeSchema,
    value::Value,
};

/// What the session does with a multi-operation call when the device cannot chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ChainPolicy {
    /// Always compile one message; fail with `ChainingUnsupported` if the
    /// device cannot take it.
    #[default]
    Chained,
    /// Issue one round trip per operation when the device cannot chain.
    /// All operations are still validated before the first byte is sent.
    Sequential,
}

/// Progress of the current (or last) call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Idle,
    Compiling,
    AwaitingReply,
    Decoding,
    Done,
    Failed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::Compiling => "compiling",
            CallState::AwaitingReply => "awaiting-reply",
            CallState::Decoding => "decoding",
            CallState::Done => "done",
            CallState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Aborts the in-flight call of the session it was taken from.
///
/// Cloneable and `Send`, so it can be handed to another thread. The flag is
/// cleared when the call it aborted (or any later call) finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Reads and writes schema attributes through an exclusively owned interface.
///
/// One call is in flight at a time; `&mut self` enforces it.
pub struct AttributeSession<IF>
where
    IF: ScpiTransport + ScpiTimer,
    IF::Error: Debug,
    IF::Instant: ScpiInstant,
{
    interface: IF,
    schema: Arc<AttributeSchema>,
    policy: ChainPolicy,
    state: CallState,
    cancel: CancelHandle,
}

impl<IF> AttributeSession<IF>
where
    IF: ScpiTransport + ScpiTimer,
    IF::Error: Debug,
    IF::Instant: ScpiInstant,
{
    pub fn new(interface: IF, schema: impl Into<Arc<AttributeSchema>>) -> Self {
        AttributeSession {
            interface,
            schema: schema.into(),
            policy: ChainPolicy::default(),
            state: CallState::Idle,
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_policy(mut self, policy: ChainPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_policy(&mut self, policy: ChainPolicy) {
        self.policy = policy;
    }

    pub fn policy(&self) -> ChainPolicy {
        self.policy
    }

    pub fn schema(&self) -> &Arc<AttributeSchema> {
        &self.schema
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn interface(&self) -> &IF {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut IF {
        &mut self.interface
    }

    /// Gives the interface back.
    pub fn release(self) -> IF {
        self.interface
    }

    // --- Public Blocking Methods ---

    /// Reads `names`, returning one value per name in the same order.
    ///
    /// All-or-nothing: any failure discards every value.
    pub fn get(&mut self, names: &[&str]) -> Result<Vec<Value>, ScpiError<IF::Error>> {
        let operations: Vec<Operation> = names.iter().map(|name| Operation::read(*name)).collect();
        self.run(&operations)
    }

    /// Reads a single attribute.
    pub fn get_one(&mut self, name: &str) -> Result<Value, ScpiError<IF::Error>> {
        let mut values = self.run(&[Operation::read(name)])?;
        values
            .pop()
            .ok_or_else(|| ReplyError::TokenCount { expected: 1, actual: 0 }.into())
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ScpiError<IF::Error>> {
        self.run(&[Operation::write(name, value)]).map(|_| ())
    }

    /// Writes several attributes. Every value is validated and encoded before
    /// anything is sent; one bad value aborts the whole batch.
    pub fn set_many(&mut self, writes: &[(&str, Value)]) -> Result<(), ScpiError<IF::Error>> {
        let operations: Vec<Operation> = writes
            .iter()
            .map(|(name, value)| Operation::write(*name, value.clone()))
            .collect();
        self.run(&operations).map(|_| ())
    }

    /// Invokes a command attribute such as `*RST`.
    pub fn invoke(&mut self, name: &str) -> Result<(), ScpiError<IF::Error>> {
        self.run(&[Operation::invoke(name)]).map(|_| ())
    }

    /// Runs a mixed batch, returning the values of its reads in request order.
    pub fn execute(&mut self, request: &AttributeRequest) -> Result<Vec<Value>, ScpiError<IF::Error>> {
        self.run(request.operations())
    }
}

impl<IF> Debug for AttributeSession<IF>
where
    IF: ScpiTransport + ScpiTimer + Debug,
    IF::Error: Debug,
    IF::Instant: ScpiInstant,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeSession")
            .field("model", &self.schema.model())
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("interface", &self.interface)
            .finish()
    }
}

// --- Test Mocks ---
#[cfg(test)]
pub(crate) mod mock {
    use super::CancelHandle;
    use crate::common::hal_traits::{ScpiTimer, ScpiTransport};
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;
    use core::time::Duration;

    #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
    pub struct MockInstant(pub u64);
    impl core::ops::Add<Duration> for MockInstant {
        type Output = Self;
        fn add(self, rhs: Duration) -> Self {
            MockInstant(self.0.saturating_add(rhs.as_micros() as u64))
        }
    }
    impl core::ops::Sub<MockInstant> for MockInstant {
        type Output = Duration;
        fn sub(self, rhs: MockInstant) -> Duration {
            Duration::from_micros(self.0.saturating_sub(rhs.0))
        }
    }

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct MockCommError;

    /// Staged reply bytes, a write log and a clock that only moves on delays.
    #[derive(Debug, Default)]
    pub struct MockInterface {
        pub current_time_us: u64,
        pub read_queue: VecDeque<u8>,
        pub write_log: Vec<u8>,
        pub read_error: bool,
        pub write_error: bool,
        /// Writes and flushes report `WouldBlock`.
        pub write_blocked: bool,
        pub flushes: usize,
        /// Fires the handle once the clock reaches the given time.
        pub cancel_at: Option<(u64, CancelHandle)>,
    }

    impl MockInterface {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn stage_read_data(&mut self, data: &[u8]) {
            self.read_queue.extend(data.iter().copied());
        }

        pub fn written(&self) -> &[u8] {
            &self.write_log
        }
    }

    impl ScpiTimer for MockInterface {
        type Instant = MockInstant;
        fn now(&self) -> MockInstant {
            MockInstant(self.current_time_us)
        }
        fn delay_us(&mut self, us: u32) {
            self.current_time_us = self.current_time_us.saturating_add(us as u64);
            if let Some((at, handle)) = &self.cancel_at {
                if self.current_time_us >= *at {
                    handle.cancel();
                }
            }
        }
        fn delay_ms(&mut self, ms: u32) {
            self.delay_us(ms.saturating_mul(1000));
        }
    }

    impl ScpiTransport for MockInterface {
        type Error = MockCommError;
        fn read_byte(&mut self) -> nb::Result<u8, MockCommError> {
            if self.read_error {
                return Err(nb::Error::Other(MockCommError));
            }
            self.read_queue.pop_front().ok_or(nb::Error::WouldBlock)
        }
        fn write_byte(&mut self, byte: u8) -> nb::Result<(), MockCommError> {
            if self.write_error {
                return Err(nb::Error::Other(MockCommError));
            }
            if self.write_blocked {
                return Err(nb::Error::WouldBlock);
            }
            self.write_log.push(byte);
            Ok(())
        }
        fn flush(&mut self) -> nb::Result<(), MockCommError> {
            if self.write_blocked {
                return Err(nb::Error::WouldBlock);
            }
            self.flushes += 1;
            Ok(())
        }
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::mock::{MockCommError, MockInterface};
    use super::*;
    use crate::common::error::{AttributeError, ReplyError};
    use crate::common::schema::{AccessKind, AttributeDescriptor};
    use core::time::Duration;

    fn tsg4104a(chains: bool) -> AttributeSchema {
        AttributeSchema::builder("TSG4104A")
            .supports_chains(chains)
            .argument_separator(",")
            .timeout(Duration::from_millis(200))
            .attribute(
                "frequency",
                AttributeDescriptor::float("FREQ")
                    .unit("Hz")
                    .bounds(950_000.0, 4_000_000_000.0)
                    .resolution(0.0001),
            )
            .attribute(
                "power_dbm",
                AttributeDescriptor::float("POWR").unit("dBm").bounds(-110.0, 16.5).resolution(0.01),
            )
            .attribute("rf_output_on", AttributeDescriptor::boolean("ENBR"))
            .attribute("reset", AttributeDescriptor::command("*RST"))
            .attribute("name", AttributeDescriptor::string("NAME").write_only())
            .build()
            .unwrap()
    }

    fn session(chains: bool) -> AttributeSession<MockInterface> {
        AttributeSession::new(MockInterface::new(), tsg4104a(chains))
    }

    #[test]
    fn test_set_sends_compiled_command_with_sentinel() {
        let mut s = session(false);
        s.set("frequency", 2400000000.0001234).unwrap();
        assert_eq!(s.interface().written(), b"FREQ 2400000000.0001\r\n");
        assert_eq!(s.interface().flushes, 1);
        assert_eq!(s.state(), CallState::Done);
    }

    #[test]
    fn test_get_example_scenario() {
        let mut s = session(true);
        s.interface_mut().stage_read_data(b"2400000000.0001,1\r\n");
        let values = s.get(&["frequency", "rf_output_on"]).unwrap();
        assert_eq!(values, [Value::Float(2400000000.0001), Value::Bool(true)]);
        assert_eq!(s.interface().written(), b"FREQ,ENBR\r\n");
        assert_eq!(s.state(), CallState::Done);
    }

    #[test]
    fn test_set_many_is_atomic() {
        let mut s = session(true);
        let err = s
            .set_many(&[("frequency", Value::Float(1.0e9)), ("power_dbm", Value::Int(999999))])
            .unwrap_err();
        assert!(matches!(
            err,
            ScpiError::Attribute(AttributeError::ValueOutOfRange { ref name, .. }) if name == "power_dbm"
        ));
        assert!(s.interface().written().is_empty());
        assert_eq!(s.state(), CallState::Failed);
    }

    #[test]
    fn test_set_many_atomic_even_when_sequential() {
        let mut s = session(false).with_policy(ChainPolicy::Sequential);
        let err = s
            .set_many(&[("frequency", Value::Float(1.0e9)), ("power_dbm", Value::Int(999999))])
            .unwrap_err();
        assert!(matches!(err, ScpiError::Attribute(AttributeError::ValueOutOfRange { .. })));
        assert!(s.interface().written().is_empty());
    }

    #[test]
    fn test_write_only_rejected_before_send() {
        let mut s = session(true);
        let err = s.get(&["frequency", "name"]).unwrap_err();
        assert!(matches!(
            err,
            ScpiError::Attribute(AttributeError::AccessViolation { operation: AccessKind::Read, .. })
        ));
        assert!(s.interface().written().is_empty());
    }

    #[test]
    fn test_chained_policy_fails_without_chaining() {
        let mut s = session(false);
        let err = s.get(&["frequency", "rf_output_on"]).unwrap_err();
        assert!(matches!(
            err,
            ScpiError::Attribute(AttributeError::ChainingUnsupported { requested: 2 })
        ));
        assert!(s.interface().written().is_empty());
    }

    #[test]
    fn test_sequential_policy_round_trips_per_name() {
        let mut s = session(false).with_policy(ChainPolicy::Sequential);
        s.interface_mut().stage_read_data(b"1000000\r\n0\r\n");
        let values = s.get(&["frequency", "rf_output_on"]).unwrap();
        assert_eq!(values, [Value::Float(1_000_000.0), Value::Bool(false)]);
        assert_eq!(s.interface().written(), b"FREQ\r\nENBR\r\n");
    }

    #[test]
    fn test_malformed_reply_count() {
        let mut s = session(true);
        s.interface_mut().stage_read_data(b"1,2\r\n");
        let err = s.get(&["frequency", "power_dbm", "rf_output_on"]).unwrap_err();
        assert!(matches!(
            err,
            ScpiError::Attribute(AttributeError::MalformedReply(ReplyError::TokenCount {
                expected: 3,
                actual: 2
            }))
        ));
        assert_eq!(s.state(), CallState::Failed);
    }

    #[test]
    fn test_timeout_when_device_is_silent() {
        let mut s = session(false);
        let err = s.get(&["frequency"]).unwrap_err();
        assert!(matches!(err, ScpiError::Timeout));
        // Clock only advances through delays, so reaching here proves the wait is bounded.
        assert!(s.interface().current_time_us >= 200_000);
        assert_eq!(s.state(), CallState::Failed);
    }

    #[test]
    fn test_set_times_out_when_transport_stalls() {
        let mut s = session(false);
        s.interface_mut().write_blocked = true;
        let err = s.set("power_dbm", 0.0).unwrap_err();
        assert!(matches!(err, ScpiError::Timeout));
        assert!(s.interface().current_time_us >= 200_000);
        assert!(s.interface().written().is_empty());
        assert_eq!(s.state(), CallState::Failed);
    }

    #[test]
    fn test_cancel_while_awaiting_reply() {
        let mut s = session(false);
        let handle = s.cancel_handle();
        s.interface_mut().cancel_at = Some((5_000, handle.clone()));

        let err = s.get(&["frequency"]).unwrap_err();
        assert!(matches!(err, ScpiError::Cancelled));
        // The query went out and the wait ended well before the timeout.
        assert_eq!(s.interface().written(), b"FREQ\r\n");
        assert!(s.interface().current_time_us >= 5_000);
        assert!(s.interface().current_time_us < 200_000);
        assert_eq!(s.state(), CallState::Failed);
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_cancel_aborts_wait_and_is_cleared() {
        let mut s = session(false);
        let handle = s.cancel_handle();
        handle.cancel();
        assert!(matches!(s.get(&["frequency"]), Err(ScpiError::Cancelled)));
        assert!(!handle.is_cancelled());

        s.interface_mut().stage_read_data(b"1000000\r\n");
        assert_eq!(s.get_one("frequency").unwrap(), Value::Float(1_000_000.0));
    }

    #[test]
    fn test_io_error_propagates() {
        let mut s = session(false);
        s.interface_mut().write_error = true;
        assert!(matches!(s.invoke("reset"), Err(ScpiError::Io(MockCommError))));
    }

    #[test]
    fn test_invoke_and_execute() {
        let mut s = session(true);
        s.invoke("reset").unwrap();
        assert_eq!(s.interface().written(), b"*RST\r\n");

        let mut s = session(true);
        s.interface_mut().stage_read_data(b"-3.5\r\n");
        let request = AttributeRequest::new().set("rf_output_on", true).query("power_dbm");
        let values = s.execute(&request).unwrap();
        assert_eq!(values, [Value::Float(-3.5)]);
        assert_eq!(s.interface().written(), b"ENBR 1,POWR\r\n");
    }
}
