// src/session/transaction.rs

use super::{AttributeSession, CallState, ChainPolicy};
use crate::common::{
    command::{compile, Operation, WireCommand},
    error::ScpiError,
    hal_traits::{ScpiInstant, ScpiTimer, ScpiTransport},
    reply::decode_reply,
    value::Value,
};
use alloc::vec::Vec;
use core::fmt::Debug;

impl<IF> AttributeSession<IF>
where
    IF: ScpiTransport + ScpiTimer,
    IF::Error: Debug,
    IF::Instant: ScpiInstant,
{
    /// Runs one call: compile everything, then exchange each message in turn.
    ///
    /// Read values are only returned if every exchange succeeds.
    pub(super) fn run(&mut self, operations: &[Operation]) -> Result<Vec<Value>, ScpiError<IF::Error>> {
        self.transition(CallState::Compiling);
        let result = self.plan(operations).and_then(|plan| self.exchange_all(&plan));

        match &result {
            Ok(values) => {
                self.transition(CallState::Done);
                tracing::debug!(operations = operations.len(), values = values.len(), "call complete");
            }
            Err(ScpiError::Cancelled) => {
                self.transition(CallState::Failed);
                tracing::warn!("call cancelled; transport may hold a partial reply");
            }
            Err(e) => {
                self.transition(CallState::Failed);
                tracing::debug!(error = %e, "call failed");
            }
        }
        self.cancel.clear();
        result
    }

    /// Compiles the messages for a call. Nothing is sent until all of them
    /// compile, so validation failures never leave partial writes behind.
    fn plan(&self, operations: &[Operation]) -> Result<Vec<WireCommand>, ScpiError<IF::Error>> {
        let sequential = operations.len() > 1
            && self.policy == ChainPolicy::Sequential
            && !self.schema.settings().supports_chains;

        if sequential {
            let plan = operations
                .iter()
                .map(|op| compile(&self.schema, core::slice::from_ref(op)))
                .collect::<Result<Vec<_>, _>>()?;
            tracing::debug!(messages = plan.len(), "device cannot chain; issuing sequential round trips");
            Ok(plan)
        } else {
            Ok(alloc::vec![compile(&self.schema, operations)?])
        }
    }

    fn exchange_all(&mut self, plan: &[WireCommand]) -> Result<Vec<Value>, ScpiError<IF::Error>> {
        let mut values = Vec::new();
        for command in plan {
            values.extend(self.exchange(command)?);
        }
        Ok(values)
    }

    /// Sends one message and, if it expects a reply, waits for and decodes it.
    fn exchange(&mut self, command: &WireCommand) -> Result<Vec<Value>, ScpiError<IF::Error>> {
        if self.cancel.is_cancelled() {
            return Err(ScpiError::Cancelled);
        }
        tracing::debug!(model = %self.schema.model(), command = %command, "sending");

        self.transition(CallState::AwaitingReply);
        self.send_message(command.as_bytes())?;
        if !command.expects_reply() {
            return Ok(Vec::new());
        }
        let reply = self.receive_reply()?;

        self.transition(CallState::Decoding);
        let values = decode_reply(&self.schema, command.reply_slots(), &reply)?;
        Ok(values)
    }

    fn transition(&mut self, next: CallState) {
        tracing::trace!(from = %self.state, to = %next, "session state");
        self.state = next;
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::AttributeError;
    use crate::common::schema::{AttributeDescriptor, AttributeSchema, BlockDataType};
    use crate::simulator::ScpiSimulator;
    use alloc::sync::Arc;
    use core::time::Duration;

    fn schema(chains: bool) -> Arc<AttributeSchema> {
        Arc::new(
            AttributeSchema::builder("TSG4104A")
                .supports_chains(chains)
                .argument_separator(",")
                .timeout(Duration::from_millis(50))
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
                .attribute("locked", AttributeDescriptor::bit("STAT", 0))
                .attribute("overheated", AttributeDescriptor::bit("STAT", 4))
                .attribute("reset", AttributeDescriptor::command("*RST").acknowledges_write(true))
                .attribute("samples", AttributeDescriptor::block("SAMP", BlockDataType::Uint8))
                .attribute("trace", AttributeDescriptor::block("TRAC", BlockDataType::Float32))
                .attribute("level", AttributeDescriptor::packet_item("LVL", 0))
                .attribute("noise", AttributeDescriptor::packet_item("LVL", 1))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_write_then_read_against_simulator() {
        let schema = schema(true);
        let mut s = AttributeSession::new(ScpiSimulator::new(schema.clone()), schema);

        s.set("frequency", 2400000000.0001234).unwrap();
        s.set("rf_output_on", true).unwrap();
        let values = s.get(&["frequency", "rf_output_on"]).unwrap();
        assert_eq!(values, [Value::Float(2400000000.0001), Value::Bool(true)]);
        assert_eq!(s.state(), CallState::Done);
    }

    #[test]
    fn test_bit_views_share_register() {
        let schema = schema(true);
        let mut sim = ScpiSimulator::new(schema.clone());
        sim.set_attribute("overheated", Value::Bool(true)).unwrap();
        let mut s = AttributeSession::new(sim, schema);

        let values = s.get(&["locked", "overheated"]).unwrap();
        assert_eq!(values, [Value::Bool(false), Value::Bool(true)]);
        assert_eq!(s.interface().received(), ["STAT,STAT"]);
    }

    #[test]
    fn test_acknowledged_invoke_consumes_reply() {
        let schema = schema(true);
        let mut s = AttributeSession::new(ScpiSimulator::new(schema.clone()), schema);
        s.set("power_dbm", -12.346).unwrap();
        let values = s
            .execute(&crate::common::command::AttributeRequest::new().invoke("reset").query("power_dbm"))
            .unwrap();
        assert_eq!(values, [Value::Float(-12.35)]);
    }

    #[test]
    fn test_sequential_policy_against_simulator() {
        let schema = schema(false);
        let sim = ScpiSimulator::new(schema.clone());
        let mut s = AttributeSession::new(sim, schema).with_policy(ChainPolicy::Sequential);

        s.set_many(&[("frequency", Value::Float(1.0e9)), ("power_dbm", Value::Float(-3.0))])
            .unwrap();
        assert_eq!(s.interface().received(), ["FREQ 1000000000.0000", "POWR -3.00"]);
        assert_eq!(
            s.get(&["power_dbm", "frequency"]).unwrap(),
            [Value::Float(-3.0), Value::Float(1.0e9)]
        );
    }

    #[test]
    fn test_silent_device_times_out() {
        let schema = schema(true);
        let mut sim = ScpiSimulator::new(schema.clone());
        sim.set_responsive(false);
        let mut s = AttributeSession::new(sim, schema);

        assert!(matches!(s.get(&["frequency"]), Err(ScpiError::Timeout)));
        assert_eq!(s.state(), CallState::Failed);
        // Writes expect no reply, so they still complete.
        s.set("power_dbm", 0.0).unwrap();
    }

    #[test]
    fn test_block_and_packet_reads_against_simulator() {
        let schema = schema(true);
        let mut sim = ScpiSimulator::new(schema.clone());
        // Framing bytes inside block data.
        let samples = Value::from(alloc::vec![Value::Int(13), Value::Int(10), Value::Int(44), Value::Int(7)]);
        let trace = Value::from(alloc::vec![Value::Float(1.5), Value::Float(-2.0)]);
        sim.set_attribute("samples", samples.clone()).unwrap();
        sim.set_attribute("trace", trace.clone()).unwrap();
        sim.set_attribute("noise", -97.25).unwrap();
        let mut s = AttributeSession::new(sim, schema);

        let values = s.get(&["samples", "trace", "noise", "level"]).unwrap();
        assert_eq!(values, [samples, trace, Value::Float(-97.25), Value::Float(0.0)]);
        assert_eq!(s.interface().received(), ["SAMP,TRAC,LVL,LVL"]);
        assert_eq!(s.state(), CallState::Done);
    }

    #[test]
    fn test_unset_attribute_reads_as_short_reply() {
        let schema = schema(true);
        let mut s = AttributeSession::new(ScpiSimulator::new(schema.clone()), schema);
        s.set("frequency", 1.0e9).unwrap();
        let err = s.get(&["frequency", "power_dbm"]).unwrap_err();
        assert!(matches!(err, ScpiError::Attribute(AttributeError::MalformedReply(_))));
    }
}
