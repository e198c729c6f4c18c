// src/std_io.rs

//! Adapter from any `std::io` byte stream (TCP socket, serial port, pipe) to
//! the session's transport and timer traits.

use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use std::vec::Vec;

use crate::common::hal_traits::{ScpiTimer, ScpiTransport};

/// Wraps a stream and buffers writes until `flush`.
///
/// Put the stream in non-blocking mode (or give it a short read timeout) so
/// reads return `WouldBlock`/`TimedOut` while no data is pending; the session
/// turns those into its own timeout handling.
#[derive(Debug)]
pub struct StreamInterface<S> {
    stream: S,
    pending: Vec<u8>,
}

impl<S: Read + Write> StreamInterface<S> {
    pub fn new(stream: S) -> Self {
        StreamInterface {
            stream,
            pending: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

fn would_block(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted)
}

impl<S: Read + Write> ScpiTransport for StreamInterface<S> {
    type Error = io::Error;

    fn read_byte(&mut self) -> nb::Result<u8, io::Error> {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte) {
            Ok(0) => Err(nb::Error::Other(io::Error::new(
                ErrorKind::UnexpectedEof,
                "instrument closed the connection",
            ))),
            Ok(_) => Ok(byte[0]),
            Err(e) if would_block(&e) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }

    fn write_byte(&mut self, byte: u8) -> nb::Result<(), io::Error> {
        self.pending.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), io::Error> {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => {
                    return Err(nb::Error::Other(io::Error::new(
                        ErrorKind::WriteZero,
                        "instrument stopped accepting bytes",
                    )))
                }
                Ok(n) => {
                    self.pending.drain(..n);
                }
                Err(e) if would_block(&e) => return Err(nb::Error::WouldBlock),
                Err(e) => return Err(nb::Error::Other(e)),
            }
        }
        match self.stream.flush() {
            Ok(()) => Ok(()),
            Err(e) if would_block(&e) => Err(nb::Error::WouldBlock),
            Err(e) => Err(nb::Error::Other(e)),
        }
    }
}

impl<S> ScpiTimer for StreamInterface<S> {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(us as u64));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}
