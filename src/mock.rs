//! Scripted serial port for unit tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use crate::{ProgressCallbacks, SerialPort};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MockError;

/// Port replaying a fixed sequence of received bytes and recording everything written
#[derive(Default)]
pub struct MockPort {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    dtr: Vec<bool>,
    fail_when_empty: bool,
}

impl MockPort {
    /// Reports `WouldBlock` once the script is exhausted
    pub fn new(rx: &[u8]) -> Self {
        Self {
            rx: rx.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Reports a link error once the script is exhausted
    pub fn failing(rx: &[u8]) -> Self {
        Self {
            fail_when_empty: true,
            ..Self::new(rx)
        }
    }

    pub fn tx(&self) -> &[u8] {
        &self.tx
    }

    pub fn dtr(&self) -> &[bool] {
        &self.dtr
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Read<u8> for MockPort {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, MockError> {
        match self.rx.pop_front() {
            Some(v) => Ok(v),
            None if self.fail_when_empty => Err(nb::Error::Other(MockError)),
            None => Err(nb::Error::WouldBlock),
        }
    }
}

impl Write<u8> for MockPort {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), MockError> {
        self.tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), MockError> {
        Ok(())
    }
}

impl SerialPort<MockError> for MockPort {
    fn set_dtr(&mut self, level: bool) -> Result<(), MockError> {
        self.dtr.push(level);
        Ok(())
    }
}

pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

/// Delay advancing a shared millisecond clock instead of sleeping
pub struct ClockDelay(Rc<Cell<u32>>);

impl ClockDelay {
    pub fn new(clock: &Rc<Cell<u32>>) -> Self {
        Self(clock.clone())
    }
}

impl DelayMs<u32> for ClockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.set(self.0.get() + ms);
    }
}

/// Progress observer recording every callback
#[derive(Default)]
pub struct Recorder {
    pub total: Option<usize>,
    pub updates: Vec<usize>,
    pub finished: bool,
}

impl ProgressCallbacks for Recorder {
    fn init(&mut self, total: usize) {
        self.total = Some(total);
    }

    fn update(&mut self, current: usize) {
        self.updates.push(current);
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}
