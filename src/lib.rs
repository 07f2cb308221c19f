//! Serial image loader.
//!
//! Uploads a memory image to an attached device over a serial link, reads it
//! back and compares the two to catch transfer errors.

use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::serial::{Write, Read};
use embedded_hal::blocking::delay::DelayMs;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod protocol;
pub use protocol::{Opcode, Outcome};

pub mod verify;
pub use verify::{compare, Mismatch};

#[cfg(test)]
mod mock;

use protocol::FLAG_READY;

pub trait SerialPort<E>: Write<u8, Error=E> + Read<u8, Error=E> {
    fn set_dtr(&mut self, level: bool) -> Result<(), E>;
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError: core::fmt::Debug> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    #[error("timeout awaiting device response")]
    ResponseTimeout,

    #[error("device not ready (flag 0x{0:02x})")]
    NotReady(u8),

    #[error("device reported a zero buffer size")]
    InvalidBufferSize,

    #[error("length of {0} bytes does not fit the 16-bit length field")]
    ImageTooLarge(usize),
}

impl<SerialError: core::fmt::Debug> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Do not reset the device on connection
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_reset: bool,

    /// Timeout to wait for each device response byte
    #[cfg_attr(feature = "structopt", structopt(long, default_value="10000"))]
    pub response_timeout_ms: u32,

    /// Period to poll for device responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value="1"))]
    pub poll_delay_ms: u32,

    /// Period to wait for the device to start after reset
    #[cfg_attr(feature = "structopt", structopt(long, default_value="2000"))]
    pub init_delay_ms: u32,

    /// Log every packet and byte exchanged with the device
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            no_reset: false,
            response_timeout_ms: 10_000,
            poll_delay_ms: 1,
            init_delay_ms: 2_000,
            verbose: false,
        }
    }
}

/// Progress update callbacks
pub trait ProgressCallbacks {
    /// Start a report over `total` units (packets or bytes)
    fn init(&mut self, total: usize);
    /// Update with the number of units completed
    fn update(&mut self, current: usize);
    /// Finish the report
    fn finish(&mut self);
}

pub struct Programmer<P, D, E> {
    options: Options,
    port: P,
    delay: D,
    _err: PhantomData<E>,
}

impl <P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self{options, port, delay, _err: PhantomData}
    }

    /// Release the underlying port and delay, closing the session
    pub fn release(self) -> (P, D) {
        (self.port, self.delay)
    }

    /// Reset the device (unless disabled), wait for it to start and clear the link
    pub fn init(&mut self) -> Result<(), Error<E>> {

        if !self.options.no_reset {
            debug!("Resetting device");

            self.port.set_dtr(true)?;
            self.delay.delay_ms(100u32);
            self.port.set_dtr(false)?;
        }

        if self.options.init_delay_ms > 0 {
            debug!("Waiting {} ms for device start", self.options.init_delay_ms);
            self.delay.delay_ms(self.options.init_delay_ms);
        }

        self.flush()
    }

    /// Flush outgoing data and discard anything pending on the link
    pub fn flush(&mut self) -> Result<(), Error<E>> {
        block!(self.port.flush())?;

        let mut discarded = 0usize;
        loop {
            match self.port.read() {
                Ok(_) => discarded += 1,
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(e.into()),
            }
        }

        if discarded > 0 {
            debug!("Discarded {} stale bytes", discarded);
        }

        Ok(())
    }

    /// Upload an image using the device-reported buffer size to chunk packets
    pub fn upload(&mut self, image: &[u8], mut progress: Option<&mut dyn ProgressCallbacks>)
    -> Result<Outcome, Error<E>> {

        debug!("Starting write session for {} bytes", image.len());
        self.send_opcode(Opcode::Write)?;

        let buffer_size = self.read_u16()? as usize;
        debug!("Reported buffer size: {}", buffer_size);

        if buffer_size == 0 {
            error!("Device reported a zero buffer size");
            return Err(Error::InvalidBufferSize);
        }

        let packets = protocol::packet_count(image.len(), buffer_size);
        if let Some(p) = progress.as_mut() {
            p.init(packets);
        }

        for (i, packet) in image.chunks(buffer_size).enumerate() {
            let flag = self.read_u8()?;
            if flag != FLAG_READY {
                error!("Device not ready for packet {} (flag: 0x{:02x})", i, flag);
                return Err(Error::NotReady(flag));
            }

            if self.options.verbose {
                debug!("Packet {}/{}: {} bytes at offset {}", i + 1, packets, packet.len(), i * buffer_size);
            }

            // Bounded by the 16-bit buffer size
            self.write_u16(packet.len() as u16)?;
            self.write_bytes(packet)?;

            if let Some(p) = progress.as_mut() {
                p.update(i + 1);
            }
        }

        if let Some(p) = progress.as_mut() {
            p.finish();
        }

        let outcome = Outcome::from(self.read_u8()?);
        debug!("Write session outcome: {}", outcome);

        Ok(outcome)
    }

    /// Read `buff.len()` bytes back from the device.
    ///
    /// On a short read the error is returned and the remainder of `buff` is left untouched.
    pub fn download(&mut self, buff: &mut [u8], mut progress: Option<&mut dyn ProgressCallbacks>)
    -> Result<Outcome, Error<E>> {

        let len = buff.len();
        if len > u16::MAX as usize {
            return Err(Error::ImageTooLarge(len));
        }

        debug!("Starting read session for {} bytes", len);
        self.send_opcode(Opcode::Read)?;
        self.write_u16(len as u16)?;

        if let Some(p) = progress.as_mut() {
            p.init(len);
        }

        for (i, b) in buff.iter_mut().enumerate() {
            *b = match self.read_u8() {
                Ok(v) => v,
                Err(e) => {
                    error!("Read aborted after {} of {} bytes", i, len);
                    return Err(e);
                }
            };

            if self.options.verbose {
                debug!("Byte {}: 0x{:02x}", i, *b);
            }

            if let Some(p) = progress.as_mut() {
                p.update(i + 1);
            }
        }

        if let Some(p) = progress.as_mut() {
            p.finish();
        }

        let outcome = Outcome::from(self.read_u8()?);
        debug!("Read session outcome: {}", outcome);

        Ok(outcome)
    }

    /// Write a single byte at the provided address
    pub fn write_byte(&mut self, address: u16, value: u8) -> Result<Outcome, Error<E>> {
        debug!("Writing 0x{:02x} to 0x{:04x}", value, address);

        self.send_opcode(Opcode::WriteByte)?;
        self.write_u16(address)?;
        self.write_bytes(&[value])?;

        Ok(Outcome::from(self.read_u8()?))
    }

    /// Read a single byte from the provided address
    pub fn read_byte(&mut self, address: u16) -> Result<(u8, Outcome), Error<E>> {
        debug!("Reading from 0x{:04x}", address);

        self.send_opcode(Opcode::ReadByte)?;
        self.write_u16(address)?;

        let value = self.read_u8()?;
        let outcome = Outcome::from(self.read_u8()?);

        Ok((value, outcome))
    }

    fn send_opcode(&mut self, opcode: Opcode) -> Result<(), Error<E>> {
        if self.options.verbose {
            debug!("Sending opcode {:?}", opcode);
        }
        self.write_bytes(&[opcode.as_byte()])
    }

    fn write_u16(&mut self, v: u16) -> Result<(), Error<E>> {
        self.write_bytes(&protocol::encode_u16(v))
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        for b in data {
            block!(self.port.write(*b))?;
        }
        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16, Error<E>> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(protocol::decode_u16([lo, hi]))
    }

    fn read_u8(&mut self) -> Result<u8, Error<E>> {
        let mut t = 0u32;

        loop {
            // Attempt to read from serial port
            match self.port.read() {
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(e.into()),
                Ok(v) => return Ok(v),
            };

            // Wait for delay period
            let poll = self.options.poll_delay_ms.max(1);
            self.delay.delay_ms(poll);
            t = t.saturating_add(poll);

            if t > self.options.response_timeout_ms {
                error!("Receive timeout");
                return Err(Error::ResponseTimeout)
            }
        }
    }
}
