use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serial_core::{
    BaudRate, CharSize, Error as SerialError, ErrorKind as SerialErrorKind, FlowControl, Parity,
    SerialDevice as _, SerialPortSettings as _, StopBits,
};
use linux_embedded_hal::{Delay, Serial};

use crate::{Options, Programmer, SerialPort};

const SYS_CLASS_TTY: &str = "/sys/class/tty";

/// Hardware id reported for ports without a USB device behind them
pub const NO_HARDWARE_ID: &str = "n/a";

fn io_kind(e: SerialError) -> IoErrorKind {
    match e.kind() {
        SerialErrorKind::NoDevice => IoErrorKind::NotFound,
        SerialErrorKind::InvalidInput => IoErrorKind::InvalidInput,
        SerialErrorKind::Io(kind) => kind,
    }
}

impl SerialPort<IoErrorKind> for Serial {
    fn set_dtr(&mut self, level: bool) -> Result<(), IoErrorKind> {
        self.0.set_dtr(level).map_err(io_kind)
    }
}

impl Programmer<Serial, Delay, IoErrorKind> {
    /// Create a new linux serial port programmer instance
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply settings
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings)?;

        // Empty reads surface as WouldBlock immediately, the programmer's delay is the only wait
        port.0.set_timeout(Duration::from_millis(0))?;

        // Return instance
        Ok(Self::new(port, Delay {}, options))
    }
}

/// A serial port found on the system
#[derive(Clone, PartialEq, Debug)]
pub struct PortInfo {
    /// Device node, e.g. `/dev/ttyACM0`
    pub port: PathBuf,
    pub description: String,
    pub hardware_id: String,
}

/// Enumerate serial ports known to the kernel.
///
/// Entries are produced lazily as the tty class directory is walked.
pub fn list_ports() -> std::io::Result<impl Iterator<Item = PortInfo>> {
    let entries = std::fs::read_dir(SYS_CLASS_TTY)?;

    Ok(entries
        .filter_map(|e| e.ok())
        .filter_map(|e| port_info(&e.path())))
}

fn port_info(class_dir: &Path) -> Option<PortInfo> {
    let name = class_dir.file_name()?.to_str()?.to_string();

    // Virtual consoles and ptys have no backing device
    let device = std::fs::canonicalize(class_dir.join("device")).ok()?;

    // ACM ports hang off the USB interface, USB-serial adapters one level deeper
    let usb = device
        .ancestors()
        .take(4)
        .find(|p| p.join("idVendor").is_file());

    let (description, hardware_id) = match usb {
        Some(dir) => {
            let attr = |n: &str| {
                std::fs::read_to_string(dir.join(n))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default()
            };

            let mut description = format!("{} {}", attr("manufacturer"), attr("product"))
                .trim()
                .to_string();
            if description.is_empty() {
                description = name.clone();
            }

            let hardware_id = format!("USB VID:PID={}:{}", attr("idVendor"), attr("idProduct"));
            (description, hardware_id)
        }
        None => (name.clone(), NO_HARDWARE_ID.to_string()),
    };

    trace!("Found port {} ({}, {})", name, description, hardware_id);

    Some(PortInfo {
        port: Path::new("/dev").join(&name),
        description,
        hardware_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("uart-image-loader-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn usb_port_reports_vid_pid() {
        let root = scratch("usb");
        let usb = root.join("devices/usb1/1-1");
        let iface = usb.join("1-1:1.0");
        fs::create_dir_all(&iface).unwrap();
        fs::write(usb.join("idVendor"), "2341\n").unwrap();
        fs::write(usb.join("idProduct"), "0043\n").unwrap();
        fs::write(usb.join("manufacturer"), "Arduino (www.arduino.cc)\n").unwrap();
        fs::write(usb.join("product"), "Uno\n").unwrap();

        let class = root.join("tty/ttyACM0");
        fs::create_dir_all(&class).unwrap();
        symlink(&iface, class.join("device")).unwrap();

        let info = port_info(&class).unwrap();
        assert_eq!(info.port, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(info.description, "Arduino (www.arduino.cc) Uno");
        assert_eq!(info.hardware_id, "USB VID:PID=2341:0043");

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn platform_port_has_no_hardware_id() {
        let root = scratch("platform");
        let dev = root.join("devices/platform/serial8250/tty/ttyS0");
        fs::create_dir_all(&dev).unwrap();

        let class = root.join("tty/ttyS0");
        fs::create_dir_all(&class).unwrap();
        symlink(&dev, class.join("device")).unwrap();

        let info = port_info(&class).unwrap();
        assert_eq!(info.description, "ttyS0");
        assert_eq!(info.hardware_id, NO_HARDWARE_ID);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn virtual_tty_is_skipped() {
        let root = scratch("virtual");
        let class = root.join("tty/tty1");
        fs::create_dir_all(&class).unwrap();

        assert_eq!(port_info(&class), None);

        fs::remove_dir_all(&root).unwrap();
    }
}
