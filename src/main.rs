#[macro_use]
extern crate log;

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use indicatif::{ProgressBar, ProgressStyle};

use uart_image_loader::linux::{self, PortInfo, NO_HARDWARE_ID};
use uart_image_loader::{compare, Options, ProgressCallbacks, Programmer};

/// Bytes either side of a mismatch shown in the hex dump
const DUMP_CONTEXT: usize = 8;

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Image file to upload, prompted for when omitted
    #[structopt(parse(from_os_str))]
    file: Option<PathBuf>,

    /// Serial port to connect to
    #[structopt(long)]
    port: Option<String>,

    /// Select the first port reporting an Arduino
    #[structopt(short = "s", long)]
    auto_select: bool,

    /// Serial port baud rate
    #[structopt(long, default_value = "9600")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

enum Status {
    Verified,
    Mismatch,
}

struct Bar(ProgressBar);

impl Bar {
    fn new(unit: &str) -> Self {
        let b = ProgressBar::new(0);
        b.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40}] {pos}/{len} {msg}")
                .progress_chars("#> "),
        );
        b.set_message(unit);
        Self(b)
    }
}

impl ProgressCallbacks for Bar {
    fn init(&mut self, total: usize) {
        self.0.set_length(total as u64);
        self.0.set_position(0);
    }

    fn update(&mut self, current: usize) {
        self.0.set_position(current as u64);
    }

    fn finish(&mut self) {
        self.0.finish();
    }
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let code = match run(o) {
        Ok(Status::Verified) => 0,
        Ok(Status::Mismatch) => 2,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    std::process::exit(code);
}

fn run(o: Args) -> anyhow::Result<Status> {
    let file = match &o.file {
        Some(f) => f.clone(),
        None => PathBuf::from(prompt("please enter the file you would like to send over serial: ")?),
    };

    let image = std::fs::read(&file)
        .with_context(|| format!("failed to open file: {}", file.display()))?;

    if image.len() > u16::MAX as usize {
        bail!(
            "image of {} exceeds the {} byte read back limit",
            bytefmt::format(image.len() as u64),
            u16::MAX
        );
    }

    let port = match &o.port {
        Some(p) => p.clone(),
        None => select_port(o.auto_select)?,
    };

    info!(
        "Connecting to port {} with file {} of size {}",
        port,
        file.display(),
        bytefmt::format(image.len() as u64)
    );

    let mut p = Programmer::linux(&port, o.baud, o.options.clone())
        .with_context(|| format!("error connecting to serial port {}", port))?;

    p.init().context("error initialising device")?;

    info!("Uploading image");

    let mut bar = Bar::new("packets");
    let outcome = p.upload(&image, Some(&mut bar)).context("upload failed")?;
    if !outcome.is_success() {
        bail!("device reported upload failure (code 0x{:02x})", outcome.code());
    }

    p.flush()?;

    info!("Reading back image");

    let mut readback = vec![0u8; image.len()];
    let mut bar = Bar::new("bytes");
    let outcome = p.download(&mut readback, Some(&mut bar)).context("read back failed")?;
    if !outcome.is_success() {
        bail!("device reported read back failure (code 0x{:02x})", outcome.code());
    }

    // Close the port before reporting
    drop(p);

    let mismatches = compare(&image, &readback);
    if mismatches.is_empty() {
        info!("Verified {}", bytefmt::format(image.len() as u64));
        return Ok(Status::Verified);
    }

    for m in &mismatches {
        warn!("{}", m);
    }

    let first = mismatches[0].offset;
    let start = first.saturating_sub(DUMP_CONTEXT);
    let end = (first + DUMP_CONTEXT).min(image.len());
    info!("Image    [0x{:04x}..0x{:04x}]: {}", start, end, hex::encode(&image[start..end]));
    info!("Readback [0x{:04x}..0x{:04x}]: {}", start, end, hex::encode(&readback[start..end]));

    error!(
        "Verification failed: {} of {} bytes differ",
        mismatches.len(),
        image.len()
    );

    Ok(Status::Mismatch)
}

fn select_port(auto_select: bool) -> anyhow::Result<String> {
    let ports: Vec<PortInfo> = linux::list_ports()
        .context("failed to enumerate serial ports")?
        .collect();

    if auto_select {
        if let Some(p) = ports.iter().find(|p| p.description.contains("Arduino")) {
            info!("Selected {} ({})", p.port.display(), p.description);
            return Ok(p.port.display().to_string());
        }
        warn!("Failed to auto select a port, falling back to manual selection");
    }

    let valid: Vec<&PortInfo> = ports
        .iter()
        .filter(|p| p.hardware_id != NO_HARDWARE_ID)
        .collect();

    if valid.is_empty() {
        bail!(
            "failed to find any connected serial devices, checked {} ports",
            ports.len()
        );
    }

    println!("list of open ports:");
    for (i, p) in valid.iter().enumerate() {
        println!("\t{}: {} | {}", i, p.port.display(), p.description);
    }

    let selection = prompt("please enter the number corresponding to the port of the device: ")?;

    selection
        .parse::<usize>()
        .ok()
        .and_then(|i| valid.get(i))
        .map(|p| p.port.display().to_string())
        .ok_or_else(|| anyhow!("unknown port: {}", selection))
}

/// Read a trimmed, non-empty line from stdin
fn prompt(message: &str) -> anyhow::Result<String> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    prompt_from(&mut stdin.lock(), &mut stdout.lock(), message)
}

fn prompt_from<R: BufRead, W: Write>(input: &mut R, output: &mut W, message: &str) -> anyhow::Result<String> {
    write!(output, "{}", message)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let line = line.trim();
    if line.is_empty() {
        bail!("no input provided");
    }

    Ok(line.to_string())
}
