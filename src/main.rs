use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{Level, info, warn};

mod host;
mod machine;

use crate::host::comm::{CommConfig, connect_serial};
use crate::host::joystick::connect_joysticks;
use crate::host::logging::{default_log_file, setup_logging_file, setup_logging_stdio};
use crate::host::ps2::{PS2_RESYNC_TIMEOUT, connect_keyboard, connect_mouse};
use crate::machine::generic::baud::BaudPacer;
use crate::machine::generic::vsync::{FrameClock, FrameRate};
use crate::machine::ikbd::joystick::JoystickPorts;
use crate::machine::ikbd::output::DelayMode;
use crate::machine::ikbd::reset::BOOT_WINDOW;
use crate::machine::ikbd::{Ikbd, IkbdConfig};

/// Atari ST IKBD emulator
/// Speaks the ST keyboard protocol on a serial link, driven by PS/2 input
#[derive(Parser)]
#[command(name = "ps2-ikbd")]
#[command(about = "An Atari ST IKBD emulator fed by a PS/2 keyboard and mouse")]
struct Args {
    /// PS/2 keyboard byte source (scan code set 2)
    #[arg(long, value_name = "PATH")]
    keyboard: Option<PathBuf>,

    /// PS/2 mouse byte source (3 byte packets)
    #[arg(long, value_name = "PATH")]
    mouse: Option<PathBuf>,

    /// Joystick GPIO samples, one byte each
    #[arg(long, value_name = "PATH")]
    joysticks: Option<PathBuf>,

    /// Serial: single bidirectional pipe
    #[arg(long = "serial-pipe", value_name = "PIPE")]
    serial_pipe: Option<PathBuf>,

    /// Serial: separate read and write pipes
    #[arg(long = "serial-pipes", num_args = 2, value_names = ["RX", "TX"])]
    serial_pipes: Vec<PathBuf>,

    /// Serial: execute a command and connect to its stdin/stdout
    #[arg(long = "serial-exec", value_name = "COMMAND")]
    serial_exec: Option<String>,

    /// Serial: execute a command and connect to its pty
    #[arg(long = "serial-exec-pty", value_name = "COMMAND")]
    serial_exec_pty: Option<String>,

    /// Serial: no host, discard output
    #[arg(long = "serial-detached")]
    serial_detached: bool,

    /// Serial baud rate, used to pace output
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    /// Host video frame rate in Hz
    #[arg(long, value_enum, default_value_t = FrameRate::Pal)]
    frame_rate: FrameRate,

    /// Self test duration after a reset, in milliseconds
    #[arg(long, value_name = "MS")]
    boot_window_ms: Option<u64>,

    /// Gap that resynchronizes a PS/2 stream, in milliseconds
    #[arg(long, value_name = "MS")]
    ps2_timeout_ms: Option<u64>,

    /// Hold responses back for their documented processing time
    #[arg(long)]
    deferred_delays: bool,

    /// Write the log to a file instead of stderr, by default in the temp directory
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::TRACE
    } else {
        Level::INFO
    };
    match args.log_file {
        Some(ref path) => {
            let path = path.clone().unwrap_or_else(default_log_file);
            setup_logging_file(level, path)?
        }
        None => setup_logging_stdio(level),
    }

    info!("PS/2 IKBD emulator starting...");

    let config = IkbdConfig {
        boot_window: args
            .boot_window_ms
            .map(Duration::from_millis)
            .unwrap_or(BOOT_WINDOW),
        delay_mode: if args.deferred_delays {
            DelayMode::Deferred
        } else {
            DelayMode::Immediate
        },
    };
    let ports = Arc::new(JoystickPorts::new());
    let mut ikbd = Ikbd::new(config, ports.clone());

    let serial_pipes = if args.serial_pipes.len() == 2 {
        Some((args.serial_pipes[0].clone(), args.serial_pipes[1].clone()))
    } else {
        None
    };
    let comm_config = CommConfig::from_args(
        args.serial_pipe,
        serial_pipes,
        args.serial_exec,
        args.serial_exec_pty,
        args.serial_detached,
    );
    let (to_host, from_ikbd) = mpsc::channel();
    let link = connect_serial(comm_config, from_ikbd, ikbd.sender())?;

    let ps2_timeout = args
        .ps2_timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(PS2_RESYNC_TIMEOUT);
    if let Some(path) = &args.keyboard {
        connect_keyboard(path, ps2_timeout, ikbd.sender())?;
    } else {
        warn!("No PS/2 keyboard connected");
    }
    if let Some(path) = &args.mouse {
        connect_mouse(path, ps2_timeout, ikbd.sender())?;
    }
    if let Some(path) = &args.joysticks {
        connect_joysticks(path, ports)?;
    }

    let mut clock = FrameClock::new(args.frame_rate);
    let mut line = BaudPacer::new(args.baud);
    info!(
        "Running at {} Hz, {} baud ({:?} per byte)",
        args.frame_rate.hz(),
        args.baud,
        line.byte_time()
    );

    let mut last = Instant::now();
    'run: while !link.is_closed() {
        let now = Instant::now();
        let dt = now - last;
        last = now;

        ikbd.pump();
        ikbd.elapse(dt);
        for _ in 0..clock.advance(dt) {
            ikbd.on_tick();
        }

        for _ in 0..line.drain(dt, ikbd.pending_output()) {
            let Some(b) = ikbd.pop_output() else {
                break;
            };
            if to_host.send(b).is_err() {
                break 'run;
            }
        }

        thread::sleep(clock.until_next().min(line.byte_time()));
    }

    info!("Serial link closed after {} frames", clock.frames());
    Ok(())
}
