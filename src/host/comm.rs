use std::fs::OpenOptions;
use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

use crate::machine::ikbd::IkbdSender;

/// Where the ST side of the serial link is connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CommConfig {
    /// Commands on stdin, reports on stdout
    #[default]
    Stdio,
    /// No host: reports are traced and dropped
    Detached,
    /// Single bidirectional pipe
    Pipe(PathBuf),
    /// Separate read and write pipes
    Pipes { rx: PathBuf, tx: PathBuf },
    /// Execute a command and talk to its stdin/stdout
    Exec(String),
    /// Execute a command and connect to its pty
    #[cfg(feature = "pty")]
    ExecPty(String),
}

impl CommConfig {
    /// Parse command-line arguments into CommConfig
    pub fn from_args(
        pipe: Option<PathBuf>,
        pipes: Option<(PathBuf, PathBuf)>,
        exec: Option<String>,
        exec_pty: Option<String>,
        detached: bool,
    ) -> Self {
        #[cfg(feature = "pty")]
        if let Some(exec_pty_cmd) = exec_pty {
            return CommConfig::ExecPty(exec_pty_cmd);
        }
        #[cfg(not(feature = "pty"))]
        if exec_pty.is_some() {
            tracing::warn!("Built without pty support, ignoring pty command");
        }

        if let Some(exec_cmd) = exec {
            CommConfig::Exec(exec_cmd)
        } else if let Some((rx, tx)) = pipes {
            CommConfig::Pipes { rx, tx }
        } else if let Some(pipe) = pipe {
            CommConfig::Pipe(pipe)
        } else if detached {
            CommConfig::Detached
        } else {
            CommConfig::Stdio
        }
    }
}

/// The threads moving bytes between the IKBD and the host.
#[derive(Debug)]
pub struct SerialLink {
    threads: Vec<JoinHandle<()>>,
}

impl SerialLink {
    /// Both directions have shut down, e.g. the child process exited.
    pub fn is_closed(&self) -> bool {
        self.threads.iter().all(JoinHandle::is_finished)
    }

    /// Wait for both directions to close.
    #[cfg(test)]
    pub fn join(self) {
        for thread in self.threads {
            if thread.join().is_err() {
                error!("Serial thread panicked");
            }
        }
    }
}

/// Connect the IKBD serial line to the configured host.
///
/// Bytes arriving on `from_ikbd` are written to the host. Bytes read from
/// the host are queued on `to_ikbd` as commands. XON and XOFF are IKBD
/// commands here, so no software flow control is applied.
pub fn connect_serial(
    config: CommConfig,
    from_ikbd: mpsc::Receiver<u8>,
    to_ikbd: IkbdSender,
) -> io::Result<SerialLink> {
    match config {
        CommConfig::Stdio => connect_stdio(from_ikbd, to_ikbd),
        CommConfig::Detached => connect_detached(from_ikbd),
        CommConfig::Pipe(path) => connect_single_pipe(from_ikbd, to_ikbd, path),
        CommConfig::Pipes { rx, tx } => connect_dual_pipes(from_ikbd, to_ikbd, rx, tx),
        CommConfig::Exec(cmd) => connect_exec(from_ikbd, to_ikbd, cmd),
        #[cfg(feature = "pty")]
        CommConfig::ExecPty(cmd) => connect_exec_pty(from_ikbd, to_ikbd, cmd),
    }
}

fn spawn_writer<W, F>(name: &'static str, open: F, from_ikbd: mpsc::Receiver<u8>) -> JoinHandle<()>
where
    W: Write,
    F: FnOnce() -> io::Result<W> + Send + 'static,
{
    thread::spawn(move || {
        let mut writer = match open() {
            Ok(writer) => writer,
            Err(e) => {
                error!("Serial {name}: failed to open for writing: {e}");
                return;
            }
        };
        while let Ok(b) = from_ikbd.recv() {
            trace!("Serial {name} tx {b:02X}");
            if writer.write_all(&[b]).and_then(|_| writer.flush()).is_err() {
                break;
            }
        }
        debug!("Serial {name} write thread exited");
    })
}

fn spawn_reader<R, F>(name: &'static str, open: F, to_ikbd: IkbdSender) -> JoinHandle<()>
where
    R: Read,
    F: FnOnce() -> io::Result<R> + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = match open() {
            Ok(reader) => reader,
            Err(e) => {
                error!("Serial {name}: failed to open for reading: {e}");
                return;
            }
        };
        let mut buf = [0; 1];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    trace!("Serial {name} rx {:02X}", buf[0]);
                    to_ikbd.send_host_byte(buf[0]);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        debug!("Serial {name} read thread exited");
    })
}

fn connect_stdio(from_ikbd: mpsc::Receiver<u8>, to_ikbd: IkbdSender) -> io::Result<SerialLink> {
    info!("Connecting serial link to stdio");
    Ok(SerialLink {
        threads: vec![
            spawn_writer("stdio", || Ok(io::stdout().lock()), from_ikbd),
            spawn_reader("stdio", || Ok(io::stdin().lock()), to_ikbd),
        ],
    })
}

fn connect_detached(from_ikbd: mpsc::Receiver<u8>) -> io::Result<SerialLink> {
    info!("Serial link detached, IKBD output is discarded");
    Ok(SerialLink {
        threads: vec![spawn_writer("detached", || Ok(io::sink()), from_ikbd)],
    })
}

fn connect_single_pipe(
    from_ikbd: mpsc::Receiver<u8>,
    to_ikbd: IkbdSender,
    path: PathBuf,
) -> io::Result<SerialLink> {
    info!("Connecting serial link to single pipe {:?}", path);

    debug!("Opening {:?} as read/write", path);
    let pipe_r = OpenOptions::new().read(true).write(true).open(&path)?;
    let pipe_w = pipe_r.try_clone()?;
    debug!("Opened!");

    Ok(SerialLink {
        threads: vec![
            spawn_writer("pipe", move || Ok(pipe_w), from_ikbd),
            spawn_reader("pipe", move || Ok(pipe_r), to_ikbd),
        ],
    })
}

fn connect_dual_pipes(
    from_ikbd: mpsc::Receiver<u8>,
    to_ikbd: IkbdSender,
    pipe_r_path: PathBuf,
    pipe_w_path: PathBuf,
) -> io::Result<SerialLink> {
    info!(
        "Connecting serial link to dual pipes {:?} and {:?}",
        pipe_r_path, pipe_w_path
    );
    // Opening a FIFO blocks until the other end shows up, so each thread
    // opens its own side.
    Ok(SerialLink {
        threads: vec![
            spawn_writer(
                "pipes",
                move || OpenOptions::new().write(true).open(&pipe_w_path),
                from_ikbd,
            ),
            spawn_reader(
                "pipes",
                move || OpenOptions::new().read(true).open(&pipe_r_path),
                to_ikbd,
            ),
        ],
    })
}

fn connect_exec(
    from_ikbd: mpsc::Receiver<u8>,
    to_ikbd: IkbdSender,
    cmd_string: String,
) -> io::Result<SerialLink> {
    info!("Connecting serial link to shell process {:?}", cmd_string);

    if cmd_string.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "Empty command string",
        ));
    }

    // Spawn command via shell
    let mut child = std::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(&cmd_string)
        .stderr(Stdio::null())
        .stdout(Stdio::piped())
        .stdin(Stdio::piped())
        .spawn()?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(io::Error::new(ErrorKind::BrokenPipe, "Child has no stdio"));
    };

    let reaper = thread::spawn(move || match child.wait() {
        Ok(status) => debug!("Serial exec: child exited with {status}"),
        Err(e) => error!("Serial exec: wait failed: {e}"),
    });

    Ok(SerialLink {
        threads: vec![
            spawn_writer("exec", move || Ok(stdin), from_ikbd),
            spawn_reader("exec", move || Ok(stdout), to_ikbd),
            reaper,
        ],
    })
}

#[cfg(feature = "pty")]
fn connect_exec_pty(
    from_ikbd: mpsc::Receiver<u8>,
    to_ikbd: IkbdSender,
    cmd_string: String,
) -> io::Result<SerialLink> {
    use pty_process::blocking::Command;
    use std::fs::File;
    use std::os::fd::OwnedFd;

    info!("Connecting serial link to shell process PTY {:?}", cmd_string);

    if cmd_string.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "Empty command string",
        ));
    }

    let (pty, pts) = pty_process::blocking::open().map_err(io::Error::other)?;

    // Spawn command via shell
    let mut child = Command::new("/bin/sh")
        .arg("-c")
        .arg(&cmd_string)
        .spawn(pts)
        .map_err(io::Error::other)?;

    // IKBD traffic is binary: no echo, no line discipline
    let fd = OwnedFd::from(pty);
    set_raw(&fd)?;
    let pty_write = File::from(fd);
    let pty_read = pty_write.try_clone()?;

    let reaper = thread::spawn(move || match child.wait() {
        Ok(status) => debug!("Serial pty: child exited with {status}"),
        Err(e) => error!("Serial pty: wait failed: {e}"),
    });

    Ok(SerialLink {
        threads: vec![
            spawn_writer("pty", move || Ok(pty_write), from_ikbd),
            spawn_reader("pty", move || Ok(pty_read), to_ikbd),
            reaper,
        ],
    })
}

#[cfg(feature = "pty")]
fn set_raw(fd: &std::os::fd::OwnedFd) -> io::Result<()> {
    use rustix::termios::{OptionalActions, tcgetattr, tcsetattr};

    let mut termios = tcgetattr(fd)?;
    termios.make_raw();
    tcsetattr(fd, OptionalActions::Now, &termios)?;
    Ok(())
}
