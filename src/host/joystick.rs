//! Joystick pin states from a byte stream.
//!
//! Each byte is one GPIO sample: pin masks in bits 0-5 and bit 7 set for
//! joystick 1.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use crate::machine::ikbd::joystick::JoystickPorts;
use crate::machine::ikbd::response::Stick;

const STICK_ONE: u8 = 0x80;
const PINS: u8 = 0x3F;

pub fn apply_sample(ports: &JoystickPorts, sample: u8) {
    let stick = if sample & STICK_ONE != 0 {
        Stick::One
    } else {
        Stick::Zero
    };
    trace!("Joystick {:?} pins {:02X}", stick, sample & PINS);
    ports.set_gpio(stick, sample & PINS);
}

pub fn connect_joysticks(path: &Path, ports: Arc<JoystickPorts>) -> std::io::Result<JoinHandle<()>> {
    info!("Connecting joysticks to {:?}", path);
    let mut file = File::open(path)?;
    Ok(thread::spawn(move || {
        let mut buf = [0; 1];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => apply_sample(&ports, buf[0]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Joystick read failed: {e}");
                    break;
                }
            }
        }
        debug!("Joystick reader exited");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::ikbd::joystick::{JOY_FIRE, JOY_UP, JoystickSource, gpio};
    use std::io::Write;

    #[test]
    fn test_samples_select_stick() {
        let ports = JoystickPorts::new();
        apply_sample(&ports, gpio::UP);
        apply_sample(&ports, STICK_ONE | gpio::FIRE);
        assert_eq!(ports.read(Stick::Zero), JOY_UP);
        assert_eq!(ports.read(Stick::One), JOY_FIRE);
    }

    #[test]
    fn test_stream_last_sample_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[gpio::UP, gpio::FIRE, STICK_ONE | gpio::UP, STICK_ONE])
            .unwrap();
        file.flush().unwrap();

        let ports = Arc::new(JoystickPorts::new());
        connect_joysticks(file.path(), ports.clone())
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(ports.read(Stick::Zero), JOY_FIRE);
        assert_eq!(ports.read(Stick::One), 0);
    }
}
