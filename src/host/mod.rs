pub mod comm;
pub mod joystick;
pub mod logging;
pub mod ps2;
