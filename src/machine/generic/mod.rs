pub mod baud;
pub mod vsync;
