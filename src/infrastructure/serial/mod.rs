// Serial module - Transport backed by the OS serial ports
pub mod device;
pub mod provider;

pub use device::SerialDevice;
pub use provider::SerialPortProvider;
