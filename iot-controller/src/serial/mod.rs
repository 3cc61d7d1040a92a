//! Serial port access
//!
//! - `traits` - port and connector traits
//! - `tokio_port` - real ports through tokio-serial
//! - `driver` - [`SerialDeviceDriver`], the [`devq_shared::Driver`] for serial instruments

pub mod driver;
pub mod tokio_port;
pub mod traits;

pub use driver::SerialDeviceDriver;
pub use tokio_port::TokioSerialConnector;
