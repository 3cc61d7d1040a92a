//! Robot arm controller access
//!
//! - `backend` - SDK / raw XML-RPC backend selection
//! - `realtime` - status feed frames and reader task
//! - `probes` - completion probes per backend
//! - `upload` - three-phase file transfer
//! - `driver` - [`RobotArmDriver`], the [`devq_shared::Driver`] for the arm

pub mod backend;
pub mod driver;
pub mod probes;
pub mod realtime;
pub mod upload;

pub use driver::RobotArmDriver;
