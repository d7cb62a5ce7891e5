//! Call lifecycle orchestration

mod controller;
mod session;

pub use controller::{CallController, CallHandle, CallSnapshot};
pub use session::{CallSession, CallerInfo};
