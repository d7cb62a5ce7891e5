//! Local media ownership
//!
//! All capture and screen-share devices are owned by [`MediaController`];
//! peer sessions only ever see [`MediaStreamHandle`]s handed to them at
//! creation or through explicit replace calls.

mod controller;
mod devices;
mod stream;

pub use controller::MediaController;
pub use devices::MediaDevices;
pub use stream::{MediaStreamHandle, MediaTrack, StreamSource, TrackKind};
