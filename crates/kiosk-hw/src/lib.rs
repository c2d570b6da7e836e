//! kiosk-hw: Camera access for the attendance kiosk.
//!
//! Provides V4L2-based capture, frame conversion to PNG stills, and the
//! exclusive [`CameraSession`] shared by the enrollment and attendance flows.

pub mod camera;
pub mod frame;
pub mod session;

pub use camera::{Camera, CameraError, CaptureDevice, DeviceOpener, PixelFormat, V4l2Opener};
pub use frame::{Frame, PixelLayout, StillImage};
pub use session::{CameraHandle, CameraSession, CaptureFlow};
