//! Exclusive camera session shared by the enrollment and attendance flows.
//!
//! At most one device lock is live at a time. A new `open` releases the
//! previous holder first (last requester wins). Capturing consumes the live
//! handle: the device is released whether the capture succeeds or fails.

use crate::camera::{CameraError, CaptureDevice, DeviceOpener};
use crate::frame::StillImage;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// The flow that requested the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureFlow {
    Enrollment,
    Attendance,
}

impl CaptureFlow {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureFlow::Enrollment => "enrollment",
            CaptureFlow::Attendance => "attendance",
        }
    }
}

impl fmt::Display for CaptureFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureFlow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enrollment" => Ok(CaptureFlow::Enrollment),
            "attendance" => Ok(CaptureFlow::Attendance),
            other => Err(format!("unknown capture flow: {other}")),
        }
    }
}

/// Token for one acquisition of the camera. Stale once closed or superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraHandle(u64);

impl CameraHandle {
    pub fn from_id(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

struct Live<D> {
    handle: CameraHandle,
    flow: CaptureFlow,
    device: D,
    opened_at: Instant,
}

pub struct CameraSession<O: DeviceOpener> {
    opener: O,
    live: Option<Live<O::Device>>,
    next_id: u64,
}

impl<O: DeviceOpener> CameraSession<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            live: None,
            next_id: 0,
        }
    }

    /// Acquire the camera for `flow`, releasing any current holder first.
    ///
    /// On failure nothing is held and no preview may be shown.
    pub fn open(&mut self, flow: CaptureFlow) -> Result<CameraHandle, CameraError> {
        if let Some(prev) = self.live.take() {
            tracing::warn!(
                handle = prev.handle.id(),
                previous = %prev.flow,
                requester = %flow,
                "releasing camera for new requester"
            );
        }

        let device = self.opener.open().map_err(|e| {
            tracing::warn!(flow = %flow, error = %e, "camera acquisition failed");
            e
        })?;

        self.next_id += 1;
        let handle = CameraHandle(self.next_id);
        tracing::info!(handle = handle.id(), flow = %flow, "camera acquired");

        self.live = Some(Live {
            handle,
            flow,
            device,
            opened_at: Instant::now(),
        });
        Ok(handle)
    }

    /// Rasterize the frame visible now, then release the camera.
    pub fn capture_frame(&mut self, handle: CameraHandle) -> Result<StillImage, CameraError> {
        let mut live = self.take_live(handle)?;
        let result = live
            .device
            .grab()
            .and_then(|frame| frame.encode_png().map_err(CameraError::from));
        self.released(&live, "capture");
        result
    }

    /// Capture up to `count` non-dark stills for a liveness burst, then
    /// release the camera. Fails if every attempt produced a dark frame.
    pub fn capture_burst(
        &mut self,
        handle: CameraHandle,
        count: usize,
    ) -> Result<Vec<StillImage>, CameraError> {
        let mut live = self.take_live(handle)?;
        let result = live.device.grab_burst(count).and_then(|(frames, dark)| {
            tracing::debug!(captured = frames.len(), dark_skipped = dark, "burst captured");
            if frames.is_empty() {
                return Err(CameraError::CaptureFailed(format!(
                    "no usable frame in {} attempts ({dark} dark)",
                    count * 3
                )));
            }
            frames
                .iter()
                .map(|f| f.encode_png().map_err(CameraError::from))
                .collect::<Result<Vec<_>, _>>()
        });
        self.released(&live, "burst capture");
        result
    }

    /// Release the camera if `handle` is still live. Closing a stale or
    /// already-closed handle does nothing.
    pub fn close(&mut self, handle: CameraHandle) {
        match self.live.as_ref() {
            Some(live) if live.handle == handle => {
                if let Some(live) = self.live.take() {
                    self.released(&live, "close");
                }
            }
            _ => tracing::debug!(handle = handle.id(), "close ignored: handle not live"),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn live_handle(&self) -> Option<CameraHandle> {
        self.live.as_ref().map(|l| l.handle)
    }

    /// Flow currently holding the camera.
    pub fn owner(&self) -> Option<CaptureFlow> {
        self.live.as_ref().map(|l| l.flow)
    }

    fn take_live(&mut self, handle: CameraHandle) -> Result<Live<O::Device>, CameraError> {
        match self.live.as_ref() {
            Some(live) if live.handle == handle => {
                self.live.take().ok_or(CameraError::StaleHandle(handle.id()))
            }
            _ => Err(CameraError::StaleHandle(handle.id())),
        }
    }

    fn released(&self, live: &Live<O::Device>, reason: &str) {
        tracing::info!(
            handle = live.handle.id(),
            flow = %live.flow,
            held_ms = live.opened_at.elapsed().as_millis() as u64,
            reason,
            "camera released"
        );
    }
}
