//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, PixelLayout};
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("camera handle {0} is not the live handle")]
    StaleHandle(u64),
    #[error("still encoding failed: {0}")]
    Encode(#[from] frame::FrameError),
}

/// A device that can hand out frames. Dropping it releases the hardware.
pub trait CaptureDevice: Send {
    /// Capture the frame the sensor is delivering now.
    fn grab(&mut self) -> Result<Frame, CameraError>;

    /// Capture up to `count` non-dark frames, trying at most `count * 3` times.
    ///
    /// Returns the frames and the number of dark frames skipped.
    fn grab_burst(&mut self, count: usize) -> Result<(Vec<Frame>, usize), CameraError> {
        let mut good = Vec::with_capacity(count);
        let mut dark = 0usize;
        for _ in 0..count * 3 {
            if good.len() >= count {
                break;
            }
            let frame = self.grab()?;
            if frame.is_dark {
                dark += 1;
                tracing::debug!(seq = frame.sequence, "skipping dark frame");
                continue;
            }
            good.push(frame);
        }
        Ok((good, dark))
    }
}

/// Acquires a [`CaptureDevice`]. Each call must yield a fresh device lock.
pub trait DeviceOpener: Send {
    type Device: CaptureDevice;

    fn open(&self) -> Result<Self::Device, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel), converted to RGB.
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel).
    Y16,
}

/// Opens a V4L2 device by path at a requested resolution.
#[derive(Debug, Clone)]
pub struct V4l2Opener {
    pub device_path: String,
    pub width: u32,
    pub height: u32,
}

impl DeviceOpener for V4l2Opener {
    type Device = Camera;

    fn open(&self) -> Result<Camera, CameraError> {
        Camera::open(&self.device_path, self.width, self.height)
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

const EBUSY: i32 = 16;

fn classify_open_error(device_path: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => {
            CameraError::PermissionDenied(format!("{device_path}: {e}"))
        }
        _ if e.raw_os_error() == Some(EBUSY) => {
            CameraError::DeviceUnavailable(format!("{device_path}: device busy"))
        }
        _ => CameraError::DeviceUnavailable(format!("{device_path}: {e}")),
    }
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceUnavailable(format!(
                "{device_path}: no such device"
            )));
        }

        let device =
            Device::with_path(device_path).map_err(|e| classify_open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::DeviceUnavailable(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::DeviceUnavailable(format!(
                "{device_path}: not a video capture device"
            )));
        }

        // Ask for YUYV; accept GREY / Y16 if that is all the driver offers.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    fn stream(&self) -> Result<MmapStream<'_>, CameraError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    /// Convert a raw buffer based on the negotiated format.
    fn convert(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        let pixels = (self.width * self.height) as usize;

        let (data, layout) = match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                (buf[..pixels].to_vec(), PixelLayout::Luma8)
            }
            PixelFormat::Y16 => {
                let expected_bytes = pixels * 2;
                if buf.len() < expected_bytes {
                    return Err(CameraError::CaptureFailed(format!(
                        "Y16 buffer too short: expected {expected_bytes}, got {}",
                        buf.len()
                    )));
                }
                // Keep the high byte of each little-endian sample
                let gray = buf[..expected_bytes].chunks_exact(2).map(|s| s[1]).collect();
                (gray, PixelLayout::Luma8)
            }
            PixelFormat::Yuyv => {
                let rgb = frame::yuyv_to_rgb(buf, self.width, self.height).map_err(|e| {
                    CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))
                })?;
                (rgb, PixelLayout::Rgb8)
            }
        };

        Ok(Frame::new(data, self.width, self.height, layout, sequence))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CaptureDevice for Camera {
    fn grab(&mut self) -> Result<Frame, CameraError> {
        let mut stream = self.stream()?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        self.convert(buf, meta.sequence)
    }

    fn grab_burst(&mut self, count: usize) -> Result<(Vec<Frame>, usize), CameraError> {
        let mut good = Vec::with_capacity(count);
        let mut dark = 0usize;
        let mut stream = self.stream()?;

        for _ in 0..count * 3 {
            if good.len() >= count {
                break;
            }
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            let frame = self.convert(buf, meta.sequence)?;
            if frame.is_dark {
                dark += 1;
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                continue;
            }
            good.push(frame);
        }

        Ok((good, dark))
    }
}
