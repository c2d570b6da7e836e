use kiosk_hw::{
    CameraError, CameraHandle, CameraSession, CaptureDevice, CaptureFlow, DeviceOpener,
    StillImage,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to spawn camera thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("camera thread exited")]
    ChannelClosed,
}

/// Snapshot of the camera session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraStatus {
    pub live: bool,
    pub owner: Option<CaptureFlow>,
    pub handle: Option<u64>,
}

/// Messages sent from command handlers to the camera thread.
enum EngineRequest {
    Open {
        flow: CaptureFlow,
        reply: oneshot::Sender<Result<CameraHandle, CameraError>>,
    },
    Capture {
        handle: CameraHandle,
        reply: oneshot::Sender<Result<StillImage, CameraError>>,
    },
    Burst {
        handle: CameraHandle,
        count: usize,
        reply: oneshot::Sender<Result<Vec<StillImage>, CameraError>>,
    },
    Close {
        handle: CameraHandle,
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<CameraStatus>,
    },
}

/// Clone-safe handle to the camera thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Acquire the camera for `flow`. Any previous holder is released.
    pub async fn open(&self, flow: CaptureFlow) -> Result<CameraHandle, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Open { flow, reply })
            .await??)
    }

    /// Capture one still and release the camera.
    pub async fn capture(&self, handle: CameraHandle) -> Result<StillImage, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Capture { handle, reply })
            .await??)
    }

    /// Capture a liveness burst and release the camera.
    pub async fn burst(
        &self,
        handle: CameraHandle,
        count: usize,
    ) -> Result<Vec<StillImage>, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Burst {
                handle,
                count,
                reply,
            })
            .await??)
    }

    pub async fn close(&self, handle: CameraHandle) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Close { handle, reply })
            .await
    }

    pub async fn status(&self) -> Result<CameraStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Discards the first frames after every acquisition so auto-exposure settles
/// before anything is captured.
struct WarmedOpener<O> {
    inner: O,
    warmup_frames: usize,
}

impl<O: DeviceOpener> DeviceOpener for WarmedOpener<O> {
    type Device = O::Device;

    fn open(&self) -> Result<O::Device, CameraError> {
        let mut device = self.inner.open()?;
        for _ in 0..self.warmup_frames {
            if let Err(e) = device.grab() {
                tracing::debug!(error = %e, "warmup frame failed");
            }
        }
        Ok(device)
    }
}

/// Spawn the camera session on a dedicated OS thread.
///
/// The device is not opened here; each `open` request acquires it and every
/// capture releases it again.
pub fn spawn_engine<O>(opener: O, warmup_frames: usize) -> Result<EngineHandle, EngineError>
where
    O: DeviceOpener + 'static,
    O::Device: 'static,
{
    let mut session = CameraSession::new(WarmedOpener {
        inner: opener,
        warmup_frames,
    });

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("kiosk-camera".into())
        .spawn(move || {
            tracing::info!(warmup_frames, "camera thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Open { flow, reply } => {
                        let _ = reply.send(session.open(flow));
                    }
                    EngineRequest::Capture { handle, reply } => {
                        let _ = reply.send(session.capture_frame(handle));
                    }
                    EngineRequest::Burst {
                        handle,
                        count,
                        reply,
                    } => {
                        let _ = reply.send(session.capture_burst(handle, count));
                    }
                    EngineRequest::Close { handle, reply } => {
                        session.close(handle);
                        let _ = reply.send(());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(CameraStatus {
                            live: session.is_live(),
                            owner: session.owner(),
                            handle: session.live_handle().map(CameraHandle::id),
                        });
                    }
                }
            }
            tracing::info!("camera thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
