use anyhow::Result;
use kiosk_api::HttpBackend;
use kiosk_hw::{Camera, V4l2Opener};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod kiosk;

use dbus_interface::{KioskService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "kioskd starting");

    let config = config::Config::load()?;
    tracing::info!(
        api_base = %config.api_base,
        camera = %config.camera_device,
        liveness_frames = config.liveness_frames,
        "configuration loaded"
    );

    if !Camera::list_devices()
        .iter()
        .any(|d| d.path == config.camera_device)
    {
        tracing::warn!(
            device = %config.camera_device,
            "camera device not found; capture will fail until it appears"
        );
    }

    let backend = HttpBackend::new(
        &config.api_base,
        Duration::from_secs(config.http_timeout_secs),
    )?;

    let engine = engine::spawn_engine(
        V4l2Opener {
            device_path: config.camera_device.clone(),
            width: config.frame_width,
            height: config.frame_height,
        },
        config.warmup_frames,
    )?;

    let kiosk = kiosk::Kiosk::new(backend, engine, config.liveness_frames);
    match kiosk.list_students().await {
        Ok(students) => tracing::info!(count = students.len(), "roster loaded"),
        Err(e) => tracing::warn!(error = %e, "initial roster load failed; continuing"),
    }

    let service = KioskService::new(kiosk, config.api_base.clone());
    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "kioskd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("kioskd shutting down");

    Ok(())
}
