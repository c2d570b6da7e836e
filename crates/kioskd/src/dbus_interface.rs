use crate::kiosk::{Kiosk, KioskError};
use kiosk_api::HttpBackend;
use kiosk_hw::CameraHandle;
use serde::Serialize;
use std::path::Path;
use zbus::interface;

pub const BUS_NAME: &str = "org.attendkiosk.Kiosk1";
pub const OBJECT_PATH: &str = "/org/attendkiosk/Kiosk1";

impl From<KioskError> for zbus::fdo::Error {
    fn from(e: KioskError) -> Self {
        if e.is_invalid_input() {
            zbus::fdo::Error::InvalidArgs(e.to_string())
        } else {
            zbus::fdo::Error::Failed(e.to_string())
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// D-Bus interface for the attendance kiosk coordinator.
///
/// Bus name: org.attendkiosk.Kiosk1
/// Object path: /org/attendkiosk/Kiosk1
///
/// Structured results are returned as JSON strings.
pub struct KioskService {
    kiosk: Kiosk<HttpBackend>,
    api_base: String,
}

impl KioskService {
    pub fn new(kiosk: Kiosk<HttpBackend>, api_base: String) -> Self {
        Self { kiosk, api_base }
    }
}

#[interface(name = "org.attendkiosk.Kiosk1")]
impl KioskService {
    /// Reload the roster and return every student, newest first.
    async fn list_students(&self) -> zbus::fdo::Result<String> {
        tracing::debug!("list_students requested");
        to_json(&self.kiosk.list_students().await?)
    }

    /// Filter the cached roster by case-insensitive substring on one field.
    async fn search(&self, field: &str, term: &str) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.search(field, term).await)
    }

    /// Load a student into the form. False if the id is not in the roster.
    async fn select_student(&self, id: i64) -> zbus::fdo::Result<bool> {
        Ok(self.kiosk.select_student(id).await)
    }

    async fn set_field(&self, field: &str, value: &str) -> zbus::fdo::Result<()> {
        Ok(self.kiosk.set_field(field, value).await?)
    }

    async fn form(&self) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.form().await)
    }

    /// Clear the form fields, the captured photo and the selection.
    async fn reset_form(&self) -> zbus::fdo::Result<()> {
        self.kiosk.reset_form().await;
        Ok(())
    }

    /// Drop the selection and return the form to new-record mode.
    async fn clear_selection(&self) -> zbus::fdo::Result<()> {
        self.kiosk.clear_selection().await;
        Ok(())
    }

    async fn add_student(&self) -> zbus::fdo::Result<String> {
        tracing::info!("add_student requested");
        to_json(&self.kiosk.add_student().await?)
    }

    async fn update_student(&self, id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(student_id = id, "update_student requested");
        to_json(&self.kiosk.update_student(id).await?)
    }

    async fn delete_student(&self, id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(student_id = id, "delete_student requested");
        to_json(&self.kiosk.delete_student(id).await?)
    }

    /// Acquire the camera for `enrollment` or `attendance`. Returns the handle.
    async fn open_camera(&self, flow: &str) -> zbus::fdo::Result<u64> {
        tracing::info!(flow, "open_camera requested");
        Ok(self.kiosk.open_camera(flow).await?.id())
    }

    /// Capture the enrollment photo into the form and release the camera.
    async fn capture_photo(&self, handle: u64) -> zbus::fdo::Result<String> {
        to_json(
            &self
                .kiosk
                .capture_photo(CameraHandle::from_id(handle))
                .await?,
        )
    }

    async fn close_camera(&self, handle: u64) -> zbus::fdo::Result<()> {
        Ok(self.kiosk.close_camera(CameraHandle::from_id(handle)).await?)
    }

    /// Capture and submit a frame (or liveness burst) to the matcher.
    async fn mark_attendance(&self) -> zbus::fdo::Result<String> {
        tracing::info!("mark_attendance requested");
        to_json(&self.kiosk.mark_attendance().await?)
    }

    /// Reload and return today's attendance ledger.
    async fn attendance(&self) -> zbus::fdo::Result<String> {
        to_json(&self.kiosk.attendance().await?)
    }

    /// Download the CSV export to the absolute `path`. Returns the bytes written.
    async fn export_csv(&self, path: &str) -> zbus::fdo::Result<u64> {
        tracing::info!(path, "export_csv requested");
        Ok(self.kiosk.export_csv(Path::new(path)).await? as u64)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.kiosk.status().await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "api_base": self.api_base,
            "camera": {
                "live": status.camera.live,
                "owner": status.camera.owner.map(|f| f.as_str()),
                "handle": status.camera.handle,
            },
            "match_state": status.match_state.as_str(),
            "last_outcome": status.last_outcome.map(|o| o.as_str()),
            "roster_size": status.roster_size,
            "selected": status.selected,
        })
        .to_string())
    }
}
