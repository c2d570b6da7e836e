//! kiosk-api: HTTP client for the attendance backend.
//!
//! One [`HttpBackend`] serves as the roster CRUD store, the face matcher and
//! the attendance ledger. All endpoints are JSON over the same origin.

use kiosk_core::service::{LedgerService, MatcherService, RosterService, ServiceError};
use kiosk_core::types::{
    AttendanceRecord, MarkResponse, MessageResponse, Probe, StudentDraft, StudentId,
    StudentRecord,
};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const GET_STUDENTS: &str = "/api/get_students";
const ADD_STUDENT: &str = "/api/add_student_with_photo";
const UPDATE_STUDENT: &str = "/api/update_student";
const DELETE_STUDENT: &str = "/api/delete_student";
const REPLACE_PHOTO: &str = "/api/replace_photo";
const MARK_ATTENDANCE: &str = "/api/mark_attendance";
const GET_ATTENDANCE: &str = "/api/get_attendance";
const EXPORT_CSV: &str = "/export_csv";

const USER_AGENT: &str = concat!("kiosk/", env!("CARGO_PKG_VERSION"));

/// Error body the backend sends with non-2xx statuses.
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Clone)]
pub struct HttpBackend {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        request
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))
    }

    /// Send, require a 2xx status, and decode the JSON body.
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ServiceError> {
        let response = self.send(request).await?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }

        serde_json::from_slice(&body).map_err(|e| ServiceError::Parse(e.to_string()))
    }
}

fn status_error(status: u16, body: &[u8]) -> ServiceError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    ServiceError::Status { status, message }
}

impl RosterService for HttpBackend {
    async fn list_students(&self) -> Result<Vec<StudentRecord>, ServiceError> {
        tracing::debug!(url = %self.url(GET_STUDENTS), "fetching students");
        self.call(self.http_client.get(self.url(GET_STUDENTS))).await
    }

    async fn add_student(&self, draft: &StudentDraft) -> Result<MessageResponse, ServiceError> {
        self.call(self.http_client.post(self.url(ADD_STUDENT)).json(draft))
            .await
    }

    async fn update_student(
        &self,
        id: StudentId,
        draft: &StudentDraft,
    ) -> Result<MessageResponse, ServiceError> {
        let url = self.url(&format!("{UPDATE_STUDENT}/{id}"));
        self.call(self.http_client.put(url).json(draft)).await
    }

    async fn delete_student(&self, id: StudentId) -> Result<MessageResponse, ServiceError> {
        let url = self.url(&format!("{DELETE_STUDENT}/{id}"));
        self.call(self.http_client.delete(url)).await
    }

    async fn replace_photo(
        &self,
        id: StudentId,
        photo: &str,
    ) -> Result<MessageResponse, ServiceError> {
        let body = serde_json::json!({ "student_id": id, "photo": photo });
        self.call(self.http_client.post(self.url(REPLACE_PHOTO)).json(&body))
            .await
    }
}

impl MatcherService for HttpBackend {
    async fn mark_attendance(&self, probe: &Probe) -> Result<MarkResponse, ServiceError> {
        let request = self.http_client.post(self.url(MARK_ATTENDANCE)).json(probe);
        let response = self.send(request).await?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| ServiceError::Parse(e.to_string()));
        }

        // The matcher states its verdict (liveness refusal, undecodable image)
        // in the body even on 4xx/5xx; keep it as a rejection.
        match serde_json::from_slice::<MarkResponse>(&body) {
            Ok(verdict) if !verdict.success => {
                tracing::debug!(status = status.as_u16(), message = ?verdict.message, "matcher refused frame");
                Ok(verdict)
            }
            _ => Err(status_error(status.as_u16(), &body)),
        }
    }
}

impl LedgerService for HttpBackend {
    async fn attendance(&self) -> Result<Vec<AttendanceRecord>, ServiceError> {
        self.call(self.http_client.get(self.url(GET_ATTENDANCE))).await
    }

    async fn export_csv(&self) -> Result<Vec<u8>, ServiceError> {
        let response = self.send(self.http_client.get(self.url(EXPORT_CSV))).await?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let backend = HttpBackend::new("http://kiosk.local:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.base_url(), "http://kiosk.local:5000");
        assert_eq!(backend.url(GET_STUDENTS), "http://kiosk.local:5000/api/get_students");
    }

    #[test]
    fn test_status_error_prefers_json_message() {
        let err = status_error(409, br#"{"success": false, "message": "roll_no conflict"}"#);
        assert_eq!(
            err,
            ServiceError::Status {
                status: 409,
                message: "roll_no conflict".into()
            }
        );

        let err = status_error(502, b"Bad Gateway\n");
        assert_eq!(
            err,
            ServiceError::Status {
                status: 502,
                message: "Bad Gateway".into()
            }
        );
    }
}
