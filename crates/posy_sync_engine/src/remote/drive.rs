//! Google Drive v3 remote.
//!
//! The snapshot lives in one file inside a named folder of the user's
//! Drive. Its revision marker is kept in the file's `appProperties` so a
//! metadata query is enough to tell whether anything changed.

use super::{remote_changed, RemoteMarker, RemoteObject, RemoteStore};
use crate::credentials::AccessToken;
use crate::error::{SyncError, SyncResult};
use crate::http::{urlencode, HttpClient, HttpRequest, HttpResponse, Method};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Drive metadata API.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Drive media upload API.
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const MARKER_PROPERTY: &str = "posyRevision";
const BOUNDARY: &str = "posy-snapshot-5f0c9a1e";
const FILE_FIELDS: &str = "files(id,name,appProperties)";

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    app_properties: BTreeMap<String, String>,
}

impl DriveFile {
    fn marker(&self) -> RemoteMarker {
        match self.app_properties.get(MARKER_PROPERTY) {
            Some(marker) => RemoteMarker::new(marker.clone()),
            // Written by something else; never equal to a snapshot id.
            None => RemoteMarker::new(format!("unmarked-{}", self.id)),
        }
    }
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

/// Classifies a non-2xx Drive response.
fn status_error(response: &HttpResponse) -> SyncError {
    let (message, reasons): (String, Vec<String>) = match response.read_json::<ErrorEnvelope>() {
        Ok(env) => (
            env.error.message,
            env.error.errors.into_iter().map(|e| e.reason).collect(),
        ),
        Err(_) => (response.text(), Vec::new()),
    };
    let has = |r: &str| reasons.iter().any(|reason| reason == r);

    match response.status {
        401 => SyncError::Unauthorized,
        403 if has("storageQuotaExceeded") || has("quotaExceeded") => SyncError::RemoteQuota(message),
        403 if has("rateLimitExceeded") || has("userRateLimitExceeded") => {
            SyncError::transient(format!("rate limited: {message}"))
        }
        403 => SyncError::auth(format!("access denied: {message}")),
        408 | 429 | 500..=599 => {
            SyncError::transient(format!("drive returned {}: {message}", response.status))
        }
        status => SyncError::protocol(format!("drive returned {status}: {message}")),
    }
}

fn checked(response: HttpResponse) -> SyncResult<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(status_error(&response))
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// The snapshot file in a Drive folder.
pub struct DriveRemote<C: HttpClient> {
    http: C,
    api_base: String,
    upload_base: String,
    folder_name: String,
    file_name: String,
    folder_id: Mutex<Option<String>>,
}

impl<C: HttpClient> DriveRemote<C> {
    /// Creates a remote for `folder_name/file_name`.
    pub fn new(http: C, folder_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            http,
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
            folder_name: folder_name.into(),
            file_name: file_name.into(),
            folder_id: Mutex::new(None),
        }
    }

    /// Points the remote at other endpoints.
    pub fn with_endpoints(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.upload_base = upload_base.into();
        self
    }

    fn send(&self, request: HttpRequest, token: &AccessToken) -> SyncResult<HttpResponse> {
        let response = self.http.send(request.bearer(token.secret()))?;
        if response.status == 404 {
            // A folder deleted behind our back invalidates the cached id.
            *self.folder_id.lock() = None;
        }
        checked(response)
    }

    fn list(&self, token: &AccessToken, query: &str) -> SyncResult<Vec<DriveFile>> {
        let url = format!(
            "{}/files?q={}&spaces=drive&orderBy={}&fields={}",
            self.api_base,
            urlencode(query),
            urlencode("modifiedTime desc"),
            urlencode(FILE_FIELDS),
        );
        let response = self.send(HttpRequest::new(Method::Get, url), token)?;
        Ok(response.read_json::<FileList>()?.files)
    }

    fn folder(&self, token: &AccessToken, create: bool) -> SyncResult<Option<String>> {
        if let Some(id) = self.folder_id.lock().clone() {
            return Ok(Some(id));
        }

        let query = format!(
            "name = '{}' and mimeType = '{FOLDER_MIME}' and trashed = false",
            quote(&self.folder_name)
        );
        let id = match self.list(token, &query)?.into_iter().next() {
            Some(folder) => folder.id,
            None if create => {
                let metadata = json!({"name": self.folder_name, "mimeType": FOLDER_MIME});
                let request = HttpRequest::new(Method::Post, format!("{}/files?fields=id", self.api_base))
                    .body("application/json; charset=UTF-8", metadata.to_string().into_bytes());
                let created: CreatedFile = self.send(request, token)?.read_json()?;
                tracing::info!(folder = %self.folder_name, id = %created.id, "created drive folder");
                created.id
            }
            None => return Ok(None),
        };
        *self.folder_id.lock() = Some(id.clone());
        Ok(Some(id))
    }

    fn file(&self, token: &AccessToken, folder_id: &str) -> SyncResult<Option<DriveFile>> {
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            quote(&self.file_name),
            quote(folder_id)
        );
        Ok(self.list(token, &query)?.into_iter().next())
    }

    fn current(&self, token: &AccessToken, create_folder: bool) -> SyncResult<(Option<String>, Option<DriveFile>)> {
        let Some(folder_id) = self.folder(token, create_folder)? else {
            return Ok((None, None));
        };
        let file = self.file(token, &folder_id)?;
        Ok((Some(folder_id), file))
    }
}

fn multipart(metadata: &serde_json::Value, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!("--{BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{BOUNDARY}\r\nContent-Type: application/octet-stream\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

impl<C: HttpClient> RemoteStore for DriveRemote<C> {
    fn describe(&self) -> String {
        format!("drive:{}/{}", self.folder_name, self.file_name)
    }

    fn head(&self, token: &AccessToken) -> SyncResult<Option<RemoteMarker>> {
        let (_, file) = self.current(token, false)?;
        Ok(file.map(|f| f.marker()))
    }

    fn download(&self, token: &AccessToken) -> SyncResult<Option<RemoteObject>> {
        let (_, Some(file)) = self.current(token, false)? else {
            return Ok(None);
        };
        let url = format!("{}/files/{}?alt=media", self.api_base, urlencode(&file.id));
        let response = self.send(HttpRequest::new(Method::Get, url), token)?;
        tracing::debug!(id = %file.id, bytes = response.body.len(), "downloaded drive snapshot");
        Ok(Some(RemoteObject {
            marker: file.marker(),
            bytes: response.body,
        }))
    }

    fn upload(
        &self,
        token: &AccessToken,
        bytes: &[u8],
        marker: &RemoteMarker,
        expected: Option<&RemoteMarker>,
    ) -> SyncResult<()> {
        let (folder_id, file) = self.current(token, true)?;
        let folder_id = folder_id.ok_or_else(|| SyncError::protocol("drive folder missing after creation"))?;
        let actual = file.as_ref().map(DriveFile::marker);
        if actual.as_ref() != expected {
            return Err(remote_changed(expected, actual.as_ref()));
        }

        let content_type = format!("multipart/related; boundary={BOUNDARY}");
        let mut properties = serde_json::Map::new();
        properties.insert(MARKER_PROPERTY.to_string(), json!(marker.as_str()));
        let request = match &file {
            Some(file) => {
                let metadata = json!({"appProperties": properties});
                HttpRequest::new(
                    Method::Patch,
                    format!(
                        "{}/files/{}?uploadType=multipart&fields=id",
                        self.upload_base,
                        urlencode(&file.id)
                    ),
                )
                .body(content_type, multipart(&metadata, bytes))
            }
            None => {
                let metadata = json!({
                    "name": self.file_name,
                    "parents": [folder_id],
                    "appProperties": properties,
                });
                HttpRequest::new(
                    Method::Post,
                    format!("{}/files?uploadType=multipart&fields=id", self.upload_base),
                )
                .body(content_type, multipart(&metadata, bytes))
            }
        };
        let stored: CreatedFile = self.send(request, token)?.read_json()?;
        tracing::info!(id = %stored.id, %marker, bytes = bytes.len(), "uploaded drive snapshot");
        Ok(())
    }
}

impl<C: HttpClient> std::fmt::Debug for DriveRemote<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveRemote")
            .field("folder", &self.folder_name)
            .field("file", &self.file_name)
            .finish_non_exhaustive()
    }
}
