use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FILE_FIELDS: &str = "id,name,modifiedTime";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,modifiedTime)";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    NotFound,
    Transient,
    Permanent,
}

/// Client for a single remote folder. Object names are relative vault paths
/// stored verbatim; the folder never contains real sub-folders.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
    folder_id: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>, folder_id: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token, folder_id)
    }

    pub fn with_base_url(
        base_url: &str,
        token: impl Into<String>,
        folder_id: impl Into<String>,
    ) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
            folder_id: folder_id.into(),
        })
    }

    pub async fn list_page(&self, page_token: Option<&str>) -> Result<FileList, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(
                "q",
                &format!("'{}' in parents and trashed = false", self.folder_id),
            );
            query.append_pair("pageSize", "1000");
            query.append_pair("fields", LIST_FIELDS);
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Follows `nextPageToken` until the listing is exhausted.
    pub async fn list_all(&self) -> Result<Vec<DriveFile>, DriveError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(page_token.as_deref()).await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }

    pub async fn download(&self, id: &str) -> Result<Vec<u8>, DriveError> {
        let mut url = self.endpoint(&format!("/drive/v3/files/{id}"))?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Creates the metadata entry inside the folder, then uploads the content.
    pub async fn create_file(&self, name: &str, bytes: Vec<u8>) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);
        let body = CreateRequest {
            name,
            parents: [self.folder_id.as_str()],
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&body)
            .send()
            .await?;
        let created: DriveFile = Self::handle_response(response).await?;
        self.update_content(&created.id, bytes).await
    }

    pub async fn update_content(&self, id: &str, bytes: Vec<u8>) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint(&format!("/upload/drive/v3/files/{id}"))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("fields", FILE_FIELDS);
        let response = self
            .http
            .patch(url)
            .header("Authorization", self.auth_header_value())
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn rename(&self, id: &str, new_name: &str) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint(&format!("/drive/v3/files/{id}"))?;
        url.query_pairs_mut().append_pair("fields", FILE_FIELDS);
        let response = self
            .http
            .patch(url)
            .header("Authorization", self.auth_header_value())
            .json(&RenameRequest { name: new_name })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Returns `false` when the object was already gone.
    pub async fn delete(&self, id: &str) -> Result<bool, DriveError> {
        let url = self.endpoint(&format!("/drive/v3/files/{id}"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::check_status(response).await?;
        Ok(true)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DriveError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.classification(), Some(ApiErrorClass::NotFound))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modified_time: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    parents: [&'a str; 1],
}

#[derive(Serialize)]
struct RenameRequest<'a> {
    name: &'a str,
}
