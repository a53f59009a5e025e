//! JSON-over-HTTP remote.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Call              | Request                          |
//! |-------------------|----------------------------------|
//! | list notes        | `GET notes?folder_id=&trashed=`  |
//! | get note          | `GET notes/{id}`                 |
//! | create note       | `POST notes`                     |
//! | update note       | `PATCH notes/{id}`               |
//! | trash / restore   | `POST notes/{id}/trash`, `/restore` |
//! | list folders      | `GET folders`                    |
//! | create folder     | `POST folders`                   |
//! | update folder     | `PATCH folders/{id}`             |
//! | delete folder     | `DELETE folders/{id}`            |
//! | settings          | `GET settings`, `PUT settings`   |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use quire_types::{FolderDraft, FolderId, FolderPatch, NoteDraft, NoteId, NotePatch, SettingsBlob};

use super::{
    NoteQuery, RemoteError, RemoteFolder, RemoteNote, RemoteResult, RemoteService, RemoteSettings,
};

#[derive(Serialize)]
struct SettingsBody<'a> {
    blob: &'a SettingsBlob,
}

/// [`RemoteService`] over HTTP.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Connectivity(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, target: &str) -> RemoteResult<T> {
        let response = self.dispatch(builder, target).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn dispatch(&self, builder: RequestBuilder, target: &str) -> RemoteResult<reqwest::Response> {
        let response = builder.send().await.map_err(map_transport)?;
        let status = response.status();
        trace!(path = target, status = status.as_u16(), "remote response");
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), message, target))
    }
}

fn map_transport(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else if let Some(status) = err.status() {
        RemoteError::from_status(status.as_u16(), err.to_string(), "")
    } else {
        RemoteError::Connectivity(err.to_string())
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn list_notes(&self, query: &NoteQuery) -> RemoteResult<Vec<RemoteNote>> {
        let mut params = vec![("trashed", query.trashed.to_string())];
        if let Some(folder_id) = &query.folder_id {
            params.push(("folder_id", folder_id.to_string()));
        }
        self.send(self.request(Method::GET, "notes").query(&params), "notes")
            .await
    }

    async fn get_note(&self, id: &NoteId) -> RemoteResult<RemoteNote> {
        let path = format!("notes/{id}");
        self.send(self.request(Method::GET, &path), &path).await
    }

    async fn create_note(&self, draft: &NoteDraft) -> RemoteResult<RemoteNote> {
        self.send(self.request(Method::POST, "notes").json(draft), "notes")
            .await
    }

    async fn update_note(&self, id: &NoteId, patch: &NotePatch) -> RemoteResult<RemoteNote> {
        let path = format!("notes/{id}");
        self.send(self.request(Method::PATCH, &path).json(patch), &path)
            .await
    }

    async fn soft_delete_note(&self, id: &NoteId) -> RemoteResult<RemoteNote> {
        let path = format!("notes/{id}/trash");
        self.send(self.request(Method::POST, &path), &path).await
    }

    async fn restore_note(&self, id: &NoteId) -> RemoteResult<RemoteNote> {
        let path = format!("notes/{id}/restore");
        self.send(self.request(Method::POST, &path), &path).await
    }

    async fn list_folders(&self) -> RemoteResult<Vec<RemoteFolder>> {
        self.send(self.request(Method::GET, "folders"), "folders")
            .await
    }

    async fn create_folder(&self, draft: &FolderDraft) -> RemoteResult<RemoteFolder> {
        self.send(self.request(Method::POST, "folders").json(draft), "folders")
            .await
    }

    async fn update_folder(
        &self,
        id: &FolderId,
        patch: &FolderPatch,
    ) -> RemoteResult<RemoteFolder> {
        let path = format!("folders/{id}");
        self.send(self.request(Method::PATCH, &path).json(patch), &path)
            .await
    }

    async fn delete_folder(&self, id: &FolderId) -> RemoteResult<()> {
        let path = format!("folders/{id}");
        self.dispatch(self.request(Method::DELETE, &path), &path)
            .await
            .map(|_| ())
    }

    async fn get_settings(&self) -> RemoteResult<RemoteSettings> {
        self.send(self.request(Method::GET, "settings"), "settings")
            .await
    }

    async fn update_settings(&self, blob: &SettingsBlob) -> RemoteResult<RemoteSettings> {
        self.send(
            self.request(Method::PUT, "settings").json(&SettingsBody { blob }),
            "settings",
        )
        .await
    }
}
