use std::collections::HashMap;

use async_trait::async_trait;
use drive_core::{DriveClient, DriveError, DriveFile};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// One object in the remote folder. `name` is the full vault-relative path;
/// the store has no real hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    pub modified_time: Option<OffsetDateTime>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Complete listing of the vault folder, all pages.
    async fn list(&self) -> Result<Vec<RemoteObject>, DriveError>;
    async fn get(&self, id: &str) -> Result<Vec<u8>, DriveError>;
    async fn create(&self, name: &str, bytes: Vec<u8>) -> Result<RemoteObject, DriveError>;
    async fn update(&self, id: &str, bytes: Vec<u8>) -> Result<RemoteObject, DriveError>;
    async fn rename(&self, id: &str, new_name: &str) -> Result<RemoteObject, DriveError>;
    /// `Ok(false)` when the object was already gone.
    async fn delete(&self, id: &str) -> Result<bool, DriveError>;
}

pub struct DriveRemote {
    client: DriveClient,
}

impl DriveRemote {
    pub fn new(client: DriveClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteStore for DriveRemote {
    async fn list(&self) -> Result<Vec<RemoteObject>, DriveError> {
        Ok(self
            .client
            .list_all()
            .await?
            .into_iter()
            .map(RemoteObject::from)
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, DriveError> {
        self.client.download(id).await
    }

    async fn create(&self, name: &str, bytes: Vec<u8>) -> Result<RemoteObject, DriveError> {
        Ok(self.client.create_file(name, bytes).await?.into())
    }

    async fn update(&self, id: &str, bytes: Vec<u8>) -> Result<RemoteObject, DriveError> {
        Ok(self.client.update_content(id, bytes).await?.into())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<RemoteObject, DriveError> {
        Ok(self.client.rename(id, new_name).await?.into())
    }

    async fn delete(&self, id: &str) -> Result<bool, DriveError> {
        self.client.delete(id).await
    }
}

impl From<DriveFile> for RemoteObject {
    fn from(file: DriveFile) -> Self {
        let modified_time = file
            .modified_time
            .as_deref()
            .and_then(|value| OffsetDateTime::parse(value, &Rfc3339).ok());
        Self {
            id: file.id,
            name: file.name,
            modified_time,
        }
    }
}

/// Name-indexed view of one listing, owned by a single sync operation and
/// kept current as objects are created, renamed and deleted.
#[derive(Debug, Clone, Default)]
pub struct RemoteListing {
    by_name: HashMap<String, RemoteObject>,
}

impl RemoteListing {
    /// Duplicate names keep the most recently modified object.
    pub fn from_objects(objects: Vec<RemoteObject>) -> Self {
        let mut by_name: HashMap<String, RemoteObject> = HashMap::new();
        for object in objects {
            match by_name.get(&object.name) {
                Some(existing) if existing.modified_time >= object.modified_time => {}
                _ => {
                    by_name.insert(object.name.clone(), object);
                }
            }
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&RemoteObject> {
        self.by_name.get(name)
    }

    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(|object| object.id.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn insert(&mut self, object: RemoteObject) {
        self.by_name.insert(object.name.clone(), object);
    }

    pub fn remove(&mut self, name: &str) -> Option<RemoteObject> {
        self.by_name.remove(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Objects sorted by name.
    pub fn objects(&self) -> Vec<&RemoteObject> {
        let mut objects: Vec<_> = self.by_name.values().collect();
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn object(id: &str, name: &str, modified: Option<OffsetDateTime>) -> RemoteObject {
        RemoteObject {
            id: id.into(),
            name: name.into(),
            modified_time: modified,
        }
    }

    #[test]
    fn listing_prefers_newest_duplicate() {
        let listing = RemoteListing::from_objects(vec![
            object("old", "a.md", Some(datetime!(2024-01-01 00:00 UTC))),
            object("new", "a.md", Some(datetime!(2024-02-01 00:00 UTC))),
            object("b", "b.md", None),
        ]);
        assert_eq!(listing.id_of("a.md"), Some("new"));
        assert_eq!(listing.len(), 2);
        let names: Vec<_> = listing.objects().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.md"]);
    }

    #[test]
    fn drive_file_conversion_tolerates_bad_timestamps() {
        let object = RemoteObject::from(DriveFile {
            id: "x".into(),
            name: "n.md".into(),
            modified_time: Some("yesterday".into()),
        });
        assert_eq!(object.modified_time, None);
    }

    #[tokio::test]
    async fn drive_remote_lists_through_client() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    { "id": "a1", "name": "notes/a.md", "modifiedTime": "2024-01-01T00:00:00Z" }
                ]
            })))
            .mount(&server)
            .await;

        let client = DriveClient::with_base_url(&server.uri(), "token", "folder").unwrap();
        let objects = DriveRemote::new(client).list().await.unwrap();

        assert_eq!(
            objects,
            vec![object("a1", "notes/a.md", Some(datetime!(2024-01-01 00:00 UTC)))]
        );
    }
}
