//! Hand-rolled client for the few Google Drive v3 endpoints this tool needs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::{header, Response, StatusCode, Url};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io;

use crate::{
    oauth::GetToken,
    sync::{Remote, RemoteFile},
    PersistCache,
};

#[derive(Debug, Clone, Copy)]
pub enum Scope {
    Full,
    MetadataReadOnly,
}

impl AsRef<str> for Scope {
    fn as_ref(&self) -> &str {
        match self {
            Scope::Full => "https://www.googleapis.com/auth/drive",
            Scope::MetadataReadOnly => "https://www.googleapis.com/auth/drive.metadata.readonly",
        }
    }
}

impl From<Scope> for oauth2::Scope {
    fn from(value: Scope) -> Self {
        oauth2::Scope::new(value.as_ref().to_string())
    }
}

#[derive(Default, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub display_name: String,
    pub email_address: Option<String>,
}

#[derive(Default, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "num_to_str",
        deserialize_with = "num_from_str"
    )]
    pub limit: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "num_to_str",
        deserialize_with = "num_from_str"
    )]
    pub usage: Option<i64>,
}

const ABOUT_FIELDS: &str = "kind,storageQuota,user";

#[derive(Default, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct About {
    kind: String,
    pub storage_quota: Quota,
    pub user: User,
}

const FILE_FIELDS: &str = "id,name,size,modifiedTime,mimeType";

#[derive(Default, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "num_to_str",
        deserialize_with = "num_from_str"
    )]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Default, Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    pub files: Option<Vec<File>>,
    pub incomplete_search: Option<bool>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone)]
struct UploadParams<'a> {
    size: Option<u64>,
    mime_type: Option<&'a str>,
    fields: &'a str,
}

impl<'a> UploadParams<'a> {
    fn query_params(&'a self) -> Vec<(&'static str, &'a str)> {
        vec![("uploadType", "resumable"), ("fields", self.fields)]
    }
}

// Resumable upload chunks must be multiples of 256 KiB.
const UPLOAD_CHUNK_SZ: u64 = 2 * 256 * 1024;

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Clone)]
pub struct GoogleDrive<A> {
    client: reqwest::Client,
    auth: Arc<A>,
    base_url: &'static str,
    upload_base_url: &'static str,
    user_agent: String,
}

impl<A> GoogleDrive<A>
where
    A: GetToken,
{
    pub async fn new(auth: A, client: reqwest::Client) -> crate::Result<Self> {
        let user_agent = format!("drivesync/{}", env!("CARGO_PKG_VERSION"));
        let drive = Self {
            auth: Arc::new(auth),
            client,
            base_url: "https://www.googleapis.com/drive/v3",
            upload_base_url: "https://www.googleapis.com/upload/drive/v3",
            user_agent,
        };

        let about = drive.about_get().await?;
        log::info!(
            "Access granted to Drive of {}{}",
            about.user.display_name,
            about
                .user
                .email_address
                .as_ref()
                .map(|em| format!(" <{em}>"))
                .unwrap_or_default(),
        );
        if let (&Some(usage), &Some(limit)) = (&about.storage_quota.usage, &about.storage_quota.limit)
        {
            use byte_unit::{Byte, UnitType};
            if let (Some(usage), Some(limit)) = (Byte::from_i64(usage), Byte::from_i64(limit)) {
                let usage = usage.get_appropriate_unit(UnitType::Binary);
                let limit = limit.get_appropriate_unit(UnitType::Binary);
                log::info!("Usage {usage:#.2} / {limit:#.2}");
            }
        }

        Ok(drive)
    }

    pub async fn about_get(&self) -> crate::Result<About> {
        let path = "/about";
        let query_params = vec![("fields", ABOUT_FIELDS)];

        let res = self
            .get_query(&[Scope::MetadataReadOnly], path, query_params)
            .await?;
        let res = check_response("GET", path, res).await?;
        let about: About = res.json().await?;
        if about.kind != "drive#about" {
            crate::api_bail!("/about returned wrong kind!");
        }
        Ok(about)
    }

    pub async fn files_list(&self, q: String) -> crate::Result<FileList> {
        let path = "/files";

        let query_params = vec![
            ("q", q),
            ("fields", format!("files({FILE_FIELDS})")),
            ("alt", "json".into()),
        ];

        let res = self
            .get_query(&[Scope::MetadataReadOnly], path, query_params)
            .await?;
        let res = check_response("GET", path, res).await?;

        let file_list: FileList = res.json().await?;

        Ok(file_list)
    }

    pub async fn files_get(&self, file_id: &str) -> crate::Result<File> {
        let path = format!("/files/{file_id}");
        let query_params = &[("fields", FILE_FIELDS)];

        let res = self
            .get_query(&[Scope::MetadataReadOnly], &path, query_params)
            .await?;
        let res = check_response("GET", &path, res).await?;
        Ok(res.json().await?)
    }

    pub async fn files_get_media(
        &self,
        file_id: &str,
    ) -> crate::Result<Option<impl io::AsyncRead + Send>> {
        use futures::stream::{StreamExt, TryStreamExt};

        let path = format!("/files/{file_id}");
        let query_params = &[("alt", "media")];

        let res = self.get_query(&[Scope::Full], &path, query_params).await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = check_response("GET", &path, res).await?;

        let bytes = res.bytes_stream().map(|res| {
            res.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
        });
        let read = bytes.into_async_read();

        Ok(Some(tokio_util::compat::FuturesAsyncReadCompatExt::compat(
            read,
        )))
    }

    pub async fn files_create_upload<D>(
        &self,
        file: &File,
        data_len: u64,
        data: D,
    ) -> crate::Result<File>
    where
        D: io::AsyncRead,
    {
        let params = UploadParams {
            size: Some(data_len),
            mime_type: Some(OCTET_STREAM),
            fields: FILE_FIELDS,
        };
        let upload_url = self
            .upload_request(reqwest::Method::POST, "/files", &params, file)
            .await?;
        self.upload_content(upload_url, data_len, data).await
    }

    pub async fn files_update_upload<D>(
        &self,
        file_id: &str,
        file: &File,
        data_len: u64,
        data: D,
    ) -> crate::Result<File>
    where
        D: io::AsyncRead,
    {
        let params = UploadParams {
            size: Some(data_len),
            mime_type: Some(OCTET_STREAM),
            fields: FILE_FIELDS,
        };
        let path = format!("/files/{file_id}");
        let upload_url = self
            .upload_request(reqwest::Method::PATCH, &path, &params, file)
            .await?;
        self.upload_content(upload_url, data_len, data).await
    }

    pub async fn files_delete(&self, file_id: &str) -> crate::Result<()> {
        let path = format!("/files/{file_id}");
        let token = self.fetch_token(&[Scope::Full]).await?;
        let url = Url::parse(&format!("{}{}", self.base_url, path))?;

        let res = self
            .client
            .delete(url)
            .header(header::USER_AGENT, &self.user_agent)
            .bearer_auth(token.secret())
            .send()
            .await?;
        check_response("DELETE", &path, res).await?;
        Ok(())
    }

    async fn fetch_token(&self, scopes: &[Scope]) -> crate::Result<oauth2::AccessToken> {
        let scopes = scopes.iter().map(|&s| s.into()).collect();
        self.auth.get_token(scopes).await
    }

    async fn get_query<Q, K, V>(
        &self,
        scopes: &[Scope],
        path: &str,
        query_params: Q,
    ) -> crate::Result<Response>
    where
        Q: IntoIterator,
        Q::Item: std::borrow::Borrow<(K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let token = self.fetch_token(scopes).await?;
        let url = url_with_query(self.base_url, path, query_params)?;

        let res = self
            .client
            .get(url)
            .header(header::USER_AGENT, &self.user_agent)
            .bearer_auth(token.secret())
            .send()
            .await?;

        Ok(res)
    }

    /// Initiates a resumable upload session and returns the session URL.
    async fn upload_request(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &UploadParams<'_>,
        metadata: &File,
    ) -> crate::Result<Url> {
        let token = self.fetch_token(&[Scope::Full]).await?;

        let url = url_with_query(self.upload_base_url, path, params.query_params())?;
        let mut req = self
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(token.secret())
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
            .json(metadata);
        if let Some(mt) = params.mime_type {
            req = req.header("X-Upload-Content-Type", mt);
        }
        if let Some(sz) = params.size {
            req = req.header("X-Upload-Content-Length", sz);
        }
        let res = req.send().await?;

        if res.status() != StatusCode::OK {
            let res = check_response(method.as_str(), path, res).await?;
            crate::api_bail!("{method} {url} returned {}", res.status());
        }
        let location = res
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| crate::api_error!("{method} {url} returned no session URL"))?;
        let location = location
            .to_str()
            .map_err(|err| crate::api_error!("invalid session URL: {err}"))?;
        Ok(Url::parse(location)?)
    }

    async fn put_upload_range(
        &self,
        url: Url,
        data: Vec<u8>,
        range_start: u64,
        range_len: u64,
    ) -> crate::Result<Response> {
        let token = self.fetch_token(&[Scope::Full]).await?;

        let data_len = data.len() as u64;
        debug_assert!(range_len >= range_start + data_len);

        let mut req = self
            .client
            .put(url)
            .bearer_auth(token.secret())
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::CONTENT_LENGTH, data_len);
        if range_start > 0 || data_len < range_len {
            req = req.header(
                header::CONTENT_RANGE,
                format!(
                    "bytes {range_start}-{}/{range_len}",
                    range_start + data_len - 1
                ),
            );
        }
        Ok(req.body(data).send().await?)
    }

    async fn upload_content<D>(&self, upload_url: Url, data_len: u64, data: D) -> crate::Result<File>
    where
        D: io::AsyncRead,
    {
        use io::AsyncReadExt;

        tokio::pin!(data);

        let mut sent = 0u64;
        loop {
            let mut buf: Vec<u8> = Vec::with_capacity(UPLOAD_CHUNK_SZ as usize);
            let sz = data
                .as_mut()
                .take(UPLOAD_CHUNK_SZ)
                .read_to_end(&mut buf)
                .await?;
            log::trace!("uploading {sz} bytes");
            let res = self
                .put_upload_range(upload_url.clone(), buf, sent, data_len)
                .await?;
            sent += sz as u64;
            let status = res.status();
            if status.is_success() && sent == data_len {
                break Ok(res.json().await?);
            } else if status.is_server_error() || status.is_client_error() {
                crate::api_bail!(
                    "PUT {upload_url} returned {status}\n{}",
                    String::from_utf8_lossy(&res.bytes().await?)
                );
            } else if sz == 0 {
                // 308 with no more content to send
                crate::api_bail!("upload of {sent}/{data_len} bytes stalled on {upload_url}");
            }
        }
    }
}

impl<A> Remote for GoogleDrive<A>
where
    A: GetToken,
{
    async fn find_by_name(&self, name: &str) -> crate::Result<Option<RemoteFile>> {
        let q = format!(
            "name = '{}' and trashed = false",
            name.replace('\'', "\\'")
        );
        let list = self.files_list(q).await?;
        // Drive names are not unique, the first match wins
        match list.files.unwrap_or_default().into_iter().next() {
            Some(f) => Ok(Some(map_file(f)?)),
            None => Ok(None),
        }
    }

    async fn metadata(&self, id: &str) -> crate::Result<RemoteFile> {
        map_file(self.files_get(id).await?)
    }

    async fn create(
        &self,
        name: &str,
        mtime: Option<DateTime<Utc>>,
        size: u64,
        data: impl io::AsyncRead + Send,
    ) -> crate::Result<RemoteFile> {
        log::info!("creating remote file '{name}' ({size} bytes)");
        let file = File {
            name: Some(name.to_string()),
            modified_time: mtime,
            ..Default::default()
        };
        let file = self.files_create_upload(&file, size, data).await?;
        map_file(file)
    }

    async fn update(
        &self,
        id: &str,
        mtime: DateTime<Utc>,
        size: u64,
        data: impl io::AsyncRead + Send,
    ) -> crate::Result<RemoteFile> {
        log::info!("updating remote file {id} ({size} bytes)");
        let file = File {
            modified_time: Some(mtime),
            ..Default::default()
        };
        let file = self.files_update_upload(id, &file, size, data).await?;
        map_file(file)
    }

    async fn download(&self, id: &str) -> crate::Result<impl io::AsyncRead + Send> {
        log::info!("downloading remote file {id}");
        self.files_get_media(id)
            .await?
            .ok_or_else(|| crate::api_error!("remote file {id} not found"))
    }

    async fn delete(&self, id: &str) -> crate::Result<()> {
        log::info!("deleting remote file {id}");
        self.files_delete(id).await
    }
}

impl<A> PersistCache for GoogleDrive<A>
where
    A: PersistCache + Send + Sync,
{
    async fn persist_cache(&self) -> crate::Result<()> {
        self.auth.persist_cache().await
    }
}

fn map_file(f: File) -> crate::Result<RemoteFile> {
    let id = f.id.unwrap_or_default();
    let name = f.name.unwrap_or_default();
    let mtime = f.modified_time.ok_or_else(|| {
        crate::api_error!("Expected to receive modifiedTime from Google for '{name}'")
    })?;
    let size = f.size.map(|sz| sz as u64);
    Ok(RemoteFile {
        id,
        name,
        size,
        mtime,
    })
}

async fn check_response(method: &str, path: &str, res: Response) -> crate::Result<Response> {
    let status = res.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        crate::auth_bail!("{method} {path} returned {status}\n{}", res.text().await?);
    }
    if !status.is_success() {
        crate::api_bail!("{method} {path} returned {status}\n{}", res.text().await?);
    }
    Ok(res)
}

fn num_to_str<S>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let value = value.expect("num_to_str shouldn't be called for None");
    serializer.serialize_str(&value.to_string())
}

fn num_from_str<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use std::str::FromStr;

    let s = String::deserialize(deserializer)?;
    Ok(Some(i64::from_str(&s).map_err(serde::de::Error::custom)?))
}

fn url_with_query<B, P, Q, K, V>(base_url: B, path: P, query_params: Q) -> crate::Result<Url>
where
    B: AsRef<str>,
    P: AsRef<str>,
    Q: IntoIterator,
    Q::Item: std::borrow::Borrow<(K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let base = format!("{}{}", base_url.as_ref(), path.as_ref());
    Ok(Url::parse_with_params(&base, query_params)?)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{map_file, File, FileList};

    #[test]
    fn deserialize_file_list() -> anyhow::Result<()> {
        let json = r#"{
            "files": [
                {
                    "id": "file-id",
                    "name": "notes.txt",
                    "size": "1234",
                    "modifiedTime": "2024-01-15T10:30:00.000Z",
                    "mimeType": "text/plain"
                }
            ]
        }"#;
        let list: FileList = serde_json::from_str(json)?;
        let f = list.files.unwrap().into_iter().next().unwrap();
        assert_eq!(f.id.as_deref(), Some("file-id"));
        assert_eq!(f.size, Some(1234));
        assert_eq!(
            f.modified_time,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
        );
        Ok(())
    }

    #[test]
    fn serialize_upload_metadata() -> anyhow::Result<()> {
        let file = File {
            name: Some("notes.txt".to_string()),
            modified_time: Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()),
            ..Default::default()
        };
        let json = serde_json::to_value(&file)?;
        assert_eq!(json["name"], "notes.txt");
        assert!(json["modifiedTime"].is_string());
        assert!(json.get("id").is_none());
        assert!(json.get("size").is_none());
        Ok(())
    }

    #[test]
    fn map_file_requires_mtime() {
        let f = File {
            id: Some("file-id".into()),
            name: Some("notes.txt".into()),
            ..Default::default()
        };
        assert!(map_file(f).is_err());
    }
}
