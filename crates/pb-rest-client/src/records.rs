//! Record CRUD for a single collection

use pb_api_contract::{AuthResponse, ListResult, RecordBody};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::{ByteStream, Client, Decoded};
use crate::error::{ClientError, ClientResult};
use crate::query::{encode_segment, QueryParams};
use crate::request::{ApiRequest, FileAttachment};

/// Default page size used by [`RecordService::get_full_list`]
pub const DEFAULT_FULL_LIST_BATCH: u32 = 100;

pub(crate) const AUTH_WITH_PASSWORD: &str = "auth-with-password";
pub(crate) const AUTH_REFRESH: &str = "auth-refresh";

/// Lightweight handle over `/api/collections/{name}/records`.
///
/// Construction only copies the collection name, so handles are made per
/// call rather than cached.
#[derive(Debug, Clone)]
pub struct RecordService<'a> {
    client: &'a Client,
    collection: String,
    cancel: Option<CancellationToken>,
}

impl<'a> RecordService<'a> {
    pub(crate) fn new(client: &'a Client, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
            cancel: None,
        }
    }

    /// Abort every request made through this handle once `token` fires
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn request(&self, request: ApiRequest) -> ApiRequest {
        match &self.cancel {
            Some(cancel) => request.cancel_on(cancel.clone()),
            None => request,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// `/api/collections/{name}/records`
    pub fn base_path(&self) -> String {
        records_path(&self.collection)
    }

    fn record_path(&self, id: &str) -> String {
        format!("{}/{}", self.base_path(), encode_segment(id))
    }

    /// One page of records
    pub async fn list<T: DeserializeOwned>(
        &self,
        page: u32,
        per_page: u32,
        filter: Option<&str>,
        sort: Option<&str>,
    ) -> ClientResult<ListResult<T>> {
        let query = QueryParams::new()
            .with_opt("filter", filter)
            .with("page", page)
            .with("perPage", per_page)
            .with_opt("sort", sort);
        self.client
            .send_json(self.request(ApiRequest::get(self.base_path()).query_params(query)))
            .await
    }

    /// Every record matching `filter`, fetched page by page
    pub async fn get_full_list<T: DeserializeOwned>(
        &self,
        batch: u32,
        filter: Option<&str>,
        sort: Option<&str>,
    ) -> ClientResult<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let result = self.list::<T>(page, batch.max(1), filter, sort).await?;
            let received = result.items.len();
            items.extend(result.items);
            if received == 0 || items.len() as i64 >= result.total_items {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    pub async fn get_one<T: DeserializeOwned>(&self, id: &str) -> ClientResult<T> {
        self.client
            .send_json(self.request(ApiRequest::get(self.record_path(id))))
            .await
    }

    pub async fn create<B: RecordBody, T: DeserializeOwned>(&self, record: &B) -> ClientResult<T> {
        self.client
            .send_json(self.request(ApiRequest::post(self.base_path()).record(record)?))
            .await
    }

    /// Create a record with file fields, sent as multipart
    pub async fn create_with_files<B: RecordBody, T: DeserializeOwned>(
        &self,
        record: &B,
        files: Vec<FileAttachment>,
    ) -> ClientResult<T> {
        let request = self.request(ApiRequest::post(self.base_path()).record(record)?.files(files));
        self.client.send_json(request).await
    }

    pub async fn update<B: RecordBody, T: DeserializeOwned>(
        &self,
        id: &str,
        record: &B,
    ) -> ClientResult<T> {
        self.client
            .send_json(self.request(ApiRequest::patch(self.record_path(id)).record(record)?))
            .await
    }

    pub async fn delete(&self, id: &str) -> ClientResult<()> {
        self.client
            .send(self.request(ApiRequest::delete(self.record_path(id))))
            .await
    }

    /// Public URL of a stored file; `thumb` is a size such as `100x100`
    pub fn file_url(&self, record_id: &str, file_name: &str, thumb: Option<&str>) -> ClientResult<Url> {
        let query = QueryParams::new().with_opt("thumb", thumb);
        self.client
            .build_url(&self.file_path(record_id, file_name), Some(&query))
    }

    /// Stream a stored file; `cancel` overrides the handle's token
    pub async fn download_file(
        &self,
        record_id: &str,
        file_name: &str,
        thumb: Option<&str>,
        cancel: Option<CancellationToken>,
    ) -> ClientResult<ByteStream> {
        let query = QueryParams::new().with_opt("thumb", thumb);
        let cancel = cancel.or_else(|| self.cancel.clone());
        self.client
            .get_stream(&self.file_path(record_id, file_name), Some(&query), cancel)
            .await
    }

    /// Sign in with an identity (email or username) and password.
    ///
    /// The returned token and record replace whatever the client's auth
    /// provider held.
    pub async fn auth_with_password<T: DeserializeOwned>(
        &self,
        identity: &str,
        password: &str,
    ) -> ClientResult<AuthResponse<T>> {
        let request = ApiRequest::post(auth_path(&self.collection, AUTH_WITH_PASSWORD))
            .body_field("identity", identity)
            .body_field("password", password);
        let decoded = self
            .client
            .send_decoded::<AuthResponse>(self.request(request))
            .await?;
        self.client
            .auth()
            .save(decoded.value.token.clone(), Some(decoded.value.record.clone()));
        typed_auth(decoded)
    }

    /// Exchange the current token for a new one, saving the result
    pub async fn auth_refresh<T: DeserializeOwned>(&self) -> ClientResult<AuthResponse<T>> {
        let decoded = self
            .client
            .refresh_auth(&self.collection, self.cancel.clone())
            .await?;
        typed_auth(decoded)
    }

    fn file_path(&self, record_id: &str, file_name: &str) -> String {
        format!(
            "/api/files/{}/{}/{}",
            encode_segment(&self.collection),
            encode_segment(record_id),
            encode_segment(file_name)
        )
    }
}

pub(crate) fn records_path(collection: &str) -> String {
    format!("/api/collections/{}/records", encode_segment(collection))
}

pub(crate) fn auth_path(collection: &str, action: &str) -> String {
    format!("/api/collections/{}/{action}", encode_segment(collection))
}

fn typed_auth<T: DeserializeOwned>(
    decoded: Decoded<AuthResponse>,
) -> ClientResult<AuthResponse<T>> {
    let Decoded {
        value,
        method,
        url,
        status,
    } = decoded;
    let record = serde_json::from_value(value.record).map_err(|e| ClientError::Decode {
        method,
        url,
        status,
        message: e.to_string(),
    })?;
    Ok(AuthResponse {
        token: value.token,
        record,
        meta: value.meta,
    })
}
