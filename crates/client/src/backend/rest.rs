//! HTTP implementation of [`RemoteDataService`] against a PostgREST + object
//! storage deployment.
//!
//! Change events come from two places: the backend's own successful writes,
//! and the realtime socket (started on the first subscription) for writes
//! made by other clients.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use stockbook_inventory::{Item, ItemId, ItemPatch, NewItem};

use super::socket::{Listener, SocketConfig, socket_url};
use super::{BackendError, ObjectUpload, RemoteDataService};
use crate::config::ClientConfig;
use crate::realtime::{ChangeEvent, ChangeFeed, ChangeKind, ChangeSubscription};

/// Error body returned by the REST and storage endpoints.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
    bucket: String,
    init_function: String,
    changes: ChangeFeed,
    realtime: bool,
    listener: Mutex<Option<Listener>>,
}

impl RestBackend {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            table: config.table.clone(),
            bucket: config.bucket.clone(),
            init_function: config.init_function.clone(),
            changes: ChangeFeed::default(),
            realtime: true,
            listener: Mutex::new(None),
        }
    }

    /// Whether subscribing starts the realtime socket. On by default; with it
    /// off only this backend's own writes are published.
    pub fn with_realtime(mut self, enabled: bool) -> Self {
        self.realtime = enabled;
        self
    }

    fn ensure_listener(&self) {
        let Ok(mut listener) = self.listener.lock() else {
            return;
        };
        if listener.as_ref().is_some_and(Listener::is_running) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, realtime socket not started");
            return;
        };
        let config = SocketConfig {
            url: socket_url(&self.base_url, &self.api_key),
            api_key: self.api_key.clone(),
            channel: format!("{}_changes", self.table),
            table: self.table.clone(),
        };
        *listener = Some(Listener::spawn(&runtime, config, self.changes.clone()));
    }

    fn table_url(&self, query: &str) -> String {
        format!("{}/rest/v1/{}?{}", self.base_url, self.table, query)
    }

    fn rpc_url(&self) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, self.init_function)
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header("apikey", &self.api_key);
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, BackendError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(BackendError::transport)?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        Err(error_from_response(resp).await)
    }

    async fn rows<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Vec<T>, BackendError> {
        self.send(req)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|e| BackendError::new(format!("invalid response body: {e}")))
    }

    /// Rows that fail to map are skipped rather than failing the listing.
    async fn items(&self, req: RequestBuilder) -> Result<Vec<Item>, BackendError> {
        Ok(decode_items(self.rows::<Value>(req).await?))
    }

    fn publish(&self, kind: ChangeKind, id: ItemId) {
        self.changes
            .publish(ChangeEvent::new(self.table.clone(), kind, Some(id)));
    }
}

#[async_trait]
impl RemoteDataService for RestBackend {
    async fn select_items(&self) -> Result<Vec<Item>, BackendError> {
        let url = self.table_url("select=*&order=date_added.desc");
        self.items(self.client.get(url)).await
    }

    async fn probe_items(&self) -> Result<(), BackendError> {
        let url = self.table_url("select=id&limit=1");
        self.send(self.client.get(url)).await.map(|_| ())
    }

    async fn insert_item(&self, item: &NewItem) -> Result<Item, BackendError> {
        let req = self
            .client
            .post(self.table_url("select=*"))
            .header("Prefer", "return=representation")
            .json(&[item]);
        let stored = first_row(self.rows::<Item>(req).await?, "insert returned no rows")?;
        self.publish(ChangeKind::Insert, stored.id);
        Ok(stored)
    }

    async fn update_item(&self, id: &ItemId, patch: &ItemPatch) -> Result<Item, BackendError> {
        let req = self
            .client
            .patch(self.table_url(&format!("id=eq.{id}&select=*")))
            .header("Prefer", "return=representation")
            .json(patch);
        let stored = first_row(self.rows::<Item>(req).await?, &format!("no row with id {id}"))?;
        self.publish(ChangeKind::Update, *id);
        Ok(stored)
    }

    async fn delete_item(&self, id: &ItemId) -> Result<(), BackendError> {
        let req = self
            .client
            .delete(self.table_url(&format!("id=eq.{id}")))
            .header("Prefer", "return=minimal");
        self.send(req).await?;
        self.publish(ChangeKind::Delete, *id);
        Ok(())
    }

    async fn initialize_schema(&self) -> Result<(), BackendError> {
        let req = self.client.post(self.rpc_url()).json(&serde_json::json!({}));
        self.send(req).await.map(|_| ())
    }

    async fn upload_object(&self, upload: ObjectUpload) -> Result<(), BackendError> {
        let req = self
            .client
            .post(self.object_url(&upload.path))
            .header("content-type", upload.content_type)
            .header("cache-control", format!("max-age={}", upload.cache_control))
            .header("x-upsert", if upload.upsert { "true" } else { "false" })
            .body(upload.bytes);
        self.send(req).await.map(|_| ())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    fn subscribe_changes(&self, table: &str) -> ChangeSubscription {
        let subscription = self.changes.subscribe(table);
        if self.realtime {
            self.ensure_listener();
        }
        subscription
    }
}

fn decode_items(rows: Vec<Value>) -> Vec<Item> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.get("id").cloned().unwrap_or(Value::Null);
            serde_json::from_value::<Item>(row)
                .map_err(|e| tracing::warn!(%id, error = %e, "skipping unreadable item row"))
                .ok()
        })
        .collect()
}

fn first_row(rows: Vec<Item>, missing: &str) -> Result<Item, BackendError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| BackendError::new(missing).with_code("PGRST116"))
}

async fn error_from_response(resp: Response) -> BackendError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    parse_error_body(status.as_u16(), &text)
}

fn parse_error_body(status: u16, text: &str) -> BackendError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    let message = body
        .message
        .or(body.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                format!("request failed with status {status}")
            } else {
                text.trim().to_string()
            }
        });
    let err = BackendError::new(message);
    match body.code {
        Some(code) => err.with_code(code),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rust_decimal::Decimal;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ID: &str = "0193389a-6f2b-7c4e-9a51-3f1d2b7c8e90";

    fn backend() -> RestBackend {
        let config = ClientConfig {
            service_url: "http://localhost:54321/".to_string(),
            ..ClientConfig::default()
        };
        RestBackend::new(&config).with_realtime(false)
    }

    fn backend_for(server: &MockServer) -> RestBackend {
        let config = ClientConfig {
            service_url: server.uri(),
            api_key: "anon-key".to_string(),
            ..ClientConfig::default()
        };
        RestBackend::new(&config).with_realtime(false)
    }

    fn row(id: &str, title: &str, quantity: i64) -> Value {
        json!({
            "id": id,
            "title": title,
            "purchase_price": 40,
            "selling_price": 55.5,
            "quantity": quantity,
            "category": "gel-pens",
            "supplier": "Nova",
            "date_added": "2024-11-18T10:00:00+00:00",
            "image_url": null
        })
    }

    fn pen() -> NewItem {
        NewItem {
            title: "Gel pen".to_string(),
            purchase_price: Decimal::from(40),
            selling_price: Decimal::new(555, 1),
            quantity: 20,
            category: "gel-pens".to_string(),
            supplier: "Nova".to_string(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn select_sends_auth_and_skips_unreadable_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/books"))
            .and(query_param("select", "*"))
            .and(query_param("order", "date_added.desc"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                row(ID, "Gel pen", 20),
                row("0193389a-6f2b-7c4e-9a51-3f1d2b7c8e91", "Broken", -1),
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let items = backend_for(&server).select_items().await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Gel pen");
        assert_eq!(items[0].selling_price, Decimal::new(555, 1));
    }

    #[tokio::test]
    async fn insert_posts_one_row_array_and_publishes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/books"))
            .and(header("Prefer", "return=representation"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([row(ID, "Gel pen", 20)])))
            .expect(1)
            .mount(&server)
            .await;
        let backend = backend_for(&server);
        let mut changes = backend.subscribe_changes("books");

        let stored = backend.insert_item(&pen()).await.unwrap();

        assert_eq!(stored.id.to_string(), ID);
        let requests = server.received_requests().await.unwrap();
        let body: Value = requests[0].body_json().unwrap();
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["title"], "Gel pen");
        assert_eq!(body[0]["selling_price"], json!(55.5));
        assert_eq!(body[0]["quantity"], 20);
        assert!(body[0].get("sellingPrice").is_none());

        let event = changes.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.id, Some(stored.id));
    }

    #[tokio::test]
    async fn update_patches_present_fields_only() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/books"))
            .and(query_param("id", format!("eq.{ID}")))
            .and(header("Prefer", "return=representation"))
            .and(body_json(json!({ "quantity": 0 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row(ID, "Gel pen", 0)])))
            .expect(1)
            .mount(&server)
            .await;
        let backend = backend_for(&server);
        let mut changes = backend.subscribe_changes("books");
        let id: ItemId = serde_json::from_value(json!(ID)).unwrap();

        let stored = backend
            .update_item(&id, &ItemPatch::default().quantity(0))
            .await
            .unwrap();

        assert_eq!(stored.quantity, 0);
        assert_eq!(changes.recv().await.unwrap().kind, ChangeKind::Update);
    }

    #[tokio::test]
    async fn update_of_missing_row_reports_no_rows() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/books"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        let id: ItemId = serde_json::from_value(json!(ID)).unwrap();

        let err = backend_for(&server)
            .update_item(&id, &ItemPatch::default().title("Pen"))
            .await
            .unwrap_err();

        assert_eq!(err.code.as_deref(), Some("PGRST116"));
    }

    #[tokio::test]
    async fn upload_sends_storage_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/book-images/book_1.png"))
            .and(header("content-type", "image/png"))
            .and(header("cache-control", "max-age=3600"))
            .and(header("x-upsert", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Key": "book-images/book_1.png" })))
            .expect(1)
            .mount(&server)
            .await;

        backend_for(&server)
            .upload_object(ObjectUpload {
                path: "book_1.png".to_string(),
                bytes: Bytes::from_static(b"png"),
                content_type: "image/png".to_string(),
                cache_control: "3600".to_string(),
                upsert: false,
            })
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].body, b"png".to_vec());
    }

    #[tokio::test]
    async fn rejected_write_maps_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/books"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": "42501",
                "message": "new row violates row-level security policy for table \"books\""
            })))
            .mount(&server)
            .await;
        let err = backend_for(&server).insert_item(&pen()).await.unwrap_err();

        assert!(err.is_policy_violation());
        assert_eq!(err.code.as_deref(), Some("42501"));
    }

    #[tokio::test]
    async fn delete_and_schema_init_hit_their_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/books"))
            .and(query_param("id", format!("eq.{ID}")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/init_books_table"))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let backend = backend_for(&server);
        let id: ItemId = serde_json::from_value(json!(ID)).unwrap();

        backend.delete_item(&id).await.unwrap();
        backend.initialize_schema().await.unwrap();
    }

    #[test]
    fn unreadable_rows_are_dropped_from_listing() {
        let items = decode_items(vec![
            row(ID, "Gel pen", 3),
            json!({ "id": "not-a-uuid" }),
            row("0193389a-6f2b-7c4e-9a51-3f1d2b7c8e91", "Negative", -1),
        ]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);
    }

    #[test]
    fn builds_rest_and_storage_urls() {
        let backend = backend();
        assert_eq!(
            backend.table_url("select=*&order=date_added.desc"),
            "http://localhost:54321/rest/v1/books?select=*&order=date_added.desc"
        );
        assert_eq!(
            backend.rpc_url(),
            "http://localhost:54321/rest/v1/rpc/init_books_table"
        );
        assert_eq!(
            backend.object_url("book_1.png"),
            "http://localhost:54321/storage/v1/object/book-images/book_1.png"
        );
        assert_eq!(
            backend.public_url("book_1.png"),
            "http://localhost:54321/storage/v1/object/public/book-images/book_1.png"
        );
    }

    #[test]
    fn parses_postgrest_error_body() {
        let err = parse_error_body(
            404,
            r#"{"code":"42P01","message":"relation \"public.books\" does not exist"}"#,
        );
        assert!(err.is_missing_table());
        assert_eq!(err.code.as_deref(), Some("42P01"));
    }

    #[test]
    fn falls_back_to_raw_text_or_status() {
        assert_eq!(parse_error_body(502, "Bad Gateway").message, "Bad Gateway");
        assert_eq!(
            parse_error_body(500, "").message,
            "request failed with status 500"
        );
        assert_eq!(
            parse_error_body(400, r#"{"error":"Duplicate"}"#).message,
            "Duplicate"
        );
    }
}
