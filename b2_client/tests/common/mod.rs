//! An in-process fake of the B2 native API, good enough for the client's integration tests.
//!
//! Every route shares one [`State`] so tests can inject failures before a call and inspect what
//! the client sent afterwards.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use b2_client::{B2Client, Credentials};
use b2_config::groups::client::ConfigValueGroup as ClientConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const KEY_ID: &str = "test-key-id";
pub const KEY: &str = "test-key";
pub const ACCOUNT_ID: &str = "acc-1";
pub const RECOMMENDED_PART_SIZE: u64 = 1000;
pub const ABSOLUTE_MINIMUM_PART_SIZE: u64 = 100;

pub fn sha1_hex(data: &[u8]) -> String {
    format!("{:x}", Sha1::digest(data))
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_id: String,
    pub bucket_id: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    /// `None` for files assembled from parts.
    pub sha1: Option<String>,
    pub file_info: HashMap<String, String>,
    pub upload_timestamp: u64,
}

#[derive(Debug)]
struct LargeFile {
    bucket_id: String,
    file_name: String,
    content_type: String,
    file_info: HashMap<String, String>,
    parts: BTreeMap<u32, Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct State {
    /// Account tokens from older generations are reported as expired.
    pub token_generation: u64,
    /// Reject every account token as expired, even fresh ones.
    pub reject_all_tokens: bool,
    pub authorize_calls: usize,

    pub buckets: Vec<(String, String)>,
    pub files: Vec<StoredFile>,
    large_files: HashMap<String, LargeFile>,

    pub api_calls: HashMap<String, usize>,
    pub single_uploads: usize,
    pub part_attempts: HashMap<u32, usize>,
    pub part_urls_issued: usize,
    pub finished_part_sha1s: Vec<Vec<String>>,
    pub cancelled_file_ids: Vec<String>,
    pub download_requests: usize,
    pub range_requests: Vec<String>,

    /// Number of 503s still to be returned, per part number.
    pub fail_part: HashMap<u32, usize>,
    /// Part number that is rejected with a 400.
    pub reject_part: Option<u32>,
    /// Part number whose response reports a SHA1 other than that of the stored bytes.
    pub misreport_part_sha1: Option<u32>,
    pub fail_single_uploads: usize,
    pub fail_downloads: usize,
    pub corrupt_download_sha1: bool,

    next_id: u64,
}

impl State {
    pub fn calls(&self, api_name: &str) -> usize {
        self.api_calls.get(api_name).copied().unwrap_or(0)
    }

    /// Makes every account token issued so far invalid.
    pub fn expire_tokens(&mut self) {
        self.token_generation += 1;
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn account_token(&self) -> String {
        format!("acct-tok-{}", self.token_generation)
    }

    fn check_account_token(&self, request: &Request) -> Result<(), ResponseTemplate> {
        let token = header(request, "authorization").unwrap_or_default();
        if self.reject_all_tokens || (token.starts_with("acct-tok-") && token != self.account_token()) {
            return Err(api_error(401, "expired_auth_token"));
        }
        if token != self.account_token() {
            return Err(api_error(401, "bad_auth_token"));
        }
        Ok(())
    }

    fn bucket_name(&self, bucket_id: &str) -> Option<String> {
        self.buckets.iter().find(|(id, _)| id == bucket_id).map(|(_, n)| n.clone())
    }

    fn store(&mut self, mut file: StoredFile) -> Value {
        let id = self.next_id();
        file.file_id = format!("file-{id}");
        file.upload_timestamp = 1_700_000_000_000 + id;
        let v = file_json(&file, "upload");
        self.files.push(file);
        v
    }

    /// Newest version of every name in the bucket, sorted by name.
    fn latest_files(&self, bucket_id: &str, prefix: &str) -> Vec<&StoredFile> {
        let mut latest: BTreeMap<&str, &StoredFile> = BTreeMap::new();
        for f in self.files.iter().filter(|f| f.bucket_id == bucket_id && f.file_name.starts_with(prefix)) {
            latest.insert(&f.file_name, f);
        }
        latest.into_values().collect()
    }

    /// Every version, by name and newest first.
    fn all_versions(&self, bucket_id: &str, prefix: &str) -> Vec<&StoredFile> {
        let mut versions: Vec<&StoredFile> = self
            .files
            .iter()
            .filter(|f| f.bucket_id == bucket_id && f.file_name.starts_with(prefix))
            .collect();
        versions.sort_by(|a, b| a.file_name.cmp(&b.file_name).then(b.upload_timestamp.cmp(&a.upload_timestamp)));
        versions
    }
}

fn header(request: &Request, name: &str) -> Option<String> {
    request.headers.get(name).and_then(|v| v.to_str().ok()).map(String::from)
}

pub fn api_error(status: u16, code: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({"status": status, "code": code, "message": code}))
}

fn file_json(f: &StoredFile, action: &str) -> Value {
    json!({
        "accountId": ACCOUNT_ID,
        "action": action,
        "bucketId": f.bucket_id,
        "contentLength": f.data.len(),
        "contentSha1": f.sha1.clone().unwrap_or_else(|| "none".to_string()),
        "contentType": f.content_type,
        "fileId": f.file_id,
        "fileInfo": f.file_info,
        "fileName": f.file_name,
        "uploadTimestamp": f.upload_timestamp,
    })
}

fn body_json(request: &Request) -> Value {
    serde_json::from_slice(&request.body).unwrap_or(Value::Null)
}

fn str_field<'a>(body: &'a Value, name: &str) -> &'a str {
    body.get(name).and_then(Value::as_str).unwrap_or_default()
}

type Shared = Arc<Mutex<State>>;

pub struct FakeB2 {
    pub server: MockServer,
    state: Shared,
}

impl FakeB2 {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state: Shared = Arc::new(Mutex::new(State::default()));
        let fake = Self { server, state };
        fake.mount_routes().await;
        fake
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_bucket(&self, bucket_id: &str, bucket_name: &str) {
        self.state().buckets.push((bucket_id.to_string(), bucket_name.to_string()));
    }

    pub fn files_named(&self, file_name: &str) -> Vec<StoredFile> {
        self.state().files.iter().filter(|f| f.file_name == file_name).cloned().collect()
    }

    /// Client configuration pointing at this server, with millisecond backoff.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.auth_endpoint = self.server.uri();
        config.retry_base_delay = Duration::from_millis(1);
        config.retry_max_delay = Duration::from_millis(5);
        config.read_buffer_size = 64;
        config
    }

    pub fn client(&self) -> B2Client {
        self.client_with(self.config())
    }

    pub fn client_with(&self, config: ClientConfig) -> B2Client {
        B2Client::new(&config, Some(Credentials::new(KEY_ID, KEY)), None).unwrap()
    }

    async fn mount_routes(&self) {
        let uri = self.server.uri();

        let state = self.state.clone();
        let api_uri = uri.clone();
        Mock::given(method("GET"))
            .and(path("/b2api/v3/b2_authorize_account"))
            .respond_with(move |request: &Request| {
                let mut s = state.lock().unwrap();
                s.authorize_calls += 1;
                let expected = format!("Basic {}", STANDARD.encode(format!("{KEY_ID}:{KEY}")));
                if header(request, "authorization").as_deref() != Some(expected.as_str()) {
                    return api_error(401, "unauthorized");
                }
                ResponseTemplate::new(200).set_body_json(json!({
                    "accountId": ACCOUNT_ID,
                    "authorizationToken": s.account_token(),
                    "apiInfo": {"storageApi": {
                        "absoluteMinimumPartSize": ABSOLUTE_MINIMUM_PART_SIZE,
                        "apiUrl": api_uri,
                        "downloadUrl": api_uri,
                        "recommendedPartSize": RECOMMENDED_PART_SIZE,
                        "capabilities": ["listBuckets", "listFiles", "readFiles", "writeFiles", "deleteFiles"],
                    }},
                }))
            })
            .mount(&self.server)
            .await;

        self.api_route("b2_list_buckets", |s, body, _| {
            let filter = body.get("bucketName").and_then(Value::as_str);
            let buckets: Vec<Value> = s
                .buckets
                .iter()
                .filter(|(_, name)| filter.map_or(true, |f| f == name))
                .map(|(id, name)| {
                    json!({"accountId": ACCOUNT_ID, "bucketId": id, "bucketName": name, "bucketType": "allPrivate"})
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "buckets": buckets }))
        })
        .await;

        self.api_route("b2_list_file_names", |s, body, _| {
            let max = body.get("maxFileCount").and_then(Value::as_u64).unwrap_or(100) as usize;
            let start = body.get("startFileName").and_then(Value::as_str).unwrap_or_default();
            let files = s.latest_files(str_field(body, "bucketId"), str_field(body, "prefix"));
            let rest: Vec<&StoredFile> = files.into_iter().filter(|f| f.file_name.as_str() >= start).collect();
            let page: Vec<Value> = rest.iter().take(max).map(|f| file_json(f, "upload")).collect();
            let next = rest.get(max).map(|f| f.file_name.clone());
            ResponseTemplate::new(200).set_body_json(json!({"files": page, "nextFileName": next}))
        })
        .await;

        self.api_route("b2_list_file_versions", |s, body, _| {
            let max = body.get("maxFileCount").and_then(Value::as_u64).unwrap_or(100) as usize;
            let start_name = body.get("startFileName").and_then(Value::as_str);
            let start_id = body.get("startFileId").and_then(Value::as_str);
            let versions = s.all_versions(str_field(body, "bucketId"), str_field(body, "prefix"));
            let skip = match start_name {
                None => 0,
                Some(name) => versions
                    .iter()
                    .position(|f| f.file_name == name && start_id.map_or(true, |id| f.file_id == id))
                    .unwrap_or(versions.len()),
            };
            let rest = &versions[skip..];
            let page: Vec<Value> = rest.iter().take(max).map(|f| file_json(f, "upload")).collect();
            let (next_name, next_id) = match rest.get(max) {
                Some(f) => (Some(f.file_name.clone()), Some(f.file_id.clone())),
                None => (None, None),
            };
            ResponseTemplate::new(200)
                .set_body_json(json!({"files": page, "nextFileName": next_name, "nextFileId": next_id}))
        })
        .await;

        self.api_route("b2_get_upload_url", |s, body, uri| {
            let bucket_id = str_field(body, "bucketId").to_string();
            if s.bucket_name(&bucket_id).is_none() {
                return api_error(400, "bad_bucket_id");
            }
            let id = s.next_id();
            ResponseTemplate::new(200).set_body_json(json!({
                "bucketId": bucket_id,
                "uploadUrl": format!("{uri}/upload/{bucket_id}"),
                "authorizationToken": format!("upl-tok-{id}"),
            }))
        })
        .await;

        self.api_route("b2_start_large_file", |s, body, _| {
            let bucket_id = str_field(body, "bucketId").to_string();
            if s.bucket_name(&bucket_id).is_none() {
                return api_error(400, "bad_bucket_id");
            }
            let id = s.next_id();
            let file_id = format!("large-{id}");
            let file_info: HashMap<String, String> =
                serde_json::from_value(body.get("fileInfo").cloned().unwrap_or(json!({}))).unwrap_or_default();
            let large = LargeFile {
                bucket_id: bucket_id.clone(),
                file_name: str_field(body, "fileName").to_string(),
                content_type: str_field(body, "contentType").to_string(),
                file_info: file_info.clone(),
                parts: BTreeMap::new(),
            };
            let response = json!({
                "accountId": ACCOUNT_ID,
                "action": "start",
                "bucketId": bucket_id,
                "contentLength": 0,
                "contentSha1": "none",
                "contentType": large.content_type,
                "fileId": file_id,
                "fileInfo": file_info,
                "fileName": large.file_name,
                "uploadTimestamp": 1_700_000_000_000u64 + id,
            });
            s.large_files.insert(file_id, large);
            ResponseTemplate::new(200).set_body_json(response)
        })
        .await;

        self.api_route("b2_get_upload_part_url", |s, body, uri| {
            let file_id = str_field(body, "fileId").to_string();
            if !s.large_files.contains_key(&file_id) {
                return api_error(400, "bad_request");
            }
            s.part_urls_issued += 1;
            let id = s.next_id();
            ResponseTemplate::new(200).set_body_json(json!({
                "fileId": file_id,
                "uploadUrl": format!("{uri}/upload_part/{file_id}"),
                "authorizationToken": format!("upl-tok-{id}"),
            }))
        })
        .await;

        self.api_route("b2_finish_large_file", |s, body, _| {
            let file_id = str_field(body, "fileId").to_string();
            let sha1s: Vec<String> = body
                .get("partSha1Array")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            s.finished_part_sha1s.push(sha1s.clone());

            let Some(large) = s.large_files.remove(&file_id) else {
                return api_error(400, "bad_request");
            };
            let numbers: Vec<u32> = large.parts.keys().copied().collect();
            let expected_numbers: Vec<u32> = (1..=sha1s.len() as u32).collect();
            let stored_sha1s: Vec<String> = large.parts.values().map(|p| sha1_hex(p)).collect();
            if numbers != expected_numbers || stored_sha1s != sha1s {
                s.large_files.insert(file_id, large);
                return api_error(400, "bad_request");
            }

            let data: Vec<u8> = large.parts.into_values().flatten().collect();
            let file = StoredFile {
                file_id: String::new(),
                bucket_id: large.bucket_id,
                file_name: large.file_name,
                content_type: large.content_type,
                data,
                sha1: None,
                file_info: large.file_info,
                upload_timestamp: 0,
            };
            let mut v = s.store(file);
            // Large files keep the id they were started with.
            if let Some(stored) = s.files.last_mut() {
                stored.file_id = file_id.clone();
            }
            v["fileId"] = json!(file_id);
            ResponseTemplate::new(200).set_body_json(v)
        })
        .await;

        self.api_route("b2_cancel_large_file", |s, body, _| {
            let file_id = str_field(body, "fileId").to_string();
            s.cancelled_file_ids.push(file_id.clone());
            match s.large_files.remove(&file_id) {
                Some(large) => ResponseTemplate::new(200).set_body_json(json!({
                    "fileId": file_id,
                    "accountId": ACCOUNT_ID,
                    "bucketId": large.bucket_id,
                    "fileName": large.file_name,
                })),
                None => api_error(400, "bad_request"),
            }
        })
        .await;

        let state = self.state.clone();
        Mock::given(method("POST"))
            .and(path_regex(r"^/upload/[^/]+$"))
            .respond_with(move |request: &Request| {
                let mut s = state.lock().unwrap();
                s.single_uploads += 1;
                if !header(request, "authorization").unwrap_or_default().starts_with("upl-tok-") {
                    return api_error(401, "bad_auth_token");
                }
                if s.fail_single_uploads > 0 {
                    s.fail_single_uploads -= 1;
                    return api_error(503, "service_unavailable");
                }

                let bucket_id = request.url.path().trim_start_matches("/upload/").to_string();
                let Some(name) = header(request, "x-bz-file-name") else {
                    return api_error(400, "bad_request");
                };
                let file_name = urlencoding::decode(&name).map(|n| n.into_owned()).unwrap_or(name);
                let sha1 = sha1_hex(&request.body);
                if header(request, "x-bz-content-sha1").as_deref() != Some(sha1.as_str()) {
                    return api_error(400, "bad_request");
                }

                let mut file_info = HashMap::new();
                if let Some(millis) = header(request, "x-bz-info-src_last_modified_millis") {
                    file_info.insert("src_last_modified_millis".to_string(), millis);
                }
                let file = StoredFile {
                    file_id: String::new(),
                    bucket_id,
                    file_name,
                    content_type: header(request, "content-type").unwrap_or_default(),
                    data: request.body.clone(),
                    sha1: Some(sha1),
                    file_info,
                    upload_timestamp: 0,
                };
                ResponseTemplate::new(200).set_body_json(s.store(file))
            })
            .mount(&self.server)
            .await;

        let state = self.state.clone();
        Mock::given(method("POST"))
            .and(path_regex(r"^/upload_part/[^/]+$"))
            .respond_with(move |request: &Request| {
                let mut s = state.lock().unwrap();
                if !header(request, "authorization").unwrap_or_default().starts_with("upl-tok-") {
                    return api_error(401, "bad_auth_token");
                }
                let file_id = request.url.path().trim_start_matches("/upload_part/").to_string();
                let Some(part_number) = header(request, "x-bz-part-number").and_then(|n| n.parse::<u32>().ok()) else {
                    return api_error(400, "bad_request");
                };
                *s.part_attempts.entry(part_number).or_default() += 1;

                if s.reject_part == Some(part_number) {
                    return api_error(400, "bad_request");
                }
                if let Some(remaining) = s.fail_part.get_mut(&part_number) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return api_error(503, "service_unavailable");
                    }
                }

                let sha1 = sha1_hex(&request.body);
                if header(request, "x-bz-content-sha1").as_deref() != Some(sha1.as_str()) {
                    return api_error(400, "bad_request");
                }
                let len = request.body.len();
                let Some(large) = s.large_files.get_mut(&file_id) else {
                    return api_error(400, "bad_request");
                };
                large.parts.insert(part_number, request.body.clone());
                let reported = if s.misreport_part_sha1 == Some(part_number) {
                    sha1_hex(b"something else")
                } else {
                    sha1
                };
                ResponseTemplate::new(200).set_body_json(json!({
                    "fileId": file_id,
                    "partNumber": part_number,
                    "contentLength": len,
                    "contentSha1": reported,
                }))
            })
            .mount(&self.server)
            .await;

        let state = self.state.clone();
        Mock::given(method("GET"))
            .and(path_regex(r"^/file/.+"))
            .respond_with(move |request: &Request| {
                let mut s = state.lock().unwrap();
                if let Err(rejection) = s.check_account_token(request) {
                    return rejection;
                }
                let rest = request.url.path().trim_start_matches("/file/");
                let Some((bucket, name)) = rest.split_once('/') else {
                    return api_error(404, "not_found");
                };
                let bucket = urlencoding::decode(bucket).map(|b| b.into_owned()).unwrap_or_default();
                let name = urlencoding::decode(name).map(|n| n.into_owned()).unwrap_or_default();
                let Some(bucket_id) = s.buckets.iter().find(|(_, n)| *n == bucket).map(|(id, _)| id.clone()) else {
                    return api_error(404, "not_found");
                };
                let file = s.files.iter().rev().find(|f| f.bucket_id == bucket_id && f.file_name == name).cloned();
                serve_download(&mut s, request, file)
            })
            .mount(&self.server)
            .await;

        let state = self.state.clone();
        Mock::given(method("GET"))
            .and(path("/b2api/v3/b2_download_file_by_id"))
            .respond_with(move |request: &Request| {
                let mut s = state.lock().unwrap();
                if let Err(rejection) = s.check_account_token(request) {
                    return rejection;
                }
                let file_id = request
                    .url
                    .query_pairs()
                    .find(|(k, _)| k == "fileId")
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default();
                let file = s.files.iter().find(|f| f.file_id == file_id).cloned();
                serve_download(&mut s, request, file)
            })
            .mount(&self.server)
            .await;
    }

    /// Mounts `POST /b2api/v3/<name>` behind the account token check.
    async fn api_route<F>(&self, name: &'static str, handler: F)
    where
        F: Fn(&mut State, &Value, &str) -> ResponseTemplate + Send + Sync + 'static,
    {
        let state = self.state.clone();
        let uri = self.server.uri();
        Mock::given(method("POST"))
            .and(path(format!("/b2api/v3/{name}")))
            .respond_with(move |request: &Request| {
                let mut s = state.lock().unwrap();
                *s.api_calls.entry(name.to_string()).or_default() += 1;
                if let Err(rejection) = s.check_account_token(request) {
                    return rejection;
                }
                handler(&mut s, &body_json(request), &uri)
            })
            .mount(&self.server)
            .await;
    }
}

fn serve_download(s: &mut State, request: &Request, file: Option<StoredFile>) -> ResponseTemplate {
    s.download_requests += 1;
    if s.fail_downloads > 0 {
        s.fail_downloads -= 1;
        return api_error(503, "service_unavailable");
    }
    let Some(file) = file else {
        return api_error(404, "not_found");
    };

    let sha1 = if s.corrupt_download_sha1 {
        sha1_hex(b"something else")
    } else {
        file.sha1.clone().unwrap_or_else(|| "none".to_string())
    };

    let total = file.data.len();
    let range_start = header(request, "range")
        .inspect(|r| s.range_requests.push(r.clone()))
        .and_then(|r| r.strip_prefix("bytes=").and_then(|r| r.strip_suffix('-')).map(String::from))
        .and_then(|start| start.parse::<usize>().ok());

    let template = match range_start {
        Some(start) if start < total => ResponseTemplate::new(206)
            .insert_header("content-range", format!("bytes {start}-{}/{total}", total - 1))
            .set_body_raw(file.data[start..].to_vec(), &file.content_type),
        _ => ResponseTemplate::new(200).set_body_raw(file.data.clone(), &file.content_type),
    };
    template
        .insert_header("x-bz-file-id", file.file_id.as_str())
        .insert_header("x-bz-file-name", urlencoding::encode(&file.file_name).into_owned())
        .insert_header("x-bz-content-sha1", sha1)
}
