//! In-process stand-in for an HFS server, mounted on a wiremock `MockServer`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub path: String,
    pub existing: String,
    pub multipart: bool,
    pub body_len: usize,
}

struct FakeState {
    folders: BTreeSet<String>,
    files: BTreeMap<String, u64>,
    folder_creations: Vec<String>,
    uploads: Vec<RecordedUpload>,
    upload_attempts: usize,
    deny_upload_at: Option<usize>,
    fail_uploads: HashMap<String, u16>,
}

#[derive(Clone)]
pub struct FakeHfs {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHfs {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                folders: BTreeSet::from(["/".to_string()]),
                files: BTreeMap::new(),
                folder_creations: Vec::new(),
                uploads: Vec::new(),
                upload_attempts: 0,
                deny_upload_at: None,
                fail_uploads: HashMap::new(),
            })),
        }
    }

    /// Adds `path` and all of its ancestors.
    pub fn with_folder(self, path: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current = format!("{current}/{segment}");
                state.folders.insert(current.clone());
            }
        }
        self
    }

    pub fn with_file(self, path: &str, size: u64) -> Self {
        self.state.lock().unwrap().files.insert(path.to_string(), size);
        self
    }

    /// The `nth` upload attempt (1-based) answers 401.
    pub fn deny_upload(self, nth: usize) -> Self {
        self.state.lock().unwrap().deny_upload_at = Some(nth);
        self
    }

    pub fn fail_upload(self, path: &str, status: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_uploads
            .insert(path.to_string(), status);
        self
    }

    pub async fn mount(&self, server: &MockServer) {
        Mock::given(any())
            .respond_with(self.clone())
            .mount(server)
            .await;
    }

    pub fn folder_creations(&self) -> Vec<String> {
        self.state.lock().unwrap().folder_creations.clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.state.lock().unwrap().files.contains_key(path)
    }
}

impl Respond for FakeHfs {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();
        let path = request.url.path().to_string();
        match (request.method.as_str(), path.as_str()) {
            ("POST", "/~/api/get_file_details") => state.details(request),
            ("POST", "/~/api/create_folder") => state.create_folder(request),
            ("GET", "/~/api/get_file_list") => state.list(request),
            ("PUT", _) => state.upload(request, path),
            _ => ResponseTemplate::new(404),
        }
    }
}

impl FakeState {
    fn details(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let uri = trimmed(body["uris"][0].as_str().unwrap_or_default());
        let detail = if self.folders.contains(&uri) {
            json!({})
        } else if let Some(size) = self.files.get(&uri) {
            json!({ "s": size })
        } else {
            json!(false)
        };
        ResponseTemplate::new(200).set_body_json(json!({ "details": [detail] }))
    }

    fn create_folder(&mut self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let parent = trimmed(body["uri"].as_str().unwrap_or_default());
        let name = body["name"].as_str().unwrap_or_default();
        if !self.folders.contains(&parent) {
            return ResponseTemplate::new(404);
        }
        let path = child(&parent, name);
        if self.folders.contains(&path) {
            return ResponseTemplate::new(409);
        }
        self.folders.insert(path.clone());
        self.folder_creations.push(path);
        ResponseTemplate::new(200).set_body_json(json!({}))
    }

    fn list(&self, request: &Request) -> ResponseTemplate {
        let dir = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "uri")
            .map(|(_, value)| trimmed(&value))
            .unwrap_or_else(|| "/".to_string());
        if !self.folders.contains(&dir) {
            return ResponseTemplate::new(404);
        }
        let mut rows = Vec::new();
        for folder in &self.folders {
            if parent_of(folder).as_deref() == Some(dir.as_str()) {
                rows.push(json!({ "n": format!("{}/", name_of(folder)) }));
            }
        }
        for (file, size) in &self.files {
            if parent_of(file).as_deref() == Some(dir.as_str()) {
                rows.push(json!({ "n": name_of(file), "s": size }));
            }
        }
        let payload = json!({ "can_upload": true, "list": rows });
        ResponseTemplate::new(200).set_body_string(format!("data: {payload}\n\n"))
    }

    fn upload(&mut self, request: &Request, path: String) -> ResponseTemplate {
        self.upload_attempts += 1;
        if self.deny_upload_at == Some(self.upload_attempts) {
            return ResponseTemplate::new(401);
        }
        let existing = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "existing")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        let multipart = request
            .headers
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));
        self.uploads.push(RecordedUpload {
            path: path.clone(),
            existing: existing.clone(),
            multipart,
            body_len: request.body.len(),
        });

        if let Some(status) = self.fail_uploads.get(&path) {
            return ResponseTemplate::new(*status).set_body_string("rejected");
        }
        let parent_known = parent_of(&path).is_some_and(|parent| self.folders.contains(&parent));
        if !parent_known {
            return ResponseTemplate::new(404);
        }
        if existing == "skip" && self.files.contains_key(&path) {
            return ResponseTemplate::new(409);
        }
        self.files.insert(path, request.body.len() as u64);
        ResponseTemplate::new(200)
    }
}

fn trimmed(path: &str) -> String {
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn child(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    let (parent, _) = path.rsplit_once('/')?;
    Some(trimmed(parent))
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
