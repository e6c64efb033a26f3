use dashmap::DashMap;
use hfs_core::{Existence, HfsClient, HfsError, Session};
use tracing::debug;

use super::paths::join_remote;

/// Answers "does this remote path exist" with a per-run cache.
///
/// One oracle lives for one sync run; a new run builds a new oracle, so cached
/// answers never leak between runs.
pub struct RemoteExistenceOracle {
    client: HfsClient,
    session: Session,
    cache: DashMap<String, bool>,
}

impl RemoteExistenceOracle {
    pub fn new(client: HfsClient, session: Session) -> Self {
        Self {
            client,
            session,
            cache: DashMap::new(),
        }
    }

    /// Cached existence check. `Unknown` answers count as absent.
    pub async fn exists(&self, path: &str) -> Result<bool, HfsError> {
        let key = cache_key(path);
        if let Some(hit) = self.cache.get(&key).map(|entry| *entry) {
            return Ok(hit);
        }
        let found = self.client.exists(&self.session, &key).await?;
        debug!(path = %key, found, "remote existence checked");
        self.cache.insert(key, found);
        Ok(found)
    }

    /// Uncached tri-state lookup.
    pub async fn probe(&self, path: &str) -> Result<Existence, HfsError> {
        self.client.file_details(&self.session, path).await
    }

    pub fn invalidate(&self, path: &str) {
        self.cache.remove(&cache_key(path));
    }

    /// Lists `dir` once and records it and its sub-folders as existing.
    pub async fn prime(&self, dir: &str) -> Result<usize, HfsError> {
        let listing = self.client.list_directory(&self.session, dir).await?;
        let base = cache_key(dir);
        let mut primed = 0;
        for entry in listing.entries.iter().filter(|entry| entry.is_directory) {
            self.cache
                .insert(cache_key(&join_remote(&base, entry.display_name())), true);
            primed += 1;
        }
        self.cache.insert(base, true);
        Ok(primed)
    }

    #[cfg(test)]
    pub(crate) fn cached(&self, path: &str) -> Option<bool> {
        self.cache.get(&cache_key(path)).map(|entry| *entry)
    }
}

fn cache_key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oracle(server: &MockServer) -> RemoteExistenceOracle {
        let client = HfsClient::new(&server.uri()).unwrap();
        RemoteExistenceOracle::new(client, Session::anonymous())
    }

    #[tokio::test]
    async fn caches_first_answer_per_normalized_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/~/api/get_file_details"))
            .and(body_json(json!({ "uris": ["/dst/a"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "details": [false] })))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = oracle(&server);
        assert!(!oracle.exists("/dst/a").await.unwrap());
        assert!(!oracle.exists("/dst/a/").await.unwrap());
        assert_eq!(oracle.cached("/dst/a"), Some(false));
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_read() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/~/api/get_file_details"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "details": [{}] })))
            .expect(2)
            .mount(&server)
            .await;

        let oracle = oracle(&server);
        assert!(oracle.exists("/dst").await.unwrap());
        oracle.invalidate("/dst");
        assert_eq!(oracle.cached("/dst"), None);
        assert!(oracle.exists("/dst").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_answer_counts_as_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/~/api/get_file_details"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "details": [null] })))
            .mount(&server)
            .await;

        let oracle = oracle(&server);
        assert!(!oracle.exists("/maybe").await.unwrap());
        assert_eq!(oracle.probe("/maybe").await.unwrap(), Existence::Unknown);
    }

    #[tokio::test]
    async fn transport_errors_propagate_and_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/~/api/get_file_details"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let oracle = oracle(&server);
        assert!(oracle.exists("/secret").await.unwrap_err().is_unauthorized());
        assert_eq!(oracle.cached("/secret"), None);
    }

    #[tokio::test]
    async fn prime_records_listed_folders() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/~/api/get_file_list"))
            .and(query_param("uri", "/dst"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"data: {"list":[{"n":"a/"},{"n":"b/"},{"n":"file.txt","s":3}]}"#,
            ))
            .mount(&server)
            .await;

        let oracle = oracle(&server);
        assert_eq!(oracle.prime("/dst").await.unwrap(), 2);
        assert_eq!(oracle.cached("/dst"), Some(true));
        assert_eq!(oracle.cached("/dst/a"), Some(true));
        assert_eq!(oracle.cached("/dst/b"), Some(true));
        assert_eq!(oracle.cached("/dst/file.txt"), None);
    }
}
