//! Remote page fetcher for the repository listing.
//!
//! A fetch never returns an error: transport faults, non-success statuses
//! and undecodable bodies all come back as `FetchOutcome::Failure`.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;

use crate::domain::{
    AppError, ErrorKind, FetchFailure, FetchOutcome, PageRequest, RemoteConfig, RepoRecord, Result,
};

/// Performs one page request against the remote source.
pub trait RemoteFetcher: Send + Sync + 'static {
    /// Fetch one page. Items keep the order the server returned them in.
    fn fetch_page(&self, request: PageRequest) -> impl Future<Output = FetchOutcome> + Send;
}

/// Repository object as returned by the GitHub REST API.
#[derive(Debug, Deserialize)]
struct RemoteRepo {
    id: i64,
    name: String,
    #[serde(default)]
    full_name: String,
    fork: bool,
    description: Option<String>,
    html_url: String,
    language: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    owner: Option<RemoteOwner>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RemoteOwner {
    login: String,
    avatar_url: Option<String>,
    html_url: Option<String>,
}

impl From<RemoteRepo> for RepoRecord {
    fn from(raw: RemoteRepo) -> Self {
        let (owner_login, owner_avatar_url, owner_html_url) = raw
            .owner
            .map(|o| (o.login, o.avatar_url, o.html_url))
            .unwrap_or_default();

        Self {
            id: raw.id,
            name: raw.name,
            full_name: raw.full_name,
            fork: raw.fork,
            description: raw.description,
            html_url: raw.html_url,
            language: raw.language,
            stargazers_count: raw.stargazers_count,
            forks_count: raw.forks_count,
            owner_login,
            owner_avatar_url,
            owner_html_url,
            updated_at: raw.updated_at,
        }
    }
}

/// Fetcher backed by `reqwest`, speaking the GitHub listing protocol.
#[derive(Debug, Clone)]
pub struct HttpRepoFetcher {
    client: reqwest::Client,
    repos_url: String,
    token: Option<String>,
}

impl HttpRepoFetcher {
    /// Build a fetcher from configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::Config {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            repos_url: config.repos_url.clone(),
            token: config.token.clone(),
        })
    }

    async fn request(&self, request: PageRequest) -> std::result::Result<Vec<RepoRecord>, FetchFailure> {
        let mut builder = self
            .client
            .get(&self.repos_url)
            .query(&[("page", request.page), ("per_page", request.per_page)]);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchFailure::new(ErrorKind::Unreachable, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::new(ErrorKind::RemoteRejected, status.to_string()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::new(ErrorKind::Unreachable, e.to_string()))?;

        let repos: Vec<RemoteRepo> = serde_json::from_slice(&body)
            .map_err(|e| FetchFailure::new(ErrorKind::Decode, e.to_string()))?;

        Ok(repos.into_iter().map(RepoRecord::from).collect())
    }
}

impl RemoteFetcher for HttpRepoFetcher {
    async fn fetch_page(&self, request: PageRequest) -> FetchOutcome {
        tracing::debug!(page = request.page, per_page = request.per_page, url = %self.repos_url, "Fetching page");
        let start = Instant::now();

        match self.request(request).await {
            Ok(items) => {
                tracing::debug!(
                    items = items.len(),
                    duration_ms = start.elapsed().as_millis(),
                    "Fetched page"
                );
                FetchOutcome::Success(items)
            }
            Err(failure) => {
                tracing::warn!(kind = %failure.kind, error = %failure.message, "Page fetch failed");
                FetchOutcome::Failure(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher_for(url: String) -> HttpRepoFetcher {
        let config = RemoteConfig {
            repos_url: url,
            timeout_secs: 5,
            ..RemoteConfig::default()
        };
        HttpRepoFetcher::new(&config).unwrap()
    }

    fn repo_json(id: i64, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "full_name": format!("acme/{name}"),
            "fork": false,
            "description": null,
            "html_url": format!("https://github.com/acme/{name}"),
            "language": "Rust",
            "stargazers_count": 10,
            "forks_count": 1,
            "updated_at": "2024-05-01T12:00:00Z",
            "owner": {
                "login": "acme",
                "avatar_url": "https://avatars.example/acme",
                "html_url": "https://github.com/acme"
            }
        })
    }

    #[tokio::test]
    async fn test_success_preserves_server_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .and(query_param("page", "2"))
            .and(query_param("per_page", "5"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([repo_json(9, "zeta"), repo_json(3, "alpha")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher_for(format!("{}/orgs/acme/repos", server.uri()));
        let outcome = fetcher.fetch_page(PageRequest::new(2, 5)).await;

        let FetchOutcome::Success(items) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(items.iter().map(|r| r.id).collect::<Vec<_>>(), vec![9, 3]);
        assert_eq!(items[0].owner_login, "acme");
        assert_eq!(items[0].language.as_deref(), Some("Rust"));
        assert!(items[0].updated_at.is_some());
    }

    #[tokio::test]
    async fn test_minimal_objects_decode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": 1,
                "name": "bare",
                "fork": true,
                "description": "only required fields",
                "html_url": "https://github.com/acme/bare"
            }])))
            .mount(&server)
            .await;

        let fetcher = fetcher_for(server.uri());
        let outcome = fetcher.fetch_page(PageRequest::first(30)).await;

        let FetchOutcome::Success(items) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert!(items[0].fork);
        assert_eq!(items[0].owner_login, "");
        assert_eq!(items[0].description_or_default(), "only required fields");
    }

    #[tokio::test]
    async fn test_server_error_is_remote_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = fetcher_for(server.uri());
        let outcome = fetcher.fetch_page(PageRequest::first(30)).await;

        let failure = outcome.failure().cloned().unwrap();
        assert_eq!(failure.kind, ErrorKind::RemoteRejected);
        assert!(failure.message.contains("500"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"message\": \"not a list\"}"))
            .mount(&server)
            .await;

        let fetcher = fetcher_for(server.uri());
        let outcome = fetcher.fetch_page(PageRequest::first(30)).await;

        assert_eq!(outcome.failure().map(|f| f.kind), Some(ErrorKind::Decode));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = fetcher_for(format!("http://{addr}/repos"));
        let outcome = fetcher.fetch_page(PageRequest::first(30)).await;

        assert_eq!(outcome.failure().map(|f| f.kind), Some(ErrorKind::Unreachable));
    }

    #[tokio::test]
    async fn test_token_is_sent_as_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let config = RemoteConfig {
            repos_url: server.uri(),
            token: Some("secret".into()),
            ..RemoteConfig::default()
        };
        let fetcher = HttpRepoFetcher::new(&config).unwrap();

        assert_eq!(
            fetcher.fetch_page(PageRequest::first(30)).await,
            FetchOutcome::Success(Vec::new())
        );
    }
}
