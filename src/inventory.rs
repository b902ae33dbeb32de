//! Instance inventory: the data model and the sources that list it.
//!
//! [`InventorySource`] is the seam the refresh loop polls. [`GceInventory`]
//! implements it against the Compute Engine REST API's aggregated instance
//! list; tests substitute an in-memory source.

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace};

/// Default Compute Engine API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://compute.googleapis.com";

/// OAuth scope for read access to Compute Engine.
const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

/// One virtual machine as seen by the naming template.
///
/// Field names are the template context: `{{ name }}`, `{{ labels.env }}`, ...
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance name.
    pub name: String,
    /// Primary private address (first network interface).
    pub ip: String,
    /// Zone short name, e.g. `us-central1-a`.
    pub zone: String,
    /// Owning project.
    pub project: String,
    /// Network URL of the first interface.
    pub network: String,
    /// Subnetwork URL of the first interface.
    pub subnetwork: String,
    /// User labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Errors raised by an inventory source.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The credentials file is missing or is not a service account key.
    #[error("Failed to load credentials {path}: {source}")]
    Credentials {
        /// Configured credentials path.
        path: PathBuf,
        /// Underlying auth error.
        #[source]
        source: gcp_auth::Error,
    },

    /// Obtaining an access token failed.
    #[error("Authentication error: {0}")]
    Auth(#[from] gcp_auth::Error),

    /// Any other source-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Lists every instance in a project.
///
/// Called repeatedly from a single background task. Any error aborts only
/// the refresh cycle that made the call.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// List all instances of `project`, in a stable order.
    async fn list_all_instances(&self, project: &str) -> Result<Vec<Instance>, InventoryError>;
}

/// Aggregated list page as returned by `instances.aggregatedList`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedListPage {
    #[serde(default)]
    items: BTreeMap<String, ScopedList>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScopedList {
    #[serde(default)]
    instances: Vec<ApiInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInstance {
    name: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    network_interfaces: Vec<ApiNetworkInterface>,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiNetworkInterface {
    #[serde(rename = "networkIP", default)]
    network_ip: String,
    #[serde(default)]
    network: String,
    #[serde(default)]
    subnetwork: String,
}

/// Convert an API instance into the template-facing model.
///
/// Returns `None` for instances without a network interface (nothing to
/// point a record at).
fn format_instance(instance: ApiInstance, project: &str) -> Option<Instance> {
    let nic = instance.network_interfaces.into_iter().next()?;
    let zone = instance
        .zone
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    Some(Instance {
        name: instance.name,
        ip: nic.network_ip,
        zone,
        project: project.to_string(),
        network: nic.network,
        subnetwork: nic.subnetwork,
        labels: instance.labels.into_iter().collect(),
    })
}

/// Source of OAuth access tokens for the Compute API.
#[async_trait]
pub trait AccessTokens: Send + Sync {
    /// A currently valid bearer token.
    async fn access_token(&self) -> Result<String, InventoryError>;
}

/// Tokens from `gcp_auth`, which caches and refreshes them.
pub struct GcpTokens {
    provider: OnceCell<Arc<dyn TokenProvider>>,
}

impl GcpTokens {
    /// Sign tokens with the service account key at `path`.
    ///
    /// The key is parsed here, so a bad file fails at startup.
    pub fn from_service_account(path: &Path) -> Result<Self, InventoryError> {
        let account =
            CustomServiceAccount::from_file(path).map_err(|source| InventoryError::Credentials {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "using service account credentials");

        let provider: Arc<dyn TokenProvider> = Arc::new(account);
        Ok(Self {
            provider: OnceCell::new_with(Some(provider)),
        })
    }

    /// Application Default Credentials, discovered on first use.
    pub fn application_default() -> Self {
        Self {
            provider: OnceCell::new(),
        }
    }
}

#[async_trait]
impl AccessTokens for GcpTokens {
    async fn access_token(&self) -> Result<String, InventoryError> {
        let provider = self
            .provider
            .get_or_try_init(|| async {
                debug!("discovering application default credentials");
                gcp_auth::provider().await
            })
            .await?;
        let token = provider.token(&[COMPUTE_SCOPE]).await?;
        Ok(token.as_str().to_string())
    }
}

/// Compute Engine inventory over the REST API.
#[derive(Clone)]
pub struct GceInventory {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn AccessTokens>,
}

impl GceInventory {
    /// Create a client against `endpoint`.
    ///
    /// `credentials` names a service account key file. When unset,
    /// Application Default Credentials are used.
    pub fn new(endpoint: &str, credentials: Option<&Path>) -> Result<Self, InventoryError> {
        let tokens = match credentials {
            Some(path) => GcpTokens::from_service_account(path)?,
            None => GcpTokens::application_default(),
        };
        Self::with_tokens(endpoint, Arc::new(tokens))
    }

    /// Create a client authenticating with `tokens`.
    pub fn with_tokens(endpoint: &str, tokens: Arc<dyn AccessTokens>) -> Result<Self, InventoryError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("gce-dns/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(endpoint, http, tokens))
    }

    /// Create a client over a preconfigured HTTP client.
    pub fn with_client(endpoint: &str, http: reqwest::Client, tokens: Arc<dyn AccessTokens>) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn fetch_page(
        &self,
        project: &str,
        token: &str,
        page_token: Option<&str>,
    ) -> Result<AggregatedListPage, InventoryError> {
        let url = format!(
            "{}/compute/v1/projects/{}/aggregated/instances",
            self.endpoint, project
        );
        let mut request = self.http.get(&url).bearer_auth(token);
        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        let response = check_status(request.send().await?).await?;
        Ok(response.json().await?)
    }
}

impl fmt::Debug for GceInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GceInventory")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InventoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InventoryError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl InventorySource for GceInventory {
    async fn list_all_instances(&self, project: &str) -> Result<Vec<Instance>, InventoryError> {
        let token = self.tokens.access_token().await?;
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .fetch_page(project, &token, page_token.as_deref())
                .await?;
            trace!(scopes = page.items.len(), "fetched aggregated instance page");

            for (scope, list) in page.items {
                for instance in list.instances {
                    let name = instance.name.clone();
                    match format_instance(instance, project) {
                        Some(instance) => instances.push(instance),
                        None => debug!(instance = %name, %scope, "skipping instance without network interface"),
                    }
                }
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!(project, count = instances.len(), "listed instances");
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "items": {
            "zones/us-central1-a": {
                "instances": [
                    {
                        "name": "web-1",
                        "zone": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a",
                        "networkInterfaces": [
                            {
                                "networkIP": "10.128.0.2",
                                "network": "https://www.googleapis.com/compute/v1/projects/p/global/networks/default",
                                "subnetwork": "https://www.googleapis.com/compute/v1/projects/p/regions/us-central1/subnetworks/default"
                            }
                        ],
                        "labels": { "dns": "web" }
                    },
                    { "name": "detached", "zone": "zones/us-central1-a" }
                ]
            },
            "zones/europe-west1-b": {
                "warning": { "code": "NO_RESULTS_ON_PAGE" }
            }
        },
        "nextPageToken": "abc"
    }"#;

    #[test]
    fn test_parse_aggregated_page() {
        let page: AggregatedListPage = serde_json::from_str(PAGE).unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
        assert_eq!(page.items.len(), 2);
        assert!(page.items["zones/europe-west1-b"].instances.is_empty());
    }

    #[test]
    fn test_format_instance_uses_first_interface_and_zone_suffix() {
        let mut page: AggregatedListPage = serde_json::from_str(PAGE).unwrap();
        let list = page.items.remove("zones/us-central1-a").unwrap();
        let mut it = list.instances.into_iter();

        let instance = format_instance(it.next().unwrap(), "my-project").unwrap();
        assert_eq!(instance.name, "web-1");
        assert_eq!(instance.ip, "10.128.0.2");
        assert_eq!(instance.zone, "us-central1-a");
        assert_eq!(instance.project, "my-project");
        assert!(instance.network.ends_with("/networks/default"));
        assert!(instance.subnetwork.ends_with("/subnetworks/default"));
        assert_eq!(instance.labels.get("dns").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_format_instance_without_interface_is_skipped() {
        let mut page: AggregatedListPage = serde_json::from_str(PAGE).unwrap();
        let list = page.items.remove("zones/us-central1-a").unwrap();
        let detached = list.instances.into_iter().nth(1).unwrap();
        assert!(format_instance(detached, "p").is_none());
    }

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("gce-dns-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_credentials_file_is_an_error() {
        let err = GceInventory::new(
            DEFAULT_API_ENDPOINT,
            Some(Path::new("/nonexistent/gce-dns/key.json")),
        )
        .unwrap_err();
        assert!(matches!(err, InventoryError::Credentials { .. }));
    }

    #[test]
    fn test_credentials_file_must_be_a_service_account_key() {
        let raw_token = write_temp("raw-token", "ya29.not-a-key-file\n");
        let err = GcpTokens::from_service_account(&raw_token).err().unwrap();
        assert!(matches!(err, InventoryError::Credentials { .. }));

        let bad_key = write_temp(
            "bad-key.json",
            r#"{
                "type": "service_account",
                "project_id": "p",
                "private_key_id": "k",
                "private_key": "not a pem key",
                "client_email": "dns@p.iam.gserviceaccount.com",
                "token_uri": "https://oauth2.googleapis.com/token"
            }"#,
        );
        let err = GcpTokens::from_service_account(&bad_key).err().unwrap();
        assert!(matches!(err, InventoryError::Credentials { .. }));

        let _ = std::fs::remove_file(raw_token);
        let _ = std::fs::remove_file(bad_key);
    }

    struct StaticToken(&'static str);

    #[async_trait]
    impl AccessTokens for StaticToken {
        async fn access_token(&self) -> Result<String, InventoryError> {
            Ok(self.0.to_string())
        }
    }

    /// Answer one request per body, in order, recording each request head.
    async fn serve_pages(bodies: Vec<String>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for body in bodies {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&chunk[..n]);
                }
                requests.push(String::from_utf8_lossy(&head).into_owned());

                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                stream.shutdown().await.unwrap();
            }
            requests
        });

        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn test_list_follows_pages_with_bearer_token() {
        let last_page = r#"{
            "items": {
                "zones/europe-west1-b": {
                    "instances": [
                        {
                            "name": "web-2",
                            "zone": "zones/europe-west1-b",
                            "networkInterfaces": [{ "networkIP": "10.132.0.9" }]
                        }
                    ]
                }
            }
        }"#;
        let (endpoint, server) = serve_pages(vec![PAGE.to_string(), last_page.to_string()]).await;

        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let inventory = GceInventory::with_client(&endpoint, http, Arc::new(StaticToken("test-token")));
        let instances = inventory.list_all_instances("my-project").await.unwrap();

        let names: Vec<_> = instances.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["web-1", "web-2"]);
        assert_eq!(instances[1].zone, "europe-west1-b");

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            let request = request.to_ascii_lowercase();
            assert!(request.starts_with("get /compute/v1/projects/my-project/aggregated/instances"));
            assert!(request.contains("authorization: bearer test-token\r\n"), "{request}");
        }
        assert!(requests[1].contains("pageToken=abc"));
    }
}
