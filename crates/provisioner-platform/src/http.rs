//! HTTP implementation of the platform collaborators.
//!
//! This module provides [`HttpPlatform`], which talks to the platform's
//! REST API with `reqwest`. Sessions authenticate with a provider login
//! and carry the returned bearer token on every request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::{ApiVersion, EntityTypeId, InterfaceId, Revision, TemplateDefinition};
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::client::{Platform, PlatformSession, PolicyBackend, SchemaService};
use crate::error::{PlatformError, Result};
use crate::types::{CapabilityEntityType, CapabilityInterface, PlatformConfig, Policy};

/// Response header carrying the session token after login.
const ACCESS_TOKEN_HEADER: &str = "x-vmware-vcloud-access-token";

/// Organization system administrators log in to.
const SYSTEM_ORG: &str = "System";

/// First API version exposing compute policies.
const COMPUTE_POLICY_MIN_VERSION: ApiVersion = ApiVersion::new(32, 0);

/// First API version exposing entity interfaces and types.
const SCHEMA_MIN_VERSION: ApiVersion = ApiVersion::new(35, 0);

const QUERY_PAGE_SIZE: usize = 128;

/// Platform client backed by the REST API.
#[derive(Debug, Clone)]
pub struct HttpPlatform {
    client: reqwest::Client,
    config: PlatformConfig,
}

impl HttpPlatform {
    /// Create a new platform client.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Config` if the HTTP client cannot be built.
    pub fn new(config: PlatformConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(5))
            .danger_accept_invalid_certs(!config.verify)
            .build()
            .map_err(|e| PlatformError::Config(format!("Failed to create HTTP client: {e}")))?;

        if !config.verify {
            tracing::warn!(host = %config.host, "TLS certificate verification disabled");
        }

        Ok(Self { client, config })
    }

    /// Get the platform configuration.
    #[must_use]
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }
}

fn accept_header(version: ApiVersion) -> String {
    format!("application/json;version={version}")
}

/// Map a non-success response to the matching error kind.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            PlatformError::Unauthorized(format!("{status} from {url}"))
        }
        StatusCode::NOT_FOUND => PlatformError::NotFound(url),
        _ => PlatformError::Http(format!("{status} from {url}: {body}")),
    })
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn login(&self) -> Result<Arc<dyn PlatformSession>> {
        let base_url = self.config.base_url().to_string();
        let url = format!("{base_url}/cloudapi/1.0.0/sessions/provider");

        let response = self
            .client
            .post(&url)
            .basic_auth(
                format!("{}@{SYSTEM_ORG}", self.config.username),
                Some(&self.config.password),
            )
            .header(header::ACCEPT, accept_header(self.config.api_version))
            .send()
            .await?;
        let response = check_status(response).await?;

        let token = response
            .headers()
            .get(ACCESS_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::InvalidResponse(format!(
                    "login response carried no {ACCESS_TOKEN_HEADER} header"
                ))
            })?;

        tracing::debug!(
            host = %base_url,
            api_version = %self.config.api_version,
            "Logged in to platform"
        );

        Ok(Arc::new(HttpSession {
            inner: Arc::new(SessionInner {
                client: self.client.clone(),
                base_url,
                token,
                api_version: self.config.api_version,
                log_wire: self.config.log_wire,
            }),
        }))
    }
}

/// Shared state of one authenticated session.
struct SessionInner {
    client: reqwest::Client,
    base_url: String,
    token: String,
    api_version: ApiVersion,
    log_wire: bool,
}

impl SessionInner {
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, accept_header(self.api_version))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        if self.log_wire {
            tracing::trace!(
                url = %response.url(),
                status = %response.status(),
                "Platform response"
            );
        }
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self.send(self.request(Method::GET, url).query(query)).await?;
        Ok(response.json().await?)
    }

    /// Run a records-format query, following every result page.
    async fn query_records(&self, kind: &str, filter: &str) -> Result<Vec<QueryRecord>> {
        let url = format!("{}/api/query", self.base_url);
        let page_size = QUERY_PAGE_SIZE.to_string();
        let mut records = Vec::new();

        for page in 1_u32.. {
            let page_number = page.to_string();
            let result: QueryResult = self
                .get_json(
                    &url,
                    &[
                        ("type", kind),
                        ("format", "records"),
                        ("page", page_number.as_str()),
                        ("pageSize", page_size.as_str()),
                        ("filter", filter),
                    ],
                )
                .await?;

            let received = result.record.len();
            records.extend(result.record);
            if received == 0 || records.len() >= result.total {
                break;
            }
            tracing::debug!(kind, page, total = result.total, "Fetching next query page");
        }

        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    record: Vec<QueryRecord>,
}

#[derive(Debug, Deserialize)]
struct QueryRecord {
    name: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    #[serde(default, rename = "metadataEntry")]
    entries: Vec<MetadataEntry>,
}

#[derive(Debug, Deserialize)]
struct MetadataEntry {
    key: String,
    #[serde(rename = "typedValue")]
    typed_value: TypedValue,
}

#[derive(Debug, Deserialize)]
struct TypedValue {
    value: serde_json::Value,
}

impl MetadataResponse {
    fn into_map(self) -> HashMap<String, String> {
        self.entries
            .into_iter()
            .map(|entry| {
                let value = match entry.typed_value.value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (entry.key, value)
            })
            .collect()
    }
}

/// Build a template definition from catalog item metadata.
///
/// Returns `None` when the item does not carry a template name and revision.
fn template_from_metadata(
    catalog_item_name: &str,
    metadata: &HashMap<String, String>,
) -> Option<TemplateDefinition> {
    let name = metadata.get("name").filter(|v| !v.is_empty())?;
    let revision = metadata.get("revision").filter(|v| !v.is_empty())?;

    let mut template =
        TemplateDefinition::new(name.as_str(), Revision::new(revision), catalog_item_name);
    if let Some(policy) = metadata.get("compute_policy") {
        template.compute_policy.clone_from(policy);
    }
    template.cpu = metadata.get("cpu").and_then(|v| v.parse().ok());
    template.memory_mb = metadata.get("mem").and_then(|v| v.parse().ok());
    template.kind = metadata.get("kind").cloned();
    Some(template)
}

/// An authenticated REST session.
pub struct HttpSession {
    inner: Arc<SessionInner>,
}

#[async_trait]
impl PlatformSession for HttpSession {
    fn api_version(&self) -> ApiVersion {
        self.inner.api_version
    }

    async fn list_templates(&self, org: &str, catalog: &str) -> Result<Vec<TemplateDefinition>> {
        let filter = format!("catalogName=={catalog};orgName=={org}");
        let records = self.inner.query_records("adminCatalogItem", &filter).await?;

        let mut templates = Vec::with_capacity(records.len());
        for record in records {
            let metadata: MetadataResponse = self
                .inner
                .get_json(&format!("{}/metadata", record.href), &[])
                .await?;

            match template_from_metadata(&record.name, &metadata.into_map()) {
                Some(template) => templates.push(template),
                None => tracing::debug!(
                    catalog_item = %record.name,
                    "Catalog item carries no template metadata, skipping"
                ),
            }
        }

        Ok(templates)
    }

    async fn is_extension_registered(&self, name: &str) -> Result<bool> {
        let filter = format!("name=={name}");
        let records = self.inner.query_records("adminService", &filter).await?;
        Ok(!records.is_empty())
    }

    fn policy_backend(&self) -> Result<Box<dyn PolicyBackend>> {
        if self.inner.api_version < COMPUTE_POLICY_MIN_VERSION {
            return Err(PlatformError::NotSupported(format!(
                "compute policies require API version {COMPUTE_POLICY_MIN_VERSION} or later"
            )));
        }
        Ok(Box::new(HttpPolicyBackend {
            inner: Arc::clone(&self.inner),
        }))
    }

    fn schema_service(&self) -> Result<Box<dyn SchemaService>> {
        if self.inner.api_version < SCHEMA_MIN_VERSION {
            return Err(PlatformError::NotSupported(format!(
                "entity schemas require API version {SCHEMA_MIN_VERSION} or later"
            )));
        }
        Ok(Box::new(HttpSchemaService {
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn logout(&self) -> Result<()> {
        let url = format!("{}/cloudapi/1.0.0/sessions/current", self.inner.base_url);
        self.inner.send(self.inner.request(Method::DELETE, &url)).await?;
        tracing::debug!("Logged out of platform");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PolicyPage {
    #[serde(default)]
    values: Vec<RawPolicy>,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    id: String,
    name: String,
}

/// Compute policy operations over REST.
struct HttpPolicyBackend {
    inner: Arc<SessionInner>,
}

impl HttpPolicyBackend {
    fn policies_url(&self) -> String {
        format!("{}/cloudapi/2.0.0/vdcComputePolicies", self.inner.base_url)
    }

    fn to_policy(&self, raw: RawPolicy) -> Policy {
        Policy {
            href: format!("{}/{}", self.policies_url(), raw.id),
            id: raw.id,
            name: raw.name,
        }
    }

    async fn template_vms(&self, org: &str, catalog: &str, catalog_item: &str) -> Result<Vec<QueryRecord>> {
        let filter =
            format!("isVAppTemplate==true;org=={org};catalogName=={catalog};containerName=={catalog_item}");
        self.inner.query_records("adminVM", &filter).await
    }

    async fn set_vm_policy(&self, vm: &QueryRecord, body: serde_json::Value) -> Result<()> {
        let url = format!("{}/computePolicy", vm.href);
        self.inner
            .send(self.inner.request(Method::PUT, &url).json(&body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PolicyBackend for HttpPolicyBackend {
    async fn get_policy(&self, name: &str) -> Result<Policy> {
        let filter = format!("name=={name}");
        let page: PolicyPage = self
            .inner
            .get_json(&self.policies_url(), &[("filter", filter.as_str())])
            .await?;

        page.values
            .into_iter()
            .find(|p| p.name == name)
            .map(|raw| self.to_policy(raw))
            .ok_or_else(|| PlatformError::NotFound(format!("compute policy '{name}'")))
    }

    async fn create_policy(&self, name: &str) -> Result<Policy> {
        let body = json!({
            "name": name,
            "description": format!("Compute policy '{name}' for provisioning templates"),
        });
        let response = self
            .inner
            .send(
                self.inner
                    .request(Method::POST, &self.policies_url())
                    .json(&body),
            )
            .await?;
        let raw: RawPolicy = response.json().await?;
        tracing::debug!(policy = %raw.name, id = %raw.id, "Created compute policy");
        Ok(self.to_policy(raw))
    }

    async fn attach(
        &self,
        policy_href: &str,
        org: &str,
        catalog: &str,
        catalog_item: &str,
    ) -> Result<()> {
        let vms = self.template_vms(org, catalog, catalog_item).await?;
        for vm in &vms {
            self.set_vm_policy(vm, json!({ "vmSizingPolicy": { "href": policy_href } }))
                .await?;
        }
        tracing::debug!(
            catalog_item = %catalog_item,
            vm_count = vms.len(),
            "Attached compute policy to template VMs"
        );
        Ok(())
    }

    async fn detach_all(&self, org: &str, catalog: &str, catalog_item: &str) -> Result<()> {
        let vms = self.template_vms(org, catalog, catalog_item).await?;
        for vm in &vms {
            self.set_vm_policy(vm, json!({ "vmSizingPolicy": null })).await?;
        }
        tracing::debug!(
            catalog_item = %catalog_item,
            vm_count = vms.len(),
            "Removed compute policies from template VMs"
        );
        Ok(())
    }
}

/// Capability schema lookups over REST.
struct HttpSchemaService {
    inner: Arc<SessionInner>,
}

#[async_trait]
impl SchemaService for HttpSchemaService {
    async fn get_interface(&self, id: &InterfaceId) -> Result<CapabilityInterface> {
        let url = format!("{}/cloudapi/1.0.0/interfaces/{id}", self.inner.base_url);
        self.inner.get_json(&url, &[]).await
    }

    async fn get_entity_type(&self, id: &EntityTypeId) -> Result<CapabilityEntityType> {
        let url = format!("{}/cloudapi/1.0.0/entityTypes/{id}", self.inner.base_url);
        self.inner.get_json(&url, &[]).await
    }
}
