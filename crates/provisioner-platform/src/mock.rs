//! In-memory platform for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use provisioner_core::{ApiVersion, EntityTypeId, InterfaceId, TemplateDefinition};

use crate::client::{Platform, PlatformSession, PolicyBackend, SchemaService};
use crate::error::{PlatformError, Result};
use crate::types::{CapabilityEntityType, CapabilityInterface, Policy};

/// A call made against the mock policy backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCall {
    /// `get_policy(name)`.
    Get(String),
    /// `create_policy(name)`.
    Create(String),
    /// `attach(policy_href, .., catalog_item)`.
    Attach {
        /// Policy reference.
        policy_href: String,
        /// Catalog item the policy was attached to.
        catalog_item: String,
    },
    /// `detach_all(.., catalog_item)`.
    DetachAll {
        /// Catalog item the policies were removed from.
        catalog_item: String,
    },
}

struct MockState {
    api_version: ApiVersion,
    templates: Vec<TemplateDefinition>,
    extensions: HashSet<String>,
    policies: HashMap<String, Policy>,
    policies_supported: bool,
    interfaces: HashMap<InterfaceId, CapabilityInterface>,
    entity_types: HashMap<EntityTypeId, CapabilityEntityType>,
    schema_supported: bool,
    fail_login: bool,
    fail_list_templates: bool,
    stall_list_templates: bool,
    fail_schema: bool,
    fail_attach: HashSet<String>,
    logins: usize,
    logouts: usize,
    policy_calls: Vec<PolicyCall>,
}

/// A mock platform that keeps catalog, policies and schemas in memory.
///
/// Clones share state, so a test can keep a handle for assertions after
/// handing the platform to the service.
#[derive(Clone)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    /// Create an empty platform speaking `api_version`.
    #[must_use]
    pub fn new(api_version: ApiVersion) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                api_version,
                templates: Vec::new(),
                extensions: HashSet::new(),
                policies: HashMap::new(),
                policies_supported: true,
                interfaces: HashMap::new(),
                entity_types: HashMap::new(),
                schema_supported: true,
                fail_login: false,
                fail_list_templates: false,
                stall_list_templates: false,
                fail_schema: false,
                fail_attach: HashSet::new(),
                logins: 0,
                logouts: 0,
                policy_calls: Vec::new(),
            })),
        }
    }

    /// Put templates in the catalog.
    #[must_use]
    pub fn with_templates(self, templates: Vec<TemplateDefinition>) -> Self {
        self.state.lock().templates = templates;
        self
    }

    /// Register an existing compute policy.
    #[must_use]
    pub fn with_policy(self, name: &str) -> Self {
        {
            let mut state = self.state.lock();
            let policy = new_policy(state.policies.len(), name);
            state.policies.insert(name.to_string(), policy);
        }
        self
    }

    /// Report compute policies as unsupported.
    #[must_use]
    pub fn without_policy_support(self) -> Self {
        self.state.lock().policies_supported = false;
        self
    }

    /// Register a capability interface and entity type.
    #[must_use]
    pub fn with_schema(self, interface: CapabilityInterface, entity_type: CapabilityEntityType) -> Self {
        {
            let mut state = self.state.lock();
            state.interfaces.insert(interface.id.clone(), interface);
            state.entity_types.insert(entity_type.id.clone(), entity_type);
        }
        self
    }

    /// Report entity schemas as unsupported.
    #[must_use]
    pub fn without_schema_support(self) -> Self {
        self.state.lock().schema_supported = false;
        self
    }

    /// Register an API extension.
    #[must_use]
    pub fn with_extension(self, name: &str) -> Self {
        self.state.lock().extensions.insert(name.to_string());
        self
    }

    /// Make every login fail.
    #[must_use]
    pub fn fail_login(self) -> Self {
        self.state.lock().fail_login = true;
        self
    }

    /// Make catalog listing fail.
    #[must_use]
    pub fn fail_list_templates(self) -> Self {
        self.state.lock().fail_list_templates = true;
        self
    }

    /// Make catalog listing hang forever.
    #[must_use]
    pub fn stall_list_templates(self) -> Self {
        self.state.lock().stall_list_templates = true;
        self
    }

    /// Make schema lookups fail with a transport error.
    #[must_use]
    pub fn fail_schema(self) -> Self {
        self.state.lock().fail_schema = true;
        self
    }

    /// Make policy attachment fail for one catalog item.
    #[must_use]
    pub fn fail_attach(self, catalog_item: &str) -> Self {
        self.state.lock().fail_attach.insert(catalog_item.to_string());
        self
    }

    /// Number of successful logins.
    #[must_use]
    pub fn login_count(&self) -> usize {
        self.state.lock().logins
    }

    /// Number of logouts.
    #[must_use]
    pub fn logout_count(&self) -> usize {
        self.state.lock().logouts
    }

    /// Every policy backend call, in order.
    #[must_use]
    pub fn policy_calls(&self) -> Vec<PolicyCall> {
        self.state.lock().policy_calls.clone()
    }

    /// Whether a policy with this name exists.
    #[must_use]
    pub fn has_policy(&self, name: &str) -> bool {
        self.state.lock().policies.contains_key(name)
    }
}

fn new_policy(index: usize, name: &str) -> Policy {
    let id = format!("urn:vcloud:vdcComputePolicy:{index}");
    Policy {
        href: format!("https://mock/cloudapi/2.0.0/vdcComputePolicies/{id}"),
        id,
        name: name.to_string(),
    }
}

#[async_trait]
impl Platform for MockPlatform {
    async fn login(&self) -> Result<Arc<dyn PlatformSession>> {
        let mut state = self.state.lock();
        if state.fail_login {
            return Err(PlatformError::Unauthorized("mock login rejected".to_string()));
        }
        state.logins += 1;
        Ok(Arc::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl PlatformSession for MockSession {
    fn api_version(&self) -> ApiVersion {
        self.state.lock().api_version
    }

    async fn list_templates(&self, _org: &str, _catalog: &str) -> Result<Vec<TemplateDefinition>> {
        {
            let state = self.state.lock();
            if state.fail_list_templates {
                return Err(PlatformError::Http("mock catalog unavailable".to_string()));
            }
            if !state.stall_list_templates {
                return Ok(state.templates.clone());
            }
        }
        std::future::pending().await
    }

    async fn is_extension_registered(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().extensions.contains(name))
    }

    fn policy_backend(&self) -> Result<Box<dyn PolicyBackend>> {
        if !self.state.lock().policies_supported {
            return Err(PlatformError::NotSupported("compute policies".to_string()));
        }
        Ok(Box::new(MockPolicyBackend {
            state: Arc::clone(&self.state),
        }))
    }

    fn schema_service(&self) -> Result<Box<dyn SchemaService>> {
        if !self.state.lock().schema_supported {
            return Err(PlatformError::NotSupported("entity schemas".to_string()));
        }
        Ok(Box::new(MockSchemaService {
            state: Arc::clone(&self.state),
        }))
    }

    async fn logout(&self) -> Result<()> {
        self.state.lock().logouts += 1;
        Ok(())
    }
}

struct MockPolicyBackend {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl PolicyBackend for MockPolicyBackend {
    async fn get_policy(&self, name: &str) -> Result<Policy> {
        let mut state = self.state.lock();
        state.policy_calls.push(PolicyCall::Get(name.to_string()));
        state
            .policies
            .get(name)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("compute policy '{name}'")))
    }

    async fn create_policy(&self, name: &str) -> Result<Policy> {
        let mut state = self.state.lock();
        state.policy_calls.push(PolicyCall::Create(name.to_string()));
        let policy = new_policy(state.policies.len(), name);
        state.policies.insert(name.to_string(), policy.clone());
        Ok(policy)
    }

    async fn attach(
        &self,
        policy_href: &str,
        _org: &str,
        _catalog: &str,
        catalog_item: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.policy_calls.push(PolicyCall::Attach {
            policy_href: policy_href.to_string(),
            catalog_item: catalog_item.to_string(),
        });
        if state.fail_attach.contains(catalog_item) {
            return Err(PlatformError::Http(format!(
                "mock attach failed for '{catalog_item}'"
            )));
        }
        Ok(())
    }

    async fn detach_all(&self, _org: &str, _catalog: &str, catalog_item: &str) -> Result<()> {
        self.state.lock().policy_calls.push(PolicyCall::DetachAll {
            catalog_item: catalog_item.to_string(),
        });
        Ok(())
    }
}

struct MockSchemaService {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl SchemaService for MockSchemaService {
    async fn get_interface(&self, id: &InterfaceId) -> Result<CapabilityInterface> {
        let state = self.state.lock();
        if state.fail_schema {
            return Err(PlatformError::Http("mock schema lookup failed".to_string()));
        }
        state
            .interfaces
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))
    }

    async fn get_entity_type(&self, id: &EntityTypeId) -> Result<CapabilityEntityType> {
        let state = self.state.lock();
        if state.fail_schema {
            return Err(PlatformError::Http("mock schema lookup failed".to_string()));
        }
        state
            .entity_types
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(id.to_string()))
    }
}
