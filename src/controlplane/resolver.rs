//! Name Resolver
//!
//! Translates user-facing names into Controller identifiers so callers never
//! see REST paths. Inputs already shaped like an identifier
//! (`urn:<product>:...`) pass through without a network call. The first
//! case-sensitive exact match wins.
//!
//! A resolver caches answers for its own lifetime only. Orchestrators create
//! one per operation.

use crate::controlplane::session::ControllerSession;
use crate::domain::types::{is_urn, VolumePath};
use crate::error::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use urlencoding::encode;

// =============================================================================
// Wire Shapes
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
struct NamedResource {
    #[serde(default)]
    name: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    resource: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    #[serde(default, rename = "match")]
    matched: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubtenantList {
    #[serde(default)]
    subtenant: Vec<NamedResource>,
}

#[derive(Debug, Deserialize)]
struct ProjectList {
    #[serde(default)]
    project: Vec<NamedResource>,
}

#[derive(Debug, Deserialize)]
struct VirtualPoolList {
    #[serde(default)]
    virtualpool: Vec<NamedResource>,
}

#[derive(Debug, Deserialize)]
struct VirtualArrayList {
    #[serde(default)]
    varray: Vec<NamedResource>,
}

#[derive(Debug, Deserialize)]
struct NetworkList {
    #[serde(default)]
    network: Vec<NamedResource>,
}

// =============================================================================
// Virtual Pool Kind
// =============================================================================

/// Storage family a virtual pool belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VpoolKind {
    Block,
    File,
    Object,
}

impl VpoolKind {
    fn path_segment(&self) -> &'static str {
        match self {
            VpoolKind::Block => "block",
            VpoolKind::File => "file",
            VpoolKind::Object => "object",
        }
    }
}

impl fmt::Display for VpoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl std::str::FromStr for VpoolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "block" => Ok(VpoolKind::Block),
            "file" => Ok(VpoolKind::File),
            "object" => Ok(VpoolKind::Object),
            other => Err(Error::BadInput(format!("unknown virtual pool kind '{}'", other))),
        }
    }
}

// =============================================================================
// Name Resolver
// =============================================================================

/// Resolves names to Controller identifiers through one session
pub struct NameResolver {
    session: Arc<ControllerSession>,
    cache: Mutex<HashMap<String, String>>,
}

impl NameResolver {
    pub fn new(session: Arc<ControllerSession>) -> Self {
        Self {
            session,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &str) -> Option<String> {
        self.cache.lock().get(key).cloned()
    }

    fn remember(&self, key: String, id: &str) {
        self.cache.lock().insert(key, id.to_string());
    }

    // =========================================================================
    // Attach-path lookups
    // =========================================================================

    /// Volume identifier via the Controller's get-by-name endpoint.
    ///
    /// The name is URL-encoded twice so an embedded `/` survives the proxy.
    pub async fn resolve_volume_by_name(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Err(Error::BadInput("volume name must not be empty".into()));
        }

        let key = format!("volume-by-name:{}", name);
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let path = format!(
            "/api/types/Volume/instances/getByName::{}",
            encode(&encode(name))
        );
        let id = match self.session.get_json::<Value>(&path).await {
            Ok(value) => identifier_from(&value)
                .ok_or_else(|| Error::BadInput(format!("unexpected getByName answer: {}", value)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ResourceNotFound {
                    kind: "Volume".into(),
                    name: name.into(),
                })
            }
            Err(e) => return Err(e),
        };

        debug!("Volume {} resolved to {}", name, id);
        self.remember(key, &id);
        Ok(id)
    }

    /// Data-plane client identifier registered for `ip`
    pub async fn resolve_client_by_ip(&self, ip: &str) -> Result<String> {
        let key = format!("client-by-ip:{}", ip);
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let path = format!("/api/types/Client/instances/getByIp::{}/", ip);
        let id = match self.session.get_json::<Value>(&path).await {
            Ok(value) => identifier_from(&value)
                .ok_or_else(|| Error::BadInput(format!("unexpected getByIp answer: {}", value)))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ResourceNotFound {
                    kind: "Client".into(),
                    name: ip.into(),
                })
            }
            Err(e) => return Err(e),
        };

        debug!("Client {} resolved to {}", ip, id);
        self.remember(key, &id);
        Ok(id)
    }

    // =========================================================================
    // Tenant / project / volume
    // =========================================================================

    /// Tenant id; `None` or empty selects the caller's root tenant
    pub async fn resolve_tenant(&self, name: Option<&str>) -> Result<String> {
        if let Some(name) = name.filter(|n| is_urn(n)) {
            return Ok(name.to_string());
        }

        let key = format!("tenant:{}", name.unwrap_or_default());
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let root: NamedResource = self.session.get_json("/tenant").await?;
        let id = match name.filter(|n| !n.is_empty()) {
            None => root.id,
            Some(name) if name == root.name => root.id,
            Some(name) => {
                let list: SubtenantList = self
                    .session
                    .get_json(&format!("/tenants/{}/subtenants", root.id))
                    .await?;
                find_by_name(&list.subtenant, name, "Tenant")?
            }
        };

        self.remember(key, &id);
        Ok(id)
    }

    /// Project id within a tenant
    pub async fn resolve_project(&self, tenant: Option<&str>, project: &str) -> Result<String> {
        if is_urn(project) {
            return Ok(project.to_string());
        }

        let tenant_id = self.resolve_tenant(tenant).await?;
        let key = format!("project:{}:{}", tenant_id, project);
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let list: ProjectList = self
            .session
            .get_json(&format!("/tenants/{}/projects", tenant_id))
            .await?;
        let id = find_by_name(&list.project, project, "Project")?;

        self.remember(key, &id);
        Ok(id)
    }

    /// Volume id from its tenant, project and name
    pub async fn resolve_volume(
        &self,
        tenant: Option<&str>,
        project: &str,
        volume: &str,
    ) -> Result<String> {
        if is_urn(volume) {
            return Ok(volume.to_string());
        }

        let project_id = self.resolve_project(tenant, project).await?;
        let key = format!("volume:{}:{}", project_id, volume);
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let results: SearchResults = self
            .session
            .get_json(&format!("/block/volumes/search?project={}", encode(&project_id)))
            .await?;

        for hit in &results.resource {
            let detail: NamedResource = self
                .session
                .get_json(&format!("/block/volumes/{}", hit.id))
                .await?;
            if detail.name == volume {
                self.remember(key, &detail.id);
                return Ok(detail.id);
            }
        }

        Err(Error::ResourceNotFound {
            kind: "Volume".into(),
            name: format!("{}/{}", project, volume),
        })
    }

    /// Volume id from `tenant/project/volume`, `project/volume` or an id
    pub async fn resolve_volume_path(&self, input: &str) -> Result<String> {
        if is_urn(input) {
            return Ok(input.to_string());
        }
        let path = VolumePath::parse(input)?;
        self.resolve_volume(path.tenant.as_deref(), &path.project, &path.volume)
            .await
    }

    /// Export group id within a project
    pub async fn resolve_export_group(&self, project_id: &str, name: &str) -> Result<String> {
        if is_urn(name) {
            return Ok(name.to_string());
        }

        let key = format!("export-group:{}:{}", project_id, name);
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let results: SearchResults = self
            .session
            .get_json(&format!("/block/exports/search?project={}", encode(project_id)))
            .await?;

        for hit in &results.resource {
            let detail: NamedResource = self
                .session
                .get_json(&format!("/block/exports/{}", hit.id))
                .await?;
            if detail.name == name {
                self.remember(key, &detail.id);
                return Ok(detail.id);
            }
        }

        Err(Error::ResourceNotFound {
            kind: "ExportGroup".into(),
            name: name.into(),
        })
    }

    // =========================================================================
    // Single-listing lookups
    // =========================================================================

    pub async fn resolve_virtual_pool(&self, name: &str, kind: VpoolKind) -> Result<String> {
        if is_urn(name) {
            return Ok(name.to_string());
        }

        let key = format!("vpool:{}:{}", kind, name);
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let list: VirtualPoolList = self
            .session
            .get_json(&format!("/{}/vpools", kind.path_segment()))
            .await?;
        let id = find_by_name(&list.virtualpool, name, "VirtualPool")?;

        self.remember(key, &id);
        Ok(id)
    }

    pub async fn resolve_virtual_array(&self, name: &str) -> Result<String> {
        if is_urn(name) {
            return Ok(name.to_string());
        }

        let key = format!("varray:{}", name);
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let list: VirtualArrayList = self.session.get_json("/vdc/varrays").await?;
        let id = find_by_name(&list.varray, name, "VirtualArray")?;

        self.remember(key, &id);
        Ok(id)
    }

    pub async fn resolve_host(&self, name: &str) -> Result<String> {
        if is_urn(name) {
            return Ok(name.to_string());
        }

        let key = format!("host:{}", name);
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let results: SearchResults = self
            .session
            .get_json(&format!("/compute/hosts/search?name={}", encode(name)))
            .await?;
        let id = results
            .resource
            .iter()
            .find(|hit| hit.matched.as_deref() == Some(name))
            .map(|hit| hit.id.clone())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Host".into(),
                name: name.into(),
            })?;

        self.remember(key, &id);
        Ok(id)
    }

    /// Network id, optionally scoped to a virtual array
    pub async fn resolve_network(&self, name: &str, varray: Option<&str>) -> Result<String> {
        if is_urn(name) {
            return Ok(name.to_string());
        }

        let path = match varray {
            Some(varray) => {
                let varray_id = self.resolve_virtual_array(varray).await?;
                format!("/vdc/varrays/{}/networks", varray_id)
            }
            None => "/vdc/networks".to_string(),
        };

        let key = format!("network:{}:{}", path, name);
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }

        let list: NetworkList = self.session.get_json(&path).await?;
        let id = find_by_name(&list.network, name, "Network")?;

        self.remember(key, &id);
        Ok(id)
    }
}

/// First case-sensitive exact name match
fn find_by_name(items: &[NamedResource], name: &str, kind: &str) -> Result<String> {
    items
        .iter()
        .find(|item| item.name == name)
        .map(|item| item.id.clone())
        .ok_or_else(|| Error::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
        })
}

/// Lookup endpoints answer with either a bare JSON string or an object
/// carrying `id`
fn identifier_from(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
        _ => None,
    }
}
