//! Domain access handles.

use std::sync::Arc;

use ogm_core::config::OgmConfig;
use ogm_core::{DomainGraph, DomainObject, DomainType, ObjRef, TypeRegistry, Value};

use crate::connection::{Connection, Transaction, TxListener};
use crate::error::Result;
use crate::mapper::encode::encode;
use crate::mapper::meta;
use crate::sync::{SyncInfo, SyncState, SyncTable};

/// Access to one domain in a store.
///
/// A handle owns its object arena, its copy of the type model and the
/// synchronization records linking its objects to store nodes. Two handles
/// never share objects: loading the same node through two handles yields two
/// independent instances.
pub struct DomainAccess {
    pub(crate) conn: Connection,
    pub(crate) domain: String,
    pub(crate) registry: TypeRegistry,
    pub(crate) graph: DomainGraph,
    pub(crate) sync: Arc<SyncTable>,
    pub(crate) resolution_depth: i32,
}

impl DomainAccess {
    /// Open a handle on `domain`, loading any type model stored for it.
    pub fn new(conn: &Connection, domain: impl Into<String>) -> Result<Self> {
        let domain = domain.into();
        let mut registry = TypeRegistry::new();
        meta::load_registry(conn, &domain, &mut registry)?;

        let sync = Arc::new(SyncTable::default());
        let listener: Arc<dyn TxListener> = sync.clone();
        conn.register_listener(Arc::downgrade(&listener));

        tracing::debug!(domain = %domain, types = registry.len(), "Domain access opened");
        Ok(Self {
            conn: conn.clone(),
            domain,
            registry,
            graph: DomainGraph::new(),
            sync,
            resolution_depth: -1,
        })
    }

    /// Open a handle on the configured domain with the configured
    /// resolution depth.
    pub fn from_config(conn: &Connection, config: &OgmConfig) -> Result<Self> {
        let access = Self::new(conn, config.domain.name.clone())?;
        Ok(access.with_resolution_depth(config.domain.resolution_depth))
    }

    /// Depth used when materializing query results (-1 = unbounded).
    pub fn with_resolution_depth(mut self, depth: i32) -> Self {
        self.resolution_depth = depth;
        self
    }

    pub fn domain_name(&self) -> &str {
        &self.domain
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn begin_tx(&self) -> Result<Transaction> {
        self.conn.begin_tx()
    }

    // ── Types ────────────────────────────────────────────────────

    pub fn types(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The registry to build new types into.
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn domain_object_type_names(&self) -> Vec<String> {
        self.registry.names().into_iter().map(String::from).collect()
    }

    pub fn domain_object_type(&self, name: &str) -> Result<Arc<DomainType>> {
        Ok(self.registry.require(name)?)
    }

    // ── Objects ──────────────────────────────────────────────────

    pub fn graph(&self) -> &DomainGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut DomainGraph {
        &mut self.graph
    }

    /// Create a new, unstored object of the named type.
    pub fn create_object(&mut self, type_name: &str) -> Result<ObjRef> {
        let ty = self.registry.require(type_name)?;
        Ok(self.graph.create(&ty)?)
    }

    pub fn object(&self, obj: ObjRef) -> Result<&DomainObject> {
        Ok(self.graph.get(obj)?)
    }

    pub fn set_field(&mut self, obj: ObjRef, name: &str, value: impl Into<Value>) -> Result<()> {
        Ok(self.graph.set_field(obj, name, value)?)
    }

    pub fn add_list_value(
        &mut self,
        obj: ObjRef,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        Ok(self.graph.add_list_value(obj, name, value)?)
    }

    // ── Sync state ───────────────────────────────────────────────

    /// Synchronization record of an object.
    pub fn sync_info(&self, obj: ObjRef) -> Result<SyncInfo> {
        self.graph.get(obj)?;
        let Some(entry) = self.sync.entry(obj) else {
            return Ok(SyncInfo {
                node_id: None,
                state: SyncState::New,
            });
        };
        let current = encode(
            &self.domain,
            &self.registry,
            &self.graph,
            obj,
            &entry.unresolved,
            |r| self.sync.node_id(r),
        )
        .and_then(|e| e.hash())
        .ok();
        let state = match (&entry.snapshot, current) {
            (Some(snapshot), Some(current)) if *snapshot == current => SyncState::Clean,
            _ => SyncState::Dirty,
        };
        Ok(SyncInfo {
            node_id: Some(entry.node_id),
            state,
        })
    }

    pub fn sync_infos(&self, objs: &[ObjRef]) -> Result<Vec<SyncInfo>> {
        objs.iter().map(|o| self.sync_info(*o)).collect()
    }
}
