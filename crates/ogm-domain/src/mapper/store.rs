use ogm_core::{reachable, ObjRef};
use ogm_graph::{NodeId, Properties, PropertyValue, Statement};

use super::encode::{encode, encode_properties, Encoded, INDEX_KEY};
use super::meta;
use crate::access::DomainAccess;
use crate::error::{DomainError, Result};
use crate::sync::SyncEntry;

impl DomainAccess {
    /// Store an object and everything reachable from it.
    pub fn store(&mut self, obj: ObjRef) -> Result<()> {
        self.store_all(&[obj])
    }

    /// Store several root objects and everything reachable from them.
    ///
    /// Each distinct object is visited once, so cyclic graphs terminate.
    /// Objects whose content is unchanged since they were last stored or
    /// loaded are not rewritten. Each object is written in its own batch:
    /// without an open transaction, objects written before a failing one
    /// stay persisted.
    pub fn store_all(&mut self, roots: &[ObjRef]) -> Result<()> {
        for root in roots {
            self.graph.get(*root)?;
        }
        let tx = self.conn.current_tx();
        let objects = reachable(&self.graph, roots);

        self.conn
            .execute(&meta::write_statements(&self.domain, &self.registry)?)?;

        let fresh: Vec<ObjRef> = objects
            .iter()
            .copied()
            .filter(|o| self.sync.entry(*o).is_none())
            .collect();
        if !fresh.is_empty() {
            let mut statements = Vec::with_capacity(fresh.len());
            for obj in &fresh {
                let object = self.graph.get(*obj)?;
                statements.push(Statement::CreateNode {
                    labels: vec![object.domain_type().simple_name().to_string()],
                    properties: encode_properties(&self.domain, &self.registry, object),
                });
            }
            let results = self.conn.execute(&statements)?;
            for (obj, result) in fresh.iter().zip(results) {
                let node_id = result.created().ok_or_else(|| {
                    DomainError::Decode(format!("no node id returned for {obj}"))
                })?;
                self.sync.set(
                    tx,
                    *obj,
                    SyncEntry {
                        node_id,
                        snapshot: None,
                        unresolved: Default::default(),
                    },
                );
            }
        }

        let mut written = 0usize;
        for obj in &objects {
            let Some(entry) = self.sync.entry(*obj) else {
                continue;
            };
            let encoded = encode(
                &self.domain,
                &self.registry,
                &self.graph,
                *obj,
                &entry.unresolved,
                |r| self.sync.node_id(r),
            )?;
            let hash = encoded.hash()?;
            if entry.snapshot.as_deref() == Some(hash.as_str()) {
                continue;
            }

            let statements = self.write_statements(*obj, entry.node_id, &encoded)?;
            if let Err(e) = self.conn.execute(&statements) {
                tracing::warn!(
                    object = %obj,
                    node_id = entry.node_id,
                    written,
                    error = %e,
                    "Store aborted"
                );
                return Err(e);
            }

            let mut unresolved = entry.unresolved;
            unresolved.retain(|f| !encoded.relationships.contains_key(f));
            self.sync.set(
                tx,
                *obj,
                SyncEntry {
                    node_id: entry.node_id,
                    snapshot: Some(hash),
                    unresolved,
                },
            );
            written += 1;
        }

        tracing::debug!(
            domain = %self.domain,
            reachable = objects.len(),
            created = fresh.len(),
            written,
            "Stored object graph"
        );
        Ok(())
    }

    fn write_statements(
        &self,
        obj: ObjRef,
        node_id: NodeId,
        encoded: &Encoded,
    ) -> Result<Vec<Statement>> {
        let ty = self.graph.get(obj)?.domain_type();
        let mut statements = vec![Statement::SetProperties {
            id: node_id,
            properties: encoded.properties.clone(),
        }];
        for (field, targets) in &encoded.relationships {
            statements.push(Statement::DeleteRelationships {
                start: node_id,
                rel_type: field.clone(),
            });
            let is_list = ty.field(field).is_some_and(|f| f.is_list());
            for (idx, target) in targets.iter().enumerate() {
                let mut properties = Properties::new();
                if is_list {
                    properties.insert(INDEX_KEY.to_string(), PropertyValue::Int(idx as i64));
                }
                statements.push(Statement::CreateRelationship {
                    start: node_id,
                    end: *target,
                    rel_type: field.clone(),
                    properties,
                });
            }
        }
        Ok(statements)
    }
}
