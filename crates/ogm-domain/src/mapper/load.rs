use std::collections::{BTreeSet, HashMap, HashSet};

use ogm_core::{ObjRef, TypeRegistry, Value};
use ogm_graph::{
    Condition, NodeId, NodeQuery, NodeRecord, PropertyValue, RelationshipRecord, Statement,
};

use super::encode::{decode_properties, encode, field_kind, FieldKind, DOMAIN_KEY, INDEX_KEY, TYPE_KEY};
use crate::access::DomainAccess;
use crate::error::{DomainError, Result};
use crate::sync::SyncEntry;

/// Condition selecting nodes of `domain` whose type is one of `type_names`.
pub(crate) fn type_condition(domain: &str, type_names: &[String]) -> Condition {
    Condition::And(vec![
        Condition::eq(DOMAIN_KEY, domain),
        Condition::Or(
            type_names
                .iter()
                .map(|t| Condition::eq(TYPE_KEY, t.as_str()))
                .collect(),
        ),
    ])
}

/// Instantiable types assignable to `type_name`.
pub(crate) fn instance_types(registry: &TypeRegistry, type_name: &str) -> Result<Vec<String>> {
    registry.require(type_name)?;
    Ok(registry
        .assignable_to(type_name)
        .iter()
        .filter(|t| t.is_instantiable())
        .map(|t| t.name().to_string())
        .collect())
}

/// Query over all stored instances of `type_name` and its subtypes, or
/// `None` when no instantiable type qualifies.
pub(crate) fn instance_query(
    registry: &TypeRegistry,
    domain: &str,
    type_name: &str,
) -> Result<Option<NodeQuery>> {
    let names = instance_types(registry, type_name)?;
    if names.is_empty() {
        return Ok(None);
    }
    let mut labels = registry.instance_labels(type_name);
    labels.sort();
    labels.dedup();
    Ok(Some(
        NodeQuery::with_labels(labels).filter(Some(type_condition(domain, &names))),
    ))
}

impl DomainAccess {
    /// Load one object by store id.
    pub fn load_by_id(&mut self, id: NodeId, depth: i32) -> Result<Option<ObjRef>> {
        Ok(self.load_by_ids(&[id], depth)?.into_iter().next())
    }

    /// Load objects by store id, in the order given. Ids without a node in
    /// this domain are skipped.
    ///
    /// `depth` 0 loads scalar fields only, `n` follows references `n` hops,
    /// and -1 follows them until leaves or objects already loaded.
    pub fn load_by_ids(&mut self, ids: &[NodeId], depth: i32) -> Result<Vec<ObjRef>> {
        let query = NodeQuery {
            ids: Some(ids.to_vec()),
            ..NodeQuery::default()
        }
        .filter(Some(Condition::eq(DOMAIN_KEY, self.domain.as_str())));
        let records = self.conn.execute_one(Statement::FindNodes(query))?.into_nodes();
        let loaded = self.resolve_records(records, depth)?;
        Ok(ids.iter().filter_map(|id| loaded.get(id).copied()).collect())
    }

    /// Load instances of a type and its subtypes in store id order, skipping
    /// `offset` and taking at most `count` (-1 for all).
    pub fn load_by_type(
        &mut self,
        type_name: &str,
        depth: i32,
        offset: u64,
        count: i64,
    ) -> Result<Vec<ObjRef>> {
        let Some(mut query) = instance_query(&self.registry, &self.domain, type_name)? else {
            return Ok(Vec::new());
        };
        query.skip = offset;
        query.limit = u64::try_from(count).ok();
        let records = self.conn.execute_one(Statement::FindNodes(query))?.into_nodes();
        let ids: Vec<NodeId> = records.iter().map(|r| r.id).collect();
        let loaded = self.resolve_records(records, depth)?;
        Ok(ids.iter().filter_map(|id| loaded.get(id).copied()).collect())
    }

    /// Number of stored instances of a type and all its subtypes.
    pub fn number_of_instances_of(&self, type_name: &str) -> Result<u64> {
        match instance_query(&self.registry, &self.domain, type_name)? {
            Some(query) => Ok(self.conn.execute_one(Statement::CountNodes(query))?.count()),
            None => Ok(0),
        }
    }

    /// Materialize nodes and follow their references up to `depth` hops.
    ///
    /// Nodes already known to this handle reuse their instance. A node
    /// reached a second time is linked but not expanded again.
    pub(crate) fn resolve_records(
        &mut self,
        records: Vec<NodeRecord>,
        depth: i32,
    ) -> Result<HashMap<NodeId, ObjRef>> {
        let mut loaded: HashMap<NodeId, ObjRef> = HashMap::new();
        let mut unresolved: HashMap<ObjRef, BTreeSet<String>> = HashMap::new();

        let mut frontier = Vec::new();
        for record in &records {
            if !loaded.contains_key(&record.id) {
                self.materialize(record, &mut loaded, &mut unresolved)?;
                frontier.push(record.id);
            }
        }

        let mut expanded: HashSet<NodeId> = HashSet::new();
        let mut level = 0;
        while !frontier.is_empty() && (depth < 0 || level < depth) {
            let rels = self
                .conn
                .execute_one(Statement::FetchRelationships {
                    start_ids: frontier.clone(),
                })?
                .into_relationships();

            let mut missing: Vec<NodeId> = rels
                .iter()
                .map(|r| r.end)
                .filter(|id| !loaded.contains_key(id))
                .collect();
            missing.sort_unstable();
            missing.dedup();
            let mut next = Vec::new();
            if !missing.is_empty() {
                let query = NodeQuery {
                    ids: Some(missing),
                    ..NodeQuery::default()
                }
                .filter(Some(Condition::eq(DOMAIN_KEY, self.domain.as_str())));
                let targets = self.conn.execute_one(Statement::FindNodes(query))?.into_nodes();
                for record in &targets {
                    self.materialize(record, &mut loaded, &mut unresolved)?;
                    next.push(record.id);
                }
            }

            for id in &frontier {
                let Some(obj) = loaded.get(id).copied() else {
                    continue;
                };
                let outgoing: Vec<&RelationshipRecord> =
                    rels.iter().filter(|r| r.start == *id).collect();
                let resolved = self.link_references(obj, &outgoing, &loaded)?;
                if let Some(pending) = unresolved.get_mut(&obj) {
                    pending.retain(|f| !resolved.contains(f));
                }
            }

            expanded.extend(frontier.iter().copied());
            frontier = next.into_iter().filter(|id| !expanded.contains(id)).collect();
            level += 1;
        }

        let tx = self.conn.current_tx();
        let by_obj: HashMap<ObjRef, NodeId> = loaded.iter().map(|(n, o)| (*o, *n)).collect();
        for (node_id, obj) in &loaded {
            let pending = unresolved.remove(obj).unwrap_or_default();
            let snapshot = encode(
                &self.domain,
                &self.registry,
                &self.graph,
                *obj,
                &pending,
                |r| by_obj.get(&r).copied().or_else(|| self.sync.node_id(r)),
            )
            .and_then(|e| e.hash())
            .ok();
            self.sync.set(
                tx,
                *obj,
                SyncEntry {
                    node_id: *node_id,
                    snapshot,
                    unresolved: pending,
                },
            );
        }

        tracing::debug!(
            domain = %self.domain,
            roots = records.len(),
            loaded = loaded.len(),
            depth,
            "Resolved object graph"
        );
        Ok(loaded)
    }

    fn materialize(
        &mut self,
        record: &NodeRecord,
        loaded: &mut HashMap<NodeId, ObjRef>,
        unresolved: &mut HashMap<ObjRef, BTreeSet<String>>,
    ) -> Result<ObjRef> {
        let type_name = record
            .property(TYPE_KEY)
            .and_then(PropertyValue::as_str)
            .ok_or_else(|| DomainError::Decode(format!("node {} has no type", record.id)))?;
        let ty = self.registry.require(type_name)?;

        let known = self
            .sync
            .object_for(record.id)
            .filter(|o| self.graph.get(*o).is_ok_and(|obj| obj.type_name() == type_name));
        let (obj, pending) = match known {
            Some(obj) => {
                let pending = self
                    .sync
                    .entry(obj)
                    .map(|e| e.unresolved)
                    .unwrap_or_default();
                (obj, pending)
            }
            None => {
                let obj = self.graph.create(&ty)?;
                let pending = ty
                    .fields()
                    .into_iter()
                    .filter(|f| matches!(field_kind(&self.registry, f), FieldKind::Reference(_)))
                    .map(|f| f.name().to_string())
                    .collect();
                (obj, pending)
            }
        };

        decode_properties(&self.registry, &mut self.graph, obj, &record.properties)?;
        loaded.insert(record.id, obj);
        unresolved.insert(obj, pending);
        Ok(obj)
    }

    /// Set every reference field of `obj` from its outgoing relationships.
    /// Returns the names of the fields set.
    fn link_references(
        &mut self,
        obj: ObjRef,
        outgoing: &[&RelationshipRecord],
        loaded: &HashMap<NodeId, ObjRef>,
    ) -> Result<Vec<String>> {
        let ty = self.graph.get(obj)?.domain_type().clone();
        let mut resolved = Vec::new();
        for field in ty.fields() {
            if !matches!(field_kind(&self.registry, field), FieldKind::Reference(_)) {
                continue;
            }
            let mut rels: Vec<&&RelationshipRecord> = outgoing
                .iter()
                .filter(|r| r.rel_type == field.name())
                .collect();
            rels.sort_by_key(|r| {
                (
                    r.properties
                        .get(INDEX_KEY)
                        .and_then(PropertyValue::as_i64)
                        .unwrap_or(0),
                    r.id,
                )
            });
            let targets: Vec<Value> = rels
                .iter()
                .filter_map(|r| loaded.get(&r.end).copied())
                .map(Value::Object)
                .collect();

            if targets.is_empty() {
                // An empty list decoded from the node's marker stays set.
                let marked_empty = field.is_list()
                    && self
                        .graph
                        .get(obj)?
                        .field(field.name())
                        .is_some_and(|v| v.values().is_empty());
                if !marked_empty {
                    self.graph.clear_field(obj, field.name())?;
                }
            } else if field.is_list() {
                self.graph.set_list(obj, field.name(), targets)?;
            } else if let Some(target) = targets.into_iter().next() {
                self.graph.set_field(obj, field.name(), target)?;
            }
            resolved.push(field.name().to_string());
        }
        Ok(resolved)
    }
}
