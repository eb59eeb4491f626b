//! Query results and the entry points that produce them.

use std::collections::HashSet;

use ogm_core::{ObjRef, Value};

use super::exec::{resolve_query, Bound};
use super::{DomainObjectMatch, DomainQuery};
use crate::access::DomainAccess;
use crate::error::Result;

#[derive(Debug, Clone)]
enum Resolved {
    Objects(Vec<ObjRef>),
    Values(Vec<Value>),
}

impl Resolved {
    fn len(&self) -> usize {
        match self {
            Self::Objects(objs) => objs.len(),
            Self::Values(values) => values.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    resolved: Resolved,
    page: Option<(usize, usize)>,
}

impl Entry {
    fn window(&self) -> std::ops::Range<usize> {
        let total = self.resolved.len();
        match self.page {
            Some((offset, count)) => {
                let start = offset.min(total);
                start..start.saturating_add(count).min(total)
            }
            None => 0..total,
        }
    }
}

/// Resolved matches of one executed query.
///
/// Each match keeps its full ordered result; pages are windows over it.
/// Changing a page never re-runs the query, so a page taken after other
/// writes to the store still shows the data as it was at execution.
#[derive(Debug, Clone)]
pub struct DomainQueryResult {
    query: uuid::Uuid,
    entries: Vec<Entry>,
}

impl DomainQueryResult {
    fn entry(&self, m: &DomainObjectMatch) -> Option<&Entry> {
        if m.query != self.query {
            return None;
        }
        self.entries.get(m.index())
    }

    /// Objects of a match within its current page. Empty for collect
    /// matches and for handles of other queries.
    pub fn result_of(&self, m: &DomainObjectMatch) -> &[ObjRef] {
        let Some(entry) = self.entry(m) else {
            return &[];
        };
        match &entry.resolved {
            Resolved::Objects(objs) => &objs[entry.window()],
            Resolved::Values(_) => &[],
        }
    }

    /// Values of a collect match within its current page.
    pub fn values_of(&self, m: &DomainObjectMatch) -> &[Value] {
        let Some(entry) = self.entry(m) else {
            return &[];
        };
        match &entry.resolved {
            Resolved::Values(values) => &values[entry.window()],
            Resolved::Objects(_) => &[],
        }
    }

    /// Size of a match's full result, regardless of paging.
    pub fn total_of(&self, m: &DomainObjectMatch) -> usize {
        self.entry(m).map_or(0, |e| e.resolved.len())
    }

    /// Show `count` results starting at `offset`.
    pub fn set_page(&mut self, m: &DomainObjectMatch, offset: usize, count: usize) {
        if m.query != self.query {
            return;
        }
        if let Some(entry) = self.entries.get_mut(m.index()) {
            entry.page = Some((offset, count));
        }
    }

    /// Show the full result again.
    pub fn clear_page(&mut self, m: &DomainObjectMatch) {
        if m.query != self.query {
            return;
        }
        if let Some(entry) = self.entries.get_mut(m.index()) {
            entry.page = None;
        }
    }
}

/// Cardinalities of the matches of one executed query.
#[derive(Debug, Clone)]
pub struct CountQueryResult {
    query: uuid::Uuid,
    counts: Vec<usize>,
}

impl CountQueryResult {
    pub fn count_of(&self, m: &DomainObjectMatch) -> usize {
        if m.query != self.query {
            return 0;
        }
        self.counts.get(m.index()).copied().unwrap_or(0)
    }
}

impl DomainAccess {
    /// Create an empty query.
    pub fn create_query(&self) -> DomainQuery {
        DomainQuery::new()
    }

    /// Run a query and materialize every match.
    ///
    /// Objects are loaded into this handle at the configured resolution
    /// depth. Either every match resolves or the call fails.
    pub fn execute(&mut self, query: &DomainQuery) -> Result<DomainQueryResult> {
        let (bounds, mut records) =
            resolve_query(&self.conn, &self.registry, &self.domain, query)?;

        let mut seen = HashSet::new();
        let mut needed = Vec::new();
        for bound in &bounds {
            if let Bound::Nodes(ids) = bound {
                for id in ids {
                    if seen.insert(*id) {
                        if let Some(record) = records.remove(id) {
                            needed.push(record);
                        }
                    }
                }
            }
        }
        let loaded = self.resolve_records(needed, self.resolution_depth)?;

        let entries = bounds
            .into_iter()
            .zip(&query.matches)
            .map(|(bound, def)| {
                let resolved = match bound {
                    Bound::Nodes(ids) => Resolved::Objects(
                        ids.iter().filter_map(|id| loaded.get(id).copied()).collect(),
                    ),
                    Bound::Values(values) => {
                        Resolved::Values(values.into_iter().map(Value::Scalar).collect())
                    }
                };
                Entry {
                    resolved,
                    page: def.page,
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            domain = %self.domain,
            query = %query.id(),
            matches = entries.len(),
            objects = loaded.len(),
            "Query executed"
        );
        Ok(DomainQueryResult {
            query: query.id(),
            entries,
        })
    }

    /// Run a query and report only how many elements each match holds.
    pub fn execute_count(&self, query: &DomainQuery) -> Result<CountQueryResult> {
        let (bounds, _) = resolve_query(&self.conn, &self.registry, &self.domain, query)?;
        Ok(CountQueryResult {
            query: query.id(),
            counts: bounds.iter().map(Bound::len).collect(),
        })
    }
}
