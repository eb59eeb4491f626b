//! Walks over object graphs: reachability and structural comparison.

use std::collections::{HashMap, HashSet, VecDeque};

use super::{DomainGraph, FieldValue, ObjRef, Value};

/// Every object reachable from `roots`, each listed once.
///
/// Breadth-first with all roots enqueued first, so roots keep their order at
/// the front of the result. Terminates on cycles.
pub fn reachable(graph: &DomainGraph, roots: &[ObjRef]) -> Vec<ObjRef> {
    let mut visited: HashSet<ObjRef> = HashSet::new();
    let mut queue: VecDeque<ObjRef> = VecDeque::new();
    let mut out = Vec::new();

    for &root in roots {
        if visited.insert(root) {
            queue.push_back(root);
        }
    }

    while let Some(current) = queue.pop_front() {
        let Ok(obj) = graph.get(current) else {
            continue;
        };
        out.push(current);
        for (_, value) in obj.fields() {
            for target in value.object_refs() {
                if visited.insert(target) {
                    queue.push_back(target);
                }
            }
        }
    }

    out
}

/// Structural equality of two object graphs.
///
/// `left[i]` is compared with `right[i]`. Objects are equal when they have
/// the same type, the same set fields with equal scalar/enum values, and
/// references that lead to equal objects, where the pairing of objects is a
/// consistent one-to-one mapping (so cycles and shared references must have
/// the same topology on both sides). The graphs may be different arenas.
pub fn graph_equals(
    left_graph: &DomainGraph,
    left: &[ObjRef],
    right_graph: &DomainGraph,
    right: &[ObjRef],
) -> bool {
    if left.len() != right.len() {
        return false;
    }

    let mut forward: HashMap<ObjRef, ObjRef> = HashMap::new();
    let mut backward: HashMap<ObjRef, ObjRef> = HashMap::new();
    let mut pending: Vec<(ObjRef, ObjRef)> = left.iter().copied().zip(right.iter().copied()).collect();

    while let Some((l, r)) = pending.pop() {
        match (forward.get(&l), backward.get(&r)) {
            (Some(&mapped), _) if mapped != r => return false,
            (_, Some(&mapped)) if mapped != l => return false,
            (Some(_), Some(_)) => continue,
            _ => {}
        }
        forward.insert(l, r);
        backward.insert(r, l);

        let (Ok(lo), Ok(ro)) = (left_graph.get(l), right_graph.get(r)) else {
            return false;
        };
        if lo.type_name() != ro.type_name() {
            return false;
        }
        let lf: Vec<(&str, &FieldValue)> = lo.fields().collect();
        let rf: Vec<(&str, &FieldValue)> = ro.fields().collect();
        if lf.len() != rf.len() {
            return false;
        }
        for ((ln, lv), (rn, rv)) in lf.into_iter().zip(rf) {
            if ln != rn {
                return false;
            }
            let (lvals, rvals) = match (lv, rv) {
                (FieldValue::Single(a), FieldValue::Single(b)) => {
                    (std::slice::from_ref(a), std::slice::from_ref(b))
                }
                (FieldValue::List(a), FieldValue::List(b)) => (a.as_slice(), b.as_slice()),
                _ => return false,
            };
            if lvals.len() != rvals.len() {
                return false;
            }
            for (a, b) in lvals.iter().zip(rvals) {
                match (a, b) {
                    (Value::Object(x), Value::Object(y)) => pending.push((*x, *y)),
                    (Value::Scalar(x), Value::Scalar(y)) if x == y => {}
                    (Value::Enum(x), Value::Enum(y)) if x == y => {}
                    _ => return false,
                }
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassBuilder, TypeRegistry};

    fn registry() -> TypeRegistry {
        let mut reg = TypeRegistry::new();
        ClassBuilder::new("t.Area")
            .field("name", "String")
            .field("partOf", "t.Area")
            .list_field("children", "t.Area")
            .build(&mut reg)
            .unwrap();
        reg
    }

    /// earth <-> europe cycle (partOf / children).
    fn build(g: &mut DomainGraph, reg: &TypeRegistry, europe_name: &str) -> ObjRef {
        let ty = reg.get("t.Area").unwrap();
        let earth = g.create(&ty).unwrap();
        let europe = g.create(&ty).unwrap();
        g.set_field(earth, "name", "Earth").unwrap();
        g.set_field(europe, "name", europe_name).unwrap();
        g.set_field(europe, "partOf", earth).unwrap();
        g.add_list_value(earth, "children", europe).unwrap();
        earth
    }

    #[test]
    fn test_reachable_terminates_on_cycles() {
        let reg = registry();
        let mut g = DomainGraph::new();
        let earth = build(&mut g, &reg, "Europe");
        let all = reachable(&g, &[earth]);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], earth);
    }

    #[test]
    fn test_graph_equals_across_arenas() {
        let reg = registry();
        let mut g1 = DomainGraph::new();
        let mut g2 = DomainGraph::new();
        // Shift handles in the second arena.
        g2.create(&reg.get("t.Area").unwrap()).unwrap();
        let a = build(&mut g1, &reg, "Europe");
        let b = build(&mut g2, &reg, "Europe");
        assert!(graph_equals(&g1, &[a], &g2, &[b]));

        let mut g3 = DomainGraph::new();
        let c = build(&mut g3, &reg, "Asia");
        assert!(!graph_equals(&g1, &[a], &g3, &[c]));
    }

    #[test]
    fn test_graph_equals_checks_topology() {
        let reg = registry();
        let ty = reg.get("t.Area").unwrap();

        // Two children sharing one parent ...
        let mut g1 = DomainGraph::new();
        let p = g1.create(&ty).unwrap();
        let c1 = g1.create(&ty).unwrap();
        let c2 = g1.create(&ty).unwrap();
        g1.set_field(c1, "partOf", p).unwrap();
        g1.set_field(c2, "partOf", p).unwrap();

        // ... versus two children with distinct but equal-looking parents.
        let mut g2 = DomainGraph::new();
        let p1 = g2.create(&ty).unwrap();
        let p2 = g2.create(&ty).unwrap();
        let d1 = g2.create(&ty).unwrap();
        let d2 = g2.create(&ty).unwrap();
        g2.set_field(d1, "partOf", p1).unwrap();
        g2.set_field(d2, "partOf", p2).unwrap();

        assert!(!graph_equals(&g1, &[c1, c2], &g2, &[d1, d2]));
        assert!(graph_equals(&g1, &[c1], &g2, &[d1]));
    }
}
