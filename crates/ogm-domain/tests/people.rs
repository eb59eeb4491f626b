//! End-to-end tests of mapping, queries and transactions over the
//! in-memory store, using a small people and geography domain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ogm_core::{
    graph_equals, ClassBuilder, EnumBuilder, EnumValue, ModelError, ObjRef, ScalarType,
    TypeKind, TypeRegistry, Value,
};
use ogm_domain::{
    Connection, DomainAccess, DomainError, DomainInformation, DomainQuery, SyncState,
};
use ogm_graph::{
    GraphStore, MemoryStore, PropertyValue, Statement, StatementResult, StoreError, TxId,
};

const DOMAIN: &str = "PEOPLE-DOMAIN";

// ── Fixture ──────────────────────────────────────────────────────

fn build_model(types: &mut TypeRegistry) -> Result<(), ModelError> {
    EnumBuilder::new("geo.AreaType")
        .value("CONTINENT")
        .value("COUNTRY")
        .value("STATE")
        .value("CITY")
        .build(types)?;
    ClassBuilder::new("geo.Area")
        .field("name", "String")
        .field("areaType", "geo.AreaType")
        .field("partOf", "geo.Area")
        .build(types)?;
    EnumBuilder::new("people.Gender")
        .value("MALE")
        .value("FEMALE")
        .build(types)?;
    ClassBuilder::new("people.Address")
        .field("street", "String")
        .field("number", "Integer")
        .field("area", "geo.Area")
        .build(types)?;
    ClassBuilder::new("people.Subject")
        .set_abstract()
        .build(types)?;
    ClassBuilder::new("people.Person")
        .super_type("people.Subject")
        .field("firstName", "String")
        .field("lastName", "String")
        .field("gender", "people.Gender")
        .field("birthDate", "Date")
        .list_field("nicknames", "String")
        .list_field("addresses", "people.Address")
        .field("mother", "people.Person")
        .field("father", "people.Person")
        .field("spouse", "people.Person")
        .build(types)?;
    ClassBuilder::new("people.Company")
        .super_type("people.Subject")
        .field("name", "String")
        .list_field("addresses", "people.Address")
        .build(types)?;
    Ok(())
}

/// A handle on the people domain, defining the model unless the store
/// already provides it.
fn open(conn: &Connection) -> DomainAccess {
    let mut access = DomainAccess::new(conn, DOMAIN).unwrap();
    if !access.types().contains("people.Person") {
        build_model(access.types_mut()).unwrap();
    }
    access
}

struct People {
    john: ObjRef,
    caroline: ObjRef,
    angelina: ObjRef,
    jeremy: ObjRef,
    christa: ObjRef,
    max: ObjRef,
    company: ObjRef,
    munich: ObjRef,
}

impl People {
    fn persons(&self) -> Vec<ObjRef> {
        vec![
            self.john,
            self.caroline,
            self.angelina,
            self.jeremy,
            self.christa,
            self.max,
        ]
    }
}

fn area(access: &mut DomainAccess, name: &str, kind: &str, part_of: Option<ObjRef>) -> ObjRef {
    let a = access.create_object("geo.Area").unwrap();
    access.set_field(a, "name", name).unwrap();
    access
        .set_field(a, "areaType", EnumValue::new("geo.AreaType", kind))
        .unwrap();
    if let Some(parent) = part_of {
        access.set_field(a, "partOf", parent).unwrap();
    }
    a
}

fn address(access: &mut DomainAccess, street: &str, number: i64, area: ObjRef) -> ObjRef {
    let a = access.create_object("people.Address").unwrap();
    access.set_field(a, "street", street).unwrap();
    access.set_field(a, "number", number).unwrap();
    access.set_field(a, "area", area).unwrap();
    a
}

fn person(
    access: &mut DomainAccess,
    first: &str,
    last: &str,
    gender: &str,
    addresses: &[ObjRef],
) -> ObjRef {
    let p = access.create_object("people.Person").unwrap();
    access.set_field(p, "firstName", first).unwrap();
    access.set_field(p, "lastName", last).unwrap();
    access
        .set_field(p, "gender", EnumValue::new("people.Gender", gender))
        .unwrap();
    for a in addresses {
        access.add_list_value(p, "addresses", *a).unwrap();
    }
    p
}

fn populate(access: &mut DomainAccess) -> People {
    let europe = area(access, "Europe", "CONTINENT", None);
    let germany = area(access, "Germany", "COUNTRY", Some(europe));
    let bavaria = area(access, "Bavaria", "STATE", Some(germany));
    let munich = area(access, "Munich", "CITY", Some(bavaria));
    let austria = area(access, "Austria", "COUNTRY", Some(europe));
    let vienna = area(access, "Vienna", "CITY", Some(austria));

    let karlsplatz = address(access, "Karlsplatz", 1, munich);
    let stephansplatz = address(access, "Stephansplatz", 2, vienna);
    let marienplatz = address(access, "Marienplatz", 3, munich);

    let john = person(access, "John", "Smith", "MALE", &[karlsplatz, stephansplatz]);
    let birth = Utc.with_ymd_and_hms(1940, 2, 12, 0, 0, 0).unwrap();
    access.set_field(john, "birthDate", birth).unwrap();
    let caroline = person(access, "Caroline", "Smith", "FEMALE", &[karlsplatz]);
    access.set_field(john, "spouse", caroline).unwrap();
    access.set_field(caroline, "spouse", john).unwrap();
    let angelina = person(access, "Angelina", "Smith", "FEMALE", &[karlsplatz]);
    let jeremy = person(access, "Jeremy", "Smith", "MALE", &[karlsplatz]);
    for child in [angelina, jeremy] {
        access.set_field(child, "mother", caroline).unwrap();
        access.set_field(child, "father", john).unwrap();
    }
    let christa = person(access, "Christa", "Berghammer", "FEMALE", &[marienplatz]);
    let max = person(access, "Max", "Berghammer", "MALE", &[marienplatz]);

    let company = access.create_object("people.Company").unwrap();
    access.set_field(company, "name", "Global Company").unwrap();
    access.add_list_value(company, "addresses", stephansplatz).unwrap();

    let people = People {
        john,
        caroline,
        angelina,
        jeremy,
        christa,
        max,
        company,
        munich,
    };
    let mut roots = people.persons();
    roots.push(company);
    access.store_all(&roots).unwrap();
    people
}

fn stored_fixture() -> (Connection, DomainAccess, People) {
    let conn = Connection::in_memory();
    let mut access = open(&conn);
    let people = populate(&mut access);
    (conn, access, people)
}

fn text(access: &DomainAccess, obj: ObjRef, field: &str) -> String {
    access
        .object(obj)
        .unwrap()
        .str_value(field)
        .unwrap_or_default()
        .to_string()
}

fn full_names(access: &DomainAccess, objs: &[ObjRef]) -> Vec<String> {
    objs.iter()
        .map(|o| format!("{} {}", text(access, *o, "firstName"), text(access, *o, "lastName")))
        .collect()
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

fn node_id(access: &DomainAccess, obj: ObjRef) -> i64 {
    access.sync_info(obj).unwrap().node_id.unwrap()
}

// ── Mapping ──────────────────────────────────────────────────────

#[test]
fn test_round_trip_through_fresh_handle() {
    let (conn, access, people) = stored_fixture();
    let ids: Vec<i64> = people
        .persons()
        .iter()
        .map(|p| node_id(&access, *p))
        .collect();

    let mut fresh = DomainAccess::new(&conn, DOMAIN).unwrap();
    assert!(fresh.types().contains("people.Person"));
    let loaded = fresh.load_by_ids(&ids, -1).unwrap();

    assert_eq!(loaded.len(), 6);
    assert!(graph_equals(
        access.graph(),
        &people.persons(),
        fresh.graph(),
        &loaded
    ));
    assert_eq!(
        full_names(&fresh, &loaded),
        full_names(&access, &people.persons())
    );
}

#[test]
fn test_cycle_is_preserved() {
    let (conn, access, people) = stored_fixture();
    let mut fresh = DomainAccess::new(&conn, DOMAIN).unwrap();
    let john = fresh
        .load_by_id(node_id(&access, people.john), -1)
        .unwrap()
        .unwrap();

    let caroline = fresh.object(john).unwrap().object("spouse").unwrap();
    let back = fresh.object(caroline).unwrap().object("spouse").unwrap();
    assert_eq!(back, john);
    assert_eq!(text(&fresh, caroline, "firstName"), "Caroline");
}

#[test]
fn test_john_smith_addresses_in_order() {
    let conn = Connection::in_memory();
    let mut access = open(&conn);
    let munich = area(&mut access, "Munich", "CITY", None);
    let first = address(&mut access, "Karlsplatz", 1, munich);
    let second = address(&mut access, "Stephansplatz", 2, munich);
    let john = person(&mut access, "John", "Smith", "MALE", &[first, second]);
    access.store(john).unwrap();

    let mut fresh = DomainAccess::new(&conn, DOMAIN).unwrap();
    let loaded = fresh
        .load_by_id(node_id(&access, john), -1)
        .unwrap()
        .unwrap();
    let addresses = fresh.object(loaded).unwrap().list("addresses").to_vec();
    assert_eq!(addresses.len(), 2);
    let streets: Vec<String> = addresses
        .iter()
        .filter_map(Value::as_object)
        .map(|a| text(&fresh, a, "street"))
        .collect();
    assert_eq!(streets, vec!["Karlsplatz", "Stephansplatz"]);
}

#[test]
fn test_shallow_load_keeps_stored_references() {
    let (conn, access, people) = stored_fixture();
    let john_id = node_id(&access, people.john);

    let mut shallow = DomainAccess::new(&conn, DOMAIN).unwrap();
    let john = shallow.load_by_id(john_id, 0).unwrap().unwrap();
    assert!(!shallow.object(john).unwrap().is_set("addresses"));
    shallow.set_field(john, "firstName", "Johnny").unwrap();
    shallow.store(john).unwrap();

    let mut deep = DomainAccess::new(&conn, DOMAIN).unwrap();
    let john = deep.load_by_id(john_id, -1).unwrap().unwrap();
    assert_eq!(text(&deep, john, "firstName"), "Johnny");
    assert_eq!(deep.object(john).unwrap().list("addresses").len(), 2);
}

#[test]
fn test_empty_reference_list_round_trips() {
    let conn = Connection::in_memory();
    let mut access = open(&conn);
    let homeless = person(&mut access, "Max", "Muster", "MALE", &[]);
    access
        .graph_mut()
        .set_list(homeless, "addresses", Vec::new())
        .unwrap();
    let unknown = person(&mut access, "Erika", "Muster", "FEMALE", &[]);
    access.store_all(&[homeless, unknown]).unwrap();
    let ids = [node_id(&access, homeless), node_id(&access, unknown)];

    let mut fresh = DomainAccess::new(&conn, DOMAIN).unwrap();
    let loaded = fresh.load_by_ids(&ids, -1).unwrap();
    let max = fresh.object(loaded[0]).unwrap();
    assert!(max.is_set("addresses"));
    assert!(max.list("addresses").is_empty());
    assert!(!fresh.object(loaded[1]).unwrap().is_set("addresses"));
    assert!(graph_equals(
        access.graph(),
        &[homeless, unknown],
        fresh.graph(),
        &loaded
    ));
    assert_eq!(fresh.sync_info(loaded[0]).unwrap().state, SyncState::Clean);

    let mut shallow = DomainAccess::new(&conn, DOMAIN).unwrap();
    let max = shallow.load_by_id(ids[0], 0).unwrap().unwrap();
    assert!(shallow.object(max).unwrap().is_set("addresses"));

    // Filling the list later drops the empty marker.
    let munich = area(&mut access, "Munich", "CITY", None);
    let street = address(&mut access, "Karlsplatz", 1, munich);
    access.add_list_value(homeless, "addresses", street).unwrap();
    access.store(homeless).unwrap();
    let mut again = DomainAccess::new(&conn, DOMAIN).unwrap();
    let max = again.load_by_id(ids[0], -1).unwrap().unwrap();
    assert_eq!(again.object(max).unwrap().list("addresses").len(), 1);
}

#[test]
fn test_load_depth_follows_exact_hops() {
    let (conn, access, people) = stored_fixture();
    let munich_id = node_id(&access, people.munich);

    let mut one = DomainAccess::new(&conn, DOMAIN).unwrap();
    let munich = one.load_by_id(munich_id, 1).unwrap().unwrap();
    let bavaria = one.object(munich).unwrap().object("partOf").unwrap();
    assert_eq!(text(&one, bavaria, "name"), "Bavaria");
    assert!(!one.object(bavaria).unwrap().is_set("partOf"));

    let mut two = DomainAccess::new(&conn, DOMAIN).unwrap();
    let munich = two.load_by_id(munich_id, 2).unwrap().unwrap();
    let bavaria = two.object(munich).unwrap().object("partOf").unwrap();
    let germany = two.object(bavaria).unwrap().object("partOf").unwrap();
    assert_eq!(text(&two, germany, "name"), "Germany");
    assert!(!two.object(germany).unwrap().is_set("partOf"));
}

/// A memory store that rejects the write batch of a node with a given name
/// while `failing` is set.
struct RejectingStore {
    inner: MemoryStore,
    name: &'static str,
    failing: AtomicBool,
}

impl RejectingStore {
    fn rejects(&self, statements: &[Statement]) -> bool {
        self.failing.load(Ordering::SeqCst)
            && statements.iter().any(|s| {
                matches!(s, Statement::SetProperties { properties, .. }
                    if properties.get("name") == Some(&PropertyValue::from(self.name)))
            })
    }
}

impl GraphStore for RejectingStore {
    fn execute(
        &self,
        tx: Option<TxId>,
        statements: &[Statement],
    ) -> Result<Vec<StatementResult>, StoreError> {
        if self.rejects(statements) {
            return Err(StoreError::Query(format!("cannot write {}", self.name)));
        }
        self.inner.execute(tx, statements)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear()
    }

    fn begin(&self) -> Result<TxId, StoreError> {
        self.inner.begin()
    }

    fn commit(&self, tx: TxId) -> Result<(), StoreError> {
        self.inner.commit(tx)
    }

    fn rollback(&self, tx: TxId) -> Result<(), StoreError> {
        self.inner.rollback(tx)
    }
}

#[test]
fn test_failed_store_keeps_earlier_objects() {
    let store = Arc::new(RejectingStore {
        inner: MemoryStore::new(),
        name: "Germany",
        failing: AtomicBool::new(true),
    });
    let conn = Connection::new(store.clone());
    let mut access = open(&conn);
    let europe = area(&mut access, "Europe", "CONTINENT", None);
    let germany = area(&mut access, "Germany", "COUNTRY", Some(europe));
    let bavaria = area(&mut access, "Bavaria", "STATE", Some(germany));

    // Written breadth-first from the root: Bavaria, then Germany.
    let err = access.store(bavaria).unwrap_err();
    assert!(matches!(err, DomainError::StoreExecution { .. }));
    assert_eq!(
        err.causes(),
        &[StoreError::Query("cannot write Germany".to_string())]
    );

    let bavaria_id = node_id(&access, bavaria);
    let mut fresh = DomainAccess::new(&conn, DOMAIN).unwrap();
    assert_eq!(fresh.number_of_instances_of("geo.Area").unwrap(), 3);
    let loaded = fresh.load_by_id(bavaria_id, -1).unwrap().unwrap();
    let parent = fresh.object(loaded).unwrap().object("partOf").unwrap();
    assert_eq!(text(&fresh, parent, "name"), "Germany");
    assert!(!fresh.object(parent).unwrap().is_set("partOf"));

    // Storing again once the store recovers completes the graph.
    store.failing.store(false, Ordering::SeqCst);
    access.store(bavaria).unwrap();
    let mut after = DomainAccess::new(&conn, DOMAIN).unwrap();
    let loaded = after.load_by_id(bavaria_id, -1).unwrap().unwrap();
    let parent = after.object(loaded).unwrap().object("partOf").unwrap();
    let root = after.object(parent).unwrap().object("partOf").unwrap();
    assert_eq!(text(&after, root, "name"), "Europe");
}

#[test]
fn test_instances_by_type() {
    let (conn, _access, _people) = stored_fixture();
    let mut fresh = DomainAccess::new(&conn, DOMAIN).unwrap();

    assert_eq!(fresh.number_of_instances_of("people.Person").unwrap(), 6);
    assert_eq!(fresh.number_of_instances_of("people.Subject").unwrap(), 7);
    assert_eq!(fresh.number_of_instances_of("geo.Area").unwrap(), 6);

    let all = fresh.load_by_type("people.Person", 0, 0, -1).unwrap();
    assert_eq!(all.len(), 6);
    let page = fresh.load_by_type("people.Person", 0, 2, 2).unwrap();
    assert_eq!(page, all[2..4].to_vec());
}

#[test]
fn test_sync_info_states() {
    let conn = Connection::in_memory();
    let mut access = open(&conn);
    let munich = area(&mut access, "Munich", "CITY", None);
    assert_eq!(access.sync_info(munich).unwrap().state, SyncState::New);
    assert!(access.sync_info(munich).unwrap().node_id.is_none());

    access.store(munich).unwrap();
    let info = access.sync_info(munich).unwrap();
    assert_eq!(info.state, SyncState::Clean);
    assert!(info.node_id.is_some());

    access.set_field(munich, "name", "München").unwrap();
    assert_eq!(access.sync_info(munich).unwrap().state, SyncState::Dirty);
    access.store(munich).unwrap();
    assert_eq!(access.sync_info(munich).unwrap().state, SyncState::Clean);
    assert_eq!(access.sync_info(munich).unwrap().node_id, info.node_id);
}

// ── Queries ──────────────────────────────────────────────────────

#[test]
fn test_predicate_order_does_not_matter() {
    let (_conn, mut access, people) = stored_fixture();

    let mut q = DomainQuery::new();
    let smiths = q.create_match("people.Person");
    q.where_(smiths.attribute("lastName")).equals("Smith");
    q.where_(smiths.attribute("firstName")).equals("John");
    let first = access.execute(&q).unwrap();

    let mut q2 = DomainQuery::new();
    let smiths2 = q2.create_match("people.Person");
    q2.where_(smiths2.attribute("firstName")).equals("John");
    q2.where_(smiths2.attribute("lastName")).equals("Smith");
    let second = access.execute(&q2).unwrap();

    assert_eq!(first.result_of(&smiths), &[people.john]);
    assert_eq!(second.result_of(&smiths2), &[people.john]);
    assert_eq!(access.execute_count(&q).unwrap().count_of(&smiths), 1);
}

#[test]
fn test_brackets_group_alternatives() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.where_(m.attribute("lastName")).equals("Smith");
    q.br_open();
    q.where_(m.attribute("firstName")).equals("Angelina");
    q.or();
    q.where_(m.attribute("firstName")).equals("Jeremy");
    q.br_close();
    let result = access.execute(&q).unwrap();
    assert_eq!(
        sorted(full_names(&access, result.result_of(&m))),
        vec!["Angelina Smith", "Jeremy Smith"]
    );

    // Without brackets AND binds first: (Berghammer AND Angelina) OR Jeremy.
    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.where_(m.attribute("lastName")).equals("Berghammer");
    q.where_(m.attribute("firstName")).equals("Angelina");
    q.or();
    q.where_(m.attribute("firstName")).equals("Jeremy");
    let result = access.execute(&q).unwrap();
    assert_eq!(full_names(&access, result.result_of(&m)), vec!["Jeremy Smith"]);

    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.where_(m.attribute("lastName")).equals("Berghammer");
    q.br_open();
    q.where_(m.attribute("firstName")).equals("Angelina");
    q.or();
    q.where_(m.attribute("firstName")).equals("Jeremy");
    q.br_close();
    assert_eq!(access.execute_count(&q).unwrap().count_of(&m), 0);
}

#[test]
fn test_negation_and_comparisons() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.not();
    q.where_(m.attribute("lastName")).equals("Smith");
    let result = access.execute(&q).unwrap();
    assert_eq!(
        sorted(full_names(&access, result.result_of(&m))),
        vec!["Christa Berghammer", "Max Berghammer"]
    );

    let mut q = DomainQuery::new();
    let born = q.create_match("people.Person");
    q.where_(born.attribute("birthDate")).is_null();
    let unborn_count = access.execute_count(&q).unwrap().count_of(&born);
    assert_eq!(unborn_count, 5);

    let mut q = DomainQuery::new();
    let streets = q.create_match("people.Address");
    q.where_(streets.attribute("number")).gte(2);
    q.where_(streets.attribute("number")).lt(3);
    let result = access.execute(&q).unwrap();
    let names: Vec<String> = result
        .result_of(&streets)
        .iter()
        .map(|a| text(&access, *a, "street"))
        .collect();
    assert_eq!(names, vec!["Stephansplatz"]);

    let mut q = DomainQuery::new();
    let women = q.create_match("people.Person");
    q.where_(women.attribute("gender"))
        .equals(EnumValue::new("people.Gender", "FEMALE"));
    assert_eq!(access.execute_count(&q).unwrap().count_of(&women), 3);
}

#[test]
fn test_multi_key_ordering() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.order(&m).by("lastName").by("firstName").descending();
    let result = access.execute(&q).unwrap();

    assert_eq!(
        full_names(&access, result.result_of(&m)),
        vec![
            "Max Berghammer",
            "Christa Berghammer",
            "John Smith",
            "Jeremy Smith",
            "Caroline Smith",
            "Angelina Smith",
        ]
    );
}

#[test]
fn test_pages_reuse_resolved_result() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.order(&m).by("lastName").by("firstName").descending();
    q.set_page(&m, 1, 2);
    let mut result = access.execute(&q).unwrap();
    assert_eq!(
        full_names(&access, result.result_of(&m)),
        vec!["Christa Berghammer", "John Smith"]
    );

    // A person added later does not show up in pages of this result.
    let extra = person(&mut access, "Zoe", "Adams", "FEMALE", &[]);
    access.store(extra).unwrap();

    result.set_page(&m, 4, 10);
    assert_eq!(
        full_names(&access, result.result_of(&m)),
        vec!["Caroline Smith", "Angelina Smith"]
    );
    assert_eq!(result.total_of(&m), 6);
    result.clear_page(&m);
    assert_eq!(result.result_of(&m).len(), 6);
}

#[test]
fn test_union_and_intersection() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let smiths = q.create_match("people.Person");
    q.where_(smiths.attribute("lastName")).equals("Smith");
    let women = q.create_match("people.Person");
    q.where_(women.attribute("gender"))
        .equals(EnumValue::new("people.Gender", "FEMALE"));
    let either = q.union(&[smiths, women]);
    let both = q.intersection(&[smiths, women]);
    let both_reversed = q.intersection(&[women, smiths]);
    let result = access.execute(&q).unwrap();

    assert_eq!(result.result_of(&either).len(), 5);
    assert_eq!(
        sorted(full_names(&access, result.result_of(&both))),
        vec!["Angelina Smith", "Caroline Smith"]
    );
    assert_eq!(
        sorted(full_names(&access, result.result_of(&both))),
        sorted(full_names(&access, result.result_of(&both_reversed)))
    );
}

#[test]
fn test_unbounded_distance_finds_all_ancestors() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let munich = q.create_match("geo.Area");
    q.where_(munich.attribute("name")).equals("Munich");
    let ancestors = q
        .traverse_from(&munich)
        .forth("partOf")
        .distance(1, -1)
        .to("geo.Area");
    let parent = q.traverse_from(&munich).forth("partOf").to("geo.Area");
    let result = access.execute(&q).unwrap();

    let names = |objs: &[ObjRef]| -> Vec<String> {
        objs.iter().map(|a| text(&access, *a, "name")).collect()
    };
    assert_eq!(
        sorted(names(result.result_of(&ancestors))),
        vec!["Bavaria", "Europe", "Germany"]
    );
    assert_eq!(names(result.result_of(&parent)), vec!["Bavaria"]);
}

#[test]
fn test_backward_traversal_to_super_type() {
    let (_conn, mut access, people) = stored_fixture();

    let mut q = DomainQuery::new();
    let vienna = q.create_match("geo.Area");
    q.where_(vienna.attribute("name")).equals("Vienna");
    let subjects = q
        .traverse_from(&vienna)
        .back("area")
        .back("addresses")
        .to("people.Subject");
    let result = access.execute(&q).unwrap();

    let mut found = result.result_of(&subjects).to_vec();
    found.sort();
    let mut expected = vec![people.john, people.company];
    expected.sort();
    assert_eq!(found, expected);
}

#[test]
fn test_select_and_reject_by_count() {
    let (_conn, mut access, people) = stored_fixture();

    let mut q = DomainQuery::new();
    let persons = q.create_match("people.Person");
    let movers = q.select_from(&persons).elements(|q| {
        let addresses = q.traverse_from(&persons).forth("addresses").to("people.Address");
        q.where_(addresses.count()).gt(1);
    });
    let settled = q.reject_from(&persons).elements(|q| {
        let addresses = q.traverse_from(&persons).forth("addresses").to("people.Address");
        q.where_(addresses.count()).gt(1);
    });
    let result = access.execute(&q).unwrap();

    assert_eq!(result.result_of(&movers), &[people.john]);
    assert_eq!(result.result_of(&settled).len(), 5);
    assert!(!result.result_of(&settled).contains(&people.john));
}

#[test]
fn test_select_with_contains_and_in() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let marienplatz = q.create_match("people.Address");
    q.where_(marienplatz.attribute("street")).equals("Marienplatz");
    let persons = q.create_match("people.Person");
    let neighbours = q.select_from(&persons).elements(|q| {
        let addresses = q.traverse_from(&persons).forth("addresses").to("people.Address");
        q.where_(addresses).contains(&marienplatz);
    });

    let smiths = q.create_match("people.Person");
    q.where_(smiths.attribute("lastName")).equals("Smith");
    let women = q.create_match("people.Person");
    q.where_(women.attribute("gender"))
        .equals(EnumValue::new("people.Gender", "FEMALE"));
    q.where_(women).in_(&smiths);
    let result = access.execute(&q).unwrap();

    assert_eq!(
        sorted(full_names(&access, result.result_of(&neighbours))),
        vec!["Christa Berghammer", "Max Berghammer"]
    );
    assert_eq!(
        sorted(full_names(&access, result.result_of(&women))),
        vec!["Angelina Smith", "Caroline Smith"]
    );
}

#[test]
fn test_list_attribute_matches_any_item() {
    let (_conn, mut access, people) = stored_fixture();
    access.add_list_value(people.john, "nicknames", "Jo").unwrap();
    access.add_list_value(people.john, "nicknames", "Johnny").unwrap();
    access.store(people.john).unwrap();

    let mut q = DomainQuery::new();
    let direct = q.create_match("people.Person");
    q.where_(direct.attribute("nicknames")).equals("Jo");
    let all = q.create_match("people.Person");
    let derived = q.union(&[all]);
    q.where_(derived.attribute("nicknames")).equals("Jo");
    let result = access.execute(&q).unwrap();

    assert_eq!(result.result_of(&direct), &[people.john]);
    assert_eq!(result.result_of(&derived), &[people.john]);
}

#[test]
fn test_collect_type_checked_before_execution() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let addresses = q.create_match("people.Address");
    q.collect(addresses.attribute("number")).as_(ScalarType::String);
    assert!(matches!(access.execute(&q), Err(DomainError::QueryBuild(_))));

    let mut q = DomainQuery::new();
    let persons = q.create_match("people.Person");
    let genders = q.collect(persons.attribute("gender")).as_(ScalarType::String);
    let result = access.execute(&q).unwrap();
    assert_eq!(
        sorted(
            result
                .values_of(&genders)
                .iter()
                .filter_map(|v| v.as_scalar().and_then(|s| s.as_str()).map(String::from))
                .collect()
        ),
        vec!["FEMALE", "MALE"]
    );
}

#[test]
fn test_collect_distinct_values() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let persons = q.create_match("people.Person");
    q.order(&persons).by("lastName");
    let last_names = q.collect(persons.attribute("lastName")).as_(ScalarType::String);
    let result = access.execute(&q).unwrap();

    assert_eq!(
        result.values_of(&last_names),
        &[Value::from("Berghammer"), Value::from("Smith")]
    );
    assert!(result.result_of(&last_names).is_empty());
    assert_eq!(access.execute_count(&q).unwrap().count_of(&last_names), 2);
}

#[test]
fn test_chained_queries_start_from_prior_results() {
    let (_conn, mut access, people) = stored_fixture();

    let mut q = DomainQuery::new();
    let johns = q.create_match("people.Person");
    q.where_(johns.attribute("firstName")).equals("John");
    let result = access.execute(&q).unwrap();
    let john = result.result_of(&johns)[0];
    assert_eq!(john, people.john);

    let mut q = DomainQuery::new();
    let seed = q.create_match_for(&access, john);
    let addresses = q.traverse_from(&seed).forth("addresses").to("people.Address");
    let result = access.execute(&q).unwrap();
    let streets: Vec<String> = result
        .result_of(&addresses)
        .iter()
        .map(|a| text(&access, *a, "street"))
        .collect();
    assert_eq!(streets, vec!["Karlsplatz", "Stephansplatz"]);
}

#[test]
fn test_query_results_load_into_fresh_handle() {
    let (conn, _access, _people) = stored_fixture();
    let mut fresh = DomainAccess::new(&conn, DOMAIN).unwrap();

    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.where_(m.attribute("firstName")).equals("Angelina");
    let result = fresh.execute(&q).unwrap();
    let angelina = result.result_of(&m)[0];

    let mother = fresh.object(angelina).unwrap().object("mother").unwrap();
    assert_eq!(text(&fresh, mother, "firstName"), "Caroline");
    let spouse = fresh.object(mother).unwrap().object("spouse").unwrap();
    assert_eq!(text(&fresh, spouse, "firstName"), "John");
}

#[test]
fn test_invalid_queries_fail_before_execution() {
    let (_conn, mut access, _people) = stored_fixture();

    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.where_(m.attribute("shoeSize")).equals(42);
    assert!(matches!(
        access.execute(&q),
        Err(DomainError::UnknownField { .. })
    ));

    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.traverse_from(&m).forth("lastName").to("people.Address");
    assert!(matches!(access.execute(&q), Err(DomainError::QueryBuild(_))));

    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.or();
    q.where_(m.attribute("lastName")).equals("Smith");
    assert!(matches!(
        access.execute_count(&q),
        Err(DomainError::QueryBuild(_))
    ));

    let mut q = DomainQuery::new();
    q.create_match("people.Nobody");
    assert!(matches!(
        access.execute(&q),
        Err(DomainError::Model(ModelError::UnknownType(_)))
    ));
}

// ── Transactions ─────────────────────────────────────────────────

fn count_smiths(access: &DomainAccess) -> usize {
    let mut q = DomainQuery::new();
    let m = q.create_match("people.Person");
    q.where_(m.attribute("lastName")).equals("Smith");
    access.execute_count(&q).unwrap().count_of(&m)
}

#[test]
fn test_rolled_back_store_is_not_visible() {
    let conn = Connection::in_memory();
    let mut writer = open(&conn);
    let reader = open(&conn.share());

    let mut tx = writer.begin_tx().unwrap();
    let john = person(&mut writer, "John", "Smith", "MALE", &[]);
    writer.store(john).unwrap();
    assert_eq!(count_smiths(&writer), 1);
    assert_eq!(count_smiths(&reader), 0);

    tx.failure().unwrap();
    tx.close().unwrap();
    assert_eq!(count_smiths(&writer), 0);
    assert_eq!(count_smiths(&reader), 0);
    assert_eq!(writer.sync_info(john).unwrap().state, SyncState::New);
}

#[test]
fn test_committed_store_becomes_visible() {
    let conn = Connection::in_memory();
    let mut writer = open(&conn);
    let reader = open(&conn.share());

    let mut tx = writer.begin_tx().unwrap();
    let john = person(&mut writer, "John", "Smith", "MALE", &[]);
    writer.store(john).unwrap();
    assert_eq!(count_smiths(&reader), 0);

    tx.close().unwrap();
    assert_eq!(count_smiths(&reader), 1);
    assert_eq!(writer.sync_info(john).unwrap().state, SyncState::Clean);
}

#[test]
fn test_transaction_lifecycle_errors() {
    let conn = Connection::in_memory();
    let access = open(&conn);

    let mut tx = access.begin_tx().unwrap();
    assert!(matches!(
        access.begin_tx(),
        Err(DomainError::TransactionState(_))
    ));
    tx.close().unwrap();
    assert!(matches!(tx.close(), Err(DomainError::TransactionState(_))));
    assert!(matches!(tx.failure(), Err(DomainError::TransactionState(_))));
}

// ── Domain information ───────────────────────────────────────────

#[test]
fn test_domain_information() {
    let (conn, _access, _people) = stored_fixture();

    let domains = DomainInformation::available_domains(&conn).unwrap();
    assert_eq!(domains, vec![DOMAIN.to_string()]);

    let info = DomainInformation::for_domain(&conn, DOMAIN).unwrap();
    let names = info.domain_object_type_names();
    assert!(names.contains(&"people.Person".to_string()));
    assert!(names.contains(&"geo.AreaType".to_string()));

    let types = info.domain_object_types();
    let person = types
        .iter()
        .find(|t| t.type_name == "people.Person")
        .unwrap();
    assert_eq!(person.node_label, "Person");
    assert_eq!(person.kind, TypeKind::Class);
    assert!(person.declared_fields.contains(&"addresses".to_string()));
    assert!(person.fields.contains(&"firstName".to_string()));

    let empty = DomainInformation::for_domain(&conn, "OTHER-DOMAIN").unwrap();
    assert!(empty.domain_object_types().is_empty());
}
