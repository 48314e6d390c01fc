//! Search index queries over committed state.

use objdb_core::{Config, CoreError, Criterion, ObjId, Value};
use objdb_testkit::prelude::*;
use objdb_testkit::people::*;
use std::collections::BTreeSet;

fn set(ids: &[ObjId]) -> BTreeSet<ObjId> {
    ids.iter().copied().collect()
}

fn person_aged(db: &TestDatabase, age: i64) -> ObjId {
    db.transaction(|s| {
        let id = s.create_obj(PERSON, None)?;
        s.set_fld_value(id, AGE, &Value::from(age).encode())?;
        Ok(id)
    })
    .unwrap()
}

#[test]
fn exact_matches_whole_values_only() {
    let db = TestDatabase::people();
    let hit = create_person(&db, "Barbapapa");
    create_person(&db, "Barbapapa Ba");
    create_person(&db, "Foo");

    let hits = db.search(NAME, &Criterion::Exact("Barbapapa".into())).unwrap();
    assert_eq!(hits, set(&[hit]));
}

#[test]
fn prefix_and_postfix() {
    let db = TestDatabase::people();
    let barba = create_person(&db, "Barbapapa");
    let barbe = create_person(&db, "Barbe");
    let mama = create_person(&db, "Barbamama");

    assert_eq!(
        db.search(NAME, &Criterion::Prefix("Barba".into())).unwrap(),
        set(&[barba, mama])
    );
    assert_eq!(
        db.search(NAME, &Criterion::Prefix("Barb".into())).unwrap(),
        set(&[barba, barbe, mama])
    );
    assert_eq!(
        db.search(NAME, &Criterion::Postfix("papa".into())).unwrap(),
        set(&[barba])
    );
    assert_eq!(
        db.search(NAME, &Criterion::Postfix("ma".into())).unwrap(),
        set(&[mama])
    );
}

#[test]
fn substring_verifies_adjacency() {
    let db = TestDatabase::people();
    create_person(&db, "oooHooo");
    let hit = create_person(&db, "oooooo");

    let hits = db.search(NAME, &Criterion::Substring("oooo".into())).unwrap();
    assert_eq!(hits, set(&[hit]));
}

#[test]
fn short_substrings_scan_all_values() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let jada = create_person(&db, "Jada");
    create_person(&db, "Bob");

    let hits = db.search(NAME, &Criterion::Substring("da".into())).unwrap();
    assert_eq!(hits, set(&[ada, jada]));
}

#[test]
fn substring_handles_non_ascii_text() {
    let db = TestDatabase::people();
    let hit = create_person(&db, "Grüße aus Köln");
    create_person(&db, "Gruesse aus Koeln");

    let hits = db.search(NAME, &Criterion::Substring("ße aus Kö".into())).unwrap();
    assert_eq!(hits, set(&[hit]));
}

#[test]
fn fuzzy_uses_cutoff() {
    let db = TestDatabase::people();
    let exact = create_person(&db, "Barbapapa");
    let close = create_person(&db, "Barbapapu");
    create_person(&db, "Foo");

    assert_eq!(
        db.search(
            NAME,
            &Criterion::Fuzzy {
                text: "Barbapapa".into(),
                cutoff: None,
            }
        )
        .unwrap(),
        set(&[exact, close])
    );
    assert_eq!(
        db.search(
            NAME,
            &Criterion::Fuzzy {
                text: "Barbapapa".into(),
                cutoff: Some(1.0),
            }
        )
        .unwrap(),
        set(&[exact])
    );
    assert!(matches!(
        db.search(
            NAME,
            &Criterion::Fuzzy {
                text: "x".into(),
                cutoff: Some(1.5),
            }
        ),
        Err(CoreError::InvalidArgument { .. })
    ));
}

#[test]
fn configured_fuzzy_cutoff_applies() {
    let db = TestDatabase::with_config(Config::default().fuzzy_cutoff(0.3));
    let hit = create_person(&db, "Barbapapa");
    let fuzzy = Criterion::Fuzzy {
        text: "Barbxxxxa".into(),
        cutoff: None,
    };
    assert_eq!(db.search(NAME, &fuzzy).unwrap(), set(&[hit]));
}

#[test]
fn integer_ranges_compare_numerically() {
    let db = TestDatabase::people();
    let minus = person_aged(&db, -5);
    let nine = person_aged(&db, 9);
    let ten = person_aged(&db, 10);
    let hundred = person_aged(&db, 100);

    let range = |min: Option<i64>, max: Option<i64>| Criterion::Range {
        min: min.map(Value::from),
        max: max.map(Value::from),
    };
    assert_eq!(
        db.search(AGE, &range(Some(9), Some(10))).unwrap(),
        set(&[nine, ten])
    );
    assert_eq!(
        db.search(AGE, &range(None, Some(9))).unwrap(),
        set(&[minus, nine])
    );
    assert_eq!(
        db.search(AGE, &range(Some(10), None)).unwrap(),
        set(&[ten, hundred])
    );
    assert_eq!(
        db.search(AGE, &range(None, None)).unwrap(),
        set(&[minus, nine, ten, hundred])
    );
}

#[test]
fn string_ranges_compare_bytewise() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let bob = create_person(&db, "Bob");
    create_person(&db, "Cy");

    let hits = db
        .search(
            NAME,
            &Criterion::Range {
                min: Some(Value::from("A")),
                max: Some(Value::from("Bz")),
            },
        )
        .unwrap();
    assert_eq!(hits, set(&[ada, bob]));
}

#[test]
fn updates_replace_old_entries() {
    let db = TestDatabase::people();
    let id = create_person(&db, "Ada");

    db.transaction(|s| s.set_fld_value(id, NAME, &Value::from("Grace").encode()))
        .unwrap();

    assert!(db.search(NAME, &Criterion::Exact("Ada".into())).unwrap().is_empty());
    assert!(db.search(NAME, &Criterion::Substring("Ada".into())).unwrap().is_empty());
    assert!(db.search(NAME, &Criterion::Postfix("da".into())).unwrap().is_empty());
    assert_eq!(
        db.search(NAME, &Criterion::Exact("Grace".into())).unwrap(),
        set(&[id])
    );
}

#[test]
fn deleted_objects_leave_the_index() {
    let db = TestDatabase::people();
    let id = create_person(&db, "Ada");
    db.transaction(|s| s.delete_obj(id)).unwrap();

    assert!(db.search(NAME, &Criterion::Prefix(String::new())).unwrap().is_empty());
}

#[test]
fn uncommitted_changes_are_invisible() {
    let db = TestDatabase::people();
    let mut s = db.session().unwrap();
    let id = s.create_obj(PERSON, None).unwrap();
    s.set_fld_value(id, NAME, &Value::from("Ada").encode()).unwrap();

    assert!(s.search(NAME, &Criterion::Exact("Ada".into())).unwrap().is_empty());
    s.commit().unwrap();
    assert_eq!(
        s.search(NAME, &Criterion::Exact("Ada".into())).unwrap(),
        set(&[id])
    );
}

#[test]
fn invalid_queries_are_rejected() {
    let db = TestDatabase::people();
    assert!(matches!(
        db.search(NICKNAME, &Criterion::Exact("x".into())),
        Err(CoreError::InvalidArgument { .. })
    ));
    assert!(matches!(
        db.search(AGE, &Criterion::Prefix("1".into())),
        Err(CoreError::TypeMismatch { .. })
    ));
    assert!(matches!(
        db.search(
            AGE,
            &Criterion::Range {
                min: Some(Value::from("a")),
                max: None,
            }
        ),
        Err(CoreError::TypeMismatch { .. })
    ));
}

#[test]
fn rebuild_reproduces_the_index() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let bob = create_person(&db, "Bob");

    assert_eq!(db.rebuild_search(NAME).unwrap(), 2);
    assert_eq!(
        db.search(NAME, &Criterion::Prefix(String::new())).unwrap(),
        set(&[ada, bob])
    );
    assert_eq!(
        db.search(NAME, &Criterion::Substring("Bob".into())).unwrap(),
        set(&[bob])
    );
    assert!(matches!(
        db.rebuild_search(NICKNAME),
        Err(CoreError::InvalidArgument { .. })
    ));
}

#[test]
fn disabled_search_indexes_nothing() {
    let db = TestDatabase::with_config(Config::default().search_enabled(false));
    let id = create_person(&db, "Ada");
    assert!(db.search(NAME, &Criterion::Exact("Ada".into())).unwrap().is_empty());

    db.rebuild_search(NAME).unwrap();
    assert_eq!(
        db.search(NAME, &Criterion::Exact("Ada".into())).unwrap(),
        set(&[id])
    );
}
