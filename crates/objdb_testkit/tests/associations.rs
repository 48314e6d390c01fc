//! Association behavior across sessions and commits.

use objdb_core::{CoreError, ObjId};
use objdb_testkit::prelude::*;
use objdb_testkit::people::*;

fn company(db: &TestDatabase) -> ObjId {
    db.transaction(|s| s.create_obj(COMPANY, None)).unwrap()
}

#[test]
fn both_halves_are_written() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let bob = create_person(&db, "Bob");

    db.transaction(|s| s.create_aso(ada, FRIENDS, bob, FRIENDS)).unwrap();

    let s = db.read_session().unwrap();
    assert_eq!(s.enumerate_aso(ada, FRIENDS).unwrap(), vec![bob]);
    assert_eq!(s.enumerate_aso(bob, FRIENDS).unwrap(), vec![ada]);
    assert_eq!(s.get_aso_count(ada, FRIENDS).unwrap(), 1);
}

#[test]
fn relinking_an_edge_changes_nothing() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let bob = create_person(&db, "Bob");
    db.transaction(|s| s.create_aso(ada, FRIENDS, bob, FRIENDS)).unwrap();

    let mut s = db.session().unwrap();
    s.create_aso(bob, FRIENDS, ada, FRIENDS).unwrap();
    assert_eq!(s.pending_changes(), 0);
    assert_eq!(s.commit().unwrap(), None);
}

#[test]
fn single_valued_side_is_replaced() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let acme = company(&db);
    let globex = company(&db);

    db.transaction(|s| s.create_aso(ada, EMPLOYER, acme, EMPLOYEES)).unwrap();
    db.transaction(|s| s.create_aso(globex, EMPLOYEES, ada, EMPLOYER)).unwrap();

    let s = db.read_session().unwrap();
    assert_eq!(s.get_single_aso_value(ada, EMPLOYER).unwrap(), globex);
    assert_eq!(s.get_aso_count(ada, EMPLOYER).unwrap(), 1);
    assert!(s.enumerate_aso(acme, EMPLOYEES).unwrap().is_empty());
    assert_eq!(s.enumerate_aso(globex, EMPLOYEES).unwrap(), vec![ada]);
}

#[test]
fn multi_valued_side_accumulates() {
    let db = TestDatabase::people();
    let acme = company(&db);
    let staff: Vec<ObjId> = ["Ada", "Bob", "Cy"]
        .into_iter()
        .map(|name| create_person(&db, name))
        .collect();

    db.transaction(|s| {
        for &person in &staff {
            s.create_aso(acme, EMPLOYEES, person, EMPLOYER)?;
        }
        Ok(())
    })
    .unwrap();

    let s = db.read_session().unwrap();
    let mut expected = staff.clone();
    expected.sort();
    assert_eq!(s.enumerate_aso(acme, EMPLOYEES).unwrap(), expected);
    for person in staff {
        assert_eq!(s.get_single_aso_value(person, EMPLOYER).unwrap(), acme);
    }
}

#[test]
fn deleting_an_object_removes_mirrors() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let bob = create_person(&db, "Bob");
    let cy = create_person(&db, "Cy");
    db.transaction(|s| {
        s.create_aso(ada, FRIENDS, bob, FRIENDS)?;
        s.create_aso(ada, FRIENDS, cy, FRIENDS)?;
        s.create_aso(bob, FRIENDS, cy, FRIENDS)
    })
    .unwrap();

    assert!(db.transaction(|s| s.delete_obj(ada)).unwrap());

    let s = db.read_session().unwrap();
    assert!(s.get_typ_id(ada).unwrap().is_nil());
    assert_eq!(s.enumerate_aso(bob, FRIENDS).unwrap(), vec![cy]);
    assert_eq!(s.enumerate_aso(cy, FRIENDS).unwrap(), vec![bob]);
    assert!(s.enumerate_aso(ada, FRIENDS).unwrap().is_empty());
}

#[test]
fn remove_all_drops_every_edge() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let bob = create_person(&db, "Bob");
    let cy = create_person(&db, "Cy");
    db.transaction(|s| {
        s.create_aso(ada, FRIENDS, bob, FRIENDS)?;
        s.create_aso(ada, FRIENDS, cy, FRIENDS)
    })
    .unwrap();

    let removed = db.transaction(|s| s.remove_all_aso(ada, FRIENDS)).unwrap();
    assert_eq!(removed, 2);

    let s = db.read_session().unwrap();
    assert_eq!(s.get_aso_count(ada, FRIENDS).unwrap(), 0);
    assert_eq!(s.get_aso_count(bob, FRIENDS).unwrap(), 0);
    assert_eq!(s.get_aso_count(cy, FRIENDS).unwrap(), 0);
}

#[test]
fn remove_reports_missing_edges() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let bob = create_person(&db, "Bob");

    let mut s = db.session().unwrap();
    assert!(!s.remove_aso(ada, FRIENDS, bob, FRIENDS).unwrap());
    s.create_aso(ada, FRIENDS, bob, FRIENDS).unwrap();
    assert!(s.remove_aso(bob, FRIENDS, ada, FRIENDS).unwrap());
    assert!(s.enumerate_aso(ada, FRIENDS).unwrap().is_empty());
}

#[test]
fn mismatched_fields_are_rejected() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let bob = create_person(&db, "Bob");
    let acme = company(&db);

    let mut s = db.session().unwrap();
    assert!(matches!(
        s.create_aso(ada, FRIENDS, acme, EMPLOYEES),
        Err(CoreError::TypeMismatch { .. })
    ));
    assert!(matches!(
        s.create_aso(ada, EMPLOYER, bob, FRIENDS),
        Err(CoreError::TypeMismatch { .. })
    ));
    assert!(matches!(
        s.create_aso(ada, NAME, bob, NAME),
        Err(CoreError::TypeMismatch { .. })
    ));
    assert!(matches!(
        s.create_aso(acme, FRIENDS, ada, FRIENDS),
        Err(CoreError::UnknownField { .. })
    ));
    assert!(matches!(
        s.create_aso(ada, FRIENDS, ObjId::from_u128(42), FRIENDS),
        Err(CoreError::ObjectNotFound(_))
    ));
}

#[test]
fn subtypes_inherit_association_fields() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let emp = db.transaction(|s| s.create_obj(EMPLOYEE, None)).unwrap();

    db.transaction(|s| s.create_aso(emp, FRIENDS, ada, FRIENDS)).unwrap();

    let s = db.read_session().unwrap();
    assert_eq!(s.enumerate_aso(ada, FRIENDS).unwrap(), vec![emp]);
}
