//! Session semantics: visibility, isolation and error cases.

use objdb_core::{Config, CoreError, DataType, ObjId, Value};
use objdb_testkit::prelude::*;
use objdb_testkit::people::*;

#[test]
fn writes_are_visible_in_session_before_commit() {
    let db = TestDatabase::people();
    let mut s = db.session().unwrap();
    let ada = s.create_obj(PERSON, None).unwrap();
    s.set_fld_value(ada, NAME, &Value::from("Ada").encode()).unwrap();

    assert_eq!(s.get_typ_id(ada).unwrap(), PERSON);
    assert_eq!(
        Value::decode(&s.get_fld_value(ada, NAME).unwrap()).unwrap(),
        Some(Value::from("Ada"))
    );
    assert!(db.read_session().unwrap().get_typ_id(ada).unwrap().is_nil());
}

#[test]
fn read_sessions_keep_their_snapshot() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let reader = db.read_session().unwrap();

    db.transaction(|s| s.set_fld_value(ada, NAME, &Value::from("Grace").encode()))
        .unwrap();
    let bob = create_person(&db, "Bob");

    assert_eq!(
        Value::decode(&reader.get_fld_value(ada, NAME).unwrap()).unwrap(),
        Some(Value::from("Ada"))
    );
    assert!(reader.get_typ_id(bob).unwrap().is_nil());

    let fresh = db.read_session().unwrap();
    assert_eq!(
        Value::decode(&fresh.get_fld_value(ada, NAME).unwrap()).unwrap(),
        Some(Value::from("Grace"))
    );
}

#[test]
fn read_only_sessions_reject_writes() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let mut s = db.read_session().unwrap();
    assert!(s.is_read_only());

    assert!(matches!(s.create_obj(PERSON, None), Err(CoreError::ReadOnly)));
    assert!(matches!(s.delete_obj(ada), Err(CoreError::ReadOnly)));
    assert!(matches!(
        s.set_fld_value(ada, NAME, &Value::from("x").encode()),
        Err(CoreError::ReadOnly)
    ));
    assert!(matches!(
        s.create_aso(ada, FRIENDS, ada, FRIENDS),
        Err(CoreError::ReadOnly)
    ));
    assert!(matches!(s.commit(), Err(CoreError::ReadOnly)));
}

#[test]
fn rollback_discards_pending_changes() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");

    let mut s = db.session().unwrap();
    s.set_fld_value(ada, NAME, &Value::from("Grace").encode()).unwrap();
    let bob = s.create_obj(PERSON, None).unwrap();
    assert!(s.pending_changes() > 0);
    s.rollback();

    assert_eq!(s.pending_changes(), 0);
    assert!(s.get_typ_id(bob).unwrap().is_nil());
    assert_eq!(
        Value::decode(&s.get_fld_value(ada, NAME).unwrap()).unwrap(),
        Some(Value::from("Ada"))
    );
}

#[test]
fn created_then_deleted_objects_leave_nothing_to_commit() {
    let db = TestDatabase::people();
    let mut s = db.session().unwrap();
    let id = s.create_obj(PERSON, None).unwrap();
    s.set_fld_value(id, NAME, &Value::from("Temp").encode()).unwrap();
    assert!(s.delete_obj(id).unwrap());

    assert_eq!(s.pending_changes(), 0);
    assert_eq!(s.commit().unwrap(), None);
}

#[test]
fn fields_are_sparse() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let s = db.read_session().unwrap();

    assert!(s.get_fld_value(ada, AGE).unwrap().is_empty());
    assert!(s.get_fld_value(ada, NICKNAME).unwrap().is_empty());
    assert!(s.get_fld_value(ObjId::from_u128(7), NAME).unwrap().is_empty());
}

#[test]
fn empty_value_unsets_a_field() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    db.transaction(|s| s.set_fld_value(ada, NAME, &[])).unwrap();

    let s = db.read_session().unwrap();
    assert!(s.get_fld_value(ada, NAME).unwrap().is_empty());
}

#[test]
fn fixed_ids_must_be_free_and_non_nil() {
    let db = TestDatabase::people();
    let id = ObjId::from_u128(0xF1_0000);

    let mut s = db.session().unwrap();
    assert_eq!(s.create_obj(PERSON, Some(id)).unwrap(), id);
    assert!(matches!(
        s.create_obj(COMPANY, Some(id)),
        Err(CoreError::ObjectExists(_))
    ));
    assert!(matches!(
        s.create_obj(PERSON, Some(ObjId::NIL)),
        Err(CoreError::InvalidArgument { .. })
    ));
}

#[test]
fn writes_check_the_model() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let mut s = db.session().unwrap();

    assert!(matches!(
        s.create_obj(ObjId::from_u128(0xDEAD_0000), None),
        Err(CoreError::UnknownType(_))
    ));
    assert!(matches!(
        s.set_fld_value(ada, NAME, &Value::from(3i64).encode()),
        Err(CoreError::TypeMismatch { .. })
    ));
    assert!(matches!(
        s.set_fld_value(ada, NAME, &[DataType::String.tag(), 0x41]),
        Err(CoreError::TypeMismatch { .. })
    ));
    assert!(matches!(
        s.set_fld_value(ada, BADGE, &Value::from(1i64).encode()),
        Err(CoreError::UnknownField { .. })
    ));
    assert!(matches!(
        s.set_fld_value(ada, FRIENDS, &Value::from(1i64).encode()),
        Err(CoreError::TypeMismatch { .. })
    ));
    assert!(matches!(
        s.set_fld_value(ObjId::from_u128(9), NAME, &Value::from("x").encode()),
        Err(CoreError::ObjectNotFound(_))
    ));
    assert_eq!(s.pending_changes(), 0);
}

#[test]
fn enumerate_includes_subtypes() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let (emp, acme) = db
        .transaction(|s| Ok((s.create_obj(EMPLOYEE, None)?, s.create_obj(COMPANY, None)?)))
        .unwrap();

    let s = db.read_session().unwrap();
    let mut people = vec![ada, emp];
    people.sort();
    assert_eq!(s.enumerate_objs(PERSON).unwrap(), people);
    assert_eq!(s.enumerate_objs(EMPLOYEE).unwrap(), vec![emp]);
    assert_eq!(s.enumerate_objs(COMPANY).unwrap(), vec![acme]);
}

#[test]
fn subtypes_reach_inherited_fields() {
    let db = TestDatabase::people();
    let emp = db
        .transaction(|s| {
            let emp = s.create_obj(EMPLOYEE, None)?;
            s.set_fld_value(emp, NAME, &Value::from("Eve").encode())?;
            s.set_fld_value(emp, BADGE, &Value::from(7i64).encode())?;
            Ok(emp)
        })
        .unwrap();

    let s = db.read_session().unwrap();
    assert_eq!(
        Value::decode(&s.get_fld_value(emp, BADGE).unwrap()).unwrap(),
        Some(Value::Integer(7))
    );
}

#[test]
fn small_arenas_fail_cleanly() {
    let db = TestDatabase::with_config(Config::default().arena_capacity(64 * 1024));
    let mut s = db.session().unwrap();
    let id = s.create_obj(PERSON, None).unwrap();
    let long = "x".repeat(64 * 1024);

    let err = s
        .set_fld_value(id, NAME, &Value::from(long.as_str()).encode())
        .unwrap_err();
    assert!(matches!(err, CoreError::ArenaExhausted { .. }));
    assert!(err.is_fatal());
}

#[test]
fn data_survives_reopen() {
    let db = TestDatabase::people();
    let ada = create_person(&db, "Ada");
    let bob = create_person(&db, "Bob");
    db.transaction(|s| s.create_aso(ada, FRIENDS, bob, FRIENDS)).unwrap();

    let db = db.reopen();
    let s = db.read_session().unwrap();
    assert_eq!(s.enumerate_aso(bob, FRIENDS).unwrap(), vec![ada]);
    assert_eq!(db.model().type_def(EMPLOYEE).unwrap().parent, Some(PERSON));
}
