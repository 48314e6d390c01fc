//! Test fixtures and database helpers.
//!
//! Provides a small sample model and convenience functions for setting up
//! test databases over it.

use objdb_core::{Config, Database, DataType, FieldDef, Model, ObjId, TypeDef, Value};
use objdb_storage::InMemoryStore;
use std::sync::{Arc, Once};

/// Ids of the sample "people" model.
///
/// ```text
/// Person { name: string (indexed), age: integer (indexed), nickname: string,
///          friends: *Person.friends, employer: Company.employees }
/// Employee : Person { badge: integer }
/// Company { title: string (indexed), employees: *Person.employer }
/// ```
pub mod people {
    use objdb_core::{FieldId, ObjId, TypeId};

    /// `Person` type.
    pub const PERSON: TypeId = ObjId::from_u128(0x1_0001);
    /// `Employee` type, a subtype of `Person`.
    pub const EMPLOYEE: TypeId = ObjId::from_u128(0x1_0002);
    /// `Company` type.
    pub const COMPANY: TypeId = ObjId::from_u128(0x1_0003);

    /// `Person.name`, indexed string.
    pub const NAME: FieldId = ObjId::from_u128(0x2_0001);
    /// `Person.age`, indexed integer.
    pub const AGE: FieldId = ObjId::from_u128(0x2_0002);
    /// `Person.nickname`, plain string.
    pub const NICKNAME: FieldId = ObjId::from_u128(0x2_0003);
    /// `Person.friends`, multi-valued, mirrored by itself.
    pub const FRIENDS: FieldId = ObjId::from_u128(0x2_0004);
    /// `Person.employer`, single-valued, mirrored by `Company.employees`.
    pub const EMPLOYER: FieldId = ObjId::from_u128(0x2_0005);
    /// `Employee.badge`, integer.
    pub const BADGE: FieldId = ObjId::from_u128(0x2_0006);
    /// `Company.title`, indexed string.
    pub const TITLE: FieldId = ObjId::from_u128(0x2_0007);
    /// `Company.employees`, multi-valued, mirrored by `Person.employer`.
    pub const EMPLOYEES: FieldId = ObjId::from_u128(0x2_0008);
}

/// Builds the sample model.
///
/// # Panics
///
/// Never in practice; the definitions are static.
pub fn people_model() -> Model {
    use people::*;

    let mut model = Model::new();
    model.add_type(TypeDef::new(PERSON, "Person")).expect("Person");
    model
        .add_type(TypeDef::new(EMPLOYEE, "Employee").extends(PERSON))
        .expect("Employee");
    model.add_type(TypeDef::new(COMPANY, "Company")).expect("Company");

    let fields = [
        FieldDef::scalar(NAME, PERSON, "name", DataType::String).indexed(),
        FieldDef::scalar(AGE, PERSON, "age", DataType::Integer).indexed(),
        FieldDef::scalar(NICKNAME, PERSON, "nickname", DataType::String),
        FieldDef::association(FRIENDS, PERSON, "friends", FRIENDS, true),
        FieldDef::association(EMPLOYER, PERSON, "employer", EMPLOYEES, false),
        FieldDef::scalar(BADGE, EMPLOYEE, "badge", DataType::Integer),
        FieldDef::scalar(TITLE, COMPANY, "title", DataType::String).indexed(),
        FieldDef::association(EMPLOYEES, COMPANY, "employees", EMPLOYER, true),
    ];
    for field in fields {
        model.add_field(field).expect("sample field");
    }
    model
}

/// A test database over a shared in-memory store.
///
/// The store outlives the database, so [`TestDatabase::reopen`] can load
/// the same data through a fresh handle.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    store: Arc<InMemoryStore>,
}

impl TestDatabase {
    /// Creates a database over the people model.
    pub fn people() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a database over the people model with custom configuration.
    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let db = Database::create(Box::new(Arc::clone(&store)), people_model(), config)
            .expect("Failed to create test database");
        Self { db, store }
    }

    /// Drops the database handle and opens the same store again.
    pub fn reopen(self) -> Self {
        let config = self.db.config().clone();
        let store = self.store;
        drop(self.db);
        let db = Database::open(Box::new(Arc::clone(&store)), config)
            .expect("Failed to reopen test database");
        Self { db, store }
    }

    /// Returns the shared base store.
    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a fresh people database.
pub fn with_people_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::people();
    f(&test_db.db)
}

/// Creates a person with a name in its own commit.
pub fn create_person(db: &Database, name: &str) -> ObjId {
    db.transaction(|s| {
        let id = s.create_obj(people::PERSON, None)?;
        s.set_fld_value(id, people::NAME, &Value::from(name).encode())?;
        Ok(id)
    })
    .expect("Failed to create person")
}

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
