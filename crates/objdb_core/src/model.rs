//! Type and field definitions.
//!
//! The model describes which types exist, which fields each type carries,
//! and how association fields pair up. Schema elements are objects
//! themselves: [`Model::persist`] stores every user-defined type and field
//! as an instance of the builtin meta-types, and [`Model::load`] reads them
//! back. Elements reference each other by id only, so cyclic schemas need no
//! special handling.

use crate::codec::{DataType, FieldId, ObjId, TypeId, Value};
use crate::error::{CoreError, CoreResult};
use crate::session::Session;
use std::collections::HashMap;

/// Well-known ids of the builtin meta-model.
pub mod meta {
    use crate::codec::{FieldId, ObjId, TypeId};

    /// Type of every persisted [`TypeDef`](super::TypeDef).
    pub const TYPE_DEF: TypeId = ObjId::from_u128(0x0001);
    /// Type of every persisted [`FieldDef`](super::FieldDef).
    pub const FIELD_DEF: TypeId = ObjId::from_u128(0x0002);

    /// `TypeDef.name`, string.
    pub const TYPE_NAME: FieldId = ObjId::from_u128(0x0101);
    /// `TypeDef.parent`, id.
    pub const TYPE_PARENT: FieldId = ObjId::from_u128(0x0102);

    /// `FieldDef.name`, string.
    pub const FIELD_NAME: FieldId = ObjId::from_u128(0x0201);
    /// `FieldDef.owner`, id.
    pub const FIELD_OWNER: FieldId = ObjId::from_u128(0x0202);
    /// `FieldDef.data_type`, enum holding the type tag.
    pub const FIELD_DATA_TYPE: FieldId = ObjId::from_u128(0x0203);
    /// `FieldDef.indexed`, boolean.
    pub const FIELD_INDEXED: FieldId = ObjId::from_u128(0x0204);
    /// `FieldDef.other_field`, id of the mirror association field.
    pub const FIELD_OTHER: FieldId = ObjId::from_u128(0x0205);
    /// `FieldDef.multi`, boolean.
    pub const FIELD_MULTI: FieldId = ObjId::from_u128(0x0206);

    /// Returns true for ids reserved by the meta-model.
    #[must_use]
    pub fn is_builtin(id: ObjId) -> bool {
        id.as_u128() < 0x1000
    }
}

/// A type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Type id.
    pub id: TypeId,
    /// Display name.
    pub name: String,
    /// Supertype, whose fields this type inherits.
    pub parent: Option<TypeId>,
}

impl TypeDef {
    /// Creates a root type.
    pub fn new(id: TypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parent: None,
        }
    }

    /// Sets the supertype.
    #[must_use]
    pub fn extends(mut self, parent: TypeId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// The association side of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationDef {
    /// Field on the partner type that holds the mirror half.
    pub other_field: FieldId,
    /// Whether the field may hold more than one edge.
    pub multi: bool,
}

/// A field definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field id.
    pub id: FieldId,
    /// Display name.
    pub name: String,
    /// Type declaring the field.
    pub owner: TypeId,
    /// Stored data type.
    pub data_type: DataType,
    /// Whether values are maintained in the search index.
    pub indexed: bool,
    /// Set for association fields.
    pub association: Option<AssociationDef>,
}

impl FieldDef {
    /// Creates a scalar field.
    pub fn scalar(id: FieldId, owner: TypeId, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            data_type,
            indexed: false,
            association: None,
        }
    }

    /// Creates an association field mirrored by `other_field`.
    pub fn association(
        id: FieldId,
        owner: TypeId,
        name: impl Into<String>,
        other_field: FieldId,
        multi: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            data_type: DataType::Association,
            indexed: false,
            association: Some(AssociationDef { other_field, multi }),
        }
    }

    /// Marks the field as indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

/// The set of known types and fields.
#[derive(Debug, Clone)]
pub struct Model {
    types: HashMap<TypeId, TypeDef>,
    fields: HashMap<FieldId, FieldDef>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    /// Creates a model holding only the meta-model.
    #[must_use]
    pub fn new() -> Self {
        let mut model = Self {
            types: HashMap::new(),
            fields: HashMap::new(),
        };
        model.install(TypeDef::new(meta::TYPE_DEF, "TypeDef"));
        model.install(TypeDef::new(meta::FIELD_DEF, "FieldDef"));

        let builtin = [
            (meta::TYPE_NAME, meta::TYPE_DEF, "name", DataType::String),
            (meta::TYPE_PARENT, meta::TYPE_DEF, "parent", DataType::Id),
            (meta::FIELD_NAME, meta::FIELD_DEF, "name", DataType::String),
            (meta::FIELD_OWNER, meta::FIELD_DEF, "owner", DataType::Id),
            (meta::FIELD_DATA_TYPE, meta::FIELD_DEF, "dataType", DataType::Enum),
            (meta::FIELD_INDEXED, meta::FIELD_DEF, "indexed", DataType::Boolean),
            (meta::FIELD_OTHER, meta::FIELD_DEF, "otherField", DataType::Id),
            (meta::FIELD_MULTI, meta::FIELD_DEF, "multi", DataType::Boolean),
        ];
        for (id, owner, name, data_type) in builtin {
            model
                .fields
                .insert(id, FieldDef::scalar(id, owner, name, data_type));
        }
        model
    }

    fn install(&mut self, def: TypeDef) {
        self.types.insert(def.id, def);
    }

    /// Adds a type. The parent may be added later; see [`Model::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for nil, reserved or duplicate
    /// ids.
    pub fn add_type(&mut self, def: TypeDef) -> CoreResult<()> {
        self.check_new_id(def.id)?;
        self.install(def);
        Ok(())
    }

    /// Adds a field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidArgument`] for nil, reserved or duplicate
    /// ids, and [`CoreError::UnknownType`] if the owner is not defined.
    pub fn add_field(&mut self, def: FieldDef) -> CoreResult<()> {
        self.check_new_id(def.id)?;
        if !self.types.contains_key(&def.owner) {
            return Err(CoreError::UnknownType(def.owner));
        }
        if def.data_type.is_scalar() == def.association.is_some() {
            return Err(CoreError::type_mismatch(
                def.id,
                "association fields need an association definition and nothing else may have one",
            ));
        }
        self.fields.insert(def.id, def);
        Ok(())
    }

    fn check_new_id(&self, id: ObjId) -> CoreResult<()> {
        if id.is_nil() || meta::is_builtin(id) {
            return Err(CoreError::invalid_argument(format!("reserved schema id {id}")));
        }
        if self.types.contains_key(&id) || self.fields.contains_key(&id) {
            return Err(CoreError::invalid_argument(format!("duplicate schema id {id}")));
        }
        Ok(())
    }

    /// Checks cross references: parents exist, inheritance is acyclic and
    /// association fields mirror each other.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> CoreResult<()> {
        for def in self.types.values() {
            let mut steps = 0;
            let mut current = def.parent;
            while let Some(parent) = current {
                let Some(parent_def) = self.types.get(&parent) else {
                    return Err(CoreError::UnknownType(parent));
                };
                steps += 1;
                if steps > self.types.len() {
                    return Err(CoreError::invalid_argument(format!(
                        "inheritance cycle through type {}",
                        def.id
                    )));
                }
                current = parent_def.parent;
            }
        }

        for def in self.fields.values() {
            let Some(aso) = def.association else {
                continue;
            };
            let other = self.fields.get(&aso.other_field).ok_or_else(|| {
                CoreError::type_mismatch(def.id, format!("mirror field {} is undefined", aso.other_field))
            })?;
            if other.association.map(|a| a.other_field) != Some(def.id) {
                return Err(CoreError::type_mismatch(
                    def.id,
                    format!("field {} does not mirror back", other.id),
                ));
            }
        }
        Ok(())
    }

    /// Looks up a type.
    #[must_use]
    pub fn type_def(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(&id)
    }

    /// Looks up a field.
    #[must_use]
    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(&id)
    }

    /// Iterates every type, builtins included.
    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    /// Iterates every field, builtins included.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values()
    }

    /// Returns true if `type_id` is `ancestor` or inherits from it.
    #[must_use]
    pub fn is_a(&self, type_id: TypeId, ancestor: TypeId) -> bool {
        let mut current = Some(type_id);
        // Bounded walk; a cyclic chain fails validation anyway.
        for _ in 0..=self.types.len() {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = self.types.get(&id).and_then(|t| t.parent),
                None => return false,
            }
        }
        false
    }

    /// Resolves `field` as a member of `type_id`, inherited fields included.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] or [`CoreError::UnknownField`].
    pub fn field_on(&self, type_id: TypeId, field: FieldId) -> CoreResult<&FieldDef> {
        if !self.types.contains_key(&type_id) {
            return Err(CoreError::UnknownType(type_id));
        }
        self.fields
            .get(&field)
            .filter(|def| self.is_a(type_id, def.owner))
            .ok_or(CoreError::UnknownField { type_id, field })
    }

    /// Returns true if the field's values are search-indexed.
    #[must_use]
    pub fn is_indexed(&self, field: FieldId) -> bool {
        self.fields.get(&field).is_some_and(|f| f.indexed)
    }

    /// Writes every user-defined type and field as meta-model objects.
    ///
    /// Existing schema objects are updated in place.
    ///
    /// # Errors
    ///
    /// Returns an error if any session write fails.
    pub fn persist(&self, session: &mut Session<'_>) -> CoreResult<()> {
        let mut types: Vec<&TypeDef> = self.types.values().filter(|t| !meta::is_builtin(t.id)).collect();
        types.sort_by_key(|t| t.id);
        for def in types {
            upsert(session, def.id, meta::TYPE_DEF)?;
            session.set_fld_value(def.id, meta::TYPE_NAME, &Value::from(def.name.as_str()).encode())?;
            let parent = def.parent.map(|p| Value::Id(p).encode()).unwrap_or_default();
            session.set_fld_value(def.id, meta::TYPE_PARENT, &parent)?;
        }

        let mut fields: Vec<&FieldDef> = self.fields.values().filter(|f| !meta::is_builtin(f.id)).collect();
        fields.sort_by_key(|f| f.id);
        for def in fields {
            upsert(session, def.id, meta::FIELD_DEF)?;
            session.set_fld_value(def.id, meta::FIELD_NAME, &Value::from(def.name.as_str()).encode())?;
            session.set_fld_value(def.id, meta::FIELD_OWNER, &Value::Id(def.owner).encode())?;
            session.set_fld_value(
                def.id,
                meta::FIELD_DATA_TYPE,
                &Value::Enum(u32::from(def.data_type.tag())).encode(),
            )?;
            session.set_fld_value(def.id, meta::FIELD_INDEXED, &Value::Boolean(def.indexed).encode())?;
            let (other, multi) = match def.association {
                Some(aso) => (Value::Id(aso.other_field).encode(), Value::Boolean(aso.multi).encode()),
                None => (Vec::new(), Vec::new()),
            };
            session.set_fld_value(def.id, meta::FIELD_OTHER, &other)?;
            session.set_fld_value(def.id, meta::FIELD_MULTI, &multi)?;
        }
        tracing::debug!(
            types = self.types.len(),
            fields = self.fields.len(),
            "model persisted"
        );
        Ok(())
    }

    /// Reads the model stored through [`Model::persist`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] for malformed schema objects and the
    /// first [`Model::validate`] failure.
    pub fn load(session: &Session<'_>) -> CoreResult<Self> {
        let mut model = Self::new();

        for id in session.enumerate_objs(meta::TYPE_DEF)? {
            let name = read_string(session, id, meta::TYPE_NAME)?;
            let parent = read_id(session, id, meta::TYPE_PARENT)?;
            model.install(TypeDef { id, name, parent });
        }

        for id in session.enumerate_objs(meta::FIELD_DEF)? {
            let name = read_string(session, id, meta::FIELD_NAME)?;
            let owner = read_id(session, id, meta::FIELD_OWNER)?
                .ok_or_else(|| CoreError::corrupted(format!("field {id} has no owner")))?;
            let data_type = match Value::decode(&session.get_fld_value(id, meta::FIELD_DATA_TYPE)?)? {
                Some(Value::Enum(tag)) => u8::try_from(tag).ok().and_then(DataType::from_tag),
                _ => None,
            }
            .ok_or_else(|| CoreError::corrupted(format!("field {id} has no data type")))?;
            let indexed = read_bool(session, id, meta::FIELD_INDEXED)?;
            let association = match read_id(session, id, meta::FIELD_OTHER)? {
                Some(other_field) => Some(AssociationDef {
                    other_field,
                    multi: read_bool(session, id, meta::FIELD_MULTI)?,
                }),
                None => None,
            };
            model.fields.insert(
                id,
                FieldDef {
                    id,
                    name,
                    owner,
                    data_type,
                    indexed,
                    association,
                },
            );
        }

        model.validate()?;
        tracing::debug!(
            types = model.types.len(),
            fields = model.fields.len(),
            "model loaded"
        );
        Ok(model)
    }
}

fn upsert(session: &mut Session<'_>, id: ObjId, type_id: TypeId) -> CoreResult<()> {
    let current = session.get_typ_id(id)?;
    if current == type_id {
        return Ok(());
    }
    if !current.is_nil() {
        session.delete_obj(id)?;
    }
    session.create_obj(type_id, Some(id))?;
    Ok(())
}

fn read_string(session: &Session<'_>, id: ObjId, field: FieldId) -> CoreResult<String> {
    match Value::decode(&session.get_fld_value(id, field)?)? {
        Some(Value::String(s)) => Ok(s),
        None => Ok(String::new()),
        Some(other) => Err(CoreError::corrupted(format!(
            "expected string in {field} of {id}, found {}",
            other.data_type()
        ))),
    }
}

fn read_id(session: &Session<'_>, id: ObjId, field: FieldId) -> CoreResult<Option<ObjId>> {
    match Value::decode(&session.get_fld_value(id, field)?)? {
        Some(Value::Id(v)) if !v.is_nil() => Ok(Some(v)),
        Some(Value::Id(_)) | None => Ok(None),
        Some(other) => Err(CoreError::corrupted(format!(
            "expected id in {field} of {id}, found {}",
            other.data_type()
        ))),
    }
}

fn read_bool(session: &Session<'_>, id: ObjId, field: FieldId) -> CoreResult<bool> {
    match Value::decode(&session.get_fld_value(id, field)?)? {
        Some(Value::Boolean(b)) => Ok(b),
        None => Ok(false),
        Some(other) => Err(CoreError::corrupted(format!(
            "expected boolean in {field} of {id}, found {}",
            other.data_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERSON: TypeId = ObjId::from_u128(0x1_0000);
    const EMPLOYEE: TypeId = ObjId::from_u128(0x1_0001);
    const NAME: FieldId = ObjId::from_u128(0x2_0000);
    const FRIENDS: FieldId = ObjId::from_u128(0x2_0001);

    fn sample() -> Model {
        let mut model = Model::new();
        model.add_type(TypeDef::new(PERSON, "Person")).unwrap();
        model
            .add_type(TypeDef::new(EMPLOYEE, "Employee").extends(PERSON))
            .unwrap();
        model
            .add_field(FieldDef::scalar(NAME, PERSON, "name", DataType::String).indexed())
            .unwrap();
        model
            .add_field(FieldDef::association(FRIENDS, PERSON, "friends", FRIENDS, true))
            .unwrap();
        model
    }

    #[test]
    fn builtins_present() {
        let model = Model::new();
        assert_eq!(model.type_def(meta::TYPE_DEF).unwrap().name, "TypeDef");
        assert!(model.field_on(meta::FIELD_DEF, meta::FIELD_OWNER).is_ok());
        model.validate().unwrap();
    }

    #[test]
    fn inherited_fields_resolve() {
        let model = sample();
        model.validate().unwrap();
        assert!(model.is_a(EMPLOYEE, PERSON));
        assert!(!model.is_a(PERSON, EMPLOYEE));
        assert_eq!(model.field_on(EMPLOYEE, NAME).unwrap().name, "name");
        assert!(model.is_indexed(NAME));
        assert!(!model.is_indexed(FRIENDS));
    }

    #[test]
    fn unknown_members_rejected() {
        let model = sample();
        assert!(matches!(
            model.field_on(meta::TYPE_DEF, NAME),
            Err(CoreError::UnknownField { .. })
        ));
        assert!(matches!(
            model.field_on(ObjId::from_u128(0xdead_0000), NAME),
            Err(CoreError::UnknownType(_))
        ));
    }

    #[test]
    fn duplicate_and_reserved_ids_rejected() {
        let mut model = sample();
        assert!(model.add_type(TypeDef::new(PERSON, "Again")).is_err());
        assert!(model.add_type(TypeDef::new(meta::TYPE_DEF, "Meta")).is_err());
        assert!(model.add_type(TypeDef::new(ObjId::NIL, "Nil")).is_err());
        assert!(matches!(
            model.add_field(FieldDef::scalar(
                ObjId::from_u128(0x2_0009),
                ObjId::from_u128(0x9_9999),
                "x",
                DataType::Integer
            )),
            Err(CoreError::UnknownType(_))
        ));
    }

    #[test]
    fn unmirrored_association_fails_validation() {
        let mut model = sample();
        model
            .add_field(FieldDef::association(
                ObjId::from_u128(0x2_0002),
                PERSON,
                "boss",
                NAME,
                false,
            ))
            .unwrap();
        assert!(model.validate().is_err());
    }

    #[test]
    fn inheritance_cycle_fails_validation() {
        let mut model = Model::new();
        let a = ObjId::from_u128(0x1_0010);
        let b = ObjId::from_u128(0x1_0011);
        model.add_type(TypeDef::new(a, "A").extends(b)).unwrap();
        model.add_type(TypeDef::new(b, "B").extends(a)).unwrap();
        assert!(model.validate().is_err());
    }
}
