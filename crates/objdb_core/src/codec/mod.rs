//! Object, field and association encoding.
//!
//! Gives meaning to the flat key space: which keys are objects, which are
//! field values, which are association halves, and how scalar payloads are
//! tagged.

mod id;
mod keys;
mod value;

pub use id::{FieldId, ObjId, TypeId, ID_LEN};
pub use keys::{
    aso_key, field_key, key_owner, next_object_key, object_key, AsoKey, FieldKey, KeyKind, ASO_KEY_LEN,
    FIELD_KEY_LEN, OBJECT_KEY_LEN,
};
pub use value::{decode_utf16, DataType, Value};
