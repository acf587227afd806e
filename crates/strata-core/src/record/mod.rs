//! Record model: typed values, references and flat-map conversion.

pub mod converters;
pub mod entity_record;
pub mod reference;
pub mod value;

pub use converters::{from_flat_map, logical_key_from_json, to_flat_map, to_flat_map_with_meta};
pub use entity_record::EntityRecord;
pub use reference::{EntityReferenceRecord, LogicalKeyValue, NO_REFERENCE_ID};
pub use value::{FieldValue, Password, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
