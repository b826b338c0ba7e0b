//! Schema model: field descriptors, schema documents and schema files.

mod document;
mod field;
pub mod io;

pub use document::SchemaDocument;
pub use field::{FieldDescriptor, FieldSignature};
pub use io::{
    extract_schema_block, load_json, load_schema, parse_schema, save_json, save_report, FileFormat,
};
