//! Schema and report files.
//!
//! Schema files are YAML unless the path ends in `.json`. A file may hold a
//! bare schema or a full analysis report; readers only look at the nested
//! `schema` mapping and fall back to the whole payload when there is none.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::SchemaDocument;
use crate::error::Error;

/// On-disk encoding, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => FileFormat::Json,
            _ => FileFormat::Yaml,
        }
    }
}

/// Pull the schema block out of a parsed payload.
pub fn extract_schema_block(payload: serde_json::Value) -> Result<SchemaDocument, Error> {
    let block = match payload {
        serde_json::Value::Null => return Ok(SchemaDocument::default()),
        serde_json::Value::Object(mut map) => match map.remove("schema") {
            Some(inner @ serde_json::Value::Object(_)) => inner,
            Some(other) => {
                map.insert("schema".to_string(), other);
                serde_json::Value::Object(map)
            }
            None => serde_json::Value::Object(map),
        },
        other => other,
    };
    Ok(serde_json::from_value(block)?)
}

/// Parse schema file text in the given format. Blank text is an empty schema.
pub fn parse_schema(text: &str, format: FileFormat) -> Result<SchemaDocument, Error> {
    if text.trim().is_empty() {
        return Ok(SchemaDocument::default());
    }
    let payload: serde_json::Value = match format {
        FileFormat::Json => serde_json::from_str(text)?,
        FileFormat::Yaml => serde_yaml::from_str(text)?,
    };
    extract_schema_block(payload)
}

/// Load a schema from a YAML or JSON file.
pub fn load_schema(path: impl AsRef<Path>) -> Result<SchemaDocument, Error> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let schema = parse_schema(&text, FileFormat::from_path(path))?;
    debug!(path = %path.display(), fields = schema.len(), "Loaded schema");
    Ok(schema)
}

/// Write any serializable report, format chosen by extension.
pub fn save_report<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), Error> {
    let path = path.as_ref();
    let text = match FileFormat::from_path(path) {
        FileFormat::Json => serde_json::to_string_pretty(value)?,
        FileFormat::Yaml => serde_yaml::to_string(value)?,
    };
    fs::write(path, text)?;
    Ok(())
}

/// Write a value as pretty JSON.
pub fn save_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), Error> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Read a JSON file into a value.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, Error> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{TypeSpec, TypeTag};
    use crate::schema::FieldDescriptor;
    use tempfile::tempdir;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("a.json")), FileFormat::Json);
        assert_eq!(FileFormat::from_path(Path::new("a.yml")), FileFormat::Yaml);
        assert_eq!(FileFormat::from_path(Path::new("schema")), FileFormat::Yaml);
    }

    #[test]
    fn test_nested_schema_block() {
        let text = r#"
collection: users
confidence: 0.9
schema:
  properties:
    name:
      bsonType: string
      presence: 1.0
  required: [name]
"#;
        let schema = parse_schema(text, FileFormat::Yaml).unwrap();
        assert_eq!(
            schema.get("name").unwrap().field_type,
            TypeSpec::Scalar(TypeTag::String)
        );
        assert!(schema.is_required("name"));
    }

    #[test]
    fn test_bare_schema_payload() {
        let text = r#"{"properties": {"age": {"type": ["int", "null"]}}}"#;
        let schema = parse_schema(text, FileFormat::Json).unwrap();
        assert_eq!(schema.get("age").unwrap().field_type.tags().len(), 2);
    }

    #[test]
    fn test_empty_file_is_empty_schema() {
        assert!(parse_schema("", FileFormat::Yaml).unwrap().is_empty());
        assert!(parse_schema("  \n", FileFormat::Json).unwrap().is_empty());
        assert!(parse_schema("~", FileFormat::Yaml).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let dir = tempdir().unwrap();
        let schema = SchemaDocument::new()
            .with_field("n", FieldDescriptor::new(TypeTag::Int).with_presence(0.5));

        for name in ["s.yml", "s.json"] {
            let path = dir.path().join(name);
            save_report(&path, &schema).unwrap();
            assert_eq!(load_schema(&path).unwrap(), schema);
        }
    }
}
