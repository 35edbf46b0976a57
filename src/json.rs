//! JSON conversion for dynamic records
//!
//! Fields are keyed by name, extensions by fully-qualified name. Enum values
//! are written as value names and read from names or numbers. Bytes map to
//! arrays of byte values.

use serde_json::{Map, Number, Value as Json};

use crate::codec::{DynamicMessage, Value};
use crate::error::{Result, SchemaError};
use crate::registry::TypeRegistry;
use crate::schema::FieldType;
use crate::types::{FieldDescriptor, MessageType};

/// Convert a record into a JSON object holding its set fields
pub fn to_json(message: &DynamicMessage<'_>, registry: &TypeRegistry) -> Result<Json> {
    let mut object = Map::new();
    for (field, value) in message.fields() {
        let key = if field.is_extension {
            field.full_name.clone()
        } else {
            field.name.clone()
        };
        let json = match value {
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(|item| value_to_json(registry, field, item))
                    .collect::<Result<_>>()?,
            ),
            single => value_to_json(registry, field, single)?,
        };
        object.insert(key, json);
    }
    Ok(Json::Object(object))
}

/// Build a record of `message_type` from a JSON object
///
/// Keys naming no field of the type are ignored.
pub fn from_json<'r>(
    registry: &'r TypeRegistry,
    message_type: &'r MessageType,
    json: &Json,
) -> Result<DynamicMessage<'r>> {
    let object = json.as_object().ok_or_else(|| {
        SchemaError::malformed(&message_type.full_name, "expected a JSON object")
    })?;

    let mut message = DynamicMessage::new(message_type);
    for (key, json) in object {
        let Some(field) = message_type
            .field_by_name(key)
            .or_else(|| message_type.extension_by_name(key))
        else {
            continue;
        };

        let value = if field.is_repeated() {
            let items = json.as_array().ok_or_else(|| mismatch(field, "an array"))?;
            Value::List(
                items
                    .iter()
                    .map(|item| json_to_value(registry, field, item))
                    .collect::<Result<_>>()?,
            )
        } else {
            json_to_value(registry, field, json)?
        };
        message.set(key, value)?;
    }
    Ok(message)
}

fn value_to_json(registry: &TypeRegistry, field: &FieldDescriptor, value: &Value<'_>) -> Result<Json> {
    let json = match value {
        Value::Bool(v) => Json::Bool(*v),
        Value::I32(v) => Json::from(*v),
        Value::I64(v) => Json::from(*v),
        Value::U32(v) => Json::from(*v),
        Value::U64(v) => Json::from(*v),
        Value::F32(v) => Number::from_f64(f64::from(*v)).map_or(Json::Null, Json::Number),
        Value::F64(v) => Number::from_f64(*v).map_or(Json::Null, Json::Number),
        Value::String(v) => Json::String(v.clone()),
        Value::Bytes(v) => Json::Array(v.iter().map(|b| Json::from(*b)).collect()),
        Value::Enum(number) => {
            let enum_type = registry
                .field_enum_type(field)
                .ok_or_else(|| SchemaError::malformed(&field.full_name, "enum type is not resolved"))?;
            let value = enum_type.value_by_number(*number).ok_or_else(|| {
                SchemaError::malformed(&field.full_name, format!("unknown enum value {}", number))
            })?;
            Json::String(value.name.clone())
        }
        Value::Message(m) => to_json(m, registry)?,
        Value::List(_) => return Err(mismatch(field, "a single value")),
    };
    Ok(json)
}

fn json_to_value<'r>(
    registry: &'r TypeRegistry,
    field: &FieldDescriptor,
    json: &Json,
) -> Result<Value<'r>> {
    let value = match field.field_type {
        FieldType::Int32 | FieldType::Sint32 | FieldType::Sfixed32 => Value::I32(
            json.as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| mismatch(field, "a 32-bit integer"))?,
        ),
        FieldType::Int64 | FieldType::Sint64 | FieldType::Sfixed64 => {
            Value::I64(json.as_i64().ok_or_else(|| mismatch(field, "an integer"))?)
        }
        FieldType::Uint32 | FieldType::Fixed32 => Value::U32(
            json.as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| mismatch(field, "an unsigned 32-bit integer"))?,
        ),
        FieldType::Uint64 | FieldType::Fixed64 => {
            Value::U64(json.as_u64().ok_or_else(|| mismatch(field, "an unsigned integer"))?)
        }
        FieldType::Float => Value::F32(json.as_f64().ok_or_else(|| mismatch(field, "a number"))? as f32),
        FieldType::Double => Value::F64(json.as_f64().ok_or_else(|| mismatch(field, "a number"))?),
        FieldType::Bool => Value::Bool(json.as_bool().ok_or_else(|| mismatch(field, "a bool"))?),
        FieldType::String => Value::String(
            json.as_str()
                .ok_or_else(|| mismatch(field, "a string"))?
                .to_string(),
        ),
        FieldType::Bytes => Value::Bytes(
            json.as_array()
                .ok_or_else(|| mismatch(field, "an array of bytes"))?
                .iter()
                .map(|b| {
                    b.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| mismatch(field, "an array of bytes"))
                })
                .collect::<Result<_>>()?,
        ),
        FieldType::Enum => {
            let enum_type = registry
                .field_enum_type(field)
                .ok_or_else(|| SchemaError::malformed(&field.full_name, "enum type is not resolved"))?;
            let value = match json {
                Json::String(name) => enum_type.value_by_name(name),
                Json::Number(n) => n
                    .as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .and_then(|n| enum_type.value_by_number(n)),
                _ => None,
            };
            Value::Enum(value.ok_or_else(|| mismatch(field, "an enum value name"))?.number)
        }
        FieldType::Message => {
            let nested = registry
                .field_message_type(field)
                .ok_or_else(|| SchemaError::malformed(&field.full_name, "message type is not resolved"))?;
            Value::Message(from_json(registry, nested, json)?)
        }
        FieldType::Group => {
            return Err(SchemaError::UnsupportedFieldType {
                field: field.full_name.clone(),
                field_type: field.field_type.to_string(),
            })
        }
    };
    Ok(value)
}

fn mismatch(field: &FieldDescriptor, expected: &str) -> SchemaError {
    SchemaError::malformed(&field.full_name, format!("expected {}", expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::SchemaSetLoader;
    use crate::schema::{EnumSchema, FieldSchema, MessageSchema, SchemaFile};
    use serde_json::json;

    fn file() -> SchemaFile {
        SchemaFile::new("geo.proto")
            .with_package("geo")
            .with_enum(EnumSchema::new("Unit").with_value("METERS", 0).with_value("FEET", 1))
            .with_message(
                MessageSchema::new("request_locate")
                    .with_field(FieldSchema::new("lon", 1, FieldType::Double).required())
                    .with_field(FieldSchema::new("lat", 2, FieldType::Double).required())
                    .with_field(FieldSchema::new("unit", 3, FieldType::Enum).with_type_name("Unit"))
                    .with_field(FieldSchema::new("hints", 4, FieldType::Bytes))
                    .with_field(FieldSchema::new("ids", 5, FieldType::Uint32).repeated()),
            )
    }

    #[test]
    fn test_json_round_trip() {
        let set = SchemaSetLoader::new().load(&[file()]).unwrap();
        let registry = set.registry();
        let request = registry.message_by_name("geo.request_locate").unwrap();

        let input = json!({
            "lon": -0.5088,
            "lat": 51.67577,
            "unit": "FEET",
            "hints": [0, 255],
            "ids": [3, 4],
            "ignored": true
        });
        let message = from_json(registry, request, &input).unwrap();
        assert_eq!(message.get("unit"), Some(&Value::Enum(1)));

        let output = to_json(&message, registry).unwrap();
        assert_eq!(
            output,
            json!({
                "lon": -0.5088,
                "lat": 51.67577,
                "unit": "FEET",
                "hints": [0, 255],
                "ids": [3, 4]
            })
        );
    }

    #[test]
    fn test_json_rejects_mismatches() {
        let set = SchemaSetLoader::new().load(&[file()]).unwrap();
        let registry = set.registry();
        let request = registry.message_by_name("geo.request_locate").unwrap();

        assert!(from_json(registry, request, &json!([1, 2])).is_err());
        assert!(from_json(registry, request, &json!({"unit": "YARDS"})).is_err());
        assert!(from_json(registry, request, &json!({"ids": 3})).is_err());
        assert!(from_json(registry, request, &json!({"hints": [256]})).is_err());
        assert_eq!(
            from_json(registry, request, &json!({"unit": 0})).unwrap().get("unit"),
            Some(&Value::Enum(0))
        );
    }
}
