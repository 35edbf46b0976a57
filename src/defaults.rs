//! Default value materialization
//!
//! Raw defaults arrive as the strings a schema compiler wrote into the
//! descriptor. The conversion rules below must match what existing encoders
//! expect, quirks included.

use crate::error::{Result, SchemaError};
use crate::schema::{FieldSchema, FieldType, Label};
use crate::types::{DefaultValue, EnumType};

/// Materialize the default of `field`.
///
/// `enum_type` is the resolved enum for enum-typed fields. `full_name` is only
/// used for error reporting.
pub fn materialize(
    field: &FieldSchema,
    enum_type: Option<&EnumType>,
    full_name: &str,
) -> Result<DefaultValue> {
    if field.label == Label::Repeated {
        return Ok(DefaultValue::EmptyList);
    }

    let raw = field.default_value.as_deref().unwrap_or("");
    let parse_error = |reason: &str| SchemaError::DefaultValueParse {
        field: full_name.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let ty = field.field_type;
    if ty.is_signed_integer() {
        if raw.is_empty() {
            return Ok(DefaultValue::Int(0));
        }
        return raw
            .parse::<i64>()
            .map(DefaultValue::Int)
            .map_err(|e| parse_error(&e.to_string()));
    }
    if ty.is_unsigned_integer() {
        if raw.is_empty() {
            return Ok(DefaultValue::UInt(0));
        }
        return raw
            .parse::<u64>()
            .map(DefaultValue::UInt)
            .map_err(|e| parse_error(&e.to_string()));
    }

    match ty {
        FieldType::Float | FieldType::Double => {
            // Compatibility shim: older schema compilers wrote whole-number
            // float defaults without a decimal point, and encoders built
            // against them expect an integer here. Integer parse goes first.
            if raw.is_empty() {
                return Ok(DefaultValue::Int(0));
            }
            if let Ok(value) = raw.parse::<i64>() {
                return Ok(DefaultValue::Int(value));
            }
            raw.parse::<f64>()
                .map(DefaultValue::Float)
                .map_err(|e| parse_error(&e.to_string()))
        }
        FieldType::Bool => {
            if raw.is_empty() || raw.eq_ignore_ascii_case("false") {
                Ok(DefaultValue::Bool(false))
            } else if raw.eq_ignore_ascii_case("true") {
                Ok(DefaultValue::Bool(true))
            } else {
                Err(parse_error("unrecognized bool value"))
            }
        }
        FieldType::Enum => {
            let enum_type = enum_type.ok_or_else(|| parse_error("enum type is not resolved"))?;
            let value = if raw.is_empty() {
                enum_type
                    .first_value()
                    .ok_or_else(|| parse_error("enum declares no values"))?
            } else {
                enum_type
                    .value_by_name(raw)
                    .ok_or_else(|| parse_error("no enum value with this name"))?
            };
            Ok(DefaultValue::Enum(value.number))
        }
        FieldType::String => Ok(DefaultValue::String(raw.to_string())),
        FieldType::Bytes => unescape_bytes(raw)
            .map(DefaultValue::Bytes)
            .map_err(|reason| parse_error(&reason)),
        FieldType::Message => Ok(DefaultValue::Absent),
        FieldType::Group => Err(SchemaError::UnsupportedFieldType {
            field: full_name.to_string(),
            field_type: ty.to_string(),
        }),
        // Integer kinds were handled above
        _ => Err(parse_error("unreachable field kind")),
    }
}

/// Undo the C-style escaping schema compilers apply to `bytes` defaults
pub fn unescape_bytes(raw: &str) -> std::result::Result<Vec<u8>, String> {
    let input = raw.as_bytes();
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let byte = input[i];
        i += 1;
        if byte != b'\\' {
            out.push(byte);
            continue;
        }

        let Some(&escape) = input.get(i) else {
            return Err("trailing backslash".to_string());
        };
        i += 1;

        match escape {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'\\' | b'\'' | b'"' | b'?' => out.push(escape),
            b'0'..=b'7' => {
                let mut value = u32::from(escape - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match input.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            i += 1;
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                if value > 0xff {
                    return Err(format!("octal escape out of range: {}", value));
                }
                out.push(value as u8);
            }
            b'x' | b'X' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match input.get(i).and_then(|d| (*d as char).to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            i += 1;
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    return Err("\\x escape without hex digits".to_string());
                }
                out.push(value as u8);
            }
            other => return Err(format!("unknown escape sequence \\{}", other as char)),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnumValue;

    fn field(ty: FieldType, default: Option<&str>) -> FieldSchema {
        let mut f = FieldSchema::new("f", 1, ty);
        f.default_value = default.map(String::from);
        f
    }

    fn colors() -> EnumType {
        EnumType::new(
            "Color".to_string(),
            "Color".to_string(),
            "color.proto".to_string(),
            vec![
                EnumValue { name: "GREEN".to_string(), number: 3, index: 0 },
                EnumValue { name: "RED".to_string(), number: 0, index: 1 },
            ],
        )
    }

    #[test]
    fn test_repeated_is_empty_list() {
        let f = field(FieldType::Int32, Some("7")).repeated();
        assert_eq!(materialize(&f, None, "f").unwrap(), DefaultValue::EmptyList);
    }

    #[test]
    fn test_integer_defaults() {
        assert_eq!(materialize(&field(FieldType::Int32, None), None, "f").unwrap(), DefaultValue::Int(0));
        assert_eq!(
            materialize(&field(FieldType::Sint64, Some("-42")), None, "f").unwrap(),
            DefaultValue::Int(-42)
        );
        assert_eq!(
            materialize(&field(FieldType::Fixed64, Some("18446744073709551615")), None, "f").unwrap(),
            DefaultValue::UInt(u64::MAX)
        );
        assert!(matches!(
            materialize(&field(FieldType::Uint32, Some("ten")), None, "f"),
            Err(SchemaError::DefaultValueParse { .. })
        ));
    }

    #[test]
    fn test_float_prefers_integer_parse() {
        assert_eq!(materialize(&field(FieldType::Float, None), None, "f").unwrap(), DefaultValue::Int(0));
        assert_eq!(
            materialize(&field(FieldType::Float, Some("5")), None, "f").unwrap(),
            DefaultValue::Int(5)
        );
        assert_eq!(
            materialize(&field(FieldType::Double, Some("2.5")), None, "f").unwrap(),
            DefaultValue::Float(2.5)
        );
        assert!(matches!(
            materialize(&field(FieldType::Double, Some("inf")), None, "f").unwrap(),
            DefaultValue::Float(v) if v.is_infinite()
        ));
    }

    #[test]
    fn test_bool_defaults() {
        assert_eq!(materialize(&field(FieldType::Bool, None), None, "f").unwrap(), DefaultValue::Bool(false));
        assert_eq!(
            materialize(&field(FieldType::Bool, Some("TRUE")), None, "f").unwrap(),
            DefaultValue::Bool(true)
        );
        assert!(matches!(
            materialize(&field(FieldType::Bool, Some("yes")), None, "f"),
            Err(SchemaError::DefaultValueParse { .. })
        ));
    }

    #[test]
    fn test_enum_default_is_first_declared_value() {
        let colors = colors();
        assert_eq!(
            materialize(&field(FieldType::Enum, None), Some(&colors), "f").unwrap(),
            DefaultValue::Enum(3)
        );
        assert_eq!(
            materialize(&field(FieldType::Enum, Some("RED")), Some(&colors), "f").unwrap(),
            DefaultValue::Enum(0)
        );
        assert!(matches!(
            materialize(&field(FieldType::Enum, Some("BLUE")), Some(&colors), "f"),
            Err(SchemaError::DefaultValueParse { .. })
        ));
    }

    #[test]
    fn test_message_has_no_default() {
        assert_eq!(
            materialize(&field(FieldType::Message, None), None, "f").unwrap(),
            DefaultValue::Absent
        );
    }

    #[test]
    fn test_bytes_unescape() {
        assert_eq!(unescape_bytes(r"a\nb").unwrap(), b"a\nb".to_vec());
        assert_eq!(unescape_bytes(r"\000\377").unwrap(), vec![0, 255]);
        assert_eq!(unescape_bytes(r"\x41\x7").unwrap(), vec![0x41, 0x07]);
        assert_eq!(unescape_bytes(r#"\"\'\\"#).unwrap(), b"\"'\\".to_vec());
        assert!(unescape_bytes(r"\q").is_err());
        assert!(unescape_bytes("end\\").is_err());
    }
}
