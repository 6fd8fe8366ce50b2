use crate::driver::{field_flag, type_code, FieldDef};

/// Precision and scale reported for `DECIMAL` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecimalSize {
    pub precision: u32,
    pub scale: u32,
}

/// Canonical column type derived from the wire field packet.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeInfo {
    /// Canonical SQL type name (`INT`, `VARCHAR`, `MEDIUMTEXT`, ...).
    pub type_name: &'static str,

    pub nullable: bool,

    /// Declared length where the type has one: characters for textual
    /// types, bytes for binary ones, `None` for fixed-size types.
    pub length: Option<u32>,

    /// Present for `DECIMAL` columns only.
    pub decimal: Option<DecimalSize>,
}

/// Metadata for one column of a result set. Derived once from the field
/// packets and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Column {
    pub name: String,
    pub type_info: TypeInfo,
}

pub(crate) fn decode_columns(fields: &[FieldDef]) -> Vec<Column> {
    fields
        .iter()
        .map(|field| Column {
            name: field.name.clone(),
            type_info: decode_type(field),
        })
        .collect()
}

/// Character count for a textual column. The wire reports the byte cap,
/// which for utf8mb4 is four bytes per character.
fn chars(byte_length: u32) -> u32 {
    byte_length / 4
}

/// TEXT family name by the wire byte cap.
fn text_name(byte_length: u32) -> &'static str {
    match byte_length {
        0..=1020 => "TINYTEXT",
        1021..=262_140 => "TEXT",
        262_141..=67_108_860 => "MEDIUMTEXT",
        _ => "LONGTEXT",
    }
}

/// BLOB family name by the wire byte cap.
fn blob_name(byte_length: u32) -> &'static str {
    match byte_length {
        0..=255 => "TINYBLOB",
        256..=65_535 => "BLOB",
        65_536..=16_777_215 => "MEDIUMBLOB",
        _ => "LONGBLOB",
    }
}

fn decode_type(field: &FieldDef) -> TypeInfo {
    let nullable = field.flags & field_flag::NOT_NULL == 0;

    let (type_name, length, decimal) = match field.type_code {
        type_code::DECIMAL | type_code::NEWDECIMAL => (
            "DECIMAL",
            None,
            Some(DecimalSize {
                // Empirical wire mapping: the reported length includes the
                // sign and decimal point.
                precision: field.column_length.saturating_sub(2),
                scale: field.decimals.into(),
            }),
        ),

        // BOOL is TINYINT(1) on the wire.
        type_code::TINY if field.column_length == 1 => ("BOOL", None, None),
        type_code::TINY => ("TINYINT", None, None),
        type_code::SHORT => ("SMALLINT", None, None),
        type_code::LONG | type_code::INT24 => ("INT", None, None),
        type_code::LONGLONG => ("BIGINT", None, None),

        type_code::FLOAT => ("FLOAT", None, None),
        type_code::DOUBLE => ("DOUBLE", None, None),

        type_code::NULL => ("NULL", None, None),

        type_code::TIMESTAMP => ("TIMESTAMP", None, None),
        type_code::DATE => ("DATE", None, None),
        type_code::TIME => ("TIME", None, None),
        type_code::DATETIME => ("DATETIME", None, None),
        type_code::YEAR => ("YEAR", None, None),

        type_code::BIT => ("BIT", Some(field.column_length), None),
        type_code::JSON => ("JSON", None, None),
        type_code::GEOMETRY => ("GEOMETRY", None, None),

        type_code::ENUM => ("ENUM", Some(chars(field.column_length)), None),
        type_code::SET => ("SET", Some(chars(field.column_length)), None),

        type_code::VARCHAR | type_code::VAR_STRING => {
            ("VARCHAR", Some(chars(field.column_length)), None)
        }

        type_code::STRING if field.flags & field_flag::ENUM != 0 => {
            ("ENUM", Some(chars(field.column_length)), None)
        }
        type_code::STRING if field.flags & field_flag::SET != 0 => {
            ("SET", Some(chars(field.column_length)), None)
        }
        type_code::STRING => ("CHAR", Some(chars(field.column_length)), None),

        type_code::TINY_BLOB
        | type_code::MEDIUM_BLOB
        | type_code::LONG_BLOB
        | type_code::BLOB => {
            if field.flags & field_flag::BINARY != 0 {
                (blob_name(field.column_length), Some(field.column_length), None)
            } else {
                (
                    text_name(field.column_length),
                    Some(chars(field.column_length)),
                    None,
                )
            }
        }

        _ => ("VARCHAR", Some(chars(field.column_length)), None),
    };

    TypeInfo {
        type_name,
        nullable,
        length,
        decimal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(type_code: u8, flags: u16, column_length: u32, decimals: u8) -> FieldDef {
        FieldDef {
            name: "c".into(),
            type_code,
            flags,
            column_length,
            decimals,
        }
    }

    #[test]
    fn integer_types_have_no_length() {
        let ty = decode_type(&field(type_code::LONG, field_flag::NOT_NULL, 11, 0));
        assert_eq!(ty.type_name, "INT");
        assert_eq!(ty.length, None);
        assert!(!ty.nullable);

        let ty = decode_type(&field(type_code::LONGLONG, 0, 20, 0));
        assert_eq!(ty.type_name, "BIGINT");
        assert!(ty.nullable);

        assert_eq!(decode_type(&field(type_code::INT24, 0, 9, 0)).type_name, "INT");
        assert_eq!(decode_type(&field(type_code::SHORT, 0, 6, 0)).type_name, "SMALLINT");
    }

    #[test]
    fn tinyint_display_width_one_is_bool() {
        assert_eq!(decode_type(&field(type_code::TINY, 0, 1, 0)).type_name, "BOOL");
        assert_eq!(decode_type(&field(type_code::TINY, 0, 4, 0)).type_name, "TINYINT");
    }

    #[test]
    fn varchar_length_is_reported_in_characters() {
        // VARCHAR(255) under utf8mb4 reports a 1020-byte cap.
        let ty = decode_type(&field(type_code::VAR_STRING, 0, 1020, 0));
        assert_eq!(ty.type_name, "VARCHAR");
        assert_eq!(ty.length, Some(255));
    }

    #[test]
    fn char_and_enum_flags_on_string() {
        let ty = decode_type(&field(type_code::STRING, 0, 40, 0));
        assert_eq!(ty.type_name, "CHAR");
        assert_eq!(ty.length, Some(10));

        let ty = decode_type(&field(type_code::STRING, field_flag::ENUM, 28, 0));
        assert_eq!(ty.type_name, "ENUM");

        let ty = decode_type(&field(type_code::STRING, field_flag::SET, 28, 0));
        assert_eq!(ty.type_name, "SET");
    }

    #[test]
    fn decimal_reports_precision_and_scale() {
        // DECIMAL(10, 2) reports column_length 12.
        let ty = decode_type(&field(type_code::NEWDECIMAL, 0, 12, 2));
        assert_eq!(ty.type_name, "DECIMAL");
        assert_eq!(
            ty.decimal,
            Some(DecimalSize {
                precision: 10,
                scale: 2
            })
        );
        assert_eq!(ty.length, None);
    }

    #[test]
    fn blob_family_splits_on_binary_flag() {
        let ty = decode_type(&field(type_code::BLOB, field_flag::BINARY, 65_535, 0));
        assert_eq!(ty.type_name, "BLOB");
        assert_eq!(ty.length, Some(65_535));

        // TEXT under utf8mb4 reports a 262140-byte cap.
        let ty = decode_type(&field(type_code::BLOB, 0, 262_140, 0));
        assert_eq!(ty.type_name, "TEXT");
        assert_eq!(ty.length, Some(65_535));

        let ty = decode_type(&field(type_code::LONG_BLOB, 0, u32::MAX, 0));
        assert_eq!(ty.type_name, "LONGTEXT");
    }
}
