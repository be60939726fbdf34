//! Field-level codec: one wire value to one [`FieldValue`] and back,
//! dispatched on the field's declared semantic type.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use fixlink_metadata::{FieldDef, FieldType, Protocol};

use crate::{DecodeError, EncodeError, FieldValue};

const TIMESTAMP_FMT_MILLIS: &str = "%Y%m%d-%H:%M:%S%.3f";
const TIMESTAMP_FMT_NO_MILLIS: &str = "%Y%m%d-%H:%M:%S";
const TIMEONLY_FMT_MILLIS: &str = "%H:%M:%S%.3f";
const TIMEONLY_FMT_NO_MILLIS: &str = "%H:%M:%S";
const DATE_FMT: &str = "%Y%m%d";

fn bad_value(field: &FieldDef, value: &[u8]) -> DecodeError {
    DecodeError::BadValue {
        field: field.name().to_owned(),
        value: String::from_utf8_lossy(value).into_owned(),
    }
}

fn ascii<'a>(field: &FieldDef, value: &'a [u8]) -> Result<&'a str, DecodeError> {
    std::str::from_utf8(value).map_err(|_| bad_value(field, value))
}

/// Decode a single wire value. An empty value decodes to absent.
///
/// Fields carrying an enumeration decode to the logical name when the
/// wire token matches; a token outside the enumeration is still accepted
/// and decoded by its semantic type.
pub fn decode_value(
    protocol: &Protocol,
    field: &FieldDef,
    value: &[u8],
) -> Result<Option<FieldValue>, DecodeError> {
    if value.is_empty() {
        return Ok(None);
    }

    let decoded = match field.field_type() {
        FieldType::Int | FieldType::SeqNum | FieldType::NumInGroup | FieldType::Length => {
            if let Some(name) = field.values().and_then(|values| values.name_of(value)) {
                FieldValue::Str(name.to_owned())
            } else {
                let text = ascii(field, value)?;
                FieldValue::Int(text.parse().map_err(|_| bad_value(field, value))?)
            }
        }
        FieldType::Float
        | FieldType::Qty
        | FieldType::Price
        | FieldType::PriceOffset
        | FieldType::Amt => {
            let text = ascii(field, value)?;
            if protocol.decimal_float() {
                FieldValue::Decimal(text.parse().map_err(|_| bad_value(field, value))?)
            } else {
                FieldValue::Float(text.parse().map_err(|_| bad_value(field, value))?)
            }
        }
        FieldType::Char | FieldType::String | FieldType::Currency | FieldType::Exchange => {
            match field.values().and_then(|values| values.name_of(value)) {
                Some(name) => FieldValue::Str(name.to_owned()),
                None => FieldValue::Str(ascii(field, value)?.to_owned()),
            }
        }
        FieldType::MonthYear => FieldValue::Str(ascii(field, value)?.to_owned()),
        FieldType::Boolean => {
            if protocol.bool_enum()
                && let Some(name) = field.values().and_then(|values| values.name_of(value))
            {
                FieldValue::Str(name.to_owned())
            } else {
                match value {
                    b"Y" => FieldValue::Bool(true),
                    b"N" => FieldValue::Bool(false),
                    _ => return Err(bad_value(field, value)),
                }
            }
        }
        FieldType::MultipleValueString => FieldValue::StringList(
            ascii(field, value)?
                .split(' ')
                .map(ToOwned::to_owned)
                .collect(),
        ),
        FieldType::UtcTimestamp => {
            let fmt = if protocol.millisecond_time() {
                TIMESTAMP_FMT_MILLIS
            } else {
                TIMESTAMP_FMT_NO_MILLIS
            };
            let timestamp = NaiveDateTime::parse_from_str(ascii(field, value)?, fmt)
                .map_err(|_| bad_value(field, value))?;
            FieldValue::DateTime(timestamp.and_utc())
        }
        FieldType::UtcTimeOnly => {
            let fmt = if protocol.millisecond_time() {
                TIMEONLY_FMT_MILLIS
            } else {
                TIMEONLY_FMT_NO_MILLIS
            };
            let time = NaiveTime::parse_from_str(ascii(field, value)?, fmt)
                .map_err(|_| bad_value(field, value))?;
            FieldValue::TimeOfDay(time)
        }
        FieldType::LocalMktDate | FieldType::UtcDate => {
            let date = NaiveDate::parse_from_str(ascii(field, value)?, DATE_FMT)
                .map_err(|_| bad_value(field, value))?;
            FieldValue::Date(date)
        }
    };

    Ok(Some(decoded))
}

fn unexpected(field: &FieldDef, expected: &'static str) -> EncodeError {
    EncodeError::UnexpectedValueType {
        field: field.name().to_owned(),
        expected,
    }
}

/// Encode a single value to its wire form.
///
/// A string value naming an entry of the field's enumeration encodes to
/// the wire token, inverting the decode-side substitution.
pub fn encode_value(
    protocol: &Protocol,
    field: &FieldDef,
    value: &FieldValue,
) -> Result<Vec<u8>, EncodeError> {
    if let FieldValue::Str(name) = value
        && let Some(token) = field.values().and_then(|values| values.token_of(name))
    {
        return Ok(token.to_vec());
    }

    let encoded = match field.field_type() {
        FieldType::Int | FieldType::SeqNum | FieldType::NumInGroup | FieldType::Length => {
            match value {
                FieldValue::Int(value) => itoa::Buffer::new().format(*value).as_bytes().to_vec(),
                _ => return Err(unexpected(field, "integer")),
            }
        }
        FieldType::Float
        | FieldType::Qty
        | FieldType::Price
        | FieldType::PriceOffset
        | FieldType::Amt => match value {
            // Decimals keep their string form, so scale is preserved.
            FieldValue::Decimal(value) => value.to_string().into_bytes(),
            FieldValue::Float(value) if value.fract() == 0.0 => {
                itoa::Buffer::new().format(*value as i64).as_bytes().to_vec()
            }
            FieldValue::Float(value) => value.to_string().into_bytes(),
            FieldValue::Int(value) => itoa::Buffer::new().format(*value).as_bytes().to_vec(),
            _ => return Err(unexpected(field, "decimal or float")),
        },
        FieldType::Char
        | FieldType::String
        | FieldType::Currency
        | FieldType::Exchange
        | FieldType::MonthYear => match value {
            FieldValue::Str(value) => value.clone().into_bytes(),
            _ => return Err(unexpected(field, "string")),
        },
        FieldType::Boolean => match value {
            FieldValue::Bool(true) => b"Y".to_vec(),
            FieldValue::Bool(false) => b"N".to_vec(),
            _ => return Err(unexpected(field, "boolean")),
        },
        FieldType::MultipleValueString => match value {
            FieldValue::StringList(values) => values.join(" ").into_bytes(),
            _ => return Err(unexpected(field, "string list")),
        },
        FieldType::UtcTimestamp => match value {
            // %.3f truncates to milliseconds.
            FieldValue::DateTime(value) => {
                let fmt = if protocol.millisecond_time() {
                    TIMESTAMP_FMT_MILLIS
                } else {
                    TIMESTAMP_FMT_NO_MILLIS
                };
                value.format(fmt).to_string().into_bytes()
            }
            _ => return Err(unexpected(field, "timestamp")),
        },
        FieldType::UtcTimeOnly => match value {
            FieldValue::TimeOfDay(value) => {
                let fmt = if protocol.millisecond_time() {
                    TIMEONLY_FMT_MILLIS
                } else {
                    TIMEONLY_FMT_NO_MILLIS
                };
                value.format(fmt).to_string().into_bytes()
            }
            _ => return Err(unexpected(field, "time of day")),
        },
        FieldType::LocalMktDate | FieldType::UtcDate => match value {
            FieldValue::Date(value) => value.format(DATE_FMT).to_string().into_bytes(),
            FieldValue::DateTime(value) => {
                value.date_naive().format(DATE_FMT).to_string().into_bytes()
            }
            _ => return Err(unexpected(field, "date")),
        },
    };

    Ok(encoded)
}
