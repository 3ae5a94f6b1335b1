//! Typed attribute values and per-type numeric codecs.

use std::fmt;

use crate::error::{IndexlibError, Result};
use crate::index::schema::{FieldType, MULTI_VALUE_SEPARATOR};

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Hash128(u128),
    MultiInt(Vec<i64>),
    MultiUInt(Vec<u64>),
    MultiFloat(Vec<f64>),
    MultiStr(Vec<String>),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Single numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::UInt(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Single integer value as `i64`; unsigned values must fit.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            write!(f, "{MULTI_VALUE_SEPARATOR}")?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

/// Renders values the way raw documents spell them: multi-values joined by
/// the multi-value separator, null as the empty string.
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => Ok(()),
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::UInt(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Str(v) => f.write_str(v),
            AttributeValue::Hash128(v) => write!(f, "{v}"),
            AttributeValue::MultiInt(v) => join(f, v),
            AttributeValue::MultiUInt(v) => join(f, v),
            AttributeValue::MultiFloat(v) => join(f, v),
            AttributeValue::MultiStr(v) => join(f, v),
        }
    }
}

/// A fixed-width numeric type storable in a pack attribute.
pub trait NumericValue: Copy + PartialOrd + fmt::Debug + fmt::Display + Send + Sync + 'static {
    const SIZE: usize;

    /// Whether a field of type `field_type` is stored as `Self`.
    fn matches(field_type: FieldType) -> bool;

    fn read_le(bytes: &[u8]) -> Self;

    fn write_le(self, out: &mut Vec<u8>);

    fn parse(text: &str) -> Result<Self>;

    fn into_value(self) -> AttributeValue;

    fn into_multi_value(values: Vec<Self>) -> AttributeValue;

    fn to_f64(self) -> f64;
}

macro_rules! numeric_value {
    ($ty:ty, $variant:ident, $multi:ident, $wide:ty, [$($field:ident),+]) => {
        impl NumericValue for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn matches(field_type: FieldType) -> bool {
                matches!(field_type, $(FieldType::$field)|+)
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(&bytes[..Self::SIZE]);
                <$ty>::from_le_bytes(buf)
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn parse(text: &str) -> Result<Self> {
                text.trim().parse::<$ty>().map_err(|e| {
                    IndexlibError::invalid_argument(format!(
                        "cannot parse '{text}' as {}: {e}",
                        stringify!($ty)
                    ))
                })
            }

            fn into_value(self) -> AttributeValue {
                AttributeValue::$variant(self as $wide)
            }

            fn into_multi_value(values: Vec<Self>) -> AttributeValue {
                AttributeValue::$multi(values.into_iter().map(|v| v as $wide).collect())
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

numeric_value!(i8, Int, MultiInt, i64, [Int8]);
numeric_value!(u8, UInt, MultiUInt, u64, [UInt8]);
numeric_value!(i16, Int, MultiInt, i64, [Int16]);
numeric_value!(u16, UInt, MultiUInt, u64, [UInt16]);
numeric_value!(i32, Int, MultiInt, i64, [Int32]);
numeric_value!(u32, UInt, MultiUInt, u64, [UInt32]);
numeric_value!(i64, Int, MultiInt, i64, [Int64]);
numeric_value!(u64, UInt, MultiUInt, u64, [UInt64, Hash64]);
numeric_value!(f32, Float, MultiFloat, f64, [Float]);
numeric_value!(f64, Float, MultiFloat, f64, [Double]);

/// An operation generic over the numeric type of a field.
pub trait NumericVisitor {
    type Output;

    fn visit<T: NumericValue>(self) -> Self::Output;
}

/// Run `visitor` instantiated for the numeric type stored by `field_type`.
/// Returns `None` for non-numeric types.
pub fn with_numeric_type<V: NumericVisitor>(field_type: FieldType, visitor: V) -> Option<V::Output> {
    let output = match field_type {
        FieldType::Int8 => visitor.visit::<i8>(),
        FieldType::UInt8 => visitor.visit::<u8>(),
        FieldType::Int16 => visitor.visit::<i16>(),
        FieldType::UInt16 => visitor.visit::<u16>(),
        FieldType::Int32 => visitor.visit::<i32>(),
        FieldType::UInt32 => visitor.visit::<u32>(),
        FieldType::Int64 => visitor.visit::<i64>(),
        FieldType::UInt64 | FieldType::Hash64 => visitor.visit::<u64>(),
        FieldType::Float => visitor.visit::<f32>(),
        FieldType::Double => visitor.visit::<f64>(),
        FieldType::String | FieldType::Hash128 | FieldType::Text | FieldType::Location => {
            return None;
        }
    };
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Size;

    impl NumericVisitor for Size {
        type Output = usize;

        fn visit<T: NumericValue>(self) -> usize {
            T::SIZE
        }
    }

    #[test]
    fn test_dispatch_by_field_type() {
        assert_eq!(with_numeric_type(FieldType::Int8, Size), Some(1));
        assert_eq!(with_numeric_type(FieldType::UInt16, Size), Some(2));
        assert_eq!(with_numeric_type(FieldType::Float, Size), Some(4));
        assert_eq!(with_numeric_type(FieldType::Hash64, Size), Some(8));
        assert_eq!(with_numeric_type(FieldType::Text, Size), None);
        assert_eq!(with_numeric_type(FieldType::Hash128, Size), None);
    }

    #[test]
    fn test_numeric_codec() {
        let mut out = Vec::new();
        (-3i16).write_le(&mut out);
        assert_eq!(i16::read_le(&out), -3);
        assert_eq!(i16::parse(" 12 ").unwrap(), 12);
        assert!(u8::parse("300").is_err());
        assert!(u32::matches(FieldType::UInt32));
        assert!(!u32::matches(FieldType::Int32));
        assert_eq!(7u8.into_value(), AttributeValue::UInt(7));
    }

    #[test]
    fn test_display() {
        assert_eq!(AttributeValue::Null.to_string(), "");
        assert_eq!(AttributeValue::Float(1.5).to_string(), "1.5");
        assert_eq!(
            AttributeValue::MultiInt(vec![1, -2, 3]).to_string(),
            "1\x1D-2\x1D3"
        );
        assert_eq!(AttributeValue::UInt(9).as_i64(), Some(9));
        assert_eq!(AttributeValue::Str("x".into()).as_f64(), None);
    }
}
