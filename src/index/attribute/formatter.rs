//! Record layout of a pack attribute and per-sub-attribute accessors.

use ahash::AHashMap;

use crate::error::{IndexlibError, Result};
use crate::index::attribute::value::{AttributeValue, NumericValue, NumericVisitor, with_numeric_type};
use crate::index::schema::{FieldType, MULTI_VALUE_SEPARATOR, PackAttributeConfig, Schema};
use crate::util::varint;

const VAR_OFFSET_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Fixed { offset: usize, size: usize },
    Var { offset_pos: usize },
}

/// Where and how one sub-attribute lives inside a record.
#[derive(Debug, Clone)]
pub struct AttributeReference {
    id: usize,
    name: String,
    field_type: FieldType,
    multi_value: bool,
    fixed_length: Option<usize>,
    null_bit: Option<usize>,
    slot: Slot,
    header_len: usize,
}

impl AttributeReference {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_multi_value(&self) -> bool {
        self.multi_value
    }

    pub fn is_nullable(&self) -> bool {
        self.null_bit.is_some()
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.slot, Slot::Fixed { .. })
    }

    fn check_len(&self, record: &[u8]) -> Result<()> {
        if record.len() < self.header_len {
            return Err(IndexlibError::index(format!(
                "pack record of {} bytes is shorter than its {}-byte header",
                record.len(),
                self.header_len
            )));
        }
        Ok(())
    }

    pub fn is_null(&self, record: &[u8]) -> Result<bool> {
        self.check_len(record)?;
        Ok(match self.null_bit {
            Some(bit) => record[bit / 8] & (1 << (bit % 8)) != 0,
            None => false,
        })
    }

    fn fixed_bytes<'r>(&self, record: &'r [u8]) -> Result<&'r [u8]> {
        match self.slot {
            Slot::Fixed { offset, size } => Ok(&record[offset..offset + size]),
            Slot::Var { .. } => Err(IndexlibError::invalid_argument(format!(
                "sub-attribute '{}' is not fixed width",
                self.name
            ))),
        }
    }

    fn var_bytes<'r>(&self, record: &'r [u8]) -> Result<&'r [u8]> {
        let Slot::Var { offset_pos } = self.slot else {
            return Err(IndexlibError::invalid_argument(format!(
                "sub-attribute '{}' is not variable length",
                self.name
            )));
        };
        let read_offset = |pos: usize| -> usize {
            u32::from_le_bytes([record[pos], record[pos + 1], record[pos + 2], record[pos + 3]])
                as usize
        };
        let start = read_offset(offset_pos);
        let next_pos = offset_pos + VAR_OFFSET_SIZE;
        let end = if next_pos < self.header_len {
            read_offset(next_pos)
        } else {
            record.len()
        };
        if start < self.header_len || start > end || end > record.len() {
            return Err(IndexlibError::index(format!(
                "sub-attribute '{}' spans {start}..{end} outside its {}-byte record",
                self.name,
                record.len()
            )));
        }
        Ok(&record[start..end])
    }

    fn type_mismatch(&self, requested: &str) -> IndexlibError {
        IndexlibError::invalid_argument(format!(
            "sub-attribute '{}' is {}{}, read as {requested}",
            self.name,
            if self.multi_value { "multi " } else { "" },
            self.field_type
        ))
    }

    /// Read a single numeric value. `Ok(None)` means null.
    pub fn read_numeric<T: NumericValue>(&self, record: &[u8]) -> Result<Option<T>> {
        if !T::matches(self.field_type) || self.multi_value {
            return Err(self.type_mismatch(std::any::type_name::<T>()));
        }
        if self.is_null(record)? {
            return Ok(None);
        }
        Ok(Some(T::read_le(self.fixed_bytes(record)?)))
    }

    /// Read a multi-value numeric field. `Ok(None)` means null.
    pub fn read_multi_numeric<T: NumericValue>(&self, record: &[u8]) -> Result<Option<Vec<T>>> {
        if !T::matches(self.field_type) || !self.multi_value {
            return Err(self.type_mismatch(std::any::type_name::<T>()));
        }
        if self.is_null(record)? {
            return Ok(None);
        }
        decode_numeric_list(self.var_bytes(record)?).map(Some)
    }

    /// Read a single-value string field. `Ok(None)` means null.
    pub fn read_string(&self, record: &[u8]) -> Result<Option<String>> {
        if self.field_type != FieldType::String || self.multi_value {
            return Err(self.type_mismatch("string"));
        }
        if self.is_null(record)? {
            return Ok(None);
        }
        let bytes = match self.slot {
            Slot::Fixed { .. } => {
                let bytes = self.fixed_bytes(record)?;
                let len = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                &bytes[..len]
            }
            Slot::Var { .. } => decode_bytes(self.var_bytes(record)?)?,
        };
        utf8(bytes).map(Some)
    }

    /// Read a 128-bit hash. `Ok(None)` means null.
    pub fn read_hash128(&self, record: &[u8]) -> Result<Option<u128>> {
        if self.field_type != FieldType::Hash128 {
            return Err(self.type_mismatch("hash128"));
        }
        if self.is_null(record)? {
            return Ok(None);
        }
        let bytes = self.fixed_bytes(record)?;
        let mut buf = [0u8; 16];
        buf.copy_from_slice(bytes);
        Ok(Some(u128::from_le_bytes(buf)))
    }

    /// Decode whatever the sub-attribute holds.
    pub fn read(&self, record: &[u8]) -> Result<AttributeValue> {
        if self.is_null(record)? {
            return Ok(AttributeValue::Null);
        }
        match (self.field_type, self.multi_value) {
            (FieldType::String, false) => {
                Ok(AttributeValue::Str(self.read_string(record)?.unwrap_or_default()))
            }
            (FieldType::String, true) => {
                let bytes = self.var_bytes(record)?;
                Ok(AttributeValue::MultiStr(decode_string_list(bytes)?))
            }
            (FieldType::Text | FieldType::Location, _) => {
                let bytes = decode_bytes(self.var_bytes(record)?)?;
                Ok(AttributeValue::Str(utf8(bytes)?))
            }
            (FieldType::Hash128, _) => {
                Ok(AttributeValue::Hash128(self.read_hash128(record)?.unwrap_or_default()))
            }
            (field_type, multi_value) => {
                let bytes = if multi_value {
                    self.var_bytes(record)?
                } else {
                    self.fixed_bytes(record)?
                };
                with_numeric_type(field_type, DecodeNumeric { bytes, multi_value })
                    .unwrap_or_else(|| Err(self.type_mismatch("numeric")))
            }
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| IndexlibError::index(format!("invalid UTF-8 in attribute: {e}")))
}

/// `varint len, bytes` -> bytes
fn decode_bytes(data: &[u8]) -> Result<&[u8]> {
    let (len, pos) = varint::decode_u64(data)?;
    data.get(pos..pos + len as usize)
        .ok_or_else(|| IndexlibError::index("attribute value truncated"))
}

fn decode_string_list(data: &[u8]) -> Result<Vec<String>> {
    let (count, mut pos) = varint::decode_u64(data)?;
    let mut values = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let bytes = decode_bytes(&data[pos..])?;
        pos += varint::encoded_len_u64(bytes.len() as u64) + bytes.len();
        values.push(utf8(bytes)?);
    }
    Ok(values)
}

fn decode_numeric_list<T: NumericValue>(data: &[u8]) -> Result<Vec<T>> {
    let (count, pos) = varint::decode_u64(data)?;
    let body = &data[pos..];
    if body.len() as u64 != count * T::SIZE as u64 {
        return Err(IndexlibError::index(format!(
            "multi-value of {count} items has {} bytes",
            body.len()
        )));
    }
    Ok(body.chunks_exact(T::SIZE).map(T::read_le).collect())
}

struct DecodeNumeric<'a> {
    bytes: &'a [u8],
    multi_value: bool,
}

impl NumericVisitor for DecodeNumeric<'_> {
    type Output = Result<AttributeValue>;

    fn visit<T: NumericValue>(self) -> Result<AttributeValue> {
        if self.multi_value {
            Ok(T::into_multi_value(decode_numeric_list::<T>(self.bytes)?))
        } else {
            Ok(T::read_le(self.bytes).into_value())
        }
    }
}

struct EncodeNumeric<'a> {
    text: Option<&'a str>,
    multi_value: bool,
    out: &'a mut Vec<u8>,
}

impl NumericVisitor for EncodeNumeric<'_> {
    type Output = Result<()>;

    fn visit<T: NumericValue>(self) -> Result<()> {
        if self.multi_value {
            let values = split_values(self.text.unwrap_or(""))
                .map(T::parse)
                .collect::<Result<Vec<T>>>()?;
            varint::encode_u64_into(values.len() as u64, self.out);
            for value in values {
                value.write_le(self.out);
            }
        } else {
            match self.text.map(str::trim).filter(|t| !t.is_empty()) {
                Some(text) => T::parse(text)?.write_le(self.out),
                None => self.out.resize(self.out.len() + T::SIZE, 0),
            }
        }
        Ok(())
    }
}

fn split_values(text: &str) -> impl Iterator<Item = &str> {
    text.split(MULTI_VALUE_SEPARATOR).filter(|v| !v.is_empty())
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    varint::encode_u64_into(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

/// Fixed layout of one pack attribute.
#[derive(Debug, Clone)]
pub struct PackAttributeFormatter {
    pack_name: String,
    references: Vec<AttributeReference>,
    by_name: AHashMap<String, usize>,
    null_bytes: usize,
    header_len: usize,
}

impl PackAttributeFormatter {
    pub fn new(pack: &PackAttributeConfig, schema: &Schema) -> Result<Self> {
        let mut fields = Vec::with_capacity(pack.sub_attributes.len());
        for name in &pack.sub_attributes {
            let field = schema.field(name).ok_or_else(|| {
                IndexlibError::schema(format!(
                    "pack attribute '{}' references unknown field '{name}'",
                    pack.name
                ))
            })?;
            if field.multi_value
                && matches!(
                    field.field_type,
                    FieldType::Hash128 | FieldType::Text | FieldType::Location
                )
            {
                return Err(IndexlibError::schema(format!(
                    "sub-attribute '{name}' of type {} cannot be multi-value",
                    field.field_type
                )));
            }
            fields.push(field);
        }

        let nullable_count = fields.iter().filter(|f| f.nullable).count();
        let null_bytes = nullable_count.div_ceil(8);

        // Fixed slots first, in declaration order, then the var offset table.
        let mut fixed_offset = null_bytes;
        let mut slots = Vec::with_capacity(fields.len());
        let mut var_count = 0usize;
        for field in &fields {
            let fixed_size = if field.multi_value {
                None
            } else {
                field.fixed_length.or(field.field_type.fixed_size())
            };
            match fixed_size {
                Some(size) => {
                    slots.push(Some(Slot::Fixed {
                        offset: fixed_offset,
                        size,
                    }));
                    fixed_offset += size;
                }
                None => {
                    slots.push(None);
                    var_count += 1;
                }
            }
        }
        let header_len = fixed_offset + var_count * VAR_OFFSET_SIZE;

        let mut references = Vec::with_capacity(fields.len());
        let mut by_name = AHashMap::with_capacity(fields.len());
        let mut next_null_bit = 0usize;
        let mut next_var = 0usize;
        for (id, (field, slot)) in fields.iter().zip(slots).enumerate() {
            let slot = slot.unwrap_or_else(|| {
                let slot = Slot::Var {
                    offset_pos: fixed_offset + next_var * VAR_OFFSET_SIZE,
                };
                next_var += 1;
                slot
            });
            let null_bit = field.nullable.then(|| {
                next_null_bit += 1;
                next_null_bit - 1
            });
            by_name.insert(field.name.clone(), id);
            references.push(AttributeReference {
                id,
                name: field.name.clone(),
                field_type: field.field_type,
                multi_value: field.multi_value,
                fixed_length: field.fixed_length,
                null_bit,
                slot,
                header_len,
            });
        }

        Ok(PackAttributeFormatter {
            pack_name: pack.name.clone(),
            references,
            by_name,
            null_bytes,
            header_len,
        })
    }

    pub fn pack_name(&self) -> &str {
        &self.pack_name
    }

    /// Accessor for sub-attribute `name`; `None` if the pack lacks it.
    pub fn reference(&self, name: &str) -> Option<&AttributeReference> {
        self.by_name.get(name).map(|&id| &self.references[id])
    }

    pub fn reference_by_id(&self, id: usize) -> Option<&AttributeReference> {
        self.references.get(id)
    }

    pub fn references(&self) -> &[AttributeReference] {
        &self.references
    }

    pub fn sub_attribute_names(&self) -> impl Iterator<Item = &str> {
        self.references.iter().map(|r| r.name.as_str())
    }

    /// Bytes before the var-len data of every record.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Build a record from raw values given in sub-attribute order.
    /// `None` is a missing value: null if nullable, the type default
    /// otherwise.
    pub fn encode(&self, values: &[Option<&str>]) -> Result<Vec<u8>> {
        if values.len() != self.references.len() {
            return Err(IndexlibError::invalid_argument(format!(
                "pack attribute '{}' has {} sub-attributes, got {} values",
                self.pack_name,
                self.references.len(),
                values.len()
            )));
        }

        let mut record = vec![0u8; self.null_bytes];
        let mut var_values: Vec<Vec<u8>> = Vec::new();
        for (reference, value) in self.references.iter().zip(values) {
            if value.is_none() {
                if let Some(bit) = reference.null_bit {
                    record[bit / 8] |= 1 << (bit % 8);
                }
            }
            if reference.is_fixed() {
                encode_value(reference, *value, &mut record)?;
            } else {
                let mut buf = Vec::new();
                encode_value(reference, *value, &mut buf)?;
                var_values.push(buf);
            }
        }

        let mut offset = self.header_len;
        for value in &var_values {
            record.extend_from_slice(&(offset as u32).to_le_bytes());
            offset += value.len();
        }
        for value in var_values {
            record.extend_from_slice(&value);
        }
        if offset > u32::MAX as usize {
            return Err(IndexlibError::invalid_argument(format!(
                "pack record of {offset} bytes exceeds the 4 GiB limit"
            )));
        }
        Ok(record)
    }

    /// Decode every sub-attribute of a record.
    pub fn decode(&self, record: &[u8]) -> Result<Vec<(&str, AttributeValue)>> {
        self.references
            .iter()
            .map(|reference| Ok((reference.name(), reference.read(record)?)))
            .collect()
    }
}

fn encode_value(reference: &AttributeReference, value: Option<&str>, out: &mut Vec<u8>) -> Result<()> {
    match reference.field_type {
        FieldType::String if reference.multi_value => {
            let values: Vec<&str> = split_values(value.unwrap_or("")).collect();
            varint::encode_u64_into(values.len() as u64, out);
            for value in values {
                encode_bytes(value.as_bytes(), out);
            }
        }
        FieldType::String => {
            let bytes = value.unwrap_or("").as_bytes();
            match reference.fixed_length {
                Some(length) if reference.is_fixed() => {
                    if bytes.len() > length {
                        return Err(IndexlibError::invalid_argument(format!(
                            "value of '{}' is {} bytes, fixed length is {length}",
                            reference.name,
                            bytes.len()
                        )));
                    }
                    out.extend_from_slice(bytes);
                    out.resize(out.len() + length - bytes.len(), 0);
                }
                _ => encode_bytes(bytes, out),
            }
        }
        FieldType::Text | FieldType::Location => encode_bytes(value.unwrap_or("").as_bytes(), out),
        FieldType::Hash128 => {
            let hash = match value.map(str::trim).filter(|v| !v.is_empty()) {
                Some(text) => text.parse::<u128>().map_err(|e| {
                    IndexlibError::invalid_argument(format!("cannot parse '{text}' as hash128: {e}"))
                })?,
                None => 0,
            };
            out.extend_from_slice(&hash.to_le_bytes());
        }
        field_type => {
            let visitor = EncodeNumeric {
                text: value,
                multi_value: reference.multi_value,
                out,
            };
            with_numeric_type(field_type, visitor).ok_or_else(|| {
                IndexlibError::invalid_argument(format!("cannot encode {field_type}"))
            })??;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::schema::FieldConfig;

    fn schema() -> Schema {
        Schema::new("s")
            .with_field(FieldConfig::new("price", FieldType::Double))
            .with_field(FieldConfig::new("stock", FieldType::Int32).nullable())
            .with_field(FieldConfig::new("title", FieldType::String))
            .with_field(FieldConfig::new("code", FieldType::String).fixed_length(4))
            .with_field(FieldConfig::new("ids", FieldType::UInt16).multi_value())
            .with_field(FieldConfig::new("tags", FieldType::String).multi_value().nullable())
            .with_field(FieldConfig::new("key", FieldType::Hash128))
            .with_field(FieldConfig::new("body", FieldType::Text))
    }

    fn formatter() -> PackAttributeFormatter {
        let pack = PackAttributeConfig::new(
            "pack",
            vec!["price", "stock", "title", "code", "ids", "tags", "key", "body"],
        );
        PackAttributeFormatter::new(&pack, &schema()).unwrap()
    }

    #[test]
    fn test_layout() {
        let formatter = formatter();
        // 1 null byte, 8 + 4 + 4 + 16 fixed bytes, 4 var offsets.
        assert_eq!(formatter.header_len(), 1 + 32 + 16);
        assert!(formatter.reference("price").unwrap().is_fixed());
        assert!(!formatter.reference("title").unwrap().is_fixed());
        assert!(formatter.reference("stock").unwrap().is_nullable());
        assert!(formatter.reference("missing").is_none());
        assert_eq!(formatter.reference_by_id(4).unwrap().name(), "ids");
    }

    #[test]
    fn test_encode_and_read() {
        let formatter = formatter();
        let record = formatter
            .encode(&[
                Some("9.5"),
                None,
                Some("red shoe"),
                Some("AB"),
                Some("1\x1D2\x1D3"),
                Some("x\x1Dy"),
                Some("340282366920938463463374607431768211455"),
                Some("long text"),
            ])
            .unwrap();

        let get = |name: &str| formatter.reference(name).unwrap().read(&record).unwrap();
        assert_eq!(get("price"), AttributeValue::Float(9.5));
        assert_eq!(get("stock"), AttributeValue::Null);
        assert_eq!(get("title"), AttributeValue::Str("red shoe".into()));
        assert_eq!(get("code"), AttributeValue::Str("AB".into()));
        assert_eq!(get("ids"), AttributeValue::MultiUInt(vec![1, 2, 3]));
        assert_eq!(get("tags").to_string(), "x\x1Dy");
        assert_eq!(get("key"), AttributeValue::Hash128(u128::MAX));
        assert_eq!(get("body"), AttributeValue::Str("long text".into()));

        let price = formatter.reference("price").unwrap();
        assert_eq!(price.read_numeric::<f64>(&record).unwrap(), Some(9.5));
        assert!(matches!(
            price.read_numeric::<f32>(&record),
            Err(IndexlibError::InvalidArgument(_))
        ));
        let stock = formatter.reference("stock").unwrap();
        assert_eq!(stock.read_numeric::<i32>(&record).unwrap(), None);
        let ids = formatter.reference("ids").unwrap();
        assert_eq!(
            ids.read_multi_numeric::<u16>(&record).unwrap(),
            Some(vec![1, 2, 3])
        );
        assert!(ids.read_numeric::<u16>(&record).is_err());
    }

    #[test]
    fn test_missing_non_nullable_uses_defaults() {
        let formatter = formatter();
        let record = formatter.encode(&[None; 8]).unwrap();
        let get = |name: &str| formatter.reference(name).unwrap().read(&record).unwrap();

        assert_eq!(get("price"), AttributeValue::Float(0.0));
        assert_eq!(get("title"), AttributeValue::Str(String::new()));
        assert_eq!(get("ids"), AttributeValue::MultiUInt(vec![]));
        assert_eq!(get("tags"), AttributeValue::Null);
    }

    #[test]
    fn test_encode_errors() {
        let formatter = formatter();
        let mut values = [None; 8];
        values[0] = Some("not a number");
        assert!(formatter.encode(&values).is_err());

        let mut values = [None; 8];
        values[3] = Some("TOO LONG");
        assert!(formatter.encode(&values).is_err());

        assert!(formatter.encode(&[None; 3]).is_err());
    }

    #[test]
    fn test_short_record_is_index_error() {
        let formatter = formatter();
        let price = formatter.reference("price").unwrap();
        assert!(matches!(
            price.read(&[0u8; 3]),
            Err(IndexlibError::Index(_))
        ));
    }
}
