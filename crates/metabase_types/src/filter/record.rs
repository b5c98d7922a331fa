//! Generate category filters from the named fields of a struct.
//!
//! The record opts in through `serde::Serialize`. Field names come from the
//! serialized keys, so `#[serde(rename = "...")]` overrides the tag name and
//! skipped fields produce no filter. Anything other than a struct with named
//! fields is rejected.

use super::value::to_filter_value;
use super::{new_category_filter, Filter};
use metabase_error::error::FilterError;
use serde::ser::{Impossible, Serialize, SerializeStruct, Serializer};

/// Build one category filter per field of `record`, in declaration order.
///
/// The tag name is the serialized field key: a `#[serde(rename)]` override, or
/// else the declared field name as written. Default names are not lowercased,
/// so a `#[allow(non_snake_case)] Region` field binds to the tag `Region`.
pub fn filters_from_record<T>(record: &T) -> Result<Vec<Filter>, FilterError>
where
    T: Serialize + ?Sized,
{
    record.serialize(RecordSerializer)
}

fn invalid(kind: &str) -> FilterError {
    FilterError::InvalidInputKind(kind.to_string())
}

struct RecordSerializer;

struct FieldCollector {
    filters: Vec<Filter>,
}

impl SerializeStruct for FieldCollector {
    type Ok = Vec<Filter>;
    type Error = FilterError;

    fn serialize_field<V>(&mut self, key: &'static str, value: &V) -> Result<(), Self::Error>
    where
        V: Serialize + ?Sized,
    {
        let value = to_filter_value(value).map_err(|e| match e {
            FilterError::SerializationError(msg) => {
                FilterError::SerializationError(format!("field {}: {}", key, msg))
            }
            other => other,
        })?;

        self.filters.push(new_category_filter(key, value));
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(self.filters)
    }
}

type Rejected = Impossible<Vec<Filter>, FilterError>;

impl Serializer for RecordSerializer {
    type Ok = Vec<Filter>;
    type Error = FilterError;

    type SerializeSeq = Rejected;
    type SerializeTuple = Rejected;
    type SerializeTupleStruct = Rejected;
    type SerializeTupleVariant = Rejected;
    type SerializeMap = Rejected;
    type SerializeStruct = FieldCollector;
    type SerializeStructVariant = Rejected;

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        Ok(FieldCollector {
            filters: Vec::with_capacity(len),
        })
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Self::Ok, Self::Error> {
        Ok(Vec::new())
    }

    // look through wrappers such as `struct Params(Filters);`
    fn serialize_newtype_struct<V>(
        self,
        _name: &'static str,
        value: &V,
    ) -> Result<Self::Ok, Self::Error>
    where
        V: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_bool(self, _v: bool) -> Result<Self::Ok, Self::Error> {
        Err(invalid("bool"))
    }

    fn serialize_i8(self, _v: i8) -> Result<Self::Ok, Self::Error> {
        Err(invalid("integer"))
    }

    fn serialize_i16(self, _v: i16) -> Result<Self::Ok, Self::Error> {
        Err(invalid("integer"))
    }

    fn serialize_i32(self, _v: i32) -> Result<Self::Ok, Self::Error> {
        Err(invalid("integer"))
    }

    fn serialize_i64(self, _v: i64) -> Result<Self::Ok, Self::Error> {
        Err(invalid("integer"))
    }

    fn serialize_u8(self, _v: u8) -> Result<Self::Ok, Self::Error> {
        Err(invalid("integer"))
    }

    fn serialize_u16(self, _v: u16) -> Result<Self::Ok, Self::Error> {
        Err(invalid("integer"))
    }

    fn serialize_u32(self, _v: u32) -> Result<Self::Ok, Self::Error> {
        Err(invalid("integer"))
    }

    fn serialize_u64(self, _v: u64) -> Result<Self::Ok, Self::Error> {
        Err(invalid("integer"))
    }

    fn serialize_f32(self, _v: f32) -> Result<Self::Ok, Self::Error> {
        Err(invalid("float"))
    }

    fn serialize_f64(self, _v: f64) -> Result<Self::Ok, Self::Error> {
        Err(invalid("float"))
    }

    fn serialize_char(self, _v: char) -> Result<Self::Ok, Self::Error> {
        Err(invalid("char"))
    }

    fn serialize_str(self, _v: &str) -> Result<Self::Ok, Self::Error> {
        Err(invalid("string"))
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<Self::Ok, Self::Error> {
        Err(invalid("bytes"))
    }

    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        Err(invalid("option"))
    }

    fn serialize_some<V>(self, _value: &V) -> Result<Self::Ok, Self::Error>
    where
        V: Serialize + ?Sized,
    {
        Err(invalid("option"))
    }

    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Err(invalid("unit"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        Err(invalid("enum"))
    }

    fn serialize_newtype_variant<V>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &V,
    ) -> Result<Self::Ok, Self::Error>
    where
        V: Serialize + ?Sized,
    {
        Err(invalid("enum"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Err(invalid("sequence"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        Err(invalid("tuple"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        Err(invalid("tuple struct"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Err(invalid("enum"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Err(invalid("map"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Err(invalid("enum"))
    }
}
