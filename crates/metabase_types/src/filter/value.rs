//! Serde serializer producing `FilterValue` directly.
//!
//! Unlike going through `serde_json::Value`, non-finite floats are an error
//! here instead of silently becoming `null`.

use super::FilterValue;
use metabase_error::error::FilterError;
use serde::ser::{
    Serialize, SerializeMap, SerializeSeq, SerializeStruct, SerializeStructVariant,
    SerializeTuple, SerializeTupleStruct, SerializeTupleVariant, Serializer,
};
use std::collections::BTreeMap;

/// Convert any serializable value into a `FilterValue`
pub fn to_filter_value<T>(value: &T) -> Result<FilterValue, FilterError>
where
    T: Serialize + ?Sized,
{
    value.serialize(ValueSerializer)
}

fn float(v: f64) -> Result<FilterValue, FilterError> {
    if v.is_finite() {
        Ok(FilterValue::Float(v))
    } else {
        Err(FilterError::SerializationError(format!(
            "unsupported value: {}",
            v
        )))
    }
}

fn map_key(key: FilterValue) -> Result<String, FilterError> {
    match key {
        FilterValue::Text(s) => Ok(s),
        FilterValue::Int(i) => Ok(i.to_string()),
        FilterValue::UInt(u) => Ok(u.to_string()),
        FilterValue::Bool(b) => Ok(b.to_string()),
        _ => Err(FilterError::SerializationError(
            "key must be a string".to_string(),
        )),
    }
}

fn tagged(variant: &'static str, value: FilterValue) -> FilterValue {
    let mut map = BTreeMap::new();
    map.insert(variant.to_string(), value);
    FilterValue::Map(map)
}

pub struct ValueSerializer;

pub struct SeqCollector {
    items: Vec<FilterValue>,
}

pub struct VariantSeqCollector {
    variant: &'static str,
    items: Vec<FilterValue>,
}

pub struct MapCollector {
    map: BTreeMap<String, FilterValue>,
    next_key: Option<String>,
}

pub struct VariantMapCollector {
    variant: &'static str,
    map: BTreeMap<String, FilterValue>,
}

impl Serializer for ValueSerializer {
    type Ok = FilterValue;
    type Error = FilterError;

    type SerializeSeq = SeqCollector;
    type SerializeTuple = SeqCollector;
    type SerializeTupleStruct = SeqCollector;
    type SerializeTupleVariant = VariantSeqCollector;
    type SerializeMap = MapCollector;
    type SerializeStruct = MapCollector;
    type SerializeStructVariant = VariantMapCollector;

    fn serialize_bool(self, v: bool) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Int(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Int(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Int(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Int(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<Self::Ok, Self::Error> {
        // same split as the serde_json::Value conversion
        Ok(match i64::try_from(v) {
            Ok(i) => FilterValue::Int(i),
            Err(_) => FilterValue::UInt(v),
        })
    }

    fn serialize_f32(self, v: f32) -> Result<Self::Ok, Self::Error> {
        float(v.into())
    }

    fn serialize_f64(self, v: f64) -> Result<Self::Ok, Self::Error> {
        float(v)
    }

    fn serialize_char(self, v: char) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Text(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Text(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::List(
            v.iter().map(|b| FilterValue::Int((*b).into())).collect(),
        ))
    }

    fn serialize_none(self) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Null)
    }

    fn serialize_some<V>(self, value: &V) -> Result<Self::Ok, Self::Error>
    where
        V: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Text(variant.to_string()))
    }

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

    fn serialize_newtype_variant<V>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &V,
    ) -> Result<Self::Ok, Self::Error>
    where
        V: Serialize + ?Sized,
    {
        Ok(tagged(variant, value.serialize(self)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, Self::Error> {
        Ok(SeqCollector {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, Self::Error> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, Self::Error> {
        Ok(VariantSeqCollector {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, Self::Error> {
        Ok(MapCollector {
            map: BTreeMap::new(),
            next_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, Self::Error> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, Self::Error> {
        Ok(VariantMapCollector {
            variant,
            map: BTreeMap::new(),
        })
    }
}

impl SerializeSeq for SeqCollector {
    type Ok = FilterValue;
    type Error = FilterError;

    fn serialize_element<V>(&mut self, value: &V) -> Result<(), Self::Error>
    where
        V: Serialize + ?Sized,
    {
        self.items.push(to_filter_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::List(self.items))
    }
}

impl SerializeTuple for SeqCollector {
    type Ok = FilterValue;
    type Error = FilterError;

    fn serialize_element<V>(&mut self, value: &V) -> Result<(), Self::Error>
    where
        V: Serialize + ?Sized,
    {
        SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        SerializeSeq::end(self)
    }
}

impl SerializeTupleStruct for SeqCollector {
    type Ok = FilterValue;
    type Error = FilterError;

    fn serialize_field<V>(&mut self, value: &V) -> Result<(), Self::Error>
    where
        V: Serialize + ?Sized,
    {
        SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        SerializeSeq::end(self)
    }
}

impl SerializeTupleVariant for VariantSeqCollector {
    type Ok = FilterValue;
    type Error = FilterError;

    fn serialize_field<V>(&mut self, value: &V) -> Result<(), Self::Error>
    where
        V: Serialize + ?Sized,
    {
        self.items.push(to_filter_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(tagged(self.variant, FilterValue::List(self.items)))
    }
}

impl SerializeMap for MapCollector {
    type Ok = FilterValue;
    type Error = FilterError;

    fn serialize_key<K>(&mut self, key: &K) -> Result<(), Self::Error>
    where
        K: Serialize + ?Sized,
    {
        self.next_key = Some(map_key(to_filter_value(key)?)?);
        Ok(())
    }

    fn serialize_value<V>(&mut self, value: &V) -> Result<(), Self::Error>
    where
        V: Serialize + ?Sized,
    {
        let key = self.next_key.take().ok_or_else(|| {
            FilterError::SerializationError("map value without a key".to_string())
        })?;
        self.map.insert(key, to_filter_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Map(self.map))
    }
}

impl SerializeStruct for MapCollector {
    type Ok = FilterValue;
    type Error = FilterError;

    fn serialize_field<V>(&mut self, key: &'static str, value: &V) -> Result<(), Self::Error>
    where
        V: Serialize + ?Sized,
    {
        self.map.insert(key.to_string(), to_filter_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(FilterValue::Map(self.map))
    }
}

impl SerializeStructVariant for VariantMapCollector {
    type Ok = FilterValue;
    type Error = FilterError;

    fn serialize_field<V>(&mut self, key: &'static str, value: &V) -> Result<(), Self::Error>
    where
        V: Serialize + ?Sized,
    {
        self.map.insert(key.to_string(), to_filter_value(value)?);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, Self::Error> {
        Ok(tagged(self.variant, FilterValue::Map(self.map)))
    }
}
