use metabase_error::error::JsonError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Decode `data` into `T`, rejecting any field `T` does not declare.
///
/// Unknown fields are reported at every nesting level, using their dotted
/// path (e.g. `rows.0.extra`).
pub fn strict_decode<T>(data: &[u8]) -> Result<T, JsonError>
where
    T: DeserializeOwned,
{
    let mut unknown = Vec::new();
    let mut deserializer = serde_json::Deserializer::from_slice(data);

    let value: T = serde_ignored::deserialize(&mut deserializer, |path| {
        unknown.push(path.to_string())
    })?;
    deserializer.end()?;

    if !unknown.is_empty() {
        return Err(JsonError::SchemaMismatch { fields: unknown });
    }

    Ok(value)
}

/// Return the sorted union of field names across a JSON array of objects
pub fn infer_fields(data: &[u8]) -> Result<Vec<String>, JsonError> {
    let records: Vec<Map<String, Value>> = serde_json::from_slice(data)?;

    let fields: BTreeSet<String> = records
        .into_iter()
        .flat_map(|rec| rec.into_iter().map(|(key, _)| key))
        .collect();

    Ok(fields.into_iter().collect())
}
