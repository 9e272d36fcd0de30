//! Named body: self-describing JSON.
//!
//! Reserved keys carry graph structure: `$id`, `$type` and `$ref` for objects,
//! `$bytes`, `$map`, `$enum`/`$variant` for shapes JSON has no native form for.

use super::wire::{Fields, Variant, Wire, MAX_DEPTH};
use crate::error::{DecodingError, EncodingError};
use serde::Deserialize;
use serde_json::{Map, Number, Value as Json};

const ID: &str = "$id";
const TYPE: &str = "$type";
const REF: &str = "$ref";
const BYTES: &str = "$bytes";
const MAP: &str = "$map";
const ENUM: &str = "$enum";
const VARIANT: &str = "$variant";

/// Bracket nesting allowed in a body. A map costs three JSON levels per graph level.
const MAX_JSON_DEPTH: usize = 3 * (MAX_DEPTH + 1) + 2;

pub(crate) fn to_bytes(wire: &Wire) -> Result<Vec<u8>, EncodingError> {
    let json = to_json(wire)?;
    serde_json::to_vec(&json).map_err(|e| EncodingError::Serialize(e.to_string()))
}

pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Wire, DecodingError> {
    check_nesting(bytes)?;
    // Depth is bounded by the scan above instead of serde_json's fixed limit.
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    let json = Json::deserialize(&mut de).map_err(|e| malformed(e.to_string()))?;
    de.end().map_err(|e| malformed(e.to_string()))?;
    from_json(json)
}

fn check_nesting(bytes: &[u8]) -> Result<(), DecodingError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &b in bytes {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                if depth > MAX_JSON_DEPTH {
                    return Err(DecodingError::TooDeep { limit: MAX_DEPTH });
                }
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

fn tagged(key: &str, value: Json) -> Json {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Json::Object(map)
}

fn variant_json(variant: &Variant) -> Json {
    match variant {
        Variant::Index(i) => Json::from(*i),
        Variant::Name(name) => Json::String(name.clone()),
    }
}

fn to_json(wire: &Wire) -> Result<Json, EncodingError> {
    Ok(match wire {
        Wire::Null => Json::Null,
        Wire::Bool(b) => Json::Bool(*b),
        Wire::Int(i) => Json::from(*i),
        Wire::Float(f) => Json::Number(Number::from_f64(*f).ok_or(EncodingError::NonFiniteFloat)?),
        Wire::Str(s) => Json::String(s.clone()),
        Wire::Bytes(b) => tagged(BYTES, Json::Array(b.iter().map(|x| Json::from(*x)).collect())),
        Wire::List(items) => Json::Array(items.iter().map(to_json).collect::<Result<_, _>>()?),
        Wire::Map(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                pairs.push(Json::Array(vec![to_json(k)?, to_json(v)?]));
            }
            tagged(MAP, Json::Array(pairs))
        }
        Wire::Enum { tag: None, variant } => variant_json(variant),
        Wire::Enum {
            tag: Some(tag),
            variant,
        } => {
            let mut map = Map::new();
            map.insert(ENUM.to_string(), Json::String(tag.clone()));
            map.insert(VARIANT.to_string(), variant_json(variant));
            Json::Object(map)
        }
        Wire::Object { id, tag, fields } => {
            let Fields::Named(fields) = fields else {
                return Err(EncodingError::Serialize(
                    "positional fields in a named body".into(),
                ));
            };
            let mut map = Map::new();
            map.insert(ID.to_string(), Json::from(*id));
            if let Some(tag) = tag {
                map.insert(TYPE.to_string(), Json::String(tag.clone()));
            }
            for (name, value) in fields {
                map.insert(name.clone(), to_json(value)?);
            }
            Json::Object(map)
        }
        Wire::Ref(id) => tagged(REF, Json::from(*id)),
    })
}

fn malformed(what: impl Into<String>) -> DecodingError {
    DecodingError::Malformed(what.into())
}

fn as_id(json: &Json) -> Result<u32, DecodingError> {
    json.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| malformed("identity is not a u32"))
}

fn from_json(json: Json) -> Result<Wire, DecodingError> {
    match json {
        Json::Null => Ok(Wire::Null),
        Json::Bool(b) => Ok(Wire::Bool(b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Wire::Int(i))
            } else {
                n.as_f64()
                    .map(Wire::Float)
                    .ok_or_else(|| malformed("unrepresentable number"))
            }
        }
        Json::String(s) => Ok(Wire::Str(s)),
        Json::Array(items) => items
            .into_iter()
            .map(from_json)
            .collect::<Result<_, _>>()
            .map(Wire::List),
        Json::Object(map) => object_from_json(map),
    }
}

fn object_from_json(mut map: Map<String, Json>) -> Result<Wire, DecodingError> {
    if let Some(id) = map.get(REF) {
        return Ok(Wire::Ref(as_id(id)?));
    }

    if let Some(id) = map.get(ID) {
        let id = as_id(id)?;
        let tag = match map.remove(TYPE) {
            None => None,
            Some(Json::String(tag)) => Some(tag),
            Some(_) => return Err(malformed("`$type` must be a string")),
        };
        let mut fields = Vec::with_capacity(map.len());
        for (name, value) in map {
            if name.starts_with('$') {
                continue;
            }
            fields.push((name, from_json(value)?));
        }
        return Ok(Wire::Object {
            id,
            tag,
            fields: Fields::Named(fields),
        });
    }

    if let Some(bytes) = map.remove(BYTES) {
        let Json::Array(items) = bytes else {
            return Err(malformed("`$bytes` must be an array"));
        };
        return items
            .iter()
            .map(|b| {
                b.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| malformed("byte out of range"))
            })
            .collect::<Result<_, _>>()
            .map(Wire::Bytes);
    }

    if let Some(entries) = map.remove(MAP) {
        let Json::Array(entries) = entries else {
            return Err(malformed("`$map` must be an array"));
        };
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                Json::Array(pair) if pair.len() == 2 => {
                    let mut pair = pair.into_iter();
                    let (Some(k), Some(v)) = (pair.next(), pair.next()) else {
                        return Err(malformed("map entry must be a pair"));
                    };
                    out.push((from_json(k)?, from_json(v)?));
                }
                _ => return Err(malformed("map entry must be a pair")),
            }
        }
        return Ok(Wire::Map(out));
    }

    if let Some(Json::String(tag)) = map.remove(ENUM) {
        let variant = match map.remove(VARIANT) {
            Some(Json::String(name)) => Variant::Name(name),
            Some(other) => Variant::Index(as_id(&other)?),
            None => return Err(malformed("`$enum` without `$variant`")),
        };
        return Ok(Wire::Enum {
            tag: Some(tag),
            variant,
        });
    }

    Err(malformed("JSON object without a graph marker"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_layout() {
        let wire = Wire::Object {
            id: 1,
            tag: Some("dog".into()),
            fields: Fields::Named(vec![("name".into(), Wire::Str("Rex".into()))]),
        };
        let json: Json = serde_json::from_slice(&to_bytes(&wire).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"$id": 1, "$type": "dog", "name": "Rex"}));
    }

    #[test]
    fn test_unknown_reserved_keys_are_skipped() {
        let json = serde_json::json!({"$id": 1, "$note": "x", "a": 1});
        let wire = from_json(json).unwrap();
        assert_eq!(
            wire,
            Wire::Object {
                id: 1,
                tag: None,
                fields: Fields::Named(vec![("a".into(), Wire::Int(1))]),
            }
        );
    }

    #[test]
    fn test_nan_is_rejected() {
        assert_eq!(to_bytes(&Wire::Float(f64::NAN)), Err(EncodingError::NonFiniteFloat));
    }

    #[test]
    fn test_nesting_scan_ignores_brackets_in_strings() {
        let quoted = format!("[\"{}\\\"\"]", "[".repeat(MAX_JSON_DEPTH + 1));
        assert!(check_nesting(quoted.as_bytes()).is_ok());

        let deep = "[".repeat(MAX_JSON_DEPTH + 1);
        assert_eq!(
            check_nesting(deep.as_bytes()),
            Err(DecodingError::TooDeep { limit: MAX_DEPTH })
        );
    }

    #[test]
    fn test_bare_object_is_malformed() {
        let err = from_bytes(br#"{"a": 1}"#).unwrap_err();
        assert!(matches!(err, DecodingError::Malformed(_)));
    }
}
