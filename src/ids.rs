// ids.rs
// ObjectId parsing for path segments and request bodies. Clients may send either a
// plain 24-char hex string or the extended-JSON form {"$oid": "..."}.

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Deserializer, de::Error as _};

use crate::error::ApiError;

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Hex(String),
    Oid(ObjectId),
}

impl IdRepr {
    fn into_id(self) -> Result<Option<ObjectId>, String> {
        match self {
            IdRepr::Hex(s) if s.trim().is_empty() => Ok(None),
            IdRepr::Hex(s) => ObjectId::parse_str(s.trim())
                .map(Some)
                .map_err(|_| format!("invalid id: {s}")),
            IdRepr::Oid(oid) => Ok(Some(oid)),
        }
    }
}

pub fn object_id<'de, D>(deserializer: D) -> Result<ObjectId, D::Error>
where
    D: Deserializer<'de>,
{
    IdRepr::deserialize(deserializer)?
        .into_id()
        .map_err(D::Error::custom)?
        .ok_or_else(|| D::Error::custom("id must not be empty"))
}

/// Missing, null and empty-string ids all read as `None`.
pub fn option_object_id<'de, D>(deserializer: D) -> Result<Option<ObjectId>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<IdRepr>::deserialize(deserializer)? {
        Some(repr) => repr.into_id().map_err(D::Error::custom),
        None => Ok(None),
    }
}

pub fn parse_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw.trim()).map_err(|_| ApiError::bad_request(format!("invalid id: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Body {
        #[serde(deserialize_with = "object_id")]
        id: ObjectId,
        #[serde(default, deserialize_with = "option_object_id")]
        other: Option<ObjectId>,
    }

    #[test]
    fn accepts_hex_and_extended_json() {
        let oid = ObjectId::new();
        let hex: Body =
            serde_json::from_value(serde_json::json!({ "id": oid.to_hex(), "other": "" })).unwrap();
        assert_eq!(hex.id, oid);
        assert!(hex.other.is_none());

        let ext: Body = serde_json::from_value(
            serde_json::json!({ "id": { "$oid": oid.to_hex() }, "other": oid.to_hex() }),
        )
        .unwrap();
        assert_eq!(ext.id, oid);
        assert_eq!(ext.other, Some(oid));
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_value::<Body>(serde_json::json!({ "id": "nope" })).is_err());
        assert!(parse_id("123").is_err());
    }
}
