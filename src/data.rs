//! License data model.
//!
//! A license binds protocol metadata (identity, validity window and delegated
//! issuance rights) to a free-form entitlement payload. The `pack` map is the
//! delegation mechanism: it authorizes the holder to mint up to `count`
//! sub-licenses of each named kind, which may in turn declare their own packs.
//!
//! The JSON encoding is the canonical transfer format between nodes and the
//! cleartext that gets encrypted into a container, so field order and map key
//! order are stable: struct fields serialize in declaration order and maps are
//! sorted by key.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Result;

/// A named set of sub-license templates the holder of a license may mint.
pub type Pack = BTreeMap<String, Template>;

/// The data of a license entry: protocol metadata plus the custom
/// product-specific payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Data {
    #[serde(default)]
    pub meta: Option<Metadata>,
    #[serde(default)]
    pub payload: Option<Map<String, Value>>,
}

/// Protocol metadata describing a license: its unique identifier, validity
/// window and any child licenses it may issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub activates: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub pack: Option<Pack>,
}

/// A class of sub-licenses together with the number of licenses of that kind
/// which may be generated. A template may itself delegate further issuance
/// through its own `pack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub count: u32,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<Pack>,
}

/// Encode license data into its binary form for transfer between nodes.
pub fn encode_data(data: &Data) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(data)?)
}

/// Decode previously encoded license data into its native form.
pub fn decode_data(raw: &[u8]) -> Result<Data> {
    Ok(serde_json::from_slice(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEMO_DATA: &str = r#"{"meta":{"id":"0","activates":"1970-01-01T00:00:00Z","expires":"1970-01-01T00:00:00Z","pack":{"test":{"count":0,"payload":{},"pack":{"test":{"count":1,"payload":{"x":1}}}}}},"payload":{"x":1}}"#;

    fn epoch() -> DateTime<Utc> {
        "1970-01-01T00:00:00Z".parse().unwrap()
    }

    fn demo_data() -> Data {
        let mut inner_payload = Map::new();
        inner_payload.insert("x".to_string(), json!(1));

        let mut inner_pack = Pack::new();
        inner_pack.insert(
            "test".to_string(),
            Template {
                count: 1,
                payload: inner_payload.clone(),
                pack: None,
            },
        );

        let mut pack = Pack::new();
        pack.insert(
            "test".to_string(),
            Template {
                count: 0,
                payload: Map::new(),
                pack: Some(inner_pack),
            },
        );

        Data {
            meta: Some(Metadata {
                id: "0".to_string(),
                activates: epoch(),
                expires: epoch(),
                pack: Some(pack),
            }),
            payload: Some(inner_payload),
        }
    }

    #[test]
    fn test_encode_data() {
        let encoded = encode_data(&demo_data()).unwrap();
        assert_eq!(String::from_utf8(encoded).unwrap(), DEMO_DATA);
    }

    #[test]
    fn test_decode_data() {
        let data = decode_data(DEMO_DATA.as_bytes()).unwrap();

        let meta = data.meta.as_ref().unwrap();
        assert_eq!(meta.id, "0");
        assert_eq!(meta.activates, epoch());
        assert_eq!(meta.expires, epoch());

        let pack = meta.pack.as_ref().unwrap();
        let template = pack.get("test").unwrap();
        assert_eq!(template.count, 0);
        assert!(template.payload.is_empty());

        let inner = template.pack.as_ref().unwrap().get("test").unwrap();
        assert_eq!(inner.count, 1);
        assert_eq!(inner.payload.get("x"), Some(&json!(1)));
        assert!(inner.pack.is_none());

        assert_eq!(data.payload.as_ref().unwrap().get("x"), Some(&json!(1)));
    }

    #[test]
    fn test_round_trip() {
        let data = demo_data();
        let decoded = decode_data(&encode_data(&data).unwrap()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_absent_pack_serializes_as_null() {
        let data = Data {
            meta: Some(Metadata {
                id: "0".to_string(),
                activates: epoch(),
                expires: epoch(),
                pack: None,
            }),
            payload: None,
        };

        let encoded = String::from_utf8(encode_data(&data).unwrap()).unwrap();
        assert!(encoded.contains(r#""pack":null"#));
        assert!(encoded.ends_with(r#""payload":null}"#));
    }
}
