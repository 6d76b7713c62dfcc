//! Terraform State Management
//!
//! Handles encoding and decoding of Terraform values. Terraform sends
//! msgpack for planned and prior state and JSON for raw stored state.

use std::collections::HashMap;

use lxd_common::{Error, Result};
use rmpv::Value as MsgpackValue;
use serde::{Deserialize, Serialize};

/// msgpack extension type Terraform uses for values not known until apply
const UNKNOWN_EXT_TYPE: i8 = 0;

/// Dynamic value that can be encoded/decoded from Terraform state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DynamicValue {
    #[default]
    Null,
    /// Computed value that will be known after apply
    #[serde(skip_deserializing)]
    Unknown,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<DynamicValue>),
    Map(HashMap<String, DynamicValue>),
}

impl DynamicValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            DynamicValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynamicValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, DynamicValue>> {
        match self {
            DynamicValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&DynamicValue> {
        self.as_map()?.get(key)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DynamicValue::Null)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, DynamicValue::Unknown)
    }

    /// Set an attribute on an object value. Non-object values are left alone.
    pub fn set(&mut self, key: &str, value: DynamicValue) {
        if let DynamicValue::Map(m) = self {
            m.insert(key.to_string(), value);
        }
    }

    /// Set an attribute read back from the remote. An attribute that is
    /// unset stays null when the remote reports an empty string or map.
    pub fn set_read_back(&mut self, key: &str, value: DynamicValue) {
        let empty = match &value {
            DynamicValue::String(s) => s.is_empty(),
            DynamicValue::Map(m) => m.is_empty(),
            _ => false,
        };
        if empty && self.get(key).map_or(true, DynamicValue::is_null) {
            return;
        }
        self.set(key, value);
    }

    /// Copy with every unknown replaced by null
    pub fn without_unknowns(&self) -> DynamicValue {
        match self {
            DynamicValue::Unknown => DynamicValue::Null,
            DynamicValue::List(items) => DynamicValue::List(items.iter().map(Self::without_unknowns).collect()),
            DynamicValue::Map(m) => DynamicValue::Map(
                m.iter().map(|(k, v)| (k.clone(), v.without_unknowns())).collect(),
            ),
            other => other.clone(),
        }
    }
}

impl From<MsgpackValue> for DynamicValue {
    fn from(value: MsgpackValue) -> Self {
        match value {
            MsgpackValue::Nil => DynamicValue::Null,
            MsgpackValue::Boolean(b) => DynamicValue::Bool(b),
            MsgpackValue::Integer(i) => i
                .as_i64()
                .map(serde_json::Number::from)
                .or_else(|| i.as_u64().map(serde_json::Number::from))
                .map(DynamicValue::Number)
                .unwrap_or(DynamicValue::Null),
            MsgpackValue::F32(f) => float_value(f64::from(f)),
            MsgpackValue::F64(f) => float_value(f),
            MsgpackValue::String(s) => s
                .into_str()
                .map(DynamicValue::String)
                .unwrap_or(DynamicValue::Null),
            MsgpackValue::Binary(_) => DynamicValue::Null,
            MsgpackValue::Array(items) => {
                DynamicValue::List(items.into_iter().map(DynamicValue::from).collect())
            }
            MsgpackValue::Map(entries) => DynamicValue::Map(
                entries
                    .into_iter()
                    .filter_map(|(k, v)| {
                        let key = k.as_str()?.to_string();
                        Some((key, DynamicValue::from(v)))
                    })
                    .collect(),
            ),
            MsgpackValue::Ext(UNKNOWN_EXT_TYPE, _) => DynamicValue::Unknown,
            MsgpackValue::Ext(_, _) => DynamicValue::Null,
        }
    }
}

impl From<&DynamicValue> for MsgpackValue {
    fn from(value: &DynamicValue) -> Self {
        match value {
            DynamicValue::Null => MsgpackValue::Nil,
            DynamicValue::Unknown => MsgpackValue::Ext(UNKNOWN_EXT_TYPE, vec![0]),
            DynamicValue::Bool(b) => MsgpackValue::Boolean(*b),
            DynamicValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MsgpackValue::from(i)
                } else if let Some(u) = n.as_u64() {
                    MsgpackValue::from(u)
                } else {
                    MsgpackValue::F64(n.as_f64().unwrap_or_default())
                }
            }
            DynamicValue::String(s) => MsgpackValue::from(s.as_str()),
            DynamicValue::List(items) => {
                MsgpackValue::Array(items.iter().map(MsgpackValue::from).collect())
            }
            DynamicValue::Map(m) => {
                // Sorted keys keep the encoding stable between runs
                let mut keys: Vec<&String> = m.keys().collect();
                keys.sort();
                MsgpackValue::Map(
                    keys.into_iter()
                        .map(|k| (MsgpackValue::from(k.as_str()), MsgpackValue::from(&m[k])))
                        .collect(),
                )
            }
        }
    }
}

/// Decode a Terraform DynamicValue from msgpack bytes
pub fn decode_dynamic_value(data: &[u8]) -> Result<DynamicValue> {
    if data.is_empty() {
        return Ok(DynamicValue::Null);
    }

    let mut reader = data;
    let value = rmpv::decode::read_value(&mut reader)?;
    Ok(DynamicValue::from(value))
}

/// Encode a value to Terraform DynamicValue msgpack bytes
pub fn encode_dynamic_value(value: &DynamicValue) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &MsgpackValue::from(value))?;
    Ok(buf)
}

/// Decode raw JSON state as stored by Terraform
pub fn decode_json_value(data: &[u8]) -> Result<DynamicValue> {
    if data.is_empty() {
        return Ok(DynamicValue::Null);
    }
    serde_json::from_slice(data).map_err(Error::from)
}

/// Helper to extract a string attribute from a DynamicValue
pub fn get_string_attr(value: &DynamicValue, key: &str) -> String {
    value.get(key)
        .and_then(|v| v.as_string())
        .unwrap_or("")
        .to_string()
}

/// Helper to extract an optional string attribute from a DynamicValue
pub fn get_optional_string_attr(value: &DynamicValue, key: &str) -> Option<String> {
    value.get(key)
        .and_then(|v| match v {
            DynamicValue::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
}

/// Helper to extract a bool attribute from a DynamicValue
pub fn get_bool_attr(value: &DynamicValue, key: &str, default: bool) -> bool {
    value.get(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(default)
}

/// Convert a Terraform map attribute into the flat string map the LXD API takes.
///
/// Null entries are dropped; scalar values are rendered as strings the same
/// way Terraform renders them in a `map(string)`.
pub fn get_string_map_attr(value: &DynamicValue, key: &str) -> HashMap<String, String> {
    value.get(key)
        .map(config_map)
        .unwrap_or_default()
}

/// Flatten a Terraform map value into `HashMap<String, String>`
pub fn config_map(value: &DynamicValue) -> HashMap<String, String> {
    let Some(m) = value.as_map() else {
        return HashMap::new();
    };

    m.iter()
        .filter_map(|(k, v)| {
            let rendered = match v {
                DynamicValue::String(s) => s.clone(),
                DynamicValue::Bool(b) => b.to_string(),
                DynamicValue::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((k.clone(), rendered))
        })
        .collect()
}

/// Create a DynamicValue map with the given attributes
pub fn make_state(attrs: Vec<(&str, DynamicValue)>) -> DynamicValue {
    let mut map = HashMap::new();
    for (key, value) in attrs {
        map.insert(key.to_string(), value);
    }
    DynamicValue::Map(map)
}

/// Create a string DynamicValue
pub fn string_value(s: impl Into<String>) -> DynamicValue {
    DynamicValue::String(s.into())
}

/// Create a number DynamicValue from f64
pub fn float_value(n: f64) -> DynamicValue {
    serde_json::Number::from_f64(n)
        .map(DynamicValue::Number)
        .unwrap_or(DynamicValue::Null)
}

/// Create a bool DynamicValue
pub fn bool_value(b: bool) -> DynamicValue {
    DynamicValue::Bool(b)
}

/// Create a map(string) DynamicValue
pub fn string_map_value(map: &HashMap<String, String>) -> DynamicValue {
    DynamicValue::Map(
        map.iter()
            .map(|(k, v)| (k.clone(), string_value(v)))
            .collect(),
    )
}

/// Create a null DynamicValue
pub fn null_value() -> DynamicValue {
    DynamicValue::Null
}
