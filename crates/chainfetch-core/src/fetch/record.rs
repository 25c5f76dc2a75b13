//! Opaque record payload carried from the adapter to the writer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One scalar field of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl FieldValue {
    /// Rendering used for CSV cells. Numbers are written bare; `Null` is empty.
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Bool(v) => v.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Null => String::new(),
        }
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Int(i),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::Text(s),
            nested @ (Value::Array(_) | Value::Object(_)) => FieldValue::Text(nested.to_string()),
        }
    }
}

/// A single upstream row. Field order is the sorted field-name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Record {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            fields: map.into_iter().map(|(k, v)| (k, FieldValue::from(v))).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_becomes_record() {
        let v: serde_json::Value = serde_json::json!({
            "strike": 450,
            "bid": 1.25,
            "right": "C",
            "halted": false,
            "note": null,
            "greeks": {"delta": 0.5}
        });
        let serde_json::Value::Object(map) = v else {
            panic!("expected object")
        };
        let rec = Record::from(map);
        assert_eq!(rec.get("strike"), Some(&FieldValue::Int(450)));
        assert_eq!(rec.get("bid"), Some(&FieldValue::Float(1.25)));
        assert_eq!(rec.get("right"), Some(&FieldValue::Text("C".into())));
        assert_eq!(rec.get("halted"), Some(&FieldValue::Bool(false)));
        assert_eq!(rec.get("note"), Some(&FieldValue::Null));
        assert_eq!(
            rec.get("greeks"),
            Some(&FieldValue::Text("{\"delta\":0.5}".into()))
        );
        let names: Vec<&str> = rec.field_names().collect();
        assert_eq!(names, ["bid", "greeks", "halted", "note", "right", "strike"]);
    }

    #[test]
    fn cells_render_without_decoration() {
        assert_eq!(FieldValue::Int(-3).to_cell(), "-3");
        assert_eq!(FieldValue::Float(0.5).to_cell(), "0.5");
        assert_eq!(FieldValue::Null.to_cell(), "");
        assert_eq!(FieldValue::Text("a,b".into()).to_cell(), "a,b");
    }
}
