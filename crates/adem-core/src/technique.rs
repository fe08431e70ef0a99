//! Breathing-technique documents.
//!
//! A technique names a protocol (ordered phase rows) and the estimator
//! parameter version that suits it. Deleting a technique is a soft delete:
//! `is_active` flips to false and lookups stop seeing it.

use serde::{Deserialize, Serialize};

/// One protocol row: `[in, hold1, out, hold2, repeats]`, seconds.
pub type ProtocolRow = [u32; 5];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Technique {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub param_version: String,
    #[serde(default)]
    pub show_in_app: bool,
    #[serde(default)]
    pub protocol: Vec<ProtocolRow>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Technique {
    /// A protocol is usable when at least one row spends time breathing.
    pub fn has_usable_protocol(&self) -> bool {
        self.protocol
            .iter()
            .any(|row| row[..4].iter().sum::<u32>() > 0)
    }

    /// Technique name with a trailing parenthesized qualifier stripped,
    /// e.g. `"Box 6 (4-4-4-4)"` → `"Box 6"`. Used in spoken instructions.
    pub fn short_name(name: &str) -> &str {
        match name.split_once('(') {
            Some((head, _)) => head.trim(),
            None => name.trim(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_qualifier() {
        assert_eq!(Technique::short_name("Box 6 (4-4-4-4)"), "Box 6");
        assert_eq!(Technique::short_name("Coherent"), "Coherent");
        assert_eq!(Technique::short_name("  Ratio 1:2  "), "Ratio 1:2");
    }

    #[test]
    fn usable_protocol_needs_a_breathing_row() {
        let mut t = Technique {
            name: "Box 6".to_owned(),
            description: String::new(),
            param_version: "v1_default".to_owned(),
            show_in_app: true,
            protocol: vec![[0, 0, 0, 0, 3]],
            is_active: true,
        };
        assert!(!t.has_usable_protocol());
        t.protocol.push([4, 4, 4, 4, 5]);
        assert!(t.has_usable_protocol());
    }

    #[test]
    fn protocol_rows_serialize_as_arrays() {
        let t = Technique {
            name: "Box 6".to_owned(),
            description: "Box breathing at 6/min".to_owned(),
            param_version: "v1_default".to_owned(),
            show_in_app: true,
            protocol: vec![[4, 4, 4, 4, 5]],
            is_active: true,
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["protocol"][0], serde_json::json!([4, 4, 4, 4, 5]));
        let back: Technique = serde_json::from_value(json).unwrap();
        assert_eq!(back.protocol, vec![[4, 4, 4, 4, 5]]);
    }
}
