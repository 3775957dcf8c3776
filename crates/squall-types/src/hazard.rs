//! Hazard events — the domain objects staged into scripts.
//!
//! A hazard event is identified by an event ID and a hazard type
//! discriminant of the form `PHEN.SIG` (e.g. `FA.Y` — areal flood
//! advisory, `FL.W` — flood warning). Everything else about an event is
//! carried in a free-form attribute map plus an opaque geometry payload;
//! the kernel never looks inside either.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A hazard event passed opaquely through the coordinator.
///
/// Serialized field names match what scripts expect to see when the
/// event is staged into the interpreter (`eventId`, `type`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HazardEvent {
    /// Unique event identifier.
    pub event_id: String,
    /// Hazard type discriminant, e.g. `"FA.Y"` or `"FL.W"`.
    #[serde(rename = "type")]
    pub hazard_type: String,
    /// Free-form attributes staged into and returned from scripts.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    /// Opaque geometry payload. Never inspected by the kernel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
}

impl HazardEvent {
    /// Create an event with the given ID and hazard type.
    pub fn new(event_id: impl Into<String>, hazard_type: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            hazard_type: hazard_type.into(),
            attributes: Map::new(),
            geometry: None,
        }
    }

    /// Builder-style attribute insertion.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Builder-style geometry payload.
    pub fn with_geometry(mut self, geometry: Value) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Get an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Set an attribute, returning the previous value if any.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(key.into(), value)
    }

    /// The phenomenon part of the hazard type (`"FA"` for `"FA.Y"`).
    pub fn phenomenon(&self) -> &str {
        match self.hazard_type.split_once('.') {
            Some((phen, _)) => phen,
            None => &self.hazard_type,
        }
    }

    /// The significance part of the hazard type (`"Y"` for `"FA.Y"`),
    /// if the discriminant has one.
    pub fn significance(&self) -> Option<&str> {
        self.hazard_type.split_once('.').map(|(_, sig)| sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_event_has_empty_attributes() {
        let event = HazardEvent::new("E1", "FA.Y");
        assert_eq!(event.event_id, "E1");
        assert_eq!(event.hazard_type, "FA.Y");
        assert!(event.attributes.is_empty());
        assert!(event.geometry.is_none());
    }

    #[test]
    fn phenomenon_and_significance_split() {
        let event = HazardEvent::new("E1", "FL.W");
        assert_eq!(event.phenomenon(), "FL");
        assert_eq!(event.significance(), Some("W"));
    }

    #[test]
    fn bare_type_has_no_significance() {
        let event = HazardEvent::new("E1", "TO");
        assert_eq!(event.phenomenon(), "TO");
        assert_eq!(event.significance(), None);
    }

    #[test]
    fn with_attribute_round_trips() {
        let event = HazardEvent::new("E1", "FA.Y").with_attribute("riseAbove", json!(120));
        assert_eq!(event.attribute("riseAbove"), Some(&json!(120)));
        assert_eq!(event.attribute("missing"), None);
    }

    #[test]
    fn set_attribute_returns_previous() {
        let mut event = HazardEvent::new("E1", "FA.Y");
        assert_eq!(event.set_attribute("k", json!(1)), None);
        assert_eq!(event.set_attribute("k", json!(2)), Some(json!(1)));
    }

    #[test]
    fn serializes_with_script_facing_names() {
        let event = HazardEvent::new("E42", "FA.Y").with_attribute("pointID", json!("DCTN1"));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventId"], json!("E42"));
        assert_eq!(value["type"], json!("FA.Y"));
        assert_eq!(value["attributes"]["pointID"], json!("DCTN1"));
        // Empty geometry is omitted entirely.
        assert!(value.get("geometry").is_none());
    }

    #[test]
    fn deserializes_without_optional_fields() {
        let event: HazardEvent =
            serde_json::from_value(json!({"eventId": "E7", "type": "FL.W"})).unwrap();
        assert_eq!(event.event_id, "E7");
        assert!(event.attributes.is_empty());
    }
}
