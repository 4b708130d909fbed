use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::remote::Document;

use super::Position;

/// One captured position sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub who: String,
    pub lat: f64,
    pub lon: f64,
    pub observed_at: DateTime<Utc>,
    /// Whether the network was reachable when the sample was taken.
    pub delivered_online: bool,
}

impl TrackPoint {
    pub fn new(who: &str, position: Position, online: bool) -> Self {
        Self {
            who: who.to_string(),
            lat: position.lat,
            lon: position.lon,
            observed_at: Utc::now(),
            delivered_online: online,
        }
    }

    /// The remote document body for this sample.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("who".to_string(), Value::from(self.who.clone()));
        doc.insert("lat".to_string(), Value::from(self.lat));
        doc.insert("lon".to_string(), Value::from(self.lon));
        doc.insert("observedAt".to_string(), Value::from(self.observed_at.to_rfc3339()));
        doc.insert("deliveredOnline".to_string(), Value::from(self.delivered_online));
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_uses_camel_case() {
        let point = TrackPoint::new("Kim", Position::new(46.55, 7.98), false);
        let doc = point.to_document();
        assert_eq!(doc.get("who"), Some(&Value::from("Kim")));
        assert_eq!(doc.get("lat"), Some(&Value::from(46.55)));
        assert_eq!(doc.get("deliveredOnline"), Some(&Value::from(false)));
        assert!(doc.contains_key("observedAt"));
    }
}
