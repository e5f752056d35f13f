//! On/off endpoint extraction from raw node snapshots.
//!
//! Matter attribute maps are keyed by `"<endpoint>/<cluster>/<attribute>"`.
//! An endpoint is reported when any attribute of the On/Off cluster is
//! present; its value comes from the OnOff attribute when that attribute
//! holds a boolean.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::trace;

use crate::model::{EndpointRecord, NodeSnapshot};

/// Matter On/Off cluster id.
pub const ONOFF_CLUSTER_ID: u32 = 6;

/// OnOff attribute id within the On/Off cluster.
pub const ONOFF_ATTRIBUTE_ID: u32 = 0;

/// Parsed attribute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributePath {
    pub endpoint: u16,
    pub cluster: u32,
    pub attribute: u32,
}

impl AttributePath {
    /// Parse an `"<endpoint>/<cluster>/<attribute>"` key. Returns `None` for
    /// keys with the wrong number of parts or non-numeric parts.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.split('/');
        let endpoint = parts.next()?.parse().ok()?;
        let cluster = parts.next()?.parse().ok()?;
        let attribute = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            endpoint,
            cluster,
            attribute,
        })
    }
}

/// Interpret an attribute value as an on/off state.
fn as_on_off(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

/// Extract every on/off endpoint of a node, ordered by endpoint id.
pub fn extract_onoff_endpoints(node: &NodeSnapshot) -> Vec<EndpointRecord> {
    // endpoint -> on/off value, if one was read
    let mut endpoints: BTreeMap<u16, Option<bool>> = BTreeMap::new();

    for (key, value) in &node.attributes {
        let Some(path) = AttributePath::parse(key) else {
            trace!("Skipping malformed attribute key '{}' on node {}", key, node.node_id);
            continue;
        };
        if path.cluster != ONOFF_CLUSTER_ID {
            continue;
        }

        let entry = endpoints.entry(path.endpoint).or_insert(None);
        if path.attribute == ONOFF_ATTRIBUTE_ID {
            if let Some(on) = as_on_off(value) {
                *entry = Some(on);
            }
        }
    }

    endpoints
        .into_iter()
        .map(|(endpoint_id, on_off)| EndpointRecord {
            device_id: node.node_id,
            endpoint_id,
            available: node.available,
            on_off,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_attribute_path() {
        assert_eq!(
            AttributePath::parse("1/6/0"),
            Some(AttributePath {
                endpoint: 1,
                cluster: 6,
                attribute: 0
            })
        );
        assert_eq!(AttributePath::parse("abc"), None);
        assert_eq!(AttributePath::parse("1/6"), None);
        assert_eq!(AttributePath::parse("1/6/0/2"), None);
        assert_eq!(AttributePath::parse("1/x/0"), None);
        assert_eq!(AttributePath::parse(""), None);
    }

    #[test]
    fn test_extracts_onoff_endpoint_only() {
        let node = NodeSnapshot::new(5, true)
            .with_attribute("1/6/0", true)
            .with_attribute("1/6/1", false)
            .with_attribute("2/3/0", true);

        let records = extract_onoff_endpoints(&node);
        assert_eq!(
            records,
            vec![EndpointRecord {
                device_id: 5,
                endpoint_id: 1,
                available: true,
                on_off: Some(true),
            }]
        );
    }

    #[test]
    fn test_malformed_keys_are_skipped() {
        let node = NodeSnapshot::new(9, false)
            .with_attribute("abc", true)
            .with_attribute("1/6", true)
            .with_attribute("3/6/0", false);

        let records = extract_onoff_endpoints(&node);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].endpoint_id, 3);
        assert_eq!(records[0].on_off, Some(false));
        assert!(!records[0].available);
    }

    #[test]
    fn test_cluster_without_value_is_unknown() {
        let node = NodeSnapshot::new(1, true)
            .with_attribute("2/6/16384", true)
            .with_attribute("4/6/0", json!("on"));

        let records = extract_onoff_endpoints(&node);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].endpoint_id, 2);
        assert_eq!(records[0].on_off, None);
        assert_eq!(records[1].endpoint_id, 4);
        assert_eq!(records[1].on_off, None);
    }

    #[test]
    fn test_output_is_ordered_by_endpoint() {
        let node = NodeSnapshot::new(1, true)
            .with_attribute("10/6/0", true)
            .with_attribute("2/6/0", false)
            .with_attribute("7/6/0", 1);

        let ids: Vec<u16> = extract_onoff_endpoints(&node)
            .iter()
            .map(|r| r.endpoint_id)
            .collect();
        assert_eq!(ids, vec![2, 7, 10]);
    }

    #[test]
    fn test_empty_node() {
        assert!(extract_onoff_endpoints(&NodeSnapshot::new(1, true)).is_empty());
    }
}
