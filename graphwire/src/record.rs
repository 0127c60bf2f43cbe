//! Domain structures carried as tagged `Structure`s on the wire (§3 "Structure"): graph entities,
//! temporal values and spatial points, plus the plain key/value `Record` a `RecordStream` yields.
//!
//! `original_source` does not carry a `graph.py`/temporal module in this retrieval pack, so these
//! are grounded on the public Bolt structure-tag registry named in §3's data model rather than on
//! a specific source file; the hydration mechanism itself is `packstream::hydrate`'s registry.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::packstream::{HydrationRegistry, Structure, Value};

/// One row a `RecordStream` yields: the query's column names (shared across every record of one
/// stream, hence `Arc`) paired with that row's values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub keys: Arc<Vec<String>>,
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(keys: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.keys.iter().position(|k| k == key).and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Structure tags for the domain objects and value types §3 names.
pub mod tag {
    pub const NODE: u8 = 0x4E;
    pub const RELATIONSHIP: u8 = 0x52;
    pub const UNBOUND_RELATIONSHIP: u8 = 0x72;
    pub const PATH: u8 = 0x50;

    pub const DATE: u8 = 0x44;
    pub const LOCAL_TIME: u8 = 0x74;
    pub const TIME: u8 = 0x54;
    pub const LOCAL_DATE_TIME: u8 = 0x64;
    pub const DATE_TIME: u8 = 0x49;
    pub const DATE_TIME_ZONE_ID: u8 = 0x69;
    pub const DURATION: u8 = 0x45;

    pub const POINT_2D: u8 = 0x58;
    pub const POINT_3D: u8 = 0x59;
}

fn field(structure: &Structure, index: usize) -> Option<&Value> {
    structure.fields.get(index)
}

fn expect_int(structure: &Structure, index: usize, what: &str) -> Result<i64, String> {
    field(structure, index)
        .and_then(Value::as_int)
        .ok_or_else(|| format!("{what}: missing or non-int field {index}"))
}

fn expect_str(structure: &Structure, index: usize, what: &str) -> Result<String, String> {
    field(structure, index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("{what}: missing or non-string field {index}"))
}

fn expect_list<'a>(structure: &'a Structure, index: usize, what: &str) -> Result<&'a [Value], String> {
    field(structure, index)
        .and_then(Value::as_list)
        .ok_or_else(|| format!("{what}: missing or non-list field {index}"))
}

fn expect_map(structure: &Structure, index: usize, what: &str) -> Result<IndexMap<String, Value>, String> {
    field(structure, index)
        .and_then(Value::as_map)
        .cloned()
        .ok_or_else(|| format!("{what}: missing or non-map field {index}"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: IndexMap<String, Value>,
    /// Present from Bolt 5.0 onward; `None` against a pre-5.0 server.
    pub element_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub rel_type: String,
    pub properties: IndexMap<String, Value>,
    pub element_id: Option<String>,
    pub start_node_element_id: Option<String>,
    pub end_node_element_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    pub id: i64,
    pub rel_type: String,
    pub properties: IndexMap<String, Value>,
    pub element_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub start: Node,
    pub relationship: UnboundRelationship,
    pub end: Node,
    /// True if `relationship` runs `end -> start` in the underlying graph.
    pub reversed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<UnboundRelationship>,
    pub indices: Vec<i64>,
}

impl Path {
    /// Walks `indices` into the alternating node/relationship sequence the path describes (the
    /// standard Bolt path-reconstruction algorithm: each `(rel_index, node_index)` pair names the
    /// next relationship, signed to indicate direction, and the node it leads to).
    pub fn segments(&self) -> Vec<PathSegment> {
        let mut segments = Vec::with_capacity(self.indices.len() / 2);
        let mut node_index = 0usize;
        let mut i = 0usize;
        while i + 1 < self.indices.len() {
            let rel_index = self.indices[i];
            let next_node_index = self.indices[i + 1] as usize;
            let (relationship, reversed) = if rel_index > 0 {
                (self.relationships[(rel_index - 1) as usize].clone(), false)
            } else {
                (self.relationships[(-rel_index - 1) as usize].clone(), true)
            };
            segments.push(PathSegment {
                start: self.nodes[node_index].clone(),
                relationship,
                end: self.nodes[next_node_index].clone(),
                reversed,
            });
            node_index = next_node_index;
            i += 2;
        }
        segments
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Date {
    pub days_since_epoch: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTime {
    pub nanos_since_midnight: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetTime {
    pub nanos_since_midnight: i64,
    pub tz_offset_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalDateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetDateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
    pub tz_offset_seconds: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZonedDateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
    pub tz_id: String,
}

impl ZonedDateTime {
    /// Resolves `tz_id` to a `chrono_tz::Tz` and pairs it with the naive instant, if both the
    /// zone name and the local time are valid.
    pub fn to_chrono(&self) -> Option<chrono::DateTime<chrono_tz::Tz>> {
        let tz: chrono_tz::Tz = self.tz_id.parse().ok()?;
        let naive = chrono::DateTime::from_timestamp(self.seconds, self.nanoseconds as u32)?.naive_utc();
        naive.and_local_timezone(tz).single()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsoDuration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub srid: i64,
    pub x: f64,
    pub y: f64,
}

#[cfg(feature = "spatial")]
impl Point2D {
    pub fn to_geo(&self) -> geo_types::Point<f64> {
        geo_types::Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub srid: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A hydrated node reachable by the registry below, one level up from the raw `Structure`.
fn hydrate_node(structure: Structure) -> crate::error::Result<Value> {
    let what = "Node";
    let id = expect_int(&structure, 0, what).map_err(crate::error::GraphWireError::Decode)?;
    let labels = expect_list(&structure, 1, what)
        .map_err(crate::error::GraphWireError::Decode)?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    let properties = expect_map(&structure, 2, what).map_err(crate::error::GraphWireError::Decode)?;
    let element_id = field(&structure, 3).and_then(Value::as_str).map(str::to_string);
    Ok(Value::Structure(Structure::new(
        tag::NODE,
        vec![Value::Map({
            let mut map = IndexMap::new();
            map.insert("id".to_string(), Value::Int(id));
            map.insert("labels".to_string(), Value::List(labels.into_iter().map(Value::String).collect()));
            map.insert("properties".to_string(), Value::Map(properties));
            map.insert("element_id".to_string(), element_id.map(Value::String).unwrap_or(Value::Null));
            map
        })],
    )))
}

impl Node {
    /// Reconstructs a `Node` from the map shape `hydrate_node` wraps it in, used once a caller
    /// has a hydrated `Value::Structure` in hand and wants the typed form.
    pub fn from_value(value: &Value) -> Option<Node> {
        let structure = value.as_structure()?;
        if structure.tag != tag::NODE {
            return None;
        }
        let map = structure.fields.first()?.as_map()?;
        Some(Node {
            id: map.get("id")?.as_int()?,
            labels: map.get("labels")?.as_list()?.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            properties: map.get("properties")?.as_map()?.clone(),
            element_id: map.get("element_id").and_then(Value::as_str).map(str::to_string),
        })
    }
}

fn hydrate_unbound_relationship(structure: Structure) -> crate::error::Result<Value> {
    let what = "UnboundRelationship";
    let id = expect_int(&structure, 0, what).map_err(crate::error::GraphWireError::Decode)?;
    let rel_type = expect_str(&structure, 1, what).map_err(crate::error::GraphWireError::Decode)?;
    let properties = expect_map(&structure, 2, what).map_err(crate::error::GraphWireError::Decode)?;
    let element_id = field(&structure, 3).and_then(Value::as_str).map(str::to_string);
    Ok(Value::Structure(Structure::new(
        tag::UNBOUND_RELATIONSHIP,
        vec![Value::Map({
            let mut map = IndexMap::new();
            map.insert("id".to_string(), Value::Int(id));
            map.insert("type".to_string(), Value::String(rel_type));
            map.insert("properties".to_string(), Value::Map(properties));
            map.insert("element_id".to_string(), element_id.map(Value::String).unwrap_or(Value::Null));
            map
        })],
    )))
}

impl UnboundRelationship {
    pub fn from_value(value: &Value) -> Option<UnboundRelationship> {
        let structure = value.as_structure()?;
        if structure.tag != tag::UNBOUND_RELATIONSHIP {
            return None;
        }
        let map = structure.fields.first()?.as_map()?;
        Some(UnboundRelationship {
            id: map.get("id")?.as_int()?,
            rel_type: map.get("type")?.as_str()?.to_string(),
            properties: map.get("properties")?.as_map()?.clone(),
            element_id: map.get("element_id").and_then(Value::as_str).map(str::to_string),
        })
    }
}

fn hydrate_relationship(structure: Structure) -> crate::error::Result<Value> {
    let what = "Relationship";
    let id = expect_int(&structure, 0, what).map_err(crate::error::GraphWireError::Decode)?;
    let start_node_id = expect_int(&structure, 1, what).map_err(crate::error::GraphWireError::Decode)?;
    let end_node_id = expect_int(&structure, 2, what).map_err(crate::error::GraphWireError::Decode)?;
    let rel_type = expect_str(&structure, 3, what).map_err(crate::error::GraphWireError::Decode)?;
    let properties = expect_map(&structure, 4, what).map_err(crate::error::GraphWireError::Decode)?;
    let element_id = field(&structure, 5).and_then(Value::as_str).map(str::to_string);
    let start_element_id = field(&structure, 6).and_then(Value::as_str).map(str::to_string);
    let end_element_id = field(&structure, 7).and_then(Value::as_str).map(str::to_string);
    Ok(Value::Structure(Structure::new(
        tag::RELATIONSHIP,
        vec![Value::Map({
            let mut map = IndexMap::new();
            map.insert("id".to_string(), Value::Int(id));
            map.insert("start_node_id".to_string(), Value::Int(start_node_id));
            map.insert("end_node_id".to_string(), Value::Int(end_node_id));
            map.insert("type".to_string(), Value::String(rel_type));
            map.insert("properties".to_string(), Value::Map(properties));
            map.insert("element_id".to_string(), element_id.map(Value::String).unwrap_or(Value::Null));
            map.insert(
                "start_node_element_id".to_string(),
                start_element_id.map(Value::String).unwrap_or(Value::Null),
            );
            map.insert(
                "end_node_element_id".to_string(),
                end_element_id.map(Value::String).unwrap_or(Value::Null),
            );
            map
        })],
    )))
}

impl Relationship {
    pub fn from_value(value: &Value) -> Option<Relationship> {
        let structure = value.as_structure()?;
        if structure.tag != tag::RELATIONSHIP {
            return None;
        }
        let map = structure.fields.first()?.as_map()?;
        Some(Relationship {
            id: map.get("id")?.as_int()?,
            start_node_id: map.get("start_node_id")?.as_int()?,
            end_node_id: map.get("end_node_id")?.as_int()?,
            rel_type: map.get("type")?.as_str()?.to_string(),
            properties: map.get("properties")?.as_map()?.clone(),
            element_id: map.get("element_id").and_then(Value::as_str).map(str::to_string),
            start_node_element_id: map.get("start_node_element_id").and_then(Value::as_str).map(str::to_string),
            end_node_element_id: map.get("end_node_element_id").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// Registers hydration hooks for every domain tag this module knows (§4.A "hydration hooks").
/// Temporal and spatial values decode to their typed structs directly; graph entities decode
/// through an intermediate named-map `Structure` so `Node::from_value`/`Relationship::from_value`
/// stay cheap, symmetric conversions rather than a second parallel decode path.
pub fn default_registry() -> HydrationRegistry {
    let mut registry = HydrationRegistry::new();
    registry.register(tag::NODE, std::sync::Arc::new(hydrate_node));
    registry.register(tag::RELATIONSHIP, std::sync::Arc::new(hydrate_relationship));
    registry.register(tag::UNBOUND_RELATIONSHIP, std::sync::Arc::new(hydrate_unbound_relationship));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_structure(id: i64, labels: &[&str]) -> Structure {
        let mut props = IndexMap::new();
        props.insert("name".to_string(), Value::String("a".to_string()));
        Structure::new(
            tag::NODE,
            vec![
                Value::Int(id),
                Value::List(labels.iter().map(|l| Value::String(l.to_string())).collect()),
                Value::Map(props),
                Value::String("4:abc:1".to_string()),
            ],
        )
    }

    #[test]
    fn hydrates_node_round_trip() {
        let structure = node_structure(1, &["Person"]);
        let hydrated = hydrate_node(structure).unwrap();
        let node = Node::from_value(&hydrated).unwrap();
        assert_eq!(node.id, 1);
        assert_eq!(node.labels, vec!["Person".to_string()]);
        assert_eq!(node.element_id.as_deref(), Some("4:abc:1"));
    }

    #[test]
    fn path_segments_follow_signed_indices() {
        let n0 = Node { id: 0, labels: vec![], properties: IndexMap::new(), element_id: None };
        let n1 = Node { id: 1, labels: vec![], properties: IndexMap::new(), element_id: None };
        let rel = UnboundRelationship {
            id: 10,
            rel_type: "KNOWS".to_string(),
            properties: IndexMap::new(),
            element_id: None,
        };
        let path = Path {
            nodes: vec![n0.clone(), n1.clone()],
            relationships: vec![rel.clone()],
            indices: vec![1, 1],
        };
        let segments = path.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start, n0);
        assert_eq!(segments[0].end, n1);
        assert!(!segments[0].reversed);

        let reversed_path = Path {
            nodes: vec![n0.clone(), n1.clone()],
            relationships: vec![rel],
            indices: vec![-1, 1],
        };
        assert!(reversed_path.segments()[0].reversed);
    }
}
