//! Heap snapshot output.
//!
//! The format is the one graph viewers import: a `snapshot` header describing
//! the field layout, flat integer arrays for nodes and edges, a string table,
//! and empty arrays for the allocation-tracking sections we never fill in.
//! Top-level keys come out in the order the viewers expect.

use crate::graph::{EdgeName, EdgeType, HeapGraph, NodeType};
use crate::GraphError;
use indexmap::IndexSet;
use serde::Serialize;
use std::io::Write;

const NODE_FIELDS: [&str; 6] = [
    "type",
    "name",
    "id",
    "self_size",
    "edge_count",
    "trace_node_id",
];
const EDGE_FIELDS: [&str; 3] = ["type", "name_or_index", "to_node"];

#[derive(Serialize)]
#[serde(untagged)]
enum FieldType {
    Enum(Vec<&'static str>),
    Scalar(&'static str),
}

#[derive(Serialize)]
struct Meta {
    node_fields: [&'static str; 6],
    node_types: Vec<FieldType>,
    edge_fields: [&'static str; 3],
    edge_types: Vec<FieldType>,
    trace_function_info_fields: [&'static str; 6],
    trace_node_fields: [&'static str; 5],
    sample_fields: [&'static str; 2],
    location_fields: [&'static str; 4],
}

impl Meta {
    fn new() -> Self {
        Self {
            node_fields: NODE_FIELDS,
            node_types: vec![
                FieldType::Enum(NodeType::ALL.iter().map(|t| t.name()).collect()),
                FieldType::Scalar("string"),
                FieldType::Scalar("number"),
                FieldType::Scalar("number"),
                FieldType::Scalar("number"),
                FieldType::Scalar("number"),
            ],
            edge_fields: EDGE_FIELDS,
            edge_types: vec![
                FieldType::Enum(EdgeType::ALL.iter().map(|t| t.name()).collect()),
                FieldType::Scalar("string_or_number"),
                FieldType::Scalar("node"),
            ],
            trace_function_info_fields: [
                "function_id",
                "name",
                "script_name",
                "script_id",
                "line",
                "column",
            ],
            trace_node_fields: ["id", "function_info_index", "count", "size", "children"],
            sample_fields: ["timestamp_us", "last_assigned_id"],
            location_fields: ["object_index", "script_id", "line", "column"],
        }
    }
}

#[derive(Serialize)]
struct Header {
    meta: Meta,
    node_count: usize,
    edge_count: usize,
    trace_function_count: usize,
}

#[derive(Serialize)]
struct Document {
    snapshot: Header,
    nodes: Vec<u64>,
    edges: Vec<u64>,
    trace_function_infos: Vec<u64>,
    trace_tree: Vec<u64>,
    samples: Vec<u64>,
    locations: Vec<u64>,
    strings: IndexSet<String>,
}

fn intern(strings: &mut IndexSet<String>, s: &str) -> u64 {
    match strings.get_index_of(s) {
        Some(i) => i as u64,
        None => strings.insert_full(s.to_string()).0 as u64,
    }
}

fn document(graph: &HeapGraph) -> Document {
    let mut strings = IndexSet::new();
    strings.insert("<dummy>".to_string());

    let nodes = graph.nodes();
    let stride = NODE_FIELDS.len() as u64;
    let mut node_data = Vec::with_capacity(nodes.len() * NODE_FIELDS.len());
    let mut edge_data = Vec::with_capacity(graph.edge_count() * EDGE_FIELDS.len());

    for n in nodes {
        node_data.extend_from_slice(&[
            n.node_type.index(),
            intern(&mut strings, &n.name),
            n.id,
            n.self_size,
            n.edges.len() as u64,
            0,
        ]);
        for e in &n.edges {
            // Indexed edge types carry a number; the rest carry a string.
            let edge_type = e.edge_type.labelled(&e.name);
            let label = match &e.name {
                EdgeName::Index(i) if edge_type.uses_index() => *i,
                EdgeName::Index(i) => intern(&mut strings, &i.to_string()),
                EdgeName::Name(s) => intern(&mut strings, s),
            };
            edge_data.extend_from_slice(&[edge_type.index(), label, e.to as u64 * stride]);
        }
    }

    Document {
        snapshot: Header {
            meta: Meta::new(),
            node_count: nodes.len(),
            edge_count: graph.edge_count(),
            trace_function_count: 0,
        },
        nodes: node_data,
        edges: edge_data,
        trace_function_infos: vec![],
        trace_tree: vec![],
        samples: vec![],
        locations: vec![],
        strings,
    }
}

/// Writes `graph` as a snapshot to `out`.
pub fn write_to(graph: &HeapGraph, out: impl Write) -> Result<(), GraphError> {
    let mut out = std::io::BufWriter::new(out);
    serde_json::to_writer(&mut out, &document(graph))?;
    out.flush()?;
    Ok(())
}

/// Renders `graph` as a snapshot in memory.
pub fn to_bytes(graph: &HeapGraph) -> Result<Vec<u8>, GraphError> {
    Ok(serde_json::to_vec(&document(graph))?)
}
