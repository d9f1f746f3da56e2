//! Reachability graph construction.
//!
//! `HeapGraphBuilder` walks breadth-first from an ordered list of root
//! providers. Each address becomes at most one node; meeting it again only
//! adds an edge. Node ids are odd and increase in discovery order, with the
//! synthetic root, the "(GC roots)" node and one node per root category
//! taking the lowest ones.

use crate::catalog::BoundKind;
use crate::heap::{ObjectHandle, ObjectModel, Reference};
use crate::load::{displace, Memory};
use crate::value::{TagScheme, TaggedValue};
use crate::{GraphError, ObjectError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

/// Node categories understood by snapshot viewers, in their fixed order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    Hidden,
    Array,
    String,
    Object,
    Code,
    Closure,
    RegExp,
    Number,
    Native,
    Synthetic,
    ConcatenatedString,
    SlicedString,
    Symbol,
    BigInt,
    ObjectShape,
}

impl NodeType {
    pub const ALL: [NodeType; 15] = [
        Self::Hidden,
        Self::Array,
        Self::String,
        Self::Object,
        Self::Code,
        Self::Closure,
        Self::RegExp,
        Self::Number,
        Self::Native,
        Self::Synthetic,
        Self::ConcatenatedString,
        Self::SlicedString,
        Self::Symbol,
        Self::BigInt,
        Self::ObjectShape,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Hidden => "hidden",
            Self::Array => "array",
            Self::String => "string",
            Self::Object => "object",
            Self::Code => "code",
            Self::Closure => "closure",
            Self::RegExp => "regexp",
            Self::Number => "number",
            Self::Native => "native",
            Self::Synthetic => "synthetic",
            Self::ConcatenatedString => "concatenated string",
            Self::SlicedString => "sliced string",
            Self::Symbol => "symbol",
            Self::BigInt => "bigint",
            Self::ObjectShape => "object shape",
        }
    }

    /// Position in `ALL`, which is what the snapshot records.
    pub fn index(self) -> u64 {
        self as u64
    }

    fn for_kind(kind: BoundKind) -> Self {
        match kind {
            BoundKind::Map => Self::ObjectShape,
            BoundKind::FixedArray | BoundKind::ByteArray | BoundKind::NameDictionary => {
                Self::Array
            }
            BoundKind::SeqOneByteString | BoundKind::SeqTwoByteString => Self::String,
            BoundKind::ConsString => Self::ConcatenatedString,
            BoundKind::HeapNumber => Self::Number,
            BoundKind::JsObject => Self::Object,
            BoundKind::Oddball | BoundKind::Opaque => Self::Hidden,
        }
    }
}

/// Edge categories, in the viewers' fixed order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EdgeType {
    Context,
    Element,
    Property,
    Internal,
    Hidden,
    Shortcut,
    Weak,
}

impl EdgeType {
    pub const ALL: [EdgeType; 7] = [
        Self::Context,
        Self::Element,
        Self::Property,
        Self::Internal,
        Self::Hidden,
        Self::Shortcut,
        Self::Weak,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Element => "element",
            Self::Property => "property",
            Self::Internal => "internal",
            Self::Hidden => "hidden",
            Self::Shortcut => "shortcut",
            Self::Weak => "weak",
        }
    }

    pub fn index(self) -> u64 {
        self as u64
    }

    /// Whether the edge is labelled by a number rather than a string.
    pub fn uses_index(self) -> bool {
        matches!(self, Self::Element | Self::Hidden)
    }

    /// The type an edge labelled `name` is recorded with. Numbered types
    /// can't carry a string, so a named element becomes a property and a
    /// named hidden slot an internal one.
    pub fn labelled(self, name: &EdgeName) -> Self {
        match (self, name) {
            (Self::Element, EdgeName::Name(_)) => Self::Property,
            (Self::Hidden, EdgeName::Name(_)) => Self::Internal,
            (t, _) => t,
        }
    }

    /// Whether the edge keeps its target alive.
    pub fn is_strong(self) -> bool {
        !matches!(self, Self::Weak | Self::Shortcut)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EdgeName {
    Name(String),
    Index(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub edge_type: EdgeType,
    pub name: EdgeName,
    /// Index of the target in `HeapGraph::nodes`.
    pub to: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub id: u64,
    pub node_type: NodeType,
    pub name: String,
    pub self_size: u64,
    /// `None` for synthetic nodes.
    pub address: Option<u64>,
    pub edges: Vec<Edge>,
}

/// What to do with an object that can't be decoded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Leave it out, count it, and carry on.
    Skip,
    /// Stop the traversal.
    Abort,
}

/// A source of root slots.
pub trait RootProvider {
    /// Name of the category, used for its synthetic node.
    fn category(&self) -> &str;

    /// The roots, in a stable order.
    fn roots(
        &self,
        memory: &dyn Memory,
        scheme: &TagScheme,
    ) -> Result<Vec<(EdgeName, TaggedValue)>, ObjectError>;
}

/// `count` consecutive tagged slots starting at `start`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotRange {
    pub category: String,
    pub start: u64,
    pub count: u64,
}

impl RootProvider for SlotRange {
    fn category(&self) -> &str {
        &self.category
    }

    fn roots(
        &self,
        memory: &dyn Memory,
        scheme: &TagScheme,
    ) -> Result<Vec<(EdgeName, TaggedValue)>, ObjectError> {
        (0..self.count)
            .map(|i| {
                let offset = i.checked_mul(scheme.word_size).unwrap_or(u64::MAX);
                let addr = displace(self.start, offset)?;
                let word = memory.read_word(addr, scheme.word_size, false)?;
                Ok((EdgeName::Index(i), scheme.classify(word)))
            })
            .collect()
    }
}

/// The finished graph.
#[derive(Clone, Debug, Default)]
pub struct HeapGraph {
    nodes: Vec<Node>,
    by_address: HashMap<u64, usize>,
    /// Failures by reason, counting each address once.
    skipped: BTreeMap<&'static str, u64>,
    /// Root categories that couldn't be enumerated.
    failed_roots: Vec<String>,
    opaque: u64,
}

impl HeapGraph {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.edges.len()).sum()
    }

    pub fn node_at(&self, address: u64) -> Option<&Node> {
        self.by_address.get(&address).map(|&i| &self.nodes[i])
    }

    pub fn skipped(&self) -> &BTreeMap<&'static str, u64> {
        &self.skipped
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    /// Objects bound to no known kind but still included.
    pub fn opaque_count(&self) -> u64 {
        self.opaque
    }

    pub fn summary(&self) -> String {
        let mut s = format!(
            "{} nodes, {} edges",
            self.node_count(),
            self.edge_count()
        );
        if self.skipped.is_empty() {
            s.push_str(", nothing skipped");
        } else {
            let _ = write!(s, ", skipped {} objects (", self.skipped_total());
            for (i, (reason, n)) in self.skipped.iter().enumerate() {
                if i > 0 {
                    s.push_str(", ");
                }
                let _ = write!(s, "{}: {}", reason, n);
            }
            s.push(')');
        }
        if self.opaque > 0 {
            let _ = write!(s, ", {} opaque", self.opaque);
        }
        for c in &self.failed_roots {
            let _ = write!(s, "; root category {} unavailable", c);
        }
        s
    }
}

/// An object waiting for its references to be followed.
struct Pending {
    node: usize,
    references: Vec<Reference>,
}

pub struct HeapGraphBuilder<'m, 'a> {
    model: &'m ObjectModel<'a>,
    policy: FailurePolicy,
    max_name_length: usize,
}

/// Traversal state for one build.
struct Walk {
    graph: HeapGraph,
    failed: HashSet<u64>,
    queue: VecDeque<Pending>,
    next_id: u64,
}

impl Walk {
    fn add_node(&mut self, node_type: NodeType, name: String, self_size: u64, address: Option<u64>) -> usize {
        let i = self.graph.nodes.len();
        if let Some(a) = address {
            self.graph.by_address.insert(a, i);
        }
        self.graph.nodes.push(Node {
            id: self.next_id,
            node_type,
            name,
            self_size,
            address,
            edges: vec![],
        });
        self.next_id += 2;
        i
    }

    fn add_edge(&mut self, from: usize, edge_type: EdgeType, name: EdgeName, to: usize) {
        self.graph.nodes[from].edges.push(Edge {
            edge_type: edge_type.labelled(&name),
            name,
            to,
        });
    }
}

impl<'m, 'a> HeapGraphBuilder<'m, 'a> {
    pub fn new(model: &'m ObjectModel<'a>, policy: FailurePolicy, max_name_length: usize) -> Self {
        Self {
            model,
            policy,
            max_name_length,
        }
    }

    /// Walks everything reachable from `providers`, in order.
    pub fn build_from_roots(&self, providers: &[&dyn RootProvider]) -> Result<HeapGraph, GraphError> {
        let mut w = Walk {
            graph: HeapGraph::default(),
            failed: HashSet::new(),
            queue: VecDeque::new(),
            next_id: 1,
        };

        let root = w.add_node(NodeType::Synthetic, String::new(), 0, None);
        let gc_roots = w.add_node(NodeType::Synthetic, "(GC roots)".to_string(), 0, None);
        w.add_edge(root, EdgeType::Element, EdgeName::Index(1), gc_roots);
        let categories: Vec<usize> = providers
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let n = w.add_node(NodeType::Synthetic, format!("({})", p.category()), 0, None);
                w.add_edge(gc_roots, EdgeType::Element, EdgeName::Index(i as u64 + 1), n);
                n
            })
            .collect();

        let scheme = self.model.scheme();
        for (p, &category) in providers.iter().zip(&categories) {
            let roots = match p.roots(self.model.memory(), &scheme) {
                Ok(r) => r,
                Err(source) => match self.policy {
                    FailurePolicy::Abort => {
                        return Err(GraphError::Roots {
                            category: p.category().to_string(),
                            source,
                        })
                    }
                    FailurePolicy::Skip => {
                        tracing::warn!(category = p.category(), %source, "root category skipped");
                        w.graph.failed_roots.push(p.category().to_string());
                        continue;
                    }
                },
            };
            tracing::debug!(category = p.category(), roots = roots.len(), "roots enumerated");
            for (name, value) in roots {
                self.follow(&mut w, category, EdgeType::Element, name, value)?;
            }
        }

        while let Some(Pending { node, references }) = w.queue.pop_front() {
            for r in references {
                self.follow(&mut w, node, r.edge_type, r.name, r.value)?;
            }
        }

        tracing::info!(
            nodes = w.graph.node_count(),
            edges = w.graph.edge_count(),
            skipped = w.graph.skipped_total(),
            "heap graph built",
        );
        Ok(w.graph)
    }

    /// Adds an edge from `from` to whatever `value` refers to, discovering
    /// the target if it's new.
    fn follow(
        &self,
        w: &mut Walk,
        from: usize,
        edge_type: EdgeType,
        name: EdgeName,
        value: TaggedValue,
    ) -> Result<(), GraphError> {
        let Some(addr) = value.address() else {
            return Ok(());
        };
        let edge_type = if value.is_weak() {
            EdgeType::Weak
        } else {
            edge_type
        };
        if let Some(to) = self.visit(w, addr)? {
            w.add_edge(from, edge_type, name, to);
        }
        Ok(())
    }

    /// Returns the node for `addr`, creating it on first sight. `None` means
    /// the object was skipped.
    fn visit(&self, w: &mut Walk, addr: u64) -> Result<Option<usize>, GraphError> {
        if let Some(&i) = w.graph.by_address.get(&addr) {
            return Ok(Some(i));
        }
        if w.failed.contains(&addr) {
            return Ok(None);
        }

        let decoded = self.model.bind(addr).and_then(|h| {
            let size = self.model.size(&h)?;
            let references = self.model.references(&h)?;
            Ok((h, size, references))
        });
        let (h, size, references) = match decoded {
            Ok(d) => d,
            Err(e) => {
                return match self.policy {
                    FailurePolicy::Abort => Err(GraphError::Aborted(e)),
                    FailurePolicy::Skip => {
                        tracing::warn!(addr, %e, "object skipped");
                        w.failed.insert(addr);
                        *w.graph.skipped.entry(e.reason_name()).or_default() += 1;
                        Ok(None)
                    }
                };
            }
        };

        if h.kind == BoundKind::Opaque {
            w.graph.opaque += 1;
        }
        let name = self.node_name(&h);
        let i = w.add_node(NodeType::for_kind(h.kind), name, size, Some(addr));
        w.queue.push_back(Pending {
            node: i,
            references,
        });
        Ok(Some(i))
    }

    fn node_name(&self, h: &ObjectHandle) -> String {
        let m = self.model;
        match h.kind {
            k if k.is_string() => m
                .string_value(h, self.max_name_length)
                .unwrap_or_else(|e| {
                    tracing::debug!(addr = h.address, %e, "string contents unreadable");
                    "(string)".to_string()
                }),
            BoundKind::HeapNumber => match m.heap_number_value(h) {
                Ok(v) => v.to_string(),
                Err(_) => "heap number".to_string(),
            },
            BoundKind::Map => "system / Map".to_string(),
            BoundKind::JsObject => "Object".to_string(),
            BoundKind::FixedArray => "(object elements)".to_string(),
            BoundKind::NameDictionary => "(object properties)".to_string(),
            BoundKind::Opaque => format!("(opaque type {})", h.descriptor.instance_type),
            other => format!("system / {}", other.name()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::Catalog;
    use crate::config::SessionConfig;
    use crate::heap::test_heap::*;
    use crate::test_dwarf::sample_image;
    use crate::DebugInfoImage;

    const ROOTS: u64 = 0x9_0000;

    fn model<'a>(img: &'a DebugInfoImage, mem: &'a dyn Memory) -> ObjectModel<'a> {
        ObjectModel::new(img, mem, &Catalog::v8("v8::internal"), &SessionConfig::default()).unwrap()
    }

    fn roots(n: u64) -> SlotRange {
        SlotRange {
            category: "strong-roots".to_string(),
            start: ROOTS,
            count: n,
        }
    }

    /// Three strings, two arrays that share them, and a cycle.
    fn shared_heap() -> TestHeap {
        let mut heap = TestHeap::new();
        heap.one_byte_string(0x2_0000, "a");
        heap.one_byte_string(0x2_0100, "b");
        heap.one_byte_string(0x2_0200, "c");
        heap.fixed_array(
            0x3_0000,
            &[strong(0x2_0000), strong(0x2_0100), strong(0x3_1000), smi(4)],
        );
        heap.fixed_array(
            0x3_1000,
            &[strong(0x2_0100), strong(0x2_0200), strong(0x3_0000), strong(0x2_0000)],
        );
        heap.words(ROOTS, &[strong(0x3_0000), strong(0x3_1000), strong(0x3_0000)]);
        heap
    }

    #[test]
    fn each_address_is_one_node() {
        let img = sample_image();
        let heap = shared_heap();
        let m = model(&img, &heap.mem);
        let g = HeapGraphBuilder::new(&m, FailurePolicy::Skip, 64)
            .build_from_roots(&[&roots(3)])
            .unwrap();

        let addrs: Vec<u64> = g.nodes().iter().filter_map(|n| n.address).collect();
        let distinct: HashSet<u64> = addrs.iter().copied().collect();
        assert_eq!(addrs.len(), distinct.len());
        // 2 arrays, 3 strings, and the 3 maps they use (one-byte, array, meta).
        assert_eq!(distinct.len(), 8);
        // Plus root, (GC roots), and the category.
        assert_eq!(g.node_count(), 11);
        assert_eq!(g.skipped_total(), 0);

        let ids: Vec<u64> = g.nodes().iter().map(|n| n.id).collect();
        assert_eq!(&ids[..3], &[1, 3, 5]);
        assert!(ids.windows(2).all(|w| w[1] == w[0] + 2));

        // Root slots 0 and 2 name the same array: two edges, one node.
        let category = &g.nodes()[2];
        assert_eq!(category.name, "(strong-roots)");
        assert_eq!(category.edges.len(), 3);
        assert_eq!(category.edges[0].to, category.edges[2].to);

        let a = g.node_at(0x2_0000).unwrap();
        assert_eq!(a.node_type, NodeType::String);
        assert_eq!(a.name, "a");
        assert_eq!(a.self_size, 24);
        let arr = g.node_at(0x3_0000).unwrap();
        assert_eq!(arr.self_size, 48);

        // Every addressed node is found by its address, nothing else is.
        for n in g.nodes() {
            if let Some(addr) = n.address {
                assert!(std::ptr::eq(g.node_at(addr).unwrap(), n));
            }
        }
        assert!(g.node_at(0x2_0008).is_none());
        assert!(g.node_at(ROOTS).is_none());
    }

    #[test]
    fn traversal_is_deterministic() {
        let img = sample_image();
        let heap = shared_heap();
        let m = model(&img, &heap.mem);
        let b = HeapGraphBuilder::new(&m, FailurePolicy::Skip, 64);
        let g1 = b.build_from_roots(&[&roots(3)]).unwrap();
        let g2 = b.build_from_roots(&[&roots(3)]).unwrap();
        assert_eq!(g1.nodes(), g2.nodes());
    }

    #[test]
    fn corrupt_objects_are_skipped_and_counted() {
        let img = sample_image();
        let mut heap = shared_heap();
        // Two more arrays hang off a third root: one claims an absurd
        // length, one has a map pointer into nowhere. Both are referenced
        // twice but counted once.
        heap.fixed_array(0x3_2000, &[strong(0x4_0000), strong(0x4_1000), strong(0x4_0000)]);
        heap.words(0x4_0000, &[strong(FIXED_ARRAY_MAP), smi(1 << 30)]);
        heap.words(0x4_1000, &[strong(0x7_7700)]);
        heap.words(
            ROOTS,
            &[strong(0x3_0000), strong(0x3_1000), strong(0x3_2000), strong(0x4_1000)],
        );
        let m = model(&img, &heap.mem);

        let g = HeapGraphBuilder::new(&m, FailurePolicy::Skip, 64)
            .build_from_roots(&[&roots(4)])
            .unwrap();
        assert_eq!(g.skipped_total(), 2);
        assert_eq!(g.skipped().get("corrupt object"), Some(&1));
        assert_eq!(g.skipped().get("memory unavailable"), Some(&1));
        assert!(g.node_at(0x4_0000).is_none());
        assert!(g.node_at(0x3_2000).is_some());
        assert!(g.summary().contains("skipped 2 objects"));

        let e = HeapGraphBuilder::new(&m, FailurePolicy::Abort, 64).build_from_roots(&[&roots(4)]);
        assert!(matches!(e, Err(GraphError::Aborted(_))));
    }

    #[test]
    fn descriptors_at_the_top_of_memory_are_skipped() {
        let img = sample_image();
        let mut heap = TestHeap::new();
        heap.words(0x2_0000, &[0xffff_ffff_ffff_fff9]);
        heap.words(ROOTS, &[strong(0x2_0000)]);
        let m = model(&img, &heap.mem);

        let g = HeapGraphBuilder::new(&m, FailurePolicy::Skip, 64)
            .build_from_roots(&[&roots(1)])
            .unwrap();
        assert_eq!(g.skipped_total(), 1);
        assert_eq!(g.skipped().get("corrupt object"), Some(&1));
        assert!(g.node_at(0x2_0000).is_none());
        assert_eq!(g.node_count(), 3);
    }

    #[test]
    fn unreadable_root_categories() {
        let img = sample_image();
        let heap = shared_heap();
        let m = model(&img, &heap.mem);
        let bad = SlotRange {
            category: "builtins".to_string(),
            start: 0xdead_0000,
            count: 2,
        };

        let g = HeapGraphBuilder::new(&m, FailurePolicy::Skip, 64)
            .build_from_roots(&[&bad, &roots(1)])
            .unwrap();
        assert_eq!(g.nodes()[2].name, "(builtins)");
        assert!(g.nodes()[2].edges.is_empty());
        assert!(g.node_at(0x3_0000).is_some());
        assert!(g.summary().contains("builtins unavailable"));

        let e = HeapGraphBuilder::new(&m, FailurePolicy::Abort, 64).build_from_roots(&[&bad]);
        assert!(matches!(e, Err(GraphError::Roots { .. })));
    }

    #[test]
    fn weak_slots_make_weak_edges() {
        let img = sample_image();
        let mut heap = TestHeap::new();
        heap.one_byte_string(0x2_0000, "w");
        heap.fixed_array(0x3_0000, &[weak(0x2_0000), 3]);
        heap.words(ROOTS, &[strong(0x3_0000), weak(0x2_0000)]);
        let m = model(&img, &heap.mem);
        let g = HeapGraphBuilder::new(&m, FailurePolicy::Skip, 64)
            .build_from_roots(&[&roots(2)])
            .unwrap();

        let arr = g.node_at(0x3_0000).unwrap();
        let weak: Vec<_> = arr.edges.iter().filter(|e| e.edge_type == EdgeType::Weak).collect();
        assert_eq!(weak.len(), 1);
        assert_eq!(g.nodes()[weak[0].to].name, "w");
        assert_eq!(g.nodes()[2].edges[1].edge_type, EdgeType::Weak);
        assert!(!EdgeType::Weak.is_strong());
    }

    #[test]
    fn type_tables_are_in_viewer_order() {
        assert_eq!(NodeType::ALL.len(), 15);
        for (i, t) in NodeType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i as u64);
        }
        for (i, t) in EdgeType::ALL.iter().enumerate() {
            assert_eq!(t.index(), i as u64);
        }
        assert!(EdgeType::Element.uses_index());
        assert!(!EdgeType::Property.uses_index());
    }

    #[test]
    fn named_edges_never_take_numbered_types() {
        let named = EdgeName::Name("x".to_string());
        let numbered = EdgeName::Index(7);
        assert_eq!(EdgeType::Element.labelled(&named), EdgeType::Property);
        assert_eq!(EdgeType::Hidden.labelled(&named), EdgeType::Internal);
        assert_eq!(EdgeType::Element.labelled(&numbered), EdgeType::Element);
        assert_eq!(EdgeType::Internal.labelled(&numbered), EdgeType::Internal);
        assert_eq!(EdgeType::Weak.labelled(&named), EdgeType::Weak);

        let mut w = Walk {
            graph: HeapGraph::default(),
            failed: HashSet::new(),
            queue: VecDeque::new(),
            next_id: 1,
        };
        let from = w.add_node(NodeType::Synthetic, String::new(), 0, None);
        let to = w.add_node(NodeType::Object, "o".to_string(), 16, Some(0x2_0000));
        w.add_edge(from, EdgeType::Element, named.clone(), to);
        w.add_edge(from, EdgeType::Element, numbered, to);
        let edges = &w.graph.nodes()[from].edges;
        assert_eq!(edges[0].edge_type, EdgeType::Property);
        assert_eq!(edges[0].name, named);
        assert_eq!(edges[1].edge_type, EdgeType::Element);

        // The snapshot keeps the name as a string instead of inventing an index.
        let v: serde_json::Value =
            serde_json::from_slice(&crate::snapshot::to_bytes(&w.graph).unwrap()).unwrap();
        let strings = v["strings"].as_array().unwrap();
        assert_eq!(v["edges"][0], EdgeType::Property.index());
        assert_eq!(strings[v["edges"][1].as_u64().unwrap() as usize], "x");
        assert_eq!(v["edges"][3], EdgeType::Element.index());
        assert_eq!(v["edges"][4], 7);
        assert_eq!(w.graph.node_at(0x2_0000).unwrap().name, "o");
    }
}
