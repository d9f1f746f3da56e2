//! The default kind catalogue.
//!
//! This is data, not engine: each entry names a native type, the instance
//! types that bind to it, its field list, and how its size is computed. The
//! object model takes any `Catalog`; this one covers enough of the common
//! kinds to walk a heap and exercise every layout feature.
//!
//! Offsets given with `or_default` are the usual values for a 64-bit build
//! without pointer compression. They're only consulted when the debug info
//! has nothing to say.

use crate::layout::{FieldSpec, Length, ScalarType};

/// The closed set of kinds the object model can decode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BoundKind {
    Map,
    FixedArray,
    ByteArray,
    SeqOneByteString,
    SeqTwoByteString,
    ConsString,
    HeapNumber,
    Oddball,
    JsObject,
    NameDictionary,
    /// An instance type nothing in the catalogue claims.
    Opaque,
}

impl BoundKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Map => "Map",
            Self::FixedArray => "FixedArray",
            Self::ByteArray => "ByteArray",
            Self::SeqOneByteString => "SeqOneByteString",
            Self::SeqTwoByteString => "SeqTwoByteString",
            Self::ConsString => "ConsString",
            Self::HeapNumber => "HeapNumber",
            Self::Oddball => "Oddball",
            Self::JsObject => "JSObject",
            Self::NameDictionary => "NameDictionary",
            Self::Opaque => "(opaque)",
        }
    }

    pub fn is_string(self) -> bool {
        matches!(
            self,
            Self::SeqOneByteString | Self::SeqTwoByteString | Self::ConsString
        )
    }
}

/// How an object's size is found when its descriptor says "variable".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Always sized by the descriptor.
    Fixed,
    /// A header followed by `length` elements. The header ends where the
    /// `elements` field starts.
    Sequence {
        length: String,
        elements: String,
        element: ScalarType,
        /// Round the total up to a whole word.
        align: bool,
    },
}

impl Shape {
    fn sequence(length: &str, elements: &str, element: ScalarType, align: bool) -> Self {
        Self::Sequence {
            length: length.to_string(),
            elements: elements.to_string(),
            element,
            align,
        }
    }
}

/// An inclusive range of instance types, by enumerator name.
///
/// The numbers are used when the debug info has no `InstanceType`
/// enumerator of that name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceTypeRange {
    pub first: String,
    pub first_fallback: u16,
    pub last: String,
    pub last_fallback: u16,
}

impl InstanceTypeRange {
    pub fn single(name: &str, fallback: u16) -> Self {
        Self::span((name, fallback), (name, fallback))
    }

    pub fn span(first: (&str, u16), last: (&str, u16)) -> Self {
        Self {
            first: first.0.to_string(),
            first_fallback: first.1,
            last: last.0.to_string(),
            last_fallback: last.1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct KindEntry {
    pub kind: BoundKind,
    /// Qualified native type name that layout constants are looked up in.
    pub type_name: String,
    pub instance_types: Vec<InstanceTypeRange>,
    pub fields: Vec<FieldSpec>,
    pub shape: Shape,
}

/// An ordered list of kinds. Where instance-type ranges overlap, later
/// entries win.
#[derive(Clone, Debug)]
pub struct Catalog {
    pub namespace: String,
    pub kinds: Vec<KindEntry>,
}

impl Catalog {
    /// The built-in catalogue, with native types under `namespace`.
    pub fn v8(namespace: &str) -> Self {
        let ty = |n: &str| format!("{}::{}", namespace, n);
        let one = InstanceTypeRange::single;
        let length = || Length::Field("length".to_string());

        let map = vec![
            FieldSpec::tagged("map").or_default(0),
            FieldSpec::scalar("instance_size_in_words", ScalarType::U8).or_default(8),
            FieldSpec::scalar(
                "in_object_properties_start_or_constructor_function_index",
                ScalarType::U8,
            )
            .or_default(9),
            FieldSpec::scalar("used_or_unused_instance_size_in_words", ScalarType::U8)
                .or_default(10),
            FieldSpec::scalar("visitor_id", ScalarType::U8).or_default(11),
            FieldSpec::scalar("instance_type", ScalarType::U16).or_default(12),
            FieldSpec::scalar("bit_field", ScalarType::U8).or_default(14),
            FieldSpec::bitfield("has_non_instance_prototype", "bit_field", 1),
            FieldSpec::bitfield("is_callable", "bit_field", 1),
            FieldSpec::scalar("bit_field2", ScalarType::U8).or_default(15),
            FieldSpec::scalar("bit_field3", ScalarType::U32).or_default(16),
            FieldSpec::tagged("prototype").or_default(24),
            FieldSpec::tagged("constructor_or_back_pointer")
                .alias("kConstructorOrBackPointerOrNativeContextOffset")
                .or_default(32),
            FieldSpec::tagged("instance_descriptors").or_default(40),
            FieldSpec::tagged("dependent_code").or_default(48),
            FieldSpec::tagged("prototype_validity_cell").or_default(56),
            FieldSpec::tagged("transitions_or_prototype_info").or_default(64),
        ];

        let fixed_array = vec![
            FieldSpec::tagged("map").or_default(0),
            FieldSpec::tagged("length").or_default(8),
            FieldSpec::array("objects", ScalarType::Tagged, length())
                .alias("kHeaderSize")
                .or_default(16),
        ];

        let byte_array = vec![
            FieldSpec::tagged("map").or_default(0),
            FieldSpec::tagged("length").or_default(8),
            FieldSpec::array("bytes", ScalarType::U8, length())
                .alias("kHeaderSize")
                .or_default(16),
        ];

        let string_header = || {
            vec![
                FieldSpec::tagged("map").or_default(0),
                FieldSpec::scalar("raw_hash_field", ScalarType::U32).or_default(8),
                FieldSpec::scalar("length", ScalarType::I32).or_default(12),
            ]
        };
        let seq_string = |element| {
            let mut f = string_header();
            f.push(FieldSpec::array("chars", element, length()));
            f
        };
        let mut cons_string = string_header();
        cons_string.push(FieldSpec::tagged("first").or_default(16));
        cons_string.push(FieldSpec::tagged("second").or_default(24));

        let heap_number = vec![
            FieldSpec::tagged("map").or_default(0),
            FieldSpec::scalar("value", ScalarType::F64).or_default(8),
        ];

        let oddball = vec![
            FieldSpec::tagged("map").or_default(0),
            FieldSpec::scalar("to_number_raw", ScalarType::F64).or_default(8),
            FieldSpec::tagged("to_string").or_default(16),
            FieldSpec::tagged("to_number").or_default(24),
            FieldSpec::tagged("type_of").or_default(32),
            FieldSpec::tagged("kind").or_default(40),
        ];

        let js_object = vec![
            FieldSpec::tagged("map").or_default(0),
            FieldSpec::tagged("properties_or_hash").or_default(8),
            FieldSpec::tagged("elements").or_default(16),
        ];

        let name_dictionary = vec![
            FieldSpec::tagged("map").or_default(0),
            FieldSpec::tagged("length").or_default(8),
            FieldSpec::array("objects", ScalarType::Tagged, length())
                .alias("kHeaderSize")
                .or_default(16),
            FieldSpec::tagged("number_of_elements").or_default(16),
            FieldSpec::tagged("number_of_deleted_elements").or_default(24),
            FieldSpec::tagged("capacity").or_default(32),
            FieldSpec::constant("entry_size").or_default(3),
            FieldSpec::constant("elements_start_index").or_default(5),
        ];

        let words = || Shape::sequence("length", "objects", ScalarType::Tagged, false);
        let kinds = vec![
            // The JS object range is broad; more specific kinds below override
            // any overlap.
            KindEntry {
                kind: BoundKind::JsObject,
                type_name: ty("JSObject"),
                instance_types: vec![InstanceTypeRange::span(
                    ("FIRST_JS_OBJECT_TYPE", 1057),
                    ("LAST_JS_OBJECT_TYPE", 2100),
                )],
                fields: js_object,
                shape: Shape::Fixed,
            },
            KindEntry {
                kind: BoundKind::Map,
                type_name: ty("Map"),
                instance_types: vec![one("MAP_TYPE", 140)],
                fields: map,
                shape: Shape::Fixed,
            },
            KindEntry {
                kind: BoundKind::FixedArray,
                type_name: ty("FixedArray"),
                instance_types: vec![one("FIXED_ARRAY_TYPE", 160)],
                fields: fixed_array,
                shape: words(),
            },
            KindEntry {
                kind: BoundKind::ByteArray,
                type_name: ty("ByteArray"),
                instance_types: vec![one("BYTE_ARRAY_TYPE", 150)],
                fields: byte_array,
                shape: Shape::sequence("length", "bytes", ScalarType::U8, true),
            },
            KindEntry {
                kind: BoundKind::SeqOneByteString,
                type_name: ty("SeqOneByteString"),
                instance_types: vec![
                    one("SEQ_ONE_BYTE_STRING_TYPE", 40),
                    one("INTERNALIZED_ONE_BYTE_STRING_TYPE", 8),
                ],
                fields: seq_string(ScalarType::U8),
                shape: Shape::sequence("length", "chars", ScalarType::U8, true),
            },
            KindEntry {
                kind: BoundKind::SeqTwoByteString,
                type_name: ty("SeqTwoByteString"),
                instance_types: vec![
                    one("SEQ_TWO_BYTE_STRING_TYPE", 32),
                    one("INTERNALIZED_TWO_BYTE_STRING_TYPE", 0),
                ],
                fields: seq_string(ScalarType::U16),
                shape: Shape::sequence("length", "chars", ScalarType::U16, true),
            },
            KindEntry {
                kind: BoundKind::ConsString,
                type_name: ty("ConsString"),
                instance_types: vec![
                    one("CONS_TWO_BYTE_STRING_TYPE", 33),
                    one("CONS_ONE_BYTE_STRING_TYPE", 41),
                ],
                fields: cons_string,
                shape: Shape::Fixed,
            },
            KindEntry {
                kind: BoundKind::HeapNumber,
                type_name: ty("HeapNumber"),
                instance_types: vec![one("HEAP_NUMBER_TYPE", 130)],
                fields: heap_number,
                shape: Shape::Fixed,
            },
            KindEntry {
                kind: BoundKind::Oddball,
                type_name: ty("Oddball"),
                instance_types: vec![one("ODDBALL_TYPE", 131)],
                fields: oddball,
                shape: Shape::Fixed,
            },
            KindEntry {
                kind: BoundKind::NameDictionary,
                type_name: ty("NameDictionary"),
                instance_types: vec![one("NAME_DICTIONARY_TYPE", 165)],
                fields: name_dictionary,
                shape: words(),
            },
        ];

        Self {
            namespace: namespace.to_string(),
            kinds,
        }
    }

    /// Qualified name of the enumeration holding instance-type values.
    pub fn instance_type_enum(&self) -> String {
        format!("{}::InstanceType", self.namespace)
    }

    pub fn entry(&self, kind: BoundKind) -> Option<&KindEntry> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn every_kind_but_opaque_has_one_entry() {
        let c = Catalog::v8("v8::internal");
        let kinds: HashSet<_> = c.kinds.iter().map(|k| k.kind).collect();
        assert_eq!(kinds.len(), c.kinds.len());
        assert!(!kinds.contains(&BoundKind::Opaque));
        assert!(c.entry(BoundKind::Map).is_some());
        assert_eq!(c.instance_type_enum(), "v8::internal::InstanceType");
    }

    #[test]
    fn type_names_are_distinct() {
        // Layouts are cached by type name, so two kinds can't share one.
        let c = Catalog::v8("ns");
        let names: HashSet<_> = c.kinds.iter().map(|k| &k.type_name).collect();
        assert_eq!(names.len(), c.kinds.len());
        assert!(names.contains(&"ns::Map".to_string()));
    }

    #[test]
    fn sequence_shapes_name_real_fields() {
        let c = Catalog::v8("v8::internal");
        for k in &c.kinds {
            if let Shape::Sequence {
                length, elements, ..
            } = &k.shape
            {
                assert!(k.fields.iter().any(|f| &f.name == length), "{:?}", k.kind);
                assert!(k.fields.iter().any(|f| &f.name == elements), "{:?}", k.kind);
            }
        }
    }
}
