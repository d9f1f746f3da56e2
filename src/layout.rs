//! Declarative object layouts, resolved against debug info.
//!
//! A layout is written as an ordered list of `FieldSpec`s naming each field
//! and what it holds. `LayoutResolver::compile` turns that into a
//! `ResolvedLayout` by asking the image for each field's offset constant,
//! falling back to chaining from the previous field's end when there isn't
//! one. Fields whose position depends on the instance (anything after a
//! runtime-length array, say) are placed relative to their predecessor and
//! located at evaluation time.

use crate::load::{displace, Memory};
use crate::value::{TagScheme, TaggedValue};
use crate::{DebugInfoImage, LayoutError, MissingDebugInfo, ObjectError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

/// Storage types for plain fields.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScalarType {
    U8,
    U16,
    U32,
    U64,
    I32,
    I64,
    F64,
    /// A full tagged word; see `value::TagScheme`.
    Tagged,
}

impl ScalarType {
    pub fn size(self, word_size: u64) -> u64 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
            Self::Tagged => word_size,
        }
    }

    fn signed(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }

    fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F64 => "f64",
            Self::Tagged => "tagged",
        }
    }
}

/// Where a bitfield's low bit sits within its storage field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BitPosition {
    /// At a fixed shift.
    Explicit(u32),
    /// Immediately after the previous bitfield sharing the same storage, or
    /// at bit 0 for the first.
    Next,
    /// Immediately after the named sibling bitfield.
    After(String),
}

/// Element count of an array field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Length {
    Literal(u64),
    /// Read from an earlier sibling field of the same instance.
    Field(String),
}

/// Predicate deciding whether an optional field is present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Presence {
    /// The named earlier sibling is nonzero.
    Field(String),
    /// A single bit of the named earlier sibling is set.
    Bit { field: String, bit: u32 },
    Not(Box<Presence>),
}

/// What a field holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    /// A compile-time constant; occupies no memory.
    Const,
    /// A bit range inside an earlier scalar sibling; occupies no memory of its
    /// own.
    Bitfield {
        storage: String,
        bits: u32,
        position: BitPosition,
    },
    /// An embedded native object, sized by its debug info type.
    Object { type_name: String },
    Array { element: ScalarType, length: Length },
    /// `size` bytes if `presence` holds for the instance, else nothing.
    Variable { size: u64, presence: Presence },
    /// A nested field list without its own debug info type.
    Inline(Vec<FieldSpec>),
}

/// One field of a layout, as declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Offset that overrides everything else.
    pub offset: Option<u64>,
    /// Further names to try against the debug info, in order.
    pub aliases: Vec<String>,
    /// Expected offset (or, for constants, value) when the debug info has
    /// nothing to say.
    pub default: Option<u64>,
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            offset: None,
            aliases: vec![],
            default: None,
        }
    }

    pub fn scalar(name: &str, ty: ScalarType) -> Self {
        Self::new(name, FieldKind::Scalar(ty))
    }

    pub fn tagged(name: &str) -> Self {
        Self::scalar(name, ScalarType::Tagged)
    }

    pub fn constant(name: &str) -> Self {
        Self::new(name, FieldKind::Const)
    }

    pub fn bitfield(name: &str, storage: &str, bits: u32) -> Self {
        Self::new(
            name,
            FieldKind::Bitfield {
                storage: storage.to_string(),
                bits,
                position: BitPosition::Next,
            },
        )
    }

    pub fn object(name: &str, type_name: &str) -> Self {
        Self::new(
            name,
            FieldKind::Object {
                type_name: type_name.to_string(),
            },
        )
    }

    pub fn array(name: &str, element: ScalarType, length: Length) -> Self {
        Self::new(name, FieldKind::Array { element, length })
    }

    pub fn variable(name: &str, size: u64, presence: Presence) -> Self {
        Self::new(name, FieldKind::Variable { size, presence })
    }

    pub fn inline(name: &str, fields: Vec<FieldSpec>) -> Self {
        Self::new(name, FieldKind::Inline(fields))
    }

    pub fn at(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn or_default(mut self, value: u64) -> Self {
        self.default = Some(value);
        self
    }

    /// Sets the bit position of a bitfield. Has no effect on other kinds.
    pub fn bits_at(mut self, position: BitPosition) -> Self {
        if let FieldKind::Bitfield { position: p, .. } = &mut self.kind {
            *p = position;
        }
        self
    }
}

/// What to do when debug info lacks something a layout has a default for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPolicy {
    /// Use the default and log it.
    UseDefault,
    /// Fail the layout.
    Fatal,
}

/// A concrete object a layout is evaluated against.
#[derive(Copy, Clone)]
pub struct Instance<'a> {
    pub memory: &'a dyn Memory,
    pub base: u64,
    pub scheme: TagScheme,
}

impl<'a> Instance<'a> {
    pub fn new(memory: &'a dyn Memory, base: u64, scheme: TagScheme) -> Self {
        Self {
            memory,
            base,
            scheme,
        }
    }

    fn rebased(self, base: u64) -> Self {
        Self { base, ..self }
    }
}

#[derive(Clone, Debug)]
enum Placement {
    Fixed(u64),
    /// Right after the end of field `.0`.
    After(usize),
    /// Not in memory: constants and bitfields.
    Detached,
}

#[derive(Clone, Debug)]
enum LengthRule {
    Literal(u64),
    Field(usize),
}

#[derive(Clone, Debug)]
enum PresenceRule {
    Field(usize),
    Bit { field: usize, bit: u32 },
    Not(Box<PresenceRule>),
}

#[derive(Clone, Debug)]
enum Resolved {
    Scalar(ScalarType),
    Const(Option<i64>),
    Bits { storage: usize, shift: u32, bits: u32 },
    Object { size: u64 },
    Array { element: ScalarType, length: LengthRule },
    Variable { size: u64, presence: PresenceRule },
    Inline(Rc<ResolvedLayout>),
}

/// One field after resolution.
#[derive(Clone, Debug)]
pub struct ResolvedField {
    pub name: String,
    placement: Placement,
    kind: Resolved,
}

impl ResolvedField {
    /// True for fields that hold a tagged word, or an array of them.
    pub fn is_tagged(&self) -> bool {
        matches!(
            self.kind,
            Resolved::Scalar(ScalarType::Tagged)
                | Resolved::Array {
                    element: ScalarType::Tagged,
                    ..
                }
        )
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, Resolved::Array { .. })
    }
}

/// A compiled layout: fields with their placement and size rules.
///
/// Immutable once built.
#[derive(Debug)]
pub struct ResolvedLayout {
    name: String,
    word_size: u64,
    fields: Vec<ResolvedField>,
    specs: Vec<FieldSpec>,
}

impl ResolvedLayout {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = &ResolvedField> + '_ {
        self.fields.iter()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    fn index_of(&self, name: &str) -> Result<usize, LayoutError> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| LayoutError::UnknownField {
                layout: self.name.clone(),
                field: name.to_string(),
            })
    }

    /// Finds a field by dotted path, descending into inline fields.
    fn locate<'a>(
        &self,
        path: &str,
        inst: Instance<'a>,
    ) -> Result<(&ResolvedLayout, usize, Instance<'a>), LayoutError> {
        match path.split_once('.') {
            None => Ok((self, self.index_of(path)?, inst)),
            Some((head, rest)) => {
                let i = self.index_of(head)?;
                match &self.fields[i].kind {
                    Resolved::Inline(nested) => {
                        let base = displace(inst.base, self.offset_at(i, inst)?)?;
                        nested.locate(rest, inst.rebased(base))
                    }
                    _ => Err(self.wrong_kind(i, "inline struct")),
                }
            }
        }
    }

    fn wrong_kind(&self, i: usize, wanted: &'static str) -> LayoutError {
        LayoutError::WrongKind {
            layout: self.name.clone(),
            field: self.fields[i].name.clone(),
            wanted,
        }
    }

    /// The field's offset when it doesn't depend on the instance.
    pub fn static_offset(&self, name: &str) -> Option<u64> {
        let i = self.index_of(name).ok()?;
        self.static_offset_at(i)
    }

    fn static_offset_at(&self, i: usize) -> Option<u64> {
        match &self.fields[i].placement {
            Placement::Fixed(o) => Some(*o),
            Placement::After(p) => {
                self.static_offset_at(*p)?.checked_add(self.static_size_at(*p)?)
            }
            Placement::Detached => match self.fields[i].kind {
                Resolved::Bits { storage, .. } => self.static_offset_at(storage),
                _ => None,
            },
        }
    }

    fn static_size_at(&self, i: usize) -> Option<u64> {
        static_size(&self.fields[i].kind, self.word_size)
    }

    fn offset_at(&self, i: usize, inst: Instance<'_>) -> Result<u64, LayoutError> {
        match &self.fields[i].placement {
            Placement::Fixed(o) => Ok(*o),
            Placement::After(p) => self.end_at(*p, inst),
            Placement::Detached => match self.fields[i].kind {
                Resolved::Bits { storage, .. } => self.offset_at(storage, inst),
                _ => Ok(0),
            },
        }
    }

    fn size_at(&self, i: usize, inst: Instance<'_>) -> Result<u64, LayoutError> {
        Ok(match &self.fields[i].kind {
            Resolved::Scalar(t) => t.size(self.word_size),
            Resolved::Const(_) | Resolved::Bits { .. } => 0,
            Resolved::Object { size } => *size,
            Resolved::Array { element, length } => {
                let n = self.length_of(length, inst)?;
                n.saturating_mul(element.size(self.word_size))
            }
            Resolved::Variable { size, presence } => {
                if self.eval_presence(presence, inst)? {
                    *size
                } else {
                    0
                }
            }
            Resolved::Inline(nested) => {
                let base = displace(inst.base, self.offset_at(i, inst)?)?;
                nested.end(inst.rebased(base))?
            }
        })
    }

    fn end_at(&self, i: usize, inst: Instance<'_>) -> Result<u64, LayoutError> {
        let offset = self.offset_at(i, inst)?;
        let size = self.size_at(i, inst)?;
        offset.checked_add(size).ok_or_else(|| {
            ObjectError::CorruptObject {
                addr: inst.base,
                reason: format!("{} ends past {:#x} + {:#x}", self.fields[i].name, offset, size),
            }
            .into()
        })
    }

    fn length_of(&self, rule: &LengthRule, inst: Instance<'_>) -> Result<u64, LayoutError> {
        match rule {
            LengthRule::Literal(n) => Ok(*n),
            LengthRule::Field(f) => {
                let v = self.read_int_at(*f, inst)?;
                u64::try_from(v).map_err(|_| {
                    ObjectError::CorruptObject {
                        addr: inst.base,
                        reason: format!("negative length {} in {}", v, self.fields[*f].name),
                    }
                    .into()
                })
            }
        }
    }

    fn eval_presence(&self, rule: &PresenceRule, inst: Instance<'_>) -> Result<bool, LayoutError> {
        Ok(match rule {
            PresenceRule::Field(f) => self.read_int_at(*f, inst)? != 0,
            PresenceRule::Bit { field, bit } => {
                (self.read_int_at(*field, inst)? >> bit) & 1 != 0
            }
            PresenceRule::Not(inner) => !self.eval_presence(inner, inst)?,
        })
    }

    /// Reads a scalar or bitfield as an integer. Tagged fields must hold an
    /// immediate.
    fn read_int_at(&self, i: usize, inst: Instance<'_>) -> Result<i64, LayoutError> {
        match self.fields[i].kind {
            Resolved::Scalar(ScalarType::Tagged) => {
                let word = self.read_raw_at(i, inst)?;
                match inst.scheme.classify(word) {
                    TaggedValue::Immediate(v) => Ok(v),
                    _ => Err(ObjectError::CorruptObject {
                        addr: inst.base,
                        reason: format!("{} is not an immediate", self.fields[i].name),
                    }
                    .into()),
                }
            }
            Resolved::Scalar(ScalarType::F64) => Err(self.wrong_kind(i, "integer")),
            Resolved::Scalar(_) => Ok(self.read_raw_at(i, inst)? as i64),
            Resolved::Bits {
                storage,
                shift,
                bits,
            } => {
                let v = self.read_int_at(storage, inst)? as u64;
                let mask = if bits >= 64 { u64::MAX } else { (1 << bits) - 1 };
                Ok(((v >> shift) & mask) as i64)
            }
            _ => Err(self.wrong_kind(i, "integer")),
        }
    }

    fn read_raw_at(&self, i: usize, inst: Instance<'_>) -> Result<u64, LayoutError> {
        let Resolved::Scalar(t) = self.fields[i].kind else {
            return Err(self.wrong_kind(i, "scalar"));
        };
        let addr = displace(inst.base, self.offset_at(i, inst)?)?;
        Ok(inst
            .memory
            .read_word(addr, t.size(self.word_size), t.signed())?)
    }

    /// Offset of the field from the start of the instance.
    pub fn offset_of(&self, path: &str, inst: Instance<'_>) -> Result<u64, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        Ok(displace(sub.base, l.offset_at(i, sub)?)? - inst.base)
    }

    /// Offset just past the end of the field.
    pub fn end_of(&self, path: &str, inst: Instance<'_>) -> Result<u64, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        Ok(displace(sub.base, l.end_at(i, sub)?)? - inst.base)
    }

    pub fn size_of(&self, path: &str, inst: Instance<'_>) -> Result<u64, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        l.size_at(i, sub)
    }

    /// End of the last field that occupies memory.
    pub fn end(&self, inst: Instance<'_>) -> Result<u64, LayoutError> {
        let mut end = 0;
        for i in 0..self.fields.len() {
            if !matches!(self.fields[i].placement, Placement::Detached) {
                end = end.max(self.end_at(i, inst)?);
            }
        }
        Ok(end)
    }

    /// Reads a scalar field's raw bits, zero- or sign-extended.
    pub fn read_raw(&self, path: &str, inst: Instance<'_>) -> Result<u64, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        l.read_raw_at(i, sub)
    }

    /// Reads an integer field; see `read_int_at`.
    pub fn read_int(&self, path: &str, inst: Instance<'_>) -> Result<i64, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        l.read_int_at(i, sub)
    }

    pub fn read_f64(&self, path: &str, inst: Instance<'_>) -> Result<f64, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        match l.fields[i].kind {
            Resolved::Scalar(ScalarType::F64) => Ok(f64::from_bits(l.read_raw_at(i, sub)?)),
            _ => Err(l.wrong_kind(i, "f64")),
        }
    }

    pub fn read_tagged(&self, path: &str, inst: Instance<'_>) -> Result<TaggedValue, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        match l.fields[i].kind {
            Resolved::Scalar(ScalarType::Tagged) => {
                Ok(sub.scheme.classify(l.read_raw_at(i, sub)?))
            }
            _ => Err(l.wrong_kind(i, "tagged")),
        }
    }

    /// Value of a constant field.
    pub fn const_value(&self, name: &str) -> Result<i64, LayoutError> {
        let i = self.index_of(name)?;
        match self.fields[i].kind {
            Resolved::Const(Some(v)) => Ok(v),
            Resolved::Const(None) => Err(MissingDebugInfo(format!(
                "constant {} of {}",
                name, self.name
            ))
            .into()),
            _ => Err(self.wrong_kind(i, "constant")),
        }
    }

    pub fn is_present(&self, path: &str, inst: Instance<'_>) -> Result<bool, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        match &l.fields[i].kind {
            Resolved::Variable { presence, .. } => l.eval_presence(presence, sub),
            _ => Ok(true),
        }
    }

    pub fn array_length(&self, path: &str, inst: Instance<'_>) -> Result<u64, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        match &l.fields[i].kind {
            Resolved::Array { length, .. } => l.length_of(length, sub),
            _ => Err(l.wrong_kind(i, "array")),
        }
    }

    /// Offset of element `index` of an array field, bounds checked.
    pub fn element_offset(
        &self,
        path: &str,
        index: u64,
        inst: Instance<'_>,
    ) -> Result<u64, LayoutError> {
        let (l, i, sub) = self.locate(path, inst)?;
        let Resolved::Array { element, length } = &l.fields[i].kind else {
            return Err(l.wrong_kind(i, "array"));
        };
        let n = l.length_of(length, sub)?;
        if index >= n {
            return Err(LayoutError::OutOfBounds {
                field: path.to_string(),
                index,
                length: n,
            });
        }
        let base = displace(sub.base, l.offset_at(i, sub)?)? - inst.base;
        index
            .checked_mul(element.size(l.word_size))
            .and_then(|o| o.checked_add(base))
            .ok_or_else(|| {
                ObjectError::CorruptObject {
                    addr: inst.base,
                    reason: format!("element {} of {} is out of reach", index, path),
                }
                .into()
            })
    }

    /// Reads element `index` of an array of scalars.
    pub fn read_element(
        &self,
        path: &str,
        index: u64,
        inst: Instance<'_>,
    ) -> Result<u64, LayoutError> {
        let off = self.element_offset(path, index, inst)?;
        let (l, i, _) = self.locate(path, inst)?;
        let Resolved::Array { element, .. } = l.fields[i].kind else {
            return Err(l.wrong_kind(i, "array"));
        };
        Ok(inst.memory.read_word(
            displace(inst.base, off)?,
            element.size(self.word_size),
            element.signed(),
        )?)
    }

    pub fn read_tagged_element(
        &self,
        path: &str,
        index: u64,
        inst: Instance<'_>,
    ) -> Result<TaggedValue, LayoutError> {
        Ok(inst.scheme.classify(self.read_element(path, index, inst)?))
    }

    /// Renders the layout as a table, one field per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}:", self.name);
        self.describe_into(&mut out, 1);
        out
    }

    fn describe_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        for (i, f) in self.fields.iter().enumerate() {
            let place = match (&f.placement, self.static_offset_at(i)) {
                (Placement::Detached, _) => "-".to_string(),
                (_, Some(o)) => format!("{:#06x}", o),
                (Placement::After(p), None) => format!("after {}", self.fields[*p].name),
                (_, None) => "?".to_string(),
            };
            let size = self
                .static_size_at(i)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "var".to_string());
            let what = match &f.kind {
                Resolved::Scalar(t) => t.name().to_string(),
                Resolved::Const(Some(v)) => format!("const = {}", v),
                Resolved::Const(None) => "const (missing)".to_string(),
                Resolved::Bits { storage, shift, bits } => format!(
                    "bits {}..{} of {}",
                    shift,
                    shift + bits,
                    self.fields[*storage].name
                ),
                Resolved::Object { .. } => "object".to_string(),
                Resolved::Array { element, .. } => format!("{}[]", element.name()),
                Resolved::Variable { .. } => "optional".to_string(),
                Resolved::Inline(_) => "inline".to_string(),
            };
            let _ = writeln!(out, "{}{:<12} {:<32} {:<20} {}", indent, place, f.name, what, size);
            if let Resolved::Inline(nested) = &f.kind {
                nested.describe_into(out, depth + 1);
            }
        }
    }
}

fn static_size(kind: &Resolved, word_size: u64) -> Option<u64> {
    match kind {
        Resolved::Scalar(t) => Some(t.size(word_size)),
        Resolved::Const(_) | Resolved::Bits { .. } => Some(0),
        Resolved::Object { size } => Some(*size),
        Resolved::Array {
            element,
            length: LengthRule::Literal(n),
        } => n.checked_mul(element.size(word_size)),
        Resolved::Array { .. } | Resolved::Variable { .. } => None,
        Resolved::Inline(nested) => nested.static_end(),
    }
}

impl ResolvedLayout {
    fn static_end(&self) -> Option<u64> {
        let mut end = 0;
        for i in 0..self.fields.len() {
            if !matches!(self.fields[i].placement, Placement::Detached) {
                end = end.max(self.static_offset_at(i)?.checked_add(self.static_size_at(i)?)?);
            }
        }
        Some(end)
    }
}

/// How a constant name found for a field translates into an offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ConstSuffix {
    Offset,
    OffsetEnd,
    Index,
    Plain,
    End,
}

const SUFFIXES: [(ConstSuffix, &str); 5] = [
    (ConstSuffix::Offset, "Offset"),
    (ConstSuffix::OffsetEnd, "OffsetEnd"),
    (ConstSuffix::Index, "Index"),
    (ConstSuffix::Plain, ""),
    (ConstSuffix::End, "End"),
];

/// `instance_type` and `instanceType` both become `InstanceType`.
fn camel(name: &str) -> String {
    name.split(|c| c == '_' || c == '-')
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect()
}

fn is_k_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('k') && chars.next().map_or(false, |c| c.is_ascii_uppercase())
}

fn suffix_of(literal: &str) -> ConstSuffix {
    if literal.ends_with("OffsetEnd") {
        ConstSuffix::OffsetEnd
    } else if literal.ends_with("Offset") {
        ConstSuffix::Offset
    } else if literal.ends_with("Index") {
        ConstSuffix::Index
    } else if literal.ends_with("End") {
        ConstSuffix::End
    } else {
        ConstSuffix::Plain
    }
}

/// Every constant name tried for a field, in precedence order.
pub(crate) fn candidate_names(name: &str, aliases: &[String]) -> Vec<(String, ConstSuffix)> {
    let mut out: Vec<(String, ConstSuffix)> = vec![];
    let mut push = |n: String, s: ConstSuffix| {
        if !out.iter().any(|(m, _)| *m == n) {
            out.push((n, s));
        }
    };
    let stem = |base: &str, push: &mut dyn FnMut(String, ConstSuffix)| {
        for (s, text) in SUFFIXES {
            push(format!("k{}{}", base, text), s);
        }
    };

    stem(&camel(name), &mut push);
    for a in aliases {
        if is_k_name(a) {
            push(a.clone(), suffix_of(a));
            stem(&a[1..], &mut push);
        } else {
            stem(&camel(a), &mut push);
        }
    }
    out
}

/// Compiles and caches layouts for one image.
///
/// Layouts are cached by name for the life of the resolver. Compiling the
/// same name twice returns the first result; the field lists must agree.
pub struct LayoutResolver<'img> {
    image: &'img DebugInfoImage,
    word_size: u64,
    policy: MissingPolicy,
    cache: RefCell<HashMap<String, Rc<ResolvedLayout>>>,
}

/// Per-compile lookup context.
struct Ctx<'a> {
    /// Type to resolve constants against; `None` when it's absent or the
    /// fields are an inline group.
    lookup: Option<&'a str>,
    policy: MissingPolicy,
    /// Offset of element 0 for `...Index` constants.
    index_base: u64,
}

impl<'img> LayoutResolver<'img> {
    pub fn new(image: &'img DebugInfoImage, policy: MissingPolicy) -> Self {
        Self {
            image,
            word_size: image.pointer_size(),
            policy,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn image(&self) -> &'img DebugInfoImage {
        self.image
    }

    pub fn word_size(&self) -> u64 {
        self.word_size
    }

    /// Returns a previously compiled layout.
    pub fn get(&self, type_name: &str) -> Option<Rc<ResolvedLayout>> {
        self.cache.borrow().get(type_name).cloned()
    }

    /// Compiles `fields` against `type_name` under the resolver's policy.
    pub fn compile(
        &self,
        type_name: &str,
        fields: &[FieldSpec],
    ) -> Result<Rc<ResolvedLayout>, LayoutError> {
        self.compile_with_policy(type_name, fields, self.policy)
    }

    /// Compiles `fields`, substituting defaults for anything the debug info
    /// lacks regardless of the resolver's policy.
    pub fn compile_with_defaults(
        &self,
        type_name: &str,
        fields: &[FieldSpec],
    ) -> Result<Rc<ResolvedLayout>, LayoutError> {
        self.compile_with_policy(type_name, fields, MissingPolicy::UseDefault)
    }

    fn compile_with_policy(
        &self,
        type_name: &str,
        fields: &[FieldSpec],
        policy: MissingPolicy,
    ) -> Result<Rc<ResolvedLayout>, LayoutError> {
        if let Some(l) = self.cache.borrow().get(type_name) {
            debug_assert!(
                l.specs == fields,
                "layout {} compiled twice with different fields",
                type_name
            );
            return Ok(l.clone());
        }

        let lookup = match self.image.find_type(type_name) {
            Ok(_) => Some(type_name),
            Err(e) => match policy {
                MissingPolicy::Fatal => return Err(e.into()),
                MissingPolicy::UseDefault => {
                    tracing::warn!(layout = type_name, "type not in debug info; using defaults");
                    None
                }
            },
        };
        let index_base = lookup
            .and_then(|t| self.image.read_const(&format!("'{}'::kHeaderSize", t)).ok())
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(0);
        let ctx = Ctx {
            lookup,
            policy,
            index_base,
        };

        let layout = Rc::new(self.compile_fields(&ctx, type_name, fields)?);
        tracing::debug!(layout = type_name, fields = layout.fields.len(), "layout compiled");
        self.cache
            .borrow_mut()
            .insert(type_name.to_string(), layout.clone());
        Ok(layout)
    }

    fn compile_fields(
        &self,
        ctx: &Ctx<'_>,
        layout: &str,
        specs: &[FieldSpec],
    ) -> Result<ResolvedLayout, LayoutError> {
        let mut fields: Vec<ResolvedField> = Vec::with_capacity(specs.len());
        let mut last_in_memory: Option<usize> = None;

        for spec in specs {
            let sibling = |name: &str| {
                fields
                    .iter()
                    .position(|f| f.name == name)
                    .ok_or_else(|| LayoutError::UnknownField {
                        layout: layout.to_string(),
                        field: name.to_string(),
                    })
            };

            let kind = match &spec.kind {
                FieldKind::Scalar(t) => Resolved::Scalar(*t),
                FieldKind::Const => Resolved::Const(self.resolve_const(ctx, spec)?),
                FieldKind::Bitfield {
                    storage,
                    bits,
                    position,
                } => {
                    let s = sibling(storage)?;
                    if !matches!(fields[s].kind, Resolved::Scalar(_)) {
                        return Err(LayoutError::WrongKind {
                            layout: layout.to_string(),
                            field: storage.clone(),
                            wanted: "bitfield storage",
                        });
                    }
                    let shift = match position {
                        BitPosition::Explicit(n) => *n,
                        BitPosition::Next => fields
                            .iter()
                            .rev()
                            .find_map(|f| match f.kind {
                                Resolved::Bits {
                                    storage,
                                    shift,
                                    bits,
                                } if storage == s => Some(shift + bits),
                                _ => None,
                            })
                            .unwrap_or(0),
                        BitPosition::After(name) => match fields[sibling(name)?].kind {
                            Resolved::Bits { shift, bits, .. } => shift + bits,
                            _ => {
                                return Err(LayoutError::WrongKind {
                                    layout: layout.to_string(),
                                    field: name.clone(),
                                    wanted: "bitfield",
                                })
                            }
                        },
                    };
                    Resolved::Bits {
                        storage: s,
                        shift,
                        bits: *bits,
                    }
                }
                FieldKind::Object { type_name } => {
                    let size = match self.image.type_size(type_name) {
                        Ok(s) => s,
                        Err(_) => {
                            tracing::debug!(
                                layout,
                                field = %spec.name,
                                ty = %type_name,
                                "embedded type has no size; field is empty",
                            );
                            0
                        }
                    };
                    Resolved::Object { size }
                }
                FieldKind::Array { element, length } => Resolved::Array {
                    element: *element,
                    length: match length {
                        Length::Literal(n) => LengthRule::Literal(*n),
                        Length::Field(name) => LengthRule::Field(sibling(name)?),
                    },
                },
                FieldKind::Variable { size, presence } => Resolved::Variable {
                    size: *size,
                    presence: resolve_presence(presence, &sibling)?,
                },
                FieldKind::Inline(nested) => {
                    let inner = Ctx {
                        lookup: None,
                        policy: ctx.policy,
                        index_base: 0,
                    };
                    let name = format!("{}.{}", layout, spec.name);
                    Resolved::Inline(Rc::new(self.compile_fields(&inner, &name, nested)?))
                }
            };

            let placement = match kind {
                Resolved::Const(_) | Resolved::Bits { .. } => Placement::Detached,
                _ => {
                    let size = static_size(&kind, self.word_size);
                    let p = self.place(ctx, layout, spec, size, last_in_memory)?;
                    last_in_memory = Some(fields.len());
                    p
                }
            };

            fields.push(ResolvedField {
                name: spec.name.clone(),
                placement,
                kind,
            });
        }

        Ok(ResolvedLayout {
            name: layout.to_string(),
            word_size: self.word_size,
            fields,
            specs: specs.to_vec(),
        })
    }

    fn place(
        &self,
        ctx: &Ctx<'_>,
        layout: &str,
        spec: &FieldSpec,
        size: Option<u64>,
        previous: Option<usize>,
    ) -> Result<Placement, LayoutError> {
        if let Some(o) = spec.offset {
            return Ok(Placement::Fixed(o));
        }

        if let Some(o) = self.resolve_offset(ctx, spec, size) {
            if let Some(d) = spec.default {
                if d != o {
                    tracing::warn!(
                        layout,
                        field = %spec.name,
                        default = d,
                        resolved = o,
                        "debug info disagrees with default offset",
                    );
                }
            }
            return Ok(Placement::Fixed(o));
        }

        if let Some(d) = spec.default {
            return match ctx.policy {
                MissingPolicy::UseDefault => {
                    tracing::warn!(
                        layout,
                        field = %spec.name,
                        default = d,
                        "no offset in debug info; using default",
                    );
                    Ok(Placement::Fixed(d))
                }
                MissingPolicy::Fatal => {
                    Err(MissingDebugInfo(format!("offset of {}::{}", layout, spec.name)).into())
                }
            };
        }

        Ok(match previous {
            Some(p) => Placement::After(p),
            None => Placement::Fixed(0),
        })
    }

    /// Tries every candidate constant in order. The first usable hit wins; if
    /// a later one would place the field differently, that's logged.
    fn resolve_offset(&self, ctx: &Ctx<'_>, spec: &FieldSpec, size: Option<u64>) -> Option<u64> {
        let ty = ctx.lookup?;
        let mut hits: Vec<(String, u64)> = vec![];
        for (name, suffix) in candidate_names(&spec.name, &spec.aliases) {
            let Ok(v) = self.image.read_const(&format!("'{}'::{}", ty, name)) else {
                continue;
            };
            let offset = match suffix {
                ConstSuffix::Offset | ConstSuffix::Plain => u64::try_from(v).ok(),
                ConstSuffix::OffsetEnd | ConstSuffix::End => size
                    .filter(|&s| s > 0)
                    .and_then(|s| u64::try_from(v).ok()?.checked_add(1)?.checked_sub(s)),
                ConstSuffix::Index => u64::try_from(v)
                    .ok()
                    .and_then(|i| i.checked_mul(self.word_size)?.checked_add(ctx.index_base)),
            };
            if let Some(o) = offset {
                hits.push((name, o));
            }
        }

        let (chosen, offset) = hits.first()?.clone();
        if let Some((other, o)) = hits.iter().find(|(_, o)| *o != offset) {
            tracing::warn!(
                layout = ty,
                field = %spec.name,
                chosen = %chosen,
                offset,
                other = %other,
                other_offset = o,
                "several constants match field; using the first",
            );
        } else {
            tracing::debug!(layout = ty, field = %spec.name, constant = %chosen, offset);
        }
        Some(offset)
    }

    fn resolve_const(&self, ctx: &Ctx<'_>, spec: &FieldSpec) -> Result<Option<i64>, LayoutError> {
        let found = ctx.lookup.and_then(|ty| {
            candidate_names(&spec.name, &spec.aliases)
                .into_iter()
                .find_map(|(name, _)| self.image.read_const(&format!("'{}'::{}", ty, name)).ok())
        });
        match (found, spec.default) {
            (Some(v), Some(d)) => {
                if i64::try_from(d).ok() != Some(v) {
                    tracing::warn!(
                        field = %spec.name,
                        default = d,
                        resolved = v,
                        "debug info disagrees with default constant",
                    );
                }
                Ok(Some(v))
            }
            (Some(v), None) => Ok(Some(v)),
            (None, Some(d)) => match ctx.policy {
                MissingPolicy::UseDefault => Ok(i64::try_from(d).ok()),
                MissingPolicy::Fatal => {
                    Err(MissingDebugInfo(format!("constant {}", spec.name)).into())
                }
            },
            (None, None) => Ok(None),
        }
    }
}

fn resolve_presence(
    p: &Presence,
    sibling: &dyn Fn(&str) -> Result<usize, LayoutError>,
) -> Result<PresenceRule, LayoutError> {
    Ok(match p {
        Presence::Field(f) => PresenceRule::Field(sibling(f)?),
        Presence::Bit { field, bit } => PresenceRule::Bit {
            field: sibling(field)?,
            bit: *bit,
        },
        Presence::Not(inner) => PresenceRule::Not(Box::new(resolve_presence(inner, sibling)?)),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::load::FlatImage;
    use crate::test_dwarf::sample_image;

    const NS: &str = "v8::internal::";

    fn scheme() -> TagScheme {
        TagScheme::for_word_size(8)
    }

    fn words(ws: &[u64]) -> Vec<u8> {
        ws.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn map_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::tagged("map"),
            FieldSpec::scalar("instance_size_in_words", ScalarType::U8),
            FieldSpec::scalar("instance_type", ScalarType::U16).or_default(12),
            FieldSpec::scalar("bit_field", ScalarType::U8),
            FieldSpec::bitfield("has_non_instance_prototype", "bit_field", 1),
            FieldSpec::bitfield("is_callable", "bit_field", 1),
            FieldSpec::bitfield("is_undetectable", "bit_field", 1)
                .bits_at(BitPosition::Explicit(4)),
            FieldSpec::bitfield("after_undetectable", "bit_field", 2)
                .bits_at(BitPosition::After("is_undetectable".to_string())),
            FieldSpec::tagged("prototype"),
            FieldSpec::constant("size"),
        ]
    }

    #[test]
    fn name_precedence() {
        let names: Vec<_> = candidate_names("instance_type", &["kKind".to_string(), "type".to_string()])
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(
            names,
            [
                "kInstanceTypeOffset",
                "kInstanceTypeOffsetEnd",
                "kInstanceTypeIndex",
                "kInstanceType",
                "kInstanceTypeEnd",
                "kKind",
                "kKindOffset",
                "kKindOffsetEnd",
                "kKindIndex",
                "kKindEnd",
                "kTypeOffset",
                "kTypeOffsetEnd",
                "kTypeIndex",
                "kType",
                "kTypeEnd",
            ],
        );
    }

    #[test]
    fn map_offsets_from_debug_info() {
        let img = sample_image();
        let r = LayoutResolver::new(&img, MissingPolicy::Fatal);
        let l = r.compile(&format!("{}Map", NS), &map_fields()).unwrap();

        assert_eq!(l.static_offset("map"), Some(0));
        assert_eq!(l.static_offset("instance_size_in_words"), Some(8));
        assert_eq!(l.static_offset("instance_type"), Some(12));
        assert_eq!(l.static_offset("bit_field"), Some(14));
        assert_eq!(l.static_offset("prototype"), Some(24));
        assert_eq!(l.const_value("size"), Ok(80));

        let mut mem = FlatImage::new(gimli::RunTimeEndian::Little);
        let mut bytes = vec![0u8; 32];
        bytes[8] = 4;
        bytes[12..14].copy_from_slice(&140u16.to_le_bytes());
        bytes[14] = 0b0111_0010;
        bytes[24..32].copy_from_slice(&0x5001u64.to_le_bytes());
        mem.add_region(0x1000, bytes);
        let inst = Instance::new(&mem, 0x1000, scheme());

        assert_eq!(l.read_int("instance_type", inst), Ok(140));
        assert_eq!(l.read_int("has_non_instance_prototype", inst), Ok(0));
        assert_eq!(l.read_int("is_callable", inst), Ok(1));
        assert_eq!(l.read_int("is_undetectable", inst), Ok(1));
        assert_eq!(l.read_int("after_undetectable", inst), Ok(0b11));
        assert_eq!(l.read_tagged("prototype", inst), Ok(TaggedValue::StrongRef(0x5000)));
        assert!(l.read_tagged("instance_type", inst).is_err());
    }

    #[test]
    fn compile_is_memoized() {
        let img = sample_image();
        let r = LayoutResolver::new(&img, MissingPolicy::Fatal);
        let name = format!("{}Map", NS);
        let a = r.compile(&name, &map_fields()).unwrap();
        let b = r.compile(&name, &map_fields()).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert!(r.get(&name).is_some());
    }

    fn fixed_array_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::tagged("map"),
            FieldSpec::tagged("length"),
            FieldSpec::array("objects", ScalarType::Tagged, Length::Field("length".into())),
            FieldSpec::scalar("trailer", ScalarType::U32),
        ]
    }

    #[test]
    fn runtime_length_arrays_chain() {
        let img = sample_image();
        let r = LayoutResolver::new(&img, MissingPolicy::Fatal);
        let l = r.compile(&format!("{}FixedArray", NS), &fixed_array_fields()).unwrap();
        assert_eq!(l.static_offset("length"), Some(8));
        assert_eq!(l.static_offset("objects"), Some(16));
        assert_eq!(l.static_offset("trailer"), None);

        let s = scheme();
        let mut mem = FlatImage::new(gimli::RunTimeEndian::Little);
        mem.add_region(
            0x2000,
            words(&[
                0x1001,
                s.encode(TaggedValue::Immediate(3)),
                s.encode(TaggedValue::Immediate(7)),
                0x3001,
                0x4003,
                0xffff_ffff,
            ]),
        );
        let inst = Instance::new(&mem, 0x2000, s);

        assert_eq!(l.array_length("objects", inst), Ok(3));
        assert_eq!(l.element_offset("objects", 2, inst), Ok(32));
        assert_eq!(l.offset_of("trailer", inst), Ok(40));
        assert_eq!(l.end(inst), Ok(44));
        assert_eq!(
            l.read_tagged_element("objects", 0, inst),
            Ok(TaggedValue::Immediate(7))
        );
        assert_eq!(
            l.read_tagged_element("objects", 2, inst),
            Ok(TaggedValue::WeakRef(0x4000))
        );
        assert!(matches!(
            l.element_offset("objects", 3, inst),
            Err(LayoutError::OutOfBounds { index: 3, length: 3, .. })
        ));

        let top = Instance::new(&mem, u64::MAX - 4, s);
        assert!(matches!(
            l.array_length("objects", top),
            Err(LayoutError::Object(ObjectError::CorruptObject { .. }))
        ));
        assert!(l.end(top).is_err());
    }

    #[test]
    fn index_constants_count_from_header() {
        let img = sample_image();
        let r = LayoutResolver::new(&img, MissingPolicy::Fatal);
        let l = r
            .compile(
                &format!("{}NameDictionary", NS),
                &[
                    FieldSpec::tagged("map"),
                    FieldSpec::tagged("length"),
                    FieldSpec::tagged("number_of_elements"),
                    FieldSpec::tagged("capacity"),
                    FieldSpec::constant("entry_size"),
                    FieldSpec::constant("elements_start_index"),
                ],
            )
            .unwrap();
        assert_eq!(l.static_offset("number_of_elements"), Some(16));
        assert_eq!(l.static_offset("capacity"), Some(32));
        assert_eq!(l.const_value("entry_size"), Ok(3));
        assert_eq!(l.const_value("elements_start_index"), Ok(5));
    }

    #[test]
    fn defaults_and_policies() {
        let img = sample_image();
        let fields = vec![
            FieldSpec::tagged("map"),
            FieldSpec::tagged("ghost").or_default(40),
            FieldSpec::constant("missing_limit").or_default(9),
            FieldSpec::constant("unknowable"),
        ];

        let strict = LayoutResolver::new(&img, MissingPolicy::Fatal);
        assert!(matches!(
            strict.compile(&format!("{}Map", NS), &fields),
            Err(LayoutError::Missing(_))
        ));
        assert!(matches!(
            strict.compile("v8::internal::NoSuchThing", &fields),
            Err(LayoutError::Missing(_))
        ));

        let lenient = LayoutResolver::new(&img, MissingPolicy::Fatal);
        let l = lenient.compile_with_defaults(&format!("{}Map", NS), &fields).unwrap();
        assert_eq!(l.static_offset("ghost"), Some(40));
        assert_eq!(l.const_value("missing_limit"), Ok(9));
        assert!(matches!(l.const_value("unknowable"), Err(LayoutError::Missing(_))));

        // A type with no debug info at all still compiles from defaults.
        let l = lenient
            .compile_with_defaults("v8::internal::NoSuchThing", &fields)
            .unwrap();
        assert_eq!(l.static_offset("map"), Some(0));
        assert_eq!(l.static_offset("ghost"), Some(40));
    }

    #[test]
    fn drifted_default_loses_to_debug_info() {
        let img = sample_image();
        let r = LayoutResolver::new(&img, MissingPolicy::Fatal);
        let l = r
            .compile(
                &format!("{}String", NS),
                &[
                    FieldSpec::tagged("map"),
                    FieldSpec::scalar("raw_hash_field", ScalarType::U32).or_default(4),
                    FieldSpec::scalar("length", ScalarType::I32),
                ],
            )
            .unwrap();
        assert_eq!(l.static_offset("raw_hash_field"), Some(8));
        assert_eq!(l.static_offset("length"), Some(12));
    }

    /// Log sink shared between the subscriber and the test.
    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn warnings_during(f: impl FnOnce()) -> String {
        let out = Captured::default();
        let sink = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn disagreements_are_logged() {
        let img = sample_image();
        let r = LayoutResolver::new(&img, MissingPolicy::Fatal);
        let logged = warnings_during(|| {
            r.compile(
                &format!("{}String", NS),
                &[
                    FieldSpec::tagged("map"),
                    FieldSpec::scalar("raw_hash_field", ScalarType::U32).or_default(4),
                ],
            )
            .unwrap();
        });
        assert!(logged.contains("debug info disagrees with default offset"));
        assert!(logged.contains("raw_hash_field"));
        assert!(!logged.contains("several constants"));

        // kToStringOffset is 16, the alias's kToNumberOffset is 24.
        let logged = warnings_during(|| {
            let l = r
                .compile(
                    &format!("{}Oddball", NS),
                    &[
                        FieldSpec::tagged("map"),
                        FieldSpec::tagged("to_string").alias("to_number"),
                    ],
                )
                .unwrap();
            assert_eq!(l.static_offset("to_string"), Some(16));
        });
        assert!(logged.contains("several constants match field; using the first"));
        assert!(logged.contains("kToNumberOffset"));

        // Agreeing candidates stay quiet.
        let logged = warnings_during(|| {
            r.compile(&format!("{}Map", NS), &map_fields()).unwrap();
        });
        assert!(logged.is_empty(), "{}", logged);
    }

    #[test]
    fn optional_records_and_inline_groups() {
        let img = sample_image();
        let r = LayoutResolver::new(&img, MissingPolicy::UseDefault);
        let l = r
            .compile(
                "Record",
                &[
                    FieldSpec::scalar("flags", ScalarType::U8),
                    FieldSpec::variable(
                        "extra",
                        8,
                        Presence::Bit {
                            field: "flags".into(),
                            bit: 0,
                        },
                    ),
                    FieldSpec::variable(
                        "no_extra_pad",
                        1,
                        Presence::Not(Box::new(Presence::Bit {
                            field: "flags".into(),
                            bit: 0,
                        })),
                    ),
                    FieldSpec::inline(
                        "pos",
                        vec![
                            FieldSpec::scalar("x", ScalarType::U16),
                            FieldSpec::scalar("y", ScalarType::U16),
                        ],
                    ),
                    FieldSpec::object("pair", "v8::internal::Pair"),
                    FieldSpec::object("nothing", "v8::internal::Absent"),
                    FieldSpec::scalar("tail", ScalarType::U8),
                ],
            )
            .unwrap();

        let mut mem = FlatImage::new(gimli::RunTimeEndian::Little);
        mem.add_region(0x100, vec![1, 0, 0, 0, 0, 0, 0, 0, 0, 0x34, 0x12, 0x78, 0x56, 0, 0, 0, 0, 9]);
        mem.add_region(0x200, vec![0, 0, 0xcd, 0xab, 0, 0, 0, 0, 0, 0, 0]);
        let with = Instance::new(&mem, 0x100, scheme());
        let without = Instance::new(&mem, 0x200, scheme());

        assert_eq!(l.is_present("extra", with), Ok(true));
        assert_eq!(l.offset_of("pos", with), Ok(9));
        assert_eq!(l.offset_of("pos.y", with), Ok(11));
        assert_eq!(l.read_int("pos.x", with), Ok(0x1234));
        assert_eq!(l.read_int("pos.y", with), Ok(0x5678));
        assert_eq!(l.size_of("pair", with), Ok(4));
        assert_eq!(l.size_of("nothing", with), Ok(0));
        assert_eq!(l.offset_of("tail", with), Ok(17));
        assert_eq!(l.read_int("tail", with), Ok(9));

        assert_eq!(l.is_present("extra", without), Ok(false));
        assert_eq!(l.offset_of("pos", without), Ok(2));
        assert_eq!(l.read_int("pos.x", without), Ok(0xabcd));
        assert_eq!(l.end(without), Ok(11));

        let text = l.describe();
        assert!(text.contains("inline"));
        assert!(text.contains("after"));
    }

    #[test]
    fn bad_sibling_references_fail_compile() {
        let img = sample_image();
        let r = LayoutResolver::new(&img, MissingPolicy::UseDefault);
        let e = r.compile(
            "Broken",
            &[FieldSpec::array("items", ScalarType::U8, Length::Field("count".into()))],
        );
        assert!(matches!(e, Err(LayoutError::UnknownField { .. })));

        let e = r.compile(
            "Broken2",
            &[
                FieldSpec::tagged("t"),
                FieldSpec::constant("c"),
                FieldSpec::bitfield("b", "c", 1),
            ],
        );
        assert!(matches!(e, Err(LayoutError::WrongKind { .. })));
    }
}
