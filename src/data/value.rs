//! The tagged value word.
//!
//! Every Lisp value is a single 64-bit word:
//!
//! ```text
//!  63                       8 7     3 2   0
//! +--------------------------+-------+-----+
//! |        heap index (61 bits)      | tag |   heap kinds
//! +--------------------------+-------+-----+
//! |   payload (56 bits)      |  sub  | 111 |   immediates
//! +--------------------------+-------+-----+
//! ```
//!
//! The all-zero word is `NIL`: a pair-tagged word with index 0.
//! Index 0 is reserved in every pool, so no real pair ever looks like `NIL`.

use core::fmt::{Debug, Display};

/// Main tag: the low three bits of every word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Tag {
    Pair = Self::PAIR,
    Symbol = Self::SYMBOL,
    Closure = Self::CLOSURE,
    Macro = Self::MACRO,
    Error = Self::ERROR,
    Vector = Self::VECTOR,
    Pointer = Self::POINTER,
    Other = Self::OTHER,
}

impl Tag {
    const PAIR: u8 = 0;
    const SYMBOL: u8 = 1;
    const CLOSURE: u8 = 2;
    const MACRO: u8 = 3;
    const ERROR: u8 = 4;
    const VECTOR: u8 = 5;
    const POINTER: u8 = 6;
    const OTHER: u8 = 7;

    /// Pair-shaped kinds: a two-word cell (head, tail).
    pub fn is_cell(self) -> bool {
        matches!(self, Tag::Pair | Tag::Closure | Tag::Macro | Tag::Error)
    }

    /// Vector-shaped kinds: a four-word header plus a data buffer.
    pub fn is_vector(self) -> bool {
        matches!(self, Tag::Symbol | Tag::Vector)
    }
}

impl From<u8> for Tag {
    fn from(value: u8) -> Self {
        match value & 0b111 {
            Self::PAIR => Tag::Pair,
            Self::SYMBOL => Tag::Symbol,
            Self::CLOSURE => Tag::Closure,
            Self::MACRO => Tag::Macro,
            Self::ERROR => Tag::Error,
            Self::VECTOR => Tag::Vector,
            Self::POINTER => Tag::Pointer,
            _ => Tag::Other,
        }
    }
}

/// Sub tag of an immediate (`Tag::Other`) word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SubTag {
    Integer = Self::INTEGER,
    Char = Self::CHAR,
    Ref = Self::REF,
    Special = Self::SPECIAL,
    Instr = Self::INSTR,
    Unbound = Self::UNBOUND,
}

impl SubTag {
    const INTEGER: u8 = 0;
    const CHAR: u8 = 1;
    const REF: u8 = 2;
    const SPECIAL: u8 = 3;
    const INSTR: u8 = 4;
    const UNBOUND: u8 = 5;

    fn from_bits(value: u8) -> Option<Self> {
        Some(match value {
            Self::INTEGER => SubTag::Integer,
            Self::CHAR => SubTag::Char,
            Self::REF => SubTag::Ref,
            Self::SPECIAL => SubTag::Special,
            Self::INSTR => SubTag::Instr,
            Self::UNBOUND => SubTag::Unbound,
            _ => return None,
        })
    }
}

/// Element type recorded in a vector header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    Any = 0,
    Char = 1,
}

impl ElementType {
    pub(crate) fn from_int(i: i64) -> Self {
        if i == ElementType::Char as i64 {
            ElementType::Char
        } else {
            ElementType::Any
        }
    }
}

/// A lexical address: frame hops outward, then slot within the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref {
    pub depth: u32,
    pub width: u32,
}

impl Display for Ref {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#<ref {}:{}>", self.depth, self.width)
    }
}

const TAG_BITS: u32 = 3;
const SUB_BITS: u32 = 5;
const PAYLOAD_SHIFT: u32 = TAG_BITS + SUB_BITS;
const REF_FIELD_BITS: u32 = 28;
const REF_FIELD_MASK: u64 = (1 << REF_FIELD_BITS) - 1;

/// Largest integer that fits the immediate payload.
pub const MAX_INTEGER: i64 = (1 << (64 - PAYLOAD_SHIFT - 1)) - 1;
/// Smallest integer that fits the immediate payload.
pub const MIN_INTEGER: i64 = -(1 << (64 - PAYLOAD_SHIFT - 1));

/// A tagged Lisp value.
///
/// Heap-kind values are only valid until the next allocation:
/// the collector may move the cell they point to.
/// Anything held across an allocation must be rooted (see [`crate::data::Root`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Value(u64);

impl Value {
    pub const NIL: Value = Value(0);

    /// Marker stored in compile-time frames for bindings that have no value yet.
    pub const UNBOUND: Value = Value::immediate(SubTag::Unbound, 0);

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Value(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    pub(crate) const fn heap(tag: Tag, idx: usize) -> Self {
        Value(((idx as u64) << TAG_BITS) | tag as u64)
    }

    const fn immediate(sub: SubTag, payload: u64) -> Self {
        Value((payload << PAYLOAD_SHIFT) | ((sub as u64) << TAG_BITS) | Tag::OTHER as u64)
    }

    pub fn int(i: i64) -> Self {
        Value::immediate(SubTag::Integer, i as u64)
    }

    pub fn char(c: char) -> Self {
        Value::immediate(SubTag::Char, c as u64)
    }

    pub fn reference(r: Ref) -> Self {
        let payload = ((r.depth as u64 & REF_FIELD_MASK) << REF_FIELD_BITS)
            | (r.width as u64 & REF_FIELD_MASK);
        Value::immediate(SubTag::Ref, payload)
    }

    pub fn special(id: u8) -> Self {
        Value::immediate(SubTag::Special, id as u64)
    }

    pub fn instr(op: u8, operand: u64) -> Self {
        Value::immediate(SubTag::Instr, (operand << 8) | op as u64)
    }

    /// Forwarding marker left in from-space by the collector.
    pub(crate) fn forward(idx: usize) -> Self {
        Value::heap(Tag::Pointer, idx)
    }

    #[inline]
    pub fn tag(self) -> Tag {
        ((self.0 & 0b111) as u8).into()
    }

    #[inline]
    pub fn sub_tag(self) -> Option<SubTag> {
        if self.tag() == Tag::Other {
            SubTag::from_bits(((self.0 >> TAG_BITS) & 0b11111) as u8)
        } else {
            None
        }
    }

    #[inline]
    pub fn idx(self) -> usize {
        (self.0 >> TAG_BITS) as usize
    }

    /// Same cell, different kind. Used to tag pair chains as closures/macros/errors.
    pub(crate) fn retag(self, tag: Tag) -> Self {
        Value::heap(tag, self.idx())
    }

    fn payload(self) -> u64 {
        self.0 >> PAYLOAD_SHIFT
    }

    fn signed_payload(self) -> i64 {
        (self.0 as i64) >> PAYLOAD_SHIFT
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// A real pair: pair-tagged and not `NIL`.
    #[inline]
    pub fn is_pair(self) -> bool {
        self.tag() == Tag::Pair && !self.is_nil()
    }

    #[inline]
    pub fn is_symbol(self) -> bool {
        self.tag() == Tag::Symbol
    }

    #[inline]
    pub fn is_closure(self) -> bool {
        self.tag() == Tag::Closure
    }

    #[inline]
    pub fn is_macro(self) -> bool {
        self.tag() == Tag::Macro
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self.tag() == Tag::Error
    }

    #[inline]
    pub fn is_vector(self) -> bool {
        self.tag() == Tag::Vector
    }

    /// True for words that point into the heap (and may move).
    #[inline]
    pub fn is_heap(self) -> bool {
        match self.tag() {
            Tag::Other => false,
            Tag::Pair => !self.is_nil(),
            _ => true,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        (self.sub_tag() == Some(SubTag::Integer)).then(|| self.signed_payload())
    }

    pub fn as_char(self) -> Option<char> {
        if self.sub_tag() == Some(SubTag::Char) {
            char::from_u32(self.payload() as u32)
        } else {
            None
        }
    }

    pub fn as_address(self) -> Option<Ref> {
        (self.sub_tag() == Some(SubTag::Ref)).then(|| {
            let p = self.payload();
            Ref {
                depth: ((p >> REF_FIELD_BITS) & REF_FIELD_MASK) as u32,
                width: (p & REF_FIELD_MASK) as u32,
            }
        })
    }

    pub fn as_special(self) -> Option<u8> {
        (self.sub_tag() == Some(SubTag::Special)).then(|| self.payload() as u8)
    }

    /// Opcode and operand of an instruction word.
    pub fn as_instr(self) -> Option<(u8, u64)> {
        (self.sub_tag() == Some(SubTag::Instr)).then(|| {
            let p = self.payload();
            ((p & 0xff) as u8, p >> 8)
        })
    }

    pub fn is_unbound(self) -> bool {
        self == Value::UNBOUND
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::int(i)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::char(c)
    }
}

impl From<Ref> for Value {
    fn from(r: Ref) -> Self {
        Value::reference(r)
    }
}

/// Raw form: `tag#index` for heap words, `sub:payload` for immediates.
/// The printer (`crate::data::print`) renders the readable form.
impl Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_nil() {
            return write!(f, "nil");
        }
        let tag = match self.tag() {
            Tag::Pair => "obj",
            Tag::Symbol => "sym",
            Tag::Closure => "clo",
            Tag::Macro => "mac",
            Tag::Error => "err",
            Tag::Vector => "vec",
            Tag::Pointer => "fwd",
            Tag::Other => {
                return match self.sub_tag() {
                    Some(SubTag::Integer) => write!(f, "int:{}", self.signed_payload()),
                    Some(SubTag::Char) => write!(f, "chr:{:?}", self.as_char().unwrap_or('?')),
                    Some(SubTag::Ref) => write!(f, "{}", self.as_address().unwrap_or(Ref { depth: 0, width: 0 })),
                    Some(SubTag::Special) => write!(f, "spc:{}", self.payload()),
                    Some(SubTag::Instr) => write!(f, "ins:{:#x}", self.payload()),
                    Some(SubTag::Unbound) => write!(f, "unbound"),
                    None => write!(f, "bad:{:#x}", self.0),
                };
            }
        };
        write!(f, "{}#{}", tag, self.idx())
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Value").field(&format_args!("{}", self)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_zero() {
        assert_eq!(Value::NIL.bits(), 0);
        assert_eq!(Value::NIL.tag(), Tag::Pair);
        assert!(Value::NIL.is_nil());
        assert!(!Value::NIL.is_pair());
        assert!(!Value::NIL.is_heap());
    }

    #[test]
    fn integers_keep_sign() {
        for i in [0, 1, -1, 42, -42, MAX_INTEGER, MIN_INTEGER] {
            let v = Value::int(i);
            assert_eq!(v.tag(), Tag::Other);
            assert_eq!(v.sub_tag(), Some(SubTag::Integer));
            assert_eq!(v.as_int(), Some(i), "integer {i} did not survive tagging");
        }
    }

    #[test]
    fn immediates_are_distinct() {
        let i = Value::int(65);
        let c = Value::char('A');
        assert_ne!(i, c);
        assert_eq!(c.as_char(), Some('A'));
        assert_eq!(c.as_int(), None);
        assert_eq!(i.as_char(), None);
    }

    #[test]
    fn references_pack_depth_and_width() {
        let r = Ref { depth: 3, width: 1027 };
        let v = Value::reference(r);
        assert_eq!(v.as_address(), Some(r));
        assert_eq!(v.as_int(), None);
    }

    #[test]
    fn instructions_carry_operands() {
        let v = Value::instr(17, 1234);
        assert_eq!(v.as_instr(), Some((17, 1234)));
        assert_eq!(Value::instr(3, 0).as_instr(), Some((3, 0)));
    }

    #[test]
    fn heap_words_keep_index() {
        let p = Value::heap(Tag::Closure, 40);
        assert_eq!(p.tag(), Tag::Closure);
        assert_eq!(p.idx(), 40);
        assert!(p.is_heap());
        assert_eq!(p.retag(Tag::Pair).idx(), 40);
        assert!(p.retag(Tag::Pair).is_pair());
    }

    #[test]
    fn unbound_is_not_nil() {
        assert!(Value::UNBOUND.is_unbound());
        assert!(!Value::UNBOUND.is_nil());
        assert_eq!(Value::UNBOUND.sub_tag(), Some(SubTag::Unbound));
    }
}
