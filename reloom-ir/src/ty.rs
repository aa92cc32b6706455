//! The type lattice.
//!
//! Types are joined with [`Type::meet`], the commutative, associative,
//! idempotent operation the data-flow type analysis iterates to a fixed
//! point. `Void` is bottom; incompatible kinds widen to a union.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::{OnceLock, RwLock};

use reloom_types::BitWidth;

/// Signedness of an integer type. `Unknown` is below both concrete
/// signednesses in the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Signedness {
    /// Two's-complement signed.
    Signed,
    /// Unsigned.
    Unsigned,
    /// Evidence for both or neither.
    Unknown,
}

impl Signedness {
    fn meet(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Unknown, b) => b,
            (a, Self::Unknown) => a,
            _ => Self::Unknown,
        }
    }
}

/// One field of a compound type. Offsets are in bits from the start of the
/// compound and strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Field {
    /// Bit offset from the start of the compound.
    pub offset: u64,
    /// Field type.
    pub ty: Type,
    /// Field name; generated names are `fldK`.
    pub name: String,
}

/// A type in the lattice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Type {
    /// No information; bottom of the lattice.
    Void,
    /// Boolean.
    Bool,
    /// 8-bit character.
    Char,
    /// Integer of a given width and signedness.
    Integer {
        /// Width in bits.
        bits: BitWidth,
        /// Signedness evidence.
        sign: Signedness,
    },
    /// IEEE-754 float of a given width.
    Float(BitWidth),
    /// Pointer to a pointee type.
    Pointer(Box<Type>),
    /// Array of elements, possibly of unknown length.
    Array {
        /// Element type.
        elem: Box<Type>,
        /// Element count; `None` is unbounded.
        len: Option<u64>,
    },
    /// Ordered field list.
    Compound(Vec<Field>),
    /// Unordered member list with no structural duplicates.
    Union(Vec<Type>),
    /// A width with no interpretation yet.
    Size(BitWidth),
    /// A procedure type.
    Func,
    /// A name resolving through the process-wide registry.
    Named(String),
}

impl Default for Type {
    fn default() -> Self {
        Self::Void
    }
}

impl Type {
    /// Signed 32-bit integer, the default for discovered integer values.
    pub const fn int(bits: BitWidth) -> Self {
        Self::Integer {
            bits,
            sign: Signedness::Signed,
        }
    }

    /// Unsigned integer.
    pub const fn uint(bits: BitWidth) -> Self {
        Self::Integer {
            bits,
            sign: Signedness::Unsigned,
        }
    }

    /// Integer of unknown signedness.
    pub const fn int_unknown(bits: BitWidth) -> Self {
        Self::Integer {
            bits,
            sign: Signedness::Unknown,
        }
    }

    /// Pointer to `pointee`.
    pub fn ptr(pointee: Type) -> Self {
        Self::Pointer(Box::new(pointee))
    }

    /// Whether this is the bottom element.
    pub const fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Whether this type says the value is itself a pointer.
    pub const fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer(_))
    }

    /// Pointee type, if this is a pointer.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Self::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// Width in bits, where one is known.
    pub fn width(&self) -> Option<BitWidth> {
        match self {
            Self::Bool => Some(1),
            Self::Char => Some(8),
            Self::Integer { bits, .. } | Self::Float(bits) | Self::Size(bits) => Some(*bits),
            Self::Pointer(_) | Self::Func => Some(64),
            Self::Array { elem, len } => {
                let e = elem.width()?;
                len.map(|n| (e as u64).saturating_mul(n) as BitWidth)
            }
            Self::Named(name) => resolve_named(name).and_then(|t| t.width()),
            Self::Void | Self::Compound(_) | Self::Union(_) => None,
        }
    }

    /// Resolve a named type through the registry, or return a clone of
    /// `self` when it is already concrete.
    pub fn resolved(&self) -> Type {
        match self {
            Self::Named(name) => resolve_named(name).unwrap_or(Self::Void),
            other => other.clone(),
        }
    }

    /// Meet `self` with `other`; the boolean reports whether the result
    /// differs structurally from `self`.
    pub fn meet(&self, other: &Type) -> (Type, bool) {
        let result = meet_types(self, other);
        let changed = result != *self;
        (result, changed)
    }
}

fn meet_types(a: &Type, b: &Type) -> Type {
    use Type::*;

    if a == b {
        return a.clone();
    }

    // Named types join through their definitions.
    if let Named(_) = a {
        return meet_types(&a.resolved(), b);
    }
    if let Named(_) = b {
        return meet_types(a, &b.resolved());
    }

    match (a, b) {
        (Void, t) | (t, Void) => t.clone(),

        (Integer { bits: wa, sign: sa }, Integer { bits: wb, sign: sb }) => Integer {
            bits: (*wa).max(*wb),
            sign: sa.meet(*sb),
        },
        (Integer { bits, sign }, Size(n)) | (Size(n), Integer { bits, sign }) => Integer {
            bits: (*bits).max(*n),
            sign: *sign,
        },
        (Size(na), Size(nb)) => Size((*na).max(*nb)),

        (Float(wa), Float(wb)) => Float((*wa).max(*wb)),
        (Float(w), Size(n)) | (Size(n), Float(w)) => Float((*w).max(*n)),

        (Bool, Integer { bits, sign }) | (Integer { bits, sign }, Bool) => Integer {
            bits: *bits,
            sign: *sign,
        },
        (Char, Integer { bits, sign }) | (Integer { bits, sign }, Char) => Integer {
            bits: (*bits).max(8),
            sign: *sign,
        },

        (Pointer(pa), Pointer(pb)) => {
            if pa.is_void() {
                Pointer(pb.clone())
            } else if pb.is_void() {
                Pointer(pa.clone())
            } else {
                Pointer(Box::new(meet_types(pa, pb)))
            }
        }
        // A pointer read through an integer word keeps the pointer.
        (Pointer(p), Size(_)) | (Size(_), Pointer(p)) => Pointer(p.clone()),

        (
            Array { elem: ea, len: la },
            Array { elem: eb, len: lb },
        ) => {
            let elem = Box::new(meet_types(ea, eb));
            let len = match (la, lb) {
                (Some(x), Some(y)) => Some((*x).max(*y)),
                (None, other) | (other, None) => *other,
            };
            Array { elem, len }
        }
        // An array meets its element type without widening.
        (Array { elem, len }, t) if subsumes(elem, t) => Array {
            elem: elem.clone(),
            len: *len,
        },
        (t, Array { elem, len }) if subsumes(elem, t) => Array {
            elem: elem.clone(),
            len: *len,
        },

        (Compound(fa), Compound(fb)) => Compound(meet_compounds(fa, fb)),

        (Union(members), t) => union_with(members.clone(), t),
        (t, Union(members)) => union_with(members.clone(), t),

        // Incompatible kinds produce a union of the two.
        _ => union_with(vec![a.clone()], b),
    }
}

fn meet_compounds(a: &[Field], b: &[Field]) -> Vec<Field> {
    let mut fields = a.to_vec();
    for fb in b {
        if let Some(fa) = fields.iter_mut().find(|f| f.offset == fb.offset) {
            fa.ty = meet_types(&fa.ty, &fb.ty);
        } else {
            fields.push(fb.clone());
        }
    }
    fields.sort_by_key(|f| f.offset);
    fields
}

/// Add `t` to a union unless an existing member already subsumes it.
fn union_with(mut members: Vec<Type>, t: &Type) -> Type {
    let to_add: Vec<Type> = match t {
        Type::Union(more) => more.clone(),
        other => vec![other.clone()],
    };
    for cand in to_add {
        let subsumed = members.iter().any(|m| subsumes(m, &cand));
        if !subsumed {
            members.push(cand);
        }
    }
    if members.len() == 1 {
        members.pop().unwrap_or(Type::Void)
    } else {
        members.sort();
        members.dedup();
        Type::Union(members)
    }
}

/// Whether `m` already covers `cand`: meeting them would leave `m`
/// unchanged. Incompatible kinds never subsume; checking compatibility
/// first keeps the union-widening rule from re-entering itself.
fn subsumes(m: &Type, cand: &Type) -> bool {
    if m == cand {
        return true;
    }
    compatible(m, cand) && meet_types(m, cand) == *m
}

/// Whether two types join inside one lattice family rather than widening
/// to a union; mirrors the arms of [`meet_types`].
fn compatible(a: &Type, b: &Type) -> bool {
    use Type::*;
    if let Named(_) = a {
        return compatible(&a.resolved(), b);
    }
    if let Named(_) = b {
        return compatible(a, &b.resolved());
    }
    match (a, b) {
        (Void, _) | (_, Void) => true,
        (Union(_), _) | (_, Union(_)) => true,
        (Integer { .. } | Size(_), Integer { .. } | Size(_)) => true,
        (Float(_), Float(_) | Size(_)) | (Size(_), Float(_)) => true,
        (Bool | Char, Integer { .. }) | (Integer { .. }, Bool | Char) => true,
        (Pointer(_), Pointer(_) | Size(_)) | (Size(_), Pointer(_)) => true,
        (Array { .. }, Array { .. }) => true,
        (Compound(_), Compound(_)) => true,
        (Array { elem, .. }, t) | (t, Array { elem, .. }) => subsumes(elem, t),
        _ => false,
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Bool => f.write_str("bool"),
            Type::Char => f.write_str("char"),
            Type::Integer { bits, sign } => match sign {
                Signedness::Signed => write!(f, "int{bits}"),
                Signedness::Unsigned => write!(f, "uint{bits}"),
                Signedness::Unknown => write!(f, "?int{bits}"),
            },
            Type::Float(bits) => write!(f, "float{bits}"),
            Type::Pointer(p) => write!(f, "{p}*"),
            Type::Array { elem, len: Some(n) } => write!(f, "{elem}[{n}]"),
            Type::Array { elem, len: None } => write!(f, "{elem}[]"),
            Type::Compound(fields) => {
                f.write_str("struct {")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, " {} {}", field.ty, field.name)?;
                }
                f.write_str(" }")
            }
            Type::Union(members) => {
                f.write_str("union {")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" |")?;
                    }
                    write!(f, " {m}")?;
                }
                f.write_str(" }")
            }
            Type::Size(bits) => write!(f, "size{bits}"),
            Type::Func => f.write_str("func"),
            Type::Named(name) => f.write_str(name),
        }
    }
}

// The named-type registry. Written while signatures are parsed (an external
// phase) and read-only afterwards.
fn registry() -> &'static RwLock<BTreeMap<String, Type>> {
    static REGISTRY: OnceLock<RwLock<BTreeMap<String, Type>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(BTreeMap::new()))
}

/// Bind `name` to `ty` in the process-wide registry.
pub fn register_named(name: &str, ty: Type) {
    if let Ok(mut map) = registry().write() {
        map.insert(name.to_owned(), ty);
    }
}

/// Look up a named type. `None` when the name was never registered.
pub fn resolve_named(name: &str) -> Option<Type> {
    registry().read().ok()?.get(name).cloned()
}
