//! Closed operator sets of the expression algebra.
//!
//! Every expression node carries one of these tags; arity is enforced by the
//! [`Exp`](crate::Exp) tree shape itself. Operator metadata (commutativity,
//! comparison inversion) drives the simplifier.

use strum::{Display, EnumString};

/// Unary operators.
#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOp {
    /// Arithmetic negation.
    #[strum(serialize = "-")]
    Neg,
    /// Bitwise complement.
    #[strum(serialize = "~")]
    BitNot,
    /// Logical complement.
    #[strum(serialize = "!")]
    LogNot,
    /// Target-specific machine feature, named by a string-constant child.
    #[strum(serialize = "machftr")]
    MachFtr,
}

/// Binary operators.
#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryOp {
    /// Integer addition.
    #[strum(serialize = "+")]
    Plus,
    /// Integer subtraction.
    #[strum(serialize = "-")]
    Minus,
    /// Integer multiplication, operands treated as unsigned.
    #[strum(serialize = "*")]
    Mult,
    /// Integer multiplication, operands treated as signed.
    #[strum(serialize = "*!")]
    MultS,
    /// Integer division, unsigned.
    #[strum(serialize = "/")]
    Div,
    /// Integer division, signed.
    #[strum(serialize = "/!")]
    DivS,
    /// Integer remainder, unsigned.
    #[strum(serialize = "%")]
    Mod,
    /// Integer remainder, signed.
    #[strum(serialize = "%!")]
    ModS,
    /// Floating-point addition.
    #[strum(serialize = "+f")]
    FPlus,
    /// Floating-point subtraction.
    #[strum(serialize = "-f")]
    FMinus,
    /// Floating-point multiplication.
    #[strum(serialize = "*f")]
    FMult,
    /// Floating-point division.
    #[strum(serialize = "/f")]
    FDiv,
    /// Bitwise and.
    #[strum(serialize = "&")]
    BitAnd,
    /// Bitwise or.
    #[strum(serialize = "|")]
    BitOr,
    /// Bitwise exclusive or.
    #[strum(serialize = "^")]
    BitXor,
    /// Logical shift left.
    #[strum(serialize = "<<")]
    Shl,
    /// Logical shift right.
    #[strum(serialize = ">>")]
    Shr,
    /// Arithmetic shift right.
    #[strum(serialize = ">>A")]
    Sar,
    /// Rotate left.
    #[strum(serialize = "rl")]
    RotL,
    /// Rotate right.
    #[strum(serialize = "rr")]
    RotR,
    /// Equality comparison.
    #[strum(serialize = "=")]
    Eq,
    /// Inequality comparison.
    #[strum(serialize = "~=")]
    Ne,
    /// Signed less-than.
    #[strum(serialize = "<")]
    Lt,
    /// Signed greater-than.
    #[strum(serialize = ">")]
    Gt,
    /// Signed less-or-equal.
    #[strum(serialize = "<=")]
    Le,
    /// Signed greater-or-equal.
    #[strum(serialize = ">=")]
    Ge,
    /// Unsigned less-than.
    #[strum(serialize = "<u")]
    LtU,
    /// Unsigned greater-than.
    #[strum(serialize = ">u")]
    GtU,
    /// Unsigned less-or-equal.
    #[strum(serialize = "<=u")]
    LeU,
    /// Unsigned greater-or-equal.
    #[strum(serialize = ">=u")]
    GeU,
    /// Logical and.
    #[strum(serialize = "and")]
    LogAnd,
    /// Logical or.
    #[strum(serialize = "or")]
    LogOr,
    /// List constructor; chains of these build argument lists.
    #[strum(serialize = ",")]
    ListCons,
    /// Size cast: left child is the bit-width constant.
    #[strum(serialize = "size")]
    SizeCast,
    /// Flag-calculation call: left child names the flag function, right
    /// child is the `ListCons` chain of operands. Folded away when a branch
    /// or set-on-condition consumes the flags.
    #[strum(serialize = "flagcall")]
    FlagCall,
}

impl BinaryOp {
    /// Operators that may be reordered and flattened during simplification.
    /// Floating-point arithmetic is excluded; it is not associative.
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Plus
                | Self::Mult
                | Self::MultS
                | Self::BitAnd
                | Self::BitOr
                | Self::BitXor
                | Self::LogAnd
                | Self::LogOr
        )
    }

    /// Whether this operator compares its operands.
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::Ne
                | Self::Lt
                | Self::Gt
                | Self::Le
                | Self::Ge
                | Self::LtU
                | Self::GtU
                | Self::LeU
                | Self::GeU
        )
    }

    /// The comparison testing the opposite outcome, used to push a logical
    /// not inwards. `None` for non-comparisons.
    pub const fn inverted(self) -> Option<Self> {
        Some(match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
            Self::LtU => Self::GeU,
            Self::GeU => Self::LtU,
            Self::GtU => Self::LeU,
            Self::LeU => Self::GtU,
            _ => return None,
        })
    }
}

/// Ternary operators.
#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TernaryOp {
    /// `cond ? then : else`.
    #[strum(serialize = "?:")]
    Cond,
    /// Bit-field extract `e@[lo:hi]`.
    #[strum(serialize = "@")]
    BitExtract,
    /// Floating-point size conversion (from-width, to-width, value).
    #[strum(serialize = "fsize")]
    FSize,
    /// Sign extension (from-width, to-width, value).
    #[strum(serialize = "sgnex")]
    SignExt,
    /// Zero extension (from-width, to-width, value).
    #[strum(serialize = "zfill")]
    ZeroExt,
    /// Integer to float (from-width, to-width, value).
    #[strum(serialize = "itof")]
    IntToFloat,
    /// Float to integer (from-width, to-width, value).
    #[strum(serialize = "ftoi")]
    FloatToInt,
}

/// Leaf expressions with no children.
#[derive(Debug, Display, EnumString, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Terminal {
    /// The program counter.
    #[strum(serialize = "%pc")]
    Pc,
    /// The abstract flags result of the last flag call.
    #[strum(serialize = "%flags")]
    Flags,
    /// The carry flag.
    #[strum(serialize = "%CF")]
    CarryFlag,
    /// Boolean true.
    #[strum(serialize = "true")]
    True,
    /// Boolean false.
    #[strum(serialize = "false")]
    False,
    /// Matches any expression in pattern matching.
    #[strum(serialize = "WILD")]
    Wild,
    /// Matches any integer constant.
    #[strum(serialize = "WILDINT")]
    WildIntConst,
    /// Matches any string constant.
    #[strum(serialize = "WILDSTR")]
    WildStrConst,
    /// Matches any memory-of expression.
    #[strum(serialize = "WILDMEMOF")]
    WildMemOf,
    /// Matches any register-of expression.
    #[strum(serialize = "WILDREGOF")]
    WildRegOf,
    /// Matches any address-of expression.
    #[strum(serialize = "WILDADDROF")]
    WildAddrOf,
}

impl Terminal {
    /// Whether this terminal is one of the pattern-library wildcards.
    pub const fn is_wildcard(self) -> bool {
        matches!(
            self,
            Self::Wild
                | Self::WildIntConst
                | Self::WildStrConst
                | Self::WildMemOf
                | Self::WildRegOf
                | Self::WildAddrOf
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_inversion_round_trips() {
        for op in [
            BinaryOp::Eq,
            BinaryOp::Ne,
            BinaryOp::Lt,
            BinaryOp::Le,
            BinaryOp::Gt,
            BinaryOp::Ge,
            BinaryOp::LtU,
            BinaryOp::LeU,
            BinaryOp::GtU,
            BinaryOp::GeU,
        ] {
            let inv = op.inverted().unwrap();
            assert_eq!(inv.inverted(), Some(op));
        }
        assert_eq!(BinaryOp::Plus.inverted(), None);
    }

    #[test]
    fn commutative_set_excludes_float() {
        assert!(BinaryOp::Plus.is_commutative());
        assert!(!BinaryOp::FPlus.is_commutative());
        assert!(!BinaryOp::Minus.is_commutative());
    }
}
