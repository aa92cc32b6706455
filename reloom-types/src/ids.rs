use core::fmt;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Sentinel for "not assigned yet".
            pub const INVALID: Self = Self(u32::MAX);

            /// Id constructor.
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Whether this id refers to an arena slot.
            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }

            /// Index into the owning arena.
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Raw numeric value.
            pub const fn value(self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            fn from(index: u32) -> Self {
                Self(index)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

arena_id! {
    /// Stable statement number, assigned once per procedure and dense within
    /// it. Doubles as the index into the procedure's statement table and as
    /// the SSA subscript attached to [`RefExp`]-style references.
    ///
    /// [`RefExp`]: https://docs.rs/reloom-ir
    StmtId
}

arena_id! {
    /// Index of a basic block inside its owning control-flow graph.
    BbId
}

arena_id! {
    /// Index of a procedure inside its owning program.
    ProcId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_by_index() {
        assert!(StmtId::new(1) < StmtId::new(2));
        assert_eq!(BbId::new(7).index(), 7);
        assert_eq!(format!("{:?}", ProcId::new(3)), "ProcId(3)");
    }
}
