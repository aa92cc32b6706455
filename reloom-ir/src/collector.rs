//! Call-site collectors.
//!
//! A call statement carries two caches filled by the interprocedural
//! passes: a [`UseCollector`] of locations live in the caller across the
//! call, and a [`DefCollector`] of the callee's modifieds localised to the
//! call site. Together they let propagation see through a call without
//! inlining the callee.

use std::collections::BTreeMap;

use crate::exp::Exp;
use crate::stmt::Assign;

/// Locations live in the caller across a call, keyed by their
/// subscript-free base and holding the subscripted reaching form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UseCollector {
    live: BTreeMap<Exp, Exp>,
}

impl UseCollector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live location. `reaching` is the subscripted form that
    /// reaches the call in the caller.
    pub fn insert(&mut self, reaching: Exp) {
        let base = reaching.unsubscripted();
        self.live.insert(base, reaching);
    }

    /// The caller-side reaching form of `base`, if it is live here.
    pub fn reaching(&self, base: &Exp) -> Option<&Exp> {
        self.live.get(base)
    }

    /// Whether `base` is live across the call.
    pub fn is_live(&self, base: &Exp) -> bool {
        self.live.contains_key(base)
    }

    /// Drop a location from the live set.
    pub fn remove(&mut self, base: &Exp) {
        self.live.remove(base);
    }

    /// Iterate over the live locations' reaching forms.
    pub fn iter(&self) -> impl Iterator<Item = (&Exp, &Exp)> {
        self.live.iter()
    }

    /// Number of live locations.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether nothing is live across the call.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.live.clear();
    }
}

/// The callee's modifieds localised to a call site: one assign per modified
/// location, rhs being the value as seen by the caller after the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DefCollector {
    defs: Vec<Assign>,
}

impl DefCollector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or update the definition of `assign.lhs`.
    pub fn update(&mut self, assign: Assign) {
        match self.defs.iter_mut().find(|d| d.lhs == assign.lhs) {
            Some(existing) => *existing = assign,
            None => self.defs.push(assign),
        }
    }

    /// The value defined for `base` at this call, if any.
    pub fn def_for(&self, base: &Exp) -> Option<&Exp> {
        self.defs.iter().find(|d| &d.lhs == base).map(|d| &d.rhs)
    }

    /// Whether this call defines `base`.
    pub fn defines(&self, base: &Exp) -> bool {
        self.defs.iter().any(|d| &d.lhs == base)
    }

    /// Iterate the collected definitions.
    pub fn iter(&self) -> impl Iterator<Item = &Assign> {
        self.defs.iter()
    }

    /// Remove the definition of `base`.
    pub fn remove(&mut self, base: &Exp) {
        self.defs.retain(|d| &d.lhs != base);
    }

    /// Number of collected definitions.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether no definitions were collected.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.defs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reloom_types::StmtId;

    #[test]
    fn use_collector_keys_on_base() {
        let mut col = UseCollector::new();
        col.insert(Exp::subscript(Exp::reg(24), Some(StmtId::new(3))));
        assert!(col.is_live(&Exp::reg(24)));
        assert_eq!(
            col.reaching(&Exp::reg(24)),
            Some(&Exp::subscript(Exp::reg(24), Some(StmtId::new(3))))
        );
        // a later insert for the same base replaces the reaching form
        col.insert(Exp::subscript(Exp::reg(24), Some(StmtId::new(9))));
        assert_eq!(col.len(), 1);
    }

    #[test]
    fn def_collector_updates_in_place() {
        let mut col = DefCollector::new();
        col.update(Assign::new(Exp::reg(24), Exp::int(1)));
        col.update(Assign::new(Exp::reg(24), Exp::int(2)));
        assert_eq!(col.len(), 1);
        assert_eq!(col.def_for(&Exp::reg(24)), Some(&Exp::int(2)));
        assert!(!col.defines(&Exp::reg(25)));
    }
}
