//! Register transfer lists.

use core::fmt;

use reloom_types::Address;

use crate::stmt::Statement;

/// The statements one machine instruction lowers into, at one native
/// address. Statements are owned exclusively by their RTL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rtl {
    /// Native address of the instruction.
    pub addr: Address,
    /// Statements, in execution order.
    pub stmts: Vec<Statement>,
}

impl Rtl {
    /// Empty RTL at `addr`.
    pub fn new(addr: Address) -> Self {
        Self {
            addr,
            stmts: Vec::new(),
        }
    }

    /// RTL at `addr` holding `stmts`.
    pub fn with_stmts(addr: Address, stmts: Vec<Statement>) -> Self {
        Self { addr, stmts }
    }

    /// Append a statement.
    pub fn append(&mut self, stmt: Statement) {
        self.stmts.push(stmt);
    }

    /// Insert a statement at the front, before everything at this address.
    pub fn prepend(&mut self, stmt: Statement) {
        self.stmts.insert(0, stmt);
    }

    /// The last statement, which decides control flow when it is a
    /// terminator.
    pub fn last(&self) -> Option<&Statement> {
        self.stmts.last()
    }

    /// The last statement, mutably.
    pub fn last_mut(&mut self) -> Option<&mut Statement> {
        self.stmts.last_mut()
    }

    /// Whether this RTL holds no statements.
    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

impl fmt::Display for Rtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.addr)?;
        for s in &self.stmts {
            writeln!(f, "    {s}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exp::Exp;

    #[test]
    fn prepend_puts_statement_first() {
        let mut rtl = Rtl::new(Address::new(0x100));
        rtl.append(Statement::assign(Exp::reg(1), Exp::int(1)));
        rtl.prepend(Statement::assign(Exp::reg(2), Exp::int(2)));
        assert_eq!(rtl.stmts.len(), 2);
        assert!(rtl.stmts[0].defines(&Exp::reg(2)));
    }
}
