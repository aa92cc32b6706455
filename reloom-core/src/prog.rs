//! The whole program under decompilation.

use std::collections::{BTreeMap, HashMap};

use reloom_ir::Type;
use reloom_types::{Address, ProcId};
use tracing::debug;

use crate::image::Image;
use crate::proc::{LibProc, Proc, Signature, UserProc};

/// A named cluster of procedures; clusters nest.
#[derive(Debug, Default)]
pub struct Module {
    /// Cluster name; the emitter maps it to an output file.
    pub name: String,
    /// Nested clusters.
    pub children: Vec<Module>,
    /// Procedures directly in this cluster.
    pub procs: Vec<ProcId>,
}

impl Module {
    /// Empty module named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A global variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// Native address.
    pub addr: Address,
    /// Inferred or declared type.
    pub ty: Type,
    /// Name, from a symbol or synthesised.
    pub name: String,
}

/// The program: procedures, globals, module tree and the read-only image.
pub struct Prog {
    /// Program name, usually the binary's.
    pub name: String,
    /// Root of the module tree.
    pub root: Module,
    procs: Vec<Proc>,
    name_index: HashMap<String, ProcId>,
    // `None` marks a deleted procedure: do not re-decode this address.
    addr_index: BTreeMap<Address, Option<ProcId>>,
    globals: Vec<Global>,
    image: Box<dyn Image>,
}

impl core::fmt::Debug for Prog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Prog")
            .field("name", &self.name)
            .field("procs", &self.procs.len())
            .field("globals", &self.globals.len())
            .finish()
    }
}

impl Prog {
    /// New program over `image`.
    pub fn new(name: impl Into<String>, image: Box<dyn Image>) -> Self {
        let name = name.into();
        Self {
            root: Module::new(name.clone()),
            name,
            procs: Vec::new(),
            name_index: HashMap::new(),
            addr_index: BTreeMap::new(),
            globals: Vec::new(),
            image,
        }
    }

    /// The read-only binary image.
    pub fn image(&self) -> &dyn Image {
        self.image.as_ref()
    }

    /// All procedure ids.
    pub fn proc_ids(&self) -> impl Iterator<Item = ProcId> {
        (0..self.procs.len() as u32).map(ProcId::new)
    }

    /// A procedure by id.
    pub fn proc(&self, id: ProcId) -> &Proc {
        &self.procs[id.index()]
    }

    /// A procedure by id, mutably.
    pub fn proc_mut(&mut self, id: ProcId) -> &mut Proc {
        &mut self.procs[id.index()]
    }

    /// The user procedure behind `id`; library procedures return `None`.
    pub fn user(&self, id: ProcId) -> Option<&UserProc> {
        self.proc(id).as_user()
    }

    /// The user procedure behind `id`, mutably.
    pub fn user_mut(&mut self, id: ProcId) -> Option<&mut UserProc> {
        self.proc_mut(id).as_user_mut()
    }

    /// Split borrow: one user procedure mutably plus the read-only image.
    /// The decoder drive loop needs both at once.
    pub fn user_and_image(&mut self, id: ProcId) -> (Option<&mut UserProc>, &dyn Image) {
        let proc = self.procs[id.index()].as_user_mut();
        (proc, self.image.as_ref())
    }

    /// The procedure at `addr`, when one exists and was not deleted.
    pub fn proc_at(&self, addr: Address) -> Option<ProcId> {
        self.addr_index.get(&addr).copied().flatten()
    }

    /// Whether `addr` was deleted and must not be re-decoded.
    pub fn is_deleted(&self, addr: Address) -> bool {
        matches!(self.addr_index.get(&addr), Some(None))
    }

    /// A procedure by name.
    pub fn proc_by_name(&self, name: &str) -> Option<ProcId> {
        self.name_index.get(name).copied()
    }

    /// The user procedure at `addr`, created undecoded when absent. The
    /// name comes from the symbol table when available. Returns `None` for
    /// deleted addresses.
    pub fn ensure_user_proc(&mut self, addr: Address) -> Option<ProcId> {
        match self.addr_index.get(&addr) {
            Some(Some(id)) => return Some(*id),
            Some(None) => return None,
            None => {}
        }
        let name = self
            .image
            .symbol_at(addr)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("proc_{addr}"));
        let id = self.push_proc(Proc::User(Box::new(UserProc::new(name, addr))));
        debug!(%addr, name = self.proc(id).name(), "new user procedure");
        Some(id)
    }

    /// Register a library procedure with a known signature.
    pub fn add_lib_proc(
        &mut self,
        name: impl Into<String>,
        addr: Address,
        signature: Signature,
    ) -> ProcId {
        let name = name.into();
        self.push_proc(Proc::Lib(LibProc {
            name,
            addr,
            signature,
        }))
    }

    fn push_proc(&mut self, proc: Proc) -> ProcId {
        let id = ProcId::new(self.procs.len() as u32);
        self.name_index.insert(proc.name().to_owned(), id);
        self.addr_index.insert(proc.addr(), Some(id));
        self.root.procs.push(id);
        self.procs.push(proc);
        id
    }

    /// Delete the procedure at `addr`, leaving a tombstone so the address
    /// is never re-decoded.
    pub fn remove_proc(&mut self, addr: Address) {
        if let Some(Some(id)) = self.addr_index.get(&addr).copied() {
            self.name_index.remove(self.procs[id.index()].name());
            self.root.procs.retain(|p| *p != id);
        }
        self.addr_index.insert(addr, None);
    }

    /// All globals.
    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    /// The global at `addr`, created with `ty` when absent. The name comes
    /// from the symbol table when available.
    pub fn ensure_global(&mut self, addr: Address, ty: Type) -> &Global {
        let pos = self.globals.iter().position(|g| g.addr == addr);
        let idx = match pos {
            Some(i) => {
                let (met, _) = self.globals[i].ty.meet(&ty);
                self.globals[i].ty = met;
                i
            }
            None => {
                let name = self
                    .image
                    .symbol_at(addr)
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("global{}", self.globals.len()));
                self.globals.push(Global { addr, ty, name });
                self.globals.len() - 1
            }
        };
        &self.globals[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Machine, MemoryImage, Platform};

    fn prog() -> Prog {
        Prog::new(
            "test",
            Box::new(MemoryImage::new(Machine::X86, Platform::Elf)),
        )
    }

    #[test]
    fn deleted_addresses_stay_deleted() {
        let mut p = prog();
        let addr = Address::new(0x1000);
        let id = p.ensure_user_proc(addr).unwrap();
        assert_eq!(p.proc_at(addr), Some(id));
        p.remove_proc(addr);
        assert!(p.is_deleted(addr));
        assert_eq!(p.ensure_user_proc(addr), None);
    }

    #[test]
    fn globals_meet_types_on_rediscovery() {
        let mut p = prog();
        let addr = Address::new(0x2000);
        p.ensure_global(addr, Type::int(16));
        let g = p.ensure_global(addr, Type::uint(32));
        assert_eq!(
            g.ty,
            Type::Integer {
                bits: 32,
                sign: reloom_ir::Signedness::Unknown
            }
        );
        assert_eq!(p.globals().len(), 1);
    }
}
