//! Memory-access and physical-frame record types.

use core::fmt;

/// Kind of a memory access as it appears in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Data load.
    Load,
    /// Data store.
    Store,
    /// Read-modify-write of a data location.
    Modify,
    /// Instruction fetch.
    Execute,
}

impl AccessKind {
    /// Whether this access dirties the page it touches.
    #[inline]
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::Store | Self::Modify)
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Load => "load",
            Self::Store => "store",
            Self::Modify => "modify",
            Self::Execute => "execute",
        };
        f.write_str(s)
    }
}

/// A single memory access: a virtual address plus the access kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAccess {
    /// Virtual address; upper bits beyond the architecture's address-space
    /// width are ignored during translation.
    pub addr: u64,
    /// What the access does to the location.
    pub kind: AccessKind,
}

impl MemAccess {
    #[must_use]
    pub fn new(addr: u64, kind: AccessKind) -> Self {
        Self { addr, kind }
    }
}

impl fmt::Display for MemAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {:#x}", self.kind, self.addr)
    }
}

/// Back-reference from a physical frame to the leaf entry mapping it.
///
/// Stored as a `(pid, v_page)` coordinate instead of a pointer into the
/// table tree, so the driver resolves the live leaf on demand and a torn
/// down hierarchy can never leave a dangling pointer behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingRef {
    pub(crate) pid: u64,
    pub(crate) v_page: u64,
}

/// A physical frame handed out by the host OS model.
///
/// Created by the OS when a frame is allocated; the driver fills in
/// `driver_data` when it installs the mapping, and resolves it again in
/// `set_page_valid`. The reference is only meaningful while the PID's page
/// table still exists.
#[derive(Debug, Clone)]
pub struct PhysPage {
    /// Page-aligned base address of the frame.
    pub addr: u64,
    /// Driver-owned back-reference to the leaf entry, set by `set_mapping`.
    pub driver_data: Option<MappingRef>,
}

impl PhysPage {
    /// Wrap a freshly allocated frame with no mapping installed yet.
    #[must_use]
    pub fn new(addr: u64) -> Self {
        Self {
            addr,
            driver_data: None,
        }
    }
}
