//! Pages and the jump protocol.
//!
//! The zone database (layout editor, fonts, geometry) is an external
//! collaborator; the kernel sees pages as ids with an ordered list of
//! zones, each declaring a kind and an update-flag mask.

use serde::{Deserialize, Serialize};

use crate::error::{PosError, PosResult};

/// Pages the jump stack can hold before the oldest entry is dropped.
pub const PAGE_STACK_LIMIT: usize = 32;

/// Well-known page ids; everything else comes from the zone database.
pub const PAGE_LOGIN: PageId = PageId(1);

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
pub struct PageId(pub i32);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JumpKind {
    /// Don't jump.
    None,
    /// Jump, pushing the current page onto the stack.
    Normal,
    /// Jump without touching the stack.
    Stealth,
    /// Pop the stack and jump to what was there.
    Return,
    /// Jump to the signed-in employee's home page.
    Home,
    /// Jump to the next page in the running script.
    Script,
    /// Jump to the current page's index page.
    Index,
    /// Like `Normal`, but a password must be entered first.
    Password,
}

/// Kinds of zones the kernel dispatches signals to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ZoneKind {
    Login,
    OrderEntry,
    Settle,
    SplitCheck,
    Manager,
    /// Passive display; never consumes signals.
    Display,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: u32,
    pub kind: ZoneKind,
    /// Which update flags force this zone to redraw.
    pub update_mask: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    /// The employee home page this page belongs to, if any.
    pub index_page: Option<PageId>,
    /// Next page when running a script.
    pub script_next: Option<PageId>,
    /// Zones in z-order, frontmost first.
    pub zones: Vec<Zone>,
}

impl Page {
    pub fn bare(id: PageId) -> Self {
        Self {
            id,
            index_page: None,
            script_next: None,
            zones: Vec::new(),
        }
    }
}

/// The zone database boundary: hand the kernel a page graph.
pub trait PageSource: Send + Sync {
    fn page(&self, id: PageId) -> Option<Page>;
    /// The home page for an employee (by id), or the login page.
    fn home_page(&self, employee_id: Option<u32>) -> PageId;
}

/// A fixed in-memory page graph; the production zone database is
/// adapted to this, tests build it directly.
#[derive(Default)]
pub struct StaticPages {
    pages: Vec<Page>,
    home: Option<PageId>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.pages.push(page);
        self
    }

    pub fn with_home(mut self, home: PageId) -> Self {
        self.home = Some(home);
        self
    }
}

impl PageSource for StaticPages {
    fn page(&self, id: PageId) -> Option<Page> {
        self.pages.iter().find(|p| p.id == id).cloned()
    }

    fn home_page(&self, _employee_id: Option<u32>) -> PageId {
        self.home.unwrap_or(PAGE_LOGIN)
    }
}

/// The page position of one terminal: current page plus bounded stack.
#[derive(Clone, Debug, Default)]
pub struct PageStack {
    stack: Vec<PageId>,
}

impl PageStack {
    pub fn push(&mut self, id: PageId) {
        if self.stack.len() == PAGE_STACK_LIMIT {
            self.stack.remove(0);
        }
        self.stack.push(id);
    }

    pub fn pop(&mut self) -> Option<PageId> {
        self.stack.pop()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// Validates a jump target exists in the source.
pub fn resolve_target(
    source: &dyn PageSource,
    id: PageId,
) -> PosResult<Page> {
    source
        .page(id)
        .ok_or_else(|| PosError::protocol(format!("no page {}", id.0)))
}
