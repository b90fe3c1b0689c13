//! Thread control block and the thread arena (component G's data model).

#![allow(dead_code)]

extern crate alloc;

use alloc::vec::Vec;

use crate::arch::x86::context::Context;
use crate::sched::queue::{Links, LinkedTable, ThreadId};

pub const IDLE_PRIORITY: u8 = 63;
pub const MAX_PRIORITY: u8 = 63;
pub const SCRATCH_SIZE: usize = 1024;
const NAME_CAP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    Kernel,
    User,
}

/// Stable numeric IDs matching the introspection ABI (`threads_info`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    Running = 0,
    Ready = 1,
    Sleeping = 2,
    Dead = 3,
    Zombie = 4,
    Joining = 5,
    Waiting = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitType {
    Sem,
    Mutex,
    IoKeyboard,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnState {
    Returned,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Normal,
    DivByZero,
    Panic,
}

/// A resource registered via `add_resource`, run in reverse registration
/// order when the owning thread is reaped. Tagged with a token rather than
/// identified by index, since `remove_resource` must stay valid for sibling
/// entries after one in the middle is removed.
pub struct Resource {
    pub token: u32,
    pub payload: usize,
    pub cleanup: fn(usize),
}

pub struct Thread {
    pub id: ThreadId,
    pub parent: Option<ThreadId>,
    name: [u8; NAME_CAP],
    name_len: u8,
    pub kind: ThreadKind,
    pub initial_priority: u8,
    pub priority: u8,
    /// Priority saved before an elevation (priority inheritance), restored
    /// on the matching unlock.
    pub saved_priority: Option<u8>,
    pub state: ThreadState,
    /// Set by a mutex's holder-death cleanup so a woken futex waiter can
    /// tell a normal wake from one caused by its holder dying mid-wait.
    pub owner_died: bool,
    pub wait_type: Option<WaitType>,
    pub return_state: Option<ReturnState>,
    pub termination_cause: Option<TerminationCause>,
    pub entry: usize,
    pub arg: usize,
    pub retval: i32,
    pub context: Context,
    pub stack_base: usize,
    pub stack_size: usize,
    pub scratch: [u8; SCRATCH_SIZE],
    pub wakeup_time: u64,
    pub links: Links,
    pub children: Vec<ThreadId>,
    pub joiners: Vec<ThreadId>,
    pub resources: Vec<Resource>,
    resource_seq: u32,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub affinity: u8,
}

impl Thread {
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let n = bytes.len().min(NAME_CAP);
        self.name[..n].copy_from_slice(&bytes[..n]);
        self.name_len = n as u8;
    }

    /// Registers a cleanup to run (in reverse order) when this thread is
    /// reaped. Returns a token stable across later removals of other
    /// resources.
    pub fn add_resource(&mut self, payload: usize, cleanup: fn(usize)) -> u32 {
        let token = self.resource_seq;
        self.resource_seq += 1;
        self.resources.push(Resource { token, payload, cleanup });
        token
    }

    pub fn remove_resource(&mut self, token: u32) -> bool {
        if let Some(i) = self.resources.iter().position(|r| r.token == token) {
            self.resources.remove(i);
            true
        } else {
            false
        }
    }
}

/// Dense arena of threads, indexed by [`ThreadId`]; dead slots are recycled
/// via a free list so ids stay small and stable for the lifetime of a
/// thread.
pub struct ThreadTable {
    slots: Vec<Option<Thread>>,
    free: Vec<ThreadId>,
}

impl ThreadTable {
    pub const fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new() }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        &mut self,
        parent: Option<ThreadId>,
        name: &str,
        kind: ThreadKind,
        priority: u8,
        affinity: u8,
        context: Context,
        stack_base: usize,
        stack_size: usize,
        entry: usize,
        arg: usize,
        now: u64,
    ) -> ThreadId {
        let mut thread = Thread {
            id: 0,
            parent,
            name: [0; NAME_CAP],
            name_len: 0,
            kind,
            initial_priority: priority,
            priority,
            saved_priority: None,
            state: ThreadState::Ready,
            owner_died: false,
            wait_type: None,
            return_state: None,
            termination_cause: None,
            entry,
            arg,
            retval: 0,
            context,
            stack_base,
            stack_size,
            scratch: [0; SCRATCH_SIZE],
            wakeup_time: 0,
            links: Links::default(),
            children: Vec::new(),
            joiners: Vec::new(),
            resources: Vec::new(),
            resource_seq: 0,
            start_time: now,
            end_time: None,
            affinity,
        };
        thread.set_name(name);

        let id = if let Some(id) = self.free.pop() {
            thread.id = id;
            self.slots[id as usize] = Some(thread);
            id
        } else {
            let id = self.slots.len() as ThreadId;
            thread.id = id;
            self.slots.push(Some(thread));
            id
        };
        if let Some(parent_id) = parent {
            if let Some(p) = self.get_mut(parent_id) {
                p.children.push(id);
            }
        }
        id
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.slots.get_mut(id as usize)?.as_mut()
    }

    /// Reclaims a DEAD thread's slot for reuse. Callers must have already
    /// walked its resource list and reparented its children.
    pub fn reap(&mut self, id: ThreadId) -> Option<Thread> {
        let thread = self.slots.get_mut(id as usize)?.take()?;
        self.free.push(id);
        Some(thread)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i as ThreadId))
    }
}

impl LinkedTable for ThreadTable {
    fn links(&self, id: ThreadId) -> Links {
        self.get(id).map(|t| t.links).unwrap_or_default()
    }

    fn set_links(&mut self, id: ThreadId, links: Links) {
        if let Some(t) = self.get_mut(id) {
            t.links = links;
        }
    }

    fn priority(&self, id: ThreadId) -> u8 {
        self.get(id).map(|t| t.priority).unwrap_or(IDLE_PRIORITY)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn spawn_test(table: &mut ThreadTable, name: &str, prio: u8) -> ThreadId {
        table.spawn(
            None,
            name,
            ThreadKind::Kernel,
            prio,
            0,
            Context { esp: 0 },
            0,
            0,
            0,
            0,
            0,
        )
    }

    #[test]
    fn test_spawn_reap_recycles_slot() {
        let mut table = ThreadTable::new();
        let a = spawn_test(&mut table, "a", 10);
        table.reap(a);
        let b = spawn_test(&mut table, "b", 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_resource_tokens_survive_middle_removal() {
        let mut table = ThreadTable::new();
        let id = spawn_test(&mut table, "t", 10);
        let t = table.get_mut(id).unwrap();
        let r0 = t.add_resource(1, |_| {});
        let r1 = t.add_resource(2, |_| {});
        let r2 = t.add_resource(3, |_| {});
        assert!(t.remove_resource(r1));
        assert_eq!(t.resources.len(), 2);
        assert_eq!(t.resources[0].token, r0);
        assert_eq!(t.resources[1].token, r2);
    }

    #[test]
    fn test_name_truncation() {
        let mut table = ThreadTable::new();
        let id = spawn_test(&mut table, "short", 0);
        assert_eq!(table.get(id).unwrap().name(), "short");
    }
}
