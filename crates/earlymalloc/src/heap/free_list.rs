//! Segregated free lists with offset links.
//!
//! Every list is circular and doubly linked through a sentinel head that is
//! never a block. Links are offsets in quanta from the arena header, resolved
//! through a [`LinkSpace`] that rejects anything out of bounds. A free block
//! keeps its `FreeLink` in its first quantum and the link is zeroed when the
//! block leaves its list.

use crate::hardening::InternalFault;
use core::sync::atomic::{AtomicU64, Ordering};

/// Offset in quanta from the arena header base.
pub type Link = u64;

/// Intrusive list node, one quantum wide.
#[repr(C, align(16))]
#[derive(Debug, Default)]
pub struct FreeLink {
    pub prev: AtomicU64,
    pub next: AtomicU64,
}

const _: () = assert!(core::mem::size_of::<FreeLink>() == crate::util::QUANTUM);

impl FreeLink {
    pub const fn new() -> Self {
        FreeLink {
            prev: AtomicU64::new(0),
            next: AtomicU64::new(0),
        }
    }

    #[inline]
    fn prev(&self) -> Link {
        self.prev.load(Ordering::Relaxed)
    }

    #[inline]
    fn next(&self) -> Link {
        self.next.load(Ordering::Relaxed)
    }

    #[inline]
    fn set(&self, prev: Link, next: Link) {
        self.prev.store(prev, Ordering::Relaxed);
        self.next.store(next, Ordering::Relaxed);
    }
}

/// Resolves links to nodes.
pub trait LinkSpace {
    /// The node at `link`, or `LinkOutOfBounds` if `link` names neither a
    /// list head nor a block below the frontier.
    fn node(&self, link: Link) -> Result<&FreeLink, InternalFault>;
}

/// Make `head` an empty list.
pub fn init_head<S: LinkSpace + ?Sized>(space: &S, head: Link) -> Result<(), InternalFault> {
    space.node(head)?.set(head, head);
    Ok(())
}

/// First entry of the list at `head`, or `None` if it is empty.
pub fn first<S: LinkSpace + ?Sized>(space: &S, head: Link) -> Result<Option<Link>, InternalFault> {
    let next = space.node(head)?.next();
    Ok(if next == head { None } else { Some(next) })
}

/// Push `block` at the front of the list at `head`.
pub fn insert<S: LinkSpace + ?Sized>(space: &S, head: Link, block: Link) -> Result<(), InternalFault> {
    let [head_node, old_first_node] = head_nodes(space, head)?;
    let block_node = space.node(block)?;
    let old_first = head_node.next();
    block_node.set(head, old_first);
    old_first_node.prev.store(block, Ordering::Relaxed);
    head_node.next.store(block, Ordering::Relaxed);
    Ok(())
}

/// Check that the list at `head` can take an `insert` without changing it.
pub fn verify_head<S: LinkSpace + ?Sized>(space: &S, head: Link) -> Result<(), InternalFault> {
    head_nodes(space, head).map(|_| ())
}

fn head_nodes<S: LinkSpace + ?Sized>(space: &S, head: Link) -> Result<[&FreeLink; 2], InternalFault> {
    let head_node = space.node(head)?;
    let old_first_node = space.node(head_node.next())?;
    if old_first_node.prev() != head {
        return Err(InternalFault::FreeListCorrupted);
    }
    Ok([head_node, old_first_node])
}

/// Unlink `block` from whatever list holds it and zero its link.
pub fn remove<S: LinkSpace + ?Sized>(space: &S, block: Link) -> Result<(), InternalFault> {
    let [node, prev_node, next_node] = linked_nodes(space, block)?;
    let prev = node.prev();
    let next = node.next();
    prev_node.next.store(next, Ordering::Relaxed);
    next_node.prev.store(prev, Ordering::Relaxed);
    node.set(0, 0);
    Ok(())
}

/// Check that `block` sits in a consistent list without changing it.
pub fn verify<S: LinkSpace + ?Sized>(space: &S, block: Link) -> Result<(), InternalFault> {
    linked_nodes(space, block).map(|_| ())
}

fn linked_nodes<S: LinkSpace + ?Sized>(space: &S, block: Link) -> Result<[&FreeLink; 3], InternalFault> {
    let node = space.node(block)?;
    let prev_node = space.node(node.prev())?;
    let next_node = space.node(node.next())?;
    if prev_node.next() != block || next_node.prev() != block {
        return Err(InternalFault::FreeListCorrupted);
    }
    Ok([node, prev_node, next_node])
}

/// Walk the list at `head`, failing with `FreeListCorrupted` once more than
/// `limit` entries have been seen.
pub fn entries<S: LinkSpace + ?Sized>(space: &S, head: Link, limit: usize) -> Entries<'_, S> {
    Entries {
        space,
        head,
        cursor: head,
        remaining: limit,
        done: false,
    }
}

pub struct Entries<'s, S: ?Sized> {
    space: &'s S,
    head: Link,
    cursor: Link,
    remaining: usize,
    done: bool,
}

impl<S: LinkSpace + ?Sized> Iterator for Entries<'_, S> {
    type Item = Result<Link, InternalFault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match self.space.node(self.cursor) {
            Ok(node) => node.next(),
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if next == self.head {
            self.done = true;
            return None;
        }
        if self.remaining == 0 {
            self.done = true;
            return Some(Err(InternalFault::FreeListCorrupted));
        }
        self.remaining -= 1;
        self.cursor = next;
        Some(Ok(next))
    }
}
