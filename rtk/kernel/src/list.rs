//! Intrusive doubly linked index lists.
//!
//! The ready queue, every wait queue and the timer list thread their members
//! through link fields stored inside an arena (the thread table or the timer
//! table). A [`Queue`] only holds head and tail indices; the arena owns the
//! nodes, so a recycled slot can never leave a dangling pointer behind, only
//! a link that fails the vacancy check.

/// Slot index inside an arena.
pub type Index = u16;

/// Per-node link fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    pub prev: Option<Index>,
    pub next: Option<Index>,
}

impl Link {
    /// Link of a node that is not in any list
    pub const UNLINKED: Link = Link {
        prev: None,
        next: None,
    };
}

/// A link referenced a vacant slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corrupted;

/// Storage that owns the link fields of a family of nodes.
pub trait Arena {
    /// Link fields of `index`, failing if the slot is vacant
    fn link(&self, index: Index) -> Result<Link, Corrupted>;

    /// Mutable link fields of `index`, failing if the slot is vacant
    fn link_mut(&mut self, index: Index) -> Result<&mut Link, Corrupted>;
}

/// Head/tail pair of an intrusive list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Queue {
    head: Option<Index>,
    tail: Option<Index>,
}

impl Queue {
    /// An empty queue
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// First member, without removing it
    pub const fn front(&self) -> Option<Index> {
        self.head
    }

    /// Append `index` at the tail.
    pub fn push_back<A: Arena + ?Sized>(
        &mut self,
        arena: &mut A,
        index: Index,
    ) -> Result<(), Corrupted> {
        let tail = self.tail;
        *arena.link_mut(index)? = Link {
            prev: tail,
            next: None,
        };
        match tail {
            Some(tail) => arena.link_mut(tail)?.next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        Ok(())
    }

    /// Insert `index` in front of the first member for which `before`
    /// returns true, or at the tail if there is none.
    ///
    /// Members that compare equal are skipped, which keeps insertion FIFO
    /// among equals as long as `before` is a strict comparison.
    pub fn insert_by<A, F>(&mut self, arena: &mut A, index: Index, mut before: F) -> Result<(), Corrupted>
    where
        A: Arena + ?Sized,
        F: FnMut(&A, Index) -> bool,
    {
        let mut cursor = self.head;
        while let Some(at) = cursor {
            if before(arena, at) {
                return self.insert_before(arena, index, at);
            }
            cursor = arena.link(at)?.next;
        }
        self.push_back(arena, index)
    }

    fn insert_before<A: Arena + ?Sized>(
        &mut self,
        arena: &mut A,
        index: Index,
        at: Index,
    ) -> Result<(), Corrupted> {
        let prev = arena.link(at)?.prev;
        *arena.link_mut(index)? = Link {
            prev,
            next: Some(at),
        };
        arena.link_mut(at)?.prev = Some(index);
        match prev {
            Some(prev) => arena.link_mut(prev)?.next = Some(index),
            None => self.head = Some(index),
        }
        Ok(())
    }

    /// Unlink `index`, which must be a member of this queue.
    pub fn remove<A: Arena + ?Sized>(&mut self, arena: &mut A, index: Index) -> Result<(), Corrupted> {
        let link = arena.link(index)?;
        match link.prev {
            Some(prev) => arena.link_mut(prev)?.next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => arena.link_mut(next)?.prev = link.prev,
            None => self.tail = link.prev,
        }
        *arena.link_mut(index)? = Link::UNLINKED;
        Ok(())
    }

    /// Remove and return the head.
    pub fn pop_front<A: Arena + ?Sized>(&mut self, arena: &mut A) -> Result<Option<Index>, Corrupted> {
        match self.head {
            Some(head) => {
                self.remove(arena, head)?;
                Ok(Some(head))
            }
            None => Ok(None),
        }
    }

    /// Iterate over the members, head first. Iteration stops early at a
    /// corrupted link.
    pub fn iter<'a, A: Arena + ?Sized>(&self, arena: &'a A) -> Iter<'a, A> {
        Iter {
            arena,
            cursor: self.head,
        }
    }

    #[cfg(test)]
    pub fn len<A: Arena + ?Sized>(&self, arena: &A) -> usize {
        self.iter(arena).count()
    }
}

/// Iterator over queue members.
pub struct Iter<'a, A: ?Sized> {
    arena: &'a A,
    cursor: Option<Index>,
}

impl<A: Arena + ?Sized> Iterator for Iter<'_, A> {
    type Item = Index;

    fn next(&mut self) -> Option<Index> {
        let at = self.cursor?;
        self.cursor = self.arena.link(at).ok().and_then(|link| link.next);
        Some(at)
    }
}
