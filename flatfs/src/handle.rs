use std::fmt;

use crate::fs::FsError;
use crate::store::InodeNumber;

/// Identifies an open file session. The value is the index of the slot in the
/// handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for Handle {
    fn from(index: usize) -> Self {
        Handle(index)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Closed,
    Open { inum: InodeNumber, offset: usize },
    /// The file this slot was bound to has been deleted. Held until closed.
    Stale,
}

/// Fixed set of open file slots.
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Slot>,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Slot::Closed; capacity],
        }
    }

    /// Binds the lowest closed slot to `inum` with its offset at the start of
    /// the file.
    pub fn bind(&mut self, inum: InodeNumber) -> Result<Handle, FsError> {
        let index = self
            .slots
            .iter()
            .position(|slot| *slot == Slot::Closed)
            .ok_or(FsError::TooManyOpenFiles)?;
        self.slots[index] = Slot::Open { inum, offset: 0 };
        Ok(Handle(index))
    }

    /// Closes the slot. Out of range handles are ignored.
    pub fn release(&mut self, handle: Handle) {
        if let Some(slot) = self.slots.get_mut(handle.0) {
            *slot = Slot::Closed;
        }
    }

    /// The inode and offset of an open handle.
    pub fn get(&self, handle: Handle) -> Result<(InodeNumber, usize), FsError> {
        match self.slots.get(handle.0) {
            Some(Slot::Open { inum, offset }) => Ok((*inum, *offset)),
            Some(Slot::Stale) => Err(FsError::StaleHandle(handle.0)),
            _ => Err(FsError::InvalidHandle(handle.0)),
        }
    }

    pub fn set_offset(&mut self, handle: Handle, new_offset: usize) -> Result<(), FsError> {
        match self.slots.get_mut(handle.0) {
            Some(Slot::Open { offset, .. }) => {
                *offset = new_offset;
                Ok(())
            }
            Some(Slot::Stale) => Err(FsError::StaleHandle(handle.0)),
            _ => Err(FsError::InvalidHandle(handle.0)),
        }
    }

    /// Marks every slot bound to `inum` stale and returns how many there were.
    pub fn invalidate(&mut self, inum: InodeNumber) -> usize {
        let mut count = 0;
        for slot in self.slots.iter_mut() {
            if let Slot::Open { inum: bound, .. } = *slot {
                if bound == inum {
                    *slot = Slot::Stale;
                    count += 1;
                }
            }
        }
        count
    }

    /// Slots that are not closed, with their index.
    pub fn active(&self) -> impl Iterator<Item = (Handle, Slot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| **slot != Slot::Closed)
            .map(|(i, slot)| (Handle(i), *slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_uses_lowest_closed_slot() {
        let mut table = HandleTable::new(3);
        assert_eq!(table.bind(4).unwrap(), Handle(0));
        assert_eq!(table.bind(4).unwrap(), Handle(1));
        table.release(Handle(0));
        assert_eq!(table.bind(7).unwrap(), Handle(0));
        assert_eq!(table.get(Handle(0)).unwrap(), (7, 0));
    }

    #[test]
    fn full_table_refuses_to_bind() {
        let mut table = HandleTable::new(1);
        table.bind(0).unwrap();
        assert!(matches!(table.bind(0), Err(FsError::TooManyOpenFiles)));
    }

    #[test]
    fn release_is_idempotent_and_ignores_out_of_range() {
        let mut table = HandleTable::new(2);
        let h = table.bind(1).unwrap();
        table.release(h);
        table.release(h);
        table.release(Handle(99));
        assert!(matches!(table.get(h), Err(FsError::InvalidHandle(0))));
    }

    #[test]
    fn invalidated_slots_are_stale_until_released() {
        let mut table = HandleTable::new(3);
        let a = table.bind(2).unwrap();
        let b = table.bind(5).unwrap();
        let c = table.bind(2).unwrap();
        assert_eq!(table.invalidate(2), 2);

        assert!(matches!(table.get(a), Err(FsError::StaleHandle(_))));
        assert!(matches!(table.set_offset(c, 0), Err(FsError::StaleHandle(_))));
        assert_eq!(table.get(b).unwrap(), (5, 0));
        // Stale slots are not handed out again.
        assert!(matches!(table.bind(1), Err(FsError::TooManyOpenFiles)));

        table.release(a);
        assert_eq!(table.bind(1).unwrap(), a);
    }

    #[test]
    fn active_lists_open_and_stale_slots() {
        let mut table = HandleTable::new(3);
        table.bind(0).unwrap();
        let h = table.bind(1).unwrap();
        table.invalidate(1);
        let active: Vec<_> = table.active().collect();
        assert_eq!(
            active,
            vec![
                (Handle(0), Slot::Open { inum: 0, offset: 0 }),
                (h, Slot::Stale)
            ]
        );
    }
}
