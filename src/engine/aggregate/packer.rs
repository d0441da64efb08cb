//! Container placement: which container a file goes into, and when containers seal.

use anyhow::Result;

use crate::types::ContainerId;

/// Where one file lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Container to seal before writing this file.
    pub seal_before: Option<ContainerId>,
    pub container: ContainerId,
    pub offset: u64,
    /// Seal `container` right after this file (oversized containers hold one file).
    pub seal_after: bool,
}

#[derive(Clone, Copy, Debug)]
struct Open {
    id: ContainerId,
    used: u64,
    files: usize,
}

/// Pure placement state. Knows sizes and ids, never touches disk, so dry runs use it for estimates.
#[derive(Debug)]
pub struct Packer {
    max_size: u64,
    next_seq: u32,
    current: Option<Open>,
    opened: usize,
}

impl Packer {
    pub fn new(max_size: u64, next_seq: u32) -> Self {
        Self {
            max_size,
            next_seq,
            current: None,
            opened: 0,
        }
    }

    fn take_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.opened += 1;
        seq
    }

    /// Take the current container if it holds anything.
    fn close_current(&mut self) -> Option<ContainerId> {
        self.current.take().filter(|c| c.files > 0).map(|c| c.id)
    }

    /// Place a file of `size` bytes.
    pub fn place(&mut self, size: u64) -> Result<Slot> {
        if size > self.max_size {
            let seal_before = self.close_current();
            let container = ContainerId::oversized(self.next_seq)?;
            self.take_seq();
            return Ok(Slot {
                seal_before,
                container,
                offset: 0,
                seal_after: true,
            });
        }

        let mut seal_before = None;
        if let Some(cur) = self.current
            && cur.files > 0
            && cur.used + size > self.max_size
        {
            seal_before = self.close_current();
        }

        let mut cur = match self.current {
            Some(cur) => cur,
            None => {
                let id = ContainerId::regular(self.next_seq)?;
                self.take_seq();
                Open {
                    id,
                    used: 0,
                    files: 0,
                }
            }
        };
        let offset = cur.used;
        cur.used += size;
        cur.files += 1;
        self.current = Some(cur);
        Ok(Slot {
            seal_before,
            container: cur.id,
            offset,
            seal_after: false,
        })
    }

    /// Undo the most recent placement in the current container (its source could not be read).
    pub fn rollback(&mut self, slot: &Slot, size: u64) {
        if let Some(ref mut cur) = self.current
            && cur.id == slot.container
            && cur.used == slot.offset + size
        {
            cur.used = slot.offset;
            cur.files -= 1;
        }
    }

    /// End of input: the container still open, if it holds anything.
    pub fn finish(&mut self) -> Option<ContainerId> {
        self.close_current()
    }

    /// Containers opened so far (including empty ones after a rollback).
    pub fn opened(&self) -> usize {
        self.opened
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }
}
