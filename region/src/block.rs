use core::fmt;

use serde::Serialize;

/// Identifier of the process that owns an occupied block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct OwnerId(pub u32);

impl OwnerId {
    /// Pattern written over a freshly occupied block's backing bytes.
    pub fn fill_byte(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockKind {
    Hole,
    Occupied(OwnerId),
}

impl BlockKind {
    pub fn is_hole(self) -> bool {
        matches!(self, BlockKind::Hole)
    }

    pub fn owner(self) -> Option<OwnerId> {
        match self {
            BlockKind::Hole => None,
            BlockKind::Occupied(owner) => Some(owner),
        }
    }
}

/// Byte range of the backing buffer mirrored by a block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BackingRange {
    pub offset: usize,
    pub len: usize,
}

impl BackingRange {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Identity of a buddy-split parent, restored when its two halves merge back.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Ancestor {
    pub(crate) id: BlockId,
    pub(crate) buddy: Option<BlockId>,
}

/// A contiguous logical range `[start, end]` (both inclusive).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    pub(crate) kind: BlockKind,
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) id: BlockId,
    pub(crate) buddy: Option<BlockId>,
    pub(crate) backing: Option<BackingRange>,
    // Innermost parent last.
    pub(crate) lineage: Vec<Ancestor>,
}

impl Block {
    pub(crate) fn new(kind: BlockKind, start: usize, end: usize, id: BlockId) -> Self {
        debug_assert!(start <= end);
        Self {
            kind,
            start,
            end,
            id,
            buddy: None,
            backing: None,
            lineage: Vec::new(),
        }
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn is_hole(&self) -> bool {
        self.kind.is_hole()
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.kind.owner()
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn buddy(&self) -> Option<BlockId> {
        self.buddy
    }

    pub fn backing(&self) -> Option<BackingRange> {
        self.backing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_inclusive() {
        let block = Block::new(BlockKind::Hole, 256, 355, BlockId(1));
        assert_eq!(block.size(), 100);
        assert!(block.is_hole());
        assert_eq!(block.owner(), None);
    }

    #[test]
    fn owner_fill_byte_wraps() {
        assert_eq!(OwnerId(3).fill_byte(), 3);
        assert_eq!(OwnerId(0x1_02).fill_byte(), 2);
        assert_eq!(OwnerId(7).to_string(), "P7");
    }
}
