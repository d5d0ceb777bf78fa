use std::fmt;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::geometry::Geometry;
use crate::store::BlockNumber;

/// Marks an unallocated direct block slot in the on-disk encoding only. In
/// memory the slot is `None`.
const NO_BLOCK: u32 = u32::MAX;

const STATUS_FREE: u32 = 0;
const STATUS_IN_USE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeStatus {
    Free,
    InUse,
}

/// Metadata for one file: its name, its size in bytes and the data blocks
/// holding its content, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub status: InodeStatus,
    pub name: String,
    pub file_size: usize,
    pub direct_blocks: Vec<Option<BlockNumber>>,
}

impl Inode {
    /// An unused slot sized for `geometry`.
    pub fn free(geometry: &Geometry) -> Self {
        Self {
            status: InodeStatus::Free,
            name: String::new(),
            file_size: 0,
            direct_blocks: vec![None; geometry.max_blocks_per_file],
        }
    }

    /// A freshly created, empty file.
    pub fn new_file(name: &str, geometry: &Geometry) -> Self {
        Self {
            status: InodeStatus::InUse,
            name: name.to_string(),
            ..Self::free(geometry)
        }
    }

    pub fn in_use(&self) -> bool {
        self.status == InodeStatus::InUse
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.in_use() && self.name == name
    }

    /// Blocks owned by this inode.
    pub fn allocated_blocks(&self) -> impl Iterator<Item = BlockNumber> + '_ {
        self.direct_blocks.iter().filter_map(|slot| *slot)
    }
}

impl fmt::Display for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} \"{}\" size={} blocks=[", self.status, self.name, self.file_size)?;
        for (i, slot) in self.direct_blocks.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match slot {
                Some(nr) => write!(f, "{}", nr)?,
                None => write!(f, "-")?,
            }
        }
        write!(f, "]")
    }
}

/// Fixed header at the start of every on-disk inode record. It is followed by
/// `max_name_len` bytes of NUL padded name and then `max_blocks_per_file`
/// little endian `u32` block numbers.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Copy, Debug)]
struct InodeHeader {
    status: u32,
    file_size: u32,
    name_len: u32,
}

const HEADER_LEN: usize = std::mem::size_of::<InodeHeader>();

/// Bytes needed to encode one inode for `geometry`.
pub fn record_len(geometry: &Geometry) -> usize {
    HEADER_LEN + geometry.max_name_len + 4 * geometry.max_blocks_per_file
}

/// Encodes `node` into the front of `buf`, which must hold at least
/// `record_len` bytes.
pub fn serialize(node: &Inode, geometry: &Geometry, buf: &mut [u8]) {
    let header = InodeHeader {
        status: match node.status {
            InodeStatus::Free => STATUS_FREE,
            InodeStatus::InUse => STATUS_IN_USE,
        },
        file_size: node.file_size as u32,
        name_len: node.name.len() as u32,
    };
    buf[..HEADER_LEN].copy_from_slice(header.as_bytes());

    let name_area = &mut buf[HEADER_LEN..HEADER_LEN + geometry.max_name_len];
    for b in name_area.iter_mut() {
        *b = 0;
    }
    name_area[..node.name.len()].copy_from_slice(node.name.as_bytes());

    let blocks_start = HEADER_LEN + geometry.max_name_len;
    for (i, slot) in node.direct_blocks.iter().enumerate() {
        let raw = slot.map(|nr| nr as u32).unwrap_or(NO_BLOCK);
        let at = blocks_start + 4 * i;
        buf[at..at + 4].copy_from_slice(&raw.to_le_bytes());
    }
}

/// Decodes an inode record. A zeroed record decodes as a free inode, so a
/// freshly cleared inode table needs no further initialization. Returns `None`
/// if the record is not consistent with `geometry`.
pub fn parse(buf: &[u8], geometry: &Geometry) -> Option<Inode> {
    if buf.len() < record_len(geometry) {
        return None;
    }
    let header = InodeHeader::read_from(&buf[..HEADER_LEN])?;
    let status = match header.status {
        STATUS_FREE => InodeStatus::Free,
        STATUS_IN_USE => InodeStatus::InUse,
        _ => return None,
    };
    if status == InodeStatus::Free {
        return Some(Inode::free(geometry));
    }

    let name_len = header.name_len as usize;
    if name_len >= geometry.max_name_len {
        return None;
    }
    let name_bytes = &buf[HEADER_LEN..HEADER_LEN + name_len];
    let name = String::from_utf8(name_bytes.to_vec()).ok()?;

    let file_size = header.file_size as usize;
    if file_size > geometry.max_file_size() {
        return None;
    }

    let blocks_start = HEADER_LEN + geometry.max_name_len;
    let direct_blocks = buf[blocks_start..blocks_start + 4 * geometry.max_blocks_per_file]
        .chunks_exact(4)
        .map(|raw| {
            let mut le = [0; 4];
            le.copy_from_slice(raw);
            match u32::from_le_bytes(le) {
                NO_BLOCK => None,
                nr => Some(nr as BlockNumber),
            }
        })
        .collect();

    Some(Inode {
        status,
        name,
        file_size,
        direct_blocks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_file_starts_empty_with_no_blocks() {
        let g = Geometry::default();
        let node = Inode::new_file("a.txt", &g);
        assert!(node.is_named("a.txt"));
        assert_eq!(node.file_size, 0);
        assert_eq!(node.direct_blocks.len(), g.max_blocks_per_file);
        assert_eq!(node.allocated_blocks().count(), 0);
    }

    #[test]
    fn free_inode_matches_no_name() {
        let g = Geometry::default();
        let node = Inode::free(&g);
        assert!(!node.is_named(""));
    }

    #[test]
    fn encoded_inode_decodes_to_same_inode() {
        let g = Geometry::default();
        let mut node = Inode::new_file("b.bin", &g);
        node.file_size = 70;
        node.direct_blocks[0] = Some(3);
        node.direct_blocks[1] = Some(0);

        let mut buf = vec![0xff; g.block_size];
        serialize(&node, &g, &mut buf);
        assert_eq!(parse(&buf, &g), Some(node));
    }

    #[test]
    fn zeroed_record_decodes_as_free_inode() {
        let g = Geometry::default();
        let buf = vec![0; record_len(&g)];
        assert_eq!(parse(&buf, &g), Some(Inode::free(&g)));
    }

    #[test]
    fn record_with_unknown_status_is_rejected() {
        let g = Geometry::default();
        let mut buf = vec![0; record_len(&g)];
        buf[..4].copy_from_slice(&7u32.to_ne_bytes());
        assert_eq!(parse(&buf, &g), None);
    }

    #[test]
    fn display_marks_unallocated_slots() {
        let g = Geometry::default();
        let mut node = Inode::new_file("c", &g);
        node.direct_blocks[0] = Some(5);
        assert_eq!(node.to_string(), "InUse \"c\" size=0 blocks=[5 - - -]");
    }
}
