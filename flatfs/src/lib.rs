//! A flat file system: a fixed table of uniquely named files, each made of a
//! fixed number of direct data blocks, over a pluggable block store.
//!
//! ```
//! use flatfs::{FlatFs, MemStore};
//!
//! let mut fs = FlatFs::new(MemStore::default());
//! fs.create("a.txt").unwrap();
//! let fd = fs.open("a.txt").unwrap();
//! fs.write(fd, b"HelloWorld").unwrap();
//!
//! let mut buf = [0; 10];
//! fs.read(fd, &mut buf).unwrap();
//! assert_eq!(&buf, b"HelloWorld");
//! ```
mod alloc;
mod fs;
pub mod geometry;
mod handle;
pub mod io;
mod node;
mod sb;
pub mod store;

pub use crate::fs::{FlatFs, FsError, Resource};
pub use crate::geometry::Geometry;
pub use crate::handle::Handle;
pub use crate::node::{Inode, InodeStatus};
pub use crate::store::{device_blocks, BlockStore, DiskStore, MemStore};
