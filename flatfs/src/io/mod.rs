mod block;
mod emulator;

pub use block::{BlockStorage, DeviceBlock};
pub use emulator::{FileBlockEmulator, FileBlockEmulatorBuilder};
