// src/page/mod.rs — page metadata, address translation, and overflow
// storage.

pub mod address_index;
pub mod descriptor;
pub mod info;
pub mod storage;

pub use address_index::AddressIndex;
pub use descriptor::{PageDescriptor, PageId, PageSource};
pub use info::PageInfo;
pub use storage::{MemoryPageStorage, PageStorage};
