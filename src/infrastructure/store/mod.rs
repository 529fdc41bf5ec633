pub mod file;
pub mod memory;

pub use file::FileStateRepository;
pub use memory::MemoryStateRepository;
