pub mod http;
pub mod memory;

pub use http::HttpChannelSource;
pub use memory::MemoryChannelSource;
