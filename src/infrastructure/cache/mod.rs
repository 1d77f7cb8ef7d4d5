pub mod archive;
pub mod hot;
pub mod warm;

pub use archive::ColdArchive;
pub use hot::{HotCache, WindowKey};
pub use warm::WarmCache;
