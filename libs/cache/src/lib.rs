pub mod xfetch;

pub use xfetch::{CacheConfig, XFetchCache, XFetchEntry};
