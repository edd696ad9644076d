pub mod codec;
pub mod error;
pub mod fragment;
pub mod namespace;
pub mod table;

pub use error::Result;
pub use fragment::Fragment;
pub use namespace::Namespace;
pub use table::Table;
