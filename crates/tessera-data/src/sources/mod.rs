// Built-in data source kinds.

pub mod file;
pub mod http;

pub use file::{FileConfig, FileFactory, FileSource, Format};
pub use http::{HttpConfig, HttpFactory, HttpSource};
