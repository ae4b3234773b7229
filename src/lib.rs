pub mod batch;
pub mod binary;
pub mod bind;
pub mod block;
pub mod cli;
pub mod column;
pub mod compress;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod query;
pub mod settings;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{Batch, BatchColumn};
pub use bind::{Arg, named};
pub use block::{Block, BlockInfo};
pub use cli::{Command, prompt, write_header, write_rows};
pub use column::{Column, Registry};
pub use config::{Auth, Compression, OpenStrategy, Options, OptionsBuilder, TlsConfig};
pub use connection::Connection;
pub use error::{Error, ErrorKind, Result};
pub use pool::{Client, Stats};
pub use protocol::response::{Exception, ProfileInfo, Progress, ServerInfo};
pub use query::{QueryOptions, Release, Rows};
pub use settings::{SettingValue, Settings};
pub use value::Value;
