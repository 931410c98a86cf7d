pub mod connection;
pub mod environment;
pub mod query_history;
pub mod result;

pub use connection::*;
pub use environment::*;
pub use query_history::*;
pub use result::*;
