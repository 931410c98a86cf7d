pub mod history;
pub mod postgres;

use futures::future::BoxFuture;

use crate::error::{ConnectionError, StatementError};
use crate::models::{ConnectionConfig, StatementOutput};

pub use postgres::PgConnector;

/// One open database session. Statements run in submission order and share
/// session state (search path, temp tables, `SET` values).
pub trait Session: Send {
    fn set_search_path<'a>(&'a mut self, schema: &'a str)
        -> BoxFuture<'a, Result<(), ConnectionError>>;

    fn run<'a>(&'a mut self, statement: &'a str)
        -> BoxFuture<'a, Result<StatementOutput, StatementError>>;

    /// Graceful shutdown. Dropping a session also releases it.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// Opens a fresh, unpooled session per call. No retries.
pub trait Connector: Send + Sync {
    fn open<'a>(
        &'a self,
        config: &'a ConnectionConfig,
    ) -> BoxFuture<'a, Result<Box<dyn Session>, ConnectionError>>;
}
