//! HTTP server configuration object and helpers.

use std::net::SocketAddr;

use starter::outbound::persistence::DbPool;

/// Builder-style configuration for creating the HTTP server.
pub struct ServerConfig {
    pub(crate) bind_addr: SocketAddr,
    pub(crate) db_pool: Option<DbPool>,
    pub(crate) pretty_json: bool,
    pub(crate) pretty_sql: bool,
}

impl ServerConfig {
    /// Construct a server configuration listening on `bind_addr`.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            db_pool: None,
            pretty_json: false,
            pretty_sql: false,
        }
    }

    /// Attach a database connection pool.
    ///
    /// Without one, every transactional endpoint fails with a private error.
    #[must_use]
    pub fn with_db_pool(mut self, pool: DbPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    /// Indent JSON response bodies.
    #[must_use]
    pub fn with_pretty_json(mut self, pretty_json: bool) -> Self {
        self.pretty_json = pretty_json;
        self
    }

    /// Send SQL to the database as written.
    #[must_use]
    pub fn with_pretty_sql(mut self, pretty_sql: bool) -> Self {
        self.pretty_sql = pretty_sql;
        self
    }
}
