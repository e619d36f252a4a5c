//! Exactly-once connection release.
//!
//! A [`ConnectionLease`] holds a borrowed connection on behalf of one
//! exchange. Whichever of [`release`](ConnectionLease::release),
//! [`abandon`](ConnectionLease::abandon) or drop happens first decides the
//! connection's fate; the others are no-ops.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::pool::{BorrowedConnection, Connection, ConnectionPool};

pub struct ConnectionLease {
    connection: Mutex<Option<BorrowedConnection>>,
    pool: Arc<dyn ConnectionPool>,
}

impl ConnectionLease {
    pub fn new(pool: Arc<dyn ConnectionPool>, connection: BorrowedConnection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
            pool,
        }
    }

    /// The leased connection, unless already released or abandoned.
    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.lock().as_ref().map(|c| c.connection().clone())
    }

    pub fn is_settled(&self) -> bool {
        self.connection.lock().is_none()
    }

    /// Return the connection to the pool. Returns false if already settled.
    pub fn release(&self) -> bool {
        let Some(connection) = self.connection.lock().take() else {
            return false;
        };
        trace!(connection = %connection.id(), "Lease released");
        if let Err(e) = self.pool.return_connection(connection) {
            error!(error = %e, "Connection return rejected by pool");
        }
        true
    }

    /// Close the connection instead of reusing it. Returns false if already
    /// settled.
    pub fn abandon(&self) -> bool {
        let Some(connection) = self.connection.lock().take() else {
            return false;
        };
        trace!(connection = %connection.id(), "Lease abandoned");
        if let Err(e) = self.pool.close_connection(connection) {
            error!(error = %e, "Connection close rejected by pool");
        }
        true
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.abandon();
    }
}
