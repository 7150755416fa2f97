use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::backend::BackendConnection;
use crate::models::Target;

use super::TargetPool;

/// A connection borrowed from the pool.
///
/// Dropping the guard returns the connection: back onto the idle stack when it
/// still reports open, otherwise it is closed. Release never blocks on I/O.
pub struct PooledConnection {
    pool: Arc<TargetPool>,
    id: u64,
    conn: Arc<dyn BackendConnection>,
    discard: bool,
}

impl PooledConnection {
    pub(super) fn new(pool: Arc<TargetPool>, id: u64, conn: Arc<dyn BackendConnection>) -> Self {
        Self {
            pool,
            id,
            conn,
            discard: false,
        }
    }

    /// Pool-unique id of the underlying connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &Target {
        &self.pool.target
    }

    /// Return the connection to the pool now.
    pub fn release(self) {}

    /// Close the connection instead of returning it to the idle stack.
    pub fn discard(mut self) {
        self.discard = true;
    }
}

impl Deref for PooledConnection {
    type Target = dyn BackendConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool
            .release(self.id, Arc::clone(&self.conn), self.discard);
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("target", &self.pool.target)
            .field("id", &self.id)
            .finish()
    }
}

/// A slot counted against `max_connections` while its connection is being
/// opened outside the lock. Dropping an unconsumed reservation frees the slot,
/// which keeps the count right when the opening future is cancelled.
pub(super) struct Reservation {
    pool: Arc<TargetPool>,
    consumed: bool,
}

impl Reservation {
    /// Wrap a slot already added to `pending` under the lock.
    pub(super) fn claimed(pool: Arc<TargetPool>) -> Self {
        Self {
            pool,
            consumed: false,
        }
    }

    pub(super) fn into_active(
        mut self,
        id: u64,
        conn: Arc<dyn BackendConnection>,
    ) -> PooledConnection {
        self.consumed = true;
        self.pool.activate_reserved(id);
        PooledConnection::new(Arc::clone(&self.pool), id, conn)
    }

    pub(super) fn into_idle(mut self, id: u64, conn: Arc<dyn BackendConnection>) {
        self.consumed = true;
        self.pool.park_reserved(id, conn);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.consumed {
            self.pool.cancel_reservation();
        }
    }
}
