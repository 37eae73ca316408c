//! # Redis Backend
//!
//! Production implementation of the storage contract on a Redis database.
//!
//! Columns map onto Redis lists, records onto plain string values, and the
//! batch primitive onto a `MULTI`/`EXEC` pipeline, which gives the
//! all-or-nothing guarantee the commit path relies on. A single synchronous
//! connection is shared behind a mutex; the entity store is single-writer
//! per tick, so connection pooling buys nothing here.

use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::error::StorageResult;
use crate::primitive::{PrimitiveStorage, WriteOp};

/// Redis-backed storage for one world.
pub struct RedisStorage {
    conn: Mutex<redis::Connection>,
}

impl RedisStorage {
    /// Connects to the backend described by `config`.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the address does not parse or the
    /// connection cannot be established within the dial timeout.
    pub fn connect(config: &StoreConfig) -> StorageResult<Self> {
        let client = redis::Client::open(config.url().as_str())?;
        let conn = client.get_connection_with_timeout(config.dial_timeout)?;
        tracing::info!(
            address = %config.address,
            db = config.db,
            namespace = %config.namespace,
            "connected to world storage"
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl PrimitiveStorage for RedisStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut conn = self.conn.lock();
        Ok(redis::cmd("GET").arg(key).query(&mut *conn)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        redis::cmd("SET").arg(key).arg(value).query::<()>(&mut *conn)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        redis::cmd("DEL").arg(key).query::<()>(&mut *conn)?;
        Ok(())
    }

    fn incr(&self, key: &str) -> StorageResult<i64> {
        let mut conn = self.conn.lock();
        Ok(redis::cmd("INCR").arg(key).query(&mut *conn)?)
    }

    fn list_push(&self, key: &str, value: &[u8]) -> StorageResult<u64> {
        let mut conn = self.conn.lock();
        Ok(redis::cmd("RPUSH").arg(key).arg(value).query(&mut *conn)?)
    }

    fn list_pop(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut conn = self.conn.lock();
        Ok(redis::cmd("RPOP").arg(key).query(&mut *conn)?)
    }

    fn list_range(&self, key: &str, lo: i64, hi: i64) -> StorageResult<Vec<Vec<u8>>> {
        let mut conn = self.conn.lock();
        Ok(redis::cmd("LRANGE")
            .arg(key)
            .arg(lo)
            .arg(hi)
            .query(&mut *conn)?)
    }

    fn list_len(&self, key: &str) -> StorageResult<u64> {
        let mut conn = self.conn.lock();
        Ok(redis::cmd("LLEN").arg(key).query(&mut *conn)?)
    }

    fn list_set_at(&self, key: &str, index: u64, value: &[u8]) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        redis::cmd("LSET")
            .arg(key)
            .arg(index)
            .arg(value)
            .query::<()>(&mut *conn)?;
        Ok(())
    }

    fn transaction(&self, ops: &[WriteOp]) -> StorageResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value.as_slice()).ignore();
                }
                WriteOp::Delete { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                WriteOp::ListPush { key, value } => {
                    pipe.cmd("RPUSH").arg(key).arg(value.as_slice()).ignore();
                }
                WriteOp::ListSet { key, index, value } => {
                    pipe.cmd("LSET")
                        .arg(key)
                        .arg(*index)
                        .arg(value.as_slice())
                        .ignore();
                }
                WriteOp::ListPopTail { key } => {
                    pipe.cmd("RPOP").arg(key).ignore();
                }
            }
        }
        let mut conn = self.conn.lock();
        pipe.query::<()>(&mut *conn)?;
        Ok(())
    }
}
