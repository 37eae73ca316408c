//! # In-Memory Backend
//!
//! A process-local implementation of the storage contract.
//!
//! This is the backend tests and local development run against, the same way
//! the engine runs against an in-memory database when no real one is
//! configured. Nothing survives the process; the semantics otherwise match
//! the Redis backend, including list bounds checks and batch atomicity.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::primitive::{PrimitiveStorage, WriteOp};

/// A stored value: either raw bytes or an ordered list of byte elements.
#[derive(Clone, Debug)]
enum Value {
    Bytes(Vec<u8>),
    List(Vec<Vec<u8>>),
}

/// Process-local storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, for tests.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.inner.lock().len()
    }

    fn apply(map: &mut HashMap<String, Value>, op: &WriteOp) -> StorageResult<()> {
        match op {
            WriteOp::Set { key, value } => {
                map.insert(key.clone(), Value::Bytes(value.clone()));
            }
            WriteOp::Delete { key } => {
                map.remove(key);
            }
            WriteOp::ListPush { key, value } => {
                let entry = map
                    .entry(key.clone())
                    .or_insert_with(|| Value::List(Vec::new()));
                let Value::List(list) = entry else {
                    return Err(StorageError::WrongType {
                        key: key.clone(),
                        expected: "list",
                    });
                };
                list.push(value.clone());
            }
            WriteOp::ListSet { key, index, value } => {
                let Some(Value::List(list)) = map.get_mut(key) else {
                    return Err(StorageError::WrongType {
                        key: key.clone(),
                        expected: "list",
                    });
                };
                let slot =
                    list.get_mut(*index as usize)
                        .ok_or_else(|| StorageError::IndexOutOfRange {
                            key: key.clone(),
                            index: *index,
                        })?;
                *slot = value.clone();
            }
            WriteOp::ListPopTail { key } => {
                if let Some(Value::List(list)) = map.get_mut(key) {
                    list.pop();
                }
            }
        }
        Ok(())
    }
}

impl PrimitiveStorage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match self.inner.lock().get(key) {
            None => Ok(None),
            Some(Value::Bytes(b)) => Ok(Some(b.clone())),
            Some(Value::List(_)) => Err(StorageError::WrongType {
                key: key.to_string(),
                expected: "bytes",
            }),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.inner
            .lock()
            .insert(key.to_string(), Value::Bytes(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.lock().remove(key);
        Ok(())
    }

    fn incr(&self, key: &str) -> StorageResult<i64> {
        let mut map = self.inner.lock();
        let current = match map.get(key) {
            None => 0,
            Some(Value::Bytes(b)) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| StorageError::NotAnInteger {
                    key: key.to_string(),
                })?,
            Some(Value::List(_)) => {
                return Err(StorageError::WrongType {
                    key: key.to_string(),
                    expected: "bytes",
                })
            }
        };
        let next = current + 1;
        map.insert(
            key.to_string(),
            Value::Bytes(next.to_string().into_bytes()),
        );
        Ok(next)
    }

    fn list_push(&self, key: &str, value: &[u8]) -> StorageResult<u64> {
        let mut map = self.inner.lock();
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| Value::List(Vec::new()));
        let Value::List(list) = entry else {
            return Err(StorageError::WrongType {
                key: key.to_string(),
                expected: "list",
            });
        };
        list.push(value.to_vec());
        Ok(list.len() as u64)
    }

    fn list_pop(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut map = self.inner.lock();
        match map.get_mut(key) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(list.pop()),
            Some(Value::Bytes(_)) => Err(StorageError::WrongType {
                key: key.to_string(),
                expected: "list",
            }),
        }
    }

    fn list_range(&self, key: &str, lo: i64, hi: i64) -> StorageResult<Vec<Vec<u8>>> {
        let map = self.inner.lock();
        let list = match map.get(key) {
            None => return Ok(Vec::new()),
            Some(Value::List(list)) => list,
            Some(Value::Bytes(_)) => {
                return Err(StorageError::WrongType {
                    key: key.to_string(),
                    expected: "list",
                })
            }
        };
        let len = list.len() as i64;
        let resolve = |idx: i64| if idx < 0 { len + idx } else { idx };
        let lo = resolve(lo).max(0);
        let hi = resolve(hi).min(len - 1);
        if lo > hi || len == 0 {
            return Ok(Vec::new());
        }
        Ok(list[lo as usize..=hi as usize].to_vec())
    }

    fn list_len(&self, key: &str) -> StorageResult<u64> {
        let map = self.inner.lock();
        match map.get(key) {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len() as u64),
            Some(Value::Bytes(_)) => Err(StorageError::WrongType {
                key: key.to_string(),
                expected: "list",
            }),
        }
    }

    fn list_set_at(&self, key: &str, index: u64, value: &[u8]) -> StorageResult<()> {
        let mut map = self.inner.lock();
        Self::apply(
            &mut map,
            &WriteOp::ListSet {
                key: key.to_string(),
                index,
                value: value.to_vec(),
            },
        )
    }

    fn transaction(&self, ops: &[WriteOp]) -> StorageResult<()> {
        let mut map = self.inner.lock();
        // Apply against a scratch copy so a failing op leaves nothing behind.
        let mut scratch = map.clone();
        for op in ops {
            Self::apply(&mut scratch, op)?;
        }
        *map = scratch;
        Ok(())
    }
}
