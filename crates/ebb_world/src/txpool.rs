//! # Staged Transaction Pool
//!
//! The minimal view of the game-layer transaction pool that the store needs
//! for crash safety: an ordered list of opaque payloads tagged with their
//! message type. The pool is persisted before a tick's systems run and
//! cleared inside the commit batch, so after a crash the world either never
//! saw the tick or holds both its effects and an empty log.

/// One transaction staged for a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedTransaction {
    /// Identifier of the message type, assigned by the game layer.
    pub message_id: u64,
    /// Opaque encoded message body.
    pub payload: Vec<u8>,
}

/// Ordered collection of staged transactions for one tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxPool {
    transactions: Vec<StagedTransaction>,
}

impl TxPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transaction, preserving arrival order.
    pub fn push(&mut self, transaction: StagedTransaction) {
        self.transactions.push(transaction);
    }

    /// The staged transactions in arrival order.
    #[must_use]
    pub fn transactions(&self) -> &[StagedTransaction] {
        &self.transactions
    }

    /// Number of staged transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// True when nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
