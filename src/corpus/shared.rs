//! Corpus handle shared between concurrently running sessions.

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use super::{CommitOutcome, Corpus, GenerationLedger};
use crate::source::RawPaper;

/// Errors from the shared corpus handle.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// A task panicked while holding the corpus lock.
    #[error("corpus lock poisoned; a previous commit panicked mid-update")]
    Poisoned,
}

/// Cloneable handle to one corpus.
///
/// Every mutation goes through [`SharedCorpus::commit`], which holds the lock
/// across normalize, merge and ingest so identity resolution and enrichment
/// of a paper happen as one step.
#[derive(Debug, Clone, Default)]
pub struct SharedCorpus {
    inner: Arc<Mutex<Corpus>>,
}

impl SharedCorpus {
    /// Wraps an existing corpus.
    #[must_use]
    pub fn new(corpus: Corpus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(corpus)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Corpus>, CorpusError> {
        self.inner.lock().map_err(|_| CorpusError::Poisoned)
    }

    /// Atomically normalizes, merges and ingests one raw record.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::Poisoned`] if the lock was poisoned.
    pub fn commit(
        &self,
        raw: RawPaper,
        ledger: &mut GenerationLedger,
    ) -> Result<CommitOutcome, CorpusError> {
        Ok(self.lock()?.commit(raw, ledger))
    }

    /// Runs `read` against the current corpus state.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::Poisoned`] if the lock was poisoned.
    pub fn read<R>(&self, read: impl FnOnce(&Corpus) -> R) -> Result<R, CorpusError> {
        let guard = self.lock()?;
        Ok(read(&*guard))
    }

    /// Clones the current corpus state.
    ///
    /// # Errors
    ///
    /// Returns [`CorpusError::Poisoned`] if the lock was poisoned.
    pub fn snapshot(&self) -> Result<Corpus, CorpusError> {
        self.read(Clone::clone)
    }
}
