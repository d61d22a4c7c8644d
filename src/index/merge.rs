use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use crate::types::Result;

/// Forward-only cursor over key-sorted entries.
pub trait BlockEntryCursor<K, V> {
    /// Advances to the next entry, returning `false` once exhausted.
    fn next(&mut self) -> Result<bool>;

    /// Key of the current entry; `None` before the first `next` or after exhaustion.
    fn key(&self) -> Option<&K>;

    fn value(&self) -> Option<&V>;

    fn close(&mut self) -> Result<()>;
}

/// Cursor over an in-memory run of sorted entries.
pub struct VecBlockEntryCursor<K, V> {
    entries: std::vec::IntoIter<(K, V)>,
    current: Option<(K, V)>,
}

impl<K, V> VecBlockEntryCursor<K, V> {
    /// `entries` must already be sorted by key.
    pub fn new(entries: Vec<(K, V)>) -> Self {
        Self {
            entries: entries.into_iter(),
            current: None,
        }
    }
}

impl<K, V> BlockEntryCursor<K, V> for VecBlockEntryCursor<K, V> {
    fn next(&mut self) -> Result<bool> {
        self.current = self.entries.next();
        Ok(self.current.is_some())
    }

    fn key(&self) -> Option<&K> {
        self.current.as_ref().map(|(k, _)| k)
    }

    fn value(&self) -> Option<&V> {
        self.current.as_ref().map(|(_, v)| v)
    }

    fn close(&mut self) -> Result<()> {
        self.current = None;
        Ok(())
    }
}

type Source<K, V> = Box<dyn BlockEntryCursor<K, V> + Send>;

/// K-way merge of sorted cursors into one sorted cursor.
///
/// Entries with equal keys come out in the order their sources were added.
/// Empty sources are dropped from the heap on first advance, so they never
/// hold back the others.
pub struct MergingBlockEntryReader<K, V> {
    sources: Vec<Source<K, V>>,
    heap: BinaryHeap<Reverse<(K, usize)>>,
    initialized: bool,
    emitted_from: Option<usize>,
    current: Option<(K, V)>,
    closed: bool,
}

impl<K, V> MergingBlockEntryReader<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            heap: BinaryHeap::new(),
            initialized: false,
            emitted_from: None,
            current: None,
            closed: false,
        }
    }

    /// Adds a source; must happen before the first call to `next`.
    pub fn add_source(&mut self, source: Source<K, V>) {
        debug_assert!(!self.initialized, "source added after merge started");
        self.sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn advance(&mut self, idx: usize) -> Result<()> {
        let source = &mut self.sources[idx];
        if source.next()? {
            if let Some(key) = source.key() {
                self.heap.push(Reverse((key.clone(), idx)));
            }
        }
        Ok(())
    }

    /// Drains the merged stream into a vector.
    pub fn collect_all(&mut self) -> Result<Vec<(K, V)>> {
        let mut out = Vec::new();
        while BlockEntryCursor::next(self)? {
            if let Some(current) = self.current.clone() {
                out.push(current);
            }
        }
        Ok(out)
    }
}

impl<K, V> Default for MergingBlockEntryReader<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> BlockEntryCursor<K, V> for MergingBlockEntryReader<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        if !self.initialized {
            self.initialized = true;
            for idx in 0..self.sources.len() {
                self.advance(idx)?;
            }
        } else if let Some(idx) = self.emitted_from.take() {
            self.advance(idx)?;
        }
        let Some(Reverse((key, idx))) = self.heap.pop() else {
            self.current = None;
            return Ok(false);
        };
        let value = self.sources[idx].value().cloned();
        self.emitted_from = Some(idx);
        self.current = value.map(|value| (key, value));
        Ok(self.current.is_some())
    }

    fn key(&self) -> Option<&K> {
        self.current.as_ref().map(|(k, _)| k)
    }

    fn value(&self) -> Option<&V> {
        self.current.as_ref().map(|(_, v)| v)
    }

    /// Closes every source once, exhausted or not; the first failure is returned.
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.heap.clear();
        self.current = None;
        let mut first_err = None;
        for source in &mut self.sources {
            if let Err(err) = source.close() {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<K, V> fmt::Debug for MergingBlockEntryReader<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergingBlockEntryReader")
            .field("sources", &self.sources.len())
            .field("heads", &self.heap.len())
            .field("closed", &self.closed)
            .finish()
    }
}
