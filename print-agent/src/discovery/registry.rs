//! Current printer set
//!
//! Single writer (the discovery cycle), many readers. The whole set is
//! replaced at once; readers hold an `Arc` to the snapshot they started with.

use parking_lot::RwLock;
use std::sync::Arc;

use shared::models::{PrinterRecord, PrinterStatus};

#[derive(Debug, Clone, Default)]
pub struct PrinterSet {
    pub printers: Vec<PrinterRecord>,
    /// Unix millis of the last replacement; 0 before the first
    pub updated_at: i64,
    pub generation: u64,
}

impl PrinterSet {
    pub fn len(&self) -> usize {
        self.printers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.printers.is_empty()
    }

    /// Look up by id first, then by case-insensitive name
    pub fn find(&self, key: &str) -> Option<&PrinterRecord> {
        self.printers
            .iter()
            .find(|p| p.id == key)
            .or_else(|| self.printers.iter().find(|p| p.matches(key)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrinterRegistry {
    inner: Arc<RwLock<Arc<PrinterSet>>>,
}

impl PrinterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<PrinterSet> {
        self.inner.read().clone()
    }

    pub fn find(&self, key: &str) -> Option<PrinterRecord> {
        self.snapshot().find(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Swap in a new set
    pub fn replace(&self, printers: Vec<PrinterRecord>) -> Arc<PrinterSet> {
        let mut guard = self.inner.write();
        let next = Arc::new(PrinterSet {
            printers,
            updated_at: shared::util::now_millis(),
            generation: guard.generation + 1,
        });
        *guard = next.clone();
        next
    }

    /// Copy-on-write status update of one printer; false when unknown
    pub fn set_status(&self, id: &str, status: PrinterStatus) -> bool {
        let mut guard = self.inner.write();
        let Some(pos) = guard.printers.iter().position(|p| p.id == id) else {
            return false;
        };
        if guard.printers[pos].status == status {
            return true;
        }
        let mut printers = guard.printers.clone();
        printers[pos].status = status;
        *guard = Arc::new(PrinterSet {
            printers,
            updated_at: shared::util::now_millis(),
            generation: guard.generation + 1,
        });
        true
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }
}
