//! Load result bookkeeping

/// Result of loading documents from a dump
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// Number of documents stored
    pub loaded: usize,
    /// Number of documents that failed to parse or store
    pub failed: usize,
    /// Number of documents whose identifier already existed
    pub duplicates_skipped: usize,
    /// Errors encountered
    pub errors: Vec<String>,
}

impl LoadResult {
    /// Create a new empty load result
    pub fn new() -> Self {
        Self {
            loaded: 0,
            failed: 0,
            duplicates_skipped: 0,
            errors: Vec::new(),
        }
    }

    /// Add a stored document
    pub fn add_success(&mut self) {
        self.loaded += 1;
    }

    /// Add a failed document
    pub fn add_failure(&mut self, error: String) {
        self.failed += 1;
        self.errors.push(error);
    }

    /// Add a skipped duplicate
    pub fn add_duplicate(&mut self) {
        self.duplicates_skipped += 1;
    }

    /// Number of documents read from the dump
    pub fn total(&self) -> usize {
        self.loaded + self.failed + self.duplicates_skipped
    }

    /// Merge another load result into this one
    pub fn merge(&mut self, other: LoadResult) {
        self.loaded += other.loaded;
        self.failed += other.failed;
        self.duplicates_skipped += other.duplicates_skipped;
        self.errors.extend(other.errors);
    }
}

impl Default for LoadResult {
    fn default() -> Self {
        Self::new()
    }
}
