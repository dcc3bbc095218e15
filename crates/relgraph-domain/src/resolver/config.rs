//! Configuration for the graph resolver.

use std::time::Duration;

/// Configuration for the graph resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum depth for graph traversal (default 25).
    pub max_depth: u32,
    /// Time cap for one Check or Expand resolution.
    pub timeout: Duration,
    /// Sibling branches evaluated concurrently at one node.
    pub max_breadth: usize,
    /// Datastore reads in flight per query.
    pub max_concurrent_reads: usize,
    /// Sub-problems one query may dispatch before giving up.
    pub max_dispatches: u32,
    /// Objects a ListObjects run produces before it stops with `truncated`.
    pub list_objects_max_results: usize,
    /// Wall-clock cap for a ListObjects run.
    pub list_objects_deadline: Duration,
    /// ListObjects page size when the request names none.
    pub list_objects_page_size: u32,
    /// Page size used when the resolver scans tuples.
    pub read_page_size: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 25,
            timeout: Duration::from_secs(30),
            max_breadth: 100,
            max_concurrent_reads: 50,
            max_dispatches: 10_000,
            list_objects_max_results: 1000,
            list_objects_deadline: Duration::from_secs(3),
            list_objects_page_size: 100,
            read_page_size: 100,
        }
    }
}

impl ResolverConfig {
    /// Creates a new configuration with the specified max depth.
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Creates a new configuration with the specified timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_breadth(mut self, max_breadth: usize) -> Self {
        self.max_breadth = max_breadth;
        self
    }

    pub fn with_max_concurrent_reads(mut self, max_concurrent_reads: usize) -> Self {
        self.max_concurrent_reads = max_concurrent_reads;
        self
    }

    pub fn with_max_dispatches(mut self, max_dispatches: u32) -> Self {
        self.max_dispatches = max_dispatches;
        self
    }

    pub fn with_list_objects_max_results(mut self, max_results: usize) -> Self {
        self.list_objects_max_results = max_results;
        self
    }

    pub fn with_list_objects_deadline(mut self, deadline: Duration) -> Self {
        self.list_objects_deadline = deadline;
        self
    }

    pub fn with_list_objects_page_size(mut self, page_size: u32) -> Self {
        self.list_objects_page_size = page_size;
        self
    }

    pub fn with_read_page_size(mut self, page_size: u32) -> Self {
        self.read_page_size = page_size;
        self
    }
}
