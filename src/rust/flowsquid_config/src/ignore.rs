use tracing::trace;

/// Case-sensitive substring blacklist applied to finished log lines and
/// to IP literals before enrichment.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    entries: Vec<String>,
}

impl IgnoreList {
    /// Empty strings would match everything, so they are discarded.
    pub fn new(entries: Vec<String>) -> Self {
        Self {
            entries: entries.into_iter().filter(|e| !e.is_empty()).collect(),
        }
    }

    /// True if any entry occurs within `line`.
    pub fn should_drop_line(&self, line: &str) -> bool {
        match self.entries.iter().find(|e| line.contains(e.as_str())) {
            Some(hit) => {
                trace!("Line '{line}' contains ignored string '{hit}', skipping");
                true
            }
            None => false,
        }
    }

    /// Same rule applied to an IP literal.
    pub fn should_drop_ip(&self, ip: &str) -> bool {
        self.should_drop_line(ip)
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is filtered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
