use crate::types::ParamKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Most recent value written per parameter.
///
/// SXM offers no read-back for most edit fields, so this is the only record
/// of what was last sent. Keys are `(TYPE, code)` with an uppercase type tag.
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct WriteCache {
    inner: Arc<Mutex<HashMap<(String, String), f64>>>,
}

impl WriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, kind: ParamKind, code: &str, value: f64) {
        self.inner
            .lock()
            .insert((kind.tag().to_string(), code.to_string()), value);
    }

    /// Look up by free-form type tag (`"edit"`, `"DNC"`, ...) and code
    pub fn get(&self, kind: &str, code: &str) -> Option<f64> {
        self.inner
            .lock()
            .get(&(kind.to_uppercase(), code.to_string()))
            .copied()
    }

    /// All entries, sorted by key
    pub fn snapshot(&self) -> Vec<(String, String, f64)> {
        let mut entries: Vec<_> = self
            .inner
            .lock()
            .iter()
            .map(|((kind, code), v)| (kind.clone(), code.clone(), *v))
            .collect();
        entries.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
