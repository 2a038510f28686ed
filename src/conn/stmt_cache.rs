// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use lru::LruCache;
use twox_hash::XxHash64;

use std::{hash::BuildHasherDefault, num::NonZeroUsize, sync::Arc};

use crate::conn::stmt::InnerStmt;

/// Per-connection cache of prepared statements, keyed by query text.
#[derive(Debug)]
pub struct StmtCache {
    cache: Option<LruCache<String, Arc<InnerStmt>, BuildHasherDefault<XxHash64>>>,
}

impl StmtCache {
    /// A zero capacity disables caching.
    pub fn new(cap: usize) -> StmtCache {
        StmtCache {
            cache: NonZeroUsize::new(cap).map(|cap| LruCache::with_hasher(cap, Default::default())),
        }
    }

    /// Marks the statement as most recently used.
    pub fn by_query(&mut self, query: &str) -> Option<Arc<InnerStmt>> {
        self.cache.as_mut()?.get(query).cloned()
    }

    /// Caches `stmt`. Returns the evicted statement, if any, which must be closed on the server.
    pub fn put(&mut self, query: String, stmt: Arc<InnerStmt>) -> Option<Arc<InnerStmt>> {
        let cache = self.cache.as_mut()?;
        match cache.push(query, stmt.clone()) {
            // same query prepared twice, the old id is useless now
            Some((_, old)) if old.id() != stmt.id() => Some(old),
            Some(_) => None,
            None => None,
        }
    }

    /// Forgets the statement with the given id.
    pub fn remove(&mut self, id: u32) -> Option<Arc<InnerStmt>> {
        let cache = self.cache.as_mut()?;
        let query = cache
            .iter()
            .find(|(_, stmt)| stmt.id() == id)
            .map(|(query, _)| query.clone())?;
        cache.pop(&query)
    }

    /// `false` for a zero capacity cache, statements prepared from query text are then closed
    /// once executed.
    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map(LruCache::len).unwrap_or(0)
    }
}
