use std::collections::HashMap;

use ahash::RandomState;
use quanta::Instant;

use crate::error::{Error, Result};
use crate::request::PendingRequest;
use crate::type_alias::*;

/// Outstanding requests of an agent, keyed by TID.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    requests: HashMap<Tid, PendingRequest, RandomState>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make room for one more request, so that the following
    /// [`Registry::register()`] cannot fail.
    pub fn reserve(&mut self) -> Result<()> {
        self.requests.try_reserve(1).map_err(|_| Error::NoMemory)
    }

    /// Insert a request. Its TID must not be outstanding.
    pub fn register(&mut self, req: PendingRequest) {
        let old = self.requests.insert(req.tid(), req);
        debug_assert!(old.is_none(), "TID reused while outstanding");
    }

    /// Remove the request with TID `tid`, stopping its timer.
    pub fn find_and_remove(&mut self, tid: Tid) -> Option<PendingRequest> {
        let mut req = self.requests.remove(&tid)?;
        req.timer.stop();
        Some(req)
    }

    /// Stop and remove every request.
    /// Return the number of requests removed.
    pub fn flush_all(&mut self) -> usize {
        let n = self.requests.len();
        for (_, mut req) in self.requests.drain() {
            req.timer.stop();
        }
        n
    }

    /// Return the request with TID `tid`.
    #[inline]
    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut PendingRequest> {
        self.requests.get_mut(&tid)
    }

    /// Return `true` if a request with TID `tid` is outstanding.
    #[inline]
    pub fn contains(&self, tid: Tid) -> bool {
        self.requests.contains_key(&tid)
    }

    /// Return the TIDs of requests whose timer expired at `now`, ordered by
    /// deadline and then by TID.
    pub fn expired(&self, now: Instant) -> Vec<Tid> {
        let mut expired = self
            .requests
            .values()
            .filter(|req| req.timer.is_expired(now))
            .filter_map(|req| Some((req.timer.deadline()?, req.tid())))
            .collect::<Vec<_>>();
        expired.sort_unstable();
        expired.into_iter().map(|(_, tid)| tid).collect()
    }

    /// Return the number of outstanding requests.
    #[inline]
    pub fn len(&self) -> usize {
        self.requests.len()
    }
}
