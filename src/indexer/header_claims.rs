//! First-win coordination for header extraction.
//!
//! Many translation units include the same header. The tracker makes sure that
//! for a given `(header, content hash)` the extraction runs at most once, no
//! matter how many workers race for it. Every operation is a single critical
//! section over one mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    InProgress,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Claim {
    hash: String,
    state: ClaimState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller owns the header and must extract it, then release.
    Granted,
    AlreadyDone,
    InProgressElsewhere,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRelease {
    Completed,
    Aborted,
}

#[derive(Debug, Default)]
pub struct HeaderClaimTracker {
    claims: Mutex<HashMap<PathBuf, Claim>>,
}

impl Clone for HeaderClaimTracker {
    fn clone(&self) -> Self {
        Self {
            claims: Mutex::new(self.claims.lock().clone()),
        }
    }
}

impl HeaderClaimTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_claim(&self, header: &Path, hash: &str) -> ClaimOutcome {
        let mut claims = self.claims.lock();

        if let Some(existing) = claims.get(header) {
            match existing.state {
                ClaimState::Done if existing.hash == hash => return ClaimOutcome::AlreadyDone,
                ClaimState::Done => {
                    claims.remove(header);
                }
                ClaimState::InProgress => return ClaimOutcome::InProgressElsewhere,
            }
        }

        claims.insert(
            header.to_path_buf(),
            Claim {
                hash: hash.to_string(),
                state: ClaimState::InProgress,
            },
        );
        tracing::debug!("Claimed header {}", header.display());
        ClaimOutcome::Granted
    }

    /// Ends a claim obtained from [`try_claim`](Self::try_claim). A release that
    /// does not match the in-progress claim for that header is ignored.
    pub fn release(&self, header: &Path, hash: &str, result: ClaimRelease) {
        let mut claims = self.claims.lock();

        let owned = matches!(
            claims.get(header),
            Some(Claim { hash: h, state: ClaimState::InProgress }) if h == hash
        );
        if !owned {
            tracing::warn!("Ignoring release of unowned claim for {}", header.display());
            return;
        }

        match result {
            ClaimRelease::Completed => {
                claims.insert(
                    header.to_path_buf(),
                    Claim {
                        hash: hash.to_string(),
                        state: ClaimState::Done,
                    },
                );
            }
            ClaimRelease::Aborted => {
                claims.remove(header);
            }
        }
    }

    /// Drops any claim on the header so its next include re-extracts it.
    pub fn invalidate(&self, header: &Path) -> bool {
        self.claims.lock().remove(header).is_some()
    }

    pub fn clear(&self) {
        self.claims.lock().clear();
    }

    pub fn is_done(&self, header: &Path, hash: &str) -> bool {
        matches!(
            self.claims.lock().get(header),
            Some(Claim { hash: h, state: ClaimState::Done }) if h == hash
        )
    }

    pub fn state(&self, header: &Path) -> Option<ClaimState> {
        self.claims.lock().get(header).map(|c| c.state)
    }

    /// Done claims sorted by path. In-progress claims are never persisted.
    pub fn done_claims(&self) -> Vec<(PathBuf, String)> {
        let claims = self.claims.lock();
        let mut done: Vec<_> = claims
            .iter()
            .filter(|(_, c)| c.state == ClaimState::Done)
            .map(|(p, c)| (p.clone(), c.hash.clone()))
            .collect();
        done.sort();
        done
    }

    pub fn restore(&self, done: impl IntoIterator<Item = (PathBuf, String)>) {
        let mut claims = self.claims.lock();
        for (path, hash) in done {
            claims.insert(
                path,
                Claim {
                    hash,
                    state: ClaimState::Done,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.claims.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.lock().is_empty()
    }
}

/// Holds a granted claim and aborts it on drop unless it was completed.
pub struct ClaimGuard<'a> {
    tracker: &'a HeaderClaimTracker,
    header: PathBuf,
    hash: String,
    released: bool,
}

impl<'a> ClaimGuard<'a> {
    /// Returns a guard only when the claim was granted.
    pub fn acquire(
        tracker: &'a HeaderClaimTracker,
        header: &Path,
        hash: &str,
    ) -> (ClaimOutcome, Option<Self>) {
        let outcome = tracker.try_claim(header, hash);
        let guard = (outcome == ClaimOutcome::Granted).then(|| Self {
            tracker,
            header: header.to_path_buf(),
            hash: hash.to_string(),
            released: false,
        });
        (outcome, guard)
    }

    pub fn complete(mut self) {
        self.tracker
            .release(&self.header, &self.hash, ClaimRelease::Completed);
        self.released = true;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.tracker
                .release(&self.header, &self.hash, ClaimRelease::Aborted);
        }
    }
}
