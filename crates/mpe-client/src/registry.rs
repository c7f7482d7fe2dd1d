//! Desired-subscription registry.
//!
//! Holds the set of subscriptions the caller wants across feed categories,
//! independent of any live connection. The facade replays a snapshot of
//! this registry after every (re)connect and applies diffs while connected.

use std::collections::BTreeSet;

/// A class of streaming subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeedCategory {
    Markets,
    Tickers,
    Summary,
}

impl std::fmt::Display for FeedCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markets => write!(f, "markets"),
            Self::Tickers => write!(f, "tickers"),
            Self::Summary => write!(f, "summary"),
        }
    }
}

/// The two pair-keyed feed categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairFeed {
    Markets,
    Tickers,
}

impl PairFeed {
    pub fn category(self) -> FeedCategory {
        match self {
            Self::Markets => FeedCategory::Markets,
            Self::Tickers => FeedCategory::Tickers,
        }
    }
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub markets: BTreeSet<String>,
    pub tickers: BTreeSet<String>,
    pub summary: bool,
}

impl RegistrySnapshot {
    pub fn is_empty(&self) -> bool {
        self.markets.is_empty() && self.tickers.is_empty() && !self.summary
    }

    /// Per-category additions and removals relative to `previous`.
    pub fn diff(&self, previous: &RegistrySnapshot) -> RegistryDiff {
        RegistryDiff {
            subscribe: RegistrySnapshot {
                markets: self.markets.difference(&previous.markets).cloned().collect(),
                tickers: self.tickers.difference(&previous.tickers).cloned().collect(),
                summary: self.summary && !previous.summary,
            },
            unsubscribe: RegistrySnapshot {
                markets: previous.markets.difference(&self.markets).cloned().collect(),
                tickers: previous.tickers.difference(&self.tickers).cloned().collect(),
                summary: previous.summary && !self.summary,
            },
        }
    }
}

/// Result of diffing two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    pub subscribe: RegistrySnapshot,
    pub unsubscribe: RegistrySnapshot,
}

/// The mutable registry owned by the facade.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    markets: BTreeSet<String>,
    tickers: BTreeSet<String>,
    summary: bool,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_mut(&mut self, feed: PairFeed) -> &mut BTreeSet<String> {
        match feed {
            PairFeed::Markets => &mut self.markets,
            PairFeed::Tickers => &mut self.tickers,
        }
    }

    /// Union `pairs` into the category. Re-adding is a no-op.
    pub fn add(&mut self, feed: PairFeed, pairs: Vec<String>) {
        self.set_mut(feed).extend(pairs);
    }

    /// Set-difference `pairs` out of the category. Removing an absent pair
    /// is a no-op.
    pub fn remove(&mut self, feed: PairFeed, pairs: &[String]) {
        let set = self.set_mut(feed);
        for pair in pairs {
            set.remove(pair);
        }
    }

    /// Replace the whole category atomically.
    pub fn replace(&mut self, feed: PairFeed, pairs: Vec<String>) {
        *self.set_mut(feed) = pairs.into_iter().collect();
    }

    pub fn set_summary(&mut self, enabled: bool) {
        self.summary = enabled;
    }

    pub fn summary(&self) -> bool {
        self.summary
    }

    pub fn contains(&self, feed: PairFeed, pair: &str) -> bool {
        match feed {
            PairFeed::Markets => self.markets.contains(pair),
            PairFeed::Tickers => self.tickers.contains(pair),
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            markets: self.markets.clone(),
            tickers: self.tickers.clone(),
            summary: self.summary,
        }
    }
}
