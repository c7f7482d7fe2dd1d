//! Per-feed staleness watchdogs.
//!
//! Each configured feed category gets a watchdog tracking time since the
//! last matching message. A watchdog is armed at the first successful
//! subscription to its feed and disarmed on disconnect. On timeout it
//! either logs or asks the facade to reconnect.

use crate::registry::FeedCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Staleness policy for one feed category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Staleness timeout in milliseconds.
    pub timeout_ms: u64,
    /// Tear the connection down on timeout instead of only logging.
    #[serde(default)]
    pub reconnect: bool,
}

/// A fired watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogFired {
    pub category: FeedCategory,
    pub reconnect: bool,
}

#[derive(Debug)]
struct Watchdog {
    category: FeedCategory,
    timeout_ms: u64,
    reconnect: bool,
    armed: bool,
    last_message_at: DateTime<Utc>,
}

impl Watchdog {
    fn new(category: FeedCategory, config: WatchdogConfig) -> Self {
        Self {
            category,
            timeout_ms: config.timeout_ms,
            reconnect: config.reconnect,
            armed: false,
            last_message_at: Utc::now(),
        }
    }

    fn arm(&mut self) {
        if !self.armed {
            self.armed = true;
            self.last_message_at = Utc::now();
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn record(&mut self) {
        self.last_message_at = Utc::now();
    }

    /// Fires at most once per staleness window; the reference timestamp is
    /// reset on fire so a continuing outage fires again one window later.
    fn check(&mut self, now: DateTime<Utc>) -> bool {
        if !self.armed {
            return false;
        }
        let elapsed = (now - self.last_message_at).num_milliseconds();
        if elapsed >= self.timeout_ms as i64 {
            self.last_message_at = now;
            return true;
        }
        false
    }
}

/// All configured watchdogs for one facade.
#[derive(Debug, Default)]
pub struct WatchdogSet {
    dogs: Vec<Watchdog>,
}

impl WatchdogSet {
    pub fn from_entries(entries: impl IntoIterator<Item = (FeedCategory, WatchdogConfig)>) -> Self {
        Self {
            dogs: entries
                .into_iter()
                .map(|(category, config)| Watchdog::new(category, config))
                .collect(),
        }
    }

    /// Arm the watchdog for `category`, if one is configured.
    pub fn arm(&mut self, category: FeedCategory) {
        if let Some(dog) = self.dogs.iter_mut().find(|d| d.category == category) {
            dog.arm();
        }
    }

    pub fn disarm_all(&mut self) {
        for dog in &mut self.dogs {
            dog.disarm();
        }
    }

    /// Note a message on `category`.
    pub fn record(&mut self, category: FeedCategory) {
        if let Some(dog) = self.dogs.iter_mut().find(|d| d.category == category) {
            dog.record();
        }
    }

    /// Collect every watchdog whose staleness window elapsed.
    pub fn check(&mut self, now: DateTime<Utc>) -> Vec<WatchdogFired> {
        self.dogs
            .iter_mut()
            .filter_map(|dog| {
                dog.check(now).then_some(WatchdogFired {
                    category: dog.category,
                    reconnect: dog.reconnect,
                })
            })
            .collect()
    }

    pub fn is_armed(&self, category: FeedCategory) -> bool {
        self.dogs
            .iter()
            .any(|d| d.category == category && d.armed)
    }
}
