// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The syscall-facing dispatcher.
//!
//! Operations are spread over several modules as `impl FsDispatcher`
//! blocks: `resolve`, `open`, `ops`, `attrs` and `lock`.

use crate::config::DispatchConfig;
use crate::creds::Credentials;
#[cfg(feature = "events")]
use crate::error::FsError;
use crate::error::FsResult;
use crate::node::DirentRef;
use crate::path::PathArg;
#[cfg(feature = "events")]
use crate::types::{EventSink, SubscriptionId};
use crate::types::FsEvent;
use crate::walk::{SymlinkBudget, Walker};
#[cfg(feature = "events")]
use std::collections::HashMap;
#[cfg(feature = "events")]
use std::sync::{Arc, Mutex};

/// Resolves paths and dispatches file operations for tasks.
///
/// The dispatcher holds no per-task state and no graph state; it can be
/// shared by any number of threads.
pub struct FsDispatcher {
    pub(crate) config: DispatchConfig,
    #[cfg(feature = "events")]
    next_subscription_id: Mutex<u64>,
    #[cfg(feature = "events")]
    event_subscriptions: Mutex<HashMap<SubscriptionId, Arc<dyn EventSink>>>,
}

impl Default for FsDispatcher {
    fn default() -> Self {
        Self::new(DispatchConfig::default())
    }
}

impl FsDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "events")]
            next_subscription_id: Mutex::new(1),
            #[cfg(feature = "events")]
            event_subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    #[cfg(feature = "events")]
    pub fn subscribe_events(&self, cb: Arc<dyn EventSink>) -> FsResult<SubscriptionId> {
        let mut subscriptions =
            self.event_subscriptions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next_id =
            self.next_subscription_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let subscription_id = SubscriptionId::new(*next_id);
        *next_id += 1;
        subscriptions.insert(subscription_id, cb);
        Ok(subscription_id)
    }

    #[cfg(feature = "events")]
    pub fn unsubscribe_events(&self, sub: SubscriptionId) -> FsResult<()> {
        let mut subscriptions =
            self.event_subscriptions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if subscriptions.remove(&sub).is_none() {
            return Err(FsError::NotFound);
        }
        Ok(())
    }

    #[cfg(feature = "events")]
    fn emit_event(&self, event: FsEvent) {
        if !self.config.track_events {
            return;
        }

        let sinks: Vec<Arc<dyn EventSink>> = self
            .event_subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        for sink in sinks {
            sink.on_event(&event);
        }
    }

    #[cfg(not(feature = "events"))]
    fn emit_event(&self, _event: FsEvent) {}

    pub(crate) fn notify_opened(&self, dirent: &DirentRef) {
        self.emit_event(FsEvent::Opened {
            inode: dirent.id(),
            name: dirent.name(),
        });
    }

    pub(crate) fn notify_modified(&self, dirent: &DirentRef) {
        self.emit_event(FsEvent::Modified {
            inode: dirent.id(),
            name: dirent.name(),
        });
    }

    pub(crate) fn notify_attributes_changed(&self, dirent: &DirentRef) {
        self.emit_event(FsEvent::AttributesChanged {
            inode: dirent.id(),
            name: dirent.name(),
        });
    }

    /// Copy-in validation of a path argument against the configured limit.
    pub(crate) fn parse_path(&self, raw: &str, allow_empty: bool) -> FsResult<PathArg> {
        PathArg::parse_with_limit(raw, allow_empty, self.config.path_max)
    }

    pub(crate) fn new_budget(&self) -> SymlinkBudget {
        SymlinkBudget::new(self.config.max_symlink_traversals)
    }

    pub(crate) fn walker<'a>(&self, creds: &'a Credentials, root: &'a DirentRef) -> Walker<'a> {
        Walker::new(creds, root, self.config.name_max)
    }
}
