// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Runtime-wide tunables, set once when a root scope is launched.
///
/// There is no wire protocol or persisted state for this core, so this is
/// a plain struct handed to [`crate::Runtime::new`] rather than something
/// parsed from the environment or a config file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default bound for a subscription's per-subscriber queue.
    /// Individual subscriptions may override this.
    pub channel_capacity: usize,
    /// If set, logs a warning when a single frame's teardown takes longer
    /// than this. Never forcibly kills a frame — there is no
    /// forced-timeout teardown path here, only cooperative halting.
    pub teardown_grace: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            teardown_grace: Some(Duration::from_secs(5)),
        }
    }
}
