/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::time::Duration;

use slog::o;
use slog::Discard;
use slog::Logger;

/// Verbosity of the periodic performance monitor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PerformanceMode {
    /// Skip entries whose buffered count is zero.
    Succinct,
    /// Log every entry, including zero counts.
    Verbose,
}

/// Options controlling a container's monitoring and logging.
#[derive(Clone)]
pub struct FlowOptions {
    /// Log the container-level buffered count every monitor interval.
    pub container_monitor: bool,
    /// Log every block's buffered count every monitor interval.
    pub block_monitor: bool,
    /// Cadence of the monitor loop.
    pub monitor_interval: Duration,
    /// Whether zero counts are logged.
    pub performance_mode: PerformanceMode,
    /// Destination for the container's structured logs. Containers tag
    /// every record with their own name.
    pub logger: Logger,
}

impl Default for FlowOptions {
    fn default() -> Self {
        FlowOptions {
            container_monitor: false,
            block_monitor: false,
            monitor_interval: Duration::from_secs(10),
            performance_mode: PerformanceMode::Succinct,
            logger: Logger::root(Discard, o!()),
        }
    }
}

impl FlowOptions {
    /// Options routing logs to `logger`.
    pub fn with_logger(logger: Logger) -> Self {
        FlowOptions {
            logger,
            ..Default::default()
        }
    }

    /// Enable both monitors at the given cadence.
    pub fn monitored(mut self, interval: Duration) -> Self {
        self.container_monitor = true;
        self.block_monitor = true;
        self.monitor_interval = interval;
        self
    }
}
