// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wall-clock source for token expiry arithmetic.

use std::fmt;
use std::sync::Arc;

/// Reads the current time as seconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current epoch time in seconds.
    fn now_epoch_secs(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Returns a shared system clock.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
