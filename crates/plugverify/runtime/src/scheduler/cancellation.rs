// Plugverify
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{TaskError, TaskResult};

/// Shared cancellation flag with an optional deadline
///
/// # Thread Safety
/// - `AtomicBool` carries the cancellation status
/// - the first recorded reason wins
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
    deadline: Option<Instant>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(Mutex::new(None)),
            deadline: None,
        }
    }

    /// Token that cancels itself once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::new()
        }
    }

    /// Checks cancellation status, enforcing the deadline
    pub fn is_cancelled(&self) -> bool {
        self.check_timeout();
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self, reason: &str) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason.to_string());
            }
        }
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true when the deadline has passed
    pub fn check_timeout(&self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.cancel("Timeout");
                true
            }
            _ => false,
        }
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// `Err(TaskError::Cancelled)` once cancelled
    pub fn check(&self) -> TaskResult<()> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled(self.reason().unwrap_or_else(|| "cancelled".to_string())))
        } else {
            Ok(())
        }
    }
}
