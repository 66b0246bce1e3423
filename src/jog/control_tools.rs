// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::exception::{JogException, JogResult};

/// Used to decide whether to enforce realtime mode for the calculation thread.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeConfig {
    Enforce,
    Ignore,
}

/// Determines whether the current OS kernel is a realtime kernel.
///
/// On Linux, this checks for the existence of `/sys/kernel/realtime`.
pub fn has_realtime_kernel() -> bool {
    Path::new("/sys/kernel/realtime").exists()
}

/// Sets the current thread to the highest possible scheduler priority.
///
/// # Errors
/// * RealtimeException if realtime priority cannot be set for the current thread.
///
/// If the method returns an Error please check your /etc/security/limits.conf file
/// There should be a line like this:
/// ```text
///marco            -       rtprio          99
/// ```
pub fn set_current_thread_to_highest_scheduler_priority() -> JogResult<()> {
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_priority == -1 {
            return Err(JogException::RealTimeException {
                message: "jog_arm: unable to get maximum possible thread priority".to_string(),
            });
        }
        let thread_param = libc::sched_param {
            // one below the maximum, see https://rt.wiki.kernel.org/index.php/HOWTO:_Build_an_RT-application
            sched_priority: max_priority - 1,
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &thread_param) != 0 {
            return Err(JogException::RealTimeException {
                message: "jog_arm: unable to set realtime scheduling".to_string(),
            });
        }
        // prevent the memory of the jogging loops from being swapped
        if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
            return Err(JogException::RealTimeException {
                message: "jog_arm: unable to lock memory".to_string(),
            });
        }
    }
    Ok(())
}

/// Applies the realtime configuration to the calling thread.
///
/// # Errors
/// * RealtimeException if `Enforce` is requested but the kernel or the limits do not allow it.
pub fn apply_realtime_config(config: RealtimeConfig) -> JogResult<()> {
    match config {
        RealtimeConfig::Ignore => Ok(()),
        RealtimeConfig::Enforce => {
            if has_realtime_kernel() {
                set_current_thread_to_highest_scheduler_priority()
            } else {
                Err(JogException::RealTimeException {
                    message: "jog_arm: Running kernel does not have realtime capabilities."
                        .to_string(),
                })
            }
        }
    }
}

/// Fixed-rate timer for the jogging loops.
///
/// Deadlines advance by exactly one period, so a late cycle does not shift the following ones.
/// If a cycle overruns by more than a whole period the schedule restarts from now instead of
/// firing a burst of catch-up cycles.
#[derive(Debug)]
pub struct Rate {
    period: Duration,
    next_deadline: Instant,
}

impl Rate {
    pub fn new(period: Duration) -> Self {
        Rate {
            period,
            next_deadline: Instant::now() + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleeps until the next deadline. Returns false if the deadline was already missed.
    pub fn sleep(&mut self) -> bool {
        let now = Instant::now();
        let on_time = now <= self.next_deadline;
        if on_time {
            std::thread::sleep(self.next_deadline - now);
            self.next_deadline += self.period;
        } else if now - self.next_deadline > self.period {
            self.next_deadline = now + self.period;
        } else {
            self.next_deadline += self.period;
        }
        on_time
    }
}
