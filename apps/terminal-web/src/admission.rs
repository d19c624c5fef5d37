use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("server at capacity")]
    AtCapacity,
}

impl Rejection {
    /// The one line sent to a refused client before the connection closes.
    pub fn client_message(self, rate_limit: usize) -> String {
        match self {
            Rejection::AtCapacity => {
                "Server is at maximum capacity. Please try again later.".to_string()
            }
            Rejection::RateLimited => format!(
                "Rate limit exceeded. Maximum {rate_limit} connections per minute."
            ),
        }
    }
}

/// Per-IP sliding-window rate limiting plus a global cap on live sessions.
///
/// The per-IP map and the active counter sit behind separate locks; admission
/// takes the counter lock while holding the map lock, never the other way
/// round. A successful admission reserves its slot under that counter lock.
pub struct AdmissionController {
    rate_limit: usize,
    max_active: usize,
    recent: Mutex<HashMap<String, VecDeque<Instant>>>,
    active: Mutex<usize>,
}

impl AdmissionController {
    pub fn new(rate_limit: usize, max_active: usize) -> Self {
        Self {
            rate_limit,
            max_active,
            recent: Mutex::new(HashMap::new()),
            active: Mutex::new(0),
        }
    }

    pub fn rate_limit(&self) -> usize {
        self.rate_limit
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn allow(&self, ip: &str) -> bool {
        self.admit(ip).is_ok()
    }

    /// Admits `ip` and reserves a session slot that is released when the
    /// returned permit is dropped.
    pub fn acquire(self: &Arc<Self>, ip: &str) -> Result<AdmissionPermit, Rejection> {
        let active = self.reserve_at(ip, Instant::now())?;
        Ok(AdmissionPermit {
            controller: Arc::clone(self),
            active,
            released: false,
        })
    }

    /// Like [`acquire`](Self::acquire) without a permit; the caller owns the
    /// reserved slot and gives it back with [`decrement`](Self::decrement).
    pub fn admit(&self, ip: &str) -> Result<(), Rejection> {
        self.admit_at(ip, Instant::now())
    }

    pub fn admit_at(&self, ip: &str, now: Instant) -> Result<(), Rejection> {
        self.reserve_at(ip, now).map(|_| ())
    }

    /// Records a connection attempt at `now` and takes a session slot if both
    /// limits permit it, returning the new active count. Rejected attempts
    /// leave no timestamp behind and take no slot.
    fn reserve_at(&self, ip: &str, now: Instant) -> Result<usize, Rejection> {
        let mut recent = self.recent.lock();
        let history = recent.entry(ip.to_string()).or_default();
        while let Some(oldest) = history.front() {
            if now.saturating_duration_since(*oldest) < RATE_WINDOW {
                break;
            }
            history.pop_front();
        }

        let verdict = if history.len() >= self.rate_limit {
            Err(Rejection::RateLimited)
        } else {
            let mut active = self.active.lock();
            if *active >= self.max_active {
                Err(Rejection::AtCapacity)
            } else {
                *active += 1;
                history.push_back(now);
                Ok(*active)
            }
        };

        if history.is_empty() {
            recent.remove(ip);
        }
        verdict
    }

    pub fn increment(&self) -> usize {
        let mut active = self.active.lock();
        *active += 1;
        *active
    }

    pub fn decrement(&self) -> usize {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        *active
    }

    pub fn active(&self) -> usize {
        *self.active.lock()
    }

    pub fn tracked_ips(&self) -> usize {
        self.recent.lock().len()
    }
}

/// A live session slot. Dropping it gives the slot back.
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    active: usize,
    released: bool,
}

impl AdmissionPermit {
    /// Active sessions right after this slot was taken.
    pub fn active(&self) -> usize {
        self.active
    }

    /// Gives the slot back and returns the remaining active count.
    pub fn release(mut self) -> usize {
        self.released = true;
        self.controller.decrement()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if !self.released {
            self.controller.decrement();
        }
    }
}
