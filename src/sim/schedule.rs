//! Fixed-timestep accumulator and frame-counted deferred actions

use serde::{Deserialize, Serialize};

/// Outcome of feeding wall-clock time into the accumulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Steps {
    /// Fixed steps to run this frame
    pub count: u32,
    /// Leftover fraction of a step, for render interpolation only
    pub alpha: f64,
}

/// Converts variable frame times into a whole number of fixed steps
#[derive(Debug, Clone)]
pub struct FixedStep {
    pub dt: f64,
    pub max_steps: u32,
    accumulator: f64,
}

impl FixedStep {
    pub fn new(dt: f64, max_steps: u32) -> Self {
        Self {
            dt,
            max_steps: max_steps.max(1),
            accumulator: 0.0,
        }
    }

    /// Accumulate `elapsed` seconds and report how many steps are due
    ///
    /// When the cap is hit the remaining backlog is dropped instead of being
    /// carried into the next frame.
    pub fn advance(&mut self, elapsed: f64) -> Steps {
        self.accumulator += elapsed.max(0.0);
        let mut count = 0;
        while self.accumulator >= self.dt && count < self.max_steps {
            self.accumulator -= self.dt;
            count += 1;
        }
        if count == self.max_steps && self.accumulator >= self.dt {
            log::debug!(
                "dropping {:.1} ms of simulation backlog",
                self.accumulator * 1000.0
            );
            self.accumulator %= self.dt;
        }
        Steps {
            count,
            alpha: self.accumulator / self.dt,
        }
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Scheduled<A> {
    due: u64,
    every: Option<u64>,
    order: u64,
    action: A,
}

/// Deferred actions keyed by frame number
///
/// Actions due on the same frame fire in the order they were scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actions<A> {
    pending: Vec<Scheduled<A>>,
    next_order: u64,
}

impl<A> Default for Actions<A> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            next_order: 0,
        }
    }
}

impl<A: Clone> Actions<A> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, due: u64, every: Option<u64>, action: A) {
        let order = self.next_order;
        self.next_order += 1;
        self.pending.push(Scheduled {
            due,
            every,
            order,
            action,
        });
    }

    /// Fire once, `delay` frames after `now`
    pub fn after(&mut self, now: u64, delay: u64, action: A) {
        self.push(now + delay, None, action);
    }

    /// Fire every `interval` frames starting `interval` frames after `now`
    pub fn every(&mut self, now: u64, interval: u64, action: A) {
        let interval = interval.max(1);
        self.push(now + interval, Some(interval), action);
    }

    /// Drop every pending action matching `predicate`
    pub fn cancel(&mut self, predicate: impl Fn(&A) -> bool) {
        self.pending.retain(|s| !predicate(&s.action));
    }

    /// Pop actions due at or before `now`; repeating actions are re-armed
    pub fn due(&mut self, now: u64) -> Vec<A> {
        let mut fired: Vec<(u64, u64, A)> = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].due > now {
                i += 1;
                continue;
            }
            let scheduled = &mut self.pending[i];
            fired.push((scheduled.due, scheduled.order, scheduled.action.clone()));
            match scheduled.every {
                Some(interval) => {
                    scheduled.due = now + interval;
                    i += 1;
                }
                None => {
                    self.pending.remove(i);
                }
            }
        }
        fired.sort_by_key(|(due, order, _)| (*due, *order));
        fired.into_iter().map(|(_, _, action)| action).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Iterate pending actions (unordered)
    pub fn iter(&self) -> impl Iterator<Item = (u64, &A)> {
        self.pending.iter().map(|s| (s.due, &s.action))
    }
}
