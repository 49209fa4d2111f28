// THEORY:
// Monitors do their periodic work (support checks, reach distance polling,
// pick-and-place updates, delayed contact resets) through cooperative timers.
// A `Timer` never runs on its own: the owner of the monitor advances simulated
// time and each monitor asks its timers whether they are due. Pausing keeps the
// remaining delay so a resumed timer continues where it stopped.

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimerState {
    Cleared,
    Running { next_fire: f64 },
    Paused { remaining: f64 },
}

/// A looping or one-shot timer driven by simulated time.
#[derive(Debug, Clone, PartialEq)]
pub struct Timer {
    rate: f64,
    looping: bool,
    state: TimerState,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// A cleared timer; call [`Timer::set`] to arm it.
    pub fn new() -> Self {
        Self {
            rate: 0.0,
            looping: false,
            state: TimerState::Cleared,
        }
    }

    /// Arms the timer to fire `rate` seconds after `now` (and every `rate`
    /// seconds afterwards when `looping`). Re-arming replaces any pending fire.
    pub fn set(&mut self, now: f64, rate: f64, looping: bool) {
        self.rate = rate;
        self.looping = looping;
        self.state = TimerState::Running {
            next_fire: now + rate,
        };
    }

    pub fn pause(&mut self, now: f64) {
        if let TimerState::Running { next_fire } = self.state {
            self.state = TimerState::Paused {
                remaining: (next_fire - now).max(0.0),
            };
        }
    }

    pub fn unpause(&mut self, now: f64) {
        if let TimerState::Paused { remaining } = self.state {
            self.state = TimerState::Running {
                next_fire: now + remaining,
            };
        }
    }

    pub fn clear(&mut self) {
        self.state = TimerState::Cleared;
    }

    /// True while armed and not paused.
    pub fn is_active(&self) -> bool {
        matches!(self.state, TimerState::Running { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, TimerState::Paused { .. })
    }

    /// Returns true once if the timer is due at `now`. Missed periods of a
    /// looping timer are collapsed into a single fire.
    pub fn fire_if_due(&mut self, now: f64) -> bool {
        let TimerState::Running { next_fire } = self.state else {
            return false;
        };
        if now < next_fire {
            return false;
        }
        if self.looping && self.rate > 0.0 {
            let mut next = next_fire + self.rate;
            while next <= now {
                next += self.rate;
            }
            self.state = TimerState::Running { next_fire: next };
        } else {
            self.state = TimerState::Cleared;
        }
        true
    }
}
