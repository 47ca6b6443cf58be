use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerPolicy {
    /// Every fallen frame may count.
    Level,
    /// Only a not-fallen to fallen transition may count.
    Edge,
}

/// Turns a per-frame fallen flag into discrete counted events.
///
/// An event is counted only when strictly more than `cooldown` has passed
/// since the last counted event.
#[derive(Debug, Clone)]
pub struct Debouncer {
    policy: TriggerPolicy,
    cooldown: Duration,
    previous: bool,
    last_fired: Option<Instant>,
}

impl Debouncer {
    pub fn new(policy: TriggerPolicy, cooldown: Duration) -> Self {
        Self {
            policy,
            cooldown,
            previous: false,
            last_fired: None,
        }
    }

    /// Feed one frame. Returns `true` when this frame is counted.
    pub fn observe(&mut self, fallen: bool, now: Instant) -> bool {
        let rising = fallen && !self.previous;
        self.previous = fallen;
        let eligible = match self.policy {
            TriggerPolicy::Level => fallen,
            TriggerPolicy::Edge => rising,
        };
        if eligible && cooled_down(self.last_fired, self.cooldown, now) {
            self.last_fired = Some(now);
            true
        } else {
            false
        }
    }

    pub fn policy(&self) -> TriggerPolicy {
        self.policy
    }
}

/// Counts newly appearing people: only when the per-frame count rises and the
/// cooldown since the previous increment has passed.
#[derive(Debug, Clone)]
pub struct PersonCounter {
    cooldown: Duration,
    last_count: usize,
    last_increment: Option<Instant>,
}

impl PersonCounter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_count: 0,
            last_increment: None,
        }
    }

    pub fn observe(&mut self, count: usize, now: Instant) -> bool {
        let fire = count > self.last_count && cooled_down(self.last_increment, self.cooldown, now);
        if fire {
            self.last_increment = Some(now);
        }
        self.last_count = count;
        fire
    }
}

fn cooled_down(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    last.is_none_or(|t| now.saturating_duration_since(t) > cooldown)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(500);

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn level_counts_once_per_cooldown_while_fallen() {
        let t0 = Instant::now();
        let mut box_view = Debouncer::new(TriggerPolicy::Level, COOLDOWN);
        let fired: Vec<bool> = [0, 20, 40, 400, 520, 540]
            .iter()
            .map(|ms| box_view.observe(true, at(t0, *ms)))
            .collect();
        assert_eq!(fired, vec![true, false, false, false, true, false]);
    }

    #[test]
    fn cooldown_comparison_is_strict() {
        let t0 = Instant::now();
        let mut box_view = Debouncer::new(TriggerPolicy::Level, COOLDOWN);
        assert!(box_view.observe(true, t0));
        assert!(!box_view.observe(true, at(t0, 500)));
        assert!(box_view.observe(true, at(t0, 501)));
    }

    #[test]
    fn edge_counts_a_continuous_fall_once() {
        let t0 = Instant::now();
        let mut pose = Debouncer::new(TriggerPolicy::Edge, COOLDOWN);
        let count = (0..200)
            .filter(|i| pose.observe(true, at(t0, i * 20)))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn edge_needs_a_recovery_and_the_cooldown() {
        let t0 = Instant::now();
        let mut pose = Debouncer::new(TriggerPolicy::Edge, COOLDOWN);
        assert!(pose.observe(true, t0));
        assert!(!pose.observe(false, at(t0, 100)));
        // rising again but still cooling down
        assert!(!pose.observe(true, at(t0, 200)));
        assert!(!pose.observe(false, at(t0, 600)));
        assert!(pose.observe(true, at(t0, 700)));
    }

    #[test]
    fn people_count_only_on_rises() {
        let t0 = Instant::now();
        let mut people = PersonCounter::new(COOLDOWN);
        assert!(people.observe(1, t0));
        assert!(!people.observe(1, at(t0, 600)));
        // rise inside the cooldown is swallowed, and its count becomes the baseline
        assert!(people.observe(2, at(t0, 1200)));
        assert!(!people.observe(3, at(t0, 1300)));
        assert!(!people.observe(3, at(t0, 2000)));
        assert!(!people.observe(0, at(t0, 2100)));
        assert!(people.observe(1, at(t0, 2200)));
    }
}
