//! Student model
//!
//! A pickable unit with cooldown state and pick history. Fields are private
//! so every mutation path keeps the window and history invariants:
//! `cooldown_expires_at >= cooldown_started_at >= 0` and
//! `pick_count >= pick_history.len()`.

pub const SECONDS_PER_DAY: f64 = 60.0 * 60.0 * 24.0;

/// Default tolerance for matching history timestamps by value.
pub const HISTORY_TOLERANCE: f64 = 1e-6;

/// A student in one classroom's pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    id: String,
    name: String,
    group: u32,
    last_pick: f64,
    pick_count: u64,
    pick_history: Vec<f64>,
    cooldown_started_at: f64,
    cooldown_expires_at: f64,
}

impl Student {
    /// Create a fresh student with no pick history.
    pub fn new(id: impl Into<String>, name: &str, group: u32) -> Self {
        Self::with_state(id, name, group, 0.0, 0, Vec::new(), 0.0, 0.0)
    }

    /// Reconstruct a student from persisted state, clamping invalid values
    /// rather than rejecting them.
    #[allow(clippy::too_many_arguments)]
    pub fn with_state(
        id: impl Into<String>,
        name: &str,
        group: u32,
        last_pick: f64,
        pick_count: u64,
        pick_history: Vec<f64>,
        cooldown_started_at: f64,
        cooldown_expires_at: f64,
    ) -> Self {
        let mut history: Vec<f64> = pick_history.into_iter().filter(|v| v.is_finite()).collect();
        let last_pick = if last_pick.is_finite() && last_pick > 0.0 {
            last_pick
        } else {
            0.0
        };
        if history.is_empty() && last_pick > 0.0 {
            history.push(last_pick);
        }
        let pick_count = pick_count.max(history.len() as u64);
        let started = sanitize_timestamp(cooldown_started_at);
        let expires = sanitize_timestamp(cooldown_expires_at).max(started);
        Self {
            id: id.into(),
            name: name.trim().to_string(),
            group,
            last_pick,
            pick_count,
            pick_history: history,
            cooldown_started_at: started,
            cooldown_expires_at: expires,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub fn last_pick(&self) -> f64 {
        self.last_pick
    }

    pub fn pick_count(&self) -> u64 {
        self.pick_count
    }

    pub fn pick_history(&self) -> &[f64] {
        &self.pick_history
    }

    pub fn cooldown_started_at(&self) -> f64 {
        self.cooldown_started_at
    }

    pub fn cooldown_expires_at(&self) -> f64 {
        self.cooldown_expires_at
    }

    /// Update display name and group. The caller is responsible for
    /// pool-level uniqueness checks.
    pub fn update(&mut self, name: &str, group: u32) {
        self.name = name.trim().to_string();
        self.group = group;
    }

    /// Re-key the student. The owning pool must move its map entry.
    pub(crate) fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Whether the student may be drawn at `now`.
    pub fn pickable(&self, now: f64, ignore_cooldown: bool) -> bool {
        ignore_cooldown || now >= self.cooldown_expires_at
    }

    /// Seconds of cooldown left at `now`, zero when none is active.
    pub fn cooldown_remaining(&self, now: f64) -> f64 {
        if self.cooldown_expires_at <= 0.0 {
            return 0.0;
        }
        (self.cooldown_expires_at - now).max(0.0)
    }

    /// Open a cooldown window of `days` days starting at `start`.
    /// A non-positive duration releases the cooldown instead.
    pub fn apply_cooldown(&mut self, start: f64, days: u32) {
        if days == 0 {
            self.release_cooldown();
            return;
        }
        let start = sanitize_timestamp(start);
        self.cooldown_started_at = start;
        self.cooldown_expires_at = start + days as f64 * SECONDS_PER_DAY;
    }

    /// Zero both cooldown bounds, making the student immediately eligible.
    pub fn release_cooldown(&mut self) {
        self.cooldown_started_at = 0.0;
        self.cooldown_expires_at = 0.0;
    }

    /// Empty pick history, reset counters, and release the cooldown.
    pub fn clear_history(&mut self) {
        self.pick_history.clear();
        self.pick_count = 0;
        self.last_pick = 0.0;
        self.release_cooldown();
    }

    /// Remove one history entry matching `timestamp` within `tolerance`.
    ///
    /// When the removed entry was the most recent pick, or coincided with the
    /// current cooldown start, the cooldown is released. The last-pick value
    /// is recomputed as the maximum remaining entry. Returns whether a match
    /// was found.
    pub fn remove_history_entry(&mut self, timestamp: f64, tolerance: f64) -> bool {
        if !timestamp.is_finite() {
            return false;
        }
        let index = match self
            .pick_history
            .iter()
            .position(|v| (v - timestamp).abs() <= tolerance)
        {
            Some(index) => index,
            None => return false,
        };
        let previous_last_pick = self.last_pick;
        let removed = self.pick_history.remove(index);
        self.last_pick = self
            .pick_history
            .iter()
            .copied()
            .fold(0.0_f64, f64::max);
        self.pick_count = self.pick_history.len() as u64;
        if (previous_last_pick - removed).abs() <= tolerance
            || (self.cooldown_started_at - removed).abs() <= tolerance
        {
            self.release_cooldown();
        }
        true
    }

    /// Record a draw at `timestamp`, opening a cooldown window of
    /// `cooldown_days` days from that moment.
    pub fn register_pick(&mut self, timestamp: f64, cooldown_days: u32) {
        let value = sanitize_timestamp(timestamp);
        self.last_pick = value;
        self.pick_count += 1;
        self.pick_history.push(value);
        self.apply_cooldown(value, cooldown_days);
    }
}

fn sanitize_timestamp(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
