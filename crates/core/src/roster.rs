//! Classroom roster
//!
//! The pool of students belonging to one classroom: a keyed map of students,
//! the pool-wide cooldown duration, the draw-history ledger, and the
//! anti-repeat selection marker. Name uniqueness is case-insensitive within
//! the pool.

use std::cmp::Reverse;
use std::collections::HashMap;

use serde_json::{json, Value};

use crate::error::{ErrorCode, Result};
use crate::ledger::DrawLedger;
use crate::student::{Student, HISTORY_TOLERANCE};

/// Cooldown applied when a payload carries none.
pub const DEFAULT_COOLDOWN_DAYS: u32 = 3;

/// One classroom's pool of students.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    students: HashMap<String, Student>,
    cooldown_days: u32,
    ledger: DrawLedger,
    /// Last drawn student id and when, used to avoid immediate repeats.
    /// Scoped to this roster; it never leaks across classrooms.
    last_selected: Option<(String, f64)>,
}

impl Roster {
    pub fn new() -> Self {
        Self {
            students: HashMap::new(),
            cooldown_days: DEFAULT_COOLDOWN_DAYS,
            ledger: DrawLedger::new(),
            last_selected: None,
        }
    }

    /// Reassemble a roster from persisted parts. Cooldown below one day is
    /// lifted to the default.
    pub fn from_parts(
        cooldown_days: u32,
        students: Vec<Student>,
        ledger: DrawLedger,
        last_selected: Option<(String, f64)>,
    ) -> Self {
        let mut map = HashMap::with_capacity(students.len());
        for student in students {
            map.insert(student.id().to_string(), student);
        }
        Self {
            students: map,
            cooldown_days: if cooldown_days >= 1 {
                cooldown_days
            } else {
                DEFAULT_COOLDOWN_DAYS
            },
            ledger,
            last_selected,
        }
    }

    pub fn cooldown_days(&self) -> u32 {
        self.cooldown_days
    }

    /// Set the pool-wide cooldown duration. Fails `cooldown_invalid` below
    /// one day.
    pub fn set_cooldown_days(&mut self, days: u32) -> Result<()> {
        if days < 1 {
            return Err(ErrorCode::CooldownInvalid.into());
        }
        self.cooldown_days = days;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn ledger(&self) -> &DrawLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut DrawLedger {
        &mut self.ledger
    }

    pub fn last_selected(&self) -> Option<(&str, f64)> {
        self.last_selected
            .as_ref()
            .map(|(id, at)| (id.as_str(), *at))
    }

    pub fn set_last_selected(&mut self, id: impl Into<String>, at: f64) {
        self.last_selected = Some((id.into(), at));
    }

    pub fn get(&self, id: &str) -> Option<&Student> {
        self.students.get(id)
    }

    pub fn students(&self) -> impl Iterator<Item = &Student> {
        self.students.values()
    }

    /// Next free numeric id: max existing numeric id plus one, advancing
    /// past collisions with non-numeric keys.
    pub fn generate_student_id(&self) -> String {
        let mut base = self
            .students
            .values()
            .filter_map(|s| s.id().parse::<u64>().ok())
            .max()
            .map(|max| max + 1)
            .unwrap_or(1);
        let mut candidate = base.to_string();
        while self.students.contains_key(&candidate) {
            base += 1;
            candidate = base.to_string();
        }
        candidate
    }

    /// Whether a name is already taken, case-insensitively, by a student
    /// other than `exclude`.
    pub fn name_exists(&self, name: &str, exclude: Option<&str>) -> bool {
        let lowered = name.to_lowercase();
        self.students.values().any(|student| {
            exclude != Some(student.id()) && student.name().to_lowercase() == lowered
        })
    }

    /// Add a new student. A blank `id` gets a generated one.
    pub fn create_student(&mut self, name: &str, group: u32, id: Option<&str>) -> Result<&Student> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ErrorCode::NameRequired.into());
        }
        let custom = id.map(str::trim).filter(|s| !s.is_empty());
        let new_id = match custom {
            Some(custom) => custom.to_string(),
            None => self.generate_student_id(),
        };
        if self.students.contains_key(&new_id) {
            return Err(ErrorCode::IdExists.into());
        }
        if self.name_exists(name, None) {
            return Err(ErrorCode::NameExists.into());
        }
        let student = Student::new(new_id.clone(), name, group);
        self.students.insert(new_id.clone(), student);
        Ok(&self.students[&new_id])
    }

    /// Update name/group and optionally re-key the student.
    pub fn update_student(
        &mut self,
        id: &str,
        name: &str,
        group: u32,
        new_id: Option<&str>,
    ) -> Result<&Student> {
        if !self.students.contains_key(id) {
            return Err(ErrorCode::StudentMissing.into());
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(ErrorCode::NameRequired.into());
        }
        if self.name_exists(name, Some(id)) {
            return Err(ErrorCode::NameExists.into());
        }
        let mut target_id = id.to_string();
        if let Some(candidate) = new_id {
            let candidate = candidate.trim();
            if candidate.is_empty() {
                return Err(ErrorCode::IdRequired.into());
            }
            if candidate != id && self.students.contains_key(candidate) {
                return Err(ErrorCode::IdExists.into());
            }
            target_id = candidate.to_string();
        }
        if target_id != id {
            let mut student = self
                .students
                .remove(id)
                .ok_or(ErrorCode::StudentMissing)?;
            student.set_id(target_id.clone());
            self.students.insert(target_id.clone(), student);
        }
        let student = self
            .students
            .get_mut(&target_id)
            .ok_or(ErrorCode::StudentMissing)?;
        student.update(name, group);
        Ok(&self.students[&target_id])
    }

    /// Remove a student, returning whether one existed.
    pub fn remove_student(&mut self, id: &str) -> bool {
        self.students.remove(id).is_some()
    }

    /// Open a fresh cooldown window for one student, starting now.
    pub fn force_cooldown(&mut self, id: &str, now: f64) -> Result<()> {
        let days = self.cooldown_days;
        let student = self.student_mut(id)?;
        student.apply_cooldown(now, days);
        Ok(())
    }

    /// Make one student immediately eligible.
    pub fn release_cooldown(&mut self, id: &str) -> Result<()> {
        self.student_mut(id)?.release_cooldown();
        Ok(())
    }

    pub fn clear_all_cooldowns(&mut self) {
        for student in self.students.values_mut() {
            student.release_cooldown();
        }
    }

    pub fn clear_student_history(&mut self, id: &str) -> Result<()> {
        self.student_mut(id)?.clear_history();
        Ok(())
    }

    /// Remove one pick-history point by timestamp. `Ok(false)` means the
    /// student exists but no entry matched.
    pub fn remove_history_point(&mut self, id: &str, timestamp: f64) -> Result<bool> {
        Ok(self
            .student_mut(id)?
            .remove_history_entry(timestamp, HISTORY_TOLERANCE))
    }

    /// Register a pick for each listed student with the pool cooldown.
    pub fn register_picks(&mut self, ids: &[String], now: f64) -> Result<()> {
        let days = self.cooldown_days;
        for id in ids {
            self.student_mut(id)?.register_pick(now, days);
        }
        Ok(())
    }

    /// Students currently pickable at `now`.
    pub fn eligible_students(&self, now: f64, ignore_cooldown: bool) -> Vec<&Student> {
        self.students
            .values()
            .filter(|student| student.pickable(now, ignore_cooldown))
            .collect()
    }

    /// Group values whose members are all pickable. A group is only drawable
    /// as a whole.
    pub fn eligible_groups(&self, now: f64, ignore_cooldown: bool) -> Vec<u32> {
        let mut groups: HashMap<u32, bool> = HashMap::new();
        for student in self.students.values() {
            let all_pickable = groups.entry(student.group()).or_insert(true);
            *all_pickable &= student.pickable(now, ignore_cooldown);
        }
        let mut eligible: Vec<u32> = groups
            .into_iter()
            .filter_map(|(group, ok)| ok.then_some(group))
            .collect();
        eligible.sort_unstable();
        eligible
    }

    /// Pickable members of one group, re-checked individually.
    pub fn group_members(&self, group: u32, now: f64, ignore_cooldown: bool) -> Vec<&Student> {
        self.students
            .values()
            .filter(|student| student.group() == group && student.pickable(now, ignore_cooldown))
            .collect()
    }

    /// Students ordered by (pick count desc, group, name, id), optionally
    /// filtered by a case-insensitive substring over id, name, group, and
    /// pick count.
    pub fn sorted_students(&self, filter: Option<&str>) -> Vec<&Student> {
        let needle = filter.map(str::to_lowercase).filter(|s| !s.is_empty());
        let mut items: Vec<&Student> = self
            .students
            .values()
            .filter(|student| match &needle {
                Some(needle) => {
                    student.id().to_lowercase().contains(needle)
                        || student.name().to_lowercase().contains(needle)
                        || student.group().to_string().contains(needle.as_str())
                        || student.pick_count().to_string().contains(needle.as_str())
                }
                None => true,
            })
            .collect();
        items.sort_by_key(|student| {
            (
                Reverse(student.pick_count()),
                student.group(),
                student.name().to_lowercase(),
                student.id().to_lowercase(),
            )
        });
        items
    }

    /// UI-facing view of the roster at `now`.
    pub fn snapshot(&self, now: f64) -> Value {
        let students: Vec<Value> = self
            .sorted_students(None)
            .into_iter()
            .map(|student| {
                let remaining = student.cooldown_remaining(now);
                json!({
                    "id": student.id(),
                    "name": student.name(),
                    "group": student.group(),
                    "last_pick": student.last_pick(),
                    "cooldown_started_at": student.cooldown_started_at(),
                    "cooldown_expires_at": student.cooldown_expires_at(),
                    "remaining_cooldown": remaining,
                    "is_cooling": remaining > 0.0,
                    "pick_count": student.pick_count(),
                    "pick_history": student.pick_history(),
                })
            })
            .collect();
        json!({
            "cooldown_days": self.cooldown_days,
            "students": students,
            "generated_at": now,
        })
    }

    fn student_mut(&mut self, id: &str) -> Result<&mut Student> {
        self.students
            .get_mut(id)
            .ok_or_else(|| ErrorCode::StudentMissing.into())
    }
}
