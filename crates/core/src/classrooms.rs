//! Classrooms and the classroom collection
//!
//! A collection owns at least one classroom at all times. Each classroom has
//! a dense ordinal position, its own roster, and an opaque bag of
//! selection-engine metadata (`extra`) that round-trips through persistence
//! untouched.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{ErrorCode, Result};
use crate::roster::Roster;

/// Current collection schema version, always emitted on write.
pub const SCHEMA_VERSION: u32 = 2;

/// Label used when a classroom has no usable name.
pub const DEFAULT_CLASS_NAME: &str = "New Class";

/// One named pool of students with bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct Classroom {
    pub id: String,
    pub name: String,
    pub roster: Roster,
    pub created_at: f64,
    pub updated_at: f64,
    pub last_used_at: f64,
    pub position: u32,
    /// Uninterpreted `algorithm_data` keys preserved through round-trips.
    pub extra: Map<String, Value>,
}

impl Classroom {
    pub fn new(name: &str, now: f64) -> Self {
        Self {
            id: generate_class_id(),
            name: normalize_name(name),
            roster: Roster::new(),
            created_at: now,
            updated_at: now,
            last_used_at: now,
            position: 0,
            extra: Map::new(),
        }
    }

    /// Listing metadata, without the roster payload.
    pub fn metadata(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "order": self.position,
            "student_count": self.roster.len(),
            "cooldown_days": self.roster.cooldown_days(),
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "last_used_at": self.last_used_at,
        })
    }
}

/// All classrooms for one persistence unit, plus the active selection.
#[derive(Debug, Clone)]
pub struct ClassroomSet {
    classes: HashMap<String, Classroom>,
    active_id: String,
    version: u32,
}

impl ClassroomSet {
    /// A fresh collection holding one empty default classroom.
    pub fn bootstrap(now: f64) -> Self {
        let classroom = Classroom::new(DEFAULT_CLASS_NAME, now);
        let active_id = classroom.id.clone();
        let mut classes = HashMap::new();
        classes.insert(active_id.clone(), classroom);
        Self {
            classes,
            active_id,
            version: SCHEMA_VERSION,
        }
    }

    /// Rebuild a collection from reconstructed classrooms. Returns `None`
    /// when the list is empty; an unknown active id falls back to the
    /// smallest (position, created_at, id) classroom, and ordinals are
    /// re-normalized dense.
    pub fn from_parts(classrooms: Vec<Classroom>, active_id: &str, version: u32) -> Option<Self> {
        if classrooms.is_empty() {
            return None;
        }
        let mut classes = HashMap::with_capacity(classrooms.len());
        for classroom in classrooms {
            classes.insert(classroom.id.clone(), classroom);
        }
        let mut set = Self {
            classes,
            active_id: active_id.to_string(),
            version: version.max(SCHEMA_VERSION),
        };
        if !set.classes.contains_key(&set.active_id) {
            set.active_id = set.preferred_id();
        }
        set.normalize_positions();
        Some(set)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Classroom> {
        self.classes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Classroom> {
        self.classes.get_mut(id)
    }

    /// Classrooms ordered by (position, creation time, id).
    pub fn iter(&self) -> Vec<&Classroom> {
        let mut items: Vec<&Classroom> = self.classes.values().collect();
        items.sort_by(|a, b| {
            (a.position, a.created_at, a.id.as_str())
                .partial_cmp(&(b.position, b.created_at, b.id.as_str()))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items
    }

    /// The active classroom. The active id always resolves; if a stored id
    /// went stale it falls back to the preferred classroom.
    pub fn active(&self) -> &Classroom {
        match self.classes.get(&self.active_id) {
            Some(classroom) => classroom,
            None => self.preferred(),
        }
    }

    pub fn active_mut(&mut self) -> &mut Classroom {
        if !self.classes.contains_key(&self.active_id) {
            self.active_id = self.preferred_id();
        }
        self.classes
            .get_mut(&self.active_id)
            .expect("collection owns at least one classroom")
    }

    /// Create a classroom at the next ordinal. A blank name gets the default
    /// label. Returns the new id.
    pub fn create_classroom(&mut self, name: &str, set_active: bool, now: f64) -> String {
        let mut classroom = Classroom::new(name, now);
        while self.classes.contains_key(&classroom.id) {
            classroom.id = generate_class_id();
        }
        classroom.position = self.next_position();
        let id = classroom.id.clone();
        self.classes.insert(id.clone(), classroom);
        if set_active {
            self.active_id = id.clone();
        }
        id
    }

    /// Remove a classroom. Fails `class_missing` for unknown ids and
    /// `class_last` when it is the only one left.
    pub fn remove_classroom(&mut self, id: &str, now: f64) -> Result<()> {
        if !self.classes.contains_key(id) {
            return Err(ErrorCode::ClassMissing.into());
        }
        if self.classes.len() == 1 {
            return Err(ErrorCode::ClassLast.into());
        }
        self.classes.remove(id);
        if self.active_id == id {
            let replacement = self.preferred_id();
            self.set_active(&replacement, now)?;
        }
        self.normalize_positions();
        Ok(())
    }

    /// Switch the active classroom, bumping its last-used timestamp.
    pub fn set_active(&mut self, id: &str, now: f64) -> Result<()> {
        let classroom = self
            .classes
            .get_mut(id)
            .ok_or(ErrorCode::ClassMissing)?;
        classroom.last_used_at = now;
        self.active_id = id.to_string();
        Ok(())
    }

    /// Assign ordinals per position in `ids`; unknown ids are ignored and
    /// the result is re-normalized dense.
    pub fn reorder(&mut self, ids: &[String]) {
        let order: HashMap<&str, u32> = ids
            .iter()
            .enumerate()
            .map(|(index, id)| (id.as_str(), index as u32))
            .collect();
        for classroom in self.classes.values_mut() {
            if let Some(position) = order.get(classroom.id.as_str()) {
                classroom.position = *position;
            }
        }
        self.normalize_positions();
    }

    /// Rename a classroom; an empty name falls back to the default label.
    pub fn rename(&mut self, id: &str, name: &str, now: f64) -> Result<()> {
        let classroom = self
            .classes
            .get_mut(id)
            .ok_or(ErrorCode::ClassMissing)?;
        classroom.name = normalize_name(name);
        classroom.updated_at = now;
        Ok(())
    }

    /// Mark the active classroom modified.
    pub fn touch_modified(&mut self, now: f64) {
        let classroom = self.active_mut();
        classroom.updated_at = now;
        classroom.last_used_at = now;
    }

    /// Mark the active classroom accessed.
    pub fn touch_accessed(&mut self, now: f64) {
        self.active_mut().last_used_at = now;
    }

    fn next_position(&self) -> u32 {
        self.classes
            .values()
            .map(|classroom| classroom.position + 1)
            .max()
            .unwrap_or(0)
    }

    fn normalize_positions(&mut self) {
        let ordered: Vec<String> = self.iter().iter().map(|c| c.id.clone()).collect();
        for (index, id) in ordered.iter().enumerate() {
            if let Some(classroom) = self.classes.get_mut(id) {
                classroom.position = index as u32;
            }
        }
    }

    fn preferred(&self) -> &Classroom {
        self.classes
            .values()
            .min_by(|a, b| {
                (a.position, a.created_at, a.id.as_str())
                    .partial_cmp(&(b.position, b.created_at, b.id.as_str()))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("collection owns at least one classroom")
    }

    fn preferred_id(&self) -> String {
        self.preferred().id.clone()
    }
}

fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        DEFAULT_CLASS_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn generate_class_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_has_one_default_class() {
        let set = ClassroomSet::bootstrap(100.0);
        assert_eq!(set.len(), 1);
        assert_eq!(set.active().name, DEFAULT_CLASS_NAME);
        assert_eq!(set.active().position, 0);
        assert_eq!(set.version(), SCHEMA_VERSION);
    }

    #[test]
    fn test_create_assigns_next_ordinal() {
        let mut set = ClassroomSet::bootstrap(100.0);
        let second = set.create_classroom("B", false, 200.0);
        let third = set.create_classroom("", true, 300.0);
        assert_eq!(set.get(&second).unwrap().position, 1);
        assert_eq!(set.get(&third).unwrap().position, 2);
        assert_eq!(set.get(&third).unwrap().name, DEFAULT_CLASS_NAME);
        assert_eq!(set.active_id(), third);
    }

    #[test]
    fn test_remove_last_class_is_forbidden() {
        let mut set = ClassroomSet::bootstrap(100.0);
        let only = set.active_id().to_string();
        let err = set.remove_classroom(&only, 200.0).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ClassLast));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_active_falls_over_to_preferred() {
        let mut set = ClassroomSet::bootstrap(100.0);
        let first = set.active_id().to_string();
        let second = set.create_classroom("B", true, 200.0);
        let third = set.create_classroom("C", false, 300.0);

        set.remove_classroom(&second, 400.0).unwrap();
        assert_eq!(set.active_id(), first);
        // ordinals re-normalized dense
        assert_eq!(set.get(&first).unwrap().position, 0);
        assert_eq!(set.get(&third).unwrap().position, 1);

        let err = set.remove_classroom("missing", 400.0).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ClassMissing));
    }

    #[test]
    fn test_set_active_bumps_last_used() {
        let mut set = ClassroomSet::bootstrap(100.0);
        let second = set.create_classroom("B", false, 200.0);
        set.set_active(&second, 500.0).unwrap();
        assert_eq!(set.active_id(), second);
        assert_eq!(set.active().last_used_at, 500.0);
        assert_eq!(
            set.set_active("missing", 500.0).unwrap_err().code(),
            Some(ErrorCode::ClassMissing)
        );
    }

    #[test]
    fn test_reorder_ignores_unknown_ids() {
        let mut set = ClassroomSet::bootstrap(100.0);
        let first = set.active_id().to_string();
        let second = set.create_classroom("B", false, 200.0);
        set.reorder(&["ghost".to_string(), second.clone(), first.clone()]);
        assert_eq!(set.get(&second).unwrap().position, 0);
        assert_eq!(set.get(&first).unwrap().position, 1);
        let ordered: Vec<&str> = set.iter().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ordered, vec![second.as_str(), first.as_str()]);
    }

    #[test]
    fn test_rename_blank_uses_default_label() {
        let mut set = ClassroomSet::bootstrap(100.0);
        let id = set.active_id().to_string();
        set.rename(&id, "  Algebra  ", 200.0).unwrap();
        assert_eq!(set.active().name, "Algebra");
        assert_eq!(set.active().updated_at, 200.0);
        set.rename(&id, "   ", 300.0).unwrap();
        assert_eq!(set.active().name, DEFAULT_CLASS_NAME);
    }

    #[test]
    fn test_from_parts_validates_active() {
        let mut a = Classroom::new("A", 100.0);
        a.position = 5;
        let mut b = Classroom::new("B", 50.0);
        b.position = 5;
        let (a_id, b_id) = (a.id.clone(), b.id.clone());

        let set = ClassroomSet::from_parts(vec![a, b], "stale", 1).unwrap();
        // equal positions break by creation time
        assert_eq!(set.active_id(), b_id);
        assert_eq!(set.get(&b_id).unwrap().position, 0);
        assert_eq!(set.get(&a_id).unwrap().position, 1);
        // version never goes below the current generation
        assert_eq!(set.version(), SCHEMA_VERSION);

        assert!(ClassroomSet::from_parts(vec![], "x", 2).is_none());
    }
}
