//! Action dispatch surface
//!
//! One [`Session`] owns a single user's dataset, its storage slot, the
//! draw engine, and a clock. Hosts hand it `(action, payload)` pairs and
//! get back a result plus a full state snapshot for rendering. Every
//! mutating action persists before returning, so a crash after dispatch
//! never loses an acknowledged change.

use serde_json::{json, Map, Value};

use crate::clock::{Clock, SystemClock};
use crate::draw::{DrawRequest, DrawService};
use crate::error::{Error, ErrorCode, Result};
use crate::parse;
use crate::schema;
use crate::storage::{open_store, StateStore, StorageConfig};
use crate::user_data::{generate_user_id, sanitize_user_id, UserData};

/// How to open a session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Identity to load; `None` generates a fresh one.
    pub user_id: Option<String>,
    pub storage: StorageConfig,
}

/// Result of one dispatched action.
#[derive(Debug, Clone)]
pub struct ActionReply {
    /// Action-specific payload.
    pub result: Value,
    /// Full state snapshot after the action.
    pub state: Value,
}

/// A single user's live session.
pub struct Session {
    data: UserData,
    store: Box<dyn StateStore>,
    draws: DrawService,
    clock: Box<dyn Clock>,
}

impl Session {
    /// Open (or create) the dataset named by the config.
    pub fn open(config: SessionConfig) -> Result<Self> {
        let store = open_store(&config.storage)?;
        Self::with_parts(config, store, DrawService::new(), Box::new(SystemClock))
    }

    /// Open with explicit backend, draw engine, and clock. Tests inject a
    /// seeded engine and a manual clock here.
    pub fn with_parts(
        config: SessionConfig,
        store: Box<dyn StateStore>,
        draws: DrawService,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let user_id = config
            .user_id
            .as_deref()
            .and_then(sanitize_user_id)
            .unwrap_or_else(generate_user_id);
        let now = clock.now();
        let mut session = match store.load(&user_id)? {
            Some(text) => {
                let payload = serde_json::from_str::<Value>(&text).ok();
                if payload.is_none() {
                    tracing::warn!(user_id = %user_id, "Stored payload is not valid JSON");
                }
                let mut data = UserData::from_value(payload.as_ref(), &user_id, now);
                data.touch_accessed(now);
                Self {
                    data,
                    store,
                    draws,
                    clock,
                }
            }
            None => {
                tracing::info!(user_id = %user_id, "Creating new dataset");
                let mut data = UserData::bootstrap(&user_id, now);
                data.touch_accessed(now);
                let session = Self {
                    data,
                    store,
                    draws,
                    clock,
                };
                session.save()?;
                session
            }
        };
        session.data.ensure_defaults(now);
        Ok(session)
    }

    pub fn user_id(&self) -> &str {
        &self.data.user_id
    }

    pub fn data(&self) -> &UserData {
        &self.data
    }

    /// Where this session persists, for diagnostics.
    pub fn location_hint(&self) -> String {
        self.store.location_hint()
    }

    /// Run one action. Errors carry an [`ErrorCode`] whose wire name hosts
    /// can surface directly.
    pub fn dispatch(&mut self, action: &str, payload: &Value) -> Result<ActionReply> {
        let action = action.trim();
        let now = self.clock.now();
        let (result, mutated) = match action {
            "student_create" => (self.student_create(payload)?, true),
            "student_update" => (self.student_update(payload)?, true),
            "student_delete" => (self.student_delete(payload)?, true),
            "student_force_cooldown" => (self.student_force_cooldown(payload, now)?, true),
            "student_release_cooldown" => (self.student_release_cooldown(payload)?, true),
            "student_history_clear" => (self.student_history_clear(payload)?, true),
            "student_history_remove" => (self.student_history_remove(payload)?, true),
            "set_cooldown" => (self.set_cooldown(payload)?, true),
            "clear_cooldown" => (self.clear_cooldown()?, true),
            "random_pick" => (self.random_pick(payload, now)?, true),
            "history_note" => (self.history_note(payload, now)?, true),
            "history_delete" => (self.history_delete(payload, now)?, true),
            "class_create" => (self.class_create(payload, now)?, true),
            "class_rename" => (self.class_rename(payload, now)?, true),
            "class_delete" => (self.class_delete(payload, now)?, true),
            "class_switch" => (self.class_switch(payload, now)?, true),
            "class_reorder" => (self.class_reorder(payload)?, true),
            "export_data" => (self.export_data(), false),
            "import_data" => (self.import_data(payload, now)?, true),
            _ => return Err(ErrorCode::UnsupportedAction.into()),
        };
        if mutated {
            self.data.touch_modified(now);
            self.save()?;
        }
        Ok(ActionReply {
            result,
            state: self.state_snapshot(now),
        })
    }

    /// Full state for hosts to render: classroom list, active roster with
    /// live cooldown figures, and preferences.
    pub fn state_snapshot(&self, now: f64) -> Value {
        let classes: Vec<Value> = self
            .data
            .classrooms
            .iter()
            .into_iter()
            .map(|classroom| classroom.metadata())
            .collect();
        let active = self.data.classrooms.active();
        json!({
            "version": self.data.version,
            "user_id": self.data.user_id,
            "active_class_id": active.id,
            "classes": classes,
            "roster": active.roster.snapshot(now),
            "history": active.roster.ledger().export(),
            "preferences": self.data.preferences,
        })
    }

    /// Persist the current dataset through the backend.
    pub fn save(&self) -> Result<()> {
        let text = serde_json::to_string(&self.data.to_value())?;
        self.store.save(&self.data.user_id, &text)?;
        tracing::debug!(user_id = %self.data.user_id, bytes = text.len(), "Dataset saved");
        Ok(())
    }

    // --- student actions --------------------------------------------------

    fn student_create(&mut self, payload: &Value) -> Result<Value> {
        let name = parse::coerce_string(payload.get("name"));
        let group = parse::coerce_u32(payload.get("group"), 0);
        let id = parse::coerce_id(payload.get("student_id"));
        let roster = &mut self.data.classrooms.active_mut().roster;
        let student = roster.create_student(&name, group, id.as_deref())?;
        Ok(json!({"type": "create_student", "student_id": student.id()}))
    }

    fn student_update(&mut self, payload: &Value) -> Result<Value> {
        let id = required_student_id(payload)?;
        let name = parse::coerce_string(payload.get("name"));
        let group = parse::coerce_u32(payload.get("group"), 0);
        let new_id = parse::coerce_id(payload.get("new_id"));
        let roster = &mut self.data.classrooms.active_mut().roster;
        let student = roster.update_student(&id, &name, group, new_id.as_deref())?;
        Ok(json!({"type": "update_student", "student_id": student.id()}))
    }

    fn student_delete(&mut self, payload: &Value) -> Result<Value> {
        let id = required_student_id(payload)?;
        let roster = &mut self.data.classrooms.active_mut().roster;
        if !roster.remove_student(&id) {
            return Err(ErrorCode::StudentMissing.into());
        }
        Ok(json!({"type": "delete_student", "student_id": id}))
    }

    fn student_force_cooldown(&mut self, payload: &Value, now: f64) -> Result<Value> {
        let id = required_student_id(payload)?;
        self.data
            .classrooms
            .active_mut()
            .roster
            .force_cooldown(&id, now)?;
        Ok(json!({"type": "force_cooldown", "student_id": id}))
    }

    fn student_release_cooldown(&mut self, payload: &Value) -> Result<Value> {
        let id = required_student_id(payload)?;
        self.data
            .classrooms
            .active_mut()
            .roster
            .release_cooldown(&id)?;
        Ok(json!({"type": "release_cooldown", "student_id": id}))
    }

    fn student_history_clear(&mut self, payload: &Value) -> Result<Value> {
        let id = required_student_id(payload)?;
        self.data
            .classrooms
            .active_mut()
            .roster
            .clear_student_history(&id)?;
        Ok(json!({"type": "clear_history", "student_id": id}))
    }

    fn student_history_remove(&mut self, payload: &Value) -> Result<Value> {
        let id = required_student_id(payload)?;
        let timestamp = match payload.get("timestamp") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
        .ok_or(ErrorCode::HistoryInvalid)?;
        let roster = &mut self.data.classrooms.active_mut().roster;
        if !roster.remove_history_point(&id, timestamp)? {
            return Err(ErrorCode::HistoryMissing.into());
        }
        Ok(json!({
            "type": "remove_history",
            "student_id": id,
            "timestamp": timestamp,
        }))
    }

    // --- pool actions -----------------------------------------------------

    fn set_cooldown(&mut self, payload: &Value) -> Result<Value> {
        let days = parse::coerce_i64(payload.get("days"), 0);
        if days < 1 {
            return Err(ErrorCode::CooldownInvalid.into());
        }
        let roster = &mut self.data.classrooms.active_mut().roster;
        roster.set_cooldown_days(days as u32)?;
        Ok(json!({"cooldown_days": roster.cooldown_days()}))
    }

    fn clear_cooldown(&mut self) -> Result<Value> {
        self.data
            .classrooms
            .active_mut()
            .roster
            .clear_all_cooldowns();
        Ok(json!({"cleared": true}))
    }

    fn random_pick(&mut self, payload: &Value, now: f64) -> Result<Value> {
        let request = DrawRequest::from_payload(payload)?;
        let outcome = self
            .draws
            .execute(&mut self.data.classrooms, &request, now)?;
        Ok(outcome.to_payload())
    }

    // --- ledger actions ---------------------------------------------------

    fn history_note(&mut self, payload: &Value, now: f64) -> Result<Value> {
        let entry_id = required_entry_id(payload)?;
        let note = parse::coerce_string(payload.get("note"));
        self.data
            .classrooms
            .active_mut()
            .roster
            .ledger_mut()
            .update_note(&entry_id, &note, now)?;
        Ok(json!({"type": "history_note", "entry_id": entry_id}))
    }

    fn history_delete(&mut self, payload: &Value, now: f64) -> Result<Value> {
        let entry_id = required_entry_id(payload)?;
        let ledger = self.data.classrooms.active_mut().roster.ledger_mut();
        if !ledger.remove(&entry_id, now) {
            return Err(ErrorCode::HistoryMissing.into());
        }
        Ok(json!({"type": "history_delete", "entry_id": entry_id}))
    }

    // --- classroom actions ------------------------------------------------

    fn class_create(&mut self, payload: &Value, now: f64) -> Result<Value> {
        let name = parse::coerce_string(payload.get("name"));
        if name.is_empty() {
            return Err(ErrorCode::ClassNameRequired.into());
        }
        let class_id = self.data.classrooms.create_classroom(&name, true, now);
        Ok(json!({"type": "class_create", "class_id": class_id}))
    }

    fn class_rename(&mut self, payload: &Value, now: f64) -> Result<Value> {
        let class_id = required_class_id(payload)?;
        // blank names are not an error here: the model falls back to the
        // default label, unlike class_create which requires one
        let name = parse::coerce_string(payload.get("name"));
        self.data.classrooms.rename(&class_id, &name, now)?;
        Ok(json!({"type": "class_rename", "class_id": class_id}))
    }

    fn class_delete(&mut self, payload: &Value, now: f64) -> Result<Value> {
        let class_id = required_class_id(payload)?;
        self.data.classrooms.remove_classroom(&class_id, now)?;
        Ok(json!({"type": "class_delete", "class_id": class_id}))
    }

    fn class_switch(&mut self, payload: &Value, now: f64) -> Result<Value> {
        let class_id = required_class_id(payload)?;
        self.data.classrooms.set_active(&class_id, now)?;
        Ok(json!({"type": "class_switch", "class_id": class_id}))
    }

    fn class_reorder(&mut self, payload: &Value) -> Result<Value> {
        let order = payload
            .get("order")
            .and_then(Value::as_array)
            .ok_or(ErrorCode::ClassOrderInvalid)?;
        let ids: Vec<String> = order
            .iter()
            .map(|item| parse::coerce_id(Some(item)).ok_or(Error::from(ErrorCode::ClassOrderInvalid)))
            .collect::<Result<_>>()?;
        self.data.classrooms.reorder(&ids);
        Ok(json!({"type": "class_reorder"}))
    }

    // --- transfer actions -------------------------------------------------

    fn export_data(&self) -> Value {
        json!({"type": "export_data", "data": self.data.to_value()})
    }

    /// Replace the classroom collection from an external payload. The
    /// payload goes through the same normalizer as stored data, so every
    /// supported generation imports cleanly.
    fn import_data(&mut self, payload: &Value, now: f64) -> Result<Value> {
        let incoming = payload.get("data").unwrap_or(payload);
        self.data.classrooms = schema::parse_collection(Some(incoming), None, now);
        if let Some(prefs) = incoming.get("preferences").and_then(Value::as_object) {
            self.data.preferences = merge_preferences(&self.data.preferences, prefs);
        }
        self.data.ensure_defaults(now);
        Ok(json!({
            "type": "import_data",
            "class_count": self.data.classrooms.len(),
        }))
    }
}

fn merge_preferences(current: &Map<String, Value>, incoming: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = current.clone();
    for (key, value) in incoming {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn required_student_id(payload: &Value) -> Result<String> {
    parse::coerce_id(payload.get("student_id")).ok_or_else(|| ErrorCode::StudentMissing.into())
}

fn required_class_id(payload: &Value) -> Result<String> {
    parse::coerce_id(payload.get("class_id")).ok_or_else(|| ErrorCode::ClassMissing.into())
}

fn required_entry_id(payload: &Value) -> Result<String> {
    parse::coerce_id(payload.get("entry_id")).ok_or_else(|| ErrorCode::HistoryMissing.into())
}
