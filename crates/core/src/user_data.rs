//! Per-user dataset envelope
//!
//! Wraps a classroom collection together with the user-scoped sections of
//! the persisted payload: preferences, runtime timestamps, and an opaque
//! metadata bag. The envelope owns the `user_id` sanitation rules and the
//! top-level to/from JSON mapping; classroom payloads themselves go through
//! [`crate::schema`].

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::classrooms::ClassroomSet;
use crate::parse;
use crate::schema;

pub const USER_DATA_VERSION: u32 = 2;

/// User id applied when no identity is supplied at all.
pub const DEFAULT_USER_ID: &str = "local";

fn default_preferences() -> Map<String, Value> {
    let mut prefs = Map::new();
    prefs.insert("dismissed_intro_popup".to_string(), json!(false));
    prefs.insert("dismissed_draw_mode_tooltip".to_string(), json!(false));
    prefs.insert("theme".to_string(), json!("system"));
    prefs.insert("language".to_string(), json!("en-US"));
    prefs
}

/// Normalize a caller-supplied user id: trimmed, lowercased, and restricted
/// to `[a-z0-9-_]`. Anything else is rejected rather than escaped, since the
/// id becomes part of a filename.
pub fn sanitize_user_id(value: &str) -> Option<String> {
    let candidate = value.trim().to_lowercase();
    if candidate.is_empty() {
        return None;
    }
    if !candidate
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return None;
    }
    Some(candidate)
}

/// Fresh random user id, hex without hyphens.
pub fn generate_user_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// One user's complete in-memory dataset.
#[derive(Debug, Clone)]
pub struct UserData {
    pub user_id: String,
    pub classrooms: ClassroomSet,
    pub preferences: Map<String, Value>,
    pub runtime: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub version: u32,
}

impl UserData {
    /// Brand-new dataset with one empty default classroom.
    pub fn bootstrap(user_id: &str, now: f64) -> Self {
        let mut data = Self {
            user_id: sanitize_user_id(user_id).unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            classrooms: ClassroomSet::bootstrap(now),
            preferences: Map::new(),
            runtime: Map::new(),
            metadata: Map::new(),
            version: USER_DATA_VERSION,
        };
        data.ensure_defaults(now);
        data.touch_modified(now);
        data
    }

    /// Reconstruct a dataset from a persisted payload. Never fails: corrupt
    /// sections degrade to their defaults and an unusable classroom payload
    /// bootstraps a fresh collection.
    pub fn from_value(payload: Option<&Value>, default_user_id: &str, now: f64) -> Self {
        let obj = payload.and_then(Value::as_object);
        let empty = Map::new();
        let obj = obj.unwrap_or(&empty);

        let user_id = parse::coerce_id(obj.get("user_id"))
            .as_deref()
            .and_then(sanitize_user_id)
            .or_else(|| sanitize_user_id(default_user_id))
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string());
        let section = |key: &str| {
            obj.get(key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };
        let metadata = obj
            .get("meta")
            .or_else(|| obj.get("metadata"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut data = Self {
            user_id,
            classrooms: schema::parse_collection(payload, None, now),
            preferences: section("preferences"),
            runtime: section("runtime"),
            metadata,
            version: parse::coerce_u32(obj.get("version"), USER_DATA_VERSION),
        };
        data.ensure_defaults(now);
        data
    }

    /// Fill in any missing preference keys and runtime timestamps. Existing
    /// values always win over defaults.
    pub fn ensure_defaults(&mut self, now: f64) {
        self.version = self.version.max(USER_DATA_VERSION);
        for (key, value) in default_preferences() {
            self.preferences.entry(key).or_insert(value);
        }
        let created = self.runtime_timestamp("created_at").unwrap_or(now);
        let updated = self.runtime_timestamp("updated_at").unwrap_or(created);
        let accessed = self.runtime_timestamp("last_accessed_at").unwrap_or(updated);
        self.runtime.insert("created_at".to_string(), json!(created));
        self.runtime.insert("updated_at".to_string(), json!(updated));
        self.runtime
            .insert("last_accessed_at".to_string(), json!(accessed));
        self.runtime.insert(
            "active_class_id".to_string(),
            json!(self.classrooms.active_id()),
        );
    }

    fn runtime_timestamp(&self, key: &str) -> Option<f64> {
        let value = parse::coerce_f64(self.runtime.get(key), 0.0);
        (value > 0.0).then_some(value)
    }

    pub fn touch_accessed(&mut self, now: f64) {
        self.runtime
            .insert("last_accessed_at".to_string(), json!(now));
        if self.runtime_timestamp("created_at").is_none() {
            self.runtime.insert("created_at".to_string(), json!(now));
        }
        if self.runtime_timestamp("updated_at").is_none() {
            self.runtime.insert("updated_at".to_string(), json!(now));
        }
    }

    pub fn touch_modified(&mut self, now: f64) {
        self.runtime.insert("updated_at".to_string(), json!(now));
    }

    /// Serialize into the persisted unified payload.
    pub fn to_value(&self) -> Value {
        let mut payload = match schema::serialize_collection(&self.classrooms) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut runtime = self.runtime.clone();
        runtime.insert(
            "active_class_id".to_string(),
            json!(self.classrooms.active_id()),
        );
        payload.insert("version".to_string(), json!(self.version));
        payload.insert("user_id".to_string(), json!(self.user_id));
        payload.insert("preferences".to_string(), Value::Object(self.preferences.clone()));
        payload.insert("runtime".to_string(), Value::Object(runtime));
        if !self.metadata.is_empty() {
            payload.insert("meta".to_string(), Value::Object(self.metadata.clone()));
        }
        Value::Object(payload)
    }
}
