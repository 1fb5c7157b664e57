//! Draw-history ledger
//!
//! An append-mostly, newest-first log of draw events, kept per classroom and
//! independent of per-student pick history. Entries snapshot the chosen
//! students at draw time, so later renames or removals do not rewrite the log.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::draw::DrawMode;
use crate::error::{ErrorCode, Result};
use crate::parse;

/// Maximum note length in characters, after trimming.
pub const NOTE_MAX_CHARS: usize = 200;

/// Snapshot of a chosen student at draw time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickedStudent {
    pub id: String,
    pub name: String,
    pub group: u32,
}

/// One draw event.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    id: String,
    recorded_at: f64,
    mode: DrawMode,
    students: Vec<PickedStudent>,
    group: Option<u32>,
    requested_count: u32,
    ignore_cooldown: bool,
    note: String,
}

impl DrawRecord {
    pub fn new(
        recorded_at: f64,
        mode: DrawMode,
        students: Vec<PickedStudent>,
        group: Option<u32>,
        requested_count: u32,
        ignore_cooldown: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            recorded_at,
            mode,
            students,
            group,
            requested_count,
            ignore_cooldown,
            note: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn recorded_at(&self) -> f64 {
        self.recorded_at
    }

    pub fn mode(&self) -> DrawMode {
        self.mode
    }

    pub fn students(&self) -> &[PickedStudent] {
        &self.students
    }

    pub fn group(&self) -> Option<u32> {
        self.group
    }

    pub fn requested_count(&self) -> u32 {
        self.requested_count
    }

    pub fn ignore_cooldown(&self) -> bool {
        self.ignore_cooldown
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn export(&self) -> Value {
        json!({
            "id": self.id,
            "timestamp": self.recorded_at,
            "mode": self.mode.as_str(),
            "students": self.students,
            "group": self.group,
            "requested_count": self.requested_count,
            "ignore_cooldown": self.ignore_cooldown,
            "note": self.note,
        })
    }

    /// Parse a stored entry. Returns `None` for entries missing the
    /// essentials (an unknown mode, or no students list at all) so a single
    /// bad entry never aborts a load.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        // the mode key must be present and explicit; blank draws are not a
        // valid stored record even though blank parses as single on requests
        let mode_raw = obj.get("mode").and_then(Value::as_str)?.trim();
        if mode_raw.is_empty() {
            return None;
        }
        let mode = DrawMode::parse(mode_raw).ok()?;
        let students = obj
            .get("students")?
            .as_array()?
            .iter()
            .filter_map(|item| {
                let entry = item.as_object()?;
                Some(PickedStudent {
                    id: parse::coerce_id(entry.get("id"))?,
                    name: parse::coerce_string(entry.get("name")),
                    group: parse::coerce_u32(entry.get("group"), 0),
                })
            })
            .collect::<Vec<_>>();
        let id = parse::coerce_id(obj.get("id"))
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let group = obj
            .get("group")
            .filter(|v| !v.is_null())
            .map(|v| parse::coerce_u32(Some(v), 0));
        let mut note = parse::coerce_string(obj.get("note"));
        if note.chars().count() > NOTE_MAX_CHARS {
            note = note.chars().take(NOTE_MAX_CHARS).collect();
        }
        Some(Self {
            id,
            recorded_at: parse::coerce_f64(obj.get("timestamp"), 0.0),
            mode,
            students,
            group,
            requested_count: parse::coerce_u32(obj.get("requested_count"), 0),
            ignore_cooldown: parse::coerce_bool(obj.get("ignore_cooldown")),
            note,
        })
    }
}

/// Newest-first log of draw events for one classroom.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawLedger {
    entries: Vec<DrawRecord>,
    updated_at: f64,
}

impl DrawLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[DrawRecord] {
        &self.entries
    }

    pub fn updated_at(&self) -> f64 {
        self.updated_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&DrawRecord> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Insert an entry at the head and re-sort newest-first. The sort is
    /// stable, so same-timestamp entries keep insertion order with the
    /// newest insertion first. `updated_at` never decreases. Returns the
    /// entry id.
    pub fn record(&mut self, entry: DrawRecord, now: f64) -> String {
        let id = entry.id.clone();
        self.touch(entry.recorded_at.max(now));
        self.entries.insert(0, entry);
        self.entries
            .sort_by(|a, b| b.recorded_at.total_cmp(&a.recorded_at));
        id
    }

    /// Replace the note on an entry. Fails `history_missing` for an unknown
    /// id and `history_note_too_long` when the trimmed text exceeds
    /// [`NOTE_MAX_CHARS`].
    pub fn update_note(&mut self, id: &str, note: &str, now: f64) -> Result<()> {
        let trimmed = note.trim();
        if trimmed.chars().count() > NOTE_MAX_CHARS {
            return Err(ErrorCode::HistoryNoteTooLong.into());
        }
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(ErrorCode::HistoryMissing)?;
        entry.note = trimmed.to_string();
        self.touch(now);
        Ok(())
    }

    /// Remove an entry, returning whether it existed.
    pub fn remove(&mut self, id: &str, now: f64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.touch(now);
        }
        removed
    }

    pub fn export(&self) -> Value {
        json!({
            "entries": self.entries.iter().map(DrawRecord::export).collect::<Vec<_>>(),
            "updated_at": self.updated_at,
        })
    }

    /// Rebuild a ledger from a stored payload. Malformed entries are skipped
    /// with a warning rather than failing the whole load.
    pub fn from_value(value: Option<&Value>) -> Self {
        let mut ledger = Self::new();
        let obj = match value.and_then(Value::as_object) {
            Some(obj) => obj,
            None => return ledger,
        };
        ledger.updated_at = parse::coerce_f64(obj.get("updated_at"), 0.0);
        if let Some(entries) = obj.get("entries").and_then(Value::as_array) {
            for item in entries {
                match DrawRecord::from_value(item) {
                    Some(entry) => ledger.entries.push(entry),
                    None => {
                        tracing::warn!("Skipping malformed draw history entry");
                    }
                }
            }
        }
        ledger
            .entries
            .sort_by(|a, b| b.recorded_at.total_cmp(&a.recorded_at));
        ledger
    }

    fn touch(&mut self, timestamp: f64) {
        if timestamp > self.updated_at {
            self.updated_at = timestamp;
        }
    }
}
