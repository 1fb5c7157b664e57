//! Versioned persistence normalizer
//!
//! Three payload generations are accepted on read and exactly one is
//! produced on write. Every per-generation field name lives in this module;
//! the rest of the crate only ever sees the canonical model.
//!
//! Detection order:
//! 1. unified v2 — `classes` is an object keyed by classroom id
//! 2. multi-classroom v1 — `classes` is an array of metadata objects with
//!    roster payloads inline, in `classes_data`, or in `current_class`
//! 3. legacy — a single pool `{cooldown_days, students}` or a bare student
//!    list, no classroom concept
//!
//! Anything else falls through to a caller-supplied fallback payload, then
//! to a freshly generated single default classroom.

use serde_json::{json, Map, Value};

use crate::classrooms::{generate_class_id, Classroom, ClassroomSet, DEFAULT_CLASS_NAME, SCHEMA_VERSION};
use crate::ledger::DrawLedger;
use crate::parse;
use crate::roster::{Roster, DEFAULT_COOLDOWN_DAYS};
use crate::student::Student;

/// Keys of `algorithm_data` owned by the engine; everything else in the bag
/// is opaque and preserved verbatim.
const OWNED_ALGORITHM_KEYS: [&str; 4] = [
    "cooldown_days",
    "history",
    "last_selected_id",
    "last_selected_at",
];

/// Reconstruct a collection from a raw payload, trying the fallback payload
/// on corrupt or unrecognizable input and bootstrapping a default collection
/// as the last resort.
pub fn parse_collection(
    payload: Option<&Value>,
    fallback: Option<&Value>,
    now: f64,
) -> ClassroomSet {
    if let Some(set) = payload.and_then(|raw| detect_and_parse(raw, now)) {
        return set;
    }
    if let Some(set) = fallback.and_then(|raw| detect_and_parse(raw, now)) {
        tracing::warn!("Primary payload unrecognized, restored from fallback");
        return set;
    }
    tracing::warn!("No usable payload, bootstrapping a default classroom");
    ClassroomSet::bootstrap(now)
}

/// Like [`parse_collection`] but from raw text; invalid JSON counts as an
/// unrecognizable payload.
pub fn parse_collection_str(text: &str, fallback: Option<&Value>, now: f64) -> ClassroomSet {
    let parsed = serde_json::from_str::<Value>(text).ok();
    parse_collection(parsed.as_ref(), fallback, now)
}

/// Serialize a collection in the unified v2 shape. Always emitted compact,
/// regardless of which generation was read.
pub fn serialize_collection(set: &ClassroomSet) -> Value {
    let mut classes = Map::new();
    for classroom in set.iter() {
        classes.insert(classroom.id.clone(), classroom_to_unified(classroom));
    }
    json!({
        "version": set.version(),
        "current_class_id": set.active_id(),
        "classes": classes,
    })
}

fn detect_and_parse(raw: &Value, now: f64) -> Option<ClassroomSet> {
    if let Some(obj) = raw.as_object() {
        match obj.get("classes") {
            Some(Value::Object(classes)) => return parse_unified(obj, classes),
            Some(Value::Array(classes)) => return parse_v1(obj, classes),
            _ => {}
        }
        if obj.contains_key("students") || obj.contains_key("cooldown_days") {
            return Some(parse_legacy(raw, now));
        }
        return None;
    }
    if raw.is_array() {
        return Some(parse_legacy(raw, now));
    }
    None
}

// --- unified v2 -----------------------------------------------------------

fn parse_unified(root: &Map<String, Value>, classes: &Map<String, Value>) -> Option<ClassroomSet> {
    let mut classrooms = Vec::new();
    for (index, (key, entry)) in classes.iter().enumerate() {
        let entry = match entry.as_object() {
            Some(entry) => entry,
            None => {
                tracing::warn!(class_id = %key, "Skipping malformed classroom entry");
                continue;
            }
        };
        let id = parse::coerce_id(Some(&Value::String(key.clone())))
            .unwrap_or_else(generate_class_id);
        let meta = entry
            .get("meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let algorithm = entry
            .get("algorithm_data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let cooldown_days =
            parse::coerce_u32(algorithm.get("cooldown_days"), DEFAULT_COOLDOWN_DAYS);
        let ledger = DrawLedger::from_value(algorithm.get("history"));
        let last_selected = parse::coerce_id(algorithm.get("last_selected_id")).map(|id| {
            (id, parse::coerce_f64(algorithm.get("last_selected_at"), 0.0))
        });
        let extra: Map<String, Value> = algorithm
            .iter()
            .filter(|(key, _)| !OWNED_ALGORITHM_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut students = Vec::new();
        if let Some(student_map) = entry.get("students").and_then(Value::as_object) {
            for (student_key, student_entry) in student_map {
                match unified_student(student_key, student_entry) {
                    Some(student) => students.push(student),
                    None => {
                        tracing::warn!(student_id = %student_key, "Skipping malformed student entry");
                    }
                }
            }
        }

        let created_at = parse::coerce_f64(meta.get("created_at"), 0.0);
        classrooms.push(Classroom {
            id,
            name: non_empty_name(parse::coerce_string(meta.get("name"))),
            roster: Roster::from_parts(cooldown_days, students, ledger, last_selected),
            created_at,
            updated_at: parse::coerce_f64(meta.get("updated_at"), created_at),
            last_used_at: parse::coerce_f64(meta.get("last_used_at"), 0.0),
            position: parse::coerce_i64(meta.get("order"), index as i64).max(0) as u32,
            extra,
        });
    }
    let active_id = active_id_hint(root);
    let version = parse::coerce_u32(root.get("version"), SCHEMA_VERSION);
    ClassroomSet::from_parts(classrooms, &active_id, version)
}

/// Active-classroom hint: v2 keeps it top-level, some exports only carried
/// it inside `runtime`.
fn active_id_hint(root: &Map<String, Value>) -> String {
    parse::coerce_id(root.get("current_class_id"))
        .or_else(|| {
            root.get("runtime")
                .and_then(Value::as_object)
                .and_then(|runtime| parse::coerce_id(runtime.get("active_class_id")))
        })
        .unwrap_or_default()
}

fn unified_student(key: &str, value: &Value) -> Option<Student> {
    let obj = value.as_object()?;
    let id = parse::coerce_id(Some(&Value::String(key.to_string())))
        .or_else(|| parse::coerce_id(obj.get("id")))?;
    Some(Student::with_state(
        id,
        &parse::coerce_string(obj.get("name")),
        parse::coerce_u32(obj.get("group"), 0),
        parse::coerce_f64(obj.get("last_picked_at"), 0.0),
        parse::coerce_u64(obj.get("total_picked_count"), 0),
        parse::coerce_history(obj.get("pick_history")),
        parse::coerce_f64(obj.get("cooldown_started_at"), 0.0),
        parse::coerce_f64(obj.get("cooldown_expires_at"), 0.0),
    ))
}

fn classroom_to_unified(classroom: &Classroom) -> Value {
    let mut algorithm = Map::new();
    algorithm.insert(
        "cooldown_days".to_string(),
        json!(classroom.roster.cooldown_days()),
    );
    algorithm.insert("history".to_string(), classroom.roster.ledger().export());
    if let Some((id, at)) = classroom.roster.last_selected() {
        algorithm.insert("last_selected_id".to_string(), json!(id));
        algorithm.insert("last_selected_at".to_string(), json!(at));
    }
    for (key, value) in &classroom.extra {
        if !OWNED_ALGORITHM_KEYS.contains(&key.as_str()) {
            algorithm.insert(key.clone(), value.clone());
        }
    }

    let mut students = Map::new();
    for student in classroom.roster.students() {
        students.insert(
            student.id().to_string(),
            json!({
                "id": student.id(),
                "name": student.name(),
                "group": student.group(),
                "total_picked_count": student.pick_count(),
                "last_picked_at": student.last_pick(),
                "pick_history": student.pick_history(),
                "cooldown_started_at": student.cooldown_started_at(),
                "cooldown_expires_at": student.cooldown_expires_at(),
            }),
        );
    }

    json!({
        "meta": {
            "name": classroom.name,
            "order": classroom.position,
            "created_at": classroom.created_at,
            "updated_at": classroom.updated_at,
            "last_used_at": classroom.last_used_at,
        },
        "algorithm_data": algorithm,
        "students": students,
    })
}

// --- multi-classroom v1 ---------------------------------------------------

fn parse_v1(root: &Map<String, Value>, classes: &[Value]) -> Option<ClassroomSet> {
    let classes_data = root
        .get("classes_data")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let current_entry = root
        .get("current_class")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let current_entry_id = parse::coerce_id(current_entry.get("id")).unwrap_or_default();

    let mut classrooms = Vec::new();
    for (index, item) in classes.iter().enumerate() {
        let item = match item.as_object() {
            Some(item) => item,
            None => continue,
        };
        let id = parse::coerce_id(item.get("id")).unwrap_or_else(generate_class_id);
        // roster payload: inline, cross-referenced, or the current-class copy
        let blob = item
            .get("data")
            .filter(|v| !v.is_null())
            .or_else(|| classes_data.get(&id))
            .or_else(|| {
                (current_entry_id == id)
                    .then(|| current_entry.get("payload"))
                    .flatten()
            });
        let created_at = parse::coerce_f64(item.get("created_at"), 0.0);
        classrooms.push(Classroom {
            id,
            name: non_empty_name(parse::coerce_string(item.get("name"))),
            roster: roster_from_blob(blob),
            created_at,
            updated_at: parse::coerce_f64(item.get("updated_at"), created_at),
            last_used_at: parse::coerce_f64(item.get("last_used_at"), 0.0),
            position: parse::coerce_i64(item.get("order"), index as i64).max(0) as u32,
            extra: Map::new(),
        });
    }
    let active_id = active_id_hint(root);
    let version = parse::coerce_u32(root.get("version"), SCHEMA_VERSION);
    ClassroomSet::from_parts(classrooms, &active_id, version)
}

// --- legacy ----------------------------------------------------------------

fn parse_legacy(raw: &Value, now: f64) -> ClassroomSet {
    let mut classroom = Classroom::new(DEFAULT_CLASS_NAME, now);
    classroom.roster = roster_from_blob(Some(raw));
    let active = classroom.id.clone();
    ClassroomSet::from_parts(vec![classroom], &active, SCHEMA_VERSION)
        .unwrap_or_else(|| ClassroomSet::bootstrap(now))
}

/// Parse a legacy/v1 roster payload: `{cooldown_days, students, history}` or
/// a bare student list.
fn roster_from_blob(blob: Option<&Value>) -> Roster {
    let (cooldown_days, students_value, history_value) = match blob {
        Some(Value::Object(obj)) => (
            parse::coerce_u32(obj.get("cooldown_days"), DEFAULT_COOLDOWN_DAYS),
            obj.get("students").cloned().unwrap_or(Value::Array(vec![])),
            obj.get("history").cloned(),
        ),
        Some(Value::Array(items)) => (
            DEFAULT_COOLDOWN_DAYS,
            Value::Array(items.clone()),
            None,
        ),
        _ => (DEFAULT_COOLDOWN_DAYS, Value::Array(vec![]), None),
    };

    let mut students: Vec<Student> = Vec::new();
    let mut idless: Vec<&Map<String, Value>> = Vec::new();
    if let Some(items) = students_value.as_array() {
        for item in items {
            let obj = match item.as_object() {
                Some(obj) => obj,
                None => continue,
            };
            match parse::coerce_id(obj.get("id")) {
                Some(id) => {
                    if let Some(student) = legacy_student(obj, &id, cooldown_days) {
                        students.push(student);
                    }
                }
                None => idless.push(obj),
            }
        }
    }
    // students that came without any id get generated numeric ones
    if !idless.is_empty() {
        let mut next = students
            .iter()
            .filter_map(|s| s.id().parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        for obj in idless {
            if let Some(student) = legacy_student(obj, &next.to_string(), cooldown_days) {
                students.push(student);
            }
            next += 1;
        }
    }

    Roster::from_parts(
        cooldown_days,
        students,
        DrawLedger::from_value(history_value.as_ref()),
        None,
    )
}

fn legacy_student(
    obj: &Map<String, Value>,
    id: &str,
    default_cooldown_days: u32,
) -> Option<Student> {
    // cooldown may be flat fields or a nested {started_at, expires_at} object
    let nested = obj.get("cooldown").and_then(Value::as_object);
    let has_explicit_cooldown = nested.is_some()
        || obj.contains_key("cooldown_started_at")
        || obj.contains_key("cooldown_expires_at");
    let started = nested
        .map(|c| parse::coerce_f64(c.get("started_at"), 0.0))
        .unwrap_or_else(|| parse::coerce_f64(obj.get("cooldown_started_at"), 0.0));
    let expires = nested
        .map(|c| parse::coerce_f64(c.get("expires_at"), 0.0))
        .unwrap_or_else(|| parse::coerce_f64(obj.get("cooldown_expires_at"), 0.0));

    let mut student = Student::with_state(
        id,
        &parse::coerce_string(obj.get("name")),
        parse::coerce_u32(obj.get("group"), 0),
        parse::coerce_f64(obj.get("last_pick"), 0.0),
        parse::coerce_u64(obj.get("pick_count"), 0),
        parse::coerce_history(obj.get("pick_history")),
        started,
        expires,
    );
    // oldest exports predate cooldown fields entirely; reconstruct the
    // window from the last pick
    if !has_explicit_cooldown
        && student.cooldown_expires_at() == 0.0
        && student.last_pick() > 0.0
        && default_cooldown_days > 0
    {
        student.apply_cooldown(student.last_pick(), default_cooldown_days);
    }
    Some(student)
}

fn non_empty_name(name: String) -> String {
    if name.is_empty() {
        DEFAULT_CLASS_NAME.to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::student::SECONDS_PER_DAY;

    fn serialize_str(set: &ClassroomSet) -> String {
        serde_json::to_string(&serialize_collection(set)).unwrap()
    }

    #[test]
    fn test_legacy_fixture_upgrades_to_unified() {
        let legacy = json!({
            "cooldown_days": 2,
            "students": [{"id": 1, "name": "A", "group": 0}],
        });
        let set = parse_collection(Some(&legacy), None, 1_000.0);
        assert_eq!(set.len(), 1);
        let classroom = set.active();
        assert_eq!(classroom.roster.cooldown_days(), 2);
        let student = classroom.roster.get("1").unwrap();
        assert_eq!(student.name(), "A");
        assert_eq!(student.group(), 0);

        let emitted = serialize_collection(&set);
        assert_eq!(emitted["version"], SCHEMA_VERSION);
        let class_id = set.active_id();
        assert_eq!(emitted["classes"][class_id]["students"]["1"]["name"], "A");
        assert_eq!(
            emitted["classes"][class_id]["algorithm_data"]["cooldown_days"],
            2
        );
    }

    #[test]
    fn test_legacy_bare_list() {
        let legacy = json!([{"id": "7", "name": "B", "group": 3}]);
        let set = parse_collection(Some(&legacy), None, 1_000.0);
        assert_eq!(set.active().roster.cooldown_days(), DEFAULT_COOLDOWN_DAYS);
        assert_eq!(set.active().roster.get("7").unwrap().group(), 3);
    }

    #[test]
    fn test_legacy_cooldown_backfill_from_last_pick() {
        let legacy = json!({
            "cooldown_days": 2,
            "students": [
                {"id": 1, "name": "A", "group": 0, "last_pick": 5_000.0},
                {"id": 2, "name": "B", "group": 0, "last_pick": 5_000.0,
                 "cooldown_started_at": 0.0, "cooldown_expires_at": 0.0},
            ],
        });
        let set = parse_collection(Some(&legacy), None, 1_000.0);
        let roster = &set.active().roster;
        // no explicit cooldown fields: window reconstructed from last pick
        assert_eq!(
            roster.get("1").unwrap().cooldown_expires_at(),
            5_000.0 + 2.0 * SECONDS_PER_DAY
        );
        // explicit zeroed fields mean a released cooldown, kept as-is
        assert_eq!(roster.get("2").unwrap().cooldown_expires_at(), 0.0);
    }

    #[test]
    fn test_v1_resolves_blob_through_classes_data() {
        let v1 = json!({
            "version": 2,
            "current_class_id": "c1",
            "classes": [
                {"id": "c1", "name": "First", "order": 0, "created_at": 10.0},
                {"id": "c2", "name": "Second", "order": 1, "created_at": 20.0},
            ],
            "classes_data": {
                "c1": {"cooldown_days": 5, "students": [{"id": 1, "name": "A", "group": 0}]},
            },
            "current_class": {
                "id": "c2",
                "payload": {"cooldown_days": 4, "students": [{"id": 2, "name": "B", "group": 1}]},
            },
        });
        let set = parse_collection(Some(&v1), None, 1_000.0);
        assert_eq!(set.len(), 2);
        assert_eq!(set.active_id(), "c1");
        assert_eq!(set.get("c1").unwrap().roster.cooldown_days(), 5);
        // c2 has no inline data and no classes_data entry, but matches the
        // current_class payload
        assert_eq!(set.get("c2").unwrap().roster.cooldown_days(), 4);
        assert!(set.get("c2").unwrap().roster.get("2").is_some());
    }

    #[test]
    fn test_unified_round_trip_is_stable() {
        let unified = json!({
            "version": 2,
            "current_class_id": "abc",
            "classes": {
                "abc": {
                    "meta": {"name": "Alpha", "order": 0, "created_at": 10.0,
                             "updated_at": 20.0, "last_used_at": 30.0},
                    "algorithm_data": {
                        "cooldown_days": 3,
                        "history": {"entries": [], "updated_at": 0.0},
                        "last_selected_id": "2",
                        "last_selected_at": 40.0,
                        "warmup_weights": {"2": 0.5},
                    },
                    "students": {
                        "2": {"id": "2", "name": "B", "group": 1,
                              "total_picked_count": 4, "last_picked_at": 40.0,
                              "pick_history": [35.0, 40.0],
                              "cooldown_started_at": 40.0,
                              "cooldown_expires_at": 40.0 + 3.0 * SECONDS_PER_DAY},
                    },
                },
            },
        });
        let set = parse_collection(Some(&unified), None, 1_000.0);
        assert_eq!(set.active().roster.last_selected(), Some(("2", 40.0)));
        // uninterpreted algorithm keys survive the round trip
        let first = serialize_collection(&set);
        assert_eq!(
            first["classes"]["abc"]["algorithm_data"]["warmup_weights"]["2"],
            0.5
        );
        let reparsed = parse_collection(Some(&first), None, 2_000.0);
        assert_eq!(serialize_str(&reparsed), serde_json::to_string(&first).unwrap());
    }

    #[test]
    fn test_round_trip_all_generations() {
        let legacy = json!({"cooldown_days": 2, "students": [{"id": 1, "name": "A", "group": 0}]});
        let v1 = json!({
            "version": 2,
            "current_class_id": "c1",
            "classes": [{"id": "c1", "name": "First", "order": 0, "created_at": 10.0,
                         "data": {"cooldown_days": 3, "students": [{"id": 1, "name": "A", "group": 0}]}}],
        });
        let unified = json!({
            "version": 2,
            "current_class_id": "u1",
            "classes": {"u1": {"meta": {"name": "U", "order": 0, "created_at": 1.0,
                                        "updated_at": 1.0, "last_used_at": 1.0},
                               "algorithm_data": {"cooldown_days": 3,
                                                  "history": {"entries": [], "updated_at": 0.0}},
                               "students": {}}},
        });
        for payload in [legacy, v1, unified] {
            let set = parse_collection(Some(&payload), None, 500.0);
            let once = serialize_collection(&set);
            let again = serialize_collection(&parse_collection(Some(&once), None, 900.0));
            assert_eq!(
                serde_json::to_string(&again).unwrap(),
                serde_json::to_string(&once).unwrap()
            );
        }
    }

    #[test]
    fn test_corrupt_input_uses_fallback_then_default() {
        let fallback = json!({"cooldown_days": 4, "students": []});
        let set = parse_collection(Some(&json!("garbage")), Some(&fallback), 1_000.0);
        assert_eq!(set.active().roster.cooldown_days(), 4);

        let set = parse_collection(Some(&json!(42)), None, 1_000.0);
        assert_eq!(set.len(), 1);
        assert_eq!(set.active().name, DEFAULT_CLASS_NAME);
        assert_eq!(set.version(), SCHEMA_VERSION);

        let set = parse_collection_str("{not json", None, 1_000.0);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_defensive_coercion() {
        let unified = json!({
            "version": "not a number",
            "current_class_id": "stale",
            "classes": {
                "c1": {
                    "meta": {"name": "", "order": "junk", "created_at": "99"},
                    "algorithm_data": {"cooldown_days": "oops"},
                    "students": {
                        "1": {"name": "A", "group": "5", "total_picked_count": "2",
                              "pick_history": [1.0, "bad", 2.0]},
                        "2": "not an object",
                    },
                },
            },
        });
        let set = parse_collection(Some(&unified), None, 1_000.0);
        let classroom = set.get("c1").unwrap();
        assert_eq!(classroom.name, DEFAULT_CLASS_NAME);
        assert_eq!(classroom.created_at, 99.0);
        assert_eq!(classroom.roster.cooldown_days(), DEFAULT_COOLDOWN_DAYS);
        // active id was stale, recomputed to the only classroom
        assert_eq!(set.active_id(), "c1");
        let student = classroom.roster.get("1").unwrap();
        assert_eq!(student.group(), 5);
        assert_eq!(student.pick_count(), 2);
        assert_eq!(student.pick_history(), &[1.0, 2.0]);
        assert!(classroom.roster.get("2").is_none());
    }

    #[test]
    fn test_malformed_history_entry_skipped_on_import() {
        let unified = json!({
            "version": 2,
            "current_class_id": "c1",
            "classes": {
                "c1": {
                    "meta": {"name": "C", "order": 0, "created_at": 1.0,
                             "updated_at": 1.0, "last_used_at": 1.0},
                    "algorithm_data": {
                        "cooldown_days": 3,
                        "history": {"entries": [
                            {"id": "ok", "timestamp": 5.0, "mode": "single",
                             "students": [{"id": "1", "name": "A", "group": 0}],
                             "requested_count": 1, "ignore_cooldown": false, "note": ""},
                            {"id": "broken", "timestamp": 6.0, "students": []},
                        ], "updated_at": 6.0},
                    },
                    "students": {},
                },
            },
        });
        let set = parse_collection(Some(&unified), None, 1_000.0);
        let ledger = set.active().roster.ledger();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entries()[0].id(), "ok");
    }
}
