//! Eligibility and selection engine
//!
//! Three draw modes over the active classroom's roster. Entity-level draws
//! go through an anti-repeat primitive: the previously drawn student is
//! excluded from consideration unless nobody else is left, and the marker
//! expires at the local calendar-day boundary so the preference never leaks
//! into the next session.

use std::collections::HashSet;

use chrono::{Local, TimeZone};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::classrooms::ClassroomSet;
use crate::error::{ErrorCode, Result};
use crate::ledger::{DrawRecord, PickedStudent};
use crate::parse;
use crate::roster::Roster;
use crate::student::Student;

/// How a draw selects students.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawMode {
    Single,
    Batch,
    Group,
}

impl DrawMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrawMode::Single => "single",
            DrawMode::Batch => "batch",
            DrawMode::Group => "group",
        }
    }

    /// Parse a wire value. Blank defaults to single; `any` and `student`
    /// are accepted aliases for single.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "single" | "any" | "student" => Ok(DrawMode::Single),
            "batch" => Ok(DrawMode::Batch),
            "group" => Ok(DrawMode::Group),
            _ => Err(ErrorCode::UnsupportedRandomMode.into()),
        }
    }
}

/// A parsed draw request.
#[derive(Debug, Clone)]
pub struct DrawRequest {
    pub mode: DrawMode,
    pub ignore_cooldown: bool,
    pub count: Option<Value>,
}

impl DrawRequest {
    pub fn new(mode: DrawMode, ignore_cooldown: bool) -> Self {
        Self {
            mode,
            ignore_cooldown,
            count: None,
        }
    }

    pub fn with_count(mode: DrawMode, ignore_cooldown: bool, count: u32) -> Self {
        Self {
            mode,
            ignore_cooldown,
            count: Some(json!(count)),
        }
    }

    /// Build a request from an action payload.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let obj = payload.as_object();
        let mode =
            DrawMode::parse(&parse::coerce_string(obj.and_then(|o| o.get("mode"))))?;
        let ignore_cooldown = parse::coerce_bool(obj.and_then(|o| o.get("ignore_cooldown")));
        let count = obj
            .and_then(|o| o.get("count").or_else(|| o.get("requested_count")))
            .cloned();
        Ok(Self {
            mode,
            ignore_cooldown,
            count,
        })
    }
}

/// The result of a fulfilled draw.
#[derive(Debug, Clone)]
pub struct DrawOutcome {
    pub mode: DrawMode,
    pub class_id: String,
    pub students: Vec<PickedStudent>,
    pub ignore_cooldown: bool,
    pub requested_count: u32,
    pub record_id: String,
    /// Student ids that were eligible when the decision was made.
    pub pool_student_ids: Vec<String>,
    /// Group values that were eligible (group mode only).
    pub pool_groups: Vec<u32>,
    pub group: Option<u32>,
}

impl DrawOutcome {
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "mode": self.mode.as_str(),
            "class_id": self.class_id,
            "ignore_cooldown": self.ignore_cooldown,
            "requested_count": self.requested_count,
            "history_entry_id": self.record_id,
            "students": self.students,
            "pool": {
                "students": self.pool_student_ids,
                "groups": self.pool_groups,
            },
        });
        match self.mode {
            DrawMode::Single => {
                payload["type"] = json!("student");
                payload["student_id"] =
                    json!(self.students.first().map(|s| s.id.clone()).unwrap_or_default());
            }
            DrawMode::Batch | DrawMode::Group => {
                payload["type"] = json!(self.mode.as_str());
                payload["student_ids"] =
                    json!(self.students.iter().map(|s| s.id.clone()).collect::<Vec<_>>());
            }
        }
        if let Some(group) = self.group {
            payload["group"] = json!(group);
        }
        payload
    }
}

/// Uniform choice from `all − disabled − {last}`. When that set is empty the
/// last-picked id itself is the fallback, but only if it is present in `all`
/// and not disabled.
pub fn pick_avoiding_repeat<R: rand::Rng>(
    all: &[String],
    disabled: &HashSet<&str>,
    last_picked: Option<&str>,
    rng: &mut R,
) -> Option<String> {
    let available: Vec<&String> = all
        .iter()
        .filter(|id| !disabled.contains(id.as_str()) && Some(id.as_str()) != last_picked)
        .collect();
    if let Some(choice) = available.choose(rng) {
        return Some((*choice).clone());
    }
    let last = last_picked?;
    if all.iter().any(|id| id == last) && !disabled.contains(last) {
        return Some(last.to_string());
    }
    None
}

/// Whether two epoch timestamps fall on different local calendar days.
/// Non-positive timestamps always count as different.
pub fn is_different_day(a: f64, b: f64) -> bool {
    if a <= 0.0 || b <= 0.0 {
        return true;
    }
    let day = |ts: f64| {
        Local
            .timestamp_opt(ts as i64, 0)
            .single()
            .map(|dt| dt.date_naive())
    };
    match (day(a), day(b)) {
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}

/// Runs draws against the active classroom.
pub struct DrawService {
    rng: StdRng,
}

impl Default for DrawService {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawService {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic service for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn execute(
        &mut self,
        set: &mut ClassroomSet,
        request: &DrawRequest,
        now: f64,
    ) -> Result<DrawOutcome> {
        let class_id = set.active_id().to_string();
        let roster = &mut set.active_mut().roster;
        match request.mode {
            DrawMode::Single => self.draw_single(roster, class_id, request.ignore_cooldown, now),
            DrawMode::Batch => self.draw_batch(roster, class_id, request, now),
            DrawMode::Group => self.draw_group(roster, class_id, request.ignore_cooldown, now),
        }
    }

    fn draw_single(
        &mut self,
        roster: &mut Roster,
        class_id: String,
        ignore_cooldown: bool,
        now: f64,
    ) -> Result<DrawOutcome> {
        let pool = eligible_ids(roster, now, ignore_cooldown);
        if pool.is_empty() {
            return Err(ErrorCode::NoStudentsAvailable.into());
        }
        let all: Vec<String> = roster.students().map(|s| s.id().to_string()).collect();
        let pool_set: HashSet<&str> = pool.iter().map(String::as_str).collect();
        let disabled: HashSet<&str> = all
            .iter()
            .map(String::as_str)
            .filter(|id| !pool_set.contains(id))
            .collect();
        let last = fresh_marker(roster, &disabled, &all, now);

        let chosen_id = pick_avoiding_repeat(&all, &disabled, last.as_deref(), &mut self.rng)
            .ok_or(ErrorCode::NoStudentsAvailable)?;
        let chosen = snapshot_of(roster, &chosen_id)?;

        roster.set_last_selected(chosen_id.clone(), now);
        roster.register_picks(&[chosen_id], now)?;
        let record_id = roster.ledger_mut().record(
            DrawRecord::new(now, DrawMode::Single, vec![chosen.clone()], None, 1, ignore_cooldown),
            now,
        );
        let group = Some(chosen.group);
        Ok(DrawOutcome {
            mode: DrawMode::Single,
            class_id,
            students: vec![chosen],
            ignore_cooldown,
            requested_count: 1,
            record_id,
            pool_student_ids: pool,
            pool_groups: Vec::new(),
            group,
        })
    }

    fn draw_batch(
        &mut self,
        roster: &mut Roster,
        class_id: String,
        request: &DrawRequest,
        now: f64,
    ) -> Result<DrawOutcome> {
        let pool = eligible_ids(roster, now, request.ignore_cooldown);
        if pool.is_empty() {
            return Err(ErrorCode::NoStudentsAvailable.into());
        }
        let count = normalize_batch_count(request.count.as_ref())?;
        if count as usize > pool.len() {
            return Err(ErrorCode::BatchCountExceedsAvailable.into());
        }
        let all: Vec<String> = roster.students().map(|s| s.id().to_string()).collect();
        let pool_set: HashSet<&str> = pool.iter().map(String::as_str).collect();
        let mut last = fresh_marker(
            roster,
            &all.iter()
                .map(String::as_str)
                .filter(|id| !pool_set.contains(id))
                .collect(),
            &all,
            now,
        );

        let mut chosen_ids: Vec<String> = Vec::with_capacity(count as usize);
        let mut chosen: Vec<PickedStudent> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            // ineligible students plus everyone already drawn in this batch
            let disabled: HashSet<&str> = all
                .iter()
                .map(String::as_str)
                .filter(|id| {
                    !pool_set.contains(id) || chosen_ids.iter().any(|c| c == id)
                })
                .collect();
            let selected = pick_avoiding_repeat(&all, &disabled, last.as_deref(), &mut self.rng)
                .ok_or(ErrorCode::NoStudentsAvailable)?;
            chosen.push(snapshot_of(roster, &selected)?);
            last = Some(selected.clone());
            chosen_ids.push(selected);
        }
        if let Some(final_id) = chosen_ids.last() {
            roster.set_last_selected(final_id.clone(), now);
        }
        roster.register_picks(&chosen_ids, now)?;
        let record_id = roster.ledger_mut().record(
            DrawRecord::new(
                now,
                DrawMode::Batch,
                chosen.clone(),
                None,
                count,
                request.ignore_cooldown,
            ),
            now,
        );
        Ok(DrawOutcome {
            mode: DrawMode::Batch,
            class_id,
            students: chosen,
            ignore_cooldown: request.ignore_cooldown,
            requested_count: count,
            record_id,
            pool_student_ids: pool,
            pool_groups: Vec::new(),
            group: None,
        })
    }

    fn draw_group(
        &mut self,
        roster: &mut Roster,
        class_id: String,
        ignore_cooldown: bool,
        now: f64,
    ) -> Result<DrawOutcome> {
        let groups = roster.eligible_groups(now, ignore_cooldown);
        if groups.is_empty() {
            return Err(ErrorCode::NoGroupsAvailable.into());
        }
        // Group draws do not consult or update the last-picked marker;
        // that preference only applies to entity-level draws.
        let group = *groups
            .choose(&mut self.rng)
            .ok_or(ErrorCode::NoGroupsAvailable)?;
        let members: Vec<PickedStudent> = roster
            .group_members(group, now, ignore_cooldown)
            .into_iter()
            .map(snapshot)
            .collect();
        if members.is_empty() {
            return Err(ErrorCode::NoStudentsAvailable.into());
        }
        let member_ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
        roster.register_picks(&member_ids, now)?;
        let count = members.len() as u32;
        let record_id = roster.ledger_mut().record(
            DrawRecord::new(
                now,
                DrawMode::Group,
                members.clone(),
                Some(group),
                count,
                ignore_cooldown,
            ),
            now,
        );
        Ok(DrawOutcome {
            mode: DrawMode::Group,
            class_id,
            students: members,
            ignore_cooldown,
            requested_count: count,
            record_id,
            pool_student_ids: member_ids,
            pool_groups: groups,
            group: Some(group),
        })
    }
}

fn eligible_ids(roster: &Roster, now: f64, ignore_cooldown: bool) -> Vec<String> {
    roster
        .eligible_students(now, ignore_cooldown)
        .into_iter()
        .map(|s| s.id().to_string())
        .collect()
}

/// The anti-repeat marker, dropped when stale: a different calendar day,
/// a disabled id, or an id no longer in the pool.
fn fresh_marker(
    roster: &Roster,
    disabled: &HashSet<&str>,
    all: &[String],
    now: f64,
) -> Option<String> {
    let (id, at) = roster.last_selected()?;
    if is_different_day(at, now) {
        return None;
    }
    if disabled.contains(id) || !all.iter().any(|candidate| candidate == id) {
        return None;
    }
    Some(id.to_string())
}

fn snapshot(student: &Student) -> PickedStudent {
    PickedStudent {
        id: student.id().to_string(),
        name: student.name().to_string(),
        group: student.group(),
    }
}

fn snapshot_of(roster: &Roster, id: &str) -> Result<PickedStudent> {
    roster
        .get(id)
        .map(snapshot)
        .ok_or_else(|| ErrorCode::NoStudentsAvailable.into())
}

fn normalize_batch_count(value: Option<&Value>) -> Result<u32> {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() && v >= 1.0 => Ok(v as u32),
        _ => Err(ErrorCode::BatchCountInvalid.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::student::SECONDS_PER_DAY;

    fn set_with(students: &[(&str, &str, u32)]) -> ClassroomSet {
        let mut set = ClassroomSet::bootstrap(1_000.0);
        for (id, name, group) in students {
            set.active_mut()
                .roster
                .create_student(name, *group, Some(id))
                .unwrap();
        }
        set
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(DrawMode::parse("single").unwrap(), DrawMode::Single);
        assert_eq!(DrawMode::parse(" ANY ").unwrap(), DrawMode::Single);
        assert_eq!(DrawMode::parse("student").unwrap(), DrawMode::Single);
        assert_eq!(DrawMode::parse("").unwrap(), DrawMode::Single);
        assert_eq!(DrawMode::parse("batch").unwrap(), DrawMode::Batch);
        assert_eq!(DrawMode::parse("group").unwrap(), DrawMode::Group);
        assert_eq!(
            DrawMode::parse("triple").unwrap_err().code(),
            Some(ErrorCode::UnsupportedRandomMode)
        );
    }

    #[test]
    fn test_pick_avoiding_repeat() {
        let all: Vec<String> = vec!["1".into(), "2".into(), "3".into()];
        let mut rng = StdRng::seed_from_u64(7);

        // last picked is excluded while others remain
        let mut disabled: HashSet<&str> = HashSet::from(["2"]);
        for _ in 0..20 {
            let choice = pick_avoiding_repeat(&all, &disabled, Some("1"), &mut rng).unwrap();
            assert_eq!(choice, "3");
        }

        // sole remaining candidate falls back to last picked
        disabled.insert("3");
        let choice = pick_avoiding_repeat(&all, &disabled, Some("1"), &mut rng).unwrap();
        assert_eq!(choice, "1");

        // fallback requires membership in the full id set
        let choice = pick_avoiding_repeat(&all, &HashSet::from(["1", "2", "3"]), Some("9"), &mut rng);
        assert_eq!(choice, None);

        // and requires not being disabled
        let choice = pick_avoiding_repeat(&all, &HashSet::from(["1", "2", "3"]), Some("1"), &mut rng);
        assert_eq!(choice, None);

        let choice = pick_avoiding_repeat(&all, &HashSet::from(["1", "2", "3"]), None, &mut rng);
        assert_eq!(choice, None);
    }

    #[test]
    fn test_is_different_day() {
        let noon = 1_700_000_000.0;
        assert!(!is_different_day(noon, noon + 60.0));
        assert!(is_different_day(noon, noon + 2.0 * SECONDS_PER_DAY));
        assert!(is_different_day(0.0, noon));
        assert!(is_different_day(noon, -1.0));
    }

    #[test]
    fn test_single_draw_of_sole_student() {
        let mut set = set_with(&[("1", "A", 0)]);
        let mut service = DrawService::with_seed(1);
        let now = 50_000.0;
        let outcome = service
            .execute(&mut set, &DrawRequest::new(DrawMode::Single, false), now)
            .unwrap();
        assert_eq!(outcome.students.len(), 1);
        assert_eq!(outcome.students[0].id, "1");
        assert_eq!(outcome.pool_student_ids, vec!["1".to_string()]);

        let roster = &set.active().roster;
        let student = roster.get("1").unwrap();
        assert_eq!(
            student.cooldown_expires_at(),
            now + roster.cooldown_days() as f64 * SECONDS_PER_DAY
        );
        assert_eq!(roster.last_selected(), Some(("1", now)));
        assert_eq!(roster.ledger().len(), 1);

        // everyone is cooling now
        let err = service
            .execute(&mut set, &DrawRequest::new(DrawMode::Single, false), now + 1.0)
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NoStudentsAvailable));

        // unless cooldown is ignored
        service
            .execute(&mut set, &DrawRequest::new(DrawMode::Single, true), now + 2.0)
            .unwrap();
    }

    #[test]
    fn test_single_draw_avoids_immediate_repeat() {
        let mut set = set_with(&[("1", "A", 0), ("2", "B", 0)]);
        let mut service = DrawService::with_seed(3);
        let now = 1_700_000_000.0;
        let mut previous = service
            .execute(&mut set, &DrawRequest::new(DrawMode::Single, true), now)
            .unwrap()
            .students[0]
            .id
            .clone();
        // with two students and a same-day marker, consecutive draws alternate
        for step in 1..8 {
            let drawn = service
                .execute(
                    &mut set,
                    &DrawRequest::new(DrawMode::Single, true),
                    now + step as f64,
                )
                .unwrap()
                .students[0]
                .id
                .clone();
            assert_ne!(drawn, previous);
            previous = drawn;
        }
    }

    #[test]
    fn test_marker_resets_across_day_boundary() {
        let mut set = set_with(&[("1", "A", 0)]);
        let mut service = DrawService::with_seed(5);
        let now = 1_700_000_000.0;
        service
            .execute(&mut set, &DrawRequest::new(DrawMode::Single, true), now)
            .unwrap();
        // same student again on a later day: the stale marker is dropped, so
        // the draw succeeds through the main path rather than the fallback
        let outcome = service
            .execute(
                &mut set,
                &DrawRequest::new(DrawMode::Single, true),
                now + 3.0 * SECONDS_PER_DAY,
            )
            .unwrap();
        assert_eq!(outcome.students[0].id, "1");
    }

    #[test]
    fn test_batch_draw() {
        let mut set = set_with(&[("1", "A", 0), ("2", "B", 0), ("3", "C", 0)]);
        let mut service = DrawService::with_seed(11);
        let now = 50_000.0;

        let err = service
            .execute(&mut set, &DrawRequest::new(DrawMode::Batch, false), now)
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BatchCountInvalid));

        let err = service
            .execute(
                &mut set,
                &DrawRequest::with_count(DrawMode::Batch, false, 4),
                now,
            )
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BatchCountExceedsAvailable));

        let outcome = service
            .execute(
                &mut set,
                &DrawRequest::with_count(DrawMode::Batch, false, 3),
                now,
            )
            .unwrap();
        // exactly the eligible count: all three, no duplicates
        let mut ids: Vec<&str> = outcome.students.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(outcome.requested_count, 3);
        assert_eq!(set.active().roster.ledger().len(), 1);
        assert_eq!(set.active().roster.ledger().entries()[0].students().len(), 3);
    }

    #[test]
    fn test_batch_count_parsing() {
        assert_eq!(normalize_batch_count(Some(&json!(2))).unwrap(), 2);
        assert_eq!(normalize_batch_count(Some(&json!("2"))).unwrap(), 2);
        assert_eq!(normalize_batch_count(Some(&json!(2.9))).unwrap(), 2);
        for bad in [json!(0), json!(-1), json!("x"), json!(null), json!([])] {
            assert_eq!(
                normalize_batch_count(Some(&bad)).unwrap_err().code(),
                Some(ErrorCode::BatchCountInvalid)
            );
        }
        assert_eq!(
            normalize_batch_count(None).unwrap_err().code(),
            Some(ErrorCode::BatchCountInvalid)
        );
    }

    #[test]
    fn test_group_draw_requires_whole_group() {
        let mut set = set_with(&[("1", "A", 1), ("2", "B", 1), ("3", "C", 2)]);
        let now = 50_000.0;
        set.active_mut().roster.force_cooldown("3", now).unwrap();

        let mut service = DrawService::with_seed(2);
        let outcome = service
            .execute(&mut set, &DrawRequest::new(DrawMode::Group, false), now)
            .unwrap();
        // group 2 has a cooling member, so group 1 is the only candidate
        assert_eq!(outcome.group, Some(1));
        assert_eq!(outcome.pool_groups, vec![1]);
        assert_eq!(outcome.students.len(), 2);
        assert_eq!(outcome.requested_count, 2);
        // the marker is untouched by group draws
        assert_eq!(set.active().roster.last_selected(), None);
    }

    #[test]
    fn test_group_draw_exhaustion() {
        let mut set = set_with(&[("1", "A", 1)]);
        let now = 50_000.0;
        set.active_mut().roster.force_cooldown("1", now).unwrap();
        let mut service = DrawService::with_seed(2);
        let err = service
            .execute(&mut set, &DrawRequest::new(DrawMode::Group, false), now)
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NoGroupsAvailable));
    }

    #[test]
    fn test_outcome_payload_shape() {
        let mut set = set_with(&[("1", "A", 4)]);
        let mut service = DrawService::with_seed(1);
        let outcome = service
            .execute(&mut set, &DrawRequest::new(DrawMode::Single, false), 50_000.0)
            .unwrap();
        let payload = outcome.to_payload();
        assert_eq!(payload["type"], "student");
        assert_eq!(payload["student_id"], "1");
        assert_eq!(payload["group"], 4);
        assert_eq!(payload["pool"]["students"][0], "1");
        assert!(payload["history_entry_id"].as_str().is_some());
    }

    #[test]
    fn test_request_from_payload() {
        let request = DrawRequest::from_payload(&json!({
            "mode": "batch",
            "ignore_cooldown": "yes",
            "count": "2",
        }))
        .unwrap();
        assert_eq!(request.mode, DrawMode::Batch);
        assert!(request.ignore_cooldown);
        assert_eq!(normalize_batch_count(request.count.as_ref()).unwrap(), 2);

        let request = DrawRequest::from_payload(&json!({})).unwrap();
        assert_eq!(request.mode, DrawMode::Single);
        assert!(!request.ignore_cooldown);

        assert!(DrawRequest::from_payload(&json!({"mode": "nope"})).is_err());
    }
}
