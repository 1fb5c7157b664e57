//! Rollcall Core Library
//!
//! Draw engine, classroom rosters, versioned persistence, and the action
//! dispatch surface for the Rollcall selection tool.

pub mod classrooms;
pub mod clock;
pub mod draw;
pub mod error;
pub mod ledger;
pub mod parse;
pub mod roster;
pub mod schema;
pub mod service;
pub mod storage;
pub mod student;
pub mod user_data;

pub use classrooms::{Classroom, ClassroomSet, DEFAULT_CLASS_NAME, SCHEMA_VERSION};
pub use clock::{Clock, ManualClock, SystemClock};
pub use draw::{DrawMode, DrawOutcome, DrawRequest, DrawService};
pub use error::{Error, ErrorCode, ErrorKind, Result};
pub use ledger::{DrawLedger, DrawRecord, PickedStudent, NOTE_MAX_CHARS};
pub use roster::{Roster, DEFAULT_COOLDOWN_DAYS};
pub use service::{ActionReply, Session, SessionConfig};
pub use storage::{FileStore, MemoryStore, StateStore, StorageConfig, StorageMode};
pub use student::{Student, SECONDS_PER_DAY};
pub use user_data::{UserData, DEFAULT_USER_ID, USER_DATA_VERSION};
