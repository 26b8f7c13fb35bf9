//! Action model and request-body parsing
//!
//! An HTTP caller posts either one action object or an array of them:
//!
//! ```json
//! [{"cmd":"move","d":0.5,"dir":1,"id":"m1"},{"cmd":"turn","a":90}]
//! ```
//!
//! Parsing keeps the submission order, drops items that do not describe a
//! recognised action, and assigns a correlation id to every action that
//! arrived without one.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Kind of a requested operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Move,
    Turn,
    QueryPose,
}

impl ActionKind {
    /// Prefix used for generated correlation ids
    fn id_prefix(self) -> char {
        match self {
            ActionKind::Move => 'm',
            ActionKind::Turn => 't',
            ActionKind::QueryPose => 'p',
        }
    }

    /// Numeric range generated ids are drawn from
    fn id_range(self) -> std::ops::Range<u32> {
        match self {
            ActionKind::QueryPose => 1000..9999,
            ActionKind::Move | ActionKind::Turn => 1..10000,
        }
    }
}

/// Travel direction of a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Code carried in the `D1` slot of a move frame
    pub fn wire_code(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => 2,
        }
    }

    /// Inverse of [`Direction::wire_code`]
    pub fn from_wire_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Direction::Forward),
            2 => Some(Direction::Backward),
            _ => None,
        }
    }
}

/// Operation payload of an [`Action`]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move { distance_m: f64, direction: Direction },
    Turn { angle_deg: i32 },
    QueryPose,
}

/// One requested operation with its correlation id
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub correlation_id: String,
    pub command: Command,
}

impl Action {
    pub fn move_by(correlation_id: impl Into<String>, distance_m: f64, direction: Direction) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            command: Command::Move {
                distance_m,
                direction,
            },
        }
    }

    pub fn turn(correlation_id: impl Into<String>, angle_deg: i32) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            command: Command::Turn { angle_deg },
        }
    }

    pub fn query_pose(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            command: Command::QueryPose,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self.command {
            Command::Move { .. } => ActionKind::Move,
            Command::Turn { .. } => ActionKind::Turn,
            Command::QueryPose => ActionKind::QueryPose,
        }
    }
}

/// Random draws tried before falling back to an ordered scan
const RANDOM_ID_ATTEMPTS: usize = 32;

/// Tracks correlation ids in use within one batch and generates fresh ones
#[derive(Debug, Default)]
pub struct CorrelationIds {
    used: HashSet<String>,
    /// Per kind, every number below this is already taken
    scan_from: HashMap<ActionKind, u32>,
    overflow: u64,
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a caller-supplied id. Returns `false` if it was already taken.
    pub fn reserve(&mut self, id: &str) -> bool {
        self.used.insert(id.to_string())
    }

    /// Generate an id for `kind` that collides with nothing reserved so far.
    ///
    /// Ids are drawn at random from the kind's numeric range. Once that
    /// range is used up, ids get a `-<n>` suffix instead.
    pub fn generate(&mut self, kind: ActionKind) -> String {
        let prefix = kind.id_prefix();
        let range = kind.id_range();
        let scan_from = self.scan_from.get(&kind).copied().unwrap_or(range.start);

        if scan_from < range.end {
            let mut rng = rand::thread_rng();
            for _ in 0..RANDOM_ID_ATTEMPTS {
                let candidate = format!("{}{}", prefix, rng.gen_range(range.clone()));
                if self.used.insert(candidate.clone()) {
                    return candidate;
                }
            }
            for n in scan_from..range.end {
                let candidate = format!("{}{}", prefix, n);
                if self.used.insert(candidate.clone()) {
                    self.scan_from.insert(kind, n + 1);
                    return candidate;
                }
            }
            tracing::warn!(kind = ?kind, "Correlation id range exhausted, using suffixed ids");
            self.scan_from.insert(kind, range.end);
        }

        // `overflow` only grows and the batch is finite, so this ends
        loop {
            self.overflow += 1;
            let candidate = format!("{}{}-{}", prefix, range.end, self.overflow);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// One `/api/path` item, read field by field.
///
/// A field that is missing or has the wrong JSON type takes its default,
/// so only the command name decides whether an item is an action at all.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    /// Command name (`move` or `turn`)
    pub cmd: String,

    /// Caller-supplied correlation id; `None` means "generate one"
    pub id: Option<String>,

    /// Distance in meters (move)
    pub d: f64,

    /// Direction code, 1 forward / 2 backward (move)
    pub dir: i64,

    /// Angle in degrees (turn)
    pub a: i32,
}

fn integer_field(fields: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = fields.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.trunc() as i64))
}

impl ActionRequest {
    /// `None` when `item` is not a JSON object
    pub fn from_value(item: &Value) -> Option<Self> {
        let fields = item.as_object()?;
        Some(Self {
            cmd: fields
                .get("cmd")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            id: fields
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            d: fields.get("d").and_then(Value::as_f64).unwrap_or(0.0),
            dir: integer_field(fields, "dir").unwrap_or(1),
            a: integer_field(fields, "a")
                .map(|a| a.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
                .unwrap_or(0),
        })
    }

    fn kind(&self) -> Result<ActionKind> {
        match self.cmd.as_str() {
            "move" => Ok(ActionKind::Move),
            "turn" => Ok(ActionKind::Turn),
            other => Err(Error::InvalidAction(format!("unknown cmd '{}'", other))),
        }
    }

    fn supplied_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn into_action(self, correlation_id: String) -> Result<Action> {
        match self.kind()? {
            ActionKind::Move => {
                let direction = Direction::from_wire_code(self.dir).ok_or_else(|| {
                    Error::InvalidAction(format!("move {}: bad dir {}", correlation_id, self.dir))
                })?;
                Ok(Action::move_by(correlation_id, self.d, direction))
            }
            ActionKind::Turn => Ok(Action::turn(correlation_id, self.a)),
            ActionKind::QueryPose => Ok(Action::query_pose(correlation_id)),
        }
    }
}

/// Parse an `/api/path` body into the recognised actions, in submission order.
///
/// Bodies larger than `max_bytes` fail with [`Error::PayloadTooLarge`].
/// Empty bodies, text that is not JSON, and JSON that is neither an object
/// nor an array fail with [`Error::InvalidPayload`]. Items that are not
/// objects or name an unknown command are skipped with a warning.
pub fn parse_batch(body: &[u8], max_bytes: usize) -> Result<Vec<Action>> {
    if body.is_empty() {
        return Err(Error::InvalidPayload("empty body".to_string()));
    }
    if body.len() > max_bytes {
        return Err(Error::PayloadTooLarge {
            size: body.len(),
            limit: max_bytes,
        });
    }

    let document: Value = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidPayload(format!("invalid json: {}", e)))?;

    let items = match document {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => return Err(Error::InvalidPayload("bad payload".to_string())),
    };

    // First pass: decode items and reserve every caller id, so generated ids
    // cannot collide with ids that appear later in the batch.
    let mut ids = CorrelationIds::new();
    let mut requests = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let Some(request) = ActionRequest::from_value(item) else {
            tracing::warn!(index, "Skipping action that is not an object");
            continue;
        };
        if let Err(e) = request.kind() {
            tracing::warn!(index, "Skipping action: {}", e);
            continue;
        }
        if let Some(id) = request.supplied_id() {
            if !ids.reserve(id) {
                tracing::warn!(index, correlation_id = %id, "Duplicate caller correlation id in batch");
            }
        }
        requests.push((index, request));
    }

    let mut actions = Vec::with_capacity(requests.len());
    for (index, request) in requests {
        let id = match request.supplied_id() {
            Some(id) => id.to_string(),
            None => ids.generate(request.kind()?),
        };
        match request.into_action(id) {
            Ok(action) => actions.push(action),
            Err(e) => tracing::warn!(index, "Skipping action: {}", e),
        }
    }

    Ok(actions)
}
