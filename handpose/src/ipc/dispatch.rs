//! IPC message dispatch: parse s-expressions and route them to the pose engine.

use lexpr::Value;
use tracing::{debug, warn};

use crate::error::PoseError;
use crate::pose::{
    Clock, Digit, Hand, HandId, HandJoint, HandSkeleton, JointPose, JointPositions, PoseEngine,
    PoseQuery, SearchMethod, JOINT_COUNT,
};

/// The engine type the protocol drives.
pub type IpcEngine<C> = PoseEngine<HandSkeleton, C>;

/// Largest accepted joint coordinate in a `hand-frame`, in meters.
const MAX_POSITION_M: f64 = 1_000.0;

/// Largest accepted reference offset in a `pose-define`, in millimeters.
const MAX_OFFSET_MM: f64 = 1_000_000.0;

/// Parse one raw message. On failure the error is the response to send.
pub fn parse_message(raw: &str) -> Result<Value, String> {
    lexpr::from_str(raw).map_err(|e| {
        warn!("malformed s-expression: {}", e);
        error_response(0, &format!("malformed s-expression: {e}"))
    })
}

/// Route an already parsed message.
pub fn dispatch<C: Clock>(engine: &mut IpcEngine<C>, value: &Value) -> Option<String> {
    let msg_type = get_keyword(value, "type");
    let msg_id = get_int(value, "id").unwrap_or(0);

    match msg_type.as_deref() {
        Some("ping") => handle_ping(msg_id, value),
        Some("hand-add") => handle_hand_add(engine, msg_id, value),
        Some("hand-remove") => handle_hand_remove(engine, msg_id, value),
        Some("hand-list") => handle_hand_list(engine, msg_id),
        Some("hand-frame") => handle_hand_frame(engine, msg_id, value),
        Some("hand-distance") => handle_hand_distance(engine, msg_id, value),
        Some("hand-digit") => handle_hand_digit(engine, msg_id, value),
        Some("tick") => handle_tick(engine, msg_id),
        Some("pose-query") => handle_pose_query(engine, msg_id, value),
        Some("pose-results") => handle_pose_results(engine, msg_id, value),
        Some("pose-record") => handle_pose_record(engine, msg_id, value),
        Some("pose-define") => handle_pose_define(engine, msg_id, value),
        Some("pose-compare") => handle_pose_compare(engine, msg_id, value),
        Some("pose-status") => handle_pose_status(engine, msg_id),
        Some("pose-config") => handle_pose_config(engine, msg_id, value),
        Some(other) => {
            debug!("unknown message type: {}", other);
            Some(error_response(msg_id, &format!("unknown message type: {other}")))
        }
        None => Some(error_response(msg_id, "missing :type")),
    }
}

fn handle_ping(msg_id: i64, value: &Value) -> Option<String> {
    let client_ts = get_int(value, "timestamp").unwrap_or(0);
    Some(format!(
        "(:type :response :id {} :status :ok :client-timestamp {})",
        msg_id, client_ts
    ))
}

// ── Hand handlers ──────────────────────────────────────────

fn handle_hand_add<C: Clock>(engine: &mut IpcEngine<C>, msg_id: i64, value: &Value) -> Option<String> {
    let hand = get_keyword(value, "handedness").and_then(|h| Hand::parse(&h));
    let id = engine.add_hand(HandSkeleton::new(hand));
    Some(format!(
        "(:type :response :id {} :status :ok :hand-id {})",
        msg_id, id
    ))
}

fn handle_hand_remove<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let id = match get_hand_id(value) {
        Some(id) => id,
        None => return Some(error_response(msg_id, "missing :hand-id")),
    };
    match engine.remove_hand(id) {
        Some(_) => Some(ok_response(msg_id)),
        None => Some(error_response(msg_id, &PoseError::UnknownHand(id).to_string())),
    }
}

fn handle_hand_list<C: Clock>(engine: &mut IpcEngine<C>, msg_id: i64) -> Option<String> {
    let hands: Vec<String> = engine.hands().map(|s| s.status_sexp()).collect();
    Some(format!(
        "(:type :response :id {} :status :ok :hands ({}))",
        msg_id,
        hands.join(" ")
    ))
}

/// Replace a hand's joints with the ones in the message.
///
/// Joints not listed become untracked. The frame is validated in full
/// before anything is applied.
fn handle_hand_frame<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let id = match get_hand_id(value) {
        Some(id) => id,
        None => return Some(error_response(msg_id, "missing :hand-id")),
    };

    let mut joints = Vec::new();
    if let Some(list) = get_value(value, "joints") {
        for item in list_items(list) {
            match parse_joint_pose(item) {
                Ok(entry) => joints.push(entry),
                Err(reason) => return Some(error_response(msg_id, &reason)),
            }
        }
    }

    let handedness = get_keyword(value, "handedness");
    let timestamp = get_int(value, "timestamp");

    let session = match engine.hand_mut(id) {
        Some(s) => s,
        None => return Some(error_response(msg_id, &PoseError::UnknownHand(id).to_string())),
    };
    let skel = session.source_mut();
    skel.reset();
    if let Some(h) = handedness {
        skel.hand = Hand::parse(&h);
    }
    if let Some(ts) = timestamp {
        skel.timestamp_ns = ts.max(0) as u64;
    }
    for (joint, pose) in joints {
        skel.set_joint(joint, pose);
    }
    Some(ok_response(msg_id))
}

fn parse_joint_pose(item: &Value) -> Result<(HandJoint, JointPose), String> {
    let name = get_string(item, "joint").ok_or("joint entry missing :joint")?;
    let joint =
        HandJoint::from_name(&name).ok_or_else(|| PoseError::UnknownJoint(name.clone()).to_string())?;
    let position = get_value(item, "position")
        .and_then(|v| get_numbers::<3>(v))
        .ok_or_else(|| format!("joint {name}: :position must be (x y z)"))?;
    if !within(&position, MAX_POSITION_M) {
        return Err(format!("joint {name}: :position out of range"));
    }
    let orientation = match get_value(item, "orientation") {
        Some(v) => get_numbers::<4>(v)
            .ok_or_else(|| format!("joint {name}: :orientation must be (x y z w)"))?,
        None => [0.0, 0.0, 0.0, 1.0],
    };
    let mut pose = JointPose::tracked(position.map(|c| c as f32), orientation.map(|c| c as f32));
    if let Some(radius) = get_float(item, "radius") {
        pose.radius = radius as f32;
    }
    if let Some(valid) = get_bool(item, "valid") {
        pose.valid = valid;
    }
    Ok((joint, pose))
}

fn handle_hand_distance<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let id = match get_hand_id(value) {
        Some(id) => id,
        None => return Some(error_response(msg_id, "missing :hand-id")),
    };
    let (joint_a, joint_b) = match (get_string(value, "joint-a"), get_string(value, "joint-b")) {
        (Some(a), Some(b)) => (a, b),
        _ => return Some(error_response(msg_id, "missing :joint-a or :joint-b")),
    };
    let (ja, jb) = match (HandJoint::from_name(&joint_a), HandJoint::from_name(&joint_b)) {
        (Some(a), Some(b)) => (a, b),
        (None, _) => return Some(error_response(msg_id, &PoseError::UnknownJoint(joint_a).to_string())),
        (_, None) => return Some(error_response(msg_id, &PoseError::UnknownJoint(joint_b).to_string())),
    };
    let session = match engine.hand(id) {
        Some(s) => s,
        None => return Some(error_response(msg_id, &PoseError::UnknownHand(id).to_string())),
    };

    let distance = session
        .source()
        .joint_distance_cm(ja, jb)
        .map(|d| format!("{d:.2}"))
        .unwrap_or_else(|| "nil".to_string());
    Some(format!(
        "(:type :response :id {} :status :ok :joint-a \"{}\" :joint-b \"{}\" :distance-cm {})",
        msg_id,
        ja.as_str(),
        jb.as_str(),
        distance,
    ))
}

fn handle_hand_digit<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let id = match get_hand_id(value) {
        Some(id) => id,
        None => return Some(error_response(msg_id, "missing :hand-id")),
    };
    let name = get_string(value, "digit").unwrap_or_default();
    let digit = match Digit::from_name(&name) {
        Some(d) => d,
        None => return Some(error_response(msg_id, &PoseError::UnknownDigit(name).to_string())),
    };
    let skel = match engine.hand(id) {
        Some(s) => s.source(),
        None => return Some(error_response(msg_id, &PoseError::UnknownHand(id).to_string())),
    };

    let angle = skel
        .digit_angle(digit)
        .map(|a| format!("{a:.1}"))
        .unwrap_or_else(|| "nil".to_string());
    Some(format!(
        "(:type :response :id {} :status :ok :digit :{} :angle {} :extended {} :contracted {})",
        msg_id,
        digit.as_str(),
        angle,
        if skel.digit_is_extended(digit) { "t" } else { "nil" },
        if skel.digit_is_contracted(digit) { "t" } else { "nil" },
    ))
}

// ── Pose handlers ──────────────────────────────────────────

fn handle_tick<C: Clock>(engine: &mut IpcEngine<C>, msg_id: i64) -> Option<String> {
    let events: Vec<String> = engine.update().iter().map(|e| e.to_sexp()).collect();
    Some(format!(
        "(:type :response :id {} :status :ok :events ({}))",
        msg_id,
        events.join(" ")
    ))
}

fn handle_pose_query<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let id = match get_hand_id(value) {
        Some(id) => id,
        None => return Some(error_response(msg_id, "missing :hand-id")),
    };
    let name = match get_string(value, "name") {
        Some(n) => n,
        None => return Some(error_response(msg_id, "missing :name")),
    };
    let threshold = get_float(value, "threshold");

    match engine.is_pose(id, &name, threshold) {
        Ok(found) => Some(format!(
            "(:type :response :id {} :status :ok :name \"{}\" :match {})",
            msg_id,
            escape_string(&name),
            found
                .map(|r| r.to_sexp())
                .unwrap_or_else(|| "nil".to_string()),
        )),
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_pose_results<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let id = match get_hand_id(value) {
        Some(id) => id,
        None => return Some(error_response(msg_id, "missing :hand-id")),
    };
    let limit = get_int(value, "limit")
        .map(|l| l.max(0) as usize)
        .unwrap_or(usize::MAX);

    match engine.hand(id) {
        Some(session) => {
            let results: Vec<String> = session
                .results()
                .iter()
                .take(limit)
                .map(|r| r.to_sexp())
                .collect();
            Some(format!(
                "(:type :response :id {} :status :ok :results ({}))",
                msg_id,
                results.join(" ")
            ))
        }
        None => Some(error_response(msg_id, &PoseError::UnknownHand(id).to_string())),
    }
}

fn handle_pose_record<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let id = match get_hand_id(value) {
        Some(id) => id,
        None => return Some(error_response(msg_id, "missing :hand-id")),
    };
    match engine.record_live_pose(id, get_names(value)) {
        Ok(pose) => {
            let record = engine
                .library()
                .get(pose)
                .map(|r| r.to_sexp())
                .unwrap_or_else(|| "nil".to_string());
            Some(format!(
                "(:type :response :id {} :status :ok :pose {})",
                msg_id, record
            ))
        }
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

/// Insert a reference pose from explicit millimeter positions.
fn handle_pose_define<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let hand = match get_keyword(value, "handedness").and_then(|h| Hand::parse(&h)) {
        Some(h) => h,
        None => return Some(error_response(msg_id, "missing :handedness (left or right)")),
    };

    let mut positions: JointPositions = [None; JOINT_COUNT];
    if let Some(list) = get_value(value, "positions") {
        for item in list_items(list) {
            let name = get_string(item, "joint").unwrap_or_default();
            let joint = match HandJoint::from_name(&name) {
                Some(j) => j,
                None => {
                    return Some(error_response(msg_id, &PoseError::UnknownJoint(name).to_string()))
                }
            };
            let mm = match get_value(item, "mm").and_then(|v| get_numbers::<3>(v)) {
                Some(mm) if within(&mm, MAX_OFFSET_MM) => mm.map(|c| c.round() as i32),
                Some(_) => {
                    return Some(error_response(
                        msg_id,
                        &format!("joint {name}: :mm out of range"),
                    ))
                }
                None => {
                    return Some(error_response(
                        msg_id,
                        &format!("joint {name}: :mm must be (x y z)"),
                    ))
                }
            };
            positions[joint.index()] = Some(mm);
        }
    }

    match engine.library_mut().insert(hand, get_names(value), positions) {
        Ok(pose) => Some(format!(
            "(:type :response :id {} :status :ok :handedness :{} :index {})",
            msg_id,
            hand.as_str(),
            pose.index
        )),
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_pose_compare<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let hand = match get_keyword(value, "handedness").and_then(|h| Hand::parse(&h)) {
        Some(h) => h,
        None => return Some(error_response(msg_id, "missing :handedness (left or right)")),
    };
    let (a, b) = match (get_string(value, "a"), get_string(value, "b")) {
        (Some(a), Some(b)) => (a, b),
        _ => return Some(error_response(msg_id, "missing :a or :b")),
    };
    match engine.library().compare(hand, &a, &b) {
        Ok(distance) => Some(format!(
            "(:type :response :id {} :status :ok :distance {})",
            msg_id, distance
        )),
        Err(e) => Some(error_response(msg_id, &e.to_string())),
    }
}

fn handle_pose_status<C: Clock>(engine: &mut IpcEngine<C>, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :pose {})",
        msg_id,
        engine.status_sexp()
    ))
}

fn handle_pose_config<C: Clock>(
    engine: &mut IpcEngine<C>,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    if let Some(enabled) = get_bool(value, "enabled") {
        engine.config.enabled = enabled;
    }
    if let Some(budget) = get_float(value, "budget-ms") {
        if !engine.config.set_search_budget_ms(budget) {
            return Some(error_response(msg_id, ":budget-ms must be positive"));
        }
    }
    if let Some(method) = get_keyword(value, "method") {
        match SearchMethod::parse(&method) {
            Some(m) => engine.config.search_method = m,
            None => return Some(error_response(msg_id, &format!("unknown method: {method}"))),
        }
    }
    Some(format!(
        "(:type :response :id {} :status :ok :config {})",
        msg_id,
        engine.config.status_sexp()
    ))
}

// ── Helpers ────────────────────────────────────────────────

fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

pub(crate) fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

/// Escape a string for s-expression output.
fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Find the raw value following `:key` in an s-expression plist.
/// Handles both `Value::Keyword("key")` (elisp parser) and
/// `Value::Symbol(":key")` (default parser) forms.
fn get_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Extract a keyword value from an s-expression plist as a string.
pub(crate) fn get_keyword(value: &Value, key: &str) -> Option<String> {
    let val = get_value(value, key)?;
    Some(match val {
        Value::Keyword(v) => v.to_string(),
        Value::Symbol(v) => {
            let s = v.to_string();
            s.strip_prefix(':').unwrap_or(&s).to_string()
        }
        Value::String(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "t" } else { "nil" }.to_string(),
        Value::Null | Value::Nil => "nil".to_string(),
        _ => val.to_string(),
    })
}

/// Extract an integer value from an s-expression plist.
fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a string value from an s-expression plist.
fn get_string(value: &Value, key: &str) -> Option<String> {
    get_keyword(value, key)
}

/// Extract a boolean value from an s-expression plist.
/// Treats "t" as true, "nil" as false.
fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_keyword(value, key).map(|s| s != "nil")
}

/// Extract a floating-point value from an s-expression plist.
fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

fn get_hand_id(value: &Value) -> Option<HandId> {
    get_int(value, "hand-id")
        .filter(|&id| id > 0)
        .map(|id| HandId(id as u64))
}

/// Elements of a proper or dotted list; empty for anything else.
fn list_items(value: &Value) -> Vec<&Value> {
    let mut items = Vec::new();
    let mut current = value;
    while let Value::Cons(pair) = current {
        items.push(pair.car());
        current = pair.cdr();
    }
    items
}

/// Exactly `N` numbers from a list.
fn get_numbers<const N: usize>(value: &Value) -> Option<[f64; N]> {
    let items = list_items(value);
    if items.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = match item {
            Value::Number(n) => n.as_f64()?,
            _ => return None,
        };
    }
    Some(out)
}

/// Every component finite and no larger than `limit` in magnitude.
fn within(coords: &[f64], limit: f64) -> bool {
    coords.iter().all(|c| c.is_finite() && c.abs() <= limit)
}

/// Pose names from `:names ("a" "b")` or a single `:name "a"`.
fn get_names(value: &Value) -> Vec<String> {
    if let Some(list) = get_value(value, "names") {
        return list_items(list)
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.to_string()),
                Value::Symbol(s) => Some(s.to_string()),
                _ => None,
            })
            .collect();
    }
    get_string(value, "name").into_iter().collect()
}

// ── Tests ──────────────────────────────────────────────────
