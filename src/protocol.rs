//! Text grammar of the control and query channels.
//!
//! Control commands carry no identifiers and their acknowledgments echo
//! nothing back. Query responses start with `<module> <key>`, which is the only
//! thing a reply can be correlated by.

use std::fmt;

/// Module names the gateway exposes.
pub mod modules {
    pub const GIMBAL: &str = "Gimbal";
    pub const REMOTE_CONTROLLER: &str = "RemoteController";
    pub const FLIGHT_CONTROLLER: &str = "FlightController";
    pub const BATTERY: &str = "Battery";
    pub const AIR_LINK: &str = "AirLink";
    pub const PRODUCT: &str = "Product";
    pub const CAMERA: &str = "Camera";
}

/// `(module, key)` pair a query response is correlated by.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UniqueKey {
    pub module: String,
    pub key: String,
}

impl UniqueKey {
    pub fn new(module: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            key: key.into(),
        }
    }
}

/// Wire form: `<module> <key>`.
impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.module, self.key)
    }
}

/// How an incoming query line is routed.
#[derive(Debug, PartialEq, Eq)]
pub enum Classified<'a> {
    Keyed { key: UniqueKey, body: &'a str },
    Unbound,
}

/// Splits a query line into its key and body.
///
/// Lines starting with `{` (help output) or with fewer than two spaces cannot
/// name a key and are unbound. Everything else is `<module> <key> <body>`, the
/// body being whatever follows the second space.
pub fn classify(line: &str) -> Classified<'_> {
    if line.starts_with('{') || line.matches(' ').count() < 2 {
        return Classified::Unbound;
    }
    let mut parts = line.splitn(3, ' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(module), Some(key), Some(body)) => Classified::Keyed {
            key: UniqueKey::new(module, key),
            body,
        },
        _ => Classified::Unbound,
    }
}

/// Commands accepted on the control channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlCommand {
    /// Virtual stick positions, each in `[-1.0, 1.0]`.
    Sticks {
        yaw: f64,
        ascent: f64,
        roll: f64,
        pitch: f64,
    },
    Enable,
    Disable,
    Takeoff,
    Land,
}

impl ControlCommand {
    /// Stick command with every axis clamped to `[-1.0, 1.0]`.
    pub fn sticks(yaw: f64, ascent: f64, roll: f64, pitch: f64) -> Self {
        ControlCommand::Sticks {
            yaw: clamp_axis(yaw),
            ascent: clamp_axis(ascent),
            roll: clamp_axis(roll),
            pitch: clamp_axis(pitch),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Sticks {
                yaw,
                ascent,
                roll,
                pitch,
            } => write!(f, "rc {yaw:.4} {ascent:.2} {roll:.2} {pitch:.2}"),
            ControlCommand::Enable => f.write_str("enable"),
            ControlCommand::Disable => f.write_str("disable"),
            ControlCommand::Takeoff => f.write_str("takeoff"),
            ControlCommand::Land => f.write_str("land"),
        }
    }
}

// NaN maps to 0.0 (no movement) rather than leaking "NaN" onto the wire.
fn clamp_axis(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(-1.0, 1.0)
}

/// Commands accepted on the query channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryCommand<'a> {
    Get(&'a UniqueKey),
    Set(&'a UniqueKey, &'a str),
    Action(&'a UniqueKey, Option<&'a str>),
    Listen(&'a UniqueKey),
    Unlisten(&'a UniqueKey),
    Help(Option<&'a str>, Option<&'a str>),
}

impl fmt::Display for QueryCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryCommand::Get(key) => write!(f, "get {key}"),
            QueryCommand::Set(key, value) => write!(f, "set {key} {value}"),
            QueryCommand::Action(key, None) => write!(f, "action {key}"),
            QueryCommand::Action(key, Some(value)) => write!(f, "action {key} {value}"),
            QueryCommand::Listen(key) => write!(f, "listen {key}"),
            QueryCommand::Unlisten(key) => write!(f, "unlisten {key}"),
            QueryCommand::Help(None, _) => f.write_str("help"),
            QueryCommand::Help(Some(module), None) => write!(f, "help {module}"),
            QueryCommand::Help(Some(module), Some(key)) => write!(f, "help {module} {key}"),
        }
    }
}
