//! Named Live commands.
//!
//! Each tool maps a name and a JSON object of parameters onto one OSC
//! address with positional arguments, checking ranges before anything is
//! sent. `Tool::invocation` does the mapping; the daemon decides from the
//! address whether to wait for a reply.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("parameters for {0} must be a JSON object")]
    NotAnObject(&'static str),

    #[error("{tool} requires parameter '{param}'")]
    Missing {
        tool: &'static str,
        param: &'static str,
    },

    #[error("'{param}': {reason}")]
    Invalid { param: &'static str, reason: String },

    #[error("{tool} does not take parameter '{param}'")]
    Unexpected { tool: &'static str, param: String },

    #[error("'{later}' requires '{earlier}'")]
    OutOfOrder {
        earlier: &'static str,
        later: &'static str,
    },
}

/// What a parameter accepts and how it goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kind {
    /// Non-negative integer
    Index,
    /// Insert position; -1 means "at the end"
    Position,
    /// BPM, 20 to 999
    Tempo,
    /// Mixer volume, 0.0 to 1.0
    Volume,
    /// Boolean, sent as 1 or 0
    Switch,
    Text,
    /// Any number, sent as a float
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Presence {
    Required,
    /// Left off the wire when absent
    Optional,
    /// Sent with this value when absent
    Default(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub kind: Kind,
    pub presence: Presence,
}

const fn req(name: &'static str, kind: Kind) -> Param {
    Param {
        name,
        kind,
        presence: Presence::Required,
    }
}

const fn opt(name: &'static str, kind: Kind) -> Param {
    Param {
        name,
        kind,
        presence: Presence::Optional,
    }
}

const fn position(name: &'static str) -> Param {
    Param {
        name,
        kind: Kind::Position,
        presence: Presence::Default(-1),
    }
}

const TRACK: Param = req("track_index", Kind::Index);
const SCENE: Param = req("scene_index", Kind::Index);
const CLIP: Param = req("clip_index", Kind::Index);
const DEVICE: Param = req("device_index", Kind::Index);
const PARAMETER: Param = req("param_index", Kind::Index);
const BPM: Param = req("bpm", Kind::Tempo);
const VOLUME: Param = req("volume", Kind::Volume);
const VALUE: Param = req("value", Kind::Number);
const NAME: Param = req("name", Kind::Text);
const ENABLED: Param = req("enabled", Kind::Switch);
const MUTED: Param = req("muted", Kind::Switch);
const SOLOED: Param = req("soloed", Kind::Switch);
const ARMED: Param = req("armed", Kind::Switch);
const INDEX_MIN: Param = opt("index_min", Kind::Index);
const INDEX_MAX: Param = opt("index_max", Kind::Index);
const INSERT_AT: Param = position("index");

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    pub address: &'static str,
    pub params: &'static [Param],
}

const fn tool(
    name: &'static str,
    address: &'static str,
    params: &'static [Param],
    description: &'static str,
) -> Tool {
    Tool {
        name,
        description,
        address,
        params,
    }
}

/// Every tool the server exposes.
#[rustfmt::skip]
pub const TOOLS: &[Tool] = &[
    // Song
    tool("play", "/live/song/start_playing", &[], "Start playback"),
    tool("stop", "/live/song/stop_playing", &[], "Stop playback"),
    tool("continue_playing", "/live/song/continue_playing", &[], "Resume playback from the current position"),
    tool("stop_all_clips", "/live/song/stop_all_clips", &[], "Stop all playing clips"),
    tool("undo", "/live/song/undo", &[], "Undo the last operation"),
    tool("redo", "/live/song/redo", &[], "Redo the last undone operation"),
    tool("tap_tempo", "/live/song/tap_tempo", &[], "Tap tempo once"),
    tool("get_is_playing", "/live/song/get/is_playing", &[], "Whether the transport is running"),
    tool("get_tempo", "/live/song/get/tempo", &[], "Current tempo in BPM"),
    tool("set_tempo", "/live/song/set/tempo", &[BPM], "Set the tempo (20-999 BPM)"),
    tool("get_metronome", "/live/song/get/metronome", &[], "Whether the metronome is on"),
    tool("set_metronome", "/live/song/set/metronome", &[ENABLED], "Turn the metronome on or off"),
    tool("get_loop", "/live/song/get/loop", &[], "Whether the arrangement loop is on"),
    tool("set_loop", "/live/song/set/loop", &[ENABLED], "Turn the arrangement loop on or off"),
    // Tracks
    tool("get_num_tracks", "/live/song/get/num_tracks", &[], "Number of tracks"),
    tool(
        "get_track_names",
        "/live/song/get/track_names",
        &[INDEX_MIN, INDEX_MAX],
        "Track names, optionally for index_min..index_max",
    ),
    tool("get_track_name", "/live/track/get/name", &[TRACK], "Name of a track"),
    tool("set_track_name", "/live/track/set/name", &[TRACK, NAME], "Rename a track"),
    tool("get_track_volume", "/live/track/get/volume", &[TRACK], "Track volume (0.0-1.0)"),
    tool("set_track_volume", "/live/track/set/volume", &[TRACK, VOLUME], "Set track volume (0.0-1.0)"),
    tool("get_track_mute", "/live/track/get/mute", &[TRACK], "Whether a track is muted"),
    tool("set_track_mute", "/live/track/set/mute", &[TRACK, MUTED], "Mute or unmute a track"),
    tool("get_track_solo", "/live/track/get/solo", &[TRACK], "Whether a track is soloed"),
    tool("set_track_solo", "/live/track/set/solo", &[TRACK, SOLOED], "Solo or unsolo a track"),
    tool("get_track_arm", "/live/track/get/arm", &[TRACK], "Whether a track is armed"),
    tool("set_track_arm", "/live/track/set/arm", &[TRACK, ARMED], "Arm or disarm a track"),
    tool("create_midi_track", "/live/song/create_midi_track", &[INSERT_AT], "Create a MIDI track (-1 appends)"),
    tool("create_audio_track", "/live/song/create_audio_track", &[INSERT_AT], "Create an audio track (-1 appends)"),
    tool("delete_track", "/live/song/delete_track", &[TRACK], "Delete a track"),
    // Devices
    tool("get_num_devices", "/live/track/get/num_devices", &[TRACK], "Number of devices on a track"),
    tool("get_device_name", "/live/device/get/name", &[TRACK, DEVICE], "Name of a device"),
    tool(
        "get_device_parameter_names",
        "/live/device/get/parameters/name",
        &[TRACK, DEVICE],
        "Parameter names of a device",
    ),
    tool(
        "get_device_parameter_values",
        "/live/device/get/parameters/value",
        &[TRACK, DEVICE],
        "Parameter values of a device",
    ),
    tool(
        "set_device_parameter",
        "/live/device/set/parameter/value",
        &[TRACK, DEVICE, PARAMETER, VALUE],
        "Set one device parameter",
    ),
    // Scenes
    tool("get_num_scenes", "/live/song/get/num_scenes", &[], "Number of scenes"),
    tool("fire_scene", "/live/scene/fire", &[SCENE], "Launch a scene"),
    tool("get_scene_name", "/live/scene/get/name", &[SCENE], "Name of a scene"),
    tool("set_scene_name", "/live/scene/set/name", &[SCENE, NAME], "Rename a scene"),
    tool("create_scene", "/live/song/create_scene", &[INSERT_AT], "Create a scene (-1 appends)"),
    tool("delete_scene", "/live/song/delete_scene", &[SCENE], "Delete a scene"),
    // Clips
    tool("fire_clip", "/live/clip/fire", &[TRACK, CLIP], "Launch a clip"),
    tool("stop_clip", "/live/clip/stop", &[TRACK, CLIP], "Stop a clip"),
    tool("get_clip_name", "/live/clip/get/name", &[TRACK, CLIP], "Name of a clip"),
    tool("set_clip_name", "/live/clip/set/name", &[TRACK, CLIP, NAME], "Rename a clip"),
    // View
    tool("get_selected_track", "/live/view/get/selected_track", &[], "Index of the selected track"),
    tool("set_selected_track", "/live/view/set/selected_track", &[TRACK], "Select a track"),
    tool("get_selected_scene", "/live/view/get/selected_scene", &[], "Index of the selected scene"),
    tool("set_selected_scene", "/live/view/set/selected_scene", &[SCENE], "Select a scene"),
    // Application
    tool("get_application_version", "/live/application/get/version", &[], "Ableton Live version"),
    tool("test_connection", "/live/test", &[], "Check that AbletonOSC answers"),
];

pub fn find(name: &str) -> Result<&'static Tool, CatalogError> {
    TOOLS
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| CatalogError::UnknownTool(name.to_string()))
}

/// An address and positional arguments, ready for the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub address: &'static str,
    pub args: Vec<Value>,
}

impl Tool {
    /// Validate `params` and build the wire arguments.
    ///
    /// `params` is a JSON object keyed by parameter name; `null` stands for
    /// an empty object.
    pub fn invocation(&self, params: &Value) -> Result<Invocation, CatalogError> {
        let empty = Map::new();
        let given = match params {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => return Err(CatalogError::NotAnObject(self.name)),
        };

        if let Some(extra) = given
            .keys()
            .find(|k| !self.params.iter().any(|p| p.name == k.as_str()))
        {
            return Err(CatalogError::Unexpected {
                tool: self.name,
                param: extra.clone(),
            });
        }

        let mut args = Vec::with_capacity(self.params.len());
        let mut skipped: Option<&'static str> = None;

        for param in self.params {
            match (given.get(param.name), param.presence) {
                (Some(value), _) => {
                    if let Some(earlier) = skipped {
                        return Err(CatalogError::OutOfOrder {
                            earlier,
                            later: param.name,
                        });
                    }
                    args.push(check(param, value)?);
                }
                (None, Presence::Required) => {
                    return Err(CatalogError::Missing {
                        tool: self.name,
                        param: param.name,
                    })
                }
                (None, Presence::Default(value)) => args.push(Value::from(value)),
                (None, Presence::Optional) => {
                    skipped.get_or_insert(param.name);
                }
            }
        }

        Ok(Invocation {
            address: self.address,
            args,
        })
    }
}

fn invalid(param: &Param, reason: impl Into<String>) -> CatalogError {
    CatalogError::Invalid {
        param: param.name,
        reason: reason.into(),
    }
}

fn number(param: &Param, value: &Value) -> Result<f64, CatalogError> {
    value
        .as_f64()
        .ok_or_else(|| invalid(param, format!("expected a number, got {}", value)))
}

fn integer(param: &Param, value: &Value) -> Result<i64, CatalogError> {
    value
        .as_i64()
        .ok_or_else(|| invalid(param, format!("expected an integer, got {}", value)))
}

fn in_range(param: &Param, value: &Value, min: f64, max: f64) -> Result<Value, CatalogError> {
    let v = number(param, value)?;
    if !(min..=max).contains(&v) {
        return Err(invalid(param, format!("{} is outside {}..={}", v, min, max)));
    }
    Ok(Value::from(v))
}

fn check(param: &Param, value: &Value) -> Result<Value, CatalogError> {
    match param.kind {
        Kind::Index => {
            let i = integer(param, value)?;
            if i < 0 {
                return Err(invalid(param, "must not be negative"));
            }
            Ok(Value::from(i))
        }
        Kind::Position => {
            let i = integer(param, value)?;
            if i < -1 {
                return Err(invalid(param, "must be -1 or a valid index"));
            }
            Ok(Value::from(i))
        }
        Kind::Tempo => in_range(param, value, 20.0, 999.0),
        Kind::Volume => in_range(param, value, 0.0, 1.0),
        Kind::Switch => match value {
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            Value::Number(_) => match value.as_i64() {
                Some(i @ (0 | 1)) => Ok(Value::from(i)),
                _ => Err(invalid(param, "expected true/false or 1/0")),
            },
            _ => Err(invalid(param, "expected true/false or 1/0")),
        },
        Kind::Text => match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            _ => Err(invalid(param, format!("expected a string, got {}", value))),
        },
        Kind::Number => Ok(Value::from(number(param, value)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_tool_names_unique() {
        let names: HashSet<_> = TOOLS.iter().map(|t| t.name).collect();
        assert_eq!(names.len(), TOOLS.len());
    }

    #[test]
    fn test_every_address_is_valid() {
        for tool in TOOLS {
            assert!(
                stageproto::WireCommand::new(tool.address, vec![]).is_ok(),
                "{}",
                tool.name
            );
        }
    }

    #[test]
    fn test_set_tempo_range() {
        let tool = find("set_tempo").unwrap();
        assert_eq!(
            tool.invocation(&json!({"bpm": 128})).unwrap(),
            Invocation {
                address: "/live/song/set/tempo",
                args: vec![json!(128.0)],
            }
        );
        assert!(matches!(
            tool.invocation(&json!({"bpm": 10})),
            Err(CatalogError::Invalid { param: "bpm", .. })
        ));
        assert!(tool.invocation(&json!({"bpm": 1000.5})).is_err());
    }

    #[test]
    fn test_volume_and_index_validation() {
        let tool = find("set_track_volume").unwrap();
        assert_eq!(
            tool.invocation(&json!({"track_index": 2, "volume": 0.5}))
                .unwrap()
                .args,
            vec![json!(2), json!(0.5)]
        );
        assert!(tool
            .invocation(&json!({"track_index": -1, "volume": 0.5}))
            .is_err());
        assert!(tool
            .invocation(&json!({"track_index": 0, "volume": 1.5}))
            .is_err());
    }

    #[test]
    fn test_switch_sent_as_int() {
        let tool = find("set_track_mute").unwrap();
        let args = tool
            .invocation(&json!({"track_index": 0, "muted": true}))
            .unwrap()
            .args;
        assert_eq!(args, vec![json!(0), json!(1)]);
    }

    #[test]
    fn test_position_defaults_to_append() {
        let tool = find("create_midi_track").unwrap();
        assert_eq!(tool.invocation(&Value::Null).unwrap().args, vec![json!(-1)]);
        assert_eq!(
            tool.invocation(&json!({"index": 3})).unwrap().args,
            vec![json!(3)]
        );
    }

    #[test]
    fn test_optional_range() {
        let tool = find("get_track_names").unwrap();
        assert!(tool.invocation(&json!({})).unwrap().args.is_empty());
        assert_eq!(
            tool.invocation(&json!({"index_min": 0, "index_max": 4}))
                .unwrap()
                .args,
            vec![json!(0), json!(4)]
        );
        assert_eq!(
            tool.invocation(&json!({"index_max": 4})),
            Err(CatalogError::OutOfOrder {
                earlier: "index_min",
                later: "index_max"
            })
        );
    }

    #[test]
    fn test_missing_and_unexpected_params() {
        let tool = find("get_clip_name").unwrap();
        assert_eq!(
            tool.invocation(&json!({"track_index": 0})),
            Err(CatalogError::Missing {
                tool: "get_clip_name",
                param: "clip_index"
            })
        );
        assert!(matches!(
            tool.invocation(&json!({"track_index": 0, "clip_index": 1, "slot": 2})),
            Err(CatalogError::Unexpected { .. })
        ));
        assert_eq!(
            tool.invocation(&json!([0, 1])),
            Err(CatalogError::NotAnObject("get_clip_name"))
        );
    }

    #[test]
    fn test_unknown_tool() {
        assert_eq!(
            find("dance").unwrap_err().to_string(),
            "unknown tool: dance"
        );
    }
}
