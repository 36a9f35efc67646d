//! Typed control messages for the record bridge.
//!
//! The `type` field of every inbound JSON object selects the message kind;
//! payload fields stay optional until validation promotes them, so an absent
//! required field answers `MissingField` instead of blowing up mid-dispatch.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::frame::{braces_balanced, FrameWriter, ProtocolError};

/// Inbound control messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Config(ConfigRequest),
    Start,
    Stop,
    Query,
    Volume(VolumeRequest),
}

impl ControlMessage {
    /// Parse one assembled frame into a typed message.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.is_empty() || !braces_balanced(frame) {
            return Err(ProtocolError::InvalidJson("unbalanced braces".into()));
        }
        let text = std::str::from_utf8(frame)
            .map_err(|_| ProtocolError::InvalidJson("frame is not UTF-8".into()))?;
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(ProtocolError::MissingField("type"))?;

        match kind {
            "config" => Ok(Self::Config(from_value(value)?)),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "query" => Ok(Self::Query),
            "volume" => Ok(Self::Volume(from_value(value)?)),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
}

/// Raw `config` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigRequest {
    pub mode: Option<i64>,
    pub record: Option<RecordParams>,
    pub play: Option<PlayParams>,
}

/// Raw capture parameters inside a `config` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordParams {
    pub sample_rate: Option<u32>,
    pub device: Option<i64>,
    pub format: Option<u32>,
    pub chl_num: Option<u32>,
    pub chl1: Option<u32>,
    pub chl2: Option<u32>,
    pub chl3: Option<u32>,
    pub chl4: Option<u32>,
    pub chl5: Option<u32>,
    pub chl6: Option<u32>,
    pub chl7: Option<u32>,
    pub chl8: Option<u32>,
}

/// Raw `play` sub-request inside a `config` message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayParams {
    pub url: Option<String>,
}

/// Raw `volume` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VolumeRequest {
    pub value: Option<i64>,
}

/// Checked capture settings with every required field present.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSettings {
    pub sample_rate: u32,
    pub device: i64,
    pub format: u32,
    pub channel_count: u32,
    /// Raw `chl1..chl8` descriptors in slot order; absent slots are zero.
    pub channels: [u32; 8],
}

/// Checked config: capture settings plus an optional play URL (present only
/// when `mode == 1`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSettings {
    pub record: RecordSettings,
    pub play: Option<String>,
}

impl ConfigRequest {
    pub fn validated(&self) -> Result<ConfigSettings, ProtocolError> {
        let record = self
            .record
            .as_ref()
            .ok_or(ProtocolError::MissingField("record"))?;

        let settings = RecordSettings {
            sample_rate: record
                .sample_rate
                .ok_or(ProtocolError::MissingField("record.sample_rate"))?,
            device: record
                .device
                .ok_or(ProtocolError::MissingField("record.device"))?,
            format: record
                .format
                .ok_or(ProtocolError::MissingField("record.format"))?,
            channel_count: record
                .chl_num
                .ok_or(ProtocolError::MissingField("record.chl_num"))?,
            channels: [
                record.chl1.unwrap_or(0),
                record.chl2.unwrap_or(0),
                record.chl3.unwrap_or(0),
                record.chl4.unwrap_or(0),
                record.chl5.unwrap_or(0),
                record.chl6.unwrap_or(0),
                record.chl7.unwrap_or(0),
                record.chl8.unwrap_or(0),
            ],
        };

        let play = match self.mode {
            Some(1) => {
                let play = self.play.as_ref().ok_or(ProtocolError::MissingField("play"))?;
                Some(
                    play.url
                        .clone()
                        .ok_or(ProtocolError::MissingField("play.url"))?,
                )
            }
            _ => None,
        };

        Ok(ConfigSettings {
            record: settings,
            play,
        })
    }
}

/// Recorder status reported by `query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Idle,
    Busy,
}

/// Outbound JSON responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Ack,
    Error,
    Query {
        version: String,
        status: RecordStatus,
    },
}

impl Response {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }
}

impl<W: Write> FrameWriter<W> {
    pub fn send_response(&self, response: &Response) -> Result<(), ProtocolError> {
        let text = response.to_json()?;
        log::debug!("sending response: {}", text);
        self.send_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_message_kind() {
        assert_eq!(
            ControlMessage::parse(br#"{"type":"start"}"#).unwrap(),
            ControlMessage::Start
        );
        assert_eq!(
            ControlMessage::parse(br#"{"type":"stop"}"#).unwrap(),
            ControlMessage::Stop
        );
        assert_eq!(
            ControlMessage::parse(br#"{"type":"query"}"#).unwrap(),
            ControlMessage::Query
        );
        match ControlMessage::parse(br#"{"type":"volume","value":50}"#).unwrap() {
            ControlMessage::Volume(v) => assert_eq!(v.value, Some(50)),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn parses_full_config() {
        let raw = br#"{"type":"config","mode":1,
            "record":{"sample_rate":16000,"device":1,"format":1,"chl_num":2,
                      "chl1":65537,"chl2":2},
            "play":{"url":"http://radio.example.com/list.m3u"}}"#;
        let message = ControlMessage::parse(raw).unwrap();
        let ControlMessage::Config(request) = message else {
            panic!("expected config");
        };
        let settings = request.validated().unwrap();
        assert_eq!(settings.record.sample_rate, 16000);
        assert_eq!(settings.record.channel_count, 2);
        assert_eq!(settings.record.channels[0], 65537);
        assert_eq!(settings.record.channels[2], 0);
        assert_eq!(
            settings.play.as_deref(),
            Some("http://radio.example.com/list.m3u")
        );
    }

    #[test]
    fn config_without_mode_ignores_play() {
        let raw = br#"{"type":"config",
            "record":{"sample_rate":48000,"device":2,"format":1,"chl_num":1,"chl1":1},
            "play":{"url":"http://radio.example.com/a.mp3"}}"#;
        let ControlMessage::Config(request) = ControlMessage::parse(raw).unwrap() else {
            panic!("expected config");
        };
        assert_eq!(request.validated().unwrap().play, None);
    }

    #[test]
    fn missing_required_fields_are_named() {
        let raw = br#"{"type":"config","record":{"device":1,"format":1,"chl_num":1}}"#;
        let ControlMessage::Config(request) = ControlMessage::parse(raw).unwrap() else {
            panic!("expected config");
        };
        assert!(matches!(
            request.validated(),
            Err(ProtocolError::MissingField("record.sample_rate"))
        ));

        let raw = br#"{"type":"config","mode":1,
            "record":{"sample_rate":16000,"device":1,"format":1,"chl_num":1}}"#;
        let ControlMessage::Config(request) = ControlMessage::parse(raw).unwrap() else {
            panic!("expected config");
        };
        assert!(matches!(
            request.validated(),
            Err(ProtocolError::MissingField("play"))
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(matches!(
            ControlMessage::parse(br#"{"type":"reboot"}"#),
            Err(ProtocolError::UnknownMessageType(t)) if t == "reboot"
        ));
    }

    #[test]
    fn missing_type_is_rejected() {
        assert!(matches!(
            ControlMessage::parse(br#"{"value":1}"#),
            Err(ProtocolError::MissingField("type"))
        ));
    }

    #[test]
    fn responses_serialize_to_expected_json() {
        assert_eq!(Response::Ack.to_json().unwrap(), r#"{"type":"ack"}"#);
        assert_eq!(Response::Error.to_json().unwrap(), r#"{"type":"error"}"#);
        assert_eq!(
            Response::Query {
                version: "1.0".into(),
                status: RecordStatus::Busy,
            }
            .to_json()
            .unwrap(),
            r#"{"type":"query","version":"1.0","status":"busy"}"#
        );
    }
}
