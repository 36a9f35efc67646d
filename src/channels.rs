//! Capture channel descriptors and the capability string.
//!
//! Each `chlN` config field packs one capture channel: analog mic id in the
//! low byte, digital mic id in bits 8..16, reference-channel flag at bit 16.
//! A zero descriptor leaves the slot unused.

use record_protocol::ProtocolError;

/// Reference-channel flag bit inside a channel descriptor.
pub const CHL_REF_FLAG: u32 = 1 << 16;

const AMIC_MAX: u32 = 5;
const DMIC_MAX: u32 = 8;

/// Physical microphone feeding one capture channel. Discriminants follow the
/// HAL mic-category table (AMIC1 = 0 .. DMIC8 = 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum MicSource {
    Amic1,
    Amic2,
    Amic3,
    Amic4,
    Amic5,
    Dmic1,
    Dmic2,
    Dmic3,
    Dmic4,
    Dmic5,
    Dmic6,
    Dmic7,
    Dmic8,
}

impl MicSource {
    fn analog(id: u32) -> Option<Self> {
        match id {
            1 => Some(Self::Amic1),
            2 => Some(Self::Amic2),
            3 => Some(Self::Amic3),
            4 => Some(Self::Amic4),
            5 => Some(Self::Amic5),
            _ => None,
        }
    }

    fn digital(id: u32) -> Option<Self> {
        match id {
            1 => Some(Self::Dmic1),
            2 => Some(Self::Dmic2),
            3 => Some(Self::Dmic3),
            4 => Some(Self::Dmic4),
            5 => Some(Self::Dmic5),
            6 => Some(Self::Dmic6),
            7 => Some(Self::Dmic7),
            8 => Some(Self::Dmic8),
            _ => None,
        }
    }

    /// HAL mic-category index.
    pub fn category(self) -> u32 {
        self as u32
    }
}

/// Capture routing derived from the eight descriptor slots.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMap {
    pub sources: Vec<MicSource>,
    pub ref_channel: Option<usize>,
}

impl ChannelMap {
    /// Walk the descriptor slots in order. The analog field wins when a slot
    /// names both mic kinds. More than one reference flag is rejected as
    /// invalid input.
    pub fn from_descriptors(descriptors: &[u32]) -> Result<Self, ProtocolError> {
        let mut sources = Vec::new();
        let mut ref_channel = None;

        for &desc in descriptors {
            let amic = desc & 0xff;
            let dmic = (desc >> 8) & 0xff;

            let source = if amic != 0 {
                if amic > AMIC_MAX {
                    return Err(invalid(desc));
                }
                MicSource::analog(amic)
            } else if dmic != 0 {
                if dmic > DMIC_MAX {
                    return Err(invalid(desc));
                }
                MicSource::digital(dmic)
            } else {
                None
            };

            if let Some(source) = source {
                if desc & CHL_REF_FLAG != 0 {
                    if ref_channel.is_some() {
                        log::warn!("more than one reference channel requested");
                        return Err(invalid(desc));
                    }
                    ref_channel = Some(sources.len());
                }
                sources.push(source);
            }
        }

        Ok(Self {
            sources,
            ref_channel,
        })
    }

    /// Capability string handed to the HAL via `set_parameters`.
    pub fn capability_string(&self) -> String {
        match self.ref_channel {
            Some(index) => format!("ref_channel={};cap_mode=no_afe_all_data", index),
            None => "cap_mode=no_afe_all_data".to_string(),
        }
    }
}

fn invalid(desc: u32) -> ProtocolError {
    ProtocolError::InvalidFieldValue {
        field: "chl",
        value: desc as i64,
    }
}
