use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallMediaType {
    #[default]
    Audio,
    Video,
}

impl CallMediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMediaType::Audio => "audio",
            CallMediaType::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(CallMediaType::Audio),
            "video" => Some(CallMediaType::Video),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CallMediaType::Audio => "Audio Call",
            CallMediaType::Video => "Video Call",
        }
    }
}

impl fmt::Display for CallMediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status carried by call records in the message stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Ongoing,
    Unanswered,
    Rejected,
    Cancelled,
    Busy,
    Ended,
}

impl CallStatus {
    pub fn label(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "Call Started",
            CallStatus::Ongoing => "Ongoing Call",
            CallStatus::Unanswered => "Missed Call",
            CallStatus::Rejected => "Call Rejected",
            CallStatus::Cancelled => "Call Cancelled",
            CallStatus::Busy => "Busy",
            CallStatus::Ended => "Call Ended",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
    /// Joined directly from a session invite, without ringing.
    Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndCallReason {
    LocalEnded,
    RemoteEnded,
}
