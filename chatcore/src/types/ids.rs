use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

define_id!(
    /// Identity of a user account on the chat service.
    UserId
);
define_id!(
    /// Identity of a group conversation.
    GroupId
);
define_id!(
    /// Opaque message id, unique and roughly monotonic per conversation.
    MessageId
);
define_id!(
    /// Call session id shared by every participant of a call.
    SessionId
);

/// Whether a message or call is addressed to a user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverKind {
    User,
    Group,
}

impl ReceiverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverKind::User => "user",
            ReceiverKind::Group => "group",
        }
    }
}

impl fmt::Display for ReceiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The other side of a conversation, seen from the local user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Counterpart {
    User(UserId),
    Group(GroupId),
}

impl Counterpart {
    pub fn user(id: impl Into<String>) -> Self {
        Counterpart::User(UserId::new(id))
    }

    pub fn group(id: impl Into<String>) -> Self {
        Counterpart::Group(GroupId::new(id))
    }

    pub fn id(&self) -> &str {
        match self {
            Counterpart::User(u) => u.as_str(),
            Counterpart::Group(g) => g.as_str(),
        }
    }

    pub fn kind(&self) -> ReceiverKind {
        match self {
            Counterpart::User(_) => ReceiverKind::User,
            Counterpart::Group(_) => ReceiverKind::Group,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Counterpart::Group(_))
    }
}

impl fmt::Display for Counterpart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Addressee of a message: receiver id plus kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Receiver {
    pub id: String,
    pub kind: ReceiverKind,
}

impl Receiver {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ReceiverKind::User,
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ReceiverKind::Group,
        }
    }
}

impl From<&Counterpart> for Receiver {
    fn from(c: &Counterpart) -> Self {
        Self {
            id: c.id().to_string(),
            kind: c.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterpart_accessors() {
        let user = Counterpart::user("u1");
        assert_eq!(user.id(), "u1");
        assert_eq!(user.kind(), ReceiverKind::User);
        assert!(!user.is_group());

        let group = Counterpart::group("g1");
        assert!(group.is_group());
        assert_eq!(group.to_string(), "group:g1");
    }

    #[test]
    fn test_receiver_from_counterpart() {
        let receiver = Receiver::from(&Counterpart::group("g9"));
        assert_eq!(receiver, Receiver::group("g9"));
    }
}
