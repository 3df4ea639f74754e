use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of the random token carried by short ids.
const SHORT_ID_LEN: usize = 8;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Fresh random id: the first eight hex digits of a v4 uuid.
            pub fn new() -> Self {
                let mut raw = Uuid::new_v4().simple().to_string();
                raw.truncate(SHORT_ID_LEN);
                Self(raw)
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(ResponseId);
branded_id!(TerminalId);

/// Agent-side conversation token passed as `--session-id` / `--resume`.
pub fn new_agent_session_token() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_id_is_short_hex() {
        let id = ResponseId::new();
        assert_eq!(id.as_str().len(), SHORT_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = TerminalId::new();
        let b = TerminalId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = ResponseId::new();
        let parsed: ResponseId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_is_transparent() {
        let id = ResponseId::from_raw("abc12345");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc12345\"");
    }

    #[test]
    fn agent_session_token_is_full_uuid() {
        let token = new_agent_session_token();
        assert!(Uuid::parse_str(&token).is_ok());
    }
}
