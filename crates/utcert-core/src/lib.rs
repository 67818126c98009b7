//! Storage-free domain values shared by the database layer and the control
//! service: status enums, the multi-sign roster and attachment descriptors.

pub mod attachment;
pub mod roster;

use std::fmt;
use std::str::FromStr;

pub use attachment::{AttachmentDescriptor, fingerprint};
pub use roster::{Roster, SignerState, parse_signer_addresses};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Implements the small-integer storage encoding plus name parsing for a
/// fieldless enum. Every variant is listed once with its stored value.
macro_rules! stored_enum {
    ($name:ident, $kind:literal, { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_i16(self) -> i16 {
                match self {
                    $($name::$variant => $value),+
                }
            }

            pub fn from_i16(value: i16) -> Option<Self> {
                match value {
                    $($value => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            // Accepts the variant name or its stored number.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                if let Ok(n) = s.parse::<i16>() {
                    if let Some(v) = Self::from_i16(n) {
                        return Ok(v);
                    }
                }
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CertificateStatus {
    Draft,
    Signed,
    Sent,
    Banned,
    Pending,
}

stored_enum!(CertificateStatus, "certificate status", {
    Draft = 1,
    Signed = 2,
    Sent = 3,
    Banned = 4,
    Pending = 5,
});

impl CertificateStatus {
    pub fn is_deletable(self) -> bool {
        self != CertificateStatus::Sent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ContactStatus {
    Pending,
    Accepted,
}

stored_enum!(ContactStatus, "contact status", {
    Pending = 0,
    Accepted = 1,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StudyMode {
    FullTime,
    PartTime,
    Distance,
    Online,
}

stored_enum!(StudyMode, "study mode", {
    FullTime = 0,
    PartTime = 1,
    Distance = 2,
    Online = 3,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum SigningType {
    #[default]
    SingleSigning,
    MultipleSigning,
}

stored_enum!(SigningType, "signing type", {
    SingleSigning = 0,
    MultipleSigning = 1,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum Role {
    #[default]
    User,
    Admin,
}

stored_enum!(Role, "role", {
    User = 0,
    Admin = 1,
});

/// Human-readable certificate number as printed on the rendered image.
pub fn format_code(code: i64) -> String {
    format!("{code:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_values_round_trip() {
        for s in CertificateStatus::ALL {
            assert_eq!(CertificateStatus::from_i16(s.as_i16()), Some(*s));
        }
        assert_eq!(CertificateStatus::Draft.as_i16(), 1);
        assert_eq!(CertificateStatus::Pending.as_i16(), 5);
        assert_eq!(CertificateStatus::from_i16(0), None);
    }

    #[test]
    fn study_mode_parses_names_and_numbers() {
        assert_eq!("PartTime".parse::<StudyMode>().unwrap(), StudyMode::PartTime);
        assert_eq!(" Online ".parse::<StudyMode>().unwrap(), StudyMode::Online);
        assert_eq!("0".parse::<StudyMode>().unwrap(), StudyMode::FullTime);

        let err = "Evening".parse::<StudyMode>().unwrap_err();
        assert_eq!(err.kind, "study mode");
        assert_eq!(err.value, "Evening");
    }

    #[test]
    fn sent_is_the_only_undeletable_status() {
        for s in CertificateStatus::ALL {
            assert_eq!(s.is_deletable(), *s != CertificateStatus::Sent);
        }
    }

    #[test]
    fn code_is_zero_padded() {
        assert_eq!(format_code(7), "000007");
        assert_eq!(format_code(1234567), "1234567");
    }
}
