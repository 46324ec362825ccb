//! Engine status codes.
//!
//! Every local RPC response embeds a signed status. Zero is success; the
//! named values below are the ones the control plane inspects itself.
//! Unrecognised codes are carried through untouched as [`Status::Other`].

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Status {
    #[default]
    Success,
    NoPermission,
    Invalid,
    Exists,
    NonExistent,
    Unreachable,
    NoSpace,
    Already,
    TimedOut,
    Busy,
    TryAgain,
    Canceled,
    GroupVersionMismatch,
    NotEmpty,
    NotLeader,
    NotReplica,
    NoService,
    Other(i32),
}

const CODES: &[(Status, i32, &str)] = &[
    (Status::Success, 0, "DER_SUCCESS"),
    (Status::NoPermission, -1001, "DER_NO_PERM"),
    (Status::Invalid, -1003, "DER_INVAL"),
    (Status::Exists, -1004, "DER_EXIST"),
    (Status::NonExistent, -1005, "DER_NONEXIST"),
    (Status::Unreachable, -1006, "DER_UNREACH"),
    (Status::NoSpace, -1007, "DER_NOSPACE"),
    (Status::Already, -1008, "DER_ALREADY"),
    (Status::TimedOut, -1011, "DER_TIMEDOUT"),
    (Status::Busy, -1012, "DER_BUSY"),
    (Status::TryAgain, -1013, "DER_AGAIN"),
    (Status::Canceled, -1018, "DER_CANCELED"),
    (Status::GroupVersionMismatch, -1023, "DER_GRPVER"),
    (Status::NotEmpty, -1031, "DER_NOTEMPTY"),
    (Status::NotLeader, -2008, "DER_NOTLEADER"),
    (Status::NotReplica, -2020, "DER_NOTREPLICA"),
    (Status::NoService, -2039, "DER_NO_SERVICE"),
];

impl Status {
    /// Signed wire code.
    pub fn code(self) -> i32 {
        if let Status::Other(code) = self {
            return code;
        }
        CODES
            .iter()
            .find(|(s, _, _)| *s == self)
            .map(|(_, c, _)| *c)
            .unwrap_or_default()
    }

    /// Map a wire code onto a named status.
    pub fn from_code(code: i32) -> Self {
        CODES
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(s, _, _)| *s)
            .unwrap_or(Status::Other(code))
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Symbolic name, e.g. `DER_BUSY`.
    pub fn name(self) -> &'static str {
        CODES
            .iter()
            .find(|(s, _, _)| *s == self)
            .map(|(_, _, n)| *n)
            .unwrap_or("DER_UNKNOWN")
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status::from_code(code)
    }
}

impl From<Status> for i32 {
    fn from(s: Status) -> Self {
        s.code()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}
