//! Abstract process signals.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Signals a caller may request. Unix-likes deliver them as-is; Windows
/// maps every one of them onto `taskkill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Signal {
    #[default]
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGKILL")]
    Kill,
    #[serde(rename = "SIGINT")]
    Int,
    #[serde(rename = "SIGHUP")]
    Hup,
    #[serde(rename = "SIGQUIT")]
    Quit,
}

impl Signal {
    pub const ALL: [Signal; 5] = [
        Signal::Term,
        Signal::Kill,
        Signal::Int,
        Signal::Hup,
        Signal::Quit,
    ];

    /// SIGKILL when forcing, SIGTERM otherwise.
    pub fn for_force(force: bool) -> Self {
        if force {
            Signal::Kill
        } else {
            Signal::Term
        }
    }

    /// Full name, e.g. "SIGTERM".
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Term => "SIGTERM",
            Signal::Kill => "SIGKILL",
            Signal::Int => "SIGINT",
            Signal::Hup => "SIGHUP",
            Signal::Quit => "SIGQUIT",
        }
    }

    /// Name as accepted by `kill -<NAME>`.
    pub fn unix_name(&self) -> &'static str {
        &self.name()[3..]
    }

    /// POSIX signal number.
    pub fn number(&self) -> i32 {
        match self {
            Signal::Hup => 1,
            Signal::Int => 2,
            Signal::Quit => 3,
            Signal::Kill => 9,
            Signal::Term => 15,
        }
    }

    /// Whether `taskkill` gets `/F` for this signal.
    pub fn forces_on_windows(&self) -> bool {
        matches!(self, Signal::Kill | Signal::Term)
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Signal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "TERM" | "15" => Ok(Signal::Term),
            "KILL" | "9" => Ok(Signal::Kill),
            "INT" | "2" => Ok(Signal::Int),
            "HUP" | "1" => Ok(Signal::Hup),
            "QUIT" | "3" => Ok(Signal::Quit),
            _ => Err(Error::Validation(format!("Unsupported signal '{}'", s))),
        }
    }
}
