//! Source tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A crawled legal-records portal.
///
/// The tag doubles as the table prefix for the source's raw, parsed and
/// child tables, so every source owns a separate table namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Common courts portal (paginated grid).
    Ms,
    /// Administrative courts (7-day search windows).
    Nsa,
    /// Supreme court (per-day search).
    Sn,
    /// Public procurement appeals office (index walk).
    Uzp,
    /// Tax-advisor registry (paginated per region).
    Kidp,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::Ms,
        Source::Nsa,
        Source::Sn,
        Source::Uzp,
        Source::Kidp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ms => "ms",
            Self::Nsa => "nsa",
            Self::Sn => "sn",
            Self::Uzp => "uzp",
            Self::Kidp => "kidp",
        }
    }

    /// Human readable portal name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ms => "Common courts (orzeczenia.ms.gov.pl)",
            Self::Nsa => "Administrative courts (orzeczenia.nsa.gov.pl)",
            Self::Sn => "Supreme Court (sn.pl)",
            Self::Uzp => "Procurement appeals (orzeczenia.uzp.gov.pl)",
            Self::Kidp => "Tax advisor registry (kidp.pl)",
        }
    }

    /// Whether documents from this source are projected into `unified_docs`.
    pub fn is_unified(&self) -> bool {
        !matches!(self, Self::Kidp)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ms" => Ok(Self::Ms),
            "nsa" => Ok(Self::Nsa),
            "sn" => Ok(Self::Sn),
            "uzp" => Ok(Self::Uzp),
            "kidp" => Ok(Self::Kidp),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}
