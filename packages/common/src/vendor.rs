use serde::{Deserialize, Serialize};

/// Insurance companies the orchestrator can route quotation jobs to.
///
/// Tokens are lowercase on the wire and in topic names. Parsing is
/// case-insensitive; everything downstream sees the canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Hdi,
    Sura,
    Axa,
    Allianz,
    Bolivar,
    Equidad,
    Mundial,
    Sbs,
    Solidaria,
    Runt,
}

impl Vendor {
    pub const ALL: [Vendor; 10] = [
        Vendor::Hdi,
        Vendor::Sura,
        Vendor::Axa,
        Vendor::Allianz,
        Vendor::Bolivar,
        Vendor::Equidad,
        Vendor::Mundial,
        Vendor::Sbs,
        Vendor::Solidaria,
        Vendor::Runt,
    ];

    /// Canonical lowercase token, as used in MQTT topics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Hdi => "hdi",
            Vendor::Sura => "sura",
            Vendor::Axa => "axa",
            Vendor::Allianz => "allianz",
            Vendor::Bolivar => "bolivar",
            Vendor::Equidad => "equidad",
            Vendor::Mundial => "mundial",
            Vendor::Sbs => "sbs",
            Vendor::Solidaria => "solidaria",
            Vendor::Runt => "runt",
        }
    }

    /// Comma-separated list of supported tokens, for error messages.
    pub fn supported() -> String {
        Self::ALL
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hdi" => Ok(Vendor::Hdi),
            "sura" => Ok(Vendor::Sura),
            "axa" => Ok(Vendor::Axa),
            "allianz" => Ok(Vendor::Allianz),
            "bolivar" => Ok(Vendor::Bolivar),
            "equidad" => Ok(Vendor::Equidad),
            "mundial" => Ok(Vendor::Mundial),
            "sbs" => Ok(Vendor::Sbs),
            "solidaria" => Ok(Vendor::Solidaria),
            "runt" => Ok(Vendor::Runt),
            other => Err(format!("Aseguradora '{}' no soportada", other)),
        }
    }
}
