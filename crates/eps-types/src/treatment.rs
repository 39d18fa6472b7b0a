use crate::CodeError;

/// How a prescription may be re-issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreatmentType {
    /// One-off prescription
    Acute,
    /// May be re-issued by the prescribing site
    RepeatPrescribing,
    /// Re-issued automatically, all issues created up front
    RepeatDispensing,
}

impl TreatmentType {
    pub const ALL: [TreatmentType; 3] = [
        TreatmentType::Acute,
        TreatmentType::RepeatPrescribing,
        TreatmentType::RepeatDispensing,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            TreatmentType::Acute => "0001",
            TreatmentType::RepeatPrescribing => "0002",
            TreatmentType::RepeatDispensing => "0003",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, CodeError> {
        TreatmentType::ALL
            .iter()
            .find(|treatment| treatment.code() == code)
            .copied()
            .ok_or_else(|| CodeError::Unrecognised(code.to_owned()))
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TreatmentType::Acute => "Acute Prescription",
            TreatmentType::RepeatPrescribing => "Repeat Prescribing",
            TreatmentType::RepeatDispensing => "Repeat Dispensing",
        }
    }

    /// Record type label used on persisted rows.
    pub fn record_type(&self) -> &'static str {
        match self {
            TreatmentType::Acute => "Acute",
            TreatmentType::RepeatPrescribing => "RepeatPrescribe",
            TreatmentType::RepeatDispensing => "RepeatDispense",
        }
    }
}

impl std::fmt::Display for TreatmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl serde::Serialize for TreatmentType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

impl<'de> serde::Deserialize<'de> for TreatmentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        TreatmentType::from_code(&code).map_err(serde::de::Error::custom)
    }
}
