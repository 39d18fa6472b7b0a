use rand::Rng;

use crate::{prescription_id_without_check_digit, LONG_ID_LENGTH, SHORT_ID_LENGTH};

/// Number of shard partitions appended to persisted release versions.
pub const RELEASE_VERSION_PARTITIONS: u32 = 12;

/// Prescription release version, determined by identifier length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ReleaseVersion {
    R1,
    R2,
    Unknown,
}

impl ReleaseVersion {
    /// Classify an identifier by the length of its core.
    pub fn from_prescription_id(prescription_id: &str) -> Self {
        match prescription_id_without_check_digit(prescription_id).len() {
            LONG_ID_LENGTH => ReleaseVersion::R1,
            SHORT_ID_LENGTH => ReleaseVersion::R2,
            _ => ReleaseVersion::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseVersion::R1 => "R1",
            ReleaseVersion::R2 => "R2",
            ReleaseVersion::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The release version as persisted on record rows, with a shard suffix
/// drawn uniformly from `1..=RELEASE_VERSION_PARTITIONS` so queries by
/// release version spread across partitions. Unknown versions carry no
/// shard.
pub fn sharded_release_version<R: Rng>(prescription_id: &str, rng: &mut R) -> String {
    let version = ReleaseVersion::from_prescription_id(prescription_id);
    match version {
        ReleaseVersion::Unknown => version.as_str().to_owned(),
        _ => {
            let shard = rng.gen_range(1..=RELEASE_VERSION_PARTITIONS);
            format!("{}.{}", version.as_str(), shard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nineteen_character_core_is_r2() {
        assert_eq!(
            ReleaseVersion::from_prescription_id("7D9625-Z72BF2-11E3A"),
            ReleaseVersion::R2
        );
        // Check digit present: stripped before classifying.
        assert_eq!(
            ReleaseVersion::from_prescription_id("7D9625-Z72BF2-11E3AC"),
            ReleaseVersion::R2
        );
    }

    #[test]
    fn thirty_six_character_core_is_r1() {
        let id = "A".repeat(36);
        assert_eq!(ReleaseVersion::from_prescription_id(&id), ReleaseVersion::R1);
    }

    #[test]
    fn other_lengths_are_unknown() {
        assert_eq!(
            ReleaseVersion::from_prescription_id("SHORT"),
            ReleaseVersion::Unknown
        );
    }

    #[test]
    fn sharded_form_stays_in_range() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let value = sharded_release_version("7D9625-Z72BF2-11E3A", &mut rng);
            let (version, shard) = value.split_once('.').unwrap();
            assert_eq!(version, "R2");
            let shard: u32 = shard.parse().unwrap();
            assert!((1..=RELEASE_VERSION_PARTITIONS).contains(&shard));
        }
    }

    #[test]
    fn unknown_version_has_no_shard() {
        let mut rng = rand::thread_rng();
        assert_eq!(sharded_release_version("SHORT", &mut rng), "UNKNOWN");
    }
}
