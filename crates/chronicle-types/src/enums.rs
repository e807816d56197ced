//! Enumeration types for the Chronicle world-state store.
//!
//! Categories and regions are serialized in `SCREAMING_SNAKE_CASE`
//! (`"POLITICAL"`, `"GLOBAL"`), which is the on-disk format of the JSON
//! repository. Both enums accept free-form strings through two parsers:
//! the strict [`FromStr`] implementation, which rejects unknown names, and
//! `from_str_lossy`, which coerces them to a documented default.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// An unrecognized enum name passed to a strict parser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    /// Which enum was being parsed (`"category"`, `"region"`, ...).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Normalize a raw name for case-insensitive matching.
///
/// `"Political"`, `"political"`, and `"POLITICAL"` all map to
/// `"political"`; dashes and spaces are treated as underscores.
fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// State categories
// ---------------------------------------------------------------------------

/// The subject area a state variable belongs to.
///
/// Political, Military, and Quest are the "important" categories: writes to
/// them trigger automatic snapshots and always count as significant changes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum StateCategory {
    /// Governments, rulers, treaties.
    Political,
    /// Trade, prices, resource stockpiles.
    Economic,
    /// Armies, fortifications, conflicts.
    Military,
    /// Culture, morale, public opinion.
    Social,
    /// Weather, terrain, natural phenomena.
    Environmental,
    /// Faction standing and membership.
    Faction,
    /// Head counts and demographics.
    Population,
    /// Churches, cults, divine favor.
    Religious,
    /// Arcane phenomena.
    Magical,
    /// Quest progress and outcomes.
    Quest,
    /// Anything else; also the fallback for unrecognized names.
    #[default]
    Other,
}

impl StateCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Political,
        Self::Economic,
        Self::Military,
        Self::Social,
        Self::Environmental,
        Self::Faction,
        Self::Population,
        Self::Religious,
        Self::Magical,
        Self::Quest,
        Self::Other,
    ];

    /// The canonical upper-case name used on disk.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Political => "POLITICAL",
            Self::Economic => "ECONOMIC",
            Self::Military => "MILITARY",
            Self::Social => "SOCIAL",
            Self::Environmental => "ENVIRONMENTAL",
            Self::Faction => "FACTION",
            Self::Population => "POPULATION",
            Self::Religious => "RELIGIOUS",
            Self::Magical => "MAGICAL",
            Self::Quest => "QUEST",
            Self::Other => "OTHER",
        }
    }

    /// Whether writes in this category are significant enough to trigger an
    /// automatic snapshot.
    pub const fn is_important(self) -> bool {
        matches!(self, Self::Political | Self::Military | Self::Quest)
    }

    /// Parse a category name, falling back to [`StateCategory::Other`] for
    /// anything unrecognized.
    pub fn from_str_lossy(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Other)
    }
}

impl FromStr for StateCategory {
    type Err = ParseEnumError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match normalize(raw).as_str() {
            "political" => Ok(Self::Political),
            "economic" => Ok(Self::Economic),
            "military" => Ok(Self::Military),
            "social" => Ok(Self::Social),
            "environmental" => Ok(Self::Environmental),
            "faction" => Ok(Self::Faction),
            "population" => Ok(Self::Population),
            "religious" => Ok(Self::Religious),
            "magical" => Ok(Self::Magical),
            "quest" => Ok(Self::Quest),
            "other" => Ok(Self::Other),
            _ => Err(ParseEnumError {
                kind: "category",
                value: raw.to_owned(),
            }),
        }
    }
}

impl core::fmt::Display for StateCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// World regions
// ---------------------------------------------------------------------------

/// The part of the world a state variable applies to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum WorldRegion {
    /// Applies to the whole world; also the fallback for unrecognized names.
    #[default]
    Global,
    /// The northern reaches.
    Northern,
    /// The southern reaches.
    Southern,
    /// The eastern reaches.
    Eastern,
    /// The western reaches.
    Western,
    /// The heartland.
    Central,
    /// A caller-defined region outside the compass scheme.
    Custom,
}

impl WorldRegion {
    /// Every region, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Global,
        Self::Northern,
        Self::Southern,
        Self::Eastern,
        Self::Western,
        Self::Central,
        Self::Custom,
    ];

    /// The canonical upper-case name used on disk.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "GLOBAL",
            Self::Northern => "NORTHERN",
            Self::Southern => "SOUTHERN",
            Self::Eastern => "EASTERN",
            Self::Western => "WESTERN",
            Self::Central => "CENTRAL",
            Self::Custom => "CUSTOM",
        }
    }

    /// Parse a region name, falling back to [`WorldRegion::Global`] for
    /// anything unrecognized.
    pub fn from_str_lossy(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Global)
    }
}

impl FromStr for WorldRegion {
    type Err = ParseEnumError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match normalize(raw).as_str() {
            "global" => Ok(Self::Global),
            "northern" | "north" => Ok(Self::Northern),
            "southern" | "south" => Ok(Self::Southern),
            "eastern" | "east" => Ok(Self::Eastern),
            "western" | "west" => Ok(Self::Western),
            "central" => Ok(Self::Central),
            "custom" => Ok(Self::Custom),
            _ => Err(ParseEnumError {
                kind: "region",
                value: raw.to_owned(),
            }),
        }
    }
}

impl core::fmt::Display for WorldRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Change types
// ---------------------------------------------------------------------------

/// What kind of mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ChangeType {
    /// The key did not exist (or was deleted) before this write.
    Created,
    /// An existing live key received a new value.
    Updated,
    /// The key was soft-deleted.
    Deleted,
    /// The value was produced by a derived-state rule.
    Calculated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parsing_is_case_insensitive() {
        assert_eq!("political".parse::<StateCategory>(), Ok(StateCategory::Political));
        assert_eq!("POLITICAL".parse::<StateCategory>(), Ok(StateCategory::Political));
        assert_eq!(" Quest ".parse::<StateCategory>(), Ok(StateCategory::Quest));
    }

    #[test]
    fn unknown_category_is_rejected_strictly() {
        let err = "politcal".parse::<StateCategory>();
        assert_eq!(
            err,
            Err(ParseEnumError {
                kind: "category",
                value: "politcal".to_owned(),
            })
        );
    }

    #[test]
    fn unknown_names_coerce_to_defaults() {
        assert_eq!(StateCategory::from_str_lossy("nonsense"), StateCategory::Other);
        assert_eq!(WorldRegion::from_str_lossy("atlantis"), WorldRegion::Global);
        assert_eq!(WorldRegion::from_str_lossy("north"), WorldRegion::Northern);
    }

    #[test]
    fn important_categories() {
        let important: Vec<_> = StateCategory::ALL
            .into_iter()
            .filter(|c| c.is_important())
            .collect();
        assert_eq!(
            important,
            vec![
                StateCategory::Political,
                StateCategory::Military,
                StateCategory::Quest
            ]
        );
    }

    #[test]
    fn serialized_names_are_upper_case() {
        let json = serde_json::to_string(&StateCategory::Political).unwrap_or_default();
        assert_eq!(json, "\"POLITICAL\"");
        let json = serde_json::to_string(&WorldRegion::Central).unwrap_or_default();
        assert_eq!(json, "\"CENTRAL\"");
        let json = serde_json::to_string(&ChangeType::Calculated).unwrap_or_default();
        assert_eq!(json, "\"CALCULATED\"");
    }

    #[test]
    fn display_matches_serialized_name() {
        for category in StateCategory::ALL {
            let json = serde_json::to_string(&category).unwrap_or_default();
            assert_eq!(json, format!("\"{category}\""));
        }
        for region in WorldRegion::ALL {
            let json = serde_json::to_string(&region).unwrap_or_default();
            assert_eq!(json, format!("\"{region}\""));
        }
    }
}
