//! Customer personas and scenario catalogs.
//!
//! The catalogs are bundled data assets, process-local and read-only after
//! load. Both the gateway (catalog endpoints) and the simulation worker
//! (persona assignment) load the same assets.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

const PERSONAS_JSON: &str = include_str!("../assets/personas.json");
const SCENARIOS_JSON: &str = include_str!("../assets/scenarios.json");

/// Default scenario for new sessions.
pub const DEFAULT_SCENARIO: &str = "intro_meeting";

/// A simulated customer persona.
///
/// Immutable once attached to a session. All attribute values are free-form
/// display strings drawn from the persona catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Age bracket, e.g. "30대".
    pub age_group: String,
    /// Gender.
    pub gender: String,
    /// Personality sketch.
    pub personality: String,
    /// Technology literacy.
    pub tech: String,
    /// Purchase goal.
    pub goal: String,
    /// What the product will be used for.
    pub usage: String,
    /// Customer type label, e.g. "신중형".
    #[serde(rename = "type")]
    pub kind: String,
}

/// Scenario catalog: scenario key to situation description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioCatalog(BTreeMap<String, String>);

impl ScenarioCatalog {
    /// Fallback situation description for unknown scenario keys.
    pub const DEFAULT_DESCRIPTION: &'static str = "일반적인 제품 상담";

    /// Build a catalog from key/description pairs.
    #[must_use]
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    /// Look up a scenario description, falling back to the default.
    #[must_use]
    pub fn describe(&self, key: &str) -> &str {
        self.0
            .get(key)
            .map_or(Self::DEFAULT_DESCRIPTION, String::as_str)
    }

    /// All scenario keys in the catalog.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of scenarios.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Preset customer personas.
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    presets: Vec<Persona>,
}

impl PersonaCatalog {
    /// Load the bundled catalog.
    ///
    /// The asset is validated by tests; a broken catalog is a build defect,
    /// so load failures panic at startup.
    #[must_use]
    pub fn load() -> Self {
        let presets: Vec<Persona> =
            serde_json::from_str(PERSONAS_JSON).expect("bundled personas.json is valid");
        Self { presets }
    }

    /// All presets.
    #[must_use]
    pub fn presets(&self) -> &[Persona] {
        &self.presets
    }

    /// Draw a random preset.
    #[must_use]
    pub fn random(&self) -> Persona {
        self.presets
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(neutral_persona)
    }
}

/// Load the bundled scenario catalog.
#[must_use]
pub fn load_scenarios() -> ScenarioCatalog {
    serde_json::from_str(SCENARIOS_JSON).expect("bundled scenarios.json is valid")
}

/// Persona used by the persona-free chat engine, where the customer fields
/// never reach a prompt.
#[must_use]
pub fn neutral_persona() -> Persona {
    Persona {
        age_group: "성인".into(),
        gender: "무관".into(),
        personality: "친근함".into(),
        tech: "중간".into(),
        goal: "일상 대화".into(),
        usage: "일상 대화".into(),
        kind: "일반".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_personas_parse_and_are_nonempty() {
        let catalog = PersonaCatalog::load();
        assert!(catalog.presets().len() >= 5);
        for persona in catalog.presets() {
            assert!(!persona.age_group.is_empty());
            assert!(!persona.kind.is_empty());
        }
    }

    #[test]
    fn random_draws_from_presets() {
        let catalog = PersonaCatalog::load();
        let drawn = catalog.random();
        assert!(catalog.presets().iter().any(|p| *p == drawn));
    }

    #[test]
    fn bundled_scenarios_parse_with_default_key() {
        let scenarios = load_scenarios();
        assert!(!scenarios.is_empty());
        assert_ne!(
            scenarios.describe(DEFAULT_SCENARIO),
            ScenarioCatalog::DEFAULT_DESCRIPTION
        );
    }

    #[test]
    fn describe_falls_back_for_unknown_keys() {
        let catalog = ScenarioCatalog::default();
        assert_eq!(catalog.describe("nope"), ScenarioCatalog::DEFAULT_DESCRIPTION);
    }

    #[test]
    fn persona_serde_uses_type_field() {
        let persona = Persona {
            age_group: "30대".into(),
            gender: "여성".into(),
            personality: "신중하고 꼼꼼함".into(),
            tech: "중간".into(),
            goal: "세탁기 교체".into(),
            usage: "가족용".into(),
            kind: "신중형".into(),
        };
        let json = serde_json::to_value(&persona).unwrap();
        assert_eq!(json["type"], "신중형");
        let back: Persona = serde_json::from_value(json).unwrap();
        assert_eq!(back, persona);
    }
}
