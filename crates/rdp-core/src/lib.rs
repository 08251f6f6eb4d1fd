//! Core domain model for the rescue dog profiler: animal rows, the profile schema and its validation.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "rdp-core";

/// Version tag written into every generated profile.
pub const PROFILER_VERSION: &str = "1.0.0";

pub const DESCRIPTION_MIN_CHARS: usize = 50;
pub const DESCRIPTION_MAX_CHARS: usize = 400;
pub const TAGLINE_MAX_CHARS: usize = 50;
pub const UNIQUE_QUIRK_MAX_CHARS: usize = 150;
pub const NEEDS_MAX_CHARS: usize = 200;

pub const PERSONALITY_TRAITS_MIN: usize = 3;
pub const PERSONALITY_TRAITS_MAX: usize = 5;
pub const FAVORITE_ACTIVITIES_MIN: usize = 2;
pub const FAVORITE_ACTIVITIES_MAX: usize = 4;

/// Categorical fields that must carry a confidence score and a source reference.
pub const CATEGORICAL_FIELDS: &[&str] = &[
    "energy_level",
    "trainability",
    "sociability",
    "confidence",
    "affection_level",
    "good_with_dogs",
    "good_with_cats",
    "good_with_children",
    "home_type",
    "exercise_needs",
    "grooming_needs",
    "experience_level",
];

/// A scraped listing row from the `animals` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animal {
    pub id: i64,
    pub name: String,
    pub organization_id: i64,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub standardized_breed: Option<String>,
    #[serde(default)]
    pub age_text: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default = "empty_object")]
    pub properties: JsonValue,
    #[serde(default)]
    pub dog_profiler_data: Option<JsonValue>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl Animal {
    /// Best breed label for prompts: the standardized one when the scraper produced it.
    pub fn display_breed(&self) -> &str {
        let non_blank = |b: &&str| !b.trim().is_empty();
        self.standardized_breed
            .as_deref()
            .filter(non_blank)
            .or(self.breed.as_deref().filter(non_blank))
            .unwrap_or("Unknown")
    }

    /// Free-text description scraped from the partner site, if any.
    pub fn source_description(&self) -> Option<&str> {
        self.properties
            .get("description")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// Comparison key for list items; two items with the same key are duplicates.
pub fn list_item_key(item: &str) -> String {
    item.trim().to_lowercase()
}

macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

vocabulary!(EnergyLevel {
    Low => "low",
    Medium => "medium",
    High => "high",
    VeryHigh => "very_high",
});

vocabulary!(Trainability {
    Easy => "easy",
    Moderate => "moderate",
    Challenging => "challenging",
});

vocabulary!(Sociability {
    Reserved => "reserved",
    Moderate => "moderate",
    Social => "social",
    VerySocial => "very_social",
});

vocabulary!(ConfidenceLevel {
    Shy => "shy",
    Moderate => "moderate",
    Confident => "confident",
});

vocabulary!(AffectionLevel {
    Independent => "independent",
    Moderate => "moderate",
    Affectionate => "affectionate",
    VeryAffectionate => "very_affectionate",
});

vocabulary!(GoodWithDogs {
    Yes => "yes",
    No => "no",
    Selective => "selective",
    Unknown => "unknown",
});

vocabulary!(GoodWithCats {
    Yes => "yes",
    No => "no",
    WithTraining => "with_training",
    Unknown => "unknown",
});

vocabulary!(GoodWithChildren {
    Yes => "yes",
    OlderChildren => "older_children",
    No => "no",
    Unknown => "unknown",
});

vocabulary!(HomeType {
    ApartmentOk => "apartment_ok",
    HousePreferred => "house_preferred",
    HouseRequired => "house_required",
});

vocabulary!(ExerciseNeeds {
    Minimal => "minimal",
    Moderate => "moderate",
    High => "high",
});

vocabulary!(GroomingNeeds {
    Minimal => "minimal",
    Weekly => "weekly",
    Frequent => "frequent",
});

vocabulary!(ExperienceLevel {
    FirstTimeOk => "first_time_ok",
    SomeExperience => "some_experience",
    ExperiencedOnly => "experienced_only",
});

/// LLM-generated adoption profile stored in `animals.dog_profiler_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DogProfilerData {
    pub description: String,
    pub tagline: String,

    pub energy_level: EnergyLevel,
    pub trainability: Trainability,
    pub sociability: Sociability,
    pub confidence: ConfidenceLevel,
    pub affection_level: AffectionLevel,

    pub good_with_dogs: GoodWithDogs,
    pub good_with_cats: GoodWithCats,
    pub good_with_children: GoodWithChildren,

    pub home_type: HomeType,
    pub exercise_needs: ExerciseNeeds,
    pub grooming_needs: GroomingNeeds,
    pub experience_level: ExperienceLevel,
    pub yard_required: bool,

    pub personality_traits: Vec<String>,
    pub favorite_activities: Vec<String>,
    pub unique_quirk: Option<String>,
    pub medical_needs: Option<String>,
    pub special_needs: Option<String>,

    pub ready_to_travel: bool,
    pub vaccinated: bool,
    pub neutered: bool,

    pub confidence_scores: BTreeMap<String, f64>,
    pub source_references: BTreeMap<String, String>,

    pub profiler_version: String,
    pub model_used: String,
    pub prompt_version: String,
    pub generated_at: DateTime<Utc>,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub quality_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaViolation {
    #[error("{field} has {len} characters, expected {min}..={max}")]
    TextLength {
        field: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },
    #[error("{field} has {len} items, expected {min}..={max}")]
    ListLength {
        field: &'static str,
        len: usize,
        min: usize,
        max: usize,
    },
    #[error("{field} contains duplicate item {item:?}")]
    DuplicateItem { field: &'static str, item: String },
    #[error("{field} contains an empty item")]
    EmptyItem { field: &'static str },
    #[error("confidence_scores is missing {field}")]
    MissingConfidence { field: String },
    #[error("confidence score for {field} is {value}, expected 0.0..=1.0")]
    ConfidenceOutOfRange { field: String, value: f64 },
    #[error("source_references is missing {field}")]
    MissingSourceReference { field: String },
}

/// All violations found in one profile.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("profile failed schema validation: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<SchemaViolation>,
}

fn summarize(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DogProfilerData {
    /// Enforce the structural contract required before a profile may be persisted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        check_text(
            &mut violations,
            "description",
            &self.description,
            DESCRIPTION_MIN_CHARS,
            DESCRIPTION_MAX_CHARS,
        );
        check_text(&mut violations, "tagline", &self.tagline, 1, TAGLINE_MAX_CHARS);
        for (field, value, max) in [
            ("unique_quirk", &self.unique_quirk, UNIQUE_QUIRK_MAX_CHARS),
            ("medical_needs", &self.medical_needs, NEEDS_MAX_CHARS),
            ("special_needs", &self.special_needs, NEEDS_MAX_CHARS),
        ] {
            if let Some(text) = value {
                check_text(&mut violations, field, text, 0, max);
            }
        }

        check_list(
            &mut violations,
            "personality_traits",
            &self.personality_traits,
            PERSONALITY_TRAITS_MIN,
            PERSONALITY_TRAITS_MAX,
        );
        check_list(
            &mut violations,
            "favorite_activities",
            &self.favorite_activities,
            FAVORITE_ACTIVITIES_MIN,
            FAVORITE_ACTIVITIES_MAX,
        );

        for field in CATEGORICAL_FIELDS {
            if !self.confidence_scores.contains_key(*field) {
                violations.push(SchemaViolation::MissingConfidence {
                    field: (*field).to_string(),
                });
            }
            if !self.source_references.contains_key(*field) {
                violations.push(SchemaViolation::MissingSourceReference {
                    field: (*field).to_string(),
                });
            }
        }
        for (field, value) in &self.confidence_scores {
            if !(0.0..=1.0).contains(value) {
                violations.push(SchemaViolation::ConfidenceOutOfRange {
                    field: field.clone(),
                    value: *value,
                });
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    /// Categorical values keyed by field name, in schema order.
    pub fn categorical_values(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("energy_level", self.energy_level.as_str()),
            ("trainability", self.trainability.as_str()),
            ("sociability", self.sociability.as_str()),
            ("confidence", self.confidence.as_str()),
            ("affection_level", self.affection_level.as_str()),
            ("good_with_dogs", self.good_with_dogs.as_str()),
            ("good_with_cats", self.good_with_cats.as_str()),
            ("good_with_children", self.good_with_children.as_str()),
            ("home_type", self.home_type.as_str()),
            ("exercise_needs", self.exercise_needs.as_str()),
            ("grooming_needs", self.grooming_needs.as_str()),
            ("experience_level", self.experience_level.as_str()),
        ]
    }
}

fn check_text(
    violations: &mut Vec<SchemaViolation>,
    field: &'static str,
    text: &str,
    min: usize,
    max: usize,
) {
    let len = text.trim().chars().count();
    if len < min || len > max {
        violations.push(SchemaViolation::TextLength {
            field,
            len,
            min,
            max,
        });
    }
}

fn check_list(
    violations: &mut Vec<SchemaViolation>,
    field: &'static str,
    items: &[String],
    min: usize,
    max: usize,
) {
    if items.len() < min || items.len() > max {
        violations.push(SchemaViolation::ListLength {
            field,
            len: items.len(),
            min,
            max,
        });
    }
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        let key = list_item_key(item);
        if key.is_empty() {
            violations.push(SchemaViolation::EmptyItem { field });
            continue;
        }
        if seen.contains(&key) {
            violations.push(SchemaViolation::DuplicateItem {
                field,
                item: item.clone(),
            });
        } else {
            seen.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_profile() -> DogProfilerData {
        let confidence_scores = CATEGORICAL_FIELDS
            .iter()
            .map(|f| (f.to_string(), 0.8))
            .collect();
        let source_references = CATEGORICAL_FIELDS
            .iter()
            .map(|f| (f.to_string(), "description".to_string()))
            .collect();
        DogProfilerData {
            description: "Max is a cheerful two-year-old mixed breed who loves long walks and greets everyone he meets with a wagging tail.".into(),
            tagline: "Your new walking buddy".into(),
            energy_level: EnergyLevel::High,
            trainability: Trainability::Easy,
            sociability: Sociability::Social,
            confidence: ConfidenceLevel::Confident,
            affection_level: AffectionLevel::Affectionate,
            good_with_dogs: GoodWithDogs::Yes,
            good_with_cats: GoodWithCats::Unknown,
            good_with_children: GoodWithChildren::Yes,
            home_type: HomeType::HousePreferred,
            exercise_needs: ExerciseNeeds::High,
            grooming_needs: GroomingNeeds::Weekly,
            experience_level: ExperienceLevel::FirstTimeOk,
            yard_required: false,
            personality_traits: vec!["friendly".into(), "playful".into(), "loyal".into()],
            favorite_activities: vec!["walks".into(), "fetch".into()],
            unique_quirk: None,
            medical_needs: None,
            special_needs: None,
            ready_to_travel: true,
            vaccinated: true,
            neutered: true,
            confidence_scores,
            source_references,
            profiler_version: PROFILER_VERSION.into(),
            model_used: "test-model".into(),
            prompt_version: "1.0".into(),
            generated_at: Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap(),
            processing_time_ms: 1200,
            quality_score: None,
        }
    }

    #[test]
    fn well_formed_profile_validates() {
        assert_eq!(sample_profile().validate(), Ok(()));
    }

    #[test]
    fn validation_collects_every_violation() {
        let mut profile = sample_profile();
        profile.description = "Too short.".into();
        profile.personality_traits = vec!["friendly".into(), "Friendly".into()];
        profile.confidence_scores.remove("energy_level");
        profile.confidence_scores.insert("sociability".into(), 1.4);
        profile.source_references.clear();

        let err = profile.validate().unwrap_err();
        assert!(err.violations.iter().any(|v| matches!(
            v,
            SchemaViolation::TextLength { field: "description", .. }
        )));
        assert!(err.violations.iter().any(|v| matches!(
            v,
            SchemaViolation::ListLength { field: "personality_traits", len: 2, .. }
        )));
        assert!(err
            .violations
            .iter()
            .any(|v| matches!(v, SchemaViolation::DuplicateItem { .. })));
        assert!(err.violations.contains(&SchemaViolation::MissingConfidence {
            field: "energy_level".into()
        }));
        assert!(err.violations.iter().any(|v| matches!(
            v,
            SchemaViolation::ConfidenceOutOfRange { value, .. } if *value > 1.0
        )));
        let missing_refs = err
            .violations
            .iter()
            .filter(|v| matches!(v, SchemaViolation::MissingSourceReference { .. }))
            .count();
        assert_eq!(missing_refs, CATEGORICAL_FIELDS.len());
    }

    #[test]
    fn enums_serialize_as_snake_case() {
        let json = serde_json::to_value(sample_profile()).unwrap();
        assert_eq!(json["energy_level"], "high");
        assert_eq!(json["home_type"], "house_preferred");
        assert_eq!(json["experience_level"], "first_time_ok");
        assert_eq!(EnergyLevel::parse("very_high"), Some(EnergyLevel::VeryHigh));
        assert_eq!(GoodWithCats::parse("selective"), None);
    }

    #[test]
    fn animal_prefers_standardized_breed() {
        let animal: Animal = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "Luna",
            "organization_id": 11,
            "breed": "Mischling",
            "standardized_breed": "Mixed Breed",
        }))
        .unwrap();
        assert_eq!(animal.display_breed(), "Mixed Breed");
        assert!(animal.properties.is_object());
        assert_eq!(animal.source_description(), None);
    }

    #[test]
    fn blank_standardized_breed_falls_back_to_breed() {
        let animal: Animal = serde_json::from_value(serde_json::json!({
            "id": 8,
            "name": "Biscuit",
            "organization_id": 24,
            "breed": "Beagle",
            "standardized_breed": "  ",
        }))
        .unwrap();
        assert_eq!(animal.display_breed(), "Beagle");

        let unknown: Animal = serde_json::from_value(serde_json::json!({
            "id": 9,
            "name": "Rex",
            "organization_id": 24,
            "breed": "",
        }))
        .unwrap();
        assert_eq!(unknown.display_breed(), "Unknown");
    }

    #[test]
    fn list_keys_fold_unicode_case() {
        assert_eq!(list_item_key(" SCHÜCHTERN "), list_item_key("schüchtern"));
    }
}
