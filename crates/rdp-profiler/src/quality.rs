//! Advisory quality rubric used to flag generated profiles for human review.

use rdp_core::{
    Animal, ConfidenceLevel, DogProfilerData, EnergyLevel, ExerciseNeeds, ExperienceLevel, GoodWithCats,
    GoodWithChildren, GoodWithDogs, HomeType, Sociability, Trainability, CATEGORICAL_FIELDS,
};
use serde::Serialize;

pub const PASS_THRESHOLD: f64 = 0.80;

pub const IDEAL_DESCRIPTION_MIN: usize = 150;
pub const IDEAL_DESCRIPTION_MAX: usize = 400;

const CLICHES: &[&str] = &[
    "perfect companion",
    "fur baby",
    "bundle of joy",
    "won't disappoint",
    "looking for love",
    "one in a million",
];

const PLACEHOLDERS: &[&str] = &["lorem ipsum", "[name]", "{name}", "insert name", "todo"];

const KNOWN_BREEDS: &[&str] = &[
    "labrador",
    "german shepherd",
    "golden retriever",
    "beagle",
    "poodle",
    "husky",
    "chihuahua",
    "dachshund",
    "border collie",
    "greyhound",
    "podenco",
    "galgo",
    "rottweiler",
    "boxer",
    "terrier",
];

const UNTRANSLATED_MARKERS: &[(&str, &[&str])] = &[
    ("de", &["und", "der", "das", "ist", "nicht", "mit", "sehr", "hund", "ein", "sie"]),
    ("es", &["el", "los", "las", "muy", "perro", "pero", "con", "para", "es", "una"]),
    ("fr", &["le", "les", "très", "chien", "avec", "est", "une", "pour", "mais"]),
    ("it", &["il", "cane", "molto", "con", "per", "una", "è", "che"]),
    ("nl", &["de", "het", "een", "hond", "niet", "zeer", "met", "voor"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RubricWeights {
    pub description_quality: f64,
    pub field_completeness: f64,
    pub data_accuracy: f64,
    pub language_quality: f64,
    pub consistency: f64,
}

impl Default for RubricWeights {
    fn default() -> Self {
        Self {
            description_quality: 0.25,
            field_completeness: 0.20,
            data_accuracy: 0.30,
            language_quality: 0.15,
            consistency: 0.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Pass,
    Review,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    DescriptionTooShort,
    DescriptionTooLong,
    DescriptionMissingName,
    GenericPhrasing,
    PlaceholderText,
    ManyDefaultedFields,
    PaddedList(String),
    LowConfidence,
    UnsupportedClaims,
    BreedContradiction,
    UntranslatedText,
    ExcessiveExclamation,
    ShoutingCaps,
    MissingPunctuation,
    Contradiction(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub total_score: f64,
    pub description_quality: f64,
    pub field_completeness: f64,
    pub data_accuracy: f64,
    pub language_quality: f64,
    pub consistency: f64,
    pub passes: bool,
    pub recommendation: Recommendation,
    pub issues: Vec<QualityIssue>,
}

#[derive(Debug, Clone)]
pub struct QualityRubric {
    weights: RubricWeights,
    threshold: f64,
}

impl Default for QualityRubric {
    fn default() -> Self {
        Self {
            weights: RubricWeights::default(),
            threshold: PASS_THRESHOLD,
        }
    }
}

impl QualityRubric {
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score a normalized profile. `source_language` enables the untranslated-text check.
    pub fn score(
        &self,
        profile: &DogProfilerData,
        animal: &Animal,
        source_language: Option<&str>,
    ) -> QualityReport {
        let mut issues = Vec::new();

        let description_quality = description_quality(profile, &animal.name, &mut issues);
        let field_completeness = field_completeness(profile, &mut issues);
        let data_accuracy = data_accuracy(profile, animal.display_breed(), &mut issues);
        let language_quality = language_quality(profile, source_language, &mut issues);
        let consistency = consistency(profile, &mut issues);

        let w = &self.weights;
        let total_score = (description_quality * w.description_quality
            + field_completeness * w.field_completeness
            + data_accuracy * w.data_accuracy
            + language_quality * w.language_quality
            + consistency * w.consistency)
            .clamp(0.0, 1.0);
        let passes = total_score >= self.threshold;

        QualityReport {
            total_score,
            description_quality,
            field_completeness,
            data_accuracy,
            language_quality,
            consistency,
            passes,
            recommendation: if passes {
                Recommendation::Pass
            } else {
                Recommendation::Review
            },
            issues,
        }
    }
}

fn description_quality(profile: &DogProfilerData, dog_name: &str, issues: &mut Vec<QualityIssue>) -> f64 {
    let text = profile.description.trim();
    let lower = text.to_lowercase();
    let len = text.chars().count();
    let mut score = 1.0;

    if len < IDEAL_DESCRIPTION_MIN {
        score *= len as f64 / IDEAL_DESCRIPTION_MIN as f64;
        issues.push(QualityIssue::DescriptionTooShort);
    } else if len > IDEAL_DESCRIPTION_MAX {
        score -= 0.3;
        issues.push(QualityIssue::DescriptionTooLong);
    }

    let name = dog_name.trim().to_lowercase();
    if !name.is_empty() && !lower.contains(&name) {
        score -= 0.2;
        issues.push(QualityIssue::DescriptionMissingName);
    }

    let cliches = CLICHES.iter().filter(|c| lower.contains(*c)).count();
    if cliches > 0 {
        score -= (0.1 * cliches as f64).min(0.3);
        issues.push(QualityIssue::GenericPhrasing);
    }

    if PLACEHOLDERS.iter().any(|p| lower.contains(p)) {
        score -= 0.5;
        issues.push(QualityIssue::PlaceholderText);
    }

    clamp_unit(score)
}

fn is_defaulted(profile: &DogProfilerData, field: &str) -> bool {
    profile
        .source_references
        .get(field)
        .is_some_and(|reference| reference == "default")
}

fn field_completeness(profile: &DogProfilerData, issues: &mut Vec<QualityIssue>) -> f64 {
    let values = profile.categorical_values();
    let populated = values
        .iter()
        .filter(|(field, value)| *value != "unknown" && !is_defaulted(profile, field))
        .count();
    let ratio = populated as f64 / values.len().max(1) as f64;
    if ratio < 0.75 {
        issues.push(QualityIssue::ManyDefaultedFields);
    }

    let mut score = 0.7 * ratio;
    let has_optional_text = [&profile.unique_quirk, &profile.medical_needs, &profile.special_needs]
        .iter()
        .any(|text| text.is_some());
    if has_optional_text {
        score += 0.1;
    }
    for field in ["personality_traits", "favorite_activities"] {
        if profile
            .source_references
            .get(field)
            .is_some_and(|r| r == "default_padding")
        {
            issues.push(QualityIssue::PaddedList(field.to_string()));
        } else {
            score += 0.1;
        }
    }
    clamp_unit(score)
}

fn data_accuracy(profile: &DogProfilerData, breed: &str, issues: &mut Vec<QualityIssue>) -> f64 {
    let scores: Vec<f64> = CATEGORICAL_FIELDS
        .iter()
        .map(|field| profile.confidence_scores.get(*field).copied().unwrap_or(0.0))
        .collect();
    let mean = scores.iter().sum::<f64>() / scores.len().max(1) as f64;
    if mean < 0.5 {
        issues.push(QualityIssue::LowConfidence);
    }

    let unsupported = CATEGORICAL_FIELDS
        .iter()
        .filter(|field| {
            let confident = profile
                .confidence_scores
                .get(**field)
                .is_some_and(|score| *score >= 0.7);
            let unsourced = profile
                .source_references
                .get(**field)
                .map_or(true, |r| r == "default" || r == "inferred");
            confident && unsourced
        })
        .count();
    let mut score = mean;
    if unsupported > 0 {
        score -= 0.05 * unsupported as f64;
        issues.push(QualityIssue::UnsupportedClaims);
    }

    let breed = breed.to_lowercase();
    if breed != "unknown" && !breed.contains("mix") {
        let description = profile.description.to_lowercase();
        let contradicts = KNOWN_BREEDS
            .iter()
            .any(|known| description.contains(known) && !breed.contains(known));
        if contradicts {
            score -= 0.2;
            issues.push(QualityIssue::BreedContradiction);
        }
    }
    clamp_unit(score)
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphabetic() && c != '\'')
        .filter(|w| !w.is_empty())
}

fn language_quality(
    profile: &DogProfilerData,
    source_language: Option<&str>,
    issues: &mut Vec<QualityIssue>,
) -> f64 {
    let text = format!("{} {}", profile.description, profile.tagline);
    let mut score = 1.0;

    let markers = source_language
        .filter(|lang| !lang.eq_ignore_ascii_case("en"))
        .and_then(|lang| {
            UNTRANSLATED_MARKERS
                .iter()
                .find(|(code, _)| code.eq_ignore_ascii_case(lang))
        })
        .map(|(_, markers)| *markers);
    if let Some(markers) = markers {
        let hits = words(&text)
            .filter(|w| markers.contains(&w.to_lowercase().as_str()))
            .count();
        if hits >= 2 {
            score -= 0.5;
            issues.push(QualityIssue::UntranslatedText);
        }
    }

    if text.matches('!').count() > 2 {
        score -= 0.2;
        issues.push(QualityIssue::ExcessiveExclamation);
    }

    let shouting = words(&text)
        .filter(|w| w.chars().count() >= 4 && w.chars().all(|c| c.is_uppercase()))
        .count();
    if shouting > 0 {
        score -= (0.1 * shouting as f64).min(0.3);
        issues.push(QualityIssue::ShoutingCaps);
    }

    let ends_cleanly = profile
        .description
        .trim_end()
        .chars()
        .last()
        .is_some_and(|c| matches!(c, '.' | '!' | '?'));
    if !ends_cleanly {
        score -= 0.1;
        issues.push(QualityIssue::MissingPunctuation);
    }

    clamp_unit(score)
}

fn consistency(profile: &DogProfilerData, issues: &mut Vec<QualityIssue>) -> f64 {
    let description = profile.description.to_lowercase();
    let traits: Vec<String> = profile
        .personality_traits
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    let checks: [(bool, &str); 9] = [
        (
            profile.confidence == ConfidenceLevel::Shy
                && profile.sociability == Sociability::VerySocial,
            "shy_but_very_social",
        ),
        (
            profile.energy_level == EnergyLevel::VeryHigh
                && profile.exercise_needs == ExerciseNeeds::Minimal,
            "very_high_energy_minimal_exercise",
        ),
        (
            profile.energy_level == EnergyLevel::Low && profile.exercise_needs == ExerciseNeeds::High,
            "low_energy_high_exercise",
        ),
        (
            profile.experience_level == ExperienceLevel::FirstTimeOk
                && profile.trainability == Trainability::Challenging,
            "first_time_owner_challenging_training",
        ),
        (
            profile.home_type == HomeType::ApartmentOk && profile.yard_required,
            "apartment_ok_but_yard_required",
        ),
        (
            profile.good_with_dogs == GoodWithDogs::No
                && ["loves other dogs", "gets along with other dogs", "dog-friendly", "good with dogs"]
                    .iter()
                    .any(|p| description.contains(p)),
            "not_good_with_dogs_but_described_dog_friendly",
        ),
        (
            profile.good_with_cats == GoodWithCats::No
                && ["loves cats", "good with cats", "lives with cats"]
                    .iter()
                    .any(|p| description.contains(p)),
            "not_good_with_cats_but_described_cat_friendly",
        ),
        (
            profile.good_with_children == GoodWithChildren::No
                && ["great with kids", "loves children", "good with children"]
                    .iter()
                    .any(|p| description.contains(p)),
            "not_good_with_children_but_described_child_friendly",
        ),
        (
            profile.energy_level == EnergyLevel::Low
                && traits.iter().any(|t| t == "energetic" || t == "hyper"),
            "low_energy_but_energetic_trait",
        ),
    ];

    let mut score: f64 = 1.0;
    for (contradiction, name) in checks {
        if contradiction {
            score -= 0.25;
            issues.push(QualityIssue::Contradiction(name.to_string()));
        }
    }
    clamp_unit(score)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
