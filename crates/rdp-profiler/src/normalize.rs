//! Coerce loosely-typed model output into the fixed profile vocabulary.
//!
//! Every categorical field goes through the same steps. The value is canonicalised (lowercase,
//! spaces and hyphens folded to `_`), then matched against the enum's own names, then against a
//! synonym table. If both miss, the field gets its documented default. Defaults are tracked so
//! that low-information fields get a zero confidence score instead of whatever the model claimed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rdp_core::{
    AffectionLevel, Animal, ConfidenceLevel, DogProfilerData, EnergyLevel, ExerciseNeeds,
    ExperienceLevel, GoodWithCats, GoodWithChildren, GoodWithDogs, GroomingNeeds, HomeType,
    Sociability, Trainability, list_item_key, CATEGORICAL_FIELDS, DESCRIPTION_MAX_CHARS, FAVORITE_ACTIVITIES_MAX,
    FAVORITE_ACTIVITIES_MIN, NEEDS_MAX_CHARS, PERSONALITY_TRAITS_MAX, PERSONALITY_TRAITS_MIN,
    PROFILER_VERSION, TAGLINE_MAX_CHARS, UNIQUE_QUIRK_MAX_CHARS,
};
use serde_json::Value as JsonValue;

pub const PADDED_LIST_CONFIDENCE: f64 = 0.3;
pub const DEFAULTED_FIELD_CONFIDENCE: f64 = 0.0;
pub const UNSCORED_FIELD_CONFIDENCE: f64 = 0.5;

pub const DEFAULT_PERSONALITY_TRAITS: &[&str] =
    &["friendly", "loving", "gentle", "playful", "loyal", "curious"];
pub const DEFAULT_FAVORITE_ACTIVITIES: &[&str] =
    &["walks", "playing", "cuddling", "exploring", "sniffing around"];

/// Bookkeeping attached to the normalized profile.
#[derive(Debug, Clone)]
pub struct NormalizeContext<'a> {
    pub animal: &'a Animal,
    pub model_used: &'a str,
    pub prompt_version: &'a str,
    pub generated_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

fn canonical_key(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn lookup<T: Copy>(
    value: &str,
    parse: fn(&str) -> Option<T>,
    synonyms: &[(&str, T)],
) -> Option<T> {
    let key = canonical_key(value);
    parse(&key).or_else(|| {
        synonyms
            .iter()
            .find(|(synonym, _)| *synonym == key)
            .map(|(_, v)| *v)
    })
}

const ENERGY_SYNONYMS: &[(&str, EnergyLevel)] = &[
    ("calm", EnergyLevel::Low),
    ("relaxed", EnergyLevel::Low),
    ("mellow", EnergyLevel::Low),
    ("lazy", EnergyLevel::Low),
    ("couch_potato", EnergyLevel::Low),
    ("very_low", EnergyLevel::Low),
    ("moderate", EnergyLevel::Medium),
    ("average", EnergyLevel::Medium),
    ("normal", EnergyLevel::Medium),
    ("balanced", EnergyLevel::Medium),
    ("energetic", EnergyLevel::High),
    ("active", EnergyLevel::High),
    ("lively", EnergyLevel::High),
    ("playful", EnergyLevel::High),
    ("very_energetic", EnergyLevel::VeryHigh),
    ("extreme", EnergyLevel::VeryHigh),
    ("hyper", EnergyLevel::VeryHigh),
    ("very_active", EnergyLevel::VeryHigh),
    ("boundless", EnergyLevel::VeryHigh),
];

const TRAINABILITY_SYNONYMS: &[(&str, Trainability)] = &[
    ("very_easy", Trainability::Easy),
    ("high", Trainability::Easy),
    ("eager_to_please", Trainability::Easy),
    ("quick_learner", Trainability::Easy),
    ("smart", Trainability::Easy),
    ("medium", Trainability::Moderate),
    ("average", Trainability::Moderate),
    ("trainable", Trainability::Moderate),
    ("difficult", Trainability::Challenging),
    ("hard", Trainability::Challenging),
    ("stubborn", Trainability::Challenging),
    ("low", Trainability::Challenging),
    ("independent", Trainability::Challenging),
];

const SOCIABILITY_SYNONYMS: &[(&str, Sociability)] = &[
    ("shy", Sociability::Reserved),
    ("aloof", Sociability::Reserved),
    ("low", Sociability::Reserved),
    ("independent", Sociability::Reserved),
    ("medium", Sociability::Moderate),
    ("selective", Sociability::Moderate),
    ("average", Sociability::Moderate),
    ("friendly", Sociability::Social),
    ("outgoing", Sociability::Social),
    ("high", Sociability::Social),
    ("very_friendly", Sociability::VerySocial),
    ("extremely_social", Sociability::VerySocial),
    ("very_high", Sociability::VerySocial),
    ("loves_everyone", Sociability::VerySocial),
];

const CONFIDENCE_SYNONYMS: &[(&str, ConfidenceLevel)] = &[
    ("fearful", ConfidenceLevel::Shy),
    ("nervous", ConfidenceLevel::Shy),
    ("timid", ConfidenceLevel::Shy),
    ("anxious", ConfidenceLevel::Shy),
    ("insecure", ConfidenceLevel::Shy),
    ("low", ConfidenceLevel::Shy),
    ("medium", ConfidenceLevel::Moderate),
    ("average", ConfidenceLevel::Moderate),
    ("cautious", ConfidenceLevel::Moderate),
    ("bold", ConfidenceLevel::Confident),
    ("brave", ConfidenceLevel::Confident),
    ("high", ConfidenceLevel::Confident),
    ("self_assured", ConfidenceLevel::Confident),
    ("very_confident", ConfidenceLevel::Confident),
];

const AFFECTION_SYNONYMS: &[(&str, AffectionLevel)] = &[
    ("aloof", AffectionLevel::Independent),
    ("reserved", AffectionLevel::Independent),
    ("low", AffectionLevel::Independent),
    ("medium", AffectionLevel::Moderate),
    ("average", AffectionLevel::Moderate),
    ("loving", AffectionLevel::Affectionate),
    ("cuddly", AffectionLevel::Affectionate),
    ("sweet", AffectionLevel::Affectionate),
    ("high", AffectionLevel::Affectionate),
    ("very_cuddly", AffectionLevel::VeryAffectionate),
    ("velcro", AffectionLevel::VeryAffectionate),
    ("clingy", AffectionLevel::VeryAffectionate),
    ("very_high", AffectionLevel::VeryAffectionate),
];

const HOME_TYPE_SYNONYMS: &[(&str, HomeType)] = &[
    ("apartment", HomeType::ApartmentOk),
    ("flat", HomeType::ApartmentOk),
    ("apartment_friendly", HomeType::ApartmentOk),
    ("any", HomeType::ApartmentOk),
    ("house", HomeType::HousePreferred),
    ("either", HomeType::HousePreferred),
    ("garden_preferred", HomeType::HousePreferred),
    ("house_with_garden", HomeType::HouseRequired),
    ("house_with_yard", HomeType::HouseRequired),
    ("needs_house", HomeType::HouseRequired),
    ("farm", HomeType::HouseRequired),
    ("rural", HomeType::HouseRequired),
];

const EXERCISE_SYNONYMS: &[(&str, ExerciseNeeds)] = &[
    ("low", ExerciseNeeds::Minimal),
    ("light", ExerciseNeeds::Minimal),
    ("little", ExerciseNeeds::Minimal),
    ("medium", ExerciseNeeds::Moderate),
    ("average", ExerciseNeeds::Moderate),
    ("daily_walks", ExerciseNeeds::Moderate),
    ("very_high", ExerciseNeeds::High),
    ("extensive", ExerciseNeeds::High),
    ("lots", ExerciseNeeds::High),
    ("active", ExerciseNeeds::High),
];

const GROOMING_SYNONYMS: &[(&str, GroomingNeeds)] = &[
    ("low", GroomingNeeds::Minimal),
    ("easy", GroomingNeeds::Minimal),
    ("none", GroomingNeeds::Minimal),
    ("moderate", GroomingNeeds::Weekly),
    ("medium", GroomingNeeds::Weekly),
    ("regular", GroomingNeeds::Weekly),
    ("average", GroomingNeeds::Weekly),
    ("high", GroomingNeeds::Frequent),
    ("daily", GroomingNeeds::Frequent),
    ("extensive", GroomingNeeds::Frequent),
    ("professional", GroomingNeeds::Frequent),
];

const EXPERIENCE_SYNONYMS: &[(&str, ExperienceLevel)] = &[
    ("beginner", ExperienceLevel::FirstTimeOk),
    ("first_time", ExperienceLevel::FirstTimeOk),
    ("novice", ExperienceLevel::FirstTimeOk),
    ("any", ExperienceLevel::FirstTimeOk),
    ("easy", ExperienceLevel::FirstTimeOk),
    ("none", ExperienceLevel::FirstTimeOk),
    ("intermediate", ExperienceLevel::SomeExperience),
    ("moderate", ExperienceLevel::SomeExperience),
    ("some", ExperienceLevel::SomeExperience),
    ("experienced", ExperienceLevel::ExperiencedOnly),
    ("expert", ExperienceLevel::ExperiencedOnly),
    ("advanced", ExperienceLevel::ExperiencedOnly),
    ("experienced_owner", ExperienceLevel::ExperiencedOnly),
];

/// First-pass vocabulary shared by the three compatibility fields.
const COMPATIBILITY_SYNONYMS: &[(&str, &str)] = &[
    ("yes", "yes"),
    ("y", "yes"),
    ("true", "yes"),
    ("good", "yes"),
    ("great", "yes"),
    ("excellent", "yes"),
    ("friendly", "yes"),
    ("loves", "yes"),
    ("compatible", "yes"),
    ("no", "no"),
    ("n", "no"),
    ("false", "no"),
    ("poor", "no"),
    ("never", "no"),
    ("not_good", "no"),
    ("not_recommended", "no"),
    ("incompatible", "no"),
    ("selective", "selective"),
    ("maybe", "selective"),
    ("some", "selective"),
    ("sometimes", "selective"),
    ("depends", "selective"),
    ("mixed", "selective"),
    ("conditional", "selective"),
    ("partially", "selective"),
    ("with_supervision", "selective"),
    ("supervised", "selective"),
    ("with_training", "with_training"),
    ("trainable", "with_training"),
    ("with_introduction", "with_training"),
    ("slow_introduction", "with_training"),
    ("older_children", "older_children"),
    ("older_kids", "older_children"),
    ("older", "older_children"),
    ("teens", "older_children"),
    ("unknown", "unknown"),
    ("untested", "unknown"),
    ("not_tested", "unknown"),
    ("unclear", "unknown"),
    ("n/a", "unknown"),
];

pub fn normalize_energy_level(value: &str) -> EnergyLevel {
    lookup(value, EnergyLevel::parse, ENERGY_SYNONYMS).unwrap_or(EnergyLevel::Medium)
}

pub fn normalize_trainability(value: &str) -> Trainability {
    lookup(value, Trainability::parse, TRAINABILITY_SYNONYMS).unwrap_or(Trainability::Moderate)
}

pub fn normalize_sociability(value: &str) -> Sociability {
    lookup(value, Sociability::parse, SOCIABILITY_SYNONYMS).unwrap_or(Sociability::Moderate)
}

pub fn normalize_confidence(value: &str) -> ConfidenceLevel {
    lookup(value, ConfidenceLevel::parse, CONFIDENCE_SYNONYMS).unwrap_or(ConfidenceLevel::Moderate)
}

pub fn normalize_affection_level(value: &str) -> AffectionLevel {
    lookup(value, AffectionLevel::parse, AFFECTION_SYNONYMS).unwrap_or(AffectionLevel::Moderate)
}

pub fn normalize_home_type(value: &str) -> HomeType {
    lookup(value, HomeType::parse, HOME_TYPE_SYNONYMS).unwrap_or(HomeType::HousePreferred)
}

pub fn normalize_exercise_needs(value: &str) -> ExerciseNeeds {
    lookup(value, ExerciseNeeds::parse, EXERCISE_SYNONYMS).unwrap_or(ExerciseNeeds::Moderate)
}

pub fn normalize_grooming_needs(value: &str) -> GroomingNeeds {
    lookup(value, GroomingNeeds::parse, GROOMING_SYNONYMS).unwrap_or(GroomingNeeds::Weekly)
}

pub fn normalize_experience_level(value: &str) -> ExperienceLevel {
    lookup(value, ExperienceLevel::parse, EXPERIENCE_SYNONYMS)
        .unwrap_or(ExperienceLevel::SomeExperience)
}

fn compatibility_first_pass(value: &str) -> Option<&'static str> {
    let key = canonical_key(value);
    COMPATIBILITY_SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == key)
        .map(|(_, canonical)| *canonical)
}

pub fn normalize_good_with_dogs(value: &str) -> GoodWithDogs {
    match compatibility_first_pass(value) {
        Some("yes") => GoodWithDogs::Yes,
        Some("no") => GoodWithDogs::No,
        Some("selective" | "with_training" | "older_children") => GoodWithDogs::Selective,
        _ => GoodWithDogs::Unknown,
    }
}

/// `selective` is not part of the cat vocabulary; the second pass folds it into `with_training`.
pub fn normalize_good_with_cats(value: &str) -> GoodWithCats {
    let first = compatibility_first_pass(value);
    let second = match first {
        Some("selective" | "older_children") => Some("with_training"),
        other => other,
    };
    second
        .and_then(GoodWithCats::parse)
        .unwrap_or(GoodWithCats::Unknown)
}

/// `selective` is not part of the children vocabulary; the second pass folds it into `older_children`.
pub fn normalize_good_with_children(value: &str) -> GoodWithChildren {
    let first = compatibility_first_pass(value);
    let second = match first {
        Some("selective" | "with_training") => Some("older_children"),
        other => other,
    };
    second
        .and_then(GoodWithChildren::parse)
        .unwrap_or(GoodWithChildren::Unknown)
}

/// JSON bools, numbers, and yes/no style strings; anything else is `false`.
pub fn normalize_bool(value: Option<&JsonValue>) -> bool {
    match value {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(JsonValue::String(s)) => matches!(
            canonical_key(s).as_str(),
            "yes" | "true" | "y" | "1"
        ),
        _ => false,
    }
}

/// Deduplicate (case-insensitively), then pad from `defaults` or truncate to the bounds.
///
/// Returns the list and whether padding was needed.
pub fn normalize_list(
    items: &[String],
    min: usize,
    max: usize,
    defaults: &[&str],
) -> (Vec<String>, bool) {
    let mut out: Vec<String> = Vec::with_capacity(max);
    let mut keys: Vec<String> = Vec::with_capacity(max);
    for item in items {
        let key = list_item_key(item);
        if key.is_empty() || keys.contains(&key) {
            continue;
        }
        keys.push(key);
        out.push(item.trim().to_string());
    }

    let mut padded = false;
    for default in defaults {
        if out.len() >= min {
            break;
        }
        let key = list_item_key(default);
        if !keys.contains(&key) {
            keys.push(key);
            out.push((*default).to_string());
            padded = true;
        }
    }

    out.truncate(max);
    (out, padded)
}

/// Cut `text` to at most `max_chars` characters.
///
/// A sentence end (`.`, `!` or `?` followed by whitespace or end of text) is used as the cut when it
/// falls within the last half of the budget. Otherwise the text is cut at a word boundary and `...`
/// is appended.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return text.chars().take(max_chars).collect();
    }

    let chars: Vec<char> = text.chars().collect();
    let sentence_end = (0..max_chars).rev().find(|&i| {
        matches!(chars[i], '.' | '!' | '?')
            && chars.get(i + 1).map_or(true, |next| next.is_whitespace())
    });
    if let Some(end) = sentence_end {
        if end + 1 >= max_chars / 2 {
            return chars[..=end].iter().collect();
        }
    }

    let budget = max_chars - 3;
    let head = &chars[..budget];
    let cut = head
        .iter()
        .rposition(|c| c.is_whitespace())
        .filter(|&pos| pos > 0)
        .unwrap_or(budget);
    let mut out: String = head[..cut].iter().collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

fn text_field(raw: &JsonValue, key: &str) -> Option<String> {
    match raw.get(key)? {
        JsonValue::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn optional_text(raw: &JsonValue, key: &str, max_chars: usize) -> Option<String> {
    let text = text_field(raw, key)?;
    match canonical_key(&text).as_str() {
        "none" | "n/a" | "na" | "unknown" | "null" | "no" => None,
        _ => Some(truncate_text(&text, max_chars)),
    }
}

fn string_list(raw: &JsonValue, key: &str) -> Vec<String> {
    match raw.get(key) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                JsonValue::String(s) => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(JsonValue::String(s)) => s.split(',').map(|part| part.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn categorical_input(raw: &JsonValue, key: &str) -> Option<String> {
    match raw.get(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(true) => Some("yes".to_string()),
        JsonValue::Bool(false) => Some("no".to_string()),
        _ => None,
    }
}

fn confidence_value(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then(|| parsed.clamp(0.0, 1.0))
}

struct Categorical<T> {
    value: T,
    defaulted: bool,
}

fn categorical<T: Copy + PartialEq>(
    raw: &JsonValue,
    key: &str,
    normalize: fn(&str) -> T,
    recognized: fn(&str) -> bool,
    default: T,
) -> Categorical<T> {
    match categorical_input(raw, key) {
        Some(input) if recognized(&input) => Categorical {
            value: normalize(&input),
            defaulted: false,
        },
        _ => Categorical {
            value: default,
            defaulted: true,
        },
    }
}

macro_rules! recognizer {
    ($parse:path, $synonyms:expr) => {
        |value: &str| lookup(value, $parse, $synonyms).is_some()
    };
}

fn compatibility_recognized(value: &str) -> bool {
    compatibility_first_pass(value).is_some_and(|c| c != "unknown")
}

/// Map a raw model response onto a complete [`DogProfilerData`].
///
/// The result is always well-formed. Whether it satisfies the schema bounds is checked separately by
/// [`DogProfilerData::validate`].
pub fn normalize_profile(raw: &JsonValue, ctx: &NormalizeContext<'_>) -> DogProfilerData {
    let energy = categorical(
        raw,
        "energy_level",
        normalize_energy_level,
        recognizer!(EnergyLevel::parse, ENERGY_SYNONYMS),
        EnergyLevel::Medium,
    );
    let trainability = categorical(
        raw,
        "trainability",
        normalize_trainability,
        recognizer!(Trainability::parse, TRAINABILITY_SYNONYMS),
        Trainability::Moderate,
    );
    let sociability = categorical(
        raw,
        "sociability",
        normalize_sociability,
        recognizer!(Sociability::parse, SOCIABILITY_SYNONYMS),
        Sociability::Moderate,
    );
    let confidence = categorical(
        raw,
        "confidence",
        normalize_confidence,
        recognizer!(ConfidenceLevel::parse, CONFIDENCE_SYNONYMS),
        ConfidenceLevel::Moderate,
    );
    let affection = categorical(
        raw,
        "affection_level",
        normalize_affection_level,
        recognizer!(AffectionLevel::parse, AFFECTION_SYNONYMS),
        AffectionLevel::Moderate,
    );
    let dogs = categorical(
        raw,
        "good_with_dogs",
        normalize_good_with_dogs,
        compatibility_recognized,
        GoodWithDogs::Unknown,
    );
    let cats = categorical(
        raw,
        "good_with_cats",
        normalize_good_with_cats,
        compatibility_recognized,
        GoodWithCats::Unknown,
    );
    let children = categorical(
        raw,
        "good_with_children",
        normalize_good_with_children,
        compatibility_recognized,
        GoodWithChildren::Unknown,
    );
    let home_type = categorical(
        raw,
        "home_type",
        normalize_home_type,
        recognizer!(HomeType::parse, HOME_TYPE_SYNONYMS),
        HomeType::HousePreferred,
    );
    let exercise = categorical(
        raw,
        "exercise_needs",
        normalize_exercise_needs,
        recognizer!(ExerciseNeeds::parse, EXERCISE_SYNONYMS),
        ExerciseNeeds::Moderate,
    );
    let grooming = categorical(
        raw,
        "grooming_needs",
        normalize_grooming_needs,
        recognizer!(GroomingNeeds::parse, GROOMING_SYNONYMS),
        GroomingNeeds::Weekly,
    );
    let experience = categorical(
        raw,
        "experience_level",
        normalize_experience_level,
        recognizer!(ExperienceLevel::parse, EXPERIENCE_SYNONYMS),
        ExperienceLevel::SomeExperience,
    );

    let defaulted: BTreeMap<&str, bool> = [
        ("energy_level", energy.defaulted),
        ("trainability", trainability.defaulted),
        ("sociability", sociability.defaulted),
        ("confidence", confidence.defaulted),
        ("affection_level", affection.defaulted),
        ("good_with_dogs", dogs.defaulted),
        ("good_with_cats", cats.defaulted),
        ("good_with_children", children.defaulted),
        ("home_type", home_type.defaulted),
        ("exercise_needs", exercise.defaulted),
        ("grooming_needs", grooming.defaulted),
        ("experience_level", experience.defaulted),
    ]
    .into_iter()
    .collect();

    let (personality_traits, traits_padded) = normalize_list(
        &string_list(raw, "personality_traits"),
        PERSONALITY_TRAITS_MIN,
        PERSONALITY_TRAITS_MAX,
        DEFAULT_PERSONALITY_TRAITS,
    );
    let (favorite_activities, activities_padded) = normalize_list(
        &string_list(raw, "favorite_activities"),
        FAVORITE_ACTIVITIES_MIN,
        FAVORITE_ACTIVITIES_MAX,
        DEFAULT_FAVORITE_ACTIVITIES,
    );

    let mut confidence_scores: BTreeMap<String, f64> = raw
        .get("confidence_scores")
        .and_then(JsonValue::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| confidence_value(v).map(|score| (k.clone(), score)))
                .collect()
        })
        .unwrap_or_default();
    let mut source_references: BTreeMap<String, String> = raw
        .get("source_references")
        .and_then(JsonValue::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| match v {
                    JsonValue::String(s) if !s.trim().is_empty() => Some((k.clone(), s.trim().to_string())),
                    JsonValue::Null => None,
                    JsonValue::String(_) => None,
                    other => Some((k.clone(), other.to_string())),
                })
                .collect()
        })
        .unwrap_or_default();

    for field in CATEGORICAL_FIELDS {
        let was_defaulted = defaulted.get(field).copied().unwrap_or(true);
        if was_defaulted {
            confidence_scores.insert((*field).to_string(), DEFAULTED_FIELD_CONFIDENCE);
            source_references.insert((*field).to_string(), "default".to_string());
        } else {
            confidence_scores
                .entry((*field).to_string())
                .or_insert(UNSCORED_FIELD_CONFIDENCE);
            source_references
                .entry((*field).to_string())
                .or_insert_with(|| "inferred".to_string());
        }
    }
    for (field, padded) in [
        ("personality_traits", traits_padded),
        ("favorite_activities", activities_padded),
    ] {
        if padded {
            confidence_scores.insert(field.to_string(), PADDED_LIST_CONFIDENCE);
            source_references.insert(field.to_string(), "default_padding".to_string());
        }
    }

    let description = text_field(raw, "description")
        .map(|d| truncate_text(&d, DESCRIPTION_MAX_CHARS))
        .unwrap_or_default();
    let tagline = text_field(raw, "tagline")
        .map(|t| truncate_text(&t, TAGLINE_MAX_CHARS))
        .unwrap_or_else(|| truncate_text(&format!("Meet {}", ctx.animal.name.trim()), TAGLINE_MAX_CHARS));

    DogProfilerData {
        description,
        tagline,
        energy_level: energy.value,
        trainability: trainability.value,
        sociability: sociability.value,
        confidence: confidence.value,
        affection_level: affection.value,
        good_with_dogs: dogs.value,
        good_with_cats: cats.value,
        good_with_children: children.value,
        home_type: home_type.value,
        exercise_needs: exercise.value,
        grooming_needs: grooming.value,
        experience_level: experience.value,
        yard_required: normalize_bool(raw.get("yard_required")),
        personality_traits,
        favorite_activities,
        unique_quirk: optional_text(raw, "unique_quirk", UNIQUE_QUIRK_MAX_CHARS),
        medical_needs: optional_text(raw, "medical_needs", NEEDS_MAX_CHARS),
        special_needs: optional_text(raw, "special_needs", NEEDS_MAX_CHARS),
        ready_to_travel: normalize_bool(raw.get("ready_to_travel")),
        vaccinated: normalize_bool(raw.get("vaccinated")),
        neutered: normalize_bool(raw.get("neutered")),
        confidence_scores,
        source_references,
        profiler_version: PROFILER_VERSION.to_string(),
        model_used: ctx.model_used.to_string(),
        prompt_version: ctx.prompt_version.to_string(),
        generated_at: ctx.generated_at,
        processing_time_ms: ctx.processing_time_ms,
        quality_score: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn animal() -> Animal {
        serde_json::from_value(json!({
            "id": 42,
            "name": "Max",
            "organization_id": 11,
            "breed": "Mixed",
            "age_text": "2 years",
        }))
        .unwrap()
    }

    fn ctx(animal: &Animal) -> NormalizeContext<'_> {
        NormalizeContext {
            animal,
            model_used: "test/model",
            prompt_version: "1.0",
            generated_at: Utc::now(),
            processing_time_ms: 10,
        }
    }

    #[test]
    fn energy_synonyms_and_default() {
        assert_eq!(normalize_energy_level("medium"), EnergyLevel::Medium);
        assert_eq!(normalize_energy_level("very_energetic"), EnergyLevel::VeryHigh);
        assert_eq!(normalize_energy_level("extreme"), EnergyLevel::VeryHigh);
        assert_eq!(normalize_energy_level("Very High"), EnergyLevel::VeryHigh);
        assert_eq!(normalize_energy_level("  Calm "), EnergyLevel::Low);
        assert_eq!(normalize_energy_level("sparkly"), EnergyLevel::Medium);
        assert_eq!(normalize_energy_level(""), EnergyLevel::Medium);
    }

    #[test]
    fn other_categorical_defaults() {
        assert_eq!(normalize_trainability("stubborn"), Trainability::Challenging);
        assert_eq!(normalize_trainability("???"), Trainability::Moderate);
        assert_eq!(normalize_sociability("very-friendly"), Sociability::VerySocial);
        assert_eq!(normalize_confidence("nervous"), ConfidenceLevel::Shy);
        assert_eq!(normalize_home_type("house with yard"), HomeType::HouseRequired);
        assert_eq!(normalize_home_type("castle"), HomeType::HousePreferred);
        assert_eq!(normalize_experience_level("expert"), ExperienceLevel::ExperiencedOnly);
        assert_eq!(normalize_grooming_needs("daily"), GroomingNeeds::Frequent);
    }

    #[test]
    fn compatibility_second_pass_remaps_selective() {
        assert_eq!(normalize_good_with_children("selective"), GoodWithChildren::OlderChildren);
        assert_eq!(normalize_good_with_children("maybe"), GoodWithChildren::OlderChildren);
        assert_eq!(normalize_good_with_children("older kids"), GoodWithChildren::OlderChildren);
        assert_eq!(normalize_good_with_children("yes"), GoodWithChildren::Yes);
        assert_eq!(normalize_good_with_children("purple"), GoodWithChildren::Unknown);

        assert_eq!(normalize_good_with_cats("selective"), GoodWithCats::WithTraining);
        assert_eq!(normalize_good_with_cats("depends"), GoodWithCats::WithTraining);
        assert_eq!(normalize_good_with_cats("false"), GoodWithCats::No);

        assert_eq!(normalize_good_with_dogs("sometimes"), GoodWithDogs::Selective);
        assert_eq!(normalize_good_with_dogs("with training"), GoodWithDogs::Selective);
    }

    #[test]
    fn booleans_accept_strings_and_numbers() {
        assert!(normalize_bool(Some(&json!("Yes"))));
        assert!(normalize_bool(Some(&json!("true"))));
        assert!(normalize_bool(Some(&json!(1))));
        assert!(!normalize_bool(Some(&json!("unknown"))));
        assert!(!normalize_bool(Some(&json!("no"))));
        assert!(!normalize_bool(None));
    }

    #[test]
    fn personality_traits_pad_without_duplicates() {
        let (traits, padded) = normalize_list(
            &["friendly".to_string()],
            PERSONALITY_TRAITS_MIN,
            PERSONALITY_TRAITS_MAX,
            DEFAULT_PERSONALITY_TRAITS,
        );
        assert!(padded);
        assert_eq!(traits.len(), 3);
        let mut unique = traits.iter().map(|t| t.to_lowercase()).collect::<Vec<_>>();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
        assert_eq!(traits[0], "friendly");
    }

    #[test]
    fn lists_dedup_case_insensitively_and_truncate() {
        let items: Vec<String> = ["Loyal", "loyal", " ", "calm", "smart", "brave", "goofy", "sweet"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let (traits, padded) = normalize_list(&items, 3, 5, DEFAULT_PERSONALITY_TRAITS);
        assert!(!padded);
        assert_eq!(traits, vec!["Loyal", "calm", "smart", "brave", "goofy"]);
    }

    #[test]
    fn non_ascii_case_variants_are_duplicates() {
        let animal = animal();
        let raw = json!({
            "description": "Max is a friendly two-year-old mixed breed who adores long walks.",
            "personality_traits": ["Schüchtern", "SCHÜCHTERN", "verspielt", "Ängstlich", "ängstlich"],
        });
        let profile = normalize_profile(&raw, &ctx(&animal));
        assert_eq!(profile.personality_traits, vec!["Schüchtern", "verspielt", "Ängstlich"]);
        assert_eq!(profile.validate(), Ok(()));
    }

    #[test]
    fn truncation_prefers_sentence_boundaries() {
        let text = "Max is a happy dog. He loves walks in the park and playing with his toys all day long.";
        let cut = truncate_text(text, 36);
        assert_eq!(cut, "Max is a happy dog.");
        assert!(cut.chars().count() <= 36);
    }

    #[test]
    fn truncation_falls_back_to_word_boundary_with_ellipsis() {
        let text = "Hi. Max loves long walks through the forest and chasing squirrels everywhere";
        let cut = truncate_text(text, 30);
        assert!(cut.ends_with("..."));
        assert!(cut.chars().count() <= 30);
        assert!(!cut.contains("Hi. Max loves long walks through"));

        let unicode = "Größenwahnsinniger Hund mit überraschend viel Energie und Ausdauer";
        let cut = truncate_text(unicode, 20);
        assert!(cut.chars().count() <= 20);

        assert_eq!(truncate_text("short", 50), "short");
    }

    #[test]
    fn decimal_points_are_not_sentence_ends() {
        let text = "Weighs 2.5 kg and needs a quiet home without small children around";
        let cut = truncate_text(text, 20);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn sparse_response_produces_complete_defaulted_profile() {
        let animal = animal();
        let raw = json!({
            "description": "Max is a friendly two-year-old mixed breed who adores long walks.",
            "energy_level": "very_energetic",
            "personality_traits": ["friendly"],
            "good_with_children": "maybe",
            "confidence_scores": {"energy_level": 0.9, "good_with_children": "1.7"},
        });

        let profile = normalize_profile(&raw, &ctx(&animal));

        assert_eq!(profile.energy_level, EnergyLevel::VeryHigh);
        assert_eq!(profile.good_with_children, GoodWithChildren::OlderChildren);
        assert_eq!(profile.trainability, Trainability::Moderate);
        assert_eq!(profile.good_with_cats, GoodWithCats::Unknown);
        assert_eq!(profile.tagline, "Meet Max");
        assert_eq!(profile.personality_traits.len(), 3);
        assert_eq!(profile.favorite_activities.len(), 2);

        assert_eq!(profile.confidence_scores["energy_level"], 0.9);
        assert_eq!(profile.confidence_scores["good_with_children"], 1.0);
        assert_eq!(profile.confidence_scores["trainability"], DEFAULTED_FIELD_CONFIDENCE);
        assert_eq!(profile.confidence_scores["personality_traits"], PADDED_LIST_CONFIDENCE);
        assert_eq!(profile.source_references["trainability"], "default");
        assert_eq!(profile.source_references["energy_level"], "inferred");

        assert_eq!(profile.validate(), Ok(()));
    }

    #[test]
    fn placeholder_optional_text_is_dropped() {
        let animal = animal();
        let raw = json!({
            "unique_quirk": "Sleeps with one ear up",
            "medical_needs": "None",
            "special_needs": "n/a",
        });
        let profile = normalize_profile(&raw, &ctx(&animal));
        assert_eq!(profile.unique_quirk.as_deref(), Some("Sleeps with one ear up"));
        assert_eq!(profile.medical_needs, None);
        assert_eq!(profile.special_needs, None);
    }
}
