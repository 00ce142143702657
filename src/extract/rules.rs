//! Lexicon-based extractor.
//!
//! Reads places that follow a spatial preposition, activity keywords,
//! participants ("with Sam", "Sam joined", role nouns like "colleague"), and a
//! small mood/stress/energy vocabulary. When a fragment mentions several places
//! or activities, the one mentioned last wins: fragments narrate forward in time.
//! Pure and deterministic, so identical text always yields identical output.

use async_trait::async_trait;
use regex::Regex;

use super::{Extraction, ExtractionError, SemanticExtractor};
use crate::journal::types::{Scores, SCORE_MAX};

const LOCATION_WEIGHT: f64 = 0.5;
const ACTIVITY_WEIGHT: f64 = 0.3;
const PARTICIPANT_WEIGHT: f64 = 0.2;

const PREPOSITIONS: &str = r"(?:at|in|to|into|inside|toward|towards|reached|entered)";

const COMMON_PLACES: &str = "home|office|work|gym|park|school|university|campus|library|cafe|café|\
coffee shop|restaurant|bar|pub|supermarket|grocery store|store|mall|market|hospital|clinic|\
airport|station|beach|church|kitchen|bedroom|living room|garden|car|bus|train";

/// Capitalized words that follow a preposition but are not places.
const NOT_PLACES: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
    "january", "february", "march", "april", "may", "june", "july", "august",
    "september", "october", "november", "december", "i", "noon", "midnight",
];

const NOT_NAMES: &[&str] = &["i", "we", "they", "he", "she", "it", "then", "now", "still", "just"];

const ACTIVITIES: &[(&str, &str)] = &[
    ("exercise", r"working out|workout|exercising|running|jogging|lifting|swimming|yoga"),
    ("work", r"working|coding|programming|emailing|debugging|start(?:ed|ing)? work"),
    ("meeting", r"meeting|stand-?up|on a call|call with"),
    ("walking", r"walking|strolling|hiking"),
    ("commuting", r"driving|commuting|cycling|biking|on the bus|on the train"),
    ("eating", r"eating|lunch|dinner|breakfast|brunch|snacking|having coffee|drinking coffee"),
    ("shopping", r"shopping|groceries|buying"),
    ("socializing", r"chatting|hanging out|catching up|partying"),
    ("resting", r"resting|relaxing|napping|sleeping|lying down|watching tv|watching a movie"),
    ("reading", r"reading"),
    ("cooking", r"cooking|baking"),
    ("chores", r"cleaning|laundry|tidying|doing the dishes"),
    ("studying", r"studying|homework|lecture"),
];

const ROLES: &str = "colleague|coworker|co-worker|friend|boss|manager|mom|mother|dad|father|\
sister|brother|wife|husband|partner|girlfriend|boyfriend|son|daughter|teacher|doctor|\
neighbor|neighbour|roommate|client";

pub struct RuleExtractor {
    proper_place: Regex,
    common_place: Regex,
    activities: Vec<(&'static str, Regex)>,
    with_names: Regex,
    arriving_name: Regex,
    roles: Regex,
    mood_up: Regex,
    mood_down: Regex,
    stress_up: Regex,
    stress_down: Regex,
    energy_up: Regex,
    energy_down: Regex,
}

impl RuleExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        let activities = ACTIVITIES
            .iter()
            .map(|(label, pattern)| Ok((*label, Regex::new(&format!(r"(?i)\b(?:{pattern})\b"))?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            proper_place: Regex::new(&format!(
                r"\b{PREPOSITIONS}\s+(?:the\s+)?([A-Z][\w'&-]*(?:\s+[A-Z][\w'&-]*)*)"
            ))?,
            common_place: Regex::new(&format!(
                r"(?i)\b{PREPOSITIONS}\s+(?:the\s+|my\s+|a\s+|an\s+)?({COMMON_PLACES})\b"
            ))?,
            activities,
            with_names: Regex::new(
                r"\bwith\s+([A-Z][a-z]+(?:(?:\s*,\s*|\s+and\s+)[A-Z][a-z]+)*)",
            )?,
            arriving_name: Regex::new(
                r"\b([A-Z][a-z]+)\s+(?:joined|arrived|came over|stopped by|showed up)\b",
            )?,
            roles: Regex::new(&format!(r"(?i)\b(?:my\s+)?({ROLES})\b"))?,
            mood_up: Regex::new(r"(?i)\b(?:happy|glad|great|excited|fun|love|enjoy(?:ing|ed)?|grateful|awesome|nice)\b")?,
            mood_down: Regex::new(r"(?i)\b(?:sad|upset|angry|annoyed|frustrated|lonely|awful|terrible|bad)\b")?,
            stress_up: Regex::new(r"(?i)\b(?:stressed|stressful|deadline|anxious|rushed|overwhelmed|pressure|worried|panic)\b")?,
            stress_down: Regex::new(r"(?i)\b(?:calm|relaxed|peaceful|chill|relaxing)\b")?,
            energy_up: Regex::new(r"(?i)\b(?:energized|energetic|pumped|refreshed|awake|lively)\b")?,
            energy_down: Regex::new(r"(?i)\b(?:tired|exhausted|sleepy|drained|fatigued|worn out)\b")?,
        })
    }

    /// Extract synchronously. The async trait method delegates here.
    pub fn extract_now(&self, text: &str) -> Result<Extraction, ExtractionError> {
        if text.trim().is_empty() {
            return Err(ExtractionError::Empty);
        }

        let location = self.location(text);
        let activity_type = self.activity(text);
        let participants = self.participants(text);

        let mut confidence = 0.0;
        if location.is_some() {
            confidence += LOCATION_WEIGHT;
        }
        if activity_type.is_some() {
            confidence += ACTIVITY_WEIGHT;
        }
        if !participants.is_empty() {
            confidence += PARTICIPANT_WEIGHT;
        }

        Ok(Extraction {
            location,
            activity_type,
            participants,
            confidence,
            scores: self.scores(text),
            summary: None,
            title: None,
        }
        .normalized())
    }

    /// Last place mentioned after a spatial preposition.
    fn location(&self, text: &str) -> Option<String> {
        let proper = self
            .proper_place
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .filter(|m| !NOT_PLACES.contains(&m.as_str().to_lowercase().as_str()));
        let common = self
            .common_place
            .captures_iter(text)
            .filter_map(|c| c.get(1));

        proper
            .chain(common)
            .max_by_key(|m| (m.start(), m.len()))
            .map(|m| m.as_str().to_string())
    }

    /// Last activity keyword; on a tie the longer phrase wins ("working out" over "working").
    fn activity(&self, text: &str) -> Option<String> {
        self.activities
            .iter()
            .flat_map(|(label, re)| re.find_iter(text).map(move |m| (m.start(), m.len(), *label)))
            .max_by_key(|(start, len, _)| (*start, *len))
            .map(|(_, _, label)| label.to_string())
    }

    fn participants(&self, text: &str) -> Vec<String> {
        let mut people = Vec::new();

        for caps in self.with_names.captures_iter(text) {
            if let Some(group) = caps.get(1) {
                people.extend(
                    group
                        .as_str()
                        .split(',')
                        .flat_map(|part| part.split(" and "))
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string),
                );
            }
        }
        people.extend(
            self.arriving_name
                .captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        );
        people.extend(
            self.roles
                .captures_iter(text)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_lowercase()),
        );

        people.retain(|p| !NOT_NAMES.contains(&p.to_lowercase().as_str()));
        people
    }

    fn scores(&self, text: &str) -> Scores {
        let lean = |up: &Regex, down: &Regex| -> Option<u8> {
            let ups = up.find_iter(text).count() as i64;
            let downs = down.find_iter(text).count() as i64;
            if ups == 0 && downs == 0 {
                return None;
            }
            let value = (5 + 2 * ups - 2 * downs).clamp(0, SCORE_MAX as i64);
            Some(value as u8)
        };

        Scores {
            mood_score: lean(&self.mood_up, &self.mood_down),
            stress_level: lean(&self.stress_up, &self.stress_down),
            energy_level: lean(&self.energy_up, &self.energy_down),
        }
    }
}

#[async_trait]
impl SemanticExtractor for RuleExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction, ExtractionError> {
        self.extract_now(text)
    }

    fn provider_name(&self) -> &str {
        "rules"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> RuleExtractor {
        RuleExtractor::new().unwrap()
    }

    #[test]
    fn reads_place_and_activity() {
        let x = extractor().extract_now("at CoffeeShop, start working").unwrap();
        assert_eq!(x.location.as_deref(), Some("coffeeshop"));
        assert_eq!(x.activity_type.as_deref(), Some("work"));
        assert!(x.participants.is_empty());
        assert!((x.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn role_noun_counts_as_participant() {
        let x = extractor()
            .extract_now("still at CoffeeShop, colleague joined")
            .unwrap();
        assert_eq!(x.location.as_deref(), Some("coffeeshop"));
        assert_eq!(x.activity_type, None);
        assert_eq!(x.participants, vec!["colleague".to_string()]);
        assert!((x.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn last_mentioned_place_wins() {
        let x = extractor()
            .extract_now("left, now walking to Supermarket")
            .unwrap();
        assert_eq!(x.location.as_deref(), Some("supermarket"));
        assert_eq!(x.activity_type.as_deref(), Some("walking"));

        let x = extractor()
            .extract_now("drove to the office, then went to the gym")
            .unwrap();
        assert_eq!(x.location.as_deref(), Some("gym"));
    }

    #[test]
    fn longer_activity_phrase_wins_tie() {
        let x = extractor().extract_now("working out at the gym").unwrap();
        assert_eq!(x.activity_type.as_deref(), Some("exercise"));
    }

    #[test]
    fn names_after_with_are_split() {
        let x = extractor()
            .extract_now("having lunch with Sam, Priya and Jo")
            .unwrap();
        assert_eq!(
            x.participants,
            vec!["jo".to_string(), "priya".to_string(), "sam".to_string()]
        );
        assert_eq!(x.activity_type.as_deref(), Some("eating"));
    }

    #[test]
    fn weekdays_are_not_places() {
        let x = extractor().extract_now("back to Monday routine").unwrap();
        assert_eq!(x.location, None);
    }

    #[test]
    fn mood_lexicon_shifts_scores() {
        let x = extractor()
            .extract_now("so tired and stressed about the deadline")
            .unwrap();
        assert_eq!(x.scores.energy_level, Some(3));
        assert_eq!(x.scores.stress_level, Some(9));
        assert_eq!(x.scores.mood_score, None);
    }

    #[test]
    fn nothing_recognized_means_zero_confidence() {
        let x = extractor().extract_now("hmm, okay").unwrap();
        assert_eq!(x.confidence, 0.0);
        assert_eq!(x.location, None);
    }

    #[test]
    fn empty_text_is_an_error() {
        assert!(matches!(
            extractor().extract_now("   "),
            Err(ExtractionError::Empty)
        ));
    }

    #[test]
    fn same_text_same_output() {
        let e = extractor();
        let text = "in the kitchen cooking with Alex, feeling great";
        assert_eq!(e.extract_now(text).unwrap(), e.extract_now(text).unwrap());
    }
}
