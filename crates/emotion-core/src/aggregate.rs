//! Deterministic verdict scoring.
//!
//! Every per-snapshot label maps to a fixed weight. The verdict for a
//! (user, post) pair is the band containing the mean weight over *all*
//! labels of that pair. Labels the table does not know (including the
//! `unknown` sentinel and unset labels) weigh `0` but still count toward
//! the denominator.
//!
//! | mean score `s`      | verdict  |
//! |---------------------|----------|
//! | `s >= 1.5`          | happy    |
//! | `1.0 <= s < 1.5`    | surprise |
//! | `0 < s < 1.0`       | neutral  |
//! | `-1.0 <= s <= 0`    | sad      |
//! | `-1.5 <= s < -1.0`  | fear     |
//! | `s < -1.5`          | angry    |
//!
//! `disgust` is a valid input label but no band produces it.
//!
//! A set with no labels, or in which no label is a recognized emotion
//! (every classification failed), carries no signal and yields `neutral`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Label stored on a snapshot whose classification failed.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Emotion labels produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Surprise,
    Neutral,
    Sad,
    Fear,
    Disgust,
    Angry,
}

impl Emotion {
    /// All labels, in descending weight order.
    pub const ALL: [Emotion; 7] = [
        Emotion::Happy,
        Emotion::Surprise,
        Emotion::Neutral,
        Emotion::Sad,
        Emotion::Fear,
        Emotion::Disgust,
        Emotion::Angry,
    ];

    /// Scoring weight of this label.
    pub fn weight(&self) -> f64 {
        match self {
            Emotion::Happy => 2.0,
            Emotion::Surprise => 1.5,
            Emotion::Neutral => 0.5,
            Emotion::Sad => -1.0,
            Emotion::Fear => -1.5,
            Emotion::Disgust => -2.0,
            Emotion::Angry => -2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
            Emotion::Sad => "sad",
            Emotion::Fear => "fear",
            Emotion::Disgust => "disgust",
            Emotion::Angry => "angry",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unrecognized emotion label: {}", s)))
    }
}

/// Weight of a raw stored label. Unset and unrecognized labels weigh `0`.
pub fn label_weight(label: Option<&str>) -> f64 {
    label
        .and_then(|l| l.parse::<Emotion>().ok())
        .map(|e| e.weight())
        .unwrap_or(0.0)
}

/// Mean weight over all labels, or `None` when there are no labels.
pub fn average_score<'a, I>(labels: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let (total, count) = labels
        .into_iter()
        .fold((0.0_f64, 0_usize), |(total, count), label| {
            (total + label_weight(label), count + 1)
        });

    if count == 0 {
        None
    } else {
        Some(total / count as f64)
    }
}

/// Map a mean score onto its verdict band. Bands are checked top-down.
pub fn verdict_for_score(score: f64) -> Emotion {
    if score >= 1.5 {
        Emotion::Happy
    } else if score >= 1.0 {
        Emotion::Surprise
    } else if score > 0.0 {
        Emotion::Neutral
    } else if score >= -1.0 {
        Emotion::Sad
    } else if score >= -1.5 {
        Emotion::Fear
    } else {
        Emotion::Angry
    }
}

/// Aggregate a multiset of labels into one verdict.
///
/// An empty set, or one without a single recognized label, yields `neutral`.
pub fn aggregate_labels<'a, I>(labels: I) -> Emotion
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let labels: Vec<Option<&'a str>> = labels.into_iter().collect();
    let recognized = labels
        .iter()
        .any(|l| l.map(|l| l.parse::<Emotion>().is_ok()).unwrap_or(false));
    if !recognized {
        return Emotion::Neutral;
    }

    match average_score(labels) {
        Some(score) => verdict_for_score(score),
        None => Emotion::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels<'a>(raw: &[&'a str]) -> Vec<Option<&'a str>> {
        raw.iter().map(|l| Some(*l)).collect()
    }

    #[test]
    fn test_weights_table() {
        assert_eq!(Emotion::Happy.weight(), 2.0);
        assert_eq!(Emotion::Surprise.weight(), 1.5);
        assert_eq!(Emotion::Neutral.weight(), 0.5);
        assert_eq!(Emotion::Sad.weight(), -1.0);
        assert_eq!(Emotion::Fear.weight(), -1.5);
        assert_eq!(Emotion::Disgust.weight(), -2.0);
        assert_eq!(Emotion::Angry.weight(), -2.0);
    }

    #[test]
    fn test_label_weight_unknown_and_unset() {
        assert_eq!(label_weight(Some(UNKNOWN_LABEL)), 0.0);
        assert_eq!(label_weight(Some("contempt")), 0.0);
        assert_eq!(label_weight(Some("Happy")), 0.0);
        assert_eq!(label_weight(None), 0.0);
        assert_eq!(label_weight(Some("happy")), 2.0);
    }

    #[test]
    fn test_parse_roundtrip_all_labels() {
        for emotion in Emotion::ALL {
            assert_eq!(emotion.as_str().parse::<Emotion>().unwrap(), emotion);
            assert_eq!(emotion.to_string(), emotion.as_str());
        }
        assert!("unknown".parse::<Emotion>().is_err());
    }

    #[test]
    fn test_happy_happy_sad_is_surprise() {
        let set = labels(&["happy", "happy", "sad"]);
        assert_eq!(average_score(set.clone()), Some(1.0));
        assert_eq!(aggregate_labels(set), Emotion::Surprise);
    }

    #[test]
    fn test_angry_angry_is_angry() {
        let set = labels(&["angry", "angry"]);
        assert_eq!(average_score(set.clone()), Some(-2.0));
        assert_eq!(aggregate_labels(set), Emotion::Angry);
    }

    #[test]
    fn test_empty_is_neutral() {
        assert_eq!(average_score(Vec::<Option<&str>>::new()), None);
        assert_eq!(aggregate_labels(Vec::<Option<&str>>::new()), Emotion::Neutral);
    }

    #[test]
    fn test_all_unknown_is_neutral() {
        let set = labels(&["unknown", "unknown"]);
        assert_eq!(average_score(set.clone()), Some(0.0));
        assert_eq!(aggregate_labels(set), Emotion::Neutral);
    }

    #[test]
    fn test_recognized_labels_averaging_zero_land_in_sad_band() {
        // 2 - 1 - 1 = 0, which sits in the `-1.0 <= s <= 0` band.
        let set = labels(&["happy", "sad", "sad"]);
        assert_eq!(average_score(set.clone()), Some(0.0));
        assert_eq!(aggregate_labels(set), Emotion::Sad);
    }

    #[test]
    fn test_unknown_counts_toward_denominator() {
        // (2 + 0) / 2 = 1.0
        let set = labels(&["happy", "unknown"]);
        assert_eq!(average_score(set.clone()), Some(1.0));
        assert_eq!(aggregate_labels(set), Emotion::Surprise);
    }

    #[test]
    fn test_unset_labels_count_toward_denominator() {
        let set = vec![Some("happy"), None, None, None];
        assert_eq!(average_score(set), Some(0.5));
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(verdict_for_score(2.0), Emotion::Happy);
        assert_eq!(verdict_for_score(1.5), Emotion::Happy);
        assert_eq!(verdict_for_score(1.49), Emotion::Surprise);
        assert_eq!(verdict_for_score(1.0), Emotion::Surprise);
        assert_eq!(verdict_for_score(0.99), Emotion::Neutral);
        assert_eq!(verdict_for_score(0.01), Emotion::Neutral);
        assert_eq!(verdict_for_score(0.0), Emotion::Sad);
        assert_eq!(verdict_for_score(-1.0), Emotion::Sad);
        assert_eq!(verdict_for_score(-1.01), Emotion::Fear);
        assert_eq!(verdict_for_score(-1.5), Emotion::Fear);
        assert_eq!(verdict_for_score(-1.51), Emotion::Angry);
        assert_eq!(verdict_for_score(-2.0), Emotion::Angry);
    }

    #[test]
    fn test_disgust_never_produced() {
        assert_eq!(aggregate_labels(labels(&["disgust"])), Emotion::Angry);
        for tenths in -25..=25 {
            let score = tenths as f64 / 10.0;
            assert_ne!(verdict_for_score(score), Emotion::Disgust);
        }
    }

    #[test]
    fn test_order_independent() {
        let a = aggregate_labels(labels(&["fear", "happy", "neutral", "sad"]));
        let b = aggregate_labels(labels(&["sad", "neutral", "happy", "fear"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_emotion_serde_lowercase() {
        let json = serde_json::to_string(&Emotion::Surprise).unwrap();
        assert_eq!(json, "\"surprise\"");
        let parsed: Emotion = serde_json::from_str("\"angry\"").unwrap();
        assert_eq!(parsed, Emotion::Angry);
    }
}
