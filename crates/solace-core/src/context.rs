//! Per-user context block injected into the dialogue system prompt.
//!
//! The block gives the model a sense of the time of day, the user's most
//! recent questionnaire results and the recent mood-scale entries.
//! Inputs are expected newest first.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Maximum questionnaire results rendered.
pub const MAX_TEST_RESULTS: usize = 3;

/// Maximum mood-scale entries rendered.
pub const MAX_MOOD_SCORES: usize = 5;

const MBTI_DESCRIPTION_LIMIT: usize = 200;
const VERDICT_LIMIT: usize = 250;

/// Coarse part of the day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self::from_hour(now.hour())
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "🌅",
            TimeOfDay::Afternoon => "☀️",
            TimeOfDay::Evening => "🌆",
            TimeOfDay::Night => "🌙",
        }
    }
}

/// Outcome of a completed psychometric questionnaire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestOutcome {
    /// Four-letter personality type.
    Mbti {
        code: String,
        #[serde(default)]
        description: Option<String>,
    },

    /// Averages on a 1-5 scale.
    EmotionalState {
        stress: f64,
        anxiety: f64,
        burnout: f64,
    },

    /// Free-text verdict produced by the questionnaire.
    Verdict { text: String },

    /// Finished without a stored interpretation.
    Completed,
}

/// A stored questionnaire result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub title: String,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: TestOutcome,
}

/// One mood-scale entry (0-10).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoodScore {
    pub score: u8,
    pub recorded_at: DateTime<Utc>,
}

/// The greeting line used when nothing else is known about the user.
pub fn time_of_day_line(now: DateTime<Utc>) -> String {
    let tod = TimeOfDay::at(now);
    format!("{} It is {} now (UTC).", tod.emoji(), tod.label())
}

/// Render the full context block.
pub fn render_user_context(
    now: DateTime<Utc>,
    tests: &[TestResult],
    scores: &[MoodScore],
) -> String {
    let mut parts = vec![time_of_day_line(now)];

    if !tests.is_empty() {
        parts.push(
            "\n📊 Recent questionnaire results (psychological tests the user completed earlier):"
                .to_string(),
        );
        parts.extend(tests.iter().take(MAX_TEST_RESULTS).map(format_test_result));
        parts.push(
            "Use these results to understand the user's current state and psychological traits."
                .to_string(),
        );
    }

    let recent: Vec<&MoodScore> = scores.iter().take(MAX_MOOD_SCORES).collect();
    if !recent.is_empty() {
        parts.push("\n📈 Recent mood-scale entries (emotion diary):".to_string());
        parts.push(
            recent
                .iter()
                .map(|s| format!("{}: {}/10", s.recorded_at.format("%d.%m.%Y"), s.score))
                .collect::<Vec<_>>()
                .join(", "),
        );

        if recent.len() >= 2 {
            let values: Vec<u8> = recent.iter().map(|s| s.score).collect();
            parts.push(format!("({})", describe_trend(&values)));
        }
    }

    parts.join("\n")
}

fn format_test_result(test: &TestResult) -> String {
    let prefix = test
        .finished_at
        .map(|at| format!("[{}] ", at.format("%d.%m.%Y")))
        .unwrap_or_default();

    match &test.outcome {
        TestOutcome::Mbti { code, description } => match description.as_deref() {
            Some(desc) if !desc.trim().is_empty() => format!(
                "- {}{}: personality type {}. {}",
                prefix,
                test.title,
                code,
                truncate(desc, MBTI_DESCRIPTION_LIMIT)
            ),
            _ => format!("- {}{}: personality type {}", prefix, test.title, code),
        },
        TestOutcome::EmotionalState {
            stress,
            anxiety,
            burnout,
        } => {
            let notes = interpret_emotional_state(*stress, *anxiety, *burnout);
            let suffix = if notes.is_empty() {
                String::new()
            } else {
                format!(" ({})", notes.join(", "))
            };
            format!(
                "- {}{}: stress {:.1}/5, anxiety {:.1}/5, burnout {:.1}/5{}",
                prefix, test.title, stress, anxiety, burnout, suffix
            )
        }
        TestOutcome::Verdict { text } if !text.trim().is_empty() => {
            format!("- {}{}: {}", prefix, test.title, truncate(text, VERDICT_LIMIT))
        }
        TestOutcome::Verdict { .. } | TestOutcome::Completed => {
            format!("- {}{}: completed", prefix, test.title)
        }
    }
}

fn interpret_emotional_state(stress: f64, anxiety: f64, burnout: f64) -> Vec<&'static str> {
    let mut notes = Vec::new();
    if stress >= 4.0 {
        notes.push("high stress");
    } else if stress >= 3.0 {
        notes.push("moderate stress");
    }
    if anxiety >= 4.0 {
        notes.push("high anxiety");
    } else if anxiety >= 3.0 {
        notes.push("moderate anxiety");
    }
    if burnout >= 4.0 {
        notes.push("high burnout risk");
    } else if burnout >= 3.0 {
        notes.push("signs of burnout");
    }
    notes
}

/// Trend text for newest-first scores. Requires at least one value.
fn describe_trend(values: &[u8]) -> String {
    let latest = values[0];
    let previous = values.get(1).copied().unwrap_or(latest);
    let average = values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64;

    let mut notes = vec![match latest.cmp(&previous) {
        std::cmp::Ordering::Greater => "improving",
        std::cmp::Ordering::Less => "declining",
        std::cmp::Ordering::Equal => "stable",
    }];
    if average >= 7.0 {
        notes.push("generally doing well");
    } else if average <= 4.0 {
        notes.push("needs support");
    }

    format!("{}, recent average: {:.1}/10", notes.join(", "), average)
}

/// Cut to `limit` characters, appending an ellipsis when shortened.
pub(crate) fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
