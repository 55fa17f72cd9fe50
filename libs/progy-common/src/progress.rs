/// Progress aggregate and its state machine
///
/// **Invariants:**
/// - `attempts` is 0 immediately after any pass
/// - XP for an exercise (or quiz) is awarded at most once
/// - `longest_streak >= current_streak`
/// - `current_streak` moves at most once per calendar day (UTC)
///
/// All mutation goes through the methods below; callers read the whole
/// aggregate, mutate it in memory and write it back.
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const EXERCISE_XP: u32 = 20;
pub const QUIZ_XP: u32 = 10;
/// Consecutive failures that trigger a tutor escalation
pub const TUTOR_ESCALATION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressStats {
    pub total_xp: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active_date: Option<NaiveDate>,
    pub total_exercises: u32,
}

impl ProgressStats {
    /// Daily streak rule: no-op when already active today, +1 when the last
    /// activity was yesterday, otherwise restart at 1.
    pub fn update_streak(&mut self, today: NaiveDate) {
        if self.last_active_date == Some(today) {
            return;
        }

        let yesterday = today - Duration::days(1);
        if self.last_active_date == Some(yesterday) {
            self.current_streak += 1;
        } else {
            self.current_streak = 1;
        }

        self.longest_streak = self.longest_streak.max(self.current_streak);
        self.last_active_date = Some(today);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseProgress {
    pub status: ExerciseStatus,
    pub xp_earned: u32,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResult {
    pub passed: bool,
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub total_questions: Option<u32>,
    pub xp_earned: u32,
    pub completed_at: DateTime<Utc>,
}

/// Per-student, per-course progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    #[serde(default)]
    pub stats: ProgressStats,
    #[serde(default)]
    pub exercises: BTreeMap<String, ExerciseProgress>,
    #[serde(default)]
    pub quizzes: BTreeMap<String, QuizResult>,
    #[serde(default)]
    pub achievements: Vec<String>,
    /// Fields written by other services (e.g. tutor suggestions), carried
    /// through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Result of applying one run outcome to an exercise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExerciseTransition {
    pub status: ExerciseStatus,
    pub attempts: u32,
    pub xp_awarded: u32,
}

impl ExerciseTransition {
    /// True exactly on the failure that brings attempts to the threshold
    pub fn should_escalate(&self) -> bool {
        self.status == ExerciseStatus::Fail && self.attempts == TUTOR_ESCALATION_ATTEMPTS
    }
}

impl Progress {
    pub fn exercise(&self, id: &str) -> Option<&ExerciseProgress> {
        self.exercises.get(id)
    }

    pub fn is_passed(&self, id: &str) -> bool {
        self.exercises
            .get(id)
            .map(|e| e.status == ExerciseStatus::Pass)
            .unwrap_or(false)
            || self.quizzes.get(id).map(|q| q.passed).unwrap_or(false)
    }

    /// Apply a successful run
    pub fn record_success(&mut self, exercise_id: &str, now: DateTime<Utc>) -> ExerciseTransition {
        let entry = self
            .exercises
            .entry(exercise_id.to_string())
            .or_insert_with(|| ExerciseProgress {
                status: ExerciseStatus::Fail,
                xp_earned: 0,
                completed_at: now,
                attempts: 0,
            });

        let first_award = entry.xp_earned == 0;
        entry.status = ExerciseStatus::Pass;
        entry.attempts = 0;
        entry.completed_at = now;

        let xp_awarded = if first_award {
            entry.xp_earned = EXERCISE_XP;
            self.stats.total_xp += EXERCISE_XP;
            self.stats.update_streak(now.date_naive());
            EXERCISE_XP
        } else {
            0
        };

        ExerciseTransition {
            status: ExerciseStatus::Pass,
            attempts: 0,
            xp_awarded,
        }
    }

    /// Apply a failed run. XP and streak are left alone.
    pub fn record_failure(&mut self, exercise_id: &str, now: DateTime<Utc>) -> ExerciseTransition {
        let entry = self
            .exercises
            .entry(exercise_id.to_string())
            .or_insert_with(|| ExerciseProgress {
                status: ExerciseStatus::Fail,
                xp_earned: 0,
                completed_at: now,
                attempts: 0,
            });

        entry.status = ExerciseStatus::Fail;
        entry.attempts += 1;
        entry.completed_at = now;

        ExerciseTransition {
            status: ExerciseStatus::Fail,
            attempts: entry.attempts,
            xp_awarded: 0,
        }
    }

    /// Record a quiz attempt. Returns the XP awarded (10 on the first pass,
    /// otherwise 0).
    pub fn record_quiz(
        &mut self,
        quiz_id: &str,
        passed: bool,
        score: Option<u32>,
        total_questions: Option<u32>,
        now: DateTime<Utc>,
    ) -> u32 {
        let previous_xp = self.quizzes.get(quiz_id).map(|q| q.xp_earned).unwrap_or(0);
        let award = passed && previous_xp == 0;

        let xp_earned = if award { QUIZ_XP } else { previous_xp };
        let already_passed = self.quizzes.get(quiz_id).map(|q| q.passed).unwrap_or(false);

        self.quizzes.insert(
            quiz_id.to_string(),
            QuizResult {
                passed: passed || already_passed,
                score,
                total_questions,
                xp_earned,
                completed_at: now,
            },
        );

        if award {
            self.stats.total_xp += QUIZ_XP;
            self.stats.update_streak(now.date_naive());
            QUIZ_XP
        } else {
            0
        }
    }

    /// Returns true when the stored count changed
    pub fn set_total_exercises(&mut self, total: u32) -> bool {
        if self.stats.total_exercises == total {
            return false;
        }
        self.stats.total_exercises = total;
        true
    }
}
