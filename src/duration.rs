//! Course workload estimation.
//!
//! The estimate weighs lesson minutes by a practice factor keyed on the
//! course level, and adds per-exercise time scaled by the exercise's
//! Bloom level.

use crate::content::{Course, Exercise, Lesson};

/// Estimate the total workload of a course as a display string:
/// `"Approx. N hours"` above one hour, `"N min"` otherwise. Falls back
/// to the course's own `duration` field (or `"N/A"`) when there is
/// nothing to estimate from.
pub fn estimate(course: &Course, lessons: &[Lesson], exercises: &[Exercise]) -> String {
    let level = course
        .level
        .as_deref()
        .unwrap_or("basic")
        .to_ascii_lowercase();
    let (practice_factor, minutes_per_exercise) = match level.as_str() {
        "basic" => (2.5, 15.0),
        "intermediate" => (2.8, 20.0),
        "advanced" => (3.0, 25.0),
        // specialization tracks and anything unrecognized
        _ => (3.5, 30.0),
    };

    let lesson_minutes: f64 = lessons
        .iter()
        .filter_map(|lesson| lesson.estimated_time_minutes)
        .sum();

    let exercise_minutes: f64 = exercises
        .iter()
        .map(|exercise| {
            let bloom = exercise.bloom_level.as_deref().unwrap_or("apply");
            minutes_per_exercise * bloom_multiplier(bloom)
        })
        .sum();

    let total_minutes = lesson_minutes * practice_factor + exercise_minutes;
    if total_minutes <= 0.0 {
        return course.duration.clone().unwrap_or_else(|| "N/A".to_string());
    }

    let hours = (total_minutes / 60.0).round() as i64;
    if hours > 1 {
        format!("Approx. {} hours", hours)
    } else {
        format!("{} min", total_minutes as i64)
    }
}

fn bloom_multiplier(level: &str) -> f64 {
    match level {
        "remember" => 0.5,
        "understand" => 0.7,
        "apply" => 1.0,
        "analyze" => 1.5,
        "evaluate" => 2.0,
        "create" => 4.0,
        _ => 1.0,
    }
}
