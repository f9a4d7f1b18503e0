//! File-backed course content store.
//!
//! Courses live in `courses.json` under the data directory; each course
//! points at its own lesson and exercise files relative to that
//! directory. The store is read-only and forgiving: a missing or
//! malformed content file degrades to an empty collection instead of
//! taking down the service.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{DeserializeOwned, Deserializer, Error};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Content IDs may appear as JSON strings or numbers; normalize to
/// strings so lookups compare consistently.
fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "id must be a string or number, got {}",
            other
        ))),
    }
}

fn opt_id_from_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "id must be a string or number, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub lessons_file: Option<String>,
    #[serde(default)]
    pub exercises_file: Option<String>,
}

/// Lesson record. Presentation fields the serving layer passes through
/// untouched are kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub estimated_time_minutes: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Exercise record. `test_code` is the trusted assertion fragment run
/// against the learner's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_id_from_any")]
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub test_code: Option<String>,
    #[serde(default)]
    pub bloom_level: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug)]
pub struct ContentStore {
    data_dir: PathBuf,
    courses: Vec<Course>,
}

impl ContentStore {
    /// Load the course index from `<data_dir>/courses.json`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let courses: Vec<Course> = load_array(&data_dir.join("courses.json"));
        info!(
            count = courses.len(),
            data_dir = %data_dir.display(),
            "content store opened"
        );
        Self { data_dir, courses }
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    pub fn course(&self, course_id: &str) -> Option<&Course> {
        self.courses.iter().find(|course| course.id == course_id)
    }

    pub fn lessons(&self, course: &Course) -> Vec<Lesson> {
        self.load_course_file(course, course.lessons_file.as_deref(), "lessons")
    }

    pub fn exercises(&self, course: &Course) -> Vec<Exercise> {
        self.load_course_file(course, course.exercises_file.as_deref(), "exercises")
    }

    /// Resolve one exercise inside a course.
    pub fn exercise(&self, course_id: &str, exercise_id: &str) -> Option<Exercise> {
        let course = self.course(course_id)?;
        self.exercises(course)
            .into_iter()
            .find(|exercise| exercise.id == exercise_id)
    }

    fn load_course_file<T: DeserializeOwned>(
        &self,
        course: &Course,
        relative: Option<&str>,
        what: &str,
    ) -> Vec<T> {
        let Some(relative) = relative.filter(|rel| !rel.is_empty()) else {
            warn!(course_id = %course.id, what, "no content file configured");
            return Vec::new();
        };
        load_array(&self.data_dir.join(relative))
    }
}

fn load_array<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    if !path.is_file() {
        warn!(path = %path.display(), "content file not found, serving empty list");
        return Vec::new();
    }
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(path = %path.display(), %e, "content file unreadable, serving empty list");
            return Vec::new();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(items) => items,
        Err(e) => {
            error!(path = %path.display(), %e, "malformed content file, serving empty list");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_with(courses: &str, files: &[(&str, &str)]) -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("courses.json"), courses).unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let store = ContentStore::open(dir.path());
        (dir, store)
    }

    #[test]
    fn resolves_courses_by_id() {
        let (_dir, store) = store_with(
            r#"[{"id": "python-basics", "name": "Python Basics"}]"#,
            &[],
        );
        assert_eq!(store.courses().len(), 1);
        assert!(store.course("python-basics").is_some());
        assert!(store.course("nope").is_none());
    }

    #[test]
    fn numeric_ids_match_string_lookups() {
        let (_dir, store) = store_with(
            r#"[{"id": "c1", "name": "C1", "exercises_file": "c1/exercises.json"}]"#,
            &[(
                "c1/exercises.json",
                r#"[{"id": 2, "lesson_id": 1, "title": "Two"}]"#,
            )],
        );
        let exercise = store.exercise("c1", "2").expect("exercise 2");
        assert_eq!(exercise.title.as_deref(), Some("Two"));
        assert_eq!(exercise.lesson_id.as_deref(), Some("1"));
    }

    #[test]
    fn missing_files_degrade_to_empty() {
        let (_dir, store) = store_with(
            r#"[{"id": "c1", "name": "C1", "lessons_file": "c1/lessons.json"}]"#,
            &[],
        );
        let course = store.course("c1").unwrap().clone();
        assert!(store.lessons(&course).is_empty());
        assert!(store.exercises(&course).is_empty());
    }

    #[test]
    fn malformed_json_degrades_to_empty() {
        let (_dir, store) = store_with(
            r#"[{"id": "c1", "name": "C1", "lessons_file": "c1/lessons.json"}]"#,
            &[("c1/lessons.json", "{not a list")],
        );
        let course = store.course("c1").unwrap().clone();
        assert!(store.lessons(&course).is_empty());
    }

    #[test]
    fn missing_course_index_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path());
        assert!(store.courses().is_empty());
    }

    #[test]
    fn exercise_keeps_test_code_and_extras() {
        let (_dir, store) = store_with(
            r#"[{"id": "c1", "name": "C1", "exercises_file": "c1/exercises.json"}]"#,
            &[(
                "c1/exercises.json",
                r#"[{"id": "e1", "test_code": "assert 'hi' in output", "starter_code": "print()"}]"#,
            )],
        );
        let exercise = store.exercise("c1", "e1").unwrap();
        assert_eq!(exercise.test_code.as_deref(), Some("assert 'hi' in output"));
        assert!(exercise.extra.contains_key("starter_code"));
    }
}
