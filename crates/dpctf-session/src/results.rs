//! Delivery of observation results.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{debug, info};

use dpctf_core::{DpctfError, ObservationConfig, ObservationResult, Result};

/// Prefix marking subtests written by the observation framework.
pub const OF_RESULT_PREFIX: &str = "[OF]";

/// Receives the results of each finalized test.
pub trait ResultSink {
    fn post_result(
        &mut self,
        session_token: &str,
        test_path: &str,
        results: &[ObservationResult],
    ) -> Result<()>;
}

/// Writes results under `<result_dir>/<session_token>/`.
///
/// Normally the subtests of the matching test in `results.json` are
/// replaced. In debug mode each test gets its own `_debug.json` file.
pub struct FileResultSink {
    result_dir: PathBuf,
    debug: bool,
    observation_config: Value,
}

impl FileResultSink {
    pub fn new(result_dir: impl Into<PathBuf>, config: &ObservationConfig) -> Result<Self> {
        Ok(Self {
            result_dir: result_dir.into(),
            debug: config.general.debug,
            observation_config: serde_json::to_value(config)?,
        })
    }

    pub fn session_dir(&self, session_token: &str) -> PathBuf {
        self.result_dir.join(session_token)
    }

    /// `<dir>/<test path with / replaced by ->_debug.json`, `.html` dropped.
    pub fn debug_file_name(test_path: &str) -> String {
        format!("{}_debug.json", test_path.replace('/', "-").replace(".html", ""))
    }

    fn meta(&self) -> Value {
        let observed = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        json!({
            "datetime_observation": observed,
            "observation_config": self.observation_config,
        })
    }

    fn write_debug(&self, path: &Path, results: &[ObservationResult]) -> Result<()> {
        let data = json!({ "meta": self.meta(), "results": results });
        fs::write(path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }

    fn merge_into(
        &self,
        path: &Path,
        test_path: &str,
        results: &[ObservationResult],
    ) -> Result<()> {
        let mut data = if path.exists() {
            let text = fs::read_to_string(path)?;
            serde_json::from_str(&text).map_err(|e| {
                DpctfError::Result(format!("Unable to decode JSON from {}: {e}", path.display()))
            })?
        } else {
            json!({ "results": [] })
        };
        let document = data.as_object_mut().ok_or_else(|| {
            DpctfError::Result(format!("Result file {} is not an object", path.display()))
        })?;
        document.insert("meta".to_string(), self.meta());

        let tests = document
            .entry("results")
            .or_insert_with(|| json!([]))
            .as_array_mut()
            .ok_or_else(|| {
                DpctfError::Result(format!("'results' in {} is not a list", path.display()))
            })?;
        let test_name = format!("/{test_path}");
        let position = tests
            .iter()
            .position(|t| t.get("test").and_then(Value::as_str) == Some(test_name.as_str()));
        let entry = match position {
            Some(i) => &mut tests[i],
            None => {
                debug!(test = %test_name, "Adding test to result file");
                tests.push(json!({ "test": test_name, "subtests": [] }));
                let last = tests.len() - 1;
                &mut tests[last]
            }
        };
        let subtests = update_subtests(entry.get("subtests"), results)?;
        if let Some(entry) = entry.as_object_mut() {
            entry.insert("subtests".to_string(), subtests);
        }

        fs::write(path, serde_json::to_string_pretty(&data)?)?;
        Ok(())
    }
}

/// Previous subtests without framework results, followed by `results`.
fn update_subtests(previous: Option<&Value>, results: &[ObservationResult]) -> Result<Value> {
    let mut subtests: Vec<Value> = previous
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|s| {
            !s.get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| name.contains(OF_RESULT_PREFIX))
        })
        .cloned()
        .collect();
    for result in results {
        subtests.push(serde_json::to_value(result)?);
    }
    Ok(Value::Array(subtests))
}

impl ResultSink for FileResultSink {
    fn post_result(
        &mut self,
        session_token: &str,
        test_path: &str,
        results: &[ObservationResult],
    ) -> Result<()> {
        if session_token.is_empty() || test_path.is_empty() || results.is_empty() {
            return Ok(());
        }
        let dir = self.session_dir(session_token);
        fs::create_dir_all(&dir).map_err(|e| {
            DpctfError::Result(format!(
                "Unable to create a results directory {}: {e}",
                dir.display()
            ))
        })?;

        let path = if self.debug {
            let path = dir.join(Self::debug_file_name(test_path));
            self.write_debug(&path, results)?;
            path
        } else {
            let path = dir.join("results.json");
            self.merge_into(&path, test_path, results)?;
            path
        };
        info!(
            test = test_path,
            results = results.len(),
            path = %path.display(),
            "Observation results saved"
        );
        Ok(())
    }
}

/// Results posted for one test.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedResults {
    pub session_token: String,
    pub test_path: String,
    pub results: Vec<ObservationResult>,
}

/// Keeps posted results in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultSink {
    pub posted: Vec<PostedResults>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results posted for `test_path`, latest first.
    pub fn results_for(&self, test_path: &str) -> Option<&[ObservationResult]> {
        self.posted
            .iter()
            .rev()
            .find(|p| p.test_path == test_path)
            .map(|p| p.results.as_slice())
    }
}

impl ResultSink for MemoryResultSink {
    fn post_result(
        &mut self,
        session_token: &str,
        test_path: &str,
        results: &[ObservationResult],
    ) -> Result<()> {
        self.posted.push(PostedResults {
            session_token: session_token.to_string(),
            test_path: test_path.to_string(),
            results: results.to_vec(),
        });
        Ok(())
    }
}
