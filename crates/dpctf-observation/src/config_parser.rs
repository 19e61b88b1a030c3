use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use dpctf_core::{DpctfError, ParametersDict, Result};

use crate::test_kind::ParameterSpec;

/// Default PN watermark used when an audio representation names none.
const DEFAULT_AUDIO_CONTENT_ID: &str = "PN01";

fn iso8601_duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^P(?:(\d+(?:\.\d+)?)D)?(?:T(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
        )
        .expect("Invalid ISO-8601 duration regex")
    })
}

/// Parse an ISO-8601 duration such as `PT1M30.5S` into milliseconds.
pub fn parse_iso8601_duration(text: &str) -> Result<f64> {
    let invalid = || DpctfError::Config(format!("Invalid ISO-8601 duration '{text}'"));
    let caps = iso8601_duration_regex()
        .captures(text.trim())
        .ok_or_else(invalid)?;

    let mut seconds = 0.0;
    let mut matched = false;
    for (group, scale) in [(1, 86_400.0), (2, 3_600.0), (3, 60.0), (4, 1.0)] {
        if let Some(m) = caps.get(group) {
            let value: f64 = m.as_str().parse().map_err(|_| invalid())?;
            seconds += value * scale;
            matched = true;
        }
    }
    if !matched {
        return Err(invalid());
    }
    Ok((seconds * 1_000_000.0).round() / 1000.0)
}

/// Media types a test plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentTypes {
    pub video: bool,
    pub audio: bool,
}

impl Default for ContentTypes {
    fn default() -> Self {
        Self {
            video: true,
            audio: false,
        }
    }
}

/// One test as described by `tests.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct TestDescriptor {
    pub test_id: String,
    pub path: String,
    pub code: String,
    /// Content configuration of the test.
    pub config: Value,
}

impl TestDescriptor {
    fn representations(&self) -> impl Iterator<Item = &Value> {
        self.config
            .get("representations")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|map| map.values())
    }

    fn representations_of(&self, media_type: &'static str) -> impl Iterator<Item = &Value> {
        self.representations()
            .filter(move |r| r.get("type").and_then(Value::as_str) == Some(media_type))
    }

    /// Media types present in the representations; video only when none are listed.
    pub fn content_types(&self) -> ContentTypes {
        if self.representations().next().is_none() {
            return ContentTypes::default();
        }
        ContentTypes {
            video: self.representations_of("video").next().is_some(),
            audio: self.representations_of("audio").next().is_some(),
        }
    }

    /// PN watermark id of the first audio representation.
    pub fn audio_content_id(&self) -> Option<String> {
        self.representations_of("audio").next().map(|r| {
            r.get("mezzanine")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_AUDIO_CONTENT_ID)
                .to_string()
        })
    }

    fn missing(&self, parameter: &str) -> DpctfError {
        DpctfError::Config(format!(
            "Failed to get a parameter:'{parameter}' for the test '{}'",
            self.path
        ))
    }

    fn fragment_duration_ms(&self, representation: &Value) -> Result<f64> {
        representation
            .get("fragment_duration")
            .and_then(Value::as_f64)
            .map(|s| s * 1000.0)
            .ok_or_else(|| self.missing("fragment_duration"))
    }
}

/// Test runner configuration: `tests.json` plus `test-config.json`.
#[derive(Debug, Clone)]
pub struct ConfigurationParser {
    tests_json: Value,
    test_config_json: Value,
}

impl ConfigurationParser {
    /// Read both files from the configuration directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let tests_json = read_json(&dir.join("tests.json"))?;
        let test_config_json = read_json(&dir.join("test-config.json"))?;
        info!(dir = %dir.display(), "Test runner configuration loaded");
        Ok(Self::from_values(tests_json, test_config_json))
    }

    pub fn from_values(tests_json: Value, test_config_json: Value) -> Self {
        Self {
            tests_json,
            test_config_json,
        }
    }

    pub fn parse_tests_json(&self, test_id: &str) -> Result<TestDescriptor> {
        let unrecognised = || {
            DpctfError::Config(format!(
                "Unrecognised test id is detected. Detected test id({test_id}) is not defined in \"tests.json\"."
            ))
        };
        let test = self
            .tests_json
            .get("tests")
            .and_then(|tests| tests.get(test_id))
            .ok_or_else(unrecognised)?;
        let field = |name: &str| test.get(name).and_then(Value::as_str).map(str::to_string);
        let path = field("path").ok_or_else(unrecognised)?;
        let code = field("code").ok_or_else(unrecognised)?;
        debug!(test_id, %path, %code, "Test found in tests.json");

        Ok(TestDescriptor {
            test_id: test_id.to_string(),
            path,
            code,
            config: test.get("config").cloned().unwrap_or(Value::Null),
        })
    }

    fn lookup_test_config(&self, parameter: &str, test: &TestDescriptor) -> Option<&Value> {
        [test.path.as_str(), test.code.as_str(), "all"]
            .into_iter()
            .find_map(|scope| self.test_config_json.get(scope)?.get(parameter))
    }

    /// Required test parameters, looked up by test path, then code, then `all`.
    pub fn parse_test_config_json(
        &self,
        parameters: &[&str],
        test: &TestDescriptor,
    ) -> Result<ParametersDict> {
        let mut dict = ParametersDict::new();
        for &parameter in parameters {
            let value = self
                .lookup_test_config(parameter, test)
                .ok_or_else(|| test.missing(parameter))?;
            dict.insert_value(parameter, value.clone());
        }
        Ok(dict)
    }

    fn parse_optional_test_config(
        &self,
        parameters: &[&str],
        test: &TestDescriptor,
        dict: &mut ParametersDict,
    ) {
        for &parameter in parameters {
            match self.lookup_test_config(parameter, test) {
                Some(value) if !value.is_null() => dict.insert_value(parameter, value.clone()),
                _ => debug!(parameter, "Optional parameter not configured"),
            }
        }
    }

    /// Content parameters from the test's `tests.json` config.
    pub fn parse_tests_json_content_config(
        &self,
        parameters: &[&str],
        test: &TestDescriptor,
    ) -> Result<ParametersDict> {
        let mut dict = ParametersDict::new();
        for &parameter in parameters {
            match parameter {
                "fragment_duration" => {
                    let first = test
                        .representations_of("video")
                        .next()
                        .ok_or_else(|| test.missing(parameter))?;
                    dict.insert(parameter, test.fragment_duration_ms(first)?)?;
                }
                "fragment_duration_list" => {
                    let mut list = BTreeMap::new();
                    for (i, representation) in test.representations_of("video").enumerate() {
                        let duration = test.fragment_duration_ms(representation)?;
                        list.insert((i + 1).to_string(), duration);
                    }
                    dict.insert(parameter, list)?;
                }
                "fragment_duration_multi_mpd" => {
                    let mut track_counts: BTreeMap<u32, u32> = BTreeMap::new();
                    let mut list = Vec::new();
                    for representation in test.representations_of("video") {
                        let set = representation
                            .get("switching_set")
                            .and_then(Value::as_u64)
                            .unwrap_or(1) as u32;
                        let track = track_counts.entry(set).or_insert(0);
                        *track += 1;
                        list.push((set, *track, test.fragment_duration_ms(representation)?));
                    }
                    dict.insert(parameter, list)?;
                }
                _ => {
                    let value = test
                        .config
                        .get(parameter)
                        .ok_or_else(|| test.missing(parameter))?;
                    let ms = match value {
                        Value::String(text) => parse_iso8601_duration(text)?,
                        Value::Number(n) => n.as_f64().unwrap_or(0.0) * 1000.0,
                        _ => return Err(test.missing(parameter)),
                    };
                    dict.insert(parameter, ms)?;
                }
            }
        }
        Ok(dict)
    }

    /// Resolve every parameter a handler declares into one dictionary.
    pub fn load_parameters(
        &self,
        spec: &ParameterSpec,
        test: &TestDescriptor,
    ) -> Result<ParametersDict> {
        let mut dict = self.parse_test_config_json(&spec.required, test)?;
        self.parse_optional_test_config(&spec.optional, test, &mut dict);
        let content = self.parse_tests_json_content_config(&spec.content, test)?;
        for key in content.keys() {
            dict.insert_value(key, content.raw(key)?.clone());
        }
        Ok(dict)
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        DpctfError::Config(format!("Failed to read '{}': {e}", path.display()))
    })?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn tests_json() -> Value {
        json!({
            "tests": {
                "T1": {
                    "path": "cfhd_12.5_25_50-local/sequential-track-playback__t1.html",
                    "code": "8.2",
                    "config": {
                        "cmaf_track_duration": "PT1M0.5S",
                        "representations": {
                            "1": {"type": "video", "fragment_duration": 2.0},
                            "2": {"type": "video", "fragment_duration": 1.92, "switching_set": 2},
                            "3": {"type": "audio", "mezzanine": "PN03"}
                        }
                    }
                },
                "T2": {
                    "path": "a/b.html",
                    "code": "8.3",
                    "config": {
                        "representations": {"1": {"type": "video", "fragment_duration": null}}
                    }
                }
            }
        })
    }

    fn test_config_json() -> Value {
        json!({
            "cfhd_12.5_25_50-local/sequential-track-playback__t1.html": {"ts_max": 150},
            "8.2": {"ts_max": 200, "tolerance": 20},
            "all": {"ts_max": 120, "tolerance": 10, "frame_tolerance": 0}
        })
    }

    fn parser() -> ConfigurationParser {
        ConfigurationParser::from_values(tests_json(), test_config_json())
    }

    // =====================================================================
    // ISO-8601 durations
    // =====================================================================

    #[test]
    fn test_iso8601_durations() {
        assert_eq!(parse_iso8601_duration("PT10S").unwrap(), 10_000.0);
        assert_eq!(parse_iso8601_duration("PT1M0.5S").unwrap(), 60_500.0);
        assert_eq!(parse_iso8601_duration("PT1H").unwrap(), 3_600_000.0);
        assert_eq!(parse_iso8601_duration("P1DT1S").unwrap(), 86_401_000.0);
        assert_eq!(parse_iso8601_duration("PT0.0333S").unwrap(), 33.3);
    }

    #[test]
    fn test_iso8601_rejects_malformed() {
        for bad in ["", "P", "PT", "10S", "PT1X", "PT-1S"] {
            assert!(parse_iso8601_duration(bad).is_err(), "accepted '{bad}'");
        }
    }

    // =====================================================================
    // tests.json
    // =====================================================================

    #[test]
    fn test_parse_tests_json() {
        let test = parser().parse_tests_json("T1").unwrap();
        assert_eq!(test.code, "8.2");
        assert!(test.path.ends_with("t1.html"));
        assert_eq!(
            test.content_types(),
            ContentTypes {
                video: true,
                audio: true
            }
        );
        assert_eq!(test.audio_content_id().as_deref(), Some("PN03"));
    }

    #[test]
    fn test_unknown_test_id_is_config_error() {
        let err = parser().parse_tests_json("T9").unwrap_err();
        assert!(err.to_string().contains("Detected test id(T9) is not defined"));
    }

    #[test]
    fn test_content_parameters() {
        let parser = parser();
        let test = parser.parse_tests_json("T1").unwrap();
        let params = parser
            .parse_tests_json_content_config(
                &[
                    "cmaf_track_duration",
                    "fragment_duration",
                    "fragment_duration_list",
                    "fragment_duration_multi_mpd",
                ],
                &test,
            )
            .unwrap();
        assert_eq!(params.get_f64("cmaf_track_duration").unwrap(), 60_500.0);
        assert_eq!(params.get_f64("fragment_duration").unwrap(), 2000.0);
        let list: BTreeMap<String, f64> = params.get("fragment_duration_list").unwrap();
        assert_eq!(list["2"], 1920.0);
        let multi: Vec<(u32, u32, f64)> = params.get("fragment_duration_multi_mpd").unwrap();
        assert_eq!(multi, vec![(1, 1, 2000.0), (2, 1, 1920.0)]);
    }

    #[test]
    fn test_null_fragment_duration_is_config_error() {
        let parser = parser();
        let test = parser.parse_tests_json("T2").unwrap();
        let err = parser
            .parse_tests_json_content_config(&["fragment_duration"], &test)
            .unwrap_err();
        assert!(err.to_string().contains("Failed to get a parameter:'fragment_duration'"));
        assert!(parser
            .parse_tests_json_content_config(&["cmaf_track_duration"], &test)
            .is_err());
    }

    // =====================================================================
    // test-config.json
    // =====================================================================

    #[test]
    fn test_lookup_falls_back_path_code_all() {
        let parser = parser();
        let test = parser.parse_tests_json("T1").unwrap();
        let params = parser
            .parse_test_config_json(&["ts_max", "tolerance", "frame_tolerance"], &test)
            .unwrap();
        assert_eq!(params.get_f64("ts_max").unwrap(), 150.0);
        assert_eq!(params.get_f64("tolerance").unwrap(), 20.0);
        assert_eq!(params.get_f64("frame_tolerance").unwrap(), 0.0);
        assert!(parser.parse_test_config_json(&["render_threshold"], &test).is_err());
    }

    #[test]
    fn test_load_parameters_merges_all_sources() {
        let parser = parser();
        let test = parser.parse_tests_json("T1").unwrap();
        let spec = ParameterSpec {
            required: vec!["ts_max"],
            optional: vec!["video_shifts_tolerance", "tolerance"],
            content: vec!["cmaf_track_duration"],
        };
        let params = parser.load_parameters(&spec, &test).unwrap();
        assert_eq!(params.len(), 3);
        assert!(!params.contains("video_shifts_tolerance"));
        assert_eq!(params.get_f64("cmaf_track_duration").unwrap(), 60_500.0);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tests.json"), tests_json().to_string()).unwrap();
        std::fs::write(dir.path().join("test-config.json"), test_config_json().to_string())
            .unwrap();
        let parser = ConfigurationParser::load(dir.path()).unwrap();
        assert_eq!(parser.parse_tests_json("T2").unwrap().code, "8.3");

        let empty = TempDir::new().unwrap();
        assert!(matches!(
            ConfigurationParser::load(empty.path()),
            Err(DpctfError::Config(_))
        ));
    }
}
