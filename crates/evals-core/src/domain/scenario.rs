//! Scenario definitions: fixtures to seed, the instruction to send and the
//! expectations to check.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{EvalError, Result};

/// Stable identity of a scenario, used to key archives and baselines.
///
/// Restricted to ASCII alphanumerics, `-`, `_` and `.` so it is always a safe
/// single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScenarioId(String);

impl ScenarioId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id == "." || id == ".." {
            return Err(EvalError::InvalidScenario(format!(
                "scenario id `{id}` is not a usable name"
            )));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(EvalError::InvalidScenario(format!(
                "scenario id `{id}` contains invalid character {bad:?}"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ScenarioId {
    type Error = EvalError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<ScenarioId> for String {
    fn from(id: ScenarioId) -> Self {
        id.0
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fixture addressed by `(category, name)` in the fixture store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureRef {
    pub category: String,
    pub name: String,
}

impl FixtureRef {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FixtureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

/// The base fixture set seeded into a fresh workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseFixture {
    #[serde(flatten)]
    pub fixture: FixtureRef,

    /// Workspace-relative directory to place the fixture in (default: root).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<PathBuf>,
}

/// A single fixture file written at a workspace-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    pub path: PathBuf,
    #[serde(flatten)]
    pub fixture: FixtureRef,
}

/// How an output pattern is matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Case-sensitive substring.
    #[default]
    Literal,
    Regex,
}

/// One declarative check against a run result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    SkillUsed {
        name: String,
    },
    ToolUsed {
        name: String,
    },
    OutputMentions {
        pattern: String,
        #[serde(default)]
        mode: MatchMode,
    },
    OutputOmits {
        pattern: String,
        #[serde(default)]
        mode: MatchMode,
    },
}

impl Expectation {
    pub fn skill_used(name: impl Into<String>) -> Self {
        Expectation::SkillUsed { name: name.into() }
    }

    pub fn tool_used(name: impl Into<String>) -> Self {
        Expectation::ToolUsed { name: name.into() }
    }

    pub fn output_mentions(pattern: impl Into<String>) -> Self {
        Expectation::OutputMentions {
            pattern: pattern.into(),
            mode: MatchMode::Literal,
        }
    }

    pub fn output_omits(pattern: impl Into<String>) -> Self {
        Expectation::OutputOmits {
            pattern: pattern.into(),
            mode: MatchMode::Literal,
        }
    }

    /// Stable key identifying this check across runs.
    pub fn key(&self) -> String {
        match self {
            Expectation::SkillUsed { name } => format!("skill_used:{name}"),
            Expectation::ToolUsed { name } => format!("tool_used:{name}"),
            Expectation::OutputMentions { pattern, mode } => match mode {
                MatchMode::Literal => format!("output_mentions:{pattern}"),
                MatchMode::Regex => format!("output_mentions~{pattern}"),
            },
            Expectation::OutputOmits { pattern, mode } => match mode {
                MatchMode::Literal => format!("output_omits:{pattern}"),
                MatchMode::Regex => format!("output_omits~{pattern}"),
            },
        }
    }
}

/// A named, reusable test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: ScenarioId,
    pub instruction: String,
    pub base: BaseFixture,
    #[serde(default)]
    pub overlays: Vec<Overlay>,
    #[serde(default, rename = "expect")]
    pub expectations: Vec<Expectation>,
    /// Overrides the configured invocation timeout for this scenario.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Scenario {
    pub fn new(id: ScenarioId, base: FixtureRef, instruction: impl Into<String>) -> Self {
        Self {
            id,
            instruction: instruction.into(),
            base: BaseFixture {
                fixture: base,
                dest: None,
            },
            overlays: Vec::new(),
            expectations: Vec::new(),
            timeout_secs: None,
        }
    }

    /// Place the base fixture under `dest` instead of the workspace root.
    pub fn with_base_dest(mut self, dest: impl Into<PathBuf>) -> Self {
        self.base.dest = Some(dest.into());
        self
    }

    pub fn with_overlay(mut self, path: impl Into<PathBuf>, fixture: FixtureRef) -> Self {
        self.overlays.push(Overlay {
            path: path.into(),
            fixture,
        });
        self
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expectations.push(expectation);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Parse a scenario definition from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let scenario: Scenario =
            toml::from_str(raw).map_err(|e| EvalError::InvalidScenario(e.to_string()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load a scenario definition file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EvalError::InvalidScenario(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        if self.instruction.trim().is_empty() {
            return Err(EvalError::InvalidScenario(format!(
                "scenario {} has an empty instruction",
                self.id
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(EvalError::InvalidScenario(format!(
                "scenario {} has a zero timeout",
                self.id
            )));
        }
        for expectation in &self.expectations {
            if let Expectation::OutputMentions {
                pattern,
                mode: MatchMode::Regex,
            }
            | Expectation::OutputOmits {
                pattern,
                mode: MatchMode::Regex,
            } = expectation
            {
                regex::Regex::new(pattern).map_err(|e| {
                    EvalError::InvalidScenario(format!(
                        "scenario {} has an invalid pattern {pattern:?}: {e}",
                        self.id
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_id_validation() {
        assert!(ScenarioId::new("review-gha-simple_migration.v2").is_ok());
        assert!(ScenarioId::new("").is_err());
        assert!(ScenarioId::new("..").is_err());
        assert!(ScenarioId::new("a/b").is_err());
        assert!(ScenarioId::new("has space").is_err());
    }

    #[test]
    fn test_expectation_keys_are_distinct_per_mode() {
        let literal = Expectation::output_mentions("go vet");
        let regex = Expectation::OutputMentions {
            pattern: "go vet".to_string(),
            mode: MatchMode::Regex,
        };
        assert_eq!(literal.key(), "output_mentions:go vet");
        assert_ne!(literal.key(), regex.key());
        assert_eq!(Expectation::skill_used("x").key(), "skill_used:x");
    }

    #[test]
    fn test_scenario_from_toml() {
        let raw = r#"
id = "review-gha-simple-migration"
instruction = "/rwx:review-gha-migration .rwx/simple-ci-rwx.yml"

[base]
category = "gha"
name = "simple-ci.yml"
dest = ".github/workflows"

[[overlays]]
path = ".rwx/simple-ci-rwx.yml"
category = "gha"
name = "simple-ci-rwx.yml"

[[expect]]
kind = "skill_used"
name = "rwx:review-gha-migration"

[[expect]]
kind = "tool_used"
name = "Bash"

[[expect]]
kind = "output_mentions"
pattern = "go vet"
"#;
        let scenario = Scenario::from_toml_str(raw).expect("parse scenario");
        assert_eq!(scenario.id.as_str(), "review-gha-simple-migration");
        assert_eq!(scenario.base.fixture, FixtureRef::new("gha", "simple-ci.yml"));
        assert_eq!(scenario.base.dest, Some(PathBuf::from(".github/workflows")));
        assert_eq!(scenario.overlays.len(), 1);
        assert_eq!(scenario.expectations.len(), 3);
        assert_eq!(
            scenario.expectations[2],
            Expectation::output_mentions("go vet")
        );
    }

    #[test]
    fn test_scenario_rejects_bad_id_and_empty_instruction() {
        let bad_id = r#"
id = "bad id"
instruction = "x"
[base]
category = "gha"
name = "simple-ci.yml"
"#;
        assert!(Scenario::from_toml_str(bad_id).is_err());

        let empty = r#"
id = "ok"
instruction = "   "
[base]
category = "gha"
name = "simple-ci.yml"
"#;
        assert!(matches!(
            Scenario::from_toml_str(empty),
            Err(EvalError::InvalidScenario(_))
        ));
    }

    #[test]
    fn test_invalid_regex_rejected_at_load() {
        let raw = r#"
id = "bad-regex"
instruction = "x"
[base]
category = "gha"
name = "simple-ci.yml"
[[expect]]
kind = "output_mentions"
pattern = "(unclosed"
mode = "regex"
"#;
        assert!(matches!(
            Scenario::from_toml_str(raw),
            Err(EvalError::InvalidScenario(_))
        ));
    }
}
