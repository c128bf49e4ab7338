use std::fmt;
use std::ops::Deref;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default pattern of a rule, matching everything.
const DEFAULT_REGEX: &str = "(.*)";

static DEFAULT_COMPILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^(?s:(.*))$").unwrap());

/// Default replacement of a rule, the first capture group.
const DEFAULT_REPLACEMENT: &str = "$1";

/// Default separator between concatenated source label values.
const DEFAULT_SEPARATOR: &str = ";";

/// Raised if a relabel rule is invalid.
#[derive(Debug, thiserror::Error)]
pub enum RelabelConfigError {
    /// The regular expression does not compile.
    #[error("invalid relabel regex {pattern:?}")]
    InvalidRegex {
        /// The pattern as configured.
        pattern: String,
        /// The compile error.
        #[source]
        source: regex::Error,
    },
    /// The action writes to a label but no target label is configured.
    #[error("relabel configuration for {action} action requires 'target_label' value")]
    MissingTargetLabel {
        /// The configured action.
        action: Action,
    },
    /// The target label is not a valid label name.
    #[error("{target:?} is invalid 'target_label' for {action} action")]
    InvalidTargetLabel {
        /// The configured action.
        action: Action,
        /// The configured target label.
        target: String,
    },
    /// A `hashmod` rule has no modulus.
    #[error("relabel configuration for hashmod requires non-zero modulus")]
    MissingModulus,
    /// A field is configured that the action does not use.
    #[error("'{field}' can not be set for {action} action")]
    UnexpectedField {
        /// The configured action.
        action: Action,
        /// Name of the offending field.
        field: &'static str,
    },
}

/// What a relabel rule does with the matched value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Writes the expanded replacement to the target label if the regex matches.
    #[default]
    Replace,
    /// Drops the series if the regex does not match.
    Keep,
    /// Drops the series if the regex matches.
    Drop,
    /// Drops the series unless the source value equals the target label value.
    KeepEqual,
    /// Drops the series if the source value equals the target label value.
    DropEqual,
    /// Writes the hash of the source value modulo `modulus` to the target label.
    HashMod,
    /// Copies labels whose name matches the regex to the expanded replacement name.
    LabelMap,
    /// Removes labels whose name matches the regex.
    LabelDrop,
    /// Removes labels whose name does not match the regex.
    LabelKeep,
    /// Writes the lowercased source value to the target label.
    Lowercase,
    /// Writes the uppercased source value to the target label.
    Uppercase,
}

impl Action {
    /// Returns the configuration name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Keep => "keep",
            Self::Drop => "drop",
            Self::KeepEqual => "keepequal",
            Self::DropEqual => "dropequal",
            Self::HashMod => "hashmod",
            Self::LabelMap => "labelmap",
            Self::LabelDrop => "labeldrop",
            Self::LabelKeep => "labelkeep",
            Self::Lowercase => "lowercase",
            Self::Uppercase => "uppercase",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A regular expression that always matches the full input.
///
/// The configured pattern is wrapped in `^(?s:...)$`. It serializes back to the pattern as
/// configured.
#[derive(Clone, Debug)]
pub struct RelabelRegex {
    pattern: String,
    regex: Regex,
}

impl RelabelRegex {
    /// Compiles a fully anchored regex from the pattern.
    pub fn new(pattern: &str) -> Result<Self, RelabelConfigError> {
        let regex = Regex::new(&format!("^(?s:{pattern})$")).map_err(|source| {
            RelabelConfigError::InvalidRegex {
                pattern: pattern.to_owned(),
                source,
            }
        })?;

        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    /// Returns the pattern as configured.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn is_default(&self) -> bool {
        self.pattern == DEFAULT_REGEX
    }
}

impl Default for RelabelRegex {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_REGEX.to_owned(),
            regex: DEFAULT_COMPILED.clone(),
        }
    }
}

impl Deref for RelabelRegex {
    type Target = Regex;

    fn deref(&self) -> &Regex {
        &self.regex
    }
}

impl PartialEq for RelabelRegex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Serialize for RelabelRegex {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for RelabelRegex {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        Self::new(&pattern).map_err(serde::de::Error::custom)
    }
}

/// A single relabel rule.
///
/// Rules are validated with [`RelabelConfig::validate`] when the configuration is loaded.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelabelConfig {
    /// Labels whose values are concatenated to form the source value.
    pub source_labels: Vec<String>,
    /// Separator placed between concatenated source values.
    ///
    /// Defaults to `;`.
    pub separator: String,
    /// Regex matched against the source value, or label names for the label actions.
    ///
    /// Defaults to `(.*)`.
    pub regex: RelabelRegex,
    /// Modulus for the `hashmod` action.
    pub modulus: u64,
    /// Label written by the action. May contain capture group references for `replace`.
    pub target_label: String,
    /// Replacement value with capture group references.
    ///
    /// Defaults to `$1`.
    pub replacement: String,
    /// The action to perform.
    ///
    /// Defaults to `replace`.
    pub action: Action,
}

impl Default for RelabelConfig {
    fn default() -> Self {
        Self {
            source_labels: Vec::new(),
            separator: DEFAULT_SEPARATOR.to_owned(),
            regex: RelabelRegex::default(),
            modulus: 0,
            target_label: String::new(),
            replacement: DEFAULT_REPLACEMENT.to_owned(),
            action: Action::default(),
        }
    }
}

impl RelabelConfig {
    /// Checks that the rule is consistent for its action.
    pub fn validate(&self) -> Result<(), RelabelConfigError> {
        let action = self.action;

        if action == Action::HashMod && self.modulus == 0 {
            return Err(RelabelConfigError::MissingModulus);
        }

        let writes_target = matches!(
            action,
            Action::Replace
                | Action::HashMod
                | Action::Lowercase
                | Action::Uppercase
                | Action::KeepEqual
                | Action::DropEqual
        );
        if writes_target && self.target_label.is_empty() {
            return Err(RelabelConfigError::MissingTargetLabel { action });
        }

        let target_is_valid = match action {
            Action::Replace => {
                self.target_label.contains('$') || is_valid_label_name(&self.target_label)
            }
            Action::HashMod
            | Action::Lowercase
            | Action::Uppercase
            | Action::KeepEqual
            | Action::DropEqual => is_valid_label_name(&self.target_label),
            _ => true,
        };
        if !target_is_valid {
            return Err(RelabelConfigError::InvalidTargetLabel {
                action,
                target: self.target_label.clone(),
            });
        }

        if matches!(
            action,
            Action::Lowercase | Action::Uppercase | Action::KeepEqual | Action::DropEqual
        ) && self.replacement != DEFAULT_REPLACEMENT
        {
            return Err(RelabelConfigError::UnexpectedField {
                action,
                field: "replacement",
            });
        }

        if matches!(action, Action::KeepEqual | Action::DropEqual) {
            if !self.regex.is_default() {
                return Err(RelabelConfigError::UnexpectedField {
                    action,
                    field: "regex",
                });
            }
            if self.modulus != 0 {
                return Err(RelabelConfigError::UnexpectedField {
                    action,
                    field: "modulus",
                });
            }
        }

        if matches!(action, Action::LabelDrop | Action::LabelKeep) {
            let field = if !self.source_labels.is_empty() {
                Some("source_labels")
            } else if !self.target_label.is_empty() {
                Some("target_label")
            } else if self.modulus != 0 {
                Some("modulus")
            } else if self.replacement != DEFAULT_REPLACEMENT {
                Some("replacement")
            } else {
                None
            };

            if let Some(field) = field {
                return Err(RelabelConfigError::UnexpectedField { action, field });
            }
        }

        Ok(())
    }
}

/// Validates every rule of a list.
pub fn validate_all(rules: &[RelabelConfig]) -> Result<(), RelabelConfigError> {
    rules.iter().try_for_each(RelabelConfig::validate)
}

/// Returns `true` if the name matches `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
