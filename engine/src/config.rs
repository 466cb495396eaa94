//! Loading profile documents.
//!
//! A profile document is a YAML mapping of profile name -> entry name ->
//! `{ location, files }`. Loading normalizes null nodes and substitutes
//! keyword and function tokens, so the engines only ever see plain paths.
//!
//! ```yaml
//! desktop:
//!   kde:
//!     location: $CONFIG_DIR
//!     files: [kdeglobals, kwinrc]
//!   theme:
//!     location: $SHARE_DIR/plasma/look-and-feel/${BEGINS_WITH="org.kde"}
//!     files: [__all__]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_yaml_ng::{Mapping, Value};

use crate::error::EngineError;
use crate::model::{Profile, ProfileEntry, ProfileSet};

/// Values for `$KEYWORD` tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenContext {
    keywords: Vec<(String, String)>,
}

impl TokenContext {
    /// Keywords for the current user, resolved through `dirs`.
    pub fn from_environment() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let mut context = Self::with_home(&home);
        if let Some(config) = dirs::config_dir() {
            context.set("CONFIG_DIR", config);
        }
        if let Some(share) = dirs::data_dir() {
            context.set("SHARE_DIR", share);
        }
        if let Some(bin) = dirs::executable_dir() {
            context.set("BIN_DIR", bin);
        }
        context
    }

    /// Keywords laid out under `home` the XDG way.
    pub fn with_home(home: &Path) -> Self {
        let mut context = TokenContext::default();
        context.set("HOME", home);
        context.set("CONFIG_DIR", home.join(".config"));
        context.set("SHARE_DIR", home.join(".local/share"));
        context.set("BIN_DIR", home.join(".local/bin"));
        context
    }

    pub fn set(&mut self, keyword: &str, value: impl AsRef<Path>) {
        let value = value.as_ref().to_string_lossy().into_owned();
        match self.keywords.iter_mut().find(|(k, _)| k == keyword) {
            Some(slot) => slot.1 = value,
            None => self.keywords.push((keyword.to_string(), value)),
        }
    }

    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, v)| v.as_str())
    }

    /// Replace every known `$KEYWORD`; unknown ones are left as written.
    pub fn substitute_keywords(&self, text: &str) -> String {
        KEYWORD_PATTERN
            .replace_all(text, |caps: &Captures| match self.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// `$KEYWORD`
static KEYWORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Z_][A-Z0-9_]*)").unwrap());

/// `${FUNCTION="argument"}`, single or double quotes.
static FUNCTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\$\{(\w+)=["']([^"']+)["']\}"#).unwrap());

fn ends_with(name: &str, suffix: &str) -> bool {
    name.ends_with(suffix)
}

fn begins_with(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix)
}

/// Resolve `${ENDS_WITH="x"}` / `${BEGINS_WITH="x"}` tokens in a path.
///
/// The token is replaced by the first name (sorted) in the directory that
/// precedes it which ends/begins with `x`. `base` is prepended to relative
/// prefixes. Unresolvable tokens stay in place and are logged.
pub fn resolve_functions(text: &str, base: Option<&Path>) -> String {
    let mut resolved = text.to_string();
    while let Some(caps) = FUNCTION_PATTERN.captures(&resolved) {
        let Some(whole) = caps.get(0).map(|m| m.range()) else {
            break;
        };
        let function = caps[1].to_string();
        let argument = caps[2].to_string();

        let prefix = &resolved[..whole.start];
        let dir = match base {
            Some(base) if !Path::new(prefix).is_absolute() => base.join(prefix),
            _ => PathBuf::from(prefix),
        };

        let matcher: fn(&str, &str) -> bool = match function.as_str() {
            "ENDS_WITH" => ends_with,
            "BEGINS_WITH" => begins_with,
            _ => {
                tracing::warn!("Unknown function '{}' in '{}'", function, text);
                break;
            }
        };

        let mut names: Vec<String> = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(e) => {
                tracing::warn!("Cannot resolve {} in '{}': {}: {}", function, text, dir.display(), e);
                break;
            }
        };
        names.sort();

        match names.into_iter().find(|name| matcher(name, &argument)) {
            Some(name) => resolved.replace_range(whole, &name),
            None => {
                tracing::warn!(
                    "No entry in {} matches {}=\"{}\"",
                    dir.display(),
                    function,
                    argument
                );
                break;
            }
        }
    }

    resolved
}

/// Load and normalize a profile document from disk.
///
/// # Errors
/// `ConfigRead` if the file can't be read, `ConfigParse` if it is not YAML,
/// `ConfigInvalid` if it doesn't have the profile shape or has no profiles.
pub fn load_profiles(path: &Path, tokens: &TokenContext) -> Result<ProfileSet, EngineError> {
    let text = fs::read_to_string(path).map_err(|e| EngineError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let profiles = parse_profiles(&text, path, tokens)?;
    tracing::debug!("Loaded {} profile(s) from {}", profiles.len(), path.display());
    Ok(profiles)
}

/// Parse a profile document; `origin` is only used in error messages.
pub fn parse_profiles(text: &str, origin: &Path, tokens: &TokenContext) -> Result<ProfileSet, EngineError> {
    let document: Value = serde_yaml_ng::from_str(text).map_err(|e| EngineError::ConfigParse {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })?;

    let mapping = match document {
        Value::Null => return Err(EngineError::config(format!("{} is empty", origin.display()))),
        Value::Mapping(mapping) => mapping,
        _ => {
            return Err(EngineError::config(format!(
                "{}: top level must be a mapping of profiles",
                origin.display()
            )))
        }
    };

    if mapping.is_empty() {
        return Err(EngineError::config(format!("No profiles found in {}", origin.display())));
    }

    let mut profiles = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = key_name(&key, "profile")?;
        let entries = match value {
            Value::Null => Vec::new(),
            Value::Mapping(entries) => parse_entries(&name, entries, tokens)?,
            _ => {
                return Err(EngineError::config(format!(
                    "Profile '{}' must be a mapping of entries",
                    name
                )))
            }
        };
        profiles.push(Profile::new(name, entries));
    }

    Ok(ProfileSet::new(profiles))
}

fn key_name(key: &Value, what: &str) -> Result<String, EngineError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(EngineError::config(format!("Invalid {} name: {:?}", what, other))),
    }
}

fn parse_entries(profile: &str, entries: Mapping, tokens: &TokenContext) -> Result<Vec<ProfileEntry>, EngineError> {
    let mut parsed = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let name = key_name(&key, "entry")?;
        let fields = match value {
            Value::Mapping(fields) => fields,
            _ => {
                return Err(EngineError::config(format!(
                    "Entry '{}' in profile '{}' needs a location",
                    name, profile
                )))
            }
        };

        let location = match fields.get("location") {
            Some(Value::String(location)) => location.clone(),
            _ => {
                return Err(EngineError::config(format!(
                    "Entry '{}' in profile '{}' needs a string location",
                    name, profile
                )))
            }
        };
        let location = resolve_functions(&tokens.substitute_keywords(&location), None);

        let files = match fields.get("files") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => {
                let mut files = Vec::with_capacity(items.len());
                for item in items {
                    let file = match item {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        // A bare `-` in a list
                        Value::Null => continue,
                        other => {
                            return Err(EngineError::config(format!(
                                "Entry '{}' in profile '{}' has a non-string file: {:?}",
                                name, profile, other
                            )))
                        }
                    };
                    let file = tokens.substitute_keywords(&file);
                    files.push(resolve_functions(&file, Some(Path::new(&location))));
                }
                files
            }
            Some(_) => {
                return Err(EngineError::config(format!(
                    "Entry '{}' in profile '{}': files must be a list",
                    name, profile
                )))
            }
        };

        parsed.push(ProfileEntry {
            name,
            location: PathBuf::from(location),
            files,
        });
    }
    Ok(parsed)
}
