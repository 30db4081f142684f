//! Agent presets — immutable records loaded once at startup from JSON files
//! on disk. Each preset binds a logical agent name to a system prompt, a set
//! of sampling overrides, and a memory policy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Memory strategy an agent preset opts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPolicy {
    None,
    ThreadWindow,
}

impl MemoryPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Some(MemoryPolicy::None),
            "thread_window" => Some(MemoryPolicy::ThreadWindow),
            _ => None,
        }
    }
}

/// On-disk shape of an agent preset file.
#[derive(Debug, Clone, Deserialize)]
struct RawAgentPreset {
    name: String,
    system_prompt: String,
    #[serde(default)]
    params_override: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    memory_policy: Option<String>,
    /// Rejected alias — presence is a hard configuration error.
    #[serde(default)]
    system_prompt_path: Option<serde_json::Value>,
    /// Rejected field — presence is a hard configuration error.
    #[serde(default)]
    grammar_path: Option<serde_json::Value>,
}

/// An immutable agent preset, resolved relative to the directory it was
/// loaded from.
#[derive(Debug, Clone)]
pub struct AgentPreset {
    /// Lowercased, unique name.
    pub name: String,
    /// Absolute path to the system prompt text file.
    pub system_prompt_path: PathBuf,
    /// Recognized sampling overrides merged into baseline generation params.
    pub params_override: serde_json::Map<String, serde_json::Value>,
    pub memory_policy: MemoryPolicy,
}

/// Load every `*.json` file in `dir` as an agent preset.
///
/// Duplicate names (after lowercasing) overwrite earlier entries, last file
/// wins, in directory-read order.
pub fn load_agent_presets(dir: &Path) -> Result<HashMap<String, AgentPreset>> {
    let mut presets = HashMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(presets),
        Err(e) => return Err(Error::Io(e)),
    };

    for entry in entries {
        let entry = entry.map_err(Error::Io)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let preset = load_preset_file(&path)?;
        presets.insert(preset.name.clone(), preset);
    }

    Ok(presets)
}

fn load_preset_file(path: &Path) -> Result<AgentPreset> {
    let raw_text = std::fs::read_to_string(path).map_err(Error::Io)?;
    let raw: RawAgentPreset = serde_json::from_str(&raw_text).map_err(Error::Json)?;

    if raw.system_prompt_path.is_some() {
        return Err(Error::Config(format!(
            "{}: \"system_prompt_path\" is not a valid field — use \"system_prompt\"",
            path.display()
        )));
    }
    if raw.grammar_path.is_some() {
        return Err(Error::Config(format!(
            "{}: \"grammar_path\" is not supported",
            path.display()
        )));
    }

    let name = raw.name.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(Error::Config(format!(
            "{}: agent preset \"name\" must not be empty",
            path.display()
        )));
    }

    let memory_policy = match raw.memory_policy.as_deref() {
        None => MemoryPolicy::None,
        Some(s) => MemoryPolicy::parse(s).ok_or_else(|| {
            Error::Config(format!(
                "{}: unknown memory_policy \"{s}\" (expected \"none\" or \"thread_window\")",
                path.display()
            ))
        })?,
    };

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let system_prompt_path = base_dir.join(&raw.system_prompt);

    Ok(AgentPreset {
        name,
        system_prompt_path,
        params_override: raw.params_override,
        memory_policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_policy_parse_valid() {
        assert_eq!(MemoryPolicy::parse("none"), Some(MemoryPolicy::None));
        assert_eq!(
            MemoryPolicy::parse("thread_window"),
            Some(MemoryPolicy::ThreadWindow)
        );
        assert_eq!(
            MemoryPolicy::parse("  THREAD_WINDOW "),
            Some(MemoryPolicy::ThreadWindow)
        );
    }

    #[test]
    fn memory_policy_parse_invalid() {
        assert_eq!(MemoryPolicy::parse("vector_store"), None);
    }

    #[test]
    fn load_presets_missing_dir_returns_empty() {
        let presets = load_agent_presets(Path::new("/nonexistent/does/not/exist")).unwrap();
        assert!(presets.is_empty());
    }

    #[test]
    fn load_preset_from_file() {
        let dir = tempdir();
        std::fs::write(dir.join("router.json"), r#"{
            "name": "Router",
            "system_prompt": "router.txt",
            "memory_policy": "none",
            "params_override": {"temperature": 0.0}
        }"#)
        .unwrap();
        std::fs::write(dir.join("router.txt"), "classify the input").unwrap();

        let presets = load_agent_presets(&dir).unwrap();
        let p = presets.get("router").expect("lowercased name key");
        assert_eq!(p.memory_policy, MemoryPolicy::None);
        assert_eq!(
            p.params_override.get("temperature").unwrap(),
            &serde_json::json!(0.0)
        );
        assert!(p.system_prompt_path.ends_with("router.txt"));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn load_preset_rejects_system_prompt_path_alias() {
        let dir = tempdir();
        std::fs::write(
            dir.join("bad.json"),
            r#"{"name":"bad","system_prompt":"x.txt","system_prompt_path":"x.txt"}"#,
        )
        .unwrap();
        let err = load_agent_presets(&dir).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn load_preset_rejects_grammar_path() {
        let dir = tempdir();
        std::fs::write(
            dir.join("bad.json"),
            r#"{"name":"bad","system_prompt":"x.txt","grammar_path":"x.gbnf"}"#,
        )
        .unwrap();
        let err = load_agent_presets(&dir).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        std::fs::remove_dir_all(dir).ok();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "relay-domain-test-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
