use std::{collections::HashMap, fmt::Write as _, path::Path, str::FromStr};

use crate::error::ConfigError;

use super::properties::is_comment;

/// Sectioned `[section]` / `key=value` file. Section and key lookups are
/// case-insensitive; keys before the first header belong to the `""` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniDocument {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        content.parse()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(&section.to_ascii_lowercase())?
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(section, key).map(|v| parse_bool(key, v)).transpose()
    }
}

impl FromStr for IniDocument {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut doc = IniDocument::default();
        let mut current = String::new();

        for (idx, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || is_comment(line) {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .ok_or_else(|| ConfigError::Malformed {
                        line: idx + 1,
                        content: raw.to_string(),
                    })?;
                current = name.trim().to_ascii_lowercase();
                doc.sections.entry(current.clone()).or_default();
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Malformed {
                line: idx + 1,
                content: raw.to_string(),
            })?;

            doc.sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        Ok(doc)
    }
}

/// Renders sections and keys in the order given.
pub fn render(sections: &[(&str, Vec<(&str, String)>)]) -> String {
    let mut out = String::from("# Managed by MineGuard\n");
    for (name, entries) in sections {
        let _ = writeln!(out, "\n[{name}]");
        for (key, value) in entries {
            let _ = writeln!(out, "{key}={value}");
        }
    }
    out
}

pub fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_and_keys_are_case_insensitive() {
        let doc: IniDocument = "[Features]\nLanBroadcast=true\nOnRebootStart = no\n"
            .parse()
            .unwrap();
        assert_eq!(doc.get_bool("features", "lanbroadcast").unwrap(), Some(true));
        assert_eq!(doc.get_bool("FEATURES", "ONREBOOTSTART").unwrap(), Some(false));
        assert_eq!(doc.get("features", "missing"), None);
    }

    #[test]
    fn tolerates_comments_and_blank_lines() {
        let input = "# header\n; another\n\n[launch]\n\n  jar = server.jar  \n";
        let doc: IniDocument = input.parse().unwrap();
        assert_eq!(doc.get("launch", "jar"), Some("server.jar"));
    }

    #[test]
    fn keys_before_header_land_in_root_section() {
        let doc: IniDocument = "name=root\n[a]\nname=inner".parse().unwrap();
        assert_eq!(doc.get("", "name"), Some("root"));
        assert_eq!(doc.get("a", "name"), Some("inner"));
    }

    #[test]
    fn rejects_lines_without_separator() {
        let err = "[features]\nLanBroadcast".parse::<IniDocument>().unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 2, .. }));
    }

    #[test]
    fn rejects_unknown_boolean() {
        let doc: IniDocument = "[features]\nLanBroadcast=maybe".parse().unwrap();
        assert!(doc.get_bool("features", "lanbroadcast").is_err());
    }

    #[test]
    fn render_round_trips_through_parser() {
        let text = render(&[("Features", vec![("LanBroadcast", "true".to_string())])]);
        let doc: IniDocument = text.parse().unwrap();
        assert_eq!(doc.get("features", "lanbroadcast"), Some("true"));
    }
}
