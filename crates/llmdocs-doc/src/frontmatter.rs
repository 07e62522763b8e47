use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::DocError;

const DELIMITER: &str = "---";

/// A document split at its YAML frontmatter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontmatterSplit<'a> {
    /// YAML between the delimiter lines, `None` when the document has none.
    pub yaml: Option<&'a str>,
    pub body: &'a str,
}

/// Frontmatter keys the document layer reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocFrontmatter {
    #[serde(default)]
    pub model: Option<String>,
}

pub fn split(text: &str) -> FrontmatterSplit<'_> {
    let none = FrontmatterSplit {
        yaml: None,
        body: text,
    };
    let Some(after_open) = strip_delimiter_line(text) else {
        return none;
    };
    let yaml_start = text.len() - after_open.len();

    let mut offset = yaml_start;
    for line in after_open.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == DELIMITER {
            return FrontmatterSplit {
                yaml: Some(&text[yaml_start..offset]),
                body: &text[offset + line.len()..],
            };
        }
        offset += line.len();
    }
    none
}

fn strip_delimiter_line(text: &str) -> Option<&str> {
    let rest = text.strip_prefix(DELIMITER)?;
    rest.strip_prefix('\n')
        .or_else(|| rest.strip_prefix("\r\n"))
}

pub fn parse(text: &str) -> Result<DocFrontmatter, DocError> {
    match split(text).yaml {
        Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str::<DocFrontmatter>(yaml)
            .map_err(|error| DocError::Frontmatter(error.to_string())),
        _ => Ok(DocFrontmatter::default()),
    }
}

/// Returns `text` with `model` set in its frontmatter, adding a frontmatter
/// block when there is none. Other keys are preserved.
pub fn set_model(text: &str, model: &str) -> Result<String, DocError> {
    let parts = split(text);
    let mut mapping = match parts.yaml {
        Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str::<Mapping>(yaml)
            .map_err(|error| DocError::Frontmatter(error.to_string()))?,
        _ => Mapping::new(),
    };
    mapping.insert(
        Value::String("model".to_string()),
        Value::String(model.to_string()),
    );
    let yaml = serde_yaml::to_string(&mapping)
        .map_err(|error| DocError::Frontmatter(error.to_string()))?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{}", parts.body))
}
