//! Stored prompt configs and `{{ key }}` template expansion.

use regex::{NoExpand, Regex};
use serde_json::Value;
use tracing::warn;

use crate::{
    error::TaskError,
    store::{is_content_hash, ContentStore},
};

/// A parsed prompt config: an optional `model: <platform>/<model>` header
/// line followed by the template body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromptConfig {
    pub platform: Option<String>,
    pub model: Option<String>,
    pub template: String,
}

/// Parse stored config bytes. A first line of the form
/// `model: <platform>/<model>` names the default platform and model; without
/// it the whole content is the template.
pub fn parse_config(text: &str) -> Result<PromptConfig, TaskError> {
    let first_line = text.lines().next().unwrap_or_default();
    let Some(rest) = first_line.strip_prefix("model: ") else {
        return Ok(PromptConfig {
            platform: None,
            model: None,
            template: text.to_string(),
        });
    };

    let Some((platform, model)) = rest.split_once('/') else {
        return Err(TaskError::ConfigInvalid(format!(
            "bad model line {first_line:?}"
        )));
    };
    let (platform, model) = (platform.trim(), model.trim());
    if platform.is_empty() || model.is_empty() {
        return Err(TaskError::ConfigInvalid(format!(
            "bad model line {first_line:?}"
        )));
    }

    let template = text
        .split_once('\n')
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    Ok(PromptConfig {
        platform: Some(platform.to_string()),
        model: Some(model.to_string()),
        template: template.to_string(),
    })
}

/// Fetch the config named by `config_hash` and expand its template with the
/// request's input mapping. Input values that name a blob in the content
/// store are replaced by the blob's text; everything else is substituted
/// verbatim.
pub async fn resolve_prompt(
    store: &ContentStore,
    config_hash: &str,
    input_json: &str,
) -> Result<(PromptConfig, String), TaskError> {
    let bytes = store
        .get(config_hash)
        .await?
        .ok_or_else(|| TaskError::ConfigMissing(config_hash.to_string()))?;
    let config = parse_config(&String::from_utf8_lossy(&bytes))?;

    let mut prompt = config.template.clone();
    for (key, value) in parse_input(input_json) {
        let value = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let replacement = if is_content_hash(&value) {
            match store.get(&value).await? {
                Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                None => value,
            }
        } else {
            value
        };
        prompt = substitute(&prompt, &key, &replacement);
    }

    Ok((config, prompt))
}

fn parse_input(input_json: &str) -> serde_json::Map<String, Value> {
    if input_json.is_empty() {
        return serde_json::Map::new();
    }
    match serde_json::from_str::<Value>(input_json) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!("request input is not a JSON object, ignoring: {other}");
            serde_json::Map::new()
        }
        Err(e) => {
            warn!("request input is not valid JSON, ignoring: {e}");
            serde_json::Map::new()
        }
    }
}

/// Replace every `{{ key }}` occurrence with `value`; whitespace inside the
/// braces does not matter.
fn substitute(template: &str, key: &str, value: &str) -> String {
    let pattern = format!(r"\{{\{{\s*{}\s*\}}\}}", regex::escape(key));
    let re = Regex::new(&pattern).expect("escaped key is a valid pattern");
    re.replace_all(template, NoExpand(value)).into_owned()
}
