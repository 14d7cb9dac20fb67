//! Key-fact extraction from exposé text.

use serde_json::Value;
use tracing::{debug, instrument, warn};

use exposecast_llm::{TextModel, parse_structured, prompts, strip_code_fences};
use exposecast_shared::KeyFacts;

/// Ask the model for the key facts of `text` and map its answer onto [`KeyFacts`].
///
/// Never fails: empty output, unparsable output or a JSON shape that does
/// not fit the schema all yield [`KeyFacts::default`]. Unknown keys are
/// ignored and absent keys stay unset.
#[instrument(skip_all, fields(chars = text.len()))]
pub async fn extract_facts(model: &dyn TextModel, text: &str) -> KeyFacts {
    let prompt = prompts::key_facts(text);
    let raw = model.complete(&prompt.system, &prompt.user).await;
    facts_from_output(&raw)
}

/// Interpret raw model output as key facts.
pub fn facts_from_output(raw: &str) -> KeyFacts {
    let Some(value) = parse_structured(strip_code_fences(raw)) else {
        debug!("no structured key facts in model output");
        return KeyFacts::default();
    };

    // A sequence of objects counts only when it holds exactly one.
    let value = match value {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        Value::Array(items) if items.is_empty() => {
            debug!("model returned no key facts");
            return KeyFacts::default();
        }
        other => other,
    };

    if !value.is_object() {
        warn!(kind = json_kind(&value), "key facts output is not an object");
        return KeyFacts::default();
    }

    match serde_json::from_value::<KeyFacts>(value) {
        Ok(facts) => facts,
        Err(e) => {
            warn!(error = %e, "key facts output does not match the schema");
            KeyFacts::default()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
