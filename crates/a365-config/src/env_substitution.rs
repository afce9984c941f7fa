use a365_core::{A365Error, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeSet;
use std::env;

// ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex pattern")
});

/// Recursively substitute environment variables in every string of a JSON value.
///
/// All missing variables are collected before failing, so one error names
/// everything that still has to be exported.
pub fn substitute_env_vars(value: &mut Value) -> Result<()> {
    let mut missing = BTreeSet::new();
    substitute_value(value, &mut missing);

    if !missing.is_empty() {
        return Err(A365Error::Config(format!(
            "Missing required environment variables: {}",
            missing.into_iter().collect::<Vec<_>>().join(", ")
        )));
    }
    Ok(())
}

fn substitute_value(value: &mut Value, missing: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            *s = substitute_in_string(s, missing);
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, missing);
            }
        }
        Value::Array(arr) => {
            for v in arr.iter_mut() {
                substitute_value(v, missing);
            }
        }
        _ => {}
    }
}

fn substitute_in_string(input: &str, missing: &mut BTreeSet<String>) -> String {
    ENV_VAR_REGEX
        .replace_all(input, |cap: &Captures| {
            let var_name = &cap[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => match cap.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => {
                        missing.insert(var_name.to_string());
                        String::new()
                    }
                },
            }
        })
        .into_owned()
}
