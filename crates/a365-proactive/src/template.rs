//! Runtime substitution into scheduled task arguments.

use a365_config::AgentRegistration;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// Values available to `{placeholder}`s in task arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    pub manager_email: String,
    pub agent_upn: String,
    pub timestamp: String,
}

impl TemplateVars {
    pub fn for_agent(agent: &AgentRegistration) -> Self {
        Self {
            manager_email: agent.manager_email.clone(),
            agent_upn: agent.agent_user_upn.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false),
        }
    }

    fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("{manager_email}", self.manager_email.as_str()),
            // older task definitions use this name
            ("{target_email}", self.manager_email.as_str()),
            ("{agent_upn}", self.agent_upn.as_str()),
            ("{timestamp}", self.timestamp.as_str()),
        ]
    }
}

/// Render every string in `template`. Unknown placeholders are left untouched.
pub fn render_arguments(template: &Value, vars: &TemplateVars) -> Value {
    match template {
        Value::String(s) => Value::String(render_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|item| render_arguments(item, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), render_arguments(value, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_str(s: &str, vars: &TemplateVars) -> String {
    if !s.contains('{') {
        return s.to_string();
    }
    vars.pairs()
        .into_iter()
        .fold(s.to_string(), |acc, (placeholder, value)| acc.replace(placeholder, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> TemplateVars {
        TemplateVars {
            manager_email: "manager@contoso.com".into(),
            agent_upn: "agent@contoso.com".into(),
            timestamp: "2026-10-14T08:00:00+00:00".into(),
        }
    }

    #[test]
    fn test_renders_nested_values() {
        let template = json!({
            "members": ["{manager_email}", "{agent_upn}"],
            "message": { "content": "Check-in for {target_email} at {timestamp}" },
            "count": 2,
            "urgent": false
        });

        let rendered = render_arguments(&template, &vars());
        assert_eq!(
            rendered,
            json!({
                "members": ["manager@contoso.com", "agent@contoso.com"],
                "message": { "content": "Check-in for manager@contoso.com at 2026-10-14T08:00:00+00:00" },
                "count": 2,
                "urgent": false
            })
        );
    }

    #[test]
    fn test_unknown_placeholders_are_kept() {
        let rendered = render_arguments(&json!("{greeting}, {manager_email} {"), &vars());
        assert_eq!(rendered, json!("{greeting}, manager@contoso.com {"));
    }

    #[test]
    fn test_timestamp_has_seconds_precision() {
        let agent: AgentRegistration = serde_json::from_value(json!({
            "agent_user_upn": "agent@contoso.com",
            "agent_identity_client_id": "agent-identity",
            "agent_user_object_id": "agent-oid"
        }))
        .unwrap();
        let vars = TemplateVars::for_agent(&agent);
        assert!(vars.timestamp.ends_with("+00:00"));
        assert!(!vars.timestamp.contains('.'));
        assert!(vars.manager_email.is_empty());
    }
}
