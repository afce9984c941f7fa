//! Periodic proactive tool calls across every registered agent.

use a365_auth::{TokenEndpoint, TokenExchangePipeline};
use a365_config::{AgentRegistration, ProactiveConfig, ScheduledTask};
use a365_core::{A365Error, Result};
use a365_mcp::{McpClient, ToolCallResult};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::recorder::{InMemoryRecorder, TaskRecorder, TaskRunRecord, TaskStatus};
use crate::template::{render_arguments, TemplateVars};

/// Counts for one pass over the agent registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub agents: usize,
    pub skipped_agents: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub consent_pending: usize,
}

impl TickSummary {
    fn count(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Success => self.succeeded += 1,
            TaskStatus::Error => self.failed += 1,
            TaskStatus::ConsentPending => self.consent_pending += 1,
        }
    }

    pub fn operations(&self) -> usize {
        self.succeeded + self.failed + self.consent_pending
    }
}

pub struct ProactiveScheduler {
    config: Arc<ProactiveConfig>,
    pipeline: TokenExchangePipeline,
    recorder: Arc<dyn TaskRecorder>,
}

impl ProactiveScheduler {
    pub fn new(config: ProactiveConfig, recorder: Arc<dyn TaskRecorder>) -> Result<Self> {
        let endpoint = TokenEndpoint::new(
            config.identity_provider.authority.clone(),
            config.request_timeout(),
        )?;
        let pipeline = TokenExchangePipeline::new(endpoint)
            .with_identity_exchange_scope(config.identity_provider.identity_exchange_scope.clone());

        Ok(Self {
            config: Arc::new(config),
            pipeline,
            recorder,
        })
    }

    /// Scheduler that keeps its run records in memory.
    pub fn from_config(config: ProactiveConfig) -> Result<Self> {
        Self::new(config, Arc::new(InMemoryRecorder::new()))
    }

    pub fn config(&self) -> &ProactiveConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &TokenExchangePipeline {
        &self.pipeline
    }

    /// Loop over [`tick`](Self::tick) until `shutdown` resolves. The first tick
    /// runs immediately; an in-flight tick is abandoned on shutdown.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Proactive scheduler started, interval {}s",
            self.config.scheduler.interval_secs
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Shutdown requested during a tick; abandoning outstanding operations");
                    break;
                }
                summary = self.tick() => {
                    if summary.failed > 0 {
                        warn!("Tick finished with {} failed operation(s), retrying next interval", summary.failed);
                    }
                }
            }
        }

        info!("Proactive scheduler stopped");
    }

    /// One pass over every agent with enabled tasks. Never fails as a whole.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> TickSummary {
        let started = Instant::now();
        let mut summary = TickSummary::default();

        let agents: Vec<&AgentRegistration> = self
            .config
            .agents
            .iter()
            .filter(|agent| agent.enabled_tasks().next().is_some())
            .collect();
        if agents.is_empty() {
            info!("No agents with enabled scheduled tasks, skipping tick");
            return summary;
        }

        info!("Found {} agent(s) with scheduled tasks", agents.len());
        summary.agents = agents.len();
        for agent in agents {
            self.process_agent(agent, &mut summary).await;
        }

        info!(
            "Tick completed in {}ms: {} succeeded, {} failed, {} consent pending",
            started.elapsed().as_millis(),
            summary.succeeded,
            summary.failed,
            summary.consent_pending
        );
        summary
    }

    async fn process_agent(&self, agent: &AgentRegistration, summary: &mut TickSummary) {
        info!(
            "Processing agent: {} (manager: {})",
            agent.agent_user_upn, agent.manager_email
        );

        let missing = self.config.missing_fields(agent);
        if !missing.is_empty() {
            let detail = format!("missing credentials: {}", missing.join(", "));
            error!("Skipping {}: {}", agent.agent_user_upn, detail);
            summary.skipped_agents += 1;
            for task in agent.enabled_tasks() {
                let record = TaskRunRecord::new(
                    &agent.agent_user_upn,
                    &task.name,
                    &task.tool,
                    TaskStatus::Error,
                    &detail,
                    Duration::ZERO,
                );
                self.store(record, summary).await;
            }
            return;
        }

        for task in agent.enabled_tasks() {
            let record = self.execute_task(agent, task).await;
            self.store(record, summary).await;
        }
    }

    async fn store(&self, record: TaskRunRecord, summary: &mut TickSummary) {
        summary.count(record.status);
        if let Err(e) = self.recorder.record(record).await {
            warn!("Could not record task result: {}", e);
        }
    }

    /// Run one task and turn its outcome into a record.
    pub async fn execute_task(&self, agent: &AgentRegistration, task: &ScheduledTask) -> TaskRunRecord {
        info!("Running task '{}' for {}", task.name, agent.agent_user_upn);
        let started = Instant::now();

        let (status, detail) = match self.run_operation(agent, task).await {
            Ok(result) => {
                let text = result.text();
                info!("Task '{}' completed: {}", task.name, preview(&text));
                (TaskStatus::Success, text)
            }
            Err(e) => {
                let status = TaskStatus::of(&e);
                if status == TaskStatus::ConsentPending {
                    warn!("Task '{}' waiting on consent: {}", task.name, e);
                } else {
                    error!("Task '{}' failed: {}", task.name, e);
                }
                (status, e.to_string())
            }
        };

        TaskRunRecord::new(
            &agent.agent_user_upn,
            &task.name,
            &task.tool,
            status,
            &detail,
            started.elapsed(),
        )
    }

    /// A full operation under the configured deadline: fresh token chain,
    /// MCP handshake, one tool call.
    pub async fn run_operation(
        &self,
        agent: &AgentRegistration,
        task: &ScheduledTask,
    ) -> Result<ToolCallResult> {
        let budget = self.config.operation_timeout();
        match timeout(budget, self.operation(agent, task)).await {
            Ok(result) => result,
            Err(_) => Err(A365Error::DeadlineExceeded {
                budget_ms: budget.as_millis() as u64,
            }),
        }
    }

    async fn operation(&self, agent: &AgentRegistration, task: &ScheduledTask) -> Result<ToolCallResult> {
        let server = self.config.tool_server(&task.server)?;
        let settings = self
            .config
            .tool_servers
            .get(&task.server)
            .ok_or_else(|| A365Error::Config(format!("Unknown tool server '{}'", task.server)))?;
        let arguments = render_arguments(&task.arguments, &TemplateVars::for_agent(agent));

        let token = self
            .pipeline
            .acquire_tool_token(
                &self.config.credentials_for(agent),
                &self.config.identity_for(agent),
                &server,
            )
            .await?;

        let mut client = McpClient::connect(
            &server,
            &token,
            &settings.headers,
            Duration::from_secs(settings.timeout_secs),
        )?;
        client.initialize().await?;
        client.call_tool(&task.tool, arguments).await
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 150 {
        format!("{}...", text.chars().take(150).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::MockTaskRecorder;
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, method},
        Mock, MockServer, ResponseTemplate,
    };

    fn config(idp: &MockServer, mcp: &MockServer, extra: &str) -> ProactiveConfig {
        let yaml = format!(
            r#"
tenant_id: contoso
blueprint:
  client_id: blueprint-app
  client_secret: blueprint-secret
identity_provider:
  authority: {idp}
  request_timeout_secs: 2
tool_servers:
  teams:
    url: {mcp}/mcp
    scope: McpServers.Teams.All
    timeout_secs: 2
scheduler:
  interval_secs: 1
  operation_timeout_secs: 2
agents:
  - agent_user_upn: alpha@contoso.com
    agent_identity_client_id: alpha-identity
    agent_user_object_id: alpha-oid
    manager_email: manager@contoso.com
    tasks:
      - name: checkin
        server: teams
        tool: createChat
        arguments:
          members: ["{{manager_email}}"]
{extra}
"#,
            idp = idp.uri(),
            mcp = mcp.uri(),
            extra = extra
        );
        ProactiveConfig::from_yaml_str(&yaml).unwrap()
    }

    async fn mount_tokens(idp: &MockServer) {
        for (needle, token) in [
            ("fmi_path=", "tok1"),
            ("client_assertion=tok1&scope", "tok2"),
            ("grant_type=user_fic", "tok3"),
        ] {
            Mock::given(method("POST"))
                .and(body_string_contains(needle))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "access_token": token, "expires_in": 3600
                })))
                .mount(idp)
                .await;
        }
    }

    async fn mount_mcp(mcp: &MockServer) {
        Mock::given(method("POST"))
            .and(body_string_contains("\"method\":\"initialize\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "result": { "protocolVersion": "2025-03-26", "capabilities": {} }
            })))
            .mount(mcp)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("notifications/initialized"))
            .respond_with(ResponseTemplate::new(202))
            .mount(mcp)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("tools/call"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 2,
                "result": { "content": [{ "type": "text", "text": "{\"id\":\"chat-42\"}" }] }
            })))
            .mount(mcp)
            .await;
    }

    #[tokio::test]
    async fn test_tick_continues_after_incomplete_agent() {
        let idp = MockServer::start().await;
        let mcp = MockServer::start().await;
        mount_tokens(&idp).await;
        mount_mcp(&mcp).await;

        let extra = r#"
  - agent_user_upn: beta@contoso.com
    agent_identity_client_id: beta-identity
    agent_user_object_id: ""
    tasks:
      - name: checkin
        server: teams
        tool: createChat
"#;
        let mut recorder = MockTaskRecorder::new();
        recorder
            .expect_record()
            .withf(|record| record.agent_upn == "beta@contoso.com")
            .times(1)
            .returning(|record| {
                assert_eq!(record.status, TaskStatus::Error);
                assert!(record.detail.contains("agent_user_object_id"));
                Ok(())
            });
        recorder
            .expect_record()
            .withf(|record| record.agent_upn == "alpha@contoso.com")
            .times(1)
            .returning(|record| {
                assert_eq!(record.status, TaskStatus::Success);
                assert!(record.detail.contains("chat-42"));
                // a broken sink must not stop the tick
                Err(A365Error::Io(std::io::Error::other("disk full")))
            });

        let scheduler = ProactiveScheduler::new(config(&idp, &mcp, extra), Arc::new(recorder)).unwrap();
        let summary = scheduler.tick().await;

        assert_eq!(summary.agents, 2);
        assert_eq!(summary.skipped_agents, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_consent_pending_is_recorded_as_such() {
        let idp = MockServer::start().await;
        let mcp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=user_fic"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS65001: consent required",
                "suberror": "consent_required"
            })))
            .mount(&idp)
            .await;
        mount_tokens(&idp).await;

        let scheduler = ProactiveScheduler::from_config(config(&idp, &mcp, "")).unwrap();
        let agent = &scheduler.config().agents[0];
        let record = scheduler.execute_task(agent, &agent.tasks[0]).await;

        assert_eq!(record.status, TaskStatus::ConsentPending);
        assert!(record.detail.contains("AADSTS65001"));
        assert!(mcp.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_identity_provider_hits_operation_deadline() {
        let idp = MockServer::start().await;
        let mcp = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "slow", "expires_in": 3600 }))
                    .set_delay(Duration::from_millis(1500)),
            )
            .mount(&idp)
            .await;

        let scheduler = ProactiveScheduler::from_config(config(&idp, &mcp, "")).unwrap();
        let agent = &scheduler.config().agents[0];
        let err = scheduler
            .run_operation(agent, &agent.tasks[0])
            .await
            .unwrap_err();

        assert!(matches!(err, A365Error::DeadlineExceeded { budget_ms: 2000 }));
        assert!(err.is_retryable_later());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let idp = MockServer::start().await;
        let mcp = MockServer::start().await;
        mount_tokens(&idp).await;
        mount_mcp(&mcp).await;

        let recorder = Arc::new(InMemoryRecorder::new());
        let scheduler = ProactiveScheduler::new(config(&idp, &mcp, ""), recorder.clone()).unwrap();
        scheduler
            .run(tokio::time::sleep(Duration::from_millis(1500)))
            .await;

        let records = recorder.records().await;
        assert!(!records.is_empty());
        assert!(records.iter().all(|record| record.status == TaskStatus::Success));
    }
}
