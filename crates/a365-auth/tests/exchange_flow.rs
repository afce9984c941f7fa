use std::time::Duration;

use a365_auth::{TokenEndpoint, TokenExchangePipeline};
use a365_core::{A365Error, CredentialSet, ExchangeStage, IdentityReference, ToolServer};
use serde_json::json;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

const TOKEN_PATH: &str = "/contoso/oauth2/v2.0/token";

fn credentials() -> CredentialSet {
    CredentialSet::new("contoso", "blueprint-app", "blueprint-secret", "agent-identity")
}

fn identity() -> IdentityReference {
    IdentityReference::new("agent@contoso.com", "agent-oid").with_target_user("manager@contoso.com")
}

fn teams() -> ToolServer {
    ToolServer::new("teams", "http://localhost/mcp").with_scope("McpServers.Teams.All")
}

fn pipeline(server: &MockServer) -> TokenExchangePipeline {
    TokenExchangePipeline::new(TokenEndpoint::new(server.uri(), Duration::from_secs(5)).unwrap())
}

async fn mount_identity_provider(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("fmi_path=agent-identity"))
        .and(body_string_contains("client_secret=blueprint-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok1", "expires_in": 3600, "token_type": "Bearer"
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_assertion=tok1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok2", "expires_in": 3600, "token_type": "Bearer"
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=user_fic"))
        .and(body_string_contains("client_assertion=tok1"))
        .and(body_string_contains("user_federated_identity_credential=tok2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok3", "expires_in": 3599, "token_type": "Bearer"
        })))
        .mount(server)
        .await;
}

async fn request_bodies(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| String::from_utf8_lossy(&request.body).into_owned())
        .collect()
}

#[tokio::test]
async fn issues_three_distinct_tokens_in_order() {
    let server = MockServer::start().await;
    mount_identity_provider(&server).await;

    let tokens = pipeline(&server)
        .acquire_token_set(&credentials(), &identity(), &teams())
        .await
        .unwrap();

    assert_eq!(tokens.exchange.secret(), "tok1");
    assert_eq!(tokens.resource.secret(), "tok2");
    assert_eq!(tokens.final_token.secret(), "tok3");
    assert_ne!(tokens.exchange.secret(), tokens.resource.secret());
    assert_ne!(tokens.resource.secret(), tokens.final_token.secret());
    assert!(!tokens.final_token.is_empty());

    let bodies = request_bodies(&server).await;
    assert_eq!(bodies.len(), 3);
    assert!(bodies[0].contains("fmi_path=agent-identity"));
    assert!(bodies[1].contains("client_assertion=tok1"));
    assert!(!bodies[1].contains("user_fic"));
    assert!(bodies[2].contains("grant_type=user_fic"));
    assert!(bodies[2].contains("user_federated_identity_credential=tok2"));
}

#[tokio::test]
async fn blueprint_failure_stops_the_chain() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = pipeline(&server)
        .acquire_tool_token(&credentials(), &identity(), &teams())
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(ExchangeStage::Blueprint));
    assert!(matches!(err, A365Error::CredentialExchange { ref error, .. } if error == "invalid_client"));
    assert_eq!(request_bodies(&server).await.len(), 1);
}

#[tokio::test]
async fn consent_pending_on_final_stage_is_not_a_generic_exchange_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("grant_type=user_fic"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "suberror": "consent_required"
        })))
        .mount(&server)
        .await;
    mount_identity_provider(&server).await;

    let err = pipeline(&server)
        .acquire_tool_token(&credentials(), &identity(), &teams())
        .await
        .unwrap_err();

    assert!(err.is_consent_pending());
    assert!(err.is_credential_exchange());
    assert!(!matches!(err, A365Error::CredentialExchange { .. }));
}

#[tokio::test]
async fn repeated_runs_are_independent() {
    let server = MockServer::start().await;
    mount_identity_provider(&server).await;
    let pipeline = pipeline(&server);

    let first = pipeline
        .acquire_token_set(&credentials(), &identity(), &teams())
        .await
        .unwrap();
    let second = pipeline
        .acquire_token_set(&credentials(), &identity(), &teams())
        .await
        .unwrap();

    assert_eq!(first.final_token.secret(), second.final_token.secret());
    assert!(!first.final_token.is_expired());
    assert!(!second.final_token.is_expired());
    // Both runs performed the full chain; nothing came from a cache.
    assert_eq!(request_bodies(&server).await.len(), 6);
}
