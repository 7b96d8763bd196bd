//! Integration tests for the URL Rewrite Agent.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use zentinel_agent_url_rewrite::transformer::CollectingSink;
use zentinel_agent_url_rewrite::{
    extract_named_groups, rewrite, AgentConfig, BodyDecision, ExpressionEngine, HeaderCollection,
    ResponseBodyChunkEvent, ResponseHandler, ResponseHeadersEvent, RewriteConfig, Settings,
    UrlRewriteAgent, UrlRewritePolicy,
};

const FROM: &str = r"https?://[^/]*/((.*|/*))";
const TO: &str = "https://apis.example.io/{group[1]}";

fn rewrite_str(subject: &str, from: &str, to: &str) -> String {
    rewrite(subject, from, to, &mut ExpressionEngine::new()).unwrap()
}

// =============================================================================
// Configuration Parsing Tests
// =============================================================================

#[test]
fn test_parse_minimal_config() {
    let yaml = r#"
rewrite:
  from_regex: "http://backend/(.*)"
  to_replacement: "https://public/{group[0]}"
"#;
    let config: AgentConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.version, "1");
    assert!(!config.settings.cache_pattern);
    assert!(!config.settings.debug_headers);
    assert!(!config.rewrite.rewrite_response_headers);
    assert!(!config.rewrite.rewrite_response_body);
}

#[test]
fn test_parse_full_config() {
    let yaml = r#"
version: "1"
settings:
  cache_pattern: true
  debug_headers: true
rewrite:
  rewrite_response_headers: true
  rewrite_response_body: true
  from_regex: "https?://[^/]*/((.*|/*))"
  to_replacement: "https://apis.example.io/{group[1]}"
"#;
    let config: AgentConfig = serde_yaml::from_str(yaml).unwrap();
    assert!(config.settings.cache_pattern);
    assert!(config.settings.debug_headers);
    assert!(config.rewrite.rewrite_response_headers);
    assert!(config.rewrite.rewrite_response_body);
    assert_eq!(config.rewrite.to_replacement, TO);
}

#[test]
fn test_parse_json_config() {
    let json_str = r#"{
        "version": "1",
        "rewrite": {
            "rewriteResponseHeaders": true,
            "fromRegex": "http://internal/(.*)",
            "toReplacement": "https://external/{group[0]}"
        }
    }"#;
    let config: AgentConfig = serde_json::from_str(json_str).unwrap();
    assert!(config.rewrite.rewrite_response_headers);
    assert_eq!(config.rewrite.from_regex, "http://internal/(.*)");
}

#[test]
fn test_agent_rejects_invalid_pattern() {
    let yaml = r#"
rewrite:
  rewrite_response_body: true
  from_regex: "http://(unclosed"
  to_replacement: "x"
"#;
    assert!(UrlRewriteAgent::from_yaml(yaml).is_err());
}

// =============================================================================
// Named Group Extraction Tests
// =============================================================================

#[test]
fn test_extract_named_groups() {
    assert_eq!(
        extract_named_groups(r"(?<year>\d{4})-(?<month>\d{2})"),
        vec!["month".to_string(), "year".to_string()]
    );
}

#[test]
fn test_extract_no_named_groups() {
    assert!(extract_named_groups("(?:abc)(?=def)(?<!ghi)").is_empty());
}

// =============================================================================
// Rewrite Engine Tests
// =============================================================================

#[test]
fn test_identity_on_no_match() {
    let subject = "nothing to see here";
    assert_eq!(rewrite_str(subject, FROM, TO), subject);
}

#[test]
fn test_empty_input() {
    assert_eq!(rewrite_str("", FROM, TO), "");
}

#[test]
fn test_unmatched_spans_preserved() {
    let out = rewrite_str("a1b22c333d", r"\d+", "#");
    assert_eq!(out, "a#b#c#d");
}

#[test]
fn test_named_group_template() {
    let out = rewrite_str(
        "released 2024-05",
        r"(?<year>\d{4})-(?<month>\d{2})",
        "{groupName['month']}/{groupName.year}",
    );
    assert_eq!(out, "released 05/2024");
}

#[test]
fn test_hash_prefixed_template() {
    let out = rewrite_str(
        "https://localgateway/mypath",
        FROM,
        "https://apis.example.io/{#group[1]}",
    );
    assert_eq!(out, "https://apis.example.io/mypath");
}

#[test]
fn test_zero_width_terminates() {
    let out = rewrite_str("abc", "x*", "-");
    assert_eq!(out, "-a-b-c-");
}

#[test]
fn test_look_around_pattern() {
    let out = rewrite_str(
        "Location: http://backend:8080/users",
        r"(?<=://)backend:8080(?=/)",
        "apis.example.io",
    );
    assert_eq!(out, "Location: http://apis.example.io/users");
}

#[test]
fn test_multi_match_body() {
    let body = r#"{"links":["http://h/mypath/toto","http://h/mypath/tata"]}"#;
    let out = rewrite_str(
        body,
        r#"https?://[^/]*/([^"]*)"#,
        "https://apis.example.io/{group[0]}",
    );
    assert_eq!(
        out,
        r#"{"links":["https://apis.example.io/mypath/toto","https://apis.example.io/mypath/tata"]}"#
    );
}

// =============================================================================
// Policy Tests
// =============================================================================

#[test]
fn test_policy_location_header() {
    let policy =
        UrlRewritePolicy::new(RewriteConfig::new(FROM, TO).with_headers(true), &Settings::default())
            .unwrap();

    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    headers.insert(
        "Location".to_string(),
        vec!["https://localgateway/mypath".to_string()],
    );

    policy
        .on_response_headers(&mut headers, &mut ExpressionEngine::new())
        .unwrap();
    assert_eq!(headers["Location"], vec!["https://apis.example.io/mypath"]);
}

#[test]
fn test_policy_header_failure_is_atomic() {
    let rule = RewriteConfig::new(r"http://(\w+)", "{groupName['host']}").with_headers(true);
    let policy = UrlRewritePolicy::new(rule, &Settings::default()).unwrap();

    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    headers.insert("Location".to_string(), vec!["http://backend".to_string()]);
    let before = headers.clone();

    assert!(policy
        .on_response_headers(&mut headers, &mut ExpressionEngine::new())
        .is_err());
    assert_eq!(headers, before);
}

#[test]
fn test_policy_no_stage_when_body_disabled() {
    let policy =
        UrlRewritePolicy::new(RewriteConfig::new(FROM, TO).with_headers(true), &Settings::default())
            .unwrap();
    assert!(policy
        .on_response_body_stage(ExpressionEngine::new(), CollectingSink::new())
        .is_none());
}

#[test]
fn test_policy_empty_body_flush() {
    let policy =
        UrlRewritePolicy::new(RewriteConfig::new(FROM, TO).with_body(true), &Settings::default())
            .unwrap();
    let mut stage = policy
        .on_response_body_stage(ExpressionEngine::new(), CollectingSink::new())
        .unwrap();

    stage.end().unwrap();
    let sink = stage.into_downstream();
    assert_eq!(sink.chunks(), &[Bytes::new()]);
    assert!(sink.is_ended());
}

#[test]
fn test_policy_write_after_flush_rejected() {
    let policy =
        UrlRewritePolicy::new(RewriteConfig::new(FROM, TO).with_body(true), &Settings::default())
            .unwrap();
    let mut stage = policy
        .on_response_body_stage(ExpressionEngine::new(), CollectingSink::new())
        .unwrap();

    stage.end().unwrap();
    assert!(stage.write(b"late").is_err());
}

// =============================================================================
// Agent Tests
// =============================================================================

fn make_agent(headers: bool, body: bool) -> UrlRewriteAgent {
    let rule = RewriteConfig::new(FROM, TO)
        .with_headers(headers)
        .with_body(body);
    UrlRewriteAgent::new(AgentConfig::new(rule)).unwrap()
}

fn response(id: &str, content_length: usize) -> ResponseHeadersEvent {
    let mut headers = HashMap::new();
    headers.insert(
        "Location".to_string(),
        vec!["http://localhost:8082/mypath".to_string()],
    );
    headers.insert(
        "Content-Length".to_string(),
        vec![content_length.to_string()],
    );
    ResponseHeadersEvent {
        correlation_id: id.to_string(),
        status: 200,
        headers,
    }
}

fn body_chunk(id: &str, data: &str, is_last: bool) -> ResponseBodyChunkEvent {
    ResponseBodyChunkEvent {
        correlation_id: id.to_string(),
        data: Bytes::copy_from_slice(data.as_bytes()),
        is_last,
    }
}

#[tokio::test]
async fn test_agent_body_passthrough_when_disabled() {
    let agent = make_agent(true, false);
    let decision = agent.on_response_headers(response("r1", 10)).await.unwrap();
    assert_eq!(decision.headers.first("Content-Length"), Some("10".to_string()));

    let out = agent
        .on_response_body_chunk(body_chunk("r1", "http://h/x", true))
        .await
        .unwrap();
    assert_eq!(out, BodyDecision::Passthrough(Bytes::from_static(b"http://h/x")));
}

#[tokio::test]
async fn test_agent_body_rewritten_on_last_chunk() {
    let agent = make_agent(true, true);
    let decision = agent.on_response_headers(response("r1", 64)).await.unwrap();

    assert!(decision.body_rewrite);
    assert_eq!(decision.headers.first("Content-Length"), None);
    assert_eq!(
        decision.headers.first("Transfer-Encoding"),
        Some("chunked".to_string())
    );
    assert_eq!(
        decision.headers.first("Location"),
        Some("https://apis.example.io/mypath".to_string())
    );

    let chunks = ["{\"link\": \"http://local", "host:8082/mypath/toto", "\"}"];
    let mut outputs = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let out = agent
            .on_response_body_chunk(body_chunk("r1", chunk, i == chunks.len() - 1))
            .await
            .unwrap();
        outputs.push(out);
    }

    assert_eq!(outputs[0], BodyDecision::Buffered);
    assert_eq!(outputs[1], BodyDecision::Buffered);
    // The pattern's `.*` also takes the trailing JSON punctuation.
    assert_eq!(
        outputs[2],
        BodyDecision::Replaced(Bytes::from_static(
            b"{\"link\": \"https://apis.example.io/mypath/toto\"}"
        ))
    );
}

#[tokio::test]
async fn test_agent_concurrent_responses_are_isolated() {
    let agent = make_agent(false, true);
    agent.on_response_headers(response("a", 0)).await.unwrap();
    agent.on_response_headers(response("b", 0)).await.unwrap();
    assert_eq!(agent.in_flight().await, 2);

    agent
        .on_response_body_chunk(body_chunk("a", "http://h/", false))
        .await
        .unwrap();
    agent
        .on_response_body_chunk(body_chunk("b", "plain ", false))
        .await
        .unwrap();

    let b = agent
        .on_response_body_chunk(body_chunk("b", "text", true))
        .await
        .unwrap();
    let a = agent
        .on_response_body_chunk(body_chunk("a", "first", true))
        .await
        .unwrap();

    assert_eq!(b, BodyDecision::Replaced(Bytes::from_static(b"plain text")));
    assert_eq!(
        a,
        BodyDecision::Replaced(Bytes::from_static(b"https://apis.example.io/first"))
    );
    assert_eq!(agent.in_flight().await, 0);
}

#[tokio::test]
async fn test_agent_empty_body() {
    let agent = make_agent(false, true);
    agent.on_response_headers(response("r1", 0)).await.unwrap();

    let out = agent
        .on_response_body_chunk(body_chunk("r1", "", true))
        .await
        .unwrap();
    assert_eq!(out, BodyDecision::Replaced(Bytes::new()));
}

#[tokio::test]
async fn test_agent_abort() {
    let agent = make_agent(false, true);
    agent.on_response_headers(response("r1", 0)).await.unwrap();
    agent
        .on_response_body_chunk(body_chunk("r1", "http://h/partial", false))
        .await
        .unwrap();

    agent.on_response_aborted("r1").await;
    agent.on_response_aborted("unknown").await;
    assert_eq!(agent.in_flight().await, 0);
}

#[tokio::test]
async fn test_agent_stats() {
    let agent = make_agent(true, true);
    agent.on_response_headers(response("r1", 5)).await.unwrap();
    agent
        .on_response_body_chunk(body_chunk("r1", "http://h/x", true))
        .await
        .unwrap();

    let stats = agent.stats();
    assert_eq!(stats.responses_total, 1);
    assert_eq!(stats.headers_rewritten, 1);
    assert_eq!(stats.bodies_rewritten, 1);
    assert_eq!(stats.rewrite_errors, 0);
}

#[tokio::test]
async fn test_agent_bodyless_response() {
    let agent = make_agent(true, true);
    let mut event = response("r1", 0);
    event.status = 304;
    agent.on_response_headers(event).await.unwrap();
    assert_eq!(agent.in_flight().await, 1);

    let body = agent.on_response_complete("r1").await.unwrap();
    assert_eq!(body, Some(Bytes::new()));
    assert_eq!(agent.in_flight().await, 0);
}

#[tokio::test]
async fn test_agent_body_rejected_after_header_failure() {
    let rule = RewriteConfig::new(r"http://(\w+)", "{groupName['host']}")
        .with_headers(true)
        .with_body(true);
    let agent = UrlRewriteAgent::new(AgentConfig::new(rule)).unwrap();

    assert!(agent.on_response_headers(response("r1", 5)).await.is_err());
    assert!(agent
        .on_response_body_chunk(body_chunk("r1", "http://h/x", true))
        .await
        .is_err());
    assert_eq!(agent.in_flight().await, 0);
}
