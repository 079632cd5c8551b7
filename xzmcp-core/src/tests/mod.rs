//! End-to-end scenarios driving the wired-together components through
//! `ServiceManager`/`CustomToolHandlerManager`/`StatusService` rather than
//! exercising one module in isolation.

mod scripted_transport;

use crate::cache::ToolCache;
use crate::config::{
    BackoffStrategy, ConnectionConfig, CustomMcpConfig, McpEndpoint, ModelScopeConfig, PingPolicy, PlatformsConfig,
    ReconnectPolicy, RuntimeConfig, ServiceConfig, WebUiConfig,
};
use crate::custom_tool::{CustomTool, CustomToolHandler, CustomToolHandlerManager};
use crate::downstream::McpService;
use crate::event_bus::{EventBus, TOPIC_STATUS_UPDATED};
use crate::protocol::Tool;
use crate::service_manager::ServiceManager;
use crate::status::{LivenessStatus, StatusService};
use crate::upstream::EndpointManager;
use scripted_transport::ScriptedTransport;
use std::collections::HashMap;
use std::sync::Arc;

fn unique_path(label: &str) -> std::path::PathBuf {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    std::env::temp_dir().join(format!("xzmcp-it-{label}-{}-{}.json", std::process::id(), n))
}

fn stub_tool(name: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: None,
        input_schema: serde_json::json!({ "type": "object" }),
        service_name: None,
        original_name: None,
    }
}

fn stdio_config() -> ServiceConfig {
    ServiceConfig::Stdio {
        command: "unused-in-test".into(),
        args: vec![],
        env: HashMap::new(),
        reconnect: ReconnectPolicy::default(),
        ping: PingPolicy { enabled: false, ..PingPolicy::default() },
        timeout: 1000,
    }
}

fn sse_config() -> ServiceConfig {
    ServiceConfig::Sse {
        url: "https://example.invalid/sse".into(),
        headers: HashMap::new(),
        reconnect: ReconnectPolicy::default(),
        ping: PingPolicy { enabled: false, ..PingPolicy::default() },
        timeout: 1000,
    }
}

fn empty_config() -> RuntimeConfig {
    RuntimeConfig {
        mcp_endpoint: McpEndpoint::Single("wss://example.invalid".into()),
        mcp_servers: HashMap::new(),
        mcp_server_config: HashMap::new(),
        custom_mcp: CustomMcpConfig::default(),
        platforms: PlatformsConfig::default(),
        web_ui: WebUiConfig::default(),
        connection: ConnectionConfig::default(),
        modelscope: ModelScopeConfig::default(),
    }
}

fn fresh_service_manager(label: &str) -> (Arc<ServiceManager>, Arc<CustomToolHandlerManager>, Arc<EventBus>) {
    let events = Arc::new(EventBus::new());
    let custom_tools = Arc::new(CustomToolHandlerManager::new(String::new()));
    let cache = ToolCache::new(unique_path(label));
    let manager = ServiceManager::new(Arc::clone(&custom_tools), cache, Arc::clone(&events));
    (manager, custom_tools, events)
}

/// Seed scenario 1: two downstream services aggregate under the `xzcli`
/// prefix, and an aggregated tool call round-trips to the right service.
#[tokio::test]
async fn happy_path_aggregation_across_two_services() {
    let (manager, _custom_tools, _events) = fresh_service_manager("scenario1");

    let calculator = Arc::new(McpService::with_transport(
        "calculator",
        stdio_config(),
        Box::new(ScriptedTransport::new(
            vec![stub_tool("add"), stub_tool("sub")],
            |name, args| match name {
                "add" => Ok((args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)).to_string()),
                "sub" => Ok((args["a"].as_i64().unwrap_or(0) - args["b"].as_i64().unwrap_or(0)).to_string()),
                other => Err(format!("unknown tool '{other}'")),
            },
        )),
    ));
    manager.add_service("calculator".into(), calculator).await;

    let weather = Arc::new(McpService::with_transport(
        "weather",
        sse_config(),
        Box::new(ScriptedTransport::new(vec![stub_tool("forecast")], |_, _| Ok("sunny".into()))),
    ));
    manager.add_service("weather".into(), weather).await;

    let config = empty_config();
    let mut names: Vec<String> = manager.get_all_tools(&config).await.into_iter().map(|t| t.name).collect();
    names.sort();
    assert_eq!(names, vec!["calculator_xzcli_add", "calculator_xzcli_sub", "weather_xzcli_forecast"]);

    let result = manager.call_tool(&config, "calculator_xzcli_add", serde_json::json!({"a": 2, "b": 3})).await.unwrap();
    assert_eq!(result.content[0].text, "5");
    assert!(!result.is_error);

    let stats = manager.downstream_stats_for("calculator_xzcli_add").unwrap();
    assert_eq!(stats.usage_count, 1);
    assert!(stats.last_used_time.is_some());
    assert!(manager.downstream_stats_for("calculator_xzcli_sub").is_none());
}

/// Seed scenario 2: a custom tool registered under an already-aggregated name
/// shadows the downstream mapping it collides with.
#[tokio::test]
async fn custom_tool_shadows_downstream_call() {
    let (manager, custom_tools, _events) = fresh_service_manager("scenario2");

    let calculator = Arc::new(McpService::with_transport(
        "calculator",
        stdio_config(),
        Box::new(ScriptedTransport::new(
            vec![stub_tool("add"), stub_tool("sub")],
            |name, args| match name {
                "add" => Ok((args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0)).to_string()),
                "sub" => Ok((args["a"].as_i64().unwrap_or(0) - args["b"].as_i64().unwrap_or(0)).to_string()),
                other => Err(format!("unknown tool '{other}'")),
            },
        )),
    ));
    manager.add_service("calculator".into(), calculator).await;

    custom_tools
        .add_tool(CustomTool {
            name: "calculator_xzcli_add".into(),
            description: None,
            input_schema: serde_json::json!({ "type": "object" }),
            handler: CustomToolHandler::Mcp { service_name: "calculator".into(), tool_name: "sub".into() },
        })
        .await
        .unwrap();

    let config = empty_config();
    let result = manager.call_tool(&config, "calculator_xzcli_add", serde_json::json!({"a": 10, "b": 3})).await.unwrap();
    assert_eq!(result.content[0].text, "7");
}

/// Seed scenario 3: the Coze proxy handler POSTs to the configured workflow
/// endpoint with a bearer token and wraps the `result` field as MCP content.
#[tokio::test]
async fn coze_proxy_wraps_workflow_result_as_tool_content() {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/workflow/run"))
        .and(header("Authorization", "Bearer T"))
        .and(body_json(serde_json::json!({ "workflow_id": "W1", "parameters": { "name": "a" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": "hi a" })))
        .mount(&server)
        .await;

    let custom_tools = Arc::new(CustomToolHandlerManager::new("T".to_string()));
    custom_tools
        .add_tool(CustomTool {
            name: "coze_hello".into(),
            description: None,
            input_schema: serde_json::json!({ "type": "object" }),
            handler: CustomToolHandler::Proxy { workflow_id: "W1".into(), base_url: Some(format!("{}/v1/workflow/run", server.uri())) },
        })
        .await
        .unwrap();

    let result = custom_tools
        .call_tool("coze_hello", serde_json::json!({"name": "a"}), &crate::custom_tool::NullDispatch)
        .await
        .unwrap();
    assert_eq!(result.content[0].text, "\"hi a\"");
    assert!(!result.is_error);
}

/// Seed scenario 4: three consecutive ping-probe timeouts trip the liveness
/// threshold, the service enters reconnecting with `attempts == 1`, and a
/// subsequent successful reconnect resets both counters to zero.
#[tokio::test(start_paused = true)]
async fn ping_driven_recovery_resets_after_successful_reconnect() {
    let mut reconnect = ReconnectPolicy::default();
    reconnect.backoff_strategy = BackoffStrategy::Fixed;
    reconnect.initial_interval = 10;
    reconnect.jitter = false;
    let config = ServiceConfig::Stdio {
        command: "unused-in-test".into(),
        args: vec![],
        env: HashMap::new(),
        reconnect,
        ping: PingPolicy { enabled: true, interval: 100, timeout: 50, max_failures: 3, start_delay: 0 },
        timeout: 1000,
    };
    let transport = ScriptedTransport::new(vec![stub_tool("add")], |_, _| Ok("ok".into()));
    transport.set_hang_receive(true);
    let service = Arc::new(McpService::with_transport("flaky", config, Box::new(transport)));

    // Three consecutive probe timeouts: each `probe_once` races the hung
    // `tools/list` against the 50ms ping timeout, which always loses.
    assert!(!service.probe_once().await);
    assert!(!service.probe_once().await);
    assert!(service.probe_once().await);
    assert_eq!(service.ping_failure_count(), 3);

    service.enter_reconnect_loop().await;
    assert_eq!(service.reconnect_attempts().await, 0);
    assert_eq!(service.ping_failure_count(), 0);
    assert_eq!(service.state().await, crate::downstream::ConnectionState::Connected);
}

/// Seed scenario 5: removing one of two endpoints drops it from
/// `get_endpoints`/`is_endpoint_connected` without disturbing the other.
#[tokio::test]
async fn endpoint_removal_stops_only_that_connection() {
    let events = Arc::new(EventBus::new());
    let (manager, custom_tools, _) = fresh_service_manager("scenario5");
    let message_handler = Arc::new(crate::message_handler::MessageHandler::new(Arc::clone(&manager)));
    let _ = custom_tools;
    let endpoint_manager = EndpointManager::new(message_handler, events);

    // Endpoint connects are outbound HTTP dials; against invalid hosts they
    // simply fail to connect, which is enough to exercise add/remove/list
    // bookkeeping without a live server.
    endpoint_manager.add_endpoint("http://e1.invalid/mcp".into()).await;
    endpoint_manager.add_endpoint("http://e2.invalid/mcp".into()).await;
    assert_eq!(endpoint_manager.get_endpoints().await.len(), 2);

    endpoint_manager.connect().await;
    endpoint_manager.remove_endpoint("http://e1.invalid/mcp").await;
    let remaining = endpoint_manager.get_endpoints().await;
    assert_eq!(remaining, vec!["http://e2.invalid/mcp".to_string()]);
    assert!(!endpoint_manager.is_endpoint_connected("http://e1.invalid/mcp").await);
}

/// Seed scenario 6: a single heartbeat at `t=0` with no further traffic
/// flips status to disconnected at `t=35s`, with `lastHeartbeat` unchanged.
#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_flips_status_and_preserves_last_heartbeat() {
    let events = Arc::new(EventBus::new());
    let mut updates = events.subscribe(TOPIC_STATUS_UPDATED).unwrap();
    let status = StatusService::new(Arc::clone(&events), vec!["wss://example.invalid".into()]);

    status.heartbeat().await;
    let stamped = status.snapshot().await.last_heartbeat;

    tokio::time::advance(std::time::Duration::from_secs(35) + std::time::Duration::from_millis(100)).await;
    let event = updates.recv().await.unwrap();

    assert_eq!(event.payload["status"], "disconnected");
    assert_eq!(event.payload["lastHeartbeat"], serde_json::to_value(stamped).unwrap());
    assert_eq!(status.snapshot().await.status, LivenessStatus::Disconnected);
}
