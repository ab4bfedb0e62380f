//! End-to-end scenarios: declare, build, project

use pretty_assertions::assert_eq;
use topology::{
    ByMode, EndpointDecl, EnvValue, Error, ExecutionMode, ModeAllocator, NodeId, Packaging,
    Projection, Projector, PublishSpec, Topology, TopologyBuilder, project,
};

fn three_tier(mode: ExecutionMode) -> Topology {
    let mut builder = TopologyBuilder::new(mode);
    let api = builder
        .add_project("api", "../backend")
        .unwrap()
        .with_http_endpoint(5000)
        .publish_as(PublishSpec::generated_image(Some("pets/api".into())).with_compute("container-app"))
        .id();
    let agent = builder
        .add_script("agent", "../agent", "agent.py")
        .unwrap()
        .with_http_endpoint(8001)
        .id();
    let api_http = builder.endpoint(&api, "http");
    let agent_http = builder.endpoint(&agent, "http");
    builder
        .add_frontend("frontend", "../frontend")
        .unwrap()
        .with_http_endpoint(3000)
        .wait_for(&api)
        .wait_for(&agent)
        .with_environment("API_URL", api_http)
        .with_environment("AGENT_URL", agent_http);
    builder.build().unwrap()
}

fn ids(order: &[NodeId]) -> Vec<&str> {
    order.iter().map(NodeId::as_str).collect()
}

#[test]
fn test_run_mode_binds_local_urls() {
    let projection = project(&three_tier(ExecutionMode::Run), ExecutionMode::Run).unwrap();

    assert_eq!(ids(&projection.order), vec!["api", "agent", "frontend"]);
    let frontend = projection.node("frontend").unwrap();
    assert_eq!(frontend.env["API_URL"], "http://localhost:5000");
    assert_eq!(frontend.env["AGENT_URL"], "http://localhost:8001");
    assert!(projection.node("api").unwrap().publish.is_none());
}

#[test]
fn test_publish_mode_uses_https_and_keeps_annotation() {
    let projection = project(&three_tier(ExecutionMode::Publish), ExecutionMode::Publish).unwrap();

    let frontend = projection.node("frontend").unwrap();
    assert_eq!(frontend.env["API_URL"], "https://api.internal:5000");
    assert_eq!(frontend.env["AGENT_URL"], "https://agent.internal:8001");

    let publish = projection.node("api").unwrap().publish.clone().unwrap();
    assert_eq!(
        publish.packaging,
        Packaging::GeneratedImage {
            image: Some("pets/api".into()),
        }
    );
    assert_eq!(publish.compute.as_deref(), Some("container-app"));
}

#[test]
fn test_missing_parameter_fails_whole_projection() {
    let mut builder = TopologyBuilder::new(ExecutionMode::Run);
    let url = builder.declare_parameter("FoundryProjectUrl", None);
    let agent_id = builder.declare_parameter("FoundryAgentId", Some("agent-1".into()));
    builder
        .add_script("chat", "../agent", "agent.py")
        .unwrap()
        .with_http_endpoint(8001)
        .with_environment("AZURE_OPENAI_ENDPOINT", &url)
        .with_environment("AGENT_ID", &agent_id)
        .with_parameter_parent(&url)
        .unwrap();
    builder.add_project("api", "../backend").unwrap().with_http_endpoint(5000);

    let result = project(&builder.build().unwrap(), ExecutionMode::Run);
    assert_eq!(
        result,
        Err(Error::UnresolvedParameter {
            name: "FoundryProjectUrl".into(),
            owner: "chat".into(),
        })
    );
}

#[test]
fn test_supplied_parameter_wins_over_default() {
    let mut builder = TopologyBuilder::new(ExecutionMode::Run);
    let url = builder.declare_parameter("FoundryProjectUrl", Some("https://default".into()));
    builder
        .parameters_mut()
        .supply("FoundryProjectUrl", "https://foundry.example");
    builder
        .add_script("chat", "../agent", "agent.py")
        .unwrap()
        .with_environment("AZURE_OPENAI_ENDPOINT", &url);

    let projection = project(&builder.build().unwrap(), ExecutionMode::Run).unwrap();
    assert_eq!(
        projection.node("chat").unwrap().env["AZURE_OPENAI_ENDPOINT"],
        "https://foundry.example"
    );
}

#[test]
fn test_mutual_dependency_is_a_cycle() {
    let mut builder = TopologyBuilder::new(ExecutionMode::Run);
    let x = builder.add_project("X", "x").unwrap().id();
    let y = builder.add_project("Y", "y").unwrap().wait_for(&x).id();
    builder.add_dependency(&x, &y).unwrap();

    let err = builder.build().unwrap_err();
    assert_eq!(
        err,
        Error::CycleDetected {
            cycle: vec!["X".into(), "Y".into()],
        }
    );
    assert_eq!(err.to_string(), "dependency cycle detected: X -> Y");
}

/// Agents read the frontend URL while the frontend waits for the agents.
fn pets(mode: ExecutionMode) -> Topology {
    let mut builder = TopologyBuilder::new(mode);
    let api = builder
        .add_project("api", "../backend")
        .unwrap()
        .with_http_endpoint(5000)
        .with_environment("ERRORS", EnvValue::by_mode("false", "true"))
        .with_environment("ENABLE_CRUD", EnvValue::by_mode("true", "false"))
        .id();
    let chat = builder
        .add_script("chat", "../agent", "run_agent.py")
        .unwrap()
        .with_endpoint(EndpointDecl::http(8001))
        .with_external_http_endpoints()
        .with_otlp_exporter()
        .id();
    let sitter = builder
        .add_script("sitter", "../sitter-agent", "run_agent.py")
        .unwrap()
        .with_http_endpoint(8002)
        .id();
    let orchestrator = builder
        .add_script("orchestrator", "../orchestrator-agent", "run_agent.py")
        .unwrap()
        .with_http_endpoint(8003)
        .with_environment("LISTINGS_AGENT_URL", EnvValue::from(builder_url("chat")))
        .with_url_of(&sitter, "http")
        .id();
    let frontend = builder
        .add_frontend("frontend", "../frontend")
        .unwrap()
        .with_endpoint(
            EndpointDecl::new("http").with_target_port(ByMode::new(Some(3000), Some(80))),
        )
        .with_external_http_endpoints()
        .with_reference(&api)
        .wait_for(&api)
        .wait_for(&chat)
        .wait_for(&sitter)
        .wait_for(&orchestrator)
        .with_environment("BROWSER", "none")
        .id();

    let frontend_url = builder.endpoint(&frontend, "http");
    for node in [&api, &chat, &sitter, &orchestrator] {
        builder
            .with_environment(node, "FRONTEND_URL", frontend_url.clone())
            .unwrap();
    }
    builder.build().unwrap()
}

fn builder_url(owner: &str) -> String {
    format!("{{{owner}.bindings.http.url}}")
}

#[test]
fn test_forward_references_to_frontend_resolve() {
    let projection = project(&pets(ExecutionMode::Run), ExecutionMode::Run).unwrap();

    assert_eq!(
        ids(&projection.order),
        vec!["api", "chat", "sitter", "orchestrator", "frontend"]
    );
    for agent in ["api", "chat", "sitter", "orchestrator"] {
        assert_eq!(
            projection.node(agent).unwrap().env["FRONTEND_URL"],
            "http://localhost:3000"
        );
    }
    let orchestrator = &projection.node("orchestrator").unwrap().env;
    assert_eq!(orchestrator["LISTINGS_AGENT_URL"], "http://localhost:8001");
    assert_eq!(orchestrator["SITTER_URL"], "http://localhost:8002");

    let frontend = &projection.node("frontend").unwrap().env;
    assert_eq!(frontend["services__api__http__0"], "http://localhost:5000");
    assert_eq!(frontend["BROWSER"], "none");

    assert_eq!(projection.node("api").unwrap().env["ERRORS"], "false");
}

#[test]
fn test_publish_pets_topology() {
    let projector =
        Projector::new(ExecutionMode::Publish).with_allocator(ModeAllocator::with_domain("pets.example"));
    let projection: Projection = projector.project(&pets(ExecutionMode::Publish)).unwrap();

    assert_eq!(
        projection.node("api").unwrap().env["FRONTEND_URL"],
        "https://frontend.pets.example"
    );
    assert_eq!(
        projection.node("orchestrator").unwrap().env["LISTINGS_AGENT_URL"],
        "https://chat.pets.example"
    );
    assert_eq!(projection.node("api").unwrap().env["ENABLE_CRUD"], "false");
    assert_eq!(projection.node("chat").unwrap().env["OTEL_SERVICE_NAME"], "chat");
}

#[test]
fn test_projection_is_idempotent_and_serializable() {
    for mode in [ExecutionMode::Run, ExecutionMode::Publish] {
        let topology = pets(mode);
        let first = project(&topology, mode).unwrap();
        let second = project(&topology, mode).unwrap();
        let rebuilt = project(&pets(mode), mode).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.environments(), rebuilt.environments());

        let bytes = serde_json::to_vec(&first).unwrap();
        assert_eq!(bytes, serde_json::to_vec(&second).unwrap());
        assert_eq!(bytes, serde_json::to_vec(&rebuilt).unwrap());
    }

    let first = project(&pets(ExecutionMode::Run), ExecutionMode::Run).unwrap();

    let waves: Vec<Vec<&str>> = first
        .waves()
        .iter()
        .map(|w| w.iter().map(|n| n.id.as_str()).collect())
        .collect();
    assert_eq!(
        waves,
        vec![vec!["api", "chat", "sitter", "orchestrator"], vec!["frontend"]]
    );
}
