//! Integration tests for the gantry runtime: template in, HTTP semantics out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use gantry::cache::{Cache, MemoryCache};
use gantry::function::{FnHandler, HandlerError};
use gantry::http::{ApiRequest, Method, StatusCode};
use gantry::prelude::*;
use gantry::template::{MemoryFragmentLoader, TemplateError};

const TEMPLATE: &str = r#"
Parameters:
  Environment:
    Type: String
    Default: staging
Mappings:
  Environments:
    staging:
      LogLevel: WARNING
    prod:
      LogLevel: ERROR
Resources:
  ApiGateway:
    Type: AWS::Serverless::Api
    Properties:
      StageName: v1
      DefinitionBody:
        Fn::Transform:
          Name: AWS::Include
          Parameters:
            Location: openapi.yml
  HelloFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: handlers/
      Handler: hello.handle
      Environment:
        Variables:
          LOG_LEVEL: !FindInMap [Environments, !Ref Environment, LogLevel]
  ItemFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: handlers/
      Handler: items.get
  ActiveFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: handlers/
      Handler: items.active
  BrokenFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: handlers/
      Handler: broken.handle
"#;

const OPENAPI: &str = r#"
openapi: "3.0.1"
paths:
  /hello:
    get:
      x-amazon-apigateway-integration:
        type: aws_proxy
        uri: !Sub "arn:aws:apigateway:${AWS::Region}:lambda:path/2015-03-31/functions/${HelloFunction.Arn}/invocations"
  /items/{id}:
    get:
      parameters:
        - name: id
          in: path
          required: true
      x-amazon-apigateway-integration:
        type: aws_proxy
        uri: !Sub "arn:aws:apigateway:${AWS::Region}:lambda:path/2015-03-31/functions/${ItemFunction.Arn}/invocations"
  /items/active:
    get:
      x-amazon-apigateway-integration:
        type: aws_proxy
        uri: !Sub "arn:aws:apigateway:${AWS::Region}:lambda:path/2015-03-31/functions/${ActiveFunction.Arn}/invocations"
  /broken:
    post:
      x-amazon-apigateway-integration:
        type: aws_proxy
        uri: !Sub "arn:aws:apigateway:${AWS::Region}:lambda:path/2015-03-31/functions/${BrokenFunction.Arn}/invocations"
"#;

fn load_template() -> CloudformationTemplate {
    let loader = MemoryFragmentLoader::new().with_fragment("openapi.yml", OPENAPI);
    CloudformationTemplate::from_str(TEMPLATE, IndexMap::new(), Arc::new(loader)).unwrap()
}

fn demo_registry(invocations: Arc<AtomicUsize>) -> Arc<HandlerRegistry> {
    let registry = HandlerRegistry::new();

    let counter = invocations.clone();
    registry
        .register_handler(
            "handlers.hello.handle",
            Arc::new(FnHandler::new(move |_event, ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(InvocationResult::ok("ok")
                    .header("X-Log-Level", ctx.get_env("LOG_LEVEL").cloned().unwrap_or_default()))
            })),
        )
        .unwrap();

    registry
        .register_handler(
            "handlers.items.get",
            Arc::new(FnHandler::new(|event: InvocationEvent, _ctx| {
                let id = event.path_parameters.get("id").cloned().unwrap_or_default();
                Ok(InvocationResult::ok(format!("item:{id}")))
            })),
        )
        .unwrap();

    registry
        .register_handler(
            "handlers.items.active",
            Arc::new(FnHandler::new(|_event, _ctx| Ok(InvocationResult::ok("active")))),
        )
        .unwrap();

    registry
        .register_handler(
            "handlers.broken.handle",
            Arc::new(FnHandler::new(|_event, _ctx| {
                Err(HandlerError::new("kaboom"))
            })),
        )
        .unwrap();

    Arc::new(registry)
}

async fn demo_router() -> (Router, Arc<AtomicUsize>) {
    let invocations = Arc::new(AtomicUsize::new(0));
    let router = Router::from_template(&load_template(), demo_registry(invocations.clone()))
        .await
        .unwrap();
    (router, invocations)
}

#[tokio::test]
async fn test_get_hello_end_to_end() {
    let (router, invocations) = demo_router().await;

    let response = router.dispatch(ApiRequest::new(Method::Get, "/hello")).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text_body(), "ok");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_environment_variables_flow_from_mappings_to_handlers() {
    // Environment defaults to staging; Environments.staging.LogLevel is WARNING.
    let (router, _) = demo_router().await;
    let response = router.dispatch(ApiRequest::new(Method::Get, "/hello")).await;

    let log_level = response
        .headers
        .iter()
        .find(|(name, _)| name == "X-Log-Level")
        .map(|(_, value)| value.as_str());
    assert_eq!(log_level, Some("WARNING"));
}

#[tokio::test]
async fn test_parameter_binding_switches_mapping_branch() {
    let loader = MemoryFragmentLoader::new().with_fragment("openapi.yml", OPENAPI);
    let bindings = IndexMap::from([("Environment".to_string(), "prod".to_string())]);
    let template =
        CloudformationTemplate::from_str(TEMPLATE, bindings, Arc::new(loader)).unwrap();

    assert_eq!(
        template.environment().get("LOG_LEVEL").map(String::as_str),
        Some("ERROR")
    );
}

#[tokio::test]
async fn test_literal_route_wins_over_parameter_route() {
    let (router, _) = demo_router().await;

    let response = router
        .dispatch(ApiRequest::new(Method::Get, "/items/active"))
        .await;
    assert_eq!(response.text_body(), "active");

    let response = router
        .dispatch(ApiRequest::new(Method::Get, "/items/42"))
        .await;
    assert_eq!(response.text_body(), "item:42");
}

#[tokio::test]
async fn test_handler_fault_is_isolated() {
    let (router, _) = demo_router().await;

    let response = router
        .dispatch(ApiRequest::new(Method::Post, "/broken"))
        .await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.text_body().contains("kaboom"));

    // Other routes keep working after the fault.
    let response = router.dispatch(ApiRequest::new(Method::Get, "/hello")).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (router, invocations) = demo_router().await;

    let response = router.dispatch(ApiRequest::new(Method::Get, "/nope")).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_binary_response_round_trip() {
    let payload: &[u8] = b"\x89PNG\r\n\x1a\n";
    let registry = HandlerRegistry::new();
    registry
        .register_handler(
            "handlers.image.handle",
            Arc::new(FnHandler::new(move |_event, _ctx| {
                Ok(InvocationResult::new(200)
                    .header("Content-Type", "image/png")
                    .binary_body(b"\x89PNG\r\n\x1a\n"))
            })),
        )
        .unwrap();

    let source = r#"
Resources:
  ImageFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: handlers/
      Handler: image.handle
      Events:
        Image:
          Type: Api
          Properties:
            Path: /image
            Method: get
"#;
    let template = CloudformationTemplate::from_str(
        source,
        IndexMap::new(),
        Arc::new(MemoryFragmentLoader::new()),
    )
    .unwrap();
    let router = Router::from_template(&template, Arc::new(registry)).await.unwrap();

    let response = router.dispatch(ApiRequest::new(Method::Get, "/image")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], payload);
}

#[tokio::test]
async fn test_binary_request_body_reaches_handler_base64_encoded() {
    let registry = HandlerRegistry::new();
    registry
        .register_handler(
            "handlers.upload.handle",
            Arc::new(FnHandler::new(|event: InvocationEvent, _ctx| {
                assert!(event.is_base64_encoded);
                Ok(InvocationResult::ok(event.body))
            })),
        )
        .unwrap();

    let source = r#"
Resources:
  UploadFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: handlers/
      Handler: upload.handle
      Events:
        Upload:
          Type: Api
          Properties:
            Path: /upload
            Method: post
"#;
    let template = CloudformationTemplate::from_str(
        source,
        IndexMap::new(),
        Arc::new(MemoryFragmentLoader::new()),
    )
    .unwrap();
    let router = Router::from_template(&template, Arc::new(registry)).await.unwrap();

    let request = ApiRequest::new(Method::Post, "/upload")
        .header("Content-Type", "application/octet-stream")
        .body(vec![0u8, 1, 2, 255]);
    let response = router.dispatch(request).await;

    assert_eq!(response.status, StatusCode::OK);
    // AAECvw== is base64 of [0, 1, 2, 255].
    assert_eq!(response.text_body(), "AAECvw==");
}

#[tokio::test]
async fn test_include_cycle_aborts_startup() {
    let loader = MemoryFragmentLoader::new()
        .with_fragment(
            "openapi.yml",
            "Fn::Transform:\n  Parameters:\n    Location: other.yml\n",
        )
        .with_fragment(
            "other.yml",
            "Fn::Transform:\n  Parameters:\n    Location: openapi.yml\n",
        );

    let err =
        CloudformationTemplate::from_str(TEMPLATE, IndexMap::new(), Arc::new(loader)).unwrap_err();
    assert!(matches!(err, TemplateError::CyclicInclude(_)));
}

#[tokio::test]
async fn test_duplicate_routes_across_api_documents_abort_startup() {
    let openapi = r#"
paths:
  /hello:
    get:
      x-amazon-apigateway-integration:
        uri: !Sub "arn:aws:apigateway::lambda:path/2015-03-31/functions/${HelloFunction.Arn}/invocations"
"#;
    let source = r#"
Resources:
  FirstApi:
    Type: AWS::Serverless::Api
    Properties:
      DefinitionBody:
        Fn::Transform:
          Parameters:
            Location: openapi.yml
  SecondApi:
    Type: AWS::Serverless::Api
    Properties:
      DefinitionBody:
        Fn::Transform:
          Parameters:
            Location: openapi.yml
  HelloFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: handlers/
      Handler: hello.handle
"#;
    let loader = MemoryFragmentLoader::new().with_fragment("openapi.yml", openapi);
    let template =
        CloudformationTemplate::from_str(source, IndexMap::new(), Arc::new(loader)).unwrap();

    // Both gateways declare GET /hello; merging them is ambiguous.
    let documents = extract_api_documents(&template).unwrap();
    assert_eq!(documents.len(), 2);
    let err = RouteTable::build(&documents).unwrap_err();
    assert!(matches!(err, gantry::gateway::GatewayError::DuplicateRoute { .. }));
}

#[tokio::test]
async fn test_template_file_loading_with_fragment_include() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("template.yml"), TEMPLATE).unwrap();
    std::fs::write(dir.path().join("openapi.yml"), OPENAPI).unwrap();

    let path = dir.path().join("template.yml");
    let template =
        CloudformationTemplate::from_file(Some(path.to_str().unwrap()), IndexMap::new()).unwrap();

    let documents = extract_api_documents(&template).unwrap();
    let table = RouteTable::build(&documents).unwrap();
    assert_eq!(table.len(), 4);
}

#[tokio::test]
async fn test_resolved_template_is_memoized_through_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("template.yml");
    let source = r#"
Resources:
  HelloFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: handlers/
      Handler: hello.handle
      Events:
        Hello:
          Type: Api
          Properties:
            Path: /hello
            Method: get
"#;
    std::fs::write(&path, source).unwrap();

    let cache = MemoryCache::new();
    let first = CloudformationTemplate::from_file_cached(
        Some(path.to_str().unwrap()),
        IndexMap::new(),
        &cache,
    )
    .await
    .unwrap();

    // With the file gone, the second load can only come from the cache.
    std::fs::remove_file(&path).unwrap();
    let second = CloudformationTemplate::from_file_cached(
        Some(path.to_str().unwrap()),
        IndexMap::new(),
        &cache,
    )
    .await
    .unwrap();

    assert_eq!(first.resolved(), second.resolved());
    assert!(second.resolved().get("HelloFunction").is_some());
}

#[tokio::test]
async fn test_query_and_multi_value_parameters_reach_the_handler() {
    let registry = HandlerRegistry::new();
    registry
        .register_handler(
            "handlers.search.handle",
            Arc::new(FnHandler::new(|event: InvocationEvent, _ctx| {
                let single = event.query_string_parameters.get("tag").cloned();
                let multi = event
                    .multi_value_query_string_parameters
                    .get("tag")
                    .cloned()
                    .unwrap_or_default();
                Ok(InvocationResult::ok(format!(
                    "{}:{}",
                    single.unwrap_or_default(),
                    multi.join(",")
                )))
            })),
        )
        .unwrap();

    let source = r#"
Resources:
  SearchFunction:
    Type: AWS::Serverless::Function
    Properties:
      CodeUri: handlers/
      Handler: search.handle
      Events:
        Search:
          Type: Api
          Properties:
            Path: /search
            Method: get
"#;
    let template = CloudformationTemplate::from_str(
        source,
        IndexMap::new(),
        Arc::new(MemoryFragmentLoader::new()),
    )
    .unwrap();
    let router = Router::from_template(&template, Arc::new(registry)).await.unwrap();

    let request = ApiRequest::new(Method::Get, "/search").query("tag=a&tag=b");
    let response = router.dispatch(request).await;
    assert_eq!(response.text_body(), "b:a,b");
}
