use actix_http::Request;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::{test, web, App, Error};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use tangent::completion::{CompletionError, CompletionService, GenerationParams, PromptMessage};
use tangent::server::{app_config, json_config};
use tangent::store::{ConversationStore, Role};
use tangent::ChatService;

/// Echoes the last user turn and remembers every prompt it was given
#[derive(Default)]
struct EchoCompletion {
    prompts: Mutex<Vec<Vec<PromptMessage>>>,
    fail: bool,
}

#[async_trait]
impl CompletionService for EchoCompletion {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        _params: &GenerationParams,
    ) -> Result<String, CompletionError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        if self.fail {
            return Err(CompletionError::Api("HTTP 500: upstream down".into()));
        }
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        Ok(format!("echo: {}", last))
    }
}

async fn create_test_app(
    completion: Arc<EchoCompletion>,
) -> (
    impl Service<Request, Response = ServiceResponse, Error = Error>,
    Arc<ChatService>,
) {
    let store = Arc::new(ConversationStore::open_in_memory().unwrap());
    let service = Arc::new(ChatService::new(
        store,
        completion,
        GenerationParams::default(),
    ));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(service.clone()))
            .app_data(json_config())
            .configure(app_config),
    )
    .await;

    (app, service)
}

#[actix_web::test]
async fn test_chat_without_conversation_creates_one() {
    let (app, service) = create_test_app(Arc::new(EchoCompletion::default())).await;

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(json!({ "message": "Hello" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["reply"], "echo: Hello");
    assert_eq!(body["isNewBranch"], false);
    let conversation_id = body["conversationId"].as_i64().unwrap();

    let messages = service.store().list_messages(conversation_id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Hello");
    assert_eq!(messages[1].role, Role::Assistant);
}

#[actix_web::test]
async fn test_chat_requires_message() {
    let (app, _) = create_test_app(Arc::new(EchoCompletion::default())).await;

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(json!({ "message": "" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Message is required");
}

#[actix_web::test]
async fn test_malformed_body_gets_error_object() {
    let (app, _) = create_test_app(Arc::new(EchoCompletion::default())).await;

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].is_string());
}

#[actix_web::test]
async fn test_chat_with_unknown_conversation_is_404() {
    let (app, _) = create_test_app(Arc::new(EchoCompletion::default())).await;

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(json!({ "message": "hi", "conversationId": 12345 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_completion_failure_is_generic_500() {
    let completion = Arc::new(EchoCompletion {
        fail: true,
        ..EchoCompletion::default()
    });
    let (app, service) = create_test_app(completion).await;
    let conversation_id = service.store().create_conversation().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(json!({ "message": "hi", "conversationId": conversation_id }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "error": "Internal server error" }));

    // The user turn stays persisted
    assert_eq!(service.store().list_messages(conversation_id).unwrap().len(), 1);
}

#[actix_web::test]
async fn test_list_conversations_and_messages() {
    let (app, service) = create_test_app(Arc::new(EchoCompletion::default())).await;
    let store = service.store();
    let older = store.create_conversation().unwrap();
    store.insert_message(older, Role::User, "first words", None).unwrap();
    let newer = store.create_conversation().unwrap();

    let req = test::TestRequest::get().uri("/api/conversations").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["id"], newer);
    assert_eq!(listed[0]["first_message"], Value::Null);
    assert_eq!(listed[1]["id"], older);
    assert_eq!(listed[1]["first_message"], "first words");
    assert_eq!(listed[1]["title"], format!("Chat {}", older));

    let req = test::TestRequest::get()
        .uri(&format!("/api/conversations/{}/messages", older))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body[0]["role"], "user");
    assert_eq!(body[0]["content"], "first words");

    let req = test::TestRequest::get()
        .uri("/api/conversations/999/messages")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_branch_then_chat_carries_ancestry() {
    let completion = Arc::new(EchoCompletion::default());
    let (app, service) = create_test_app(completion.clone()).await;
    let store = service.store();

    let a = store.create_conversation().unwrap();
    let question = store.insert_message(a, Role::User, "Tell me about X", None).unwrap();
    let answer = store.insert_message(a, Role::Assistant, "X is...", None).unwrap();

    let req = test::TestRequest::post()
        .uri("/api/branch")
        .set_json(json!({ "messageId": answer, "selectedText": "X is...", "conversationId": a }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["parentMessageId"], answer);
    assert_eq!(body["message"], "Branch created successfully");
    let b = body["conversationId"].as_i64().unwrap();
    assert_ne!(b, a);

    let chain = body["chain"].as_array().unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain[0]["id"], question);
    assert_eq!(chain[1]["id"], answer);
    assert_eq!(chain[2]["role"], "system");
    assert_eq!(chain[2]["parent_id"], answer);
    assert_eq!(chain[2]["branch_root_id"], answer);
    assert_eq!(chain[2]["selected_text"], "X is...");

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(json!({ "message": "Go deeper", "conversationId": b }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["conversationId"], b);
    assert_eq!(body["isNewBranch"], true);

    let prompts = completion.prompts.lock().unwrap().clone();
    let prompt = prompts.last().unwrap();
    let roles: Vec<Role> = prompt.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::System, Role::User]
    );
    assert!(prompt[0].content.contains("\"X is...\""));
    assert_eq!(prompt[4].content, "Go deeper");

    let req = test::TestRequest::get()
        .uri(&format!("/api/conversations/{}/chain", b))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.as_array().unwrap().len(), 5);
}

#[actix_web::test]
async fn test_branch_validation_and_missing_source() {
    let (app, _) = create_test_app(Arc::new(EchoCompletion::default())).await;

    let req = test::TestRequest::post()
        .uri("/api/branch")
        .set_json(json!({ "messageId": 1, "selectedText": "" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/branch")
        .set_json(json!({ "messageId": 404, "selectedText": "anything" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Message not found: 404");
}
