//! Unit tests for generation request/response types.

use super::*;
use serde_json::json;

#[test]
fn test_message_constructors() {
    let msg = Message::system("You are a simulator");
    assert_eq!(msg.role, MessageRole::System);
    assert_eq!(msg.content, "You are a simulator");

    let msg = Message::user("The change is: Rome never fell");
    assert_eq!(msg.role, MessageRole::User);
}

#[test]
fn test_message_serializes_lowercase_role() {
    let value = serde_json::to_value(Message::system("hi")).unwrap();
    assert_eq!(value, json!({"role": "system", "content": "hi"}));
}

#[test]
fn test_generate_request_skips_unset_options() {
    let req = GenerateRequest::new(vec![Message::user("x")]);
    let value = serde_json::to_value(&req).unwrap();
    assert!(value.get("max_tokens").is_none());

    let req = req.with_max_tokens(256);
    let value = serde_json::to_value(&req).unwrap();
    assert_eq!(value["max_tokens"], 256);
}

#[test]
fn test_generate_response_text() {
    let resp: GenerateResponse = serde_json::from_value(json!({
        "success": true,
        "result": {"response": "  The empire endures.  "},
        "errors": [],
        "messages": []
    }))
    .unwrap();
    assert_eq!(resp.text(), Some("The empire endures."));
}

#[test]
fn test_generate_response_blank_text_is_none() {
    let resp: GenerateResponse = serde_json::from_value(json!({
        "success": true,
        "result": {"response": "   "}
    }))
    .unwrap();
    assert_eq!(resp.text(), None);

    let resp: GenerateResponse =
        serde_json::from_value(json!({"success": true, "result": {}})).unwrap();
    assert_eq!(resp.text(), None);
}

#[test]
fn test_error_summary() {
    let resp: GenerateResponse = serde_json::from_value(json!({
        "success": false,
        "errors": [
            {"code": 5007, "message": "No such model"},
            {"message": "Try again"}
        ]
    }))
    .unwrap();
    assert_eq!(resp.error_summary(), "No such model (5007); Try again");
}
