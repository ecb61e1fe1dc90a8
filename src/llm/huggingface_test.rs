use super::*;
use crate::llm::test_support::{Upstream, refused_url, serve};

// =============================================================================
// format_prompt
// =============================================================================

#[test]
fn prompt_wraps_each_turn_and_cues_assistant() {
    let prompt = format_prompt(&[Turn::system("Be brief."), Turn::user("hi")]);
    assert_eq!(
        prompt,
        "<|begin_of_text|>\
         <|start_header_id|>system<|end_header_id|>\n\nBe brief.<|eot_id|>\
         <|start_header_id|>user<|end_header_id|>\n\nhi<|eot_id|>\
         <|start_header_id|>assistant<|end_header_id|>\n\n"
    );
}

#[test]
fn prompt_for_no_turns_is_just_the_cue() {
    assert_eq!(format_prompt(&[]), "<|begin_of_text|><|start_header_id|>assistant<|end_header_id|>\n\n");
}

#[test]
fn prompt_ends_with_open_assistant_header() {
    let prompt = format_prompt(&[Turn::user("a"), Turn::assistant("b"), Turn::user("c")]);
    assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    assert_eq!(prompt.matches("<|eot_id|>").count(), 3);
}

// =============================================================================
// clean_generated_text
// =============================================================================

#[test]
fn clean_strips_markers_headers_and_whitespace() {
    let raw = "<|start_header_id|>assistant<|end_header_id|>\n\n  Sure thing!<|eot_id|>  ";
    assert_eq!(clean_generated_text(raw), "Sure thing!");
}

#[test]
fn clean_leaves_plain_text_alone() {
    assert_eq!(clean_generated_text("plain answer"), "plain answer");
}

// =============================================================================
// parse_generated_text
// =============================================================================

#[test]
fn parse_array_form() {
    let json = serde_json::json!([{ "generated_text": "Hello!<|eot_id|>" }]).to_string();
    assert_eq!(parse_generated_text(&json).unwrap(), "Hello!");
}

#[test]
fn parse_object_form() {
    let json = serde_json::json!({ "generated_text": " Hi " }).to_string();
    assert_eq!(parse_generated_text(&json).unwrap(), "Hi");
}

#[test]
fn parse_missing_field_is_invalid() {
    let json = serde_json::json!([{ "text": "nope" }]).to_string();
    assert!(matches!(parse_generated_text(&json), Err(ProviderError::InvalidResponse { .. })));
}

#[test]
fn parse_marker_only_output_is_invalid() {
    let json = serde_json::json!([{ "generated_text": "<|eot_id|>" }]).to_string();
    assert!(matches!(parse_generated_text(&json), Err(ProviderError::InvalidResponse { .. })));
}

#[test]
fn request_parameters_disable_full_text_echo() {
    let body = GenerateRequest {
        inputs: "p",
        parameters: GenerateParameters {
            max_new_tokens: 64,
            temperature: 0.7,
            top_p: 0.9,
            do_sample: true,
            return_full_text: false,
        },
    };
    let json = serde_json::to_value(&body).unwrap();
    assert_eq!(json["inputs"], "p");
    assert_eq!(json["parameters"]["max_new_tokens"], 64);
    assert_eq!(json["parameters"]["return_full_text"], false);
}

// =============================================================================
// generate over HTTP
// =============================================================================

fn client_at(base_url: &str) -> HuggingFaceClient {
    let config = ProviderConfig::from_lookup(ProviderKind::HuggingFace, |key| match key {
        "HF_API_KEY" => Some("hf-test".to_string()),
        "HF_BASE_URL" => Some(base_url.to_string()),
        "HF_TIMEOUT_SECS" | "HF_CONNECT_TIMEOUT_SECS" => Some("1".to_string()),
        _ => None,
    })
    .unwrap();
    HuggingFaceClient::new(config).unwrap()
}

#[tokio::test]
async fn generate_returns_cleaned_text() {
    let body = r#"[{"generated_text":"ok<|eot_id|>"}]"#;
    let client = client_at(&serve(Upstream::Reply { status: 200, body }).await);
    let generation = client.generate(&[Turn::user("hello")]).await.unwrap();
    assert_eq!(generation.content, "ok");
    assert_eq!(generation.provider, ProviderKind::HuggingFace);
}

#[tokio::test]
async fn generate_503_is_model_loading_with_estimate() {
    let body = r#"{"error":"Model is currently loading","estimated_time":12.5}"#;
    let client = client_at(&serve(Upstream::Reply { status: 503, body }).await);
    let err = client.generate(&[Turn::user("hello")]).await.unwrap_err();
    match err {
        ProviderError::ModelLoading { estimated_secs: Some(secs), .. } => {
            assert!((secs - 12.5).abs() < f64::EPSILON);
        }
        other => panic!("expected ModelLoading, got {other:?}"),
    }
}

#[tokio::test]
async fn generate_silent_upstream_times_out() {
    let client = client_at(&serve(Upstream::Hang).await);
    let err = client.generate(&[Turn::user("hello")]).await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout { provider: ProviderKind::HuggingFace }));
}

#[tokio::test]
async fn generate_refused_connection_is_unknown() {
    let client = client_at(&refused_url().await);
    let err = client.generate(&[Turn::user("hello")]).await.unwrap_err();
    assert!(matches!(err, ProviderError::Unknown { provider: ProviderKind::HuggingFace, .. }));
}
