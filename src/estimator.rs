//! Coarse token-count estimation for chat payloads.
//!
//! This is deliberately not a real tokenizer: the selector only needs a
//! cheap, deterministic number to decide long-vs-throughput routing, not an
//! exact BPE count. A `len/4` heuristic is good enough and costs nothing to
//! compute on the hot path.

use serde_json::Value;

/// Estimate total tokens (input content + reserved output) for a chat
/// payload. Never fails — malformed or missing fields simply contribute 0.
pub fn estimate_tokens(payload: &Value) -> u64 {
    let content_tokens: u64 = payload
        .get("messages")
        .and_then(Value::as_array)
        .map(|messages| messages.iter().map(message_tokens).sum())
        .unwrap_or(0);

    let output_tokens = payload
        .get("max_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(512);

    content_tokens + output_tokens
}

fn message_tokens(message: &Value) -> u64 {
    match message.get("content") {
        Some(Value::String(s)) => (s.len() / 4) as u64,
        Some(Value::Array(parts)) => parts.iter().map(part_tokens).sum(),
        _ => 0,
    }
}

fn part_tokens(part: &Value) -> u64 {
    let is_text = part.get("type").and_then(Value::as_str) == Some("text");
    if !is_text {
        return 0;
    }
    part.get("text")
        .and_then(Value::as_str)
        .map(|s| (s.len() / 4) as u64)
        .unwrap_or(0)
}
