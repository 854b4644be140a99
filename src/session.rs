use uuid::Uuid;

/// Passes a client-supplied session id through untouched; mints a random v4 UUID when the
/// client sent none. Unknown ids are accepted and simply start with an empty history.
pub fn resolve_session(input: Option<&str>) -> String {
    match input {
        Some(session_id) if !session_id.is_empty() => session_id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}
