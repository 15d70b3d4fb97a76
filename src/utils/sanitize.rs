use serde_json::Value;

const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "secret_key",
    "octo_secret",
    "unique_key",
    "token",
    "api_key",
    "authorization",
    "sign_string",
    "signature",
    "masked_pan",
    "maskedpan",
    "card_number",
    "pan",
];

/// Renders a webhook or request body for logs with credentials and card data
/// masked. JSON and form-encoded bodies are understood; anything else is
/// reduced to its size.
pub fn sanitize_payload(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        return sanitize_json(&json).to_string();
    }
    match std::str::from_utf8(body) {
        Ok(text) if looks_form_encoded(text) => sanitize_form(text),
        _ => format!("[opaque, {} bytes]", body.len()),
    }
}

pub fn sanitize_json(value: &Value) -> Value {
    let mut value = value.clone();
    mask_in_place(&mut value);
    value
}

fn mask_in_place(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if is_sensitive_field(key) {
                    *val = Value::String(mask(val.as_str()));
                } else {
                    mask_in_place(val);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_in_place),
        _ => {}
    }
}

/// Click posts its callbacks as `application/x-www-form-urlencoded`.
pub fn sanitize_form(body: &str) -> String {
    let mut out = url::form_urlencoded::Serializer::new(String::new());
    for (key, val) in url::form_urlencoded::parse(body.as_bytes()) {
        if is_sensitive_field(&key) {
            out.append_pair(&key, &mask(Some(&val)));
        } else {
            out.append_pair(&key, &val);
        }
    }
    out.finish()
}

fn looks_form_encoded(text: &str) -> bool {
    !text.is_empty()
        && text.contains('=')
        && !text.chars().any(|ch| ch.is_whitespace() || ch.is_control())
}

fn is_sensitive_field(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_FIELDS.contains(&key.as_str())
}

/// Long strings keep four characters at each end; everything else is hidden.
fn mask(value: Option<&str>) -> String {
    match value {
        Some(s) if s.chars().count() > 8 => {
            let chars: Vec<char> = s.chars().collect();
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}****{}", head, tail)
        }
        _ => "****".to_string(),
    }
}
