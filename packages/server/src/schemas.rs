use common::Vendor;
use serde_json::{Map, Value};

/// Required by every vendor: the external request identifier the bots echo
/// back to the web app.
const BASE_REQUIRED: [&str; 1] = ["in_strIDSolicitudAseguradora"];

/// Per-vendor required string keys, beyond the base set. Unknown extra keys
/// always pass through untouched (forward compatibility); the full
/// field-by-field shape is the web app's contract, not the orchestrator's.
pub fn required_keys(vendor: Vendor) -> &'static [&'static str] {
    match vendor {
        Vendor::Runt => &["in_strTipoDoc", "in_strNumDoc", "in_strPlaca"],
        _ => &["in_strNumDoc", "in_strPlaca"],
    }
}

/// Normalize a request body into the payload map.
///
/// Both accepted shapes collapse to one: a nested `payload` object is the
/// base, and any flat top-level keys are folded over it (flat wins, matching
/// the legacy integration document where the whole body is flat).
pub fn fold_request_body(body: Value) -> Result<Map<String, Value>, String> {
    let Value::Object(mut root) = body else {
        return Err("El cuerpo debe ser un objeto JSON".to_string());
    };

    let mut payload = match root.remove("payload") {
        Some(Value::Object(nested)) => nested,
        Some(_) => return Err("El campo 'payload' debe ser un objeto".to_string()),
        None => Map::new(),
    };

    for (key, value) in root {
        payload.insert(key, value);
    }
    Ok(payload)
}

/// Check the vendor's required string keys against a folded payload.
/// Reports every problem at once.
pub fn validate_payload(vendor: Vendor, payload: &Map<String, Value>) -> Result<(), String> {
    let mut problems = Vec::new();

    for key in BASE_REQUIRED.iter().chain(required_keys(vendor)) {
        match payload.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => {}
            Some(Value::String(_)) => problems.push(format!("Campo '{}' está vacío", key)),
            Some(_) => problems.push(format!("Campo '{}' debe ser una cadena", key)),
            None => problems.push(format!("Campo requerido '{}' ausente", key)),
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}
