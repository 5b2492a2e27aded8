//! Repairs raw model JSON into the canonical response shape.
//!
//! Nothing here fails. Missing or unusable fields are replaced by safe
//! defaults; a payload that is not an object is passed through untouched and
//! left for the typed decode to reject.

use super::fallback::{GENERIC_BODY, GENERIC_TITLE};
use crate::models::{GenerateDescriptionRequest, UNKNOWN};
use serde_json::{Map, Value, json};

pub fn analyze_payload(raw: Value) -> Value {
    let Value::Object(obj) = raw else {
        return raw;
    };
    json!({
        "brand": value_confidence(obj.get("brand")),
        "model": value_confidence(obj.get("model")),
        "condition": value_confidence(obj.get("condition")),
        "defects": present(obj.get("defects")).cloned().unwrap_or_else(|| json!([])),
        "accessories": present(obj.get("accessories")).cloned().unwrap_or_else(|| json!([])),
        "text_ocr": present(obj.get("text_ocr")).cloned().unwrap_or_else(|| json!([])),
        "image_quality": present(obj.get("image_quality")).cloned().unwrap_or_else(|| json!({
            "is_blurry": false,
            "is_overexposed": false,
            "resolution_ok": true,
        })),
    })
}

pub fn classify_payload(raw: Value) -> Value {
    let Value::Object(obj) = raw else {
        return raw;
    };
    let candidates = obj
        .get("category_candidates")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(candidate).collect::<Vec<_>>())
        .unwrap_or_default();

    let selected = obj
        .get("selected_category_id")
        .and_then(coerce_int)
        .or_else(|| candidates.first().and_then(|c| c["category_id"].as_i64()));

    let reason = obj
        .get("selection_reason")
        .and_then(Value::as_str)
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or("normalized");

    json!({
        "category_candidates": candidates,
        "selected_category_id": selected,
        "selection_reason": reason,
        "needs_user_confirmation": confirmation_flag(obj.get("needs_user_confirmation")),
    })
}

/// Completes `auction_register_req`, accepting camelCase or snake_case keys
/// from the model and filling the rest from the originating request.
pub fn description_payload(raw: Value, request: &GenerateDescriptionRequest) -> Value {
    let Value::Object(mut obj) = raw else {
        return raw;
    };
    let auction = match obj.get("auction_register_req") {
        Some(Value::Object(auction)) => merge_auction(auction, &obj, request),
        _ => synthesize_auction(&obj, request),
    };
    obj.insert("auction_register_req".into(), auction);
    Value::Object(obj)
}

fn merge_auction(
    auction: &Map<String, Value>,
    payload: &Map<String, Value>,
    request: &GenerateDescriptionRequest,
) -> Value {
    let title = text(auction.get("title"))
        .or_else(|| text(payload.get("title")))
        .unwrap_or(GENERIC_TITLE);
    let description = text(auction.get("description"))
        .or_else(|| text(payload.get("body")))
        .unwrap_or(GENERIC_BODY);
    let int_field = |canonical: &str, alternate: &str| {
        present(auction.get(canonical))
            .and_then(coerce_int)
            .or_else(|| present(auction.get(alternate)).and_then(coerce_int))
    };
    let time_field = |canonical: &str, alternate: &str, fallback: Value| {
        present(auction.get(canonical))
            .or_else(|| present(auction.get(alternate)))
            .cloned()
            .unwrap_or(fallback)
    };
    let image_urls = present(auction.get("imageUrls"))
        .or_else(|| present(auction.get("image_urls")))
        .cloned()
        .unwrap_or_else(|| json!(request.image_urls));

    json!({
        "title": title,
        "description": description,
        "startPrice": int_field("startPrice", "start_price").or(request.start_price),
        "categoryId": int_field("categoryId", "category_id").or(request.category_id).unwrap_or(0),
        "auctionDuration": int_field("auctionDuration", "auction_duration").or(request.auction_duration),
        "startAt": time_field("startAt", "start_at", json!(request.start_at)),
        "endAt": time_field("endAt", "end_at", json!(request.end_at)),
        "imageUrls": image_urls,
    })
}

fn synthesize_auction(payload: &Map<String, Value>, request: &GenerateDescriptionRequest) -> Value {
    json!({
        "title": text(payload.get("title")).unwrap_or(GENERIC_TITLE),
        "description": text(payload.get("body")).unwrap_or(GENERIC_BODY),
        "startPrice": request.start_price,
        "categoryId": request.category_id.unwrap_or(0),
        "auctionDuration": request.auction_duration,
        "startAt": request.start_at,
        "endAt": request.end_at,
        "imageUrls": request.image_urls,
    })
}

fn value_confidence(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Object(map)) if map.contains_key("value") && map.contains_key("confidence") => {
            let mut map = map.clone();
            if let Some(confidence) = map
                .get("confidence")
                .filter(|confidence| !confidence.is_number())
                .and_then(coerce_number)
            {
                map.insert("confidence".into(), json!(confidence));
            }
            Value::Object(map)
        }
        Some(Value::String(value)) => json!({"value": value, "confidence": 0.3}),
        _ => json!({"value": UNKNOWN, "confidence": 0.1}),
    }
}

fn candidate(value: &Value) -> Option<Value> {
    let map = value.as_object()?;
    let id = coerce_int(map.get("category_id")?)?;
    let path = match map.get("category_path")? {
        Value::String(path) => path.clone(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    let confidence = map
        .get("confidence")
        .and_then(coerce_number)
        .unwrap_or(0.0);
    Some(json!({
        "category_id": id,
        "category_path": path,
        "confidence": confidence,
    }))
}

fn confirmation_flag(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => matches!(
            text.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// A value counts as absent when missing, null, or an empty string/list/object.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    })
}

fn text(value: Option<&Value>) -> Option<&str> {
    present(value).and_then(Value::as_str)
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|n| n.fract() == 0.0 && n.is_finite())
                .map(|n| n as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
