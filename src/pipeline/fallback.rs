//! Deterministic, model-free responses. Every function here is total: it
//! only substitutes defaults and never rejects its input.

use crate::models::{
    AnalyzeImageRequest, AnalyzeImageResponse, AuctionRegisterReq, CategoryCandidate,
    CategoryItem, ClassifyCategoryRequest, ClassifyCategoryResponse, Defect,
    GenerateDescriptionRequest, GenerateDescriptionResponse, ImageQuality, UNKNOWN,
    ValueConfidence,
};
use chrono::{NaiveDateTime, TimeDelta};
use serde_json::{Map, Value};
use std::collections::HashSet;

pub(super) const GENERIC_TITLE: &str = "상품 판매합니다";
pub(super) const GENERIC_BODY: &str = "상품 설명이 없습니다.";

const HEURISTIC_REASON: &str = "keyword fallback (model not connected)";
const MISC_CATEGORY_NAMES: [&str; 2] = ["기타물품", "기타"];
const SENTINEL_CATEGORY_ID: i64 = 80;
const SENTINEL_CATEGORY_PATH: &str = "기타";
const DEFAULT_AUCTION_MINUTES: i64 = 1440;
const MARKETPLACE_TAG: &str = "#중고거래";

/// Seller-note markers, scanned in order; a later match overrides an earlier one.
const CONDITION_MARKERS: &[(&[&str], &str, f64)] = &[
    (&["미개봉", "새상품"], "NEW", 0.7),
    (&["사용감", "스크래치"], "USED", 0.6),
];

pub fn analyze_image(request: &AnalyzeImageRequest) -> AnalyzeImageResponse {
    let note = seller_note(request.metadata.as_ref());
    let mut condition = ValueConfidence::new("USED", 0.4);
    if !note.is_empty() {
        for (markers, value, confidence) in CONDITION_MARKERS {
            if markers.iter().any(|marker| note.contains(marker)) {
                condition = ValueConfidence::new(*value, *confidence);
            }
        }
    }

    AnalyzeImageResponse {
        brand: ValueConfidence::unknown(),
        model: ValueConfidence::unknown(),
        condition,
        defects: Vec::new(),
        accessories: Vec::new(),
        text_ocr: Vec::new(),
        image_quality: ImageQuality::default(),
    }
}

fn seller_note(metadata: Option<&Map<String, Value>>) -> String {
    match metadata.and_then(|m| m.get("seller_note")) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(note)) => note.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

pub fn classify_category(request: &ClassifyCategoryRequest) -> ClassifyCategoryResponse {
    let categories = request.categories.as_deref().unwrap_or_default();
    let keywords = request.keywords.as_deref().unwrap_or_default();

    let candidate = best_keyword_match(categories, keywords)
        .or_else(|| misc_leaf(categories))
        .or_else(|| {
            categories.first().map(|first| CategoryCandidate {
                category_id: first.id,
                category_path: first.name.clone(),
                confidence: 0.1,
            })
        })
        .unwrap_or_else(|| CategoryCandidate {
            category_id: SENTINEL_CATEGORY_ID,
            category_path: SENTINEL_CATEGORY_PATH.to_string(),
            confidence: 0.1,
        });

    ClassifyCategoryResponse {
        selected_category_id: Some(candidate.category_id),
        category_candidates: vec![candidate],
        selection_reason: HEURISTIC_REASON.to_string(),
        needs_user_confirmation: true,
    }
}

/// Highest token overlap wins; ties keep the first leaf seen.
fn best_keyword_match(
    categories: &[CategoryItem],
    keywords: &[String],
) -> Option<CategoryCandidate> {
    let keywords: HashSet<String> = keywords.iter().flat_map(|k| tokens(k)).collect();
    if keywords.is_empty() {
        return None;
    }

    let mut best: Option<(&CategoryItem, usize)> = None;
    for category in categories.iter().filter(|c| c.selectable()) {
        let score = score_category(category, &keywords);
        if score > best.map_or(0, |(_, top)| top) {
            best = Some((category, score));
        }
    }

    best.map(|(category, score)| CategoryCandidate {
        category_id: category.id,
        category_path: category.display_path().to_string(),
        confidence: round2((0.2 + 0.1 * score as f64).min(0.8)),
    })
}

fn score_category(category: &CategoryItem, keywords: &HashSet<String>) -> usize {
    std::iter::once(category.name.as_str())
        .chain(category.path.as_deref())
        .chain(category.aliases.iter().flatten().map(String::as_str))
        .flat_map(tokens)
        .filter(|token| keywords.contains(token))
        .count()
}

fn misc_leaf(categories: &[CategoryItem]) -> Option<CategoryCandidate> {
    categories
        .iter()
        .find(|c| c.is_leaf == Some(true) && MISC_CATEGORY_NAMES.contains(&c.name.as_str()))
        .map(|c| CategoryCandidate {
            category_id: c.id,
            category_path: c.display_path().to_string(),
            confidence: 0.1,
        })
}

/// Lower-cased whitespace tokens; `>` in taxonomy paths counts as whitespace.
fn tokens(text: &str) -> Vec<String> {
    text.replace('>', " ")
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn generate_description(
    request: &GenerateDescriptionRequest,
    now: NaiveDateTime,
) -> GenerateDescriptionResponse {
    let condition = condition_phrase(request.condition.as_deref().unwrap_or("USED"));
    let accessories = accessories_text(&request.accessories);
    let defects = defects_text(&request.defects);
    let name = display_name(request.brand.as_deref(), request.model.as_deref());
    let item_type = request
        .item_type
        .as_deref()
        .map(str::trim)
        .filter(|kind| !kind.is_empty());

    let (title, opening) = match (name.as_deref(), item_type) {
        (Some(name), _) => (
            format!("{name} 판매합니다"),
            format!("{name} {condition}입니다."),
        ),
        (None, Some(kind)) => (
            format!("{kind} 팝니다"),
            format!("{kind} 판매합니다. 상태는 {condition}입니다."),
        ),
        (None, None) => (
            GENERIC_TITLE.to_string(),
            format!("상품 상태는 {condition}입니다."),
        ),
    };

    let summary = format!("{condition}, 구성품 {accessories}");
    let mut sentences = vec![opening];
    if !defects.is_empty() {
        sentences.push(format!("하자: {defects}."));
    }
    sentences.push(format!("구성품: {accessories}."));
    let body = sentences.join(" ");

    let timing = AuctionTiming::resolve(request, now);
    let auction_register_req = AuctionRegisterReq {
        title: title.clone(),
        description: body.clone(),
        start_price: request.start_price,
        category_id: request.category_id.unwrap_or(0),
        auction_duration: timing.duration_minutes,
        start_at: timing.start_at,
        end_at: timing.end_at,
        image_urls: request.image_urls.clone(),
    };

    GenerateDescriptionResponse {
        title,
        summary,
        body,
        hashtags: hashtags(request.brand.as_deref(), request.model.as_deref()),
        auction_register_req,
    }
}

#[derive(Debug, Default, PartialEq)]
struct AuctionTiming {
    duration_minutes: Option<i64>,
    start_at: Option<NaiveDateTime>,
    end_at: Option<NaiveDateTime>,
}

impl AuctionTiming {
    /// An explicit end time wins over a supplied duration. A zero duration
    /// counts as absent; a negative one triggers timing but uses the default.
    fn resolve(request: &GenerateDescriptionRequest, now: NaiveDateTime) -> Self {
        let duration = request.auction_duration.filter(|minutes| *minutes != 0);
        if request.start_at.is_none() && request.end_at.is_none() && duration.is_none() {
            return Self::default();
        }

        let start = request.start_at.unwrap_or(now);
        match request.end_at {
            Some(end) => Self {
                duration_minutes: Some((end - start).num_minutes()),
                start_at: Some(start),
                end_at: Some(end),
            },
            None => {
                let minutes = duration
                    .filter(|minutes| *minutes > 0)
                    .unwrap_or(DEFAULT_AUCTION_MINUTES);
                Self {
                    duration_minutes: Some(minutes),
                    start_at: Some(start),
                    end_at: TimeDelta::try_minutes(minutes)
                        .and_then(|delta| start.checked_add_signed(delta)),
                }
            }
        }
    }
}

fn condition_phrase(condition: &str) -> &'static str {
    match condition.trim().to_uppercase().as_str() {
        "NEW" => "새상품 수준",
        "USED_GOOD" => "상태 양호",
        _ => "사용감 있음",
    }
}

fn display_name(brand: Option<&str>, model: Option<&str>) -> Option<String> {
    let name = [brand, model]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty() && !part.eq_ignore_ascii_case(UNKNOWN))
        .collect::<Vec<_>>()
        .join(" ");
    (!name.is_empty()).then_some(name)
}

fn accessories_text(accessories: &[String]) -> String {
    if accessories.is_empty() {
        "없음".to_string()
    } else {
        accessories.join(", ")
    }
}

fn defects_text(defects: &[Defect]) -> String {
    defects
        .iter()
        .map(|defect| {
            [
                Some(defect.kind.as_str()),
                defect.location.as_deref().filter(|l| !l.is_empty()),
                defect.severity.as_deref().filter(|s| !s.is_empty()),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("/")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn hashtags(brand: Option<&str>, model: Option<&str>) -> Vec<String> {
    let mut tags = Vec::new();
    if let Some(brand) = brand.map(str::trim).filter(|b| !b.is_empty()) {
        tags.push(format!("#{brand}"));
    }
    if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
        let compact: String = model.chars().filter(|c| !c.is_whitespace()).collect();
        tags.push(format!("#{compact}"));
    }
    tags.push(MARKETPLACE_TAG.to_string());
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Validate;
    use chrono::{FixedOffset, Local, NaiveDate};
    use serde_json::json;

    fn leaf(id: i64, name: &str) -> CategoryItem {
        CategoryItem {
            id,
            name: name.to_string(),
            parent_id: None,
            path: None,
            aliases: None,
            is_leaf: Some(true),
        }
    }

    fn classify(categories: Vec<CategoryItem>, keywords: &[&str]) -> ClassifyCategoryResponse {
        classify_category(&ClassifyCategoryRequest {
            categories: Some(categories),
            keywords: Some(keywords.iter().map(|k| k.to_string()).collect()),
            ..Default::default()
        })
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .unwrap()
    }

    fn with_note(note: Value) -> AnalyzeImageRequest {
        let mut metadata = Map::new();
        metadata.insert("seller_note".into(), note);
        AnalyzeImageRequest {
            image_urls: vec!["https://img/a.jpg".into()],
            metadata: Some(metadata),
        }
    }

    #[test]
    fn analyze_defaults_without_metadata() {
        let out = analyze_image(&AnalyzeImageRequest::default());
        assert_eq!(out.condition, ValueConfidence::new("USED", 0.4));
        assert_eq!(out.brand, ValueConfidence::unknown());
        assert_eq!(out.model, ValueConfidence::unknown());
        assert_eq!(out.image_quality, ImageQuality::default());
        assert!(out.validate().is_ok());
    }

    #[test]
    fn analyze_reads_seller_note_markers() {
        let used = analyze_image(&with_note(json!("사용감 있음")));
        assert_eq!(used.condition, ValueConfidence::new("USED", 0.6));

        let sealed = analyze_image(&with_note(json!("미개봉")));
        assert_eq!(sealed.condition, ValueConfidence::new("NEW", 0.7));
    }

    #[test]
    fn later_marker_overrides_earlier_one() {
        let out = analyze_image(&with_note(json!("새상품인데 스크래치 조금")));
        assert_eq!(out.condition, ValueConfidence::new("USED", 0.6));
    }

    #[test]
    fn non_string_note_is_ignored_by_markers() {
        let out = analyze_image(&with_note(json!(12345)));
        assert_eq!(out.condition, ValueConfidence::new("USED", 0.4));
    }

    #[test]
    fn keyword_match_scores_overlap() {
        let out = classify(vec![leaf(1, "Shoes"), leaf(2, "기타")], &["shoes"]);
        assert_eq!(out.category_candidates.len(), 1);
        assert_eq!(out.category_candidates[0].category_id, 1);
        assert_eq!(out.category_candidates[0].confidence, 0.3);
        assert_eq!(out.selected_category_id, Some(1));
        assert!(out.needs_user_confirmation);
        assert_eq!(out.selection_reason, HEURISTIC_REASON);
    }

    #[test]
    fn keyword_match_counts_path_and_aliases() {
        let mut sneakers = leaf(5, "운동화");
        sneakers.path = Some("패션>신발>운동화".into());
        sneakers.aliases = Some(vec!["Sneakers".into(), "러닝화".into()]);
        let out = classify(
            vec![leaf(1, "신발"), sneakers],
            &["운동화 sneakers", "  ", "신발"],
        );
        let top = &out.category_candidates[0];
        assert_eq!(top.category_id, 5);
        assert_eq!(top.category_path, "패션>신발>운동화");
        // name + path(신발, 운동화) + alias
        assert_eq!(top.confidence, 0.6);
    }

    #[test]
    fn confidence_is_capped() {
        let mut item = leaf(3, "a b c d e f g h");
        item.aliases = Some(vec!["a b c d".into()]);
        let out = classify(vec![item], &["a b c d e f g h"]);
        assert_eq!(out.category_candidates[0].confidence, 0.8);
    }

    #[test]
    fn ties_keep_first_seen_leaf() {
        let out = classify(vec![leaf(10, "camera"), leaf(11, "camera")], &["camera"]);
        assert_eq!(out.selected_category_id, Some(10));
    }

    #[test]
    fn non_leaf_categories_are_skipped() {
        let mut parent = leaf(1, "camera");
        parent.is_leaf = Some(false);
        let mut unknown_leafness = leaf(2, "camera");
        unknown_leafness.is_leaf = None;
        let out = classify(vec![parent, unknown_leafness], &["camera"]);
        assert_eq!(out.selected_category_id, Some(2));
    }

    #[test]
    fn misc_leaf_wins_without_overlap_regardless_of_order() {
        let out = classify(vec![leaf(1, "Shoes"), leaf(9, "기타")], &["television"]);
        assert_eq!(out.selected_category_id, Some(9));
        assert_eq!(out.category_candidates[0].confidence, 0.1);

        let out = classify(vec![leaf(9, "기타물품"), leaf(1, "Shoes")], &[]);
        assert_eq!(out.selected_category_id, Some(9));
        assert_eq!(out.category_candidates[0].category_path, "기타물품");
    }

    #[test]
    fn first_entry_when_no_misc_leaf() {
        let mut misc_parent = leaf(9, "기타");
        misc_parent.is_leaf = None;
        let out = classify(vec![leaf(4, "Bags"), misc_parent], &[]);
        assert_eq!(
            out.category_candidates,
            vec![CategoryCandidate {
                category_id: 4,
                category_path: "Bags".into(),
                confidence: 0.1,
            }]
        );
    }

    #[test]
    fn sentinel_without_taxonomy() {
        let out = classify_category(&ClassifyCategoryRequest::default());
        assert_eq!(
            out.category_candidates,
            vec![CategoryCandidate {
                category_id: 80,
                category_path: "기타".into(),
                confidence: 0.1,
            }]
        );
        assert_eq!(out.selected_category_id, Some(80));
        assert!(out.needs_user_confirmation);

        let empty = classify(vec![], &[]);
        assert_eq!(empty, out);
    }

    #[test]
    fn description_from_brand_and_model() {
        let request = GenerateDescriptionRequest {
            brand: Some("Sony".into()),
            model: Some("WH 1000XM4".into()),
            condition: Some("USED_GOOD".into()),
            accessories: vec!["케이스".into(), "케이블".into()],
            defects: vec![Defect {
                kind: "스크래치".into(),
                location: Some("헤드밴드".into()),
                severity: None,
                confidence: None,
            }],
            ..Default::default()
        };
        let out = generate_description(&request, at(9, 0));
        assert_eq!(out.title, "Sony WH 1000XM4 판매합니다");
        assert_eq!(out.summary, "상태 양호, 구성품 케이스, 케이블");
        assert_eq!(
            out.body,
            "Sony WH 1000XM4 상태 양호입니다. 하자: 스크래치/헤드밴드. 구성품: 케이스, 케이블."
        );
        assert_eq!(out.hashtags, vec!["#Sony", "#WH1000XM4", "#중고거래"]);
        assert_eq!(out.auction_register_req.title, out.title);
        assert_eq!(out.auction_register_req.description, out.body);
        assert_eq!(out.auction_register_req.category_id, 0);
    }

    #[test]
    fn description_uses_item_type_when_brand_unknown() {
        let request = GenerateDescriptionRequest {
            brand: Some("UNKNOWN".into()),
            item_type: Some("카메라".into()),
            condition: Some("MYSTERY".into()),
            ..Default::default()
        };
        let out = generate_description(&request, at(9, 0));
        assert_eq!(out.title, "카메라 팝니다");
        assert_eq!(out.body, "카메라 판매합니다. 상태는 사용감 있음입니다. 구성품: 없음.");
        assert_eq!(out.summary, "사용감 있음, 구성품 없음");
    }

    #[test]
    fn description_generic_label() {
        let out = generate_description(&GenerateDescriptionRequest::default(), at(9, 0));
        assert_eq!(out.title, GENERIC_TITLE);
        assert_eq!(out.body, "상품 상태는 사용감 있음입니다. 구성품: 없음.");
        assert_eq!(out.hashtags, vec![MARKETPLACE_TAG]);
    }

    #[test]
    fn no_timing_inputs_leave_timing_unset() {
        let out = generate_description(&GenerateDescriptionRequest::default(), at(9, 0));
        let auction = out.auction_register_req;
        assert_eq!(auction.auction_duration, None);
        assert_eq!(auction.start_at, None);
        assert_eq!(auction.end_at, None);
    }

    #[test]
    fn end_only_computes_duration_from_now() {
        let request = GenerateDescriptionRequest {
            end_at: Some(at(10, 30)),
            ..Default::default()
        };
        let auction = generate_description(&request, at(9, 0)).auction_register_req;
        assert_eq!(auction.start_at, Some(at(9, 0)));
        assert_eq!(auction.auction_duration, Some(90));
    }

    #[test]
    fn duration_is_whole_minutes() {
        let request = GenerateDescriptionRequest {
            start_at: Some(at(9, 0)),
            end_at: NaiveDate::from_ymd_opt(2026, 3, 1).and_then(|d| d.and_hms_opt(9, 10, 59)),
            ..Default::default()
        };
        let auction = generate_description(&request, at(0, 0)).auction_register_req;
        assert_eq!(auction.auction_duration, Some(10));
    }

    #[test]
    fn end_time_wins_over_duration() {
        let request = GenerateDescriptionRequest {
            start_at: Some(at(9, 0)),
            end_at: Some(at(12, 0)),
            auction_duration: Some(15),
            ..Default::default()
        };
        let auction = generate_description(&request, at(0, 0)).auction_register_req;
        assert_eq!(auction.auction_duration, Some(180));
    }

    #[test]
    fn duration_only_starts_now() {
        let request = GenerateDescriptionRequest {
            auction_duration: Some(60),
            ..Default::default()
        };
        let auction = generate_description(&request, at(9, 0)).auction_register_req;
        assert_eq!(auction.start_at, Some(at(9, 0)));
        assert_eq!(auction.end_at, Some(at(10, 0)));
        assert_eq!(auction.auction_duration, Some(60));
    }

    #[test]
    fn start_only_defaults_to_a_day() {
        let request = GenerateDescriptionRequest {
            start_at: Some(at(9, 0)),
            ..Default::default()
        };
        let auction = generate_description(&request, at(0, 0)).auction_register_req;
        assert_eq!(auction.auction_duration, Some(1440));
        assert_eq!(
            auction.end_at,
            NaiveDate::from_ymd_opt(2026, 3, 2).and_then(|d| d.and_hms_opt(9, 0, 0))
        );
    }

    #[test]
    fn negative_duration_uses_default_window() {
        let request = GenerateDescriptionRequest {
            auction_duration: Some(-30),
            ..Default::default()
        };
        let auction = generate_description(&request, at(9, 0)).auction_register_req;
        assert_eq!(auction.start_at, Some(at(9, 0)));
        assert_eq!(auction.auction_duration, Some(1440));
        assert_eq!(
            auction.end_at,
            NaiveDate::from_ymd_opt(2026, 3, 2).and_then(|d| d.and_hms_opt(9, 0, 0))
        );
    }

    #[test]
    fn zero_duration_alone_leaves_timing_unset() {
        let request = GenerateDescriptionRequest {
            auction_duration: Some(0),
            ..Default::default()
        };
        let auction = generate_description(&request, at(9, 0)).auction_register_req;
        assert_eq!(auction.auction_duration, None);
        assert_eq!(auction.start_at, None);
    }

    #[test]
    fn offset_end_time_shares_the_clock_of_now() {
        let local_now = Local::now();
        let seoul = FixedOffset::east_opt(9 * 3600).unwrap();
        let end_at = (local_now + TimeDelta::hours(1))
            .with_timezone(&seoul)
            .to_rfc3339();
        let request: GenerateDescriptionRequest =
            serde_json::from_value(json!({ "end_at": end_at })).unwrap();

        let auction = generate_description(&request, local_now.naive_local()).auction_register_req;
        let start = auction.start_at.unwrap();
        let end = auction.end_at.unwrap();
        assert!(end > start, "end {end} precedes start {start}");
        assert_eq!(auction.auction_duration, Some(60));
    }

    #[test]
    fn fallback_is_deterministic() {
        let request = GenerateDescriptionRequest {
            brand: Some("Apple".into()),
            start_price: Some(50000),
            image_urls: vec!["https://img/1.jpg".into()],
            ..Default::default()
        };
        let first = serde_json::to_vec(&generate_description(&request, at(9, 0))).unwrap();
        let second = serde_json::to_vec(&generate_description(&request, at(9, 0))).unwrap();
        assert_eq!(first, second);
    }
}
