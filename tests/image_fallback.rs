// tests/image_fallback.rs
use new_market_bot::notify::message::resolve_image_url;
use new_market_bot::Item;
use serde_json::json;

fn item(extra: serde_json::Value) -> Item {
    let mut v = json!({"id": "evt", "createdAt": "2025-09-06T10:00:00Z"});
    if let (Some(base), Some(more)) = (v.as_object_mut(), extra.as_object()) {
        for (k, val) in more {
            base.insert(k.clone(), val.clone());
        }
    }
    Item::from_json(v).unwrap()
}

#[test]
fn banner_only_item_uses_banner() {
    let it = item(json!({"banner_image": "https://img/banner.png"}));
    assert_eq!(resolve_image_url(&it).as_deref(), Some("https://img/banner.png"));
}

#[test]
fn primary_wins_over_thumbnail() {
    let it = item(json!({
        "thumbnail": "https://img/thumb.png",
        "image": "https://img/primary.png",
    }));
    assert_eq!(resolve_image_url(&it).as_deref(), Some("https://img/primary.png"));
}

#[test]
fn empty_and_non_string_slots_are_skipped() {
    let it = item(json!({
        "image": "   ",
        "coverImage": null,
        "bannerImage": 42,
        "icon": "https://img/icon.png",
    }));
    assert_eq!(resolve_image_url(&it).as_deref(), Some("https://img/icon.png"));
}

#[test]
fn no_image_fields_means_text_only() {
    assert_eq!(resolve_image_url(&item(json!({"title": "plain"}))), None);
}
