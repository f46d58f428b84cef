//! Telegram message composition, Bulgarian-first.

use rust_decimal::Decimal;

use carscout_store::listings::Listing;
use carscout_store::scores::Score;

/// Channel caption: score banner, the facts, and the top reasons.
pub fn channel_caption(listing: &Listing, score: &Score, price_bgn: Decimal) -> String {
    let emoji = score_emoji(score.score);
    let title = listing.title.as_deref().unwrap_or("Обява");

    let mut caption = format!(
        "{emoji} <b>{title}</b>\n\n📊 <b>Оценка: {:.1}/10</b>\n\n💰 Цена: <b>{:.0} лв</b>\n",
        score.score, price_bgn
    );
    if let Some(year) = listing.year {
        caption.push_str(&format!("📅 Година: {year}\n"));
    }
    if let Some(fuel) = &listing.fuel {
        caption.push_str(&format!("⛽ Гориво: {fuel}\n"));
    }
    if let Some(km) = listing.mileage_km {
        caption.push_str(&format!("📏 Пробег: {km} км\n"));
    }
    if let Some(gearbox) = &listing.gearbox {
        caption.push_str(&format!("⚙️ Скоростна кутия: {gearbox}\n"));
    }
    if let Some(region) = &listing.region {
        caption.push_str(&format!("\n📍 Регион: {region}\n"));
    }

    let notes: Vec<String> = score
        .reasons
        .get("notes")
        .and_then(|n| n.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .take(3)
                .collect()
        })
        .unwrap_or_default();
    if !notes.is_empty() {
        caption.push_str("\n<b>Защо си струва:</b>\n");
        for note in notes {
            caption.push_str(&format!("• {note}\n"));
        }
    }

    caption.trim_end().to_string()
}

/// Personal alert message.
pub fn alert_message(listing: &Listing, price_bgn: Decimal) -> String {
    let title = listing.title.as_deref().unwrap_or("Обява");
    let mut message = format!(
        "🔔 <b>Нова обява отговаря на твоята бдителност!</b>\n\n<b>{title}</b>\n\n💰 Цена: <b>{:.0} лв</b>\n",
        price_bgn
    );
    if let Some(year) = listing.year {
        message.push_str(&format!("📅 Година: {year}\n"));
    }
    let mut line = Vec::new();
    if let Some(fuel) = &listing.fuel {
        line.push(format!("⛽ {fuel}"));
    }
    if let Some(km) = listing.mileage_km {
        line.push(format!("📏 {km} км"));
    }
    if let Some(gearbox) = &listing.gearbox {
        line.push(format!("⚙️ {gearbox}"));
    }
    if !line.is_empty() {
        message.push_str(&line.join(" | "));
        message.push('\n');
    }
    if let Some(region) = &listing.region {
        message.push_str(&format!("\n📍 {region}"));
    }
    message.trim_end().to_string()
}

fn score_emoji(score: f64) -> &'static str {
    if score >= 9.0 {
        "🔥🔥🔥"
    } else if score >= 8.0 {
        "🔥🔥"
    } else if score >= 7.0 {
        "🔥"
    } else {
        "⭐"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn listing() -> Listing {
        Listing {
            id: Uuid::new_v4(),
            raw_id: Uuid::new_v4(),
            brand_raw: None,
            model_raw: None,
            fuel_raw: None,
            gearbox_raw: None,
            body_raw: None,
            brand_id: Some("bmw".into()),
            model_id: Some("x5".into()),
            year: Some(2019),
            mileage_km: Some(45_000),
            fuel: Some("diesel".into()),
            gearbox: Some("automatic".into()),
            body: Some("suv".into()),
            power_hp: None,
            price: Some(Decimal::from(24_000)),
            currency: Some("BGN".into()),
            price_bgn: Some(Decimal::from(24_000)),
            region: Some("sofia".into()),
            title: Some("BMW X5 3.0d".into()),
            description: None,
            description_hash: None,
            features: serde_json::json!([]),
            first_image_hash: None,
            seller_phone_hash: None,
            seller_profile_url: None,
            seller_id: None,
            is_normalized: true,
            is_draft: false,
            is_duplicate: false,
            canonical_of: None,
            version: 1,
        }
    }

    fn score(value: f64) -> Score {
        Score {
            listing_id: Uuid::new_v4(),
            score: value,
            price_score: 4.5,
            risk_penalty: 0.0,
            freshness: 0.5,
            liquidity: 0.8,
            reasons: serde_json::json!({"notes": ["Отлична цена (25.0% под пазара)"]}),
            state: "approved".into(),
            scored_at: Utc::now(),
        }
    }

    #[test]
    fn caption_carries_score_and_facts() {
        let caption = channel_caption(&listing(), &score(8.2), Decimal::from(24_000));
        assert!(caption.starts_with("🔥🔥"));
        assert!(caption.contains("24000 лв"));
        assert!(caption.contains("45000 км"));
        assert!(caption.contains("Защо си струва"));
    }

    #[test]
    fn emoji_tiers_follow_score() {
        assert_eq!(score_emoji(9.5), "🔥🔥🔥");
        assert_eq!(score_emoji(8.0), "🔥🔥");
        assert_eq!(score_emoji(7.2), "🔥");
        assert_eq!(score_emoji(5.0), "⭐");
    }

    #[test]
    fn alert_message_is_compact() {
        let message = alert_message(&listing(), Decimal::from(24_000));
        assert!(message.contains("Нова обява"));
        assert!(message.contains("⛽ diesel | 📏 45000 км | ⚙️ automatic"));
    }
}
