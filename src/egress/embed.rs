/// Embed payload construction for alert emissions

use crate::engine::{DumpEvent, FlipCandidate, SpikeEvent};

pub const DUMP_COLOR: u32 = 0x8B0000;
pub const SPIKE_COLOR: u32 = 0x00FF00;
pub const FLIP_COLOR: u32 = 0xFFD700;

#[derive(Debug, Clone)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone)]
pub struct EmbedPayload {
    pub title: String,
    pub description: String,
    pub fields: Vec<EmbedField>,
    pub thumbnail_url: Option<String>,
    pub url: Option<String>,
    pub color: u32,
    /// Role ids to mention alongside the embed.
    pub mentions: Vec<String>,
}

/// Wiki thumbnail for an item: words are capitalized, spaces become
/// underscores, everything outside the safe set is percent-encoded.
pub fn item_thumbnail_url(item_name: &str) -> Option<String> {
    let name = item_name.trim();
    if name.is_empty() {
        return None;
    }
    let wiki_name = name
        .split(' ')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join("_");
    Some(format!(
        "https://oldschool.runescape.wiki/images/{}.png",
        percent_encode(&wiki_name)
    ))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' | b'(' | b')'
            | b'\'' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

fn item_page_url(item_id: i64) -> String {
    format!("https://prices.runescape.wiki/osrs/item/{item_id}")
}

pub fn dump_embed(event: &DumpEvent, mentions: Vec<String>) -> EmbedPayload {
    let quality = event.quality.map(|q| q.label()).unwrap_or("");
    let title = format!(
        "{} {} {} — {:.1}% DROP",
        event.emoji,
        capitalize(event.tier),
        event.name,
        event.drop_pct
    );
    let description = format!(
        "**DUMP DETECTED — BUY THE PANIC** {quality}\nPrice: {} GP → {} GP\nVol: **{}** | Risk: {} ({:.1}/100)",
        group_digits(event.low),
        group_digits(event.high),
        group_digits(event.volume),
        event.risk.risk_level.label(),
        event.risk.risk_score,
    );
    EmbedPayload {
        title,
        description,
        fields: vec![
            EmbedField {
                name: "Score".into(),
                value: format!("{:.1} ({})", event.score, event.tier),
                inline: true,
            },
            EmbedField {
                name: "Drop / Vol Spike / Oversupply".into(),
                value: format!(
                    "{:.1}% / {:.1}% / {:.1}%",
                    event.drop_pct, event.vol_spike_pct, event.oversupply_pct
                ),
                inline: true,
            },
            EmbedField {
                name: "Max Buy / 4h".into(),
                value: group_digits(event.buy_limit),
                inline: true,
            },
        ],
        thumbnail_url: item_thumbnail_url(&event.name),
        url: Some(item_page_url(event.item_id)),
        color: DUMP_COLOR,
        mentions,
    }
}

pub fn spike_embed(event: &SpikeEvent, mentions: Vec<String>) -> EmbedPayload {
    EmbedPayload {
        title: format!("SPIKE DETECTED — SELL NOW: {}", event.name),
        description: format!(
            "Price: {} GP → {} GP\nRise: **{:.1}%** | Vol: **{}**",
            group_digits(event.prev_high),
            group_digits(event.high),
            event.rise_pct,
            group_digits(event.volume),
        ),
        fields: vec![EmbedField {
            name: "Risk".into(),
            value: format!(
                "{} ({:.1}/100)",
                event.risk.risk_level.label(),
                event.risk.risk_score
            ),
            inline: true,
        }],
        thumbnail_url: item_thumbnail_url(&event.name),
        url: Some(item_page_url(event.item_id)),
        color: SPIKE_COLOR,
        mentions,
    }
}

pub fn flip_embed(candidate: &FlipCandidate, mentions: Vec<String>) -> EmbedPayload {
    EmbedPayload {
        title: format!("FLIP MARGIN: {}", candidate.name),
        description: format!(
            "Buy {} GP → Sell {} GP\nMargin: **{} GP** (net {} GP) | ROI: {:.2}%\nVol: {} | Limit: {}",
            group_digits(candidate.buy),
            group_digits(candidate.sell),
            group_digits(candidate.margin_gp),
            group_digits(candidate.net_margin_gp),
            candidate.roi_pct,
            group_digits(candidate.volume),
            group_digits(candidate.buy_limit),
        ),
        fields: vec![EmbedField {
            name: "Risk".into(),
            value: format!(
                "{} ({:.1}/100)",
                candidate.risk.risk_level.label(),
                candidate.risk.risk_score
            ),
            inline: true,
        }],
        thumbnail_url: item_thumbnail_url(&candidate.name),
        url: Some(item_page_url(candidate.item_id)),
        color: FLIP_COLOR,
        mentions,
    }
}

fn group_digits(value: i64) -> String {
    let raw = value.abs().to_string();
    let mut out = String::with_capacity(raw.len() + raw.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    let offset = raw.len() % 3;
    for (i, c) in raw.chars().enumerate() {
        if i != 0 && (i + 3 - offset) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbnail_capitalizes_and_encodes() {
        assert_eq!(
            item_thumbnail_url("abyssal whip").unwrap(),
            "https://oldschool.runescape.wiki/images/Abyssal_Whip.png"
        );
        assert_eq!(
            item_thumbnail_url("Zulrah's scales").unwrap(),
            "https://oldschool.runescape.wiki/images/Zulrah's_Scales.png"
        );
        assert!(item_thumbnail_url("  ").is_none());
    }

    #[test]
    fn thumbnail_escapes_unsafe_bytes() {
        let url = item_thumbnail_url("3rd age robe").unwrap();
        assert!(url.ends_with("3rd_Age_Robe.png"));
        let url = item_thumbnail_url("Half a jug").unwrap();
        assert!(!url.contains(' '));
    }

    #[test]
    fn digit_grouping() {
        assert_eq!(group_digits(0), "0");
        assert_eq!(group_digits(999), "999");
        assert_eq!(group_digits(1_000), "1,000");
        assert_eq!(group_digits(2_147_483_647), "2,147,483,647");
        assert_eq!(group_digits(-5_000), "-5,000");
    }
}
