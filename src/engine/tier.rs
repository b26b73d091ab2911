/// The canonical ten-tier quality ladder over score space [0, 100]

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierGroup {
    Metals,
    Gems,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tier {
    pub name: &'static str,
    pub emoji: &'static str,
    pub group: TierGroup,
    pub min_score: u8,
    pub max_score: u8,
}

/// Ten disjoint bands covering [0, 100], mirrored in the seeded `tiers`
/// table. Order is ascending score.
pub const TIERS: [Tier; 10] = [
    Tier { name: "iron", emoji: "🔩", group: TierGroup::Metals, min_score: 0, max_score: 10 },
    Tier { name: "copper", emoji: "🪙", group: TierGroup::Metals, min_score: 11, max_score: 20 },
    Tier { name: "bronze", emoji: "🏅", group: TierGroup::Metals, min_score: 21, max_score: 30 },
    Tier { name: "silver", emoji: "🥈", group: TierGroup::Metals, min_score: 31, max_score: 40 },
    Tier { name: "gold", emoji: "🥇", group: TierGroup::Metals, min_score: 41, max_score: 50 },
    Tier { name: "platinum", emoji: "⚪", group: TierGroup::Metals, min_score: 51, max_score: 60 },
    Tier { name: "ruby", emoji: "💎🔴", group: TierGroup::Gems, min_score: 61, max_score: 70 },
    Tier { name: "sapphire", emoji: "💎🔵", group: TierGroup::Gems, min_score: 71, max_score: 80 },
    Tier { name: "emerald", emoji: "💎🟢", group: TierGroup::Gems, min_score: 81, max_score: 90 },
    Tier { name: "diamond", emoji: "💎", group: TierGroup::Gems, min_score: 91, max_score: 100 },
];

/// Map a score to its tier. Scores are clamped to [0, 100] first;
/// fractional scores between two integer bands resolve upward so a higher
/// score can never land in a lower tier.
pub fn tier_for_score(score: f64) -> &'static Tier {
    let score = score.clamp(0.0, 100.0);
    TIERS
        .iter()
        .find(|t| score <= t.max_score as f64)
        .unwrap_or(&TIERS[TIERS.len() - 1])
}

pub fn tier_by_name(name: &str) -> Option<&'static Tier> {
    TIERS.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

/// Position of a tier in the ladder (iron = 0 .. diamond = 9).
pub fn tier_order(name: &str) -> Option<usize> {
    TIERS.iter().position(|t| t.name.eq_ignore_ascii_case(name))
}

pub fn is_known_tier(name: &str) -> bool {
    tier_by_name(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_scores_map_to_documented_tiers() {
        assert_eq!(tier_for_score(0.0).name, "iron");
        assert_eq!(tier_for_score(10.0).name, "iron");
        assert_eq!(tier_for_score(11.0).name, "copper");
        assert_eq!(tier_for_score(50.0).name, "gold");
        assert_eq!(tier_for_score(51.0).name, "platinum");
        assert_eq!(tier_for_score(91.0).name, "diamond");
        assert_eq!(tier_for_score(100.0).name, "diamond");
    }

    #[test]
    fn out_of_range_scores_clamp() {
        assert_eq!(tier_for_score(-5.0).name, "iron");
        assert_eq!(tier_for_score(250.0).name, "diamond");
    }

    #[test]
    fn tier_assignment_is_monotonic() {
        let mut last_order = 0;
        let mut score = 0.0;
        while score <= 100.0 {
            let order = tier_order(tier_for_score(score).name).unwrap();
            assert!(order >= last_order, "tier regressed at score {score}");
            last_order = order;
            score += 0.25;
        }
    }

    #[test]
    fn bands_partition_the_score_domain() {
        for pair in TIERS.windows(2) {
            assert_eq!(pair[0].max_score + 1, pair[1].min_score);
        }
        assert_eq!(TIERS[0].min_score, 0);
        assert_eq!(TIERS[9].max_score, 100);
    }

    #[test]
    fn lookup_by_name_is_case_insensitive() {
        assert_eq!(tier_by_name("Diamond").unwrap().max_score, 100);
        assert_eq!(tier_order("IRON"), Some(0));
        assert!(tier_by_name("mithril").is_none());
    }

    #[test]
    fn groups_split_metals_and_gems() {
        assert!(TIERS[..6].iter().all(|t| t.group == TierGroup::Metals));
        assert!(TIERS[6..].iter().all(|t| t.group == TierGroup::Gems));
    }
}
