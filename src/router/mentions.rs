/// Channel classification and mention assembly per tenant

use super::dedupe::EventKind;
use super::RoutedEvent;
use crate::tenants::TenantConfig;

/// Pick the target channel for an event. Flips classify into price-bracket
/// channels with the general `flips` channel as fallback; dumps and spikes
/// go to their kind channels. No configured channel means no emission.
pub fn classify_channel(config: &TenantConfig, event: &RoutedEvent) -> Option<String> {
    let channels = &config.channels;
    match event {
        RoutedEvent::Dump(_) => channels.dumps.clone(),
        RoutedEvent::Spike(_) => channels.spikes.clone(),
        RoutedEvent::Flip(flip) => {
            let brackets = &config.price_brackets;
            let bracket_channel = if flip.buy < brackets.cheap_max {
                &channels.cheap_flips
            } else if flip.buy < brackets.medium_max {
                &channels.medium_flips
            } else if flip.buy < brackets.expensive_max {
                &channels.expensive_flips
            } else {
                &channels.billionaire_flips
            };
            bracket_channel.clone().or_else(|| channels.flips.clone())
        }
    }
}

/// Mentions for an emission: tier role (when configured and enabled), risk
/// role, quality role, and the event-kind role. Order-preserving dedupe.
pub fn mentions_for(config: &TenantConfig, event: &RoutedEvent) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    let mut push = |role: Option<&String>| {
        if let Some(role) = role {
            if !mentions.contains(role) {
                mentions.push(role.clone());
            }
        }
    };

    match event {
        RoutedEvent::Dump(dump) => {
            push(config.tier_role(dump.tier));
            push(config.roles.get(dump.risk.risk_level.role_key()));
            if let Some(quality) = dump.quality {
                push(config.roles.get(quality.role_key()));
            }
            push(config.roles.get(EventKind::Dump.role_key()));
        }
        RoutedEvent::Spike(spike) => {
            push(config.roles.get(spike.risk.risk_level.role_key()));
            push(config.roles.get(EventKind::Spike.role_key()));
        }
        RoutedEvent::Flip(flip) => {
            push(config.roles.get(flip.risk.risk_level.role_key()));
            push(config.roles.get(EventKind::Flip.role_key()));
        }
    }

    mentions
}
