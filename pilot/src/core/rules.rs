//! Deterministic decision rules evaluated before any external call.
//!
//! Rules form a fixed ordered list; the first rule that selects an action
//! wins. The order is the tie-break policy:
//!
//! 1. `emergency_level_up`: low hp outranks every purchase.
//! 2. `complete_three_star`: a third copy beats a synergy buy.
//! 3. `buy_synergy_hero`: owned-synergy heroes beat leveling and refreshing.
//! 4. `level_up_ready`: a purchase that levels beats bench cleanup.
//! 5. `sell_bench_overflow`: free a bench slot before rolling.
//! 6. `refresh_for_upgrades`: roll only when nothing in the shop helps.

use crate::core::state::GameState;
use crate::core::types::{Action, DecisionResult, DecisionSource, Economy, ShopOffer};

/// One predicate/action pair. `select` returns `None` when the rule's
/// precondition does not hold.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub description: &'static str,
    pub select: fn(&GameState, &Economy) -> Option<Action>,
}

/// The default rule order.
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule {
            name: "emergency_level_up",
            description: "hp is low: level up to field more heroes",
            select: emergency_level_up,
        },
        Rule {
            name: "complete_three_star",
            description: "shop offers the third copy of an owned cheap hero",
            select: complete_three_star,
        },
        Rule {
            name: "buy_synergy_hero",
            description: "shop offers an affordable hero for an active synergy",
            select: buy_synergy_hero,
        },
        Rule {
            name: "level_up_ready",
            description: "one experience purchase reaches the next level",
            select: level_up_ready,
        },
        Rule {
            name: "sell_bench_overflow",
            description: "bench is full: sell a single-copy hero",
            select: sell_bench_overflow,
        },
        Rule {
            name: "refresh_for_upgrades",
            description: "nothing useful in the shop: refresh",
            select: refresh_for_upgrades,
        },
    ]
}

pub struct RuleEngine {
    rules: Vec<Rule>,
    economy: Economy,
}

impl RuleEngine {
    /// Default rules minus the disabled names. Order is preserved.
    pub fn new(economy: Economy, disabled: &[String]) -> Self {
        let rules = default_rules()
            .into_iter()
            .filter(|rule| !disabled.iter().any(|name| name == rule.name))
            .collect();
        Self { rules, economy }
    }

    pub fn with_rules(rules: Vec<Rule>, economy: Economy) -> Self {
        Self { rules, economy }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name).collect()
    }

    pub fn economy(&self) -> &Economy {
        &self.economy
    }

    /// First matching rule's decision, or `None` to escalate.
    pub fn decide(&self, state: &GameState) -> Option<DecisionResult> {
        self.rules.iter().find_map(|rule| {
            let action = (rule.select)(state, &self.economy)?;
            Some(DecisionResult {
                action: action.with_metadata("rule", rule.name),
                source: DecisionSource::Rule,
                confidence: 1.0,
                reasoning: Some(rule.description.to_string()),
            })
        })
    }
}

/// Leftmost shop slot whose offer satisfies `pred`.
fn leftmost_offer<'a>(
    state: &'a GameState,
    mut pred: impl FnMut(&ShopOffer) -> bool,
) -> Option<(u8, &'a ShopOffer)> {
    state
        .shop
        .iter()
        .enumerate()
        .find_map(|(slot, offer)| match offer {
            Some(offer) if pred(offer) => Some((u8::try_from(slot).ok()?, offer)),
            _ => None,
        })
}

fn spendable(state: &GameState, economy: &Economy) -> u32 {
    state.gold.saturating_sub(economy.gold_reserve)
}

fn emergency_level_up(state: &GameState, economy: &Economy) -> Option<Action> {
    let fires = state.phase.shop_open()
        && state.hp <= economy.low_hp_threshold
        && state.level < economy.max_level
        && state.gold >= economy.level_up_cost;
    fires.then(Action::level_up)
}

fn complete_three_star(state: &GameState, _economy: &Economy) -> Option<Action> {
    if !state.phase.shop_open() || !state.bench_has_space() {
        return None;
    }
    let (slot, offer) = leftmost_offer(state, |offer| {
        offer.cost <= 3 && offer.cost <= state.gold && state.owned_copies(&offer.name) == 2
    })?;
    Some(Action::buy_hero(slot, offer.name.clone()))
}

fn buy_synergy_hero(state: &GameState, economy: &Economy) -> Option<Action> {
    if !state.phase.shop_open() || !state.bench_has_space() {
        return None;
    }
    let budget = spendable(state, economy);
    let (slot, offer) = leftmost_offer(state, |offer| {
        offer.cost <= budget && shares_active_synergy(state, offer)
    })?;
    Some(Action::buy_hero(slot, offer.name.clone()))
}

fn shares_active_synergy(state: &GameState, offer: &ShopOffer) -> bool {
    offer
        .synergies
        .iter()
        .any(|synergy| state.synergies.get(synergy).is_some_and(|count| *count > 0))
}

fn level_up_ready(state: &GameState, economy: &Economy) -> Option<Action> {
    let fires = state.phase.shop_open()
        && state.level < economy.max_level
        && state.exp_to_next > 0
        && state.exp.saturating_add(economy.xp_per_purchase) >= state.exp_to_next
        && spendable(state, economy) >= economy.level_up_cost;
    fires.then(Action::level_up)
}

fn sell_bench_overflow(state: &GameState, _economy: &Economy) -> Option<Action> {
    if !state.phase.shop_open() || state.bench_has_space() {
        return None;
    }
    let unit = state
        .bench
        .iter()
        .find(|unit| state.owned_copies(&unit.hero.name) == 1)?;
    Some(Action::sell_hero(unit.position, unit.hero.name.clone()))
}

fn refresh_for_upgrades(state: &GameState, economy: &Economy) -> Option<Action> {
    if !state.phase.shop_open() || spendable(state, economy) < economy.refresh_cost {
        return None;
    }
    let upgrade_available = leftmost_offer(state, |offer| {
        offer.cost <= state.gold
            && (state.owned_copies(&offer.name) > 0 || shares_active_synergy(state, offer))
    })
    .is_some();
    (!upgrade_available).then(Action::refresh_shop)
}
