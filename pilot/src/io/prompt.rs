//! Prompt rendering for the reasoning provider.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::state::GameState;
use crate::core::types::{ActionType, Economy, Unit};

const DECISION_TEMPLATE: &str = include_str!("prompts/decision.md");

const ACTION_TYPES: [ActionType; 7] = [
    ActionType::BuyHero,
    ActionType::SellHero,
    ActionType::MoveHero,
    ActionType::LevelUp,
    ActionType::RefreshShop,
    ActionType::BuyExperience,
    ActionType::None,
];

#[derive(Debug, Serialize)]
struct UnitContext {
    name: String,
    at: String,
}

impl UnitContext {
    fn from_unit(unit: &Unit) -> Self {
        Self {
            name: unit.hero.name.clone(),
            at: unit.position.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ShopSlotContext {
    index: usize,
    name: Option<String>,
    cost: Option<u32>,
    synergies: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SynergyContext {
    name: String,
    count: u32,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("decision", DECISION_TEMPLATE)
            .expect("decision template should be valid");
        Self { env }
    }

    /// Render the decision prompt for `state`.
    pub fn render_decision(&self, state: &GameState, economy: &Economy) -> Result<String> {
        let shop: Vec<ShopSlotContext> = state
            .shop
            .iter()
            .enumerate()
            .map(|(index, offer)| ShopSlotContext {
                index,
                name: offer.as_ref().map(|offer| offer.name.clone()),
                cost: offer.as_ref().map(|offer| offer.cost),
                synergies: offer
                    .as_ref()
                    .map(|offer| offer.synergies.clone())
                    .unwrap_or_default(),
            })
            .collect();
        let synergies: Vec<SynergyContext> = state
            .synergies
            .iter()
            .map(|(name, count)| SynergyContext {
                name: name.clone(),
                count: *count,
            })
            .collect();
        let board: Vec<UnitContext> = state.board.iter().map(UnitContext::from_unit).collect();
        let bench: Vec<UnitContext> = state.bench.iter().map(UnitContext::from_unit).collect();
        let action_types: Vec<&str> = ACTION_TYPES.iter().map(|kind| kind.as_str()).collect();

        let template = self.env.get_template("decision")?;
        let rendered = template.render(context! {
            action_types => action_types,
            phase => state.phase,
            stage => state.stage,
            round => state.round,
            gold => state.gold,
            hp => state.hp,
            level => state.level,
            exp => state.exp,
            exp_to_next => state.exp_to_next,
            board => board,
            bench => bench,
            bench_capacity => state.bench_capacity(),
            synergies => synergies,
            items => &state.items,
            shop => shop,
            economy => economy,
        })?;
        Ok(rendered)
    }
}
