//! Shared deterministic types for the perception, decision and execution core.
//!
//! These types are the contracts between pipeline stages. They carry no I/O
//! handles and serialize deterministically so cycle records stay stable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of shop slots shown during preparation.
pub const SHOP_SLOTS: usize = 5;
/// Board rows (front to back).
pub const BOARD_ROWS: u8 = 4;
/// Board columns.
pub const BOARD_COLS: u8 = 7;
/// Default bench capacity.
pub const DEFAULT_BENCH_CAPACITY: usize = 9;
/// Upper bound on synergy badges and item slots recognized per capture.
pub const MAX_BADGES: usize = 10;
/// Highest hero cost tier.
pub const MAX_HERO_COST: u32 = 5;

/// What part of the screen a detection describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    ShopSlot,
    BoardCell,
    BenchSlot,
    SynergyBadge,
    ItemSlot,
    NumericField,
    PhaseBanner,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShopSlot => "shop-slot",
            Self::BoardCell => "board-cell",
            Self::BenchSlot => "bench-slot",
            Self::SynergyBadge => "synergy-badge",
            Self::ItemSlot => "item-slot",
            Self::NumericField => "numeric-field",
            Self::PhaseBanner => "phase-banner",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which detector backend produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionSource {
    TextExtraction,
    TemplateMatch,
}

impl DetectionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextExtraction => "text-extraction",
            Self::TemplateMatch => "template-match",
        }
    }
}

/// One raw detection as reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub kind: EntityKind,
    pub slot_index: u32,
    pub label: String,
    pub confidence: f64,
    pub source: DetectionSource,
}

/// A fused, deduplicated entity for one capture.
///
/// Built only by [`crate::core::fusion::fuse`]; consumers read it and fold it
/// into [`crate::core::state::GameState`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedEntity {
    kind: EntityKind,
    slot_index: u32,
    label: String,
    confidence: f64,
    source: DetectionSource,
}

impl RecognizedEntity {
    pub(crate) fn from_detection(detection: RawDetection) -> Self {
        Self {
            kind: detection.kind,
            slot_index: detection.slot_index,
            label: detection.label,
            confidence: detection.confidence,
            source: detection.source,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn slot_index(&self) -> u32 {
        self.slot_index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn source(&self) -> DetectionSource {
        self.source
    }
}

/// Numeric HUD readouts, keyed by the slot index of a numeric-field entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    Gold,
    Hp,
    Level,
    Exp,
    ExpToNext,
    Round,
    Stage,
}

impl NumericField {
    pub const COUNT: u32 = 7;

    pub fn from_slot(slot: u32) -> Option<Self> {
        match slot {
            0 => Some(Self::Gold),
            1 => Some(Self::Hp),
            2 => Some(Self::Level),
            3 => Some(Self::Exp),
            4 => Some(Self::ExpToNext),
            5 => Some(Self::Round),
            6 => Some(Self::Stage),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gold => "gold",
            Self::Hp => "hp",
            Self::Level => "level",
            Self::Exp => "exp",
            Self::ExpToNext => "exp_to_next",
            Self::Round => "round",
            Self::Stage => "stage",
        }
    }
}

/// Game phase. Transitions are cyclic: loading, preparation, combat,
/// carousel, settlement, then back to preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Loading,
    Preparation,
    Combat,
    Carousel,
    Settlement,
}

impl Phase {
    pub fn rank(self) -> u8 {
        match self {
            Self::Loading => 0,
            Self::Preparation => 1,
            Self::Combat => 2,
            Self::Carousel => 3,
            Self::Settlement => 4,
        }
    }

    /// True when moving from `self` to `next` follows the cyclic order.
    pub fn advances_to(self, next: Phase) -> bool {
        next.rank() > self.rank() || (self == Self::Settlement && next == Self::Preparation)
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "loading" => Some(Self::Loading),
            "preparation" | "prep" => Some(Self::Preparation),
            "combat" | "battle" => Some(Self::Combat),
            "carousel" => Some(Self::Carousel),
            "settlement" => Some(Self::Settlement),
            _ => None,
        }
    }

    /// The shop is interactable while preparing and during combat.
    pub fn shop_open(self) -> bool {
        matches!(self, Self::Preparation | Self::Combat)
    }
}

/// A hero known to the state model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hero {
    pub name: String,
    pub cost: u32,
    #[serde(default)]
    pub synergies: Vec<String>,
}

/// A hero on the board or bench together with where it stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub hero: Hero,
    pub position: Position,
}

/// Where an action applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Board { row: u8, col: u8 },
    Bench { index: u8 },
    Shop { slot: u8 },
}

impl Position {
    pub fn board_cell(index: u32) -> Option<Self> {
        let cells = u32::from(BOARD_ROWS) * u32::from(BOARD_COLS);
        if index >= cells {
            return None;
        }
        let cols = u32::from(BOARD_COLS);
        Some(Self::Board {
            row: u8::try_from(index / cols).ok()?,
            col: u8::try_from(index % cols).ok()?,
        })
    }

    pub fn is_board(self) -> bool {
        matches!(self, Self::Board { .. })
    }

    pub fn is_bench(self) -> bool {
        matches!(self, Self::Bench { .. })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Board { row, col } => write!(f, "board({row},{col})"),
            Self::Bench { index } => write!(f, "bench({index})"),
            Self::Shop { slot } => write!(f, "shop({slot})"),
        }
    }
}

/// A hero offered in a shop slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopOffer {
    pub name: String,
    pub cost: u32,
    pub synergies: Vec<String>,
}

/// Hero costs and synergies used to interpret recognized names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeroCatalog {
    heroes: BTreeMap<String, Hero>,
}

impl HeroCatalog {
    pub fn new(heroes: impl IntoIterator<Item = Hero>) -> Self {
        Self {
            heroes: heroes
                .into_iter()
                .map(|hero| (hero.name.clone(), hero))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Hero> {
        self.heroes.get(name)
    }

    /// Resolve a recognized name. Unknown heroes get the top cost tier so
    /// affordability is never over-estimated.
    pub fn resolve(&self, name: &str) -> Hero {
        self.get(name).cloned().unwrap_or_else(|| Hero {
            name: name.to_string(),
            cost: MAX_HERO_COST,
            synergies: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.heroes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heroes.is_empty()
    }
}

/// Fixed in-game prices and thresholds the rules and validator agree on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Economy {
    pub refresh_cost: u32,
    pub buy_experience_cost: u32,
    pub level_up_cost: u32,
    /// Experience gained per purchase.
    pub xp_per_purchase: u32,
    pub max_level: u32,
    /// At or below this hp the emergency level-up rule fires.
    pub low_hp_threshold: u32,
    /// Gold kept back by non-emergency spending rules.
    pub gold_reserve: u32,
}

impl Default for Economy {
    fn default() -> Self {
        Self {
            refresh_cost: 2,
            buy_experience_cost: 4,
            level_up_cost: 4,
            xp_per_purchase: 4,
            max_level: 9,
            low_hp_threshold: 30,
            gold_reserve: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    BuyHero,
    SellHero,
    MoveHero,
    LevelUp,
    RefreshShop,
    BuyExperience,
    None,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BuyHero => "buy-hero",
            Self::SellHero => "sell-hero",
            Self::MoveHero => "move-hero",
            Self::LevelUp => "level-up",
            Self::RefreshShop => "refresh-shop",
            Self::BuyExperience => "buy-experience",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed game action. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    kind: ActionType,
    target: Option<String>,
    position: Option<Position>,
    destination: Option<Position>,
    metadata: BTreeMap<String, String>,
}

impl Action {
    fn bare(kind: ActionType) -> Self {
        Self {
            kind,
            target: None,
            position: None,
            destination: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn none() -> Self {
        Self::bare(ActionType::None)
    }

    pub fn buy_hero(slot: u8, name: impl Into<String>) -> Self {
        Self {
            target: Some(name.into()),
            position: Some(Position::Shop { slot }),
            ..Self::bare(ActionType::BuyHero)
        }
    }

    pub fn sell_hero(position: Position, name: impl Into<String>) -> Self {
        Self {
            target: Some(name.into()),
            position: Some(position),
            ..Self::bare(ActionType::SellHero)
        }
    }

    pub fn move_hero(from: Position, to: Position, name: impl Into<String>) -> Self {
        Self {
            target: Some(name.into()),
            position: Some(from),
            destination: Some(to),
            ..Self::bare(ActionType::MoveHero)
        }
    }

    pub fn level_up() -> Self {
        Self::bare(ActionType::LevelUp)
    }

    pub fn buy_experience() -> Self {
        Self::bare(ActionType::BuyExperience)
    }

    pub fn refresh_shop() -> Self {
        Self::bare(ActionType::RefreshShop)
    }

    /// Build an action from already-decoded parts, as produced by a
    /// reasoning response.
    pub fn from_parts(
        kind: ActionType,
        target: Option<String>,
        position: Option<Position>,
        destination: Option<Position>,
    ) -> Self {
        Self {
            target,
            position,
            destination,
            ..Self::bare(kind)
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ActionType {
        self.kind
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn destination(&self) -> Option<Position> {
        self.destination
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn is_none(&self) -> bool {
        self.kind == ActionType::None
    }
}

/// Which strategy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Rule,
    External,
    Hybrid,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::External => "external",
            Self::Hybrid => "hybrid",
        }
    }
}

/// One decision per cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionResult {
    pub action: Action,
    pub source: DecisionSource,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

impl DecisionResult {
    /// Inaction after both strategies came up empty.
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            action: Action::none(),
            source: DecisionSource::Hybrid,
            confidence: 0.0,
            reasoning: Some(reason.into()),
        }
    }
}
