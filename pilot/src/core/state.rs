//! Versioned game-state snapshot folded from fused entities.
//!
//! The control loop owns the single [`GameState`] and is its only writer. A
//! batch either commits completely (bumping the version) or is rejected and
//! leaves the previous snapshot untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use crate::core::error::StateError;
use crate::core::types::{
    BOARD_COLS, BOARD_ROWS, DEFAULT_BENCH_CAPACITY, EntityKind, Hero, HeroCatalog, MAX_BADGES,
    NumericField, Phase, Position, RecognizedEntity, SHOP_SLOTS, ShopOffer, Unit,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Numeric readouts overwrite the state only above this confidence.
    pub min_numeric_confidence: f64,
    pub bench_capacity: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            min_numeric_confidence: 0.7,
            bench_capacity: DEFAULT_BENCH_CAPACITY,
        }
    }
}

/// A state field reported as changed by [`GameState::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StateField {
    Numeric(NumericField),
    Phase,
    Board,
    Bench,
    Synergies,
    Items,
    Shop(u8),
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(field) => f.write_str(field.as_str()),
            Self::Phase => f.write_str("phase"),
            Self::Board => f.write_str("board"),
            Self::Bench => f.write_str("bench"),
            Self::Synergies => f.write_str("synergies"),
            Self::Items => f.write_str("items"),
            Self::Shop(slot) => write!(f, "shop[{slot}]"),
        }
    }
}

impl Serialize for StateField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of a committed (or no-op) update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateUpdate {
    pub version: u64,
    pub changed: Vec<StateField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameState {
    pub phase: Phase,
    pub round: u32,
    pub stage: u32,
    pub gold: u32,
    pub hp: u32,
    pub level: u32,
    pub exp: u32,
    pub exp_to_next: u32,
    /// Board heroes ordered by position; never more than `level`.
    pub board: Vec<Unit>,
    /// Bench heroes ordered by slot; never more than the bench capacity.
    pub bench: Vec<Unit>,
    pub synergies: BTreeMap<String, u32>,
    pub shop: [Option<ShopOffer>; SHOP_SLOTS],
    pub items: Vec<String>,
    bench_capacity: usize,
    version: u64,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(DEFAULT_BENCH_CAPACITY)
    }
}

impl GameState {
    pub fn new(bench_capacity: usize) -> Self {
        Self {
            phase: Phase::Loading,
            round: 0,
            stage: 0,
            gold: 0,
            hp: 100,
            level: 1,
            exp: 0,
            exp_to_next: 0,
            board: Vec::new(),
            bench: Vec::new(),
            synergies: BTreeMap::new(),
            shop: Default::default(),
            items: Vec::new(),
            bench_capacity,
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn bench_capacity(&self) -> usize {
        self.bench_capacity
    }

    pub fn bench_has_space(&self) -> bool {
        self.bench.len() < self.bench_capacity
    }

    pub fn shop_offer(&self, slot: usize) -> Option<&ShopOffer> {
        self.shop.get(slot).and_then(Option::as_ref)
    }

    /// The hero standing at a board or bench position.
    pub fn unit_at(&self, position: Position) -> Option<&Unit> {
        let units = match position {
            Position::Board { .. } => &self.board,
            Position::Bench { .. } => &self.bench,
            Position::Shop { .. } => return None,
        };
        units.iter().find(|unit| unit.position == position)
    }

    /// Copies of `name` on board and bench together.
    pub fn owned_copies(&self, name: &str) -> usize {
        self.board
            .iter()
            .chain(&self.bench)
            .filter(|unit| unit.hero.name == name)
            .count()
    }

    /// Fold a batch of fused entities into the snapshot.
    ///
    /// Kinds absent from the batch leave their fields untouched. On error the
    /// snapshot is unchanged.
    pub fn update(
        &mut self,
        entities: &[RecognizedEntity],
        catalog: &HeroCatalog,
        config: &StateConfig,
    ) -> Result<StateUpdate, StateError> {
        let writes = collect_writes(entities, catalog, config, self.bench_capacity)?;
        let mut next = self.clone();
        let mut changed = Vec::new();
        let mut proposed_phase = None;
        for assignment in resolve(writes) {
            if let Assignment::Phase(phase) = assignment {
                proposed_phase = Some(phase);
                continue;
            }
            let field = assignment.field();
            if next.apply(assignment) {
                changed.push(field);
            }
        }

        // Phase goes last: a backward move is accepted only when this batch
        // also advanced the round.
        if let Some(phase) = proposed_phase
            && phase != next.phase
            && (next.phase.advances_to(phase) || next.round > self.round)
        {
            next.phase = phase;
            changed.push(StateField::Phase);
        }

        next.check_invariants()?;
        if changed.is_empty() {
            return Ok(StateUpdate {
                version: self.version,
                changed,
            });
        }
        changed.sort();
        next.version += 1;
        *self = next;
        Ok(StateUpdate {
            version: self.version,
            changed,
        })
    }

    fn apply(&mut self, assignment: Assignment) -> bool {
        match assignment {
            Assignment::Numeric(field, value) => {
                let slot = match field {
                    NumericField::Gold => &mut self.gold,
                    NumericField::Hp => &mut self.hp,
                    NumericField::Level => &mut self.level,
                    NumericField::Exp => &mut self.exp,
                    NumericField::ExpToNext => &mut self.exp_to_next,
                    NumericField::Round => &mut self.round,
                    NumericField::Stage => &mut self.stage,
                };
                replace(slot, value)
            }
            Assignment::Phase(phase) => replace(&mut self.phase, phase),
            Assignment::Board(units) => replace(&mut self.board, units),
            Assignment::Bench(units) => replace(&mut self.bench, units),
            Assignment::Synergies(synergies) => replace(&mut self.synergies, synergies),
            Assignment::Items(items) => replace(&mut self.items, items),
            Assignment::Shop(slot, offer) => replace(&mut self.shop[usize::from(slot)], offer),
        }
    }

    fn check_invariants(&self) -> Result<(), StateError> {
        if self.board.len() > self.level as usize {
            return Err(StateError::InvariantViolation(format!(
                "{} board heroes exceed level {}",
                self.board.len(),
                self.level
            )));
        }
        if self.bench.len() > self.bench_capacity {
            return Err(StateError::InvariantViolation(format!(
                "{} bench heroes exceed capacity {}",
                self.bench.len(),
                self.bench_capacity
            )));
        }
        Ok(())
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[derive(Debug, Clone)]
enum Assignment {
    Numeric(NumericField, u32),
    Phase(Phase),
    Board(Vec<Unit>),
    Bench(Vec<Unit>),
    Synergies(BTreeMap<String, u32>),
    Items(Vec<String>),
    Shop(u8, Option<ShopOffer>),
}

impl Assignment {
    fn field(&self) -> StateField {
        match self {
            Self::Numeric(field, _) => StateField::Numeric(*field),
            Self::Phase(_) => StateField::Phase,
            Self::Board(_) => StateField::Board,
            Self::Bench(_) => StateField::Bench,
            Self::Synergies(_) => StateField::Synergies,
            Self::Items(_) => StateField::Items,
            Self::Shop(slot, _) => StateField::Shop(*slot),
        }
    }
}

/// A proposed assignment with its provenance, before conflict resolution.
#[derive(Debug)]
struct Write {
    kind: EntityKind,
    confidence: f64,
    order: usize,
    assignment: Assignment,
}

/// Accumulates a container kind across a batch; it becomes a single write.
struct Collected<T> {
    value: T,
    confidence: f64,
    order: usize,
}

impl<T> Collected<T> {
    fn note(&mut self, confidence: f64, order: usize) {
        self.confidence = self.confidence.min(confidence);
        self.order = order;
    }
}

fn collected<T: Default>(slot: &mut Option<Collected<T>>, confidence: f64, order: usize) -> &mut T {
    let entry = slot.get_or_insert_with(|| Collected {
        value: T::default(),
        confidence,
        order,
    });
    entry.note(confidence, order);
    &mut entry.value
}

fn bounded(kind: EntityKind, index: u32, capacity: usize) -> Result<u8, StateError> {
    let capacity = u32::try_from(capacity).unwrap_or(u32::MAX);
    if index >= capacity {
        return Err(StateError::SlotOutOfBounds {
            kind,
            index,
            capacity,
        });
    }
    u8::try_from(index).map_err(|_| StateError::SlotOutOfBounds {
        kind,
        index,
        capacity,
    })
}

fn is_empty_label(label: &str) -> bool {
    let label = label.trim();
    label.is_empty() || label.eq_ignore_ascii_case("empty")
}

fn parse_synergy(label: &str) -> Option<(String, u32)> {
    let (name, count) = match label.split_once(':') {
        Some((name, count)) => (name.trim(), count.trim().parse().ok()?),
        None => (label.trim(), 1),
    };
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), count))
}

fn offer_from(hero: Hero) -> ShopOffer {
    ShopOffer {
        name: hero.name,
        cost: hero.cost,
        synergies: hero.synergies,
    }
}

fn collect_writes(
    entities: &[RecognizedEntity],
    catalog: &HeroCatalog,
    config: &StateConfig,
    bench_capacity: usize,
) -> Result<Vec<Write>, StateError> {
    let mut writes = Vec::new();
    let mut board: Option<Collected<BTreeMap<Position, Unit>>> = None;
    let mut bench: Option<Collected<BTreeMap<Position, Unit>>> = None;
    let mut synergies: Option<Collected<BTreeMap<String, u32>>> = None;
    let mut items: Option<Collected<BTreeMap<u32, String>>> = None;

    for (order, entity) in entities.iter().enumerate() {
        let kind = entity.kind();
        let index = entity.slot_index();
        let confidence = entity.confidence();
        let label = entity.label().trim();
        match kind {
            EntityKind::NumericField => {
                let Some(field) = NumericField::from_slot(index) else {
                    return Err(StateError::SlotOutOfBounds {
                        kind,
                        index,
                        capacity: NumericField::COUNT,
                    });
                };
                if confidence <= config.min_numeric_confidence {
                    continue;
                }
                if let Ok(value) = label.parse::<u32>() {
                    writes.push(Write {
                        kind,
                        confidence,
                        order,
                        assignment: Assignment::Numeric(field, value),
                    });
                }
            }
            EntityKind::PhaseBanner => {
                bounded(kind, index, 1)?;
                if let Some(phase) = Phase::parse(label) {
                    writes.push(Write {
                        kind,
                        confidence,
                        order,
                        assignment: Assignment::Phase(phase),
                    });
                }
            }
            EntityKind::ShopSlot => {
                let slot = bounded(kind, index, SHOP_SLOTS)?;
                let offer = (!is_empty_label(label)).then(|| offer_from(catalog.resolve(label)));
                if offer.is_some() {
                    writes.push(Write {
                        kind,
                        confidence,
                        order,
                        assignment: Assignment::Phase(Phase::Preparation),
                    });
                }
                writes.push(Write {
                    kind,
                    confidence,
                    order,
                    assignment: Assignment::Shop(slot, offer),
                });
            }
            EntityKind::BoardCell => {
                bounded(kind, index, usize::from(BOARD_ROWS) * usize::from(BOARD_COLS))?;
                let units = collected(&mut board, confidence, order);
                if let Some(position) = Position::board_cell(index)
                    && !is_empty_label(label)
                {
                    units.insert(
                        position,
                        Unit {
                            hero: catalog.resolve(label),
                            position,
                        },
                    );
                }
            }
            EntityKind::BenchSlot => {
                let slot = bounded(kind, index, bench_capacity)?;
                let units = collected(&mut bench, confidence, order);
                if !is_empty_label(label) {
                    let position = Position::Bench { index: slot };
                    units.insert(
                        position,
                        Unit {
                            hero: catalog.resolve(label),
                            position,
                        },
                    );
                }
            }
            EntityKind::SynergyBadge => {
                bounded(kind, index, MAX_BADGES)?;
                let active = collected(&mut synergies, confidence, order);
                if let Some((name, count)) = parse_synergy(label) {
                    active.insert(name, count);
                }
            }
            EntityKind::ItemSlot => {
                bounded(kind, index, MAX_BADGES)?;
                let names = collected(&mut items, confidence, order);
                if !is_empty_label(label) {
                    names.insert(index, label.to_string());
                }
            }
        }
    }

    if let Some(units) = board {
        writes.push(Write {
            kind: EntityKind::BoardCell,
            confidence: units.confidence,
            order: units.order,
            assignment: Assignment::Board(units.value.into_values().collect()),
        });
    }
    if let Some(units) = bench {
        writes.push(Write {
            kind: EntityKind::BenchSlot,
            confidence: units.confidence,
            order: units.order,
            assignment: Assignment::Bench(units.value.into_values().collect()),
        });
    }
    if let Some(active) = synergies {
        writes.push(Write {
            kind: EntityKind::SynergyBadge,
            confidence: active.confidence,
            order: active.order,
            assignment: Assignment::Synergies(active.value),
        });
    }
    if let Some(names) = items {
        writes.push(Write {
            kind: EntityKind::ItemSlot,
            confidence: names.confidence,
            order: names.order,
            assignment: Assignment::Items(names.value.into_values().collect()),
        });
    }
    Ok(writes)
}

/// Pick one assignment per field: the last writer of each entity kind, then
/// across kinds the higher confidence, with later writes winning ties.
fn resolve(writes: Vec<Write>) -> Vec<Assignment> {
    let mut last_per_kind: BTreeMap<(StateField, EntityKind), Write> = BTreeMap::new();
    for write in writes {
        last_per_kind.insert((write.assignment.field(), write.kind), write);
    }
    let mut winners: BTreeMap<StateField, Write> = BTreeMap::new();
    for ((field, _), write) in last_per_kind {
        match winners.get(&field) {
            Some(current)
                if current.confidence > write.confidence
                    || (current.confidence == write.confidence && current.order > write.order) => {}
            _ => {
                winners.insert(field, write);
            }
        }
    }
    winners
        .into_values()
        .map(|write| write.assignment)
        .collect()
}
