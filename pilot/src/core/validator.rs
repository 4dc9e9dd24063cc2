//! Legality checks applied to a proposed action before it may be queued.

use crate::core::error::Rejection;
use crate::core::state::GameState;
use crate::core::types::{
    Action, ActionType, BOARD_COLS, BOARD_ROWS, Economy, Position, SHOP_SLOTS, Unit,
};

/// Check `action` against the current snapshot.
///
/// Rejections carry a human-readable reason; callers attribute them to the
/// decision source. Validation never touches the budget ledger.
pub fn validate(action: &Action, state: &GameState, economy: &Economy) -> Result<(), Rejection> {
    let kind = action.kind();
    let reject = |reason: String| Err(Rejection::new(kind, reason));
    match kind {
        ActionType::None => Ok(()),
        ActionType::BuyHero => {
            let Some(Position::Shop { slot }) = action.position() else {
                return reject("buy-hero needs a shop slot position".to_string());
            };
            if usize::from(slot) >= SHOP_SLOTS {
                return reject(format!("shop slot {slot} does not exist"));
            }
            let Some(offer) = state.shop_offer(usize::from(slot)) else {
                return reject(format!("shop slot {slot} is empty"));
            };
            if let Some(target) = action.target()
                && target != offer.name
            {
                return reject(format!(
                    "shop slot {slot} holds {} not {target}",
                    offer.name
                ));
            }
            if state.gold < offer.cost {
                return reject(format!(
                    "gold {} below cost {} of {}",
                    state.gold, offer.cost, offer.name
                ));
            }
            Ok(())
        }
        ActionType::SellHero => {
            let Some(position) = action.position() else {
                return reject("sell-hero needs a position".to_string());
            };
            hero_at(action, state, position).map(|_| ())
        }
        ActionType::MoveHero => {
            let Some(from) = action.position() else {
                return reject("move-hero needs a source position".to_string());
            };
            let Some(to) = action.destination() else {
                return reject("move-hero needs a destination".to_string());
            };
            hero_at(action, state, from)?;
            if !in_bounds(to, state) {
                return reject(format!("destination {to} is off the board and bench"));
            }
            if from == to {
                return reject(format!("source and destination are both {to}"));
            }
            if from.is_bench() && to.is_board() && state.unit_at(to).is_none() {
                let level = state.level as usize;
                if state.board.len() >= level {
                    return reject(format!("board already holds {level} heroes"));
                }
            }
            Ok(())
        }
        ActionType::LevelUp | ActionType::BuyExperience => {
            let cost = if kind == ActionType::LevelUp {
                economy.level_up_cost
            } else {
                economy.buy_experience_cost
            };
            if state.level >= economy.max_level {
                return reject(format!("already at max level {}", economy.max_level));
            }
            if state.gold < cost {
                return reject(format!("gold {} below cost {cost}", state.gold));
            }
            Ok(())
        }
        ActionType::RefreshShop => {
            if state.gold < economy.refresh_cost {
                return reject(format!(
                    "gold {} below refresh cost {}",
                    state.gold, economy.refresh_cost
                ));
            }
            Ok(())
        }
    }
}

fn in_bounds(position: Position, state: &GameState) -> bool {
    match position {
        Position::Board { row, col } => row < BOARD_ROWS && col < BOARD_COLS,
        Position::Bench { index } => usize::from(index) < state.bench_capacity(),
        Position::Shop { .. } => false,
    }
}

fn hero_at<'a>(
    action: &Action,
    state: &'a GameState,
    position: Position,
) -> Result<&'a Unit, Rejection> {
    let kind = action.kind();
    if !in_bounds(position, state) {
        return Err(Rejection::new(
            kind,
            format!("{position} is not a board or bench slot"),
        ));
    }
    let Some(unit) = state.unit_at(position) else {
        return Err(Rejection::new(kind, format!("no hero at {position}")));
    };
    if let Some(target) = action.target()
        && target != unit.hero.name
    {
        return Err(Rejection::new(
            kind,
            format!("{position} holds {} not {target}", unit.hero.name),
        ));
    }
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bench_unit, board_unit, offer, prep_state};

    fn check(action: &Action, state: &GameState) -> Result<(), Rejection> {
        validate(action, state, &Economy::default())
    }

    #[test]
    fn buy_accepted_when_gold_covers_cost() {
        let mut state = prep_state(4);
        state.shop[0] = Some(offer("Garen", 4, &[]));
        assert!(check(&Action::buy_hero(0, "Garen"), &state).is_ok());
    }

    #[test]
    fn buy_rejected_when_gold_short() {
        let mut state = prep_state(3);
        state.shop[0] = Some(offer("Garen", 4, &[]));
        let err = check(&Action::buy_hero(0, "Garen"), &state).unwrap_err();
        assert_eq!(err.kind, ActionType::BuyHero);
        assert!(err.reason.contains("below cost"));
    }

    #[test]
    fn buy_rejected_for_empty_or_mismatched_slot() {
        let mut state = prep_state(10);
        assert!(check(&Action::buy_hero(1, "Garen"), &state).is_err());
        state.shop[1] = Some(offer("Lux", 1, &[]));
        let err = check(&Action::buy_hero(1, "Garen"), &state).unwrap_err();
        assert!(err.reason.contains("holds Lux"));
        assert!(check(&Action::buy_hero(7, "Lux"), &state).is_err());
    }

    #[test]
    fn sell_requires_hero_at_position() {
        let mut state = prep_state(0);
        state.bench.push(bench_unit("Garen", 2));
        assert!(check(&Action::sell_hero(Position::Bench { index: 2 }, "Garen"), &state).is_ok());
        assert!(check(&Action::sell_hero(Position::Bench { index: 3 }, "Garen"), &state).is_err());
        assert!(check(&Action::sell_hero(Position::Bench { index: 2 }, "Lux"), &state).is_err());
    }

    #[test]
    fn move_respects_board_capacity() {
        let mut state = prep_state(0);
        state.board.push(board_unit("Lux", 0, 0));
        state.bench.push(bench_unit("Garen", 0));
        let to_board = Action::move_hero(
            Position::Bench { index: 0 },
            Position::Board { row: 1, col: 1 },
            "Garen",
        );
        assert!(check(&to_board, &state).is_err());
        state.level = 2;
        assert!(check(&to_board, &state).is_ok());
    }

    #[test]
    fn move_rejects_out_of_bounds_destination() {
        let mut state = prep_state(0);
        state.bench.push(bench_unit("Garen", 0));
        let off_board = Action::move_hero(
            Position::Bench { index: 0 },
            Position::Board { row: 4, col: 0 },
            "Garen",
        );
        assert!(check(&off_board, &state).is_err());
        let same = Action::move_hero(
            Position::Bench { index: 0 },
            Position::Bench { index: 0 },
            "Garen",
        );
        assert!(check(&same, &state).is_err());
    }

    #[test]
    fn fixed_cost_actions_check_gold_and_level() {
        let mut state = prep_state(3);
        assert!(check(&Action::level_up(), &state).is_err());
        assert!(check(&Action::buy_experience(), &state).is_err());
        assert!(check(&Action::refresh_shop(), &state).is_ok());
        state.gold = 4;
        assert!(check(&Action::level_up(), &state).is_ok());
        state.level = 9;
        assert!(check(&Action::buy_experience(), &state).is_err());
    }

    #[test]
    fn none_is_always_valid() {
        assert!(check(&Action::none(), &GameState::default()).is_ok());
    }
}
