//! Pure helpers for building optimistic patches.
//!
//! Nothing here reads the cache or performs I/O: every function maps a
//! current value and an intent to the patched value. Toggle-style intents
//! carry the previously known state explicitly instead of re-deriving it
//! from the cache, so a burst of rapid toggles cannot drift from a stale read.

use std::collections::BTreeSet;

/// An optimistic intent that can patch values of type `T`.
pub trait PatchIntent<T> {
  fn build_patch(&self, current: T) -> T;
}

/// Counter after toggling a membership that was `was_on` before.
///
/// Never goes below zero, even when a decrement races ahead of a counter
/// the server already reports as zero.
pub fn toggle_count(count: u32, was_on: bool) -> u32 {
  if was_on {
    count.saturating_sub(1)
  } else {
    count.saturating_add(1)
  }
}

/// Membership set after toggling `id`, given its previous state.
pub fn toggle_membership(mut set: BTreeSet<String>, id: &str, was_on: bool) -> BTreeSet<String> {
  if was_on {
    set.remove(id);
  } else {
    set.insert(id.to_string());
  }
  set
}

/// A choice that carries a running tally (poll options, reaction kinds).
pub trait Tally {
  fn choice_id(&self) -> &str;
  fn tally(&self) -> u32;
  fn set_tally(&mut self, tally: u32);
}

/// Move one vote from `previous` to `next` in a single pass.
///
/// Both adjustments land in the same returned value, so no intermediate
/// state with both or neither choice adjusted is ever observable. Choosing
/// the already-selected option is a no-op.
pub fn change_choice<T: Tally>(mut choices: Vec<T>, previous: Option<&str>, next: &str) -> Vec<T> {
  if previous == Some(next) {
    return choices;
  }
  for choice in &mut choices {
    if Some(choice.choice_id()) == previous {
      let tally = choice.tally().saturating_sub(1);
      choice.set_tally(tally);
    } else if choice.choice_id() == next {
      let tally = choice.tally().saturating_add(1);
      choice.set_tally(tally);
    }
  }
  choices
}
