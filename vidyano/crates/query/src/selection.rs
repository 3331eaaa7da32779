//! Selection over a partially loaded result set.
//!
//! The baseline for every row is `all_selected XOR inverse`; rows listed as
//! toggled flip that baseline. Loaded rows are tracked by id. Rows that were
//! toggled before they loaded are tracked by index until they arrive.

use std::collections::{BTreeSet, HashSet};

use core_types::ItemId;

use crate::error::ValidationError;

/// Public view of the select-all state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectAllState {
    pub is_available: bool,
    pub all_selected: bool,
    pub inverse: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SelectionTracker {
    all_selected: bool,
    inverse: bool,
    toggled_ids: HashSet<ItemId>,
    toggled_indices: BTreeSet<usize>,
    max_selected: Option<u32>,
}

impl SelectionTracker {
    pub fn new(max_selected: Option<u32>) -> Self {
        Self {
            max_selected,
            ..Self::default()
        }
    }

    pub fn all_selected(&self) -> bool {
        self.all_selected
    }

    pub fn inverse(&self) -> bool {
        self.inverse
    }

    fn baseline(&self) -> bool {
        self.all_selected ^ self.inverse
    }

    fn toggled(&self, index: usize, id: Option<&ItemId>) -> bool {
        id.is_some_and(|id| self.toggled_ids.contains(id)) || self.toggled_indices.contains(&index)
    }

    pub fn is_selected(&self, index: usize, id: Option<&ItemId>) -> bool {
        self.baseline() ^ self.toggled(index, id)
    }

    pub fn selected_count(&self, total_items: usize) -> u64 {
        let toggled = (self.toggled_ids.len() + self.toggled_indices.len()) as u64;
        if self.baseline() {
            (total_items as u64).saturating_sub(toggled)
        } else {
            toggled
        }
    }

    /// Ids that differ from the baseline.
    pub fn toggled_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.toggled_ids.iter()
    }

    pub fn set_selected(
        &mut self,
        index: usize,
        id: Option<&ItemId>,
        selected: bool,
        total_items: usize,
    ) -> Result<bool, ValidationError> {
        if self.is_selected(index, id) == selected {
            return Ok(false);
        }
        self.checked(total_items, |next| next.flip(index, id))?;
        Ok(true)
    }

    /// Apply `selected` to every index in `range`. `id_of` resolves loaded rows.
    pub fn select_range(
        &mut self,
        range: std::ops::RangeInclusive<usize>,
        selected: bool,
        total_items: usize,
        id_of: impl Fn(usize) -> Option<ItemId>,
    ) -> Result<(), ValidationError> {
        self.checked(total_items, |next| {
            for index in range {
                let id = id_of(index);
                if next.is_selected(index, id.as_ref()) != selected {
                    next.flip(index, id.as_ref());
                }
            }
        })
    }

    pub fn select_all(&mut self, total_items: usize) -> Result<(), ValidationError> {
        self.checked(total_items, |next| {
            next.all_selected = true;
            next.inverse = false;
            next.clear_toggles();
        })
    }

    pub fn clear(&mut self) {
        self.all_selected = false;
        self.inverse = false;
        self.clear_toggles();
    }

    /// Flip every row, loaded or not.
    pub fn invert(&mut self, total_items: usize) -> Result<(), ValidationError> {
        self.checked(total_items, |next| next.inverse = !next.inverse)
    }

    /// A row toggled by index just loaded; track it by id from now on.
    pub fn reconcile_loaded(&mut self, index: usize, id: &ItemId) {
        if self.toggled_indices.remove(&index) && !self.toggled_ids.remove(id) {
            self.toggled_ids.insert(id.clone());
        }
    }

    /// New result set without keep-selection: select-all resets and only
    /// toggles for ids in `present` (the new first page) survive.
    pub fn retain_present(&mut self, present: &HashSet<ItemId>) {
        self.all_selected = false;
        self.inverse = false;
        self.toggled_indices.clear();
        self.toggled_ids.retain(|id| present.contains(id));
    }

    /// Index toggles refer to the previous result set and cannot survive it.
    pub fn forget_indices(&mut self) {
        self.toggled_indices.clear();
    }

    pub fn move_index(&mut self, from: usize, to: usize) {
        if from == to || self.toggled_indices.is_empty() {
            return;
        }
        self.toggled_indices = std::mem::take(&mut self.toggled_indices)
            .into_iter()
            .map(|i| match i {
                i if i == from => to,
                i if from < to && i > from && i <= to => i - 1,
                i if to < from && i >= to && i < from => i + 1,
                i => i,
            })
            .collect();
    }

    fn flip(&mut self, index: usize, id: Option<&ItemId>) {
        match id {
            Some(id) => {
                if !self.toggled_ids.remove(id) {
                    self.toggled_ids.insert(id.clone());
                }
            }
            None => {
                if !self.toggled_indices.remove(&index) {
                    self.toggled_indices.insert(index);
                }
            }
        }
    }

    fn clear_toggles(&mut self) {
        self.toggled_ids.clear();
        self.toggled_indices.clear();
    }

    /// Run `change` on a copy and commit it unless it would push the
    /// selection past the maximum. Changes that shrink the selection are
    /// always accepted.
    fn checked(
        &mut self,
        total_items: usize,
        change: impl FnOnce(&mut Self),
    ) -> Result<(), ValidationError> {
        let mut next = self.clone();
        change(&mut next);
        if let Some(max) = self.max_selected {
            let requested = next.selected_count(total_items);
            if requested > u64::from(max) && requested > self.selected_count(total_items) {
                return Err(ValidationError::MaxSelectedExceeded { requested, max });
            }
        }
        *self = next;
        Ok(())
    }
}
