//! Localized view of a campaign's rank space.
//!
//! A reward only touches the ranks between a mover's old and new position, so the engine
//! loads just those ranges, applies moves in memory and writes back the difference.

use std::collections::{BTreeMap, HashMap};

use crate::waitlist::domain::EntrantId;
use crate::waitlist::repository::PositionAssignment;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("ranks {from}..={to} are not loaded")]
    NotLoaded { from: u32, to: u32 },
    #[error("entrant {entrant} is not at position {position}")]
    Stale { entrant: EntrantId, position: u32 },
}

#[derive(Debug, Default)]
pub struct RankWindow {
    slots: BTreeMap<u32, EntrantId>,
    /// Reverse of `slots`.
    positions: HashMap<EntrantId, u32>,
    original: HashMap<EntrantId, u32>,
    /// Disjoint, sorted, inclusive ranges already read from the repository.
    loaded: Vec<(u32, u32)>,
}

impl RankWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sub-ranges of `from..=to` that still have to be read.
    pub fn missing(&self, from: u32, to: u32) -> Vec<(u32, u32)> {
        let mut gaps = Vec::new();
        let mut cursor = from;
        for &(start, end) in &self.loaded {
            if cursor > to {
                break;
            }
            if end < cursor {
                continue;
            }
            if start > cursor {
                gaps.push((cursor, (start - 1).min(to)));
            }
            cursor = cursor.max(end.saturating_add(1));
        }
        if cursor <= to {
            gaps.push((cursor, to));
        }
        gaps
    }

    /// Record the live occupants of `from..=to` as read from storage.
    ///
    /// Only call this for ranges returned by [`RankWindow::missing`]; loaded ranges may
    /// already hold moved entrants.
    pub fn load<I>(&mut self, from: u32, to: u32, occupants: I)
    where
        I: IntoIterator<Item = (u32, EntrantId)>,
    {
        for (position, id) in occupants {
            self.slots.insert(position, id);
            self.positions.insert(id, position);
            self.original.entry(id).or_insert(position);
        }
        self.loaded.push((from, to));
        self.loaded.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.loaded.len());
        for (start, end) in self.loaded.drain(..) {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        self.loaded = merged;
    }

    fn covers(&self, from: u32, to: u32) -> bool {
        self.loaded
            .iter()
            .any(|&(start, end)| start <= from && to <= end)
    }

    pub fn position_of(&self, entrant: &EntrantId) -> Option<u32> {
        self.positions.get(entrant).copied()
    }

    /// Disjoint inclusive ranges read so far, ascending.
    pub fn loaded_ranges(&self) -> &[(u32, u32)] {
        &self.loaded
    }

    /// Move `entrant` from `from` to `to` (`to <= from`), shifting every occupant of
    /// `to..from` back by one rank. Returns how many occupants shifted.
    pub fn promote(&mut self, entrant: EntrantId, from: u32, to: u32) -> Result<usize, WindowError> {
        if to >= from {
            return Ok(0);
        }
        if !self.covers(to, from) {
            return Err(WindowError::NotLoaded { from: to, to: from });
        }
        if self.slots.get(&from) != Some(&entrant) {
            return Err(WindowError::Stale {
                entrant,
                position: from,
            });
        }

        self.slots.remove(&from);
        let displaced: Vec<(u32, EntrantId)> = self
            .slots
            .range(to..from)
            .rev()
            .map(|(position, id)| (*position, *id))
            .collect();
        for (position, id) in &displaced {
            self.slots.remove(position);
            self.slots.insert(position + 1, *id);
            self.positions.insert(*id, position + 1);
        }
        self.slots.insert(to, entrant);
        self.positions.insert(entrant, to);
        Ok(displaced.len())
    }

    /// Every loaded entrant whose rank differs from what storage holds.
    pub fn assignments(&self) -> Vec<PositionAssignment> {
        self.slots
            .iter()
            .filter(|&(position, id)| self.original.get(id) != Some(position))
            .map(|(position, id)| PositionAssignment {
                entrant_id: *id,
                position: *position,
            })
            .collect()
    }

    pub fn occupants(&self, from: u32, to: u32) -> Vec<(u32, EntrantId)> {
        self.slots
            .range(from..=to)
            .map(|(position, id)| (*position, *id))
            .collect()
    }
}
