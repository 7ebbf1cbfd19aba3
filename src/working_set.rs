//! The working set: active bounds and constraints with their positions in
//! the augmented system.

use crate::I;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveState {
    #[default]
    Inactive,
    ActiveLower,
    ActiveUpper,
    ActiveBoth,
}

impl ActiveState {
    pub fn is_active(self) -> bool {
        self != ActiveState::Inactive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingSetEntry {
    Variable(I),
    Constraint(I),
}

/// Active variable bounds and constraints.
///
/// Entries are appended in the order they become active; the position of an
/// entry is its row index in the augmented Jacobian. Positions are a
/// bijection onto `0..size()`.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    var_states: Vec<ActiveState>,
    cons_states: Vec<ActiveState>,

    var_positions: Vec<Option<I>>,
    cons_positions: Vec<Option<I>>,

    entries: Vec<WorkingSetEntry>,
}

impl WorkingSet {
    pub fn new(num_vars: I, num_cons: I) -> Self {
        Self {
            var_states: vec![ActiveState::Inactive; num_vars],
            cons_states: vec![ActiveState::Inactive; num_cons],
            var_positions: vec![None; num_vars],
            cons_positions: vec![None; num_cons],
            entries: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.var_states.fill(ActiveState::Inactive);
        self.cons_states.fill(ActiveState::Inactive);
        self.var_positions.fill(None);
        self.cons_positions.fill(None);
        self.entries.clear();
    }

    pub fn num_vars(&self) -> I {
        self.var_states.len()
    }

    pub fn num_cons(&self) -> I {
        self.cons_states.len()
    }

    pub fn add_variable(&mut self, index: I, state: ActiveState) {
        debug_assert!(state.is_active());
        debug_assert_eq!(self.var_states[index], ActiveState::Inactive);

        self.var_states[index] = state;
        self.var_positions[index] = Some(self.entries.len());
        self.entries.push(WorkingSetEntry::Variable(index));
    }

    pub fn add_constraint(&mut self, index: I, state: ActiveState) {
        debug_assert!(state.is_active());
        debug_assert_eq!(self.cons_states[index], ActiveState::Inactive);

        self.cons_states[index] = state;
        self.cons_positions[index] = Some(self.entries.len());
        self.entries.push(WorkingSetEntry::Constraint(index));
    }

    pub fn var_state(&self, index: I) -> ActiveState {
        self.var_states[index]
    }

    pub fn cons_state(&self, index: I) -> ActiveState {
        self.cons_states[index]
    }

    /// Position of an active variable in the augmented system.
    pub fn var_position(&self, index: I) -> Option<I> {
        self.var_positions[index]
    }

    /// Position of an active constraint in the augmented system.
    pub fn cons_position(&self, index: I) -> Option<I> {
        self.cons_positions[index]
    }

    pub fn size(&self) -> I {
        self.entries.len()
    }

    pub fn num_active_vars(&self) -> I {
        self.var_states.iter().filter(|s| s.is_active()).count()
    }

    pub fn num_active_cons(&self) -> I {
        self.cons_states.iter().filter(|s| s.is_active()).count()
    }

    /// Entries in position order.
    pub fn entries(&self) -> &[WorkingSetEntry] {
        &self.entries
    }

    /// Checks that positions form a bijection onto `0..size()` and that the
    /// size matches the number of active entries.
    pub fn valid(&self) -> bool {
        if self.size() != self.num_active_vars() + self.num_active_cons() {
            return false;
        }

        for (position, entry) in self.entries.iter().enumerate() {
            let stored = match entry {
                WorkingSetEntry::Variable(j) => self.var_positions[*j],
                WorkingSetEntry::Constraint(i) => self.cons_positions[*i],
            };

            if stored != Some(position) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_are_bijective() {
        let mut working_set = WorkingSet::new(3, 2);

        working_set.add_variable(1, ActiveState::ActiveLower);
        working_set.add_constraint(0, ActiveState::ActiveUpper);
        working_set.add_variable(2, ActiveState::ActiveBoth);

        assert_eq!(working_set.size(), 3);
        assert_eq!(working_set.var_position(1), Some(0));
        assert_eq!(working_set.cons_position(0), Some(1));
        assert_eq!(working_set.var_position(2), Some(2));
        assert_eq!(working_set.var_position(0), None);

        assert!(working_set.valid());

        working_set.reset();

        assert_eq!(working_set.size(), 0);
        assert!(working_set.valid());
    }
}
