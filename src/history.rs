//! Undo/redo for individually addressed parameters.

use std::collections::VecDeque;

use crate::params;

/// Maximum number of records kept on each stack.
pub const HISTORY_LIMIT: usize = 10_000;

/// Anything holding parameter values addressed by (id, layer).
pub trait ParamStore {
    /// Current value, or `None` if the parameter isn't present.
    fn read(&self, id: i32, layer: i32) -> Option<i32>;
    /// Writes a value without recording history. Returns false if the
    /// parameter isn't present.
    fn write(&mut self, id: i32, layer: i32, value: i32) -> bool;
}

/// A parameter value applied to a dump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edit {
    pub id: i32,
    pub layer: i32,
    pub value: i32,
}

/// Where an applied edit came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOrigin {
    User,
    Undo,
    Redo,
    /// Reported by the device.
    Remote,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Record {
    edit: Edit,
    /// This record and the one beneath it form one step.
    linked: bool,
}

#[derive(Debug, Default)]
pub struct History {
    undo: VecDeque<Record>,
    redo: VecDeque<Record>,
    suspended: usize,
    /// Envelope stage and layer of the last recorded edit, if it was an
    /// envelope edit.
    last_envelope: Option<(i32, i32)>,
}

fn push(stack: &mut VecDeque<Record>, record: Record) {
    stack.push_back(record);
    if stack.len() > HISTORY_LIMIT {
        stack.pop_front();
        if let Some(front) = stack.front_mut() {
            front.linked = false;
        }
    }
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Stops recording until a matching `resume`. Calls nest.
    pub fn suspend(&mut self) {
        self.suspended += 1;
        self.last_envelope = None;
    }

    pub fn resume(&mut self) {
        self.suspended = self.suspended.saturating_sub(1);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended > 0
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.last_envelope = None;
    }

    /// Records the current value of a parameter about to be changed by a
    /// fresh edit. Must be called before the store is written.
    pub fn record(&mut self, store: &impl ParamStore, id: i32, layer: i32) {
        self.redo.clear();
        if self.is_suspended() {
            return
        }

        let Some(value) = store.read(id, layer) else {
            return
        };

        if let Some(stage) = params::envelope_stage(id) {
            if self.last_envelope == Some((stage, layer)) {
                return
            }
            self.last_envelope = Some((stage, layer));
            if let Some(pair) = params::envelope_pair(id) {
                if let Some(pair_value) = store.read(pair, layer) {
                    push(&mut self.undo, Record {
                        edit: Edit { id: pair, layer, value: pair_value },
                        linked: false,
                    });
                    push(&mut self.undo, Record {
                        edit: Edit { id, layer, value },
                        linked: true,
                    });
                    return
                }
            }
        } else {
            self.last_envelope = None;
        }

        push(&mut self.undo, Record { edit: Edit { id, layer, value }, linked: false });
    }

    /// Reverts the most recent step and returns the values written.
    pub fn undo(&mut self, store: &mut impl ParamStore) -> Vec<Edit> {
        let Self { undo, redo, .. } = self;
        let edits = replay(undo, redo, store);
        self.last_envelope = None;
        edits
    }

    /// Reapplies the most recently undone step and returns the values
    /// written.
    pub fn redo(&mut self, store: &mut impl ParamStore) -> Vec<Edit> {
        let Self { undo, redo, .. } = self;
        let edits = replay(redo, undo, store);
        self.last_envelope = None;
        edits
    }
}

/// Pops one step from `from`, writes it to `store` and pushes the values
/// it replaced onto `to`.
fn replay(
    from: &mut VecDeque<Record>,
    to: &mut VecDeque<Record>,
    store: &mut impl ParamStore,
) -> Vec<Edit> {
    let mut popped = Vec::with_capacity(2);
    // a step is at most an envelope pair
    for _ in 0..2 {
        let Some(record) = from.pop_back() else {
            break
        };
        popped.push(record);
        if !record.linked {
            break
        }
    }

    let mut inverse = Vec::with_capacity(popped.len());
    let mut edits = Vec::with_capacity(popped.len());
    for record in &popped {
        let Edit { id, layer, value } = record.edit;
        if let Some(current) = store.read(id, layer) {
            inverse.push(Record { edit: Edit { id, layer, value: current }, linked: record.linked });
            if store.write(id, layer, value) {
                edits.push(record.edit);
            }
        }
    }

    for record in inverse.into_iter().rev() {
        push(to, record);
    }
    edits
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::Rng;

    use super::*;
    use crate::params::*;

    #[derive(Default, Clone, PartialEq, Debug)]
    struct Store(HashMap<(i32, i32), i32>);

    impl ParamStore for Store {
        fn read(&self, id: i32, layer: i32) -> Option<i32> {
            Some(*self.0.get(&(id, layer)).unwrap_or(&0))
        }

        fn write(&mut self, id: i32, layer: i32, value: i32) -> bool {
            self.0.insert((id, layer), value);
            true
        }
    }

    fn edit(history: &mut History, store: &mut Store, id: i32, layer: i32, value: i32) {
        history.record(&*store, id, layer);
        store.write(id, layer, value);
    }

    #[test]
    fn test_undo_redo() {
        let mut store = Store::default();
        let mut h = History::new();
        edit(&mut h, &mut store, LAYER_VOLUME, 0, 10);
        edit(&mut h, &mut store, LAYER_VOLUME, 0, 20);
        assert_eq!(h.undo_len(), 2);

        let applied = h.undo(&mut store);
        assert_eq!(applied, vec![Edit { id: LAYER_VOLUME, layer: 0, value: 10 }]);
        assert_eq!(store.read(LAYER_VOLUME, 0), Some(10));
        h.undo(&mut store);
        assert_eq!(store.read(LAYER_VOLUME, 0), Some(0));
        assert!(h.undo(&mut store).is_empty());

        h.redo(&mut store);
        h.redo(&mut store);
        assert_eq!(store.read(LAYER_VOLUME, 0), Some(20));
        assert!(!h.can_redo());
    }

    #[test]
    fn test_fresh_edit_clears_redo() {
        let mut store = Store::default();
        let mut h = History::new();
        edit(&mut h, &mut store, FILTER_FREQ, 1, 100);
        h.undo(&mut store);
        assert!(h.can_redo());
        edit(&mut h, &mut store, FILTER_Q, 1, 5);
        assert!(!h.can_redo());
        assert!(h.redo(&mut store).is_empty());
        assert_eq!(store.read(FILTER_FREQ, 1), Some(0));
    }

    #[test]
    fn test_envelope_pair_is_one_step() {
        let mut store = Store::default();
        store.write(AMP_ENV_ATK1_RATE, 0, 5);
        store.write(AMP_ENV_ATK1_LEVEL, 0, 7);
        let mut h = History::new();

        // a drag moves both rate and level many times
        for i in 0..50 {
            edit(&mut h, &mut store, AMP_ENV_ATK1_RATE, 0, 10 + i);
            edit(&mut h, &mut store, AMP_ENV_ATK1_LEVEL, 0, 20 + i);
        }
        assert_eq!(h.undo_len(), 2);

        let applied = h.undo(&mut store);
        assert_eq!(applied.len(), 2);
        assert_eq!(store.read(AMP_ENV_ATK1_RATE, 0), Some(5));
        assert_eq!(store.read(AMP_ENV_ATK1_LEVEL, 0), Some(7));

        h.redo(&mut store);
        assert_eq!(store.read(AMP_ENV_ATK1_RATE, 0), Some(59));
        assert_eq!(store.read(AMP_ENV_ATK1_LEVEL, 0), Some(69));
        assert_eq!(h.undo_len(), 2);
    }

    #[test]
    fn test_envelope_coalescing_ends() {
        let mut store = Store::default();
        let mut h = History::new();
        edit(&mut h, &mut store, AMP_ENV_ATK1_RATE, 0, 1);
        edit(&mut h, &mut store, AMP_ENV_ATK1_RATE, 1, 1);
        edit(&mut h, &mut store, LAYER_PAN, 0, 1);
        edit(&mut h, &mut store, AMP_ENV_ATK1_RATE, 0, 2);
        assert_eq!(h.undo_len(), 7);
        h.undo(&mut store);
        edit(&mut h, &mut store, AMP_ENV_ATK1_LEVEL, 0, 3);
        assert_eq!(h.undo_len(), 7);
    }

    #[test]
    fn test_suspend() {
        let mut store = Store::default();
        let mut h = History::new();
        h.suspend();
        h.suspend();
        edit(&mut h, &mut store, LAYER_VOLUME, 0, 1);
        h.resume();
        edit(&mut h, &mut store, LAYER_VOLUME, 1, 1);
        h.resume();
        assert!(!h.can_undo());
        edit(&mut h, &mut store, LAYER_VOLUME, 2, 1);
        assert_eq!(h.undo_len(), 1);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut store = Store::default();
        let mut h = History::new();
        edit(&mut h, &mut store, AMP_ENV_ATK1_RATE, 0, 1);
        for i in 0..HISTORY_LIMIT - 1 {
            edit(&mut h, &mut store, LAYER_VOLUME, (i % 4) as i32, i as i32);
        }
        assert_eq!(h.undo_len(), HISTORY_LIMIT);
        // the envelope companion fell off; its partner now stands alone
        for _ in 0..HISTORY_LIMIT {
            assert_eq!(h.undo(&mut store).len(), 1);
        }
        assert!(!h.can_undo());
    }

    #[test]
    fn test_undo_all_restores_initial_state() {
        let mut rng = rand::thread_rng();
        let ids = [LAYER_VOLUME, LAYER_PAN, FILTER_FREQ, AMP_ENV_ATK1_RATE, AMP_ENV_ATK1_LEVEL,
            FILTER_ENV_ATK1_RATE, CORD0_AMOUNT];
        let mut store = Store::default();
        // envelope companions are read and replayed too
        let seeded = ids.iter().flat_map(|&id| [Some(id), envelope_pair(id)]).flatten();
        for id in seeded {
            for layer in 0..NUM_LAYERS {
                store.write(id, layer, rng.gen_range(-64..64));
            }
        }
        assert!(store.0.contains_key(&(FILTER_ENV_ATK1_RATE + 1, 0)));
        let initial = store.clone();
        let mut h = History::new();

        for _ in 0..500 {
            let id = ids[rng.gen_range(0..ids.len())];
            let layer = rng.gen_range(0..NUM_LAYERS);
            edit(&mut h, &mut store, id, layer, rng.gen_range(-64..64));
        }
        let edited = store.clone();

        while h.can_undo() {
            h.undo(&mut store);
        }
        assert_eq!(store, initial);
        while h.can_redo() {
            h.redo(&mut store);
        }
        assert_eq!(store, edited);
    }
}
