use std::collections::BTreeSet;

use tracing::debug;

use crate::observers::{Observers, SubscriptionId};

/// Browser-style numeric key code (32 = space, 37..=40 = arrows).
pub type KeyCode = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEdge {
    Pressed(KeyCode),
    Released(KeyCode),
}

/// Codes currently held down. Iteration is always ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveKeySet {
    down: BTreeSet<KeyCode>,
}

impl ActiveKeySet {
    pub fn set(&mut self, code: KeyCode, is_down: bool) {
        if is_down {
            self.down.insert(code);
        } else {
            self.down.remove(&code);
        }
    }

    pub fn is_down(&self, code: KeyCode) -> bool {
        self.down.contains(&code)
    }

    pub fn iter(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.down.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.down.len()
    }

    pub fn is_empty(&self) -> bool {
        self.down.is_empty()
    }

    pub fn clear(&mut self) {
        self.down.clear();
    }

    fn apply(&mut self, edge: KeyEdge) {
        match edge {
            KeyEdge::Pressed(code) => self.set(code, true),
            KeyEdge::Released(code) => self.set(code, false),
        }
    }
}

impl FromIterator<KeyCode> for ActiveKeySet {
    fn from_iter<I: IntoIterator<Item = KeyCode>>(iter: I) -> Self {
        Self {
            down: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeyChange;

/// Edge-triggered keyboard capture. Every accepted edge publishes the whole
/// current combination, never the single key that changed.
#[derive(Debug, Default)]
pub struct KeyCatcher {
    keys: ActiveKeySet,
    installed: bool,
    listeners: Observers<KeyChange, ActiveKeySet>,
}

impl KeyCatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_handlers(&mut self) {
        debug!("key_catcher_handlers_installed");
        self.keys.clear();
        self.installed = true;
    }

    pub fn uninstall_handlers(&mut self) {
        if self.installed {
            debug!("key_catcher_handlers_uninstalled");
        }
        self.installed = false;
        self.keys.clear();
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn keys(&self) -> &ActiveKeySet {
        &self.keys
    }

    pub fn on_keychange<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&ActiveKeySet) + 'static,
    {
        self.listeners.subscribe(KeyChange, handler)
    }

    pub fn off(&mut self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Applies one edge and notifies listeners. Returns the updated set, or
    /// `None` when handlers are not installed and the edge was ignored.
    pub fn handle_edge(&mut self, edge: KeyEdge) -> Option<&ActiveKeySet> {
        if !self.installed {
            return None;
        }
        debug!(?edge, "key_edge");
        self.keys.apply(edge);
        self.listeners.emit(KeyChange, &self.keys);
        Some(&self.keys)
    }

    pub fn destroy(&mut self) {
        self.uninstall_handlers();
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn replayed_edges_leave_exactly_the_held_codes() {
        let edges = [
            KeyEdge::Pressed(37),
            KeyEdge::Pressed(32),
            KeyEdge::Pressed(39),
            KeyEdge::Released(37),
            KeyEdge::Pressed(32),
            KeyEdge::Released(40),
            KeyEdge::Released(32),
            KeyEdge::Pressed(32),
        ];
        let mut catcher = KeyCatcher::new();
        catcher.install_handlers();
        for edge in edges {
            catcher.handle_edge(edge);
        }

        let held: Vec<KeyCode> = catcher.keys().iter().collect();
        assert_eq!(held, vec![32, 39]);
    }

    #[test]
    fn keychange_carries_the_full_combination() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut catcher = KeyCatcher::new();
        catcher.install_handlers();
        let sink = Rc::clone(&seen);
        catcher.on_keychange(move |keys| sink.borrow_mut().push(keys.iter().collect::<Vec<_>>()));

        catcher.handle_edge(KeyEdge::Pressed(39));
        catcher.handle_edge(KeyEdge::Pressed(32));
        catcher.handle_edge(KeyEdge::Released(39));

        assert_eq!(*seen.borrow(), vec![vec![39], vec![32, 39], vec![32]]);
    }

    #[test]
    fn edges_are_ignored_until_installed() {
        let mut catcher = KeyCatcher::new();
        assert!(catcher.handle_edge(KeyEdge::Pressed(32)).is_none());
        assert!(catcher.keys().is_empty());

        catcher.install_handlers();
        catcher.handle_edge(KeyEdge::Pressed(32));
        catcher.install_handlers();
        assert!(catcher.keys().is_empty());
    }

    #[test]
    fn repeated_teardown_never_refires_removed_listeners() {
        let count = Rc::new(RefCell::new(0u32));
        let mut catcher = KeyCatcher::new();
        catcher.uninstall_handlers();
        catcher.install_handlers();
        let counter = Rc::clone(&count);
        catcher.on_keychange(move |_| *counter.borrow_mut() += 1);
        catcher.handle_edge(KeyEdge::Pressed(38));

        catcher.destroy();
        catcher.destroy();
        catcher.install_handlers();
        catcher.handle_edge(KeyEdge::Pressed(38));

        assert_eq!(*count.borrow(), 1);
    }
}
