/// Handle returned by [`Observers::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Box<dyn FnMut(&E)>;

struct Entry<K, E> {
    id: SubscriptionId,
    key: Option<K>,
    handler: Handler<E>,
}

/// Keyed publish/subscribe hub, owned by whichever component is the authority
/// for the events it carries. Handlers for the same key are additive and run
/// in registration order.
pub struct Observers<K, E> {
    next_id: u64,
    entries: Vec<Entry<K, E>>,
}

impl<K, E> Default for Observers<K, E> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<K, E> std::fmt::Debug for Observers<K, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("handlers", &self.entries.len())
            .finish()
    }
}

impl<K: Copy + PartialEq, E> Observers<K, E> {
    pub fn subscribe<F>(&mut self, key: K, handler: F) -> SubscriptionId
    where
        F: FnMut(&E) + 'static,
    {
        self.insert(Some(key), Box::new(handler))
    }

    /// Registers a handler that receives every emitted event regardless of key.
    pub fn subscribe_any<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&E) + 'static,
    {
        self.insert(None, Box::new(handler))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Delivers `event` to every handler registered for `key` (and to
    /// catch-all handlers). Returns how many handlers ran.
    pub fn emit(&mut self, key: K, event: &E) -> usize {
        let mut delivered = 0usize;
        for entry in &mut self.entries {
            let matches = match entry.key {
                Some(entry_key) => entry_key == key,
                None => true,
            };
            if matches {
                (entry.handler)(event);
                delivered += 1;
            }
        }
        delivered
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: Option<K>, handler: Handler<E>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.entries.push(Entry { id, key, handler });
        id
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Topic {
        Alpha,
        Beta,
    }

    #[test]
    fn handlers_are_additive_and_keyed() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut hub: Observers<Topic, u32> = Observers::default();

        let first = Rc::clone(&seen);
        hub.subscribe(Topic::Alpha, move |value| first.borrow_mut().push(("a1", *value)));
        let second = Rc::clone(&seen);
        hub.subscribe(Topic::Alpha, move |value| second.borrow_mut().push(("a2", *value)));
        let third = Rc::clone(&seen);
        hub.subscribe(Topic::Beta, move |value| third.borrow_mut().push(("b", *value)));

        assert_eq!(hub.emit(Topic::Alpha, &7), 2);
        assert_eq!(*seen.borrow(), vec![("a1", 7), ("a2", 7)]);
    }

    #[test]
    fn catch_all_handlers_see_every_key() {
        let count = Rc::new(RefCell::new(0u32));
        let mut hub: Observers<Topic, ()> = Observers::default();
        let counter = Rc::clone(&count);
        hub.subscribe_any(move |_| *counter.borrow_mut() += 1);

        hub.emit(Topic::Alpha, &());
        hub.emit(Topic::Beta, &());
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn unsubscribe_and_clear_stop_delivery() {
        let count = Rc::new(RefCell::new(0u32));
        let mut hub: Observers<Topic, ()> = Observers::default();
        let counter = Rc::clone(&count);
        let id = hub.subscribe(Topic::Alpha, move |_| *counter.borrow_mut() += 1);

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.emit(Topic::Alpha, &()), 0);

        let counter = Rc::clone(&count);
        hub.subscribe(Topic::Alpha, move |_| *counter.borrow_mut() += 1);
        hub.clear();
        hub.clear();
        assert!(hub.is_empty());
        hub.emit(Topic::Alpha, &());
        assert_eq!(*count.borrow(), 0);
    }
}
