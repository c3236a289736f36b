//! Subscription scope management.
//!
//! Manages the lifetime of property subscriptions using the RAII pattern.
//! When a scope is cleared or dropped, every subscription it owns is cancelled.

use std::cell::RefCell;

use crate::property::Subscription;

/// Owns the subscriptions of one row view.
///
/// # Example
/// ```ignore
/// let scope = SubscriptionScope::new();
/// let title = Property::constant("Sale".to_string());
/// scope.add(title.subscribe(|value| println!("{value}")));
/// scope.clear(); // no more callbacks
/// ```
#[derive(Default)]
pub struct SubscriptionScope {
    subscriptions: RefCell<Vec<Subscription>>,
}

impl SubscriptionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscription: Subscription) {
        self.subscriptions.borrow_mut().push(subscription);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.borrow().is_empty()
    }

    /// Cancel every subscription.
    pub fn clear(&self) {
        // Dropping a subscription may run arbitrary teardown; keep the borrow short.
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(subscriptions);
    }
}

impl std::fmt::Debug for SubscriptionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionScope")
            .field("subscriptions", &self.len())
            .finish()
    }
}
