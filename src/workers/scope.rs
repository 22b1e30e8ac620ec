//! Scoped list of acquired resources, released in reverse order

use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, warn};

type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Teardown steps of one run.
///
/// Each acquisition pushes the step that undoes it. [`release`](Self::release)
/// runs them last-in first-out, so a partially built run unwinds exactly the
/// steps that completed.
pub struct ResourceScope {
    label: &'static str,
    entries: Vec<(&'static str, Teardown)>,
}

impl ResourceScope {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Vec::new(),
        }
    }

    pub fn push<F, Fut>(&mut self, name: &'static str, teardown: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.entries
            .push((name, Box::new(move || teardown().boxed())));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every teardown step, newest first
    pub async fn release(mut self) {
        while let Some((name, teardown)) = self.entries.pop() {
            debug!("{}: releasing {}", self.label, name);
            teardown().await;
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(
                "{}: dropped with {} unreleased resource(s)",
                self.label,
                self.entries.len()
            );
        }
    }
}

impl std::fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.entries.iter().map(|(name, _)| *name).collect();
        f.debug_struct("ResourceScope")
            .field("label", &self.label)
            .field("entries", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_release_in_reverse_order() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let mut scope = ResourceScope::new("test");

        for name in ["device", "session", "effect"] {
            let released = released.clone();
            scope.push(name, move || async move {
                released.lock().unwrap().push(name);
            });
        }
        assert_eq!(scope.len(), 3);

        scope.release().await;
        assert_eq!(
            *released.lock().unwrap(),
            vec!["effect", "session", "device"]
        );
    }

    #[tokio::test]
    async fn test_empty_scope_releases_nothing() {
        let scope = ResourceScope::new("empty");
        assert!(scope.is_empty());
        scope.release().await;
    }
}
