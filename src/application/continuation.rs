//! Post-commit side effects.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::warn;

use crate::error::Result;

/// Effects to run once a commit has landed. Failures are logged only.
#[derive(Default)]
#[must_use = "a continuation does nothing until it is run"]
pub struct Continuation {
    effects: Vec<(&'static str, BoxFuture<'static, Result<()>>)>,
}

impl Continuation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, name: &'static str, effect: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.effects.push((name, effect.boxed()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Run every effect in order. Returns how many failed.
    pub async fn run(self) -> usize {
        let mut failures = 0;
        for (name, effect) in self.effects {
            if let Err(e) = effect.await {
                failures += 1;
                warn!(effect = name, error = %e, "post-commit effect failed");
            }
        }
        failures
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.effects.iter().map(|(name, _)| *name).collect();
        f.debug_struct("Continuation").field("effects", &names).finish()
    }
}

/// A committed result and the side effects still to run.
#[derive(Debug)]
#[must_use]
pub struct Committed<T> {
    pub value: T,
    pub continuation: Continuation,
}

impl<T> Committed<T> {
    pub fn new(value: T, continuation: Continuation) -> Self {
        Self {
            value,
            continuation,
        }
    }

    /// Run the continuation and return the value.
    pub async fn finish(self) -> T {
        self.continuation.run().await;
        self.value
    }

    /// Spawn the continuation on the runtime and return the value.
    pub fn detach(self) -> T {
        if !self.continuation.is_empty() {
            tokio::spawn(self.continuation.run());
        }
        self.value
    }
}
