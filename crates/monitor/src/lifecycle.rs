use crate::error::Error;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A background collector with a single terminal outcome.
///
/// `start` performs the synchronous part of the setup and returns once the
/// collector is running. `done` fires exactly once, after which `status`
/// keeps returning the same report or the same error.
#[async_trait::async_trait]
pub trait Monitor: Send + Sync + 'static {
    type Report: Send + Sync + 'static;

    async fn start(&self) -> Result<(), Error>;

    /// Request termination. Never blocks.
    fn cancel(&self);

    fn done(&self) -> CancellationToken;

    /// When `done` fired, if it has.
    fn done_at(&self) -> Option<Instant>;

    fn status(&self) -> Result<Arc<Self::Report>, Error>;
}

/// Write-once terminal state shared between a monitor and its collector.
#[derive(Debug)]
pub struct Completion<R> {
    done: CancellationToken,
    status: OnceLock<Result<Arc<R>, Arc<Error>>>,
    done_at: OnceLock<Instant>,
}

impl<R> Default for Completion<R> {
    fn default() -> Self {
        Self {
            done: CancellationToken::new(),
            status: OnceLock::new(),
            done_at: OnceLock::new(),
        }
    }
}

impl<R> Completion<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    pub fn done_at(&self) -> Option<Instant> {
        self.done_at.get().copied()
    }

    /// Record the outcome and fire `done`. Only the first call has an
    /// effect; it returns whether this call was the one that finished.
    pub fn finish(&self, outcome: Result<R, Error>) -> bool {
        self.settle(outcome.map(Arc::new).map_err(Arc::new))
    }

    /// Finish with `err` and hand back an error sharing it.
    pub fn fail(&self, err: Error) -> Error {
        let err = Arc::new(err);
        self.settle(Err(Arc::clone(&err)));
        Error::Failed(err)
    }

    fn settle(&self, outcome: Result<Arc<R>, Arc<Error>>) -> bool {
        let finished = self.status.set(outcome).is_ok();
        if finished {
            let _ = self.done_at.set(Instant::now());
            self.done.cancel();
        }
        finished
    }

    pub fn status(&self) -> Result<Arc<R>, Error> {
        match self.status.get() {
            None => Err(Error::NotDone),
            Some(Ok(report)) => Ok(Arc::clone(report)),
            Some(Err(err)) => Err(Error::Failed(Arc::clone(err))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_before_finish_is_not_done() {
        let completion = Completion::<u32>::new();
        assert!(matches!(completion.status(), Err(Error::NotDone)));
        assert!(!completion.is_done());
        assert!(completion.done_at().is_none());
    }

    #[test]
    fn first_outcome_wins_and_is_shared() {
        let completion = Completion::new();
        assert!(completion.finish(Ok(7u32)));
        assert!(!completion.finish(Ok(8)));
        assert!(!completion.finish(Err(Error::WorkerGone)));

        let a = completion.status().unwrap();
        let b = completion.status().unwrap();
        assert_eq!(*a, 7);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(completion.done().is_cancelled());
        assert!(completion.done_at().is_some());
    }

    #[test]
    fn failures_are_shared_too() {
        let completion = Completion::<()>::new();
        let returned = completion.fail(Error::WorkerGone);
        let (Error::Failed(a), Err(Error::Failed(b))) = (returned, completion.status()) else {
            panic!("expected shared failures");
        };
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(*a, Error::WorkerGone));
    }

    #[tokio::test]
    async fn every_done_handle_observes_the_same_signal() {
        let completion = Arc::new(Completion::<()>::new());
        let first = completion.done();
        let second = completion.done();
        let finisher = Arc::clone(&completion);
        tokio::spawn(async move { finisher.finish(Ok(())) });
        first.cancelled().await;
        second.cancelled().await;
        assert!(completion.done().is_cancelled());
    }
}
