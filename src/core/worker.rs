//! Background generation worker.
//!
//! The generator runs on its own thread. Requests go in over one channel and
//! outcomes come back over another; the authoring thread is the only writer
//! of the timeline and applies each outcome with
//! [`GenerationOutcome::apply_to`]. An outcome remembers the event it was
//! asked to continue, so one that arrives late still lands there.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::generation::{AttachError, GenerationEnvelope, GenerationError, GenerationRequest, StoryGenerator};
use crate::core::timeline::Timeline;
use crate::schema::event::EventId;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("generation worker has stopped")]
    Stopped,
}

struct Job {
    request: GenerationRequest,
    parent: Option<EventId>,
}

/// A finished generation call, success or failure.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub request: GenerationRequest,
    /// The event the request was submitted under. `None` means the head at
    /// the time the outcome is applied.
    pub parent: Option<EventId>,
    pub result: Result<GenerationEnvelope, GenerationError>,
}

impl GenerationOutcome {
    /// Attach the outcome under the parent it was submitted with.
    pub fn apply_to(self, timeline: &mut Timeline) -> Result<EventId, AttachError> {
        timeline.apply_generation(&self.request, self.result, self.parent)
    }
}

/// Owns a generator thread. Dropping the worker closes the request channel
/// and waits for the in-flight call to finish.
pub struct GenerationWorker {
    requests: Option<Sender<Job>>,
    outcomes: Receiver<GenerationOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl GenerationWorker {
    pub fn spawn<G>(generator: G) -> Self
    where
        G: StoryGenerator + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel::<Job>();
        let (outcome_tx, outcome_rx) = mpsc::channel::<GenerationOutcome>();

        let handle = thread::spawn(move || Self::run(generator, request_rx, outcome_tx));

        Self {
            requests: Some(request_tx),
            outcomes: outcome_rx,
            handle: Some(handle),
        }
    }

    fn run<G: StoryGenerator>(
        generator: G,
        requests: Receiver<Job>,
        outcomes: Sender<GenerationOutcome>,
    ) {
        for Job { request, parent } in requests {
            debug!(generation = %request.id, "generating");
            let result = generator.generate(&request);
            if outcomes.send(GenerationOutcome { request, parent, result }).is_err() {
                break;
            }
        }
        info!("generation worker stopped");
    }

    /// Queue a request whose content continues from `parent`. Calls run one
    /// at a time, in submission order.
    pub fn submit(&self, request: GenerationRequest, parent: Option<EventId>) -> Result<(), WorkerError> {
        self.requests
            .as_ref()
            .ok_or(WorkerError::Stopped)?
            .send(Job { request, parent })
            .map_err(|_| WorkerError::Stopped)
    }

    /// A finished outcome, if one is ready.
    pub fn try_next(&self) -> Result<Option<GenerationOutcome>, WorkerError> {
        match self.outcomes.try_recv() {
            Ok(outcome) => Ok(Some(outcome)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WorkerError::Stopped),
        }
    }

    /// Wait up to `timeout` for the next outcome.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<GenerationOutcome>, WorkerError> {
        match self.outcomes.recv_timeout(timeout) {
            Ok(outcome) => Ok(Some(outcome)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Stopped),
        }
    }
}

impl Drop for GenerationWorker {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::event::EventKind;
    use serde_json::json;

    struct Echo;

    impl StoryGenerator for Echo {
        fn generate(&self, request: &GenerationRequest) -> Result<GenerationEnvelope, GenerationError> {
            if request.prompt.is_empty() {
                return Err(GenerationError::Service {
                    message: "empty prompt".to_string(),
                    raw: None,
                });
            }
            Ok(GenerationEnvelope {
                story_text: format!("echo: {}", request.prompt),
                suggestions: Vec::new(),
            })
        }
    }

    fn wait(worker: &GenerationWorker) -> GenerationOutcome {
        worker
            .next_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("worker produced no outcome in time")
    }

    #[test]
    fn outcomes_arrive_in_order() {
        let worker = GenerationWorker::spawn(Echo);
        let first = GenerationRequest::new("one");
        let second = GenerationRequest::new("two");
        worker.submit(first.clone(), None).unwrap();
        worker.submit(second.clone(), None).unwrap();

        assert_eq!(wait(&worker).request.id, first.id);
        assert_eq!(wait(&worker).request.id, second.id);
    }

    #[test]
    fn authoring_thread_applies_outcomes() {
        let worker = GenerationWorker::spawn(Echo);
        let mut timeline = Timeline::new();
        let root = timeline.ensure_root().unwrap();

        worker.submit(GenerationRequest::new("the storm"), Some(root.clone())).unwrap();
        worker.submit(GenerationRequest::new(""), None).unwrap();

        let id = wait(&worker).apply_to(&mut timeline).unwrap();
        assert_eq!(timeline.get_event(&id).unwrap().text(), Some("echo: the storm"));
        assert_eq!(timeline.get_event(&id).unwrap().parent_id.as_ref(), Some(&root));

        assert!(wait(&worker).apply_to(&mut timeline).is_err());
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn late_outcome_lands_under_its_own_parent() {
        let worker = GenerationWorker::spawn(Echo);
        let mut timeline = Timeline::new();
        let root = timeline.ensure_root().unwrap();

        let late = GenerationRequest::new("the first draft");
        worker.submit(late.clone(), Some(root.clone())).unwrap();

        // The author moves on before the first outcome is collected.
        let written = timeline
            .add_event(EventKind::Text, json!({"text": "meanwhile"}), None, None)
            .unwrap();
        let current = GenerationRequest::new("the second draft");
        worker.submit(current.clone(), Some(written.clone())).unwrap();

        let first = wait(&worker);
        assert_eq!(first.request.id, late.id);
        let first_id = first.apply_to(&mut timeline).unwrap();
        assert_eq!(timeline.get_event(&first_id).unwrap().parent_id.as_ref(), Some(&root));

        let second = wait(&worker);
        assert_eq!(second.request.id, current.id);
        let second_id = second.apply_to(&mut timeline).unwrap();
        assert_eq!(timeline.get_event(&second_id).unwrap().parent_id.as_ref(), Some(&written));
        assert!(!timeline.children(&first_id).contains(&second_id));
    }

    #[test]
    fn idle_worker_has_nothing_ready() {
        let worker = GenerationWorker::spawn(Echo);
        assert!(worker.try_next().unwrap().is_none());
    }
}
