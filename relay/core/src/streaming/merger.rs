//! Multi-model fan-out and merge

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::adapter::{AdapterOutcome, StreamAdapter};
use super::Conversation;
use crate::events::{AggregateAccumulator, StreamEvent};
use crate::messages::ModelId;

/// Runs one adapter per model and interleaves their events
#[derive(Clone)]
pub struct MultiStreamMerger {
    adapter: StreamAdapter,
}

impl MultiStreamMerger {
    /// Create a merger around an adapter
    #[must_use]
    pub fn new(adapter: StreamAdapter) -> Self {
        Self { adapter }
    }

    /// Start every model and return the merged stream
    #[must_use]
    pub fn merge(&self, models: &[ModelId], conversation: Arc<Conversation>) -> MergedStream {
        let (tx, rx) = mpsc::channel(self.adapter.settings().channel_capacity);
        let mut tasks = JoinSet::new();

        for model in models {
            let adapter = self.adapter.clone();
            let model = model.clone();
            let conversation = Arc::clone(&conversation);
            let tx = tx.clone();
            tasks.spawn(async move { adapter.run(model, conversation, tx).await });
        }
        // The channel closes once the last adapter drops its sender.
        drop(tx);

        tracing::debug!(models = models.len(), "Fan-out started");

        MergedStream {
            rx,
            tasks,
            accumulator: AggregateAccumulator::default(),
            finished: false,
        }
    }
}

/// Events from several adapters in arrival order, then one aggregate `done`
#[derive(Debug)]
pub struct MergedStream {
    rx: mpsc::Receiver<StreamEvent>,
    tasks: JoinSet<AdapterOutcome>,
    accumulator: AggregateAccumulator,
    finished: bool,
}

impl MergedStream {
    /// Next event; after every adapter has finished, `done{multi}` and then `None`
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(event) => {
                if let StreamEvent::Stats(stats) = &event {
                    self.accumulator.record(stats);
                }
                Some(event)
            }
            None => {
                self.finished = true;
                self.reap();
                let aggregate = self.accumulator.finish();
                tracing::info!(
                    models_completed = aggregate.models_completed,
                    total_tokens_in = aggregate.total_tokens_in,
                    total_tokens_out = aggregate.total_tokens_out,
                    "Fan-out finished"
                );
                Some(StreamEvent::done_multi(aggregate))
            }
        }
    }

    /// Log adapter tasks that panicked
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(error = %e, "Adapter task panicked");
                }
            }
        }
    }
}
