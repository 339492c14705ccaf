//! Pipeline events to client frames.

use clyrdia_core::{PipelineEvent, StreamFrame};
use futures::Stream;
use futures::stream;
use tokio::sync::mpsc;
use tracing::warn;

/// Message of the frame sent when the pipeline stops without a final event.
pub const ABANDONED_MESSAGE: &str = "analysis ended without a result";

/// Re-emit pipeline events as frames, in order, ending with exactly one
/// final frame. Nothing is read from `events` after a final event.
pub fn relay(events: mpsc::Receiver<PipelineEvent>) -> impl Stream<Item = StreamFrame> + Send {
    stream::unfold(Some(events), |state| async move {
        let mut events = state?;
        match events.recv().await {
            Some(event) => {
                let frame = StreamFrame::from_event(&event);
                let next = (!frame.is_final).then_some(events);
                Some((frame, next))
            }
            None => {
                warn!("pipeline closed its event channel without a final event");
                Some((StreamFrame::error(ABANDONED_MESSAGE), None))
            }
        }
    })
}
