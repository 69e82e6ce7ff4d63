//! Response bodies charged to a token budget once they are complete.

use std::{
    convert::Infallible,
    pin::{Pin, pin},
    task::{Context, Poll},
};

use axum::body::{BodyDataStream, Bytes};
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt, channel::mpsc};
use http::{HeaderMap, header::CONTENT_TYPE};
use rate_limit::{TokenRateLimitManager, TokenReservation, TokenUsage, UsageTracker};

/// How the upstream encodes its response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFormat {
    /// A single JSON document, or anything else that is not an event stream.
    Plain,
    /// Server-sent events, `text/event-stream`.
    EventStream,
}

impl BodyFormat {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let is_event_stream = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"));

        if is_event_stream {
            BodyFormat::EventStream
        } else {
            BodyFormat::Plain
        }
    }
}

struct Settlement {
    manager: TokenRateLimitManager,
    reservation: TokenReservation,
}

impl Settlement {
    async fn charge(self, usage: Option<TokenUsage>) {
        let Some(usage) = usage else {
            log::debug!(
                "No token usage found in the response of rule '{}'",
                self.manager.rule_set().rule_name
            );
            return;
        };

        if let Err(e) = self.manager.settle(self.reservation, usage.total()).await {
            log::warn!("Failed to charge {} tokens: {e}", usage.total());
        }
    }
}

enum UsageSink {
    /// Buffered and parsed when the body is dropped.
    Plain {
        tracker: UsageTracker,
        settlement: Settlement,
    },
    /// Chunks go to a task parsing the events as they arrive, which charges the tokens once the
    /// sender is dropped.
    Events(mpsc::UnboundedSender<Result<Bytes, Infallible>>),
}

/// Passes the upstream body through while looking for the token usage it reports. When the body
/// is dropped, the reported tokens are charged to the reservation.
pub(crate) struct UsageTrackingBody {
    inner: BodyDataStream,
    sink: Option<UsageSink>,
}

impl UsageTrackingBody {
    /// Must be called on a tokio runtime.
    pub fn new(
        inner: BodyDataStream,
        format: BodyFormat,
        manager: TokenRateLimitManager,
        reservation: TokenReservation,
    ) -> Self {
        let settlement = Settlement { manager, reservation };

        let sink = match format {
            BodyFormat::Plain => UsageSink::Plain {
                tracker: UsageTracker::new(),
                settlement,
            },
            BodyFormat::EventStream => UsageSink::Events(spawn_event_parser(settlement)),
        };

        Self { inner, sink: Some(sink) }
    }
}

fn spawn_event_parser(settlement: Settlement) -> mpsc::UnboundedSender<Result<Bytes, Infallible>> {
    let (sender, receiver) = mpsc::unbounded();

    tokio::spawn(async move {
        let mut tracker = UsageTracker::new();
        let mut events = pin!(receiver.eventsource());

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => tracker.record_event(&event.data),
                Err(e) => log::debug!("Failed to parse an upstream event: {e}"),
            }
        }

        settlement.charge(tracker.finish()).await;
    });

    sender
}

impl Stream for UsageTrackingBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_next(cx);

        if let Poll::Ready(Some(Ok(chunk))) = &poll {
            match this.sink.as_mut() {
                Some(UsageSink::Plain { tracker, .. }) => tracker.feed(chunk),
                Some(UsageSink::Events(sender)) => {
                    // a closed receiver only means the parser is gone
                    let _ = sender.unbounded_send(Ok(chunk.clone()));
                }
                None => (),
            }
        }

        poll
    }
}

impl Drop for UsageTrackingBody {
    fn drop(&mut self) {
        let Some(UsageSink::Plain { tracker, settlement }) = self.sink.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("No runtime to charge tokens on");
            return;
        };

        runtime.spawn(settlement.charge(tracker.finish()));
    }
}
