// service/event_hub.rs
//! Live fan-out of appended ledger entries to subscribers of a thread.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::{
    models::negotiationmodel::OfferEvent,
    service::{error::ServiceError, ledger::OfferLedger},
};

const CHANNEL_CAPACITY: usize = 64;
const CATCH_UP_PAGE: i64 = 200;

type Channels = Arc<RwLock<HashMap<Uuid, broadcast::Sender<OfferEvent>>>>;

#[derive(Debug, Clone, Default)]
pub struct EventHub {
    channels: Channels,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to current subscribers of its thread. Threads with
    /// no remaining subscribers lose their channel.
    pub async fn publish(&self, event: &OfferEvent) {
        let delivered = {
            let channels = self.channels.read().await;
            match channels.get(&event.thread_id) {
                Some(sender) => sender.send(event.clone()).is_ok(),
                None => return,
            }
        };

        if !delivered {
            prune(&mut *self.channels.write().await, event.thread_id);
        }
    }

    pub async fn receiver(&self, thread_id: Uuid) -> broadcast::Receiver<OfferEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(thread_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub async fn subscriber_count(&self, thread_id: Uuid) -> usize {
        self.channels
            .read()
            .await
            .get(&thread_id)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Entries after `cursor` followed by live appends, in sequence order
    /// and without duplicates. Dropping the stream unsubscribes.
    pub async fn subscribe(
        &self,
        ledger: OfferLedger,
        thread_id: Uuid,
        cursor: i64,
    ) -> BoxStream<'static, Result<OfferEvent, ServiceError>> {
        // Subscribe before the first catch-up read so nothing appended in
        // between is missed.
        let receiver = self.receiver(thread_id).await;
        let release = ChannelRelease {
            channels: self.channels.clone(),
            thread_id,
        };
        follow(ledger, receiver, release, thread_id, cursor)
    }

    #[cfg(test)]
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

fn prune(channels: &mut HashMap<Uuid, broadcast::Sender<OfferEvent>>, thread_id: Uuid) {
    if channels
        .get(&thread_id)
        .map_or(false, |sender| sender.receiver_count() == 0)
    {
        channels.remove(&thread_id);
    }
}

/// Removes the thread's channel once its last subscriber is gone.
/// Must be dropped after the subscriber's receiver.
struct ChannelRelease {
    channels: Channels,
    thread_id: Uuid,
}

impl Drop for ChannelRelease {
    fn drop(&mut self) {
        if let Ok(mut channels) = self.channels.try_write() {
            prune(&mut channels, self.thread_id);
            return;
        }

        // Lock is busy; finish on the runtime if there is one, otherwise the
        // next publish to this thread prunes it.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let channels = self.channels.clone();
            let thread_id = self.thread_id;
            handle.spawn(async move {
                prune(&mut *channels.write().await, thread_id);
            });
        }
    }
}

struct Follower {
    ledger: OfferLedger,
    receiver: broadcast::Receiver<OfferEvent>,
    thread_id: Uuid,
    cursor: i64,
    ready: VecDeque<OfferEvent>,
    early: BTreeMap<i64, OfferEvent>,
    catch_up: bool,
    done: bool,
    // Declared after `receiver` so it drops last.
    _release: ChannelRelease,
}

impl Follower {
    fn promote_early(&mut self) {
        while let Some((&sequence, _)) = self.early.first_key_value() {
            if sequence <= self.cursor {
                self.early.pop_first();
            } else if sequence == self.next_expected() {
                if let Some((_, event)) = self.early.pop_first() {
                    self.ready.push_back(event);
                }
            } else {
                break;
            }
        }
    }

    fn next_expected(&self) -> i64 {
        self.ready.back().map_or(self.cursor, |e| e.sequence) + 1
    }

    async fn next(&mut self) -> Option<Result<OfferEvent, ServiceError>> {
        loop {
            if self.done {
                return None;
            }

            if let Some(event) = self.ready.pop_front() {
                if event.sequence <= self.cursor {
                    continue;
                }
                self.cursor = event.sequence;
                return Some(Ok(event));
            }

            if self.catch_up {
                match self.ledger.page_after(self.thread_id, self.cursor, CATCH_UP_PAGE).await {
                    Ok(page) => {
                        self.catch_up = page.len() as i64 == CATCH_UP_PAGE;
                        self.ready.extend(page);
                        self.promote_early();
                        continue;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }

            self.promote_early();
            if !self.ready.is_empty() {
                continue;
            }

            match self.receiver.recv().await {
                Ok(event) => {
                    if event.sequence <= self.cursor {
                        continue;
                    }
                    if event.sequence == self.cursor + 1 {
                        self.ready.push_back(event);
                    } else {
                        // Something before it has not reached us yet.
                        self.early.insert(event.sequence, event);
                        self.catch_up = true;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Subscriber of negotiation {} lagged by {} events, re-reading ledger",
                        self.thread_id,
                        skipped
                    );
                    self.catch_up = true;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn follow(
    ledger: OfferLedger,
    receiver: broadcast::Receiver<OfferEvent>,
    release: ChannelRelease,
    thread_id: Uuid,
    cursor: i64,
) -> BoxStream<'static, Result<OfferEvent, ServiceError>> {
    let follower = Follower {
        ledger,
        receiver,
        thread_id,
        cursor,
        ready: VecDeque::new(),
        early: BTreeMap::new(),
        catch_up: true,
        done: false,
        _release: release,
    };

    stream::unfold(follower, |mut follower| async move {
        let item = follower.next().await?;
        Some((item, follower))
    })
    .boxed()
}
