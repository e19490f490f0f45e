//! The proposal feed of the current round.

use johndao_canister::{Actor, AgentError};
use johndao_sync::{derived2, Cell, Observable, Readable, Subscription};
use johndao_types::ProposalInfo;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Ordering of the proposal list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// Most points first.
    #[default]
    Best,
    /// Most recent first.
    New,
}

/// Sorts `proposals` for `filter`. Ties keep their canister order.
pub fn sort_proposals(proposals: &[ProposalInfo], filter: Filter) -> Vec<ProposalInfo> {
    let mut sorted = proposals.to_vec();
    match filter {
        Filter::Best => sorted.sort_by(|a, b| b.points.cmp(&a.points)),
        Filter::New => sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
    sorted
}

struct Feed {
    proposals: Cell<Vec<ProposalInfo>>,
    epoch: AtomicU64,
    active: Mutex<Option<Actor>>,
    anonymous: Actor,
    runtime: Handle,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl Feed {
    fn switch(self: &Arc<Self>, actor: Option<Actor>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = actor;
        self.reload();
    }

    fn reload(self: &Arc<Self>) {
        let actor = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.anonymous.clone());

        let started = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let feed = self.clone();
        let task = self.runtime.spawn(async move {
            let outcome = actor.get_proposals_info().await;
            feed.complete(started, outcome);
        });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(task);
    }

    fn complete(&self, started: u64, outcome: Result<Vec<ProposalInfo>, AgentError>) {
        let proposals = match outcome {
            Ok(proposals) => proposals,
            Err(e) => {
                tracing::error!(epoch = started, error = %e, "failed to load proposals");
                return;
            }
        };
        let count = proposals.len();
        let written = self.proposals.try_update(|_| {
            (self.epoch.load(Ordering::SeqCst) == started).then_some(proposals)
        });
        if written {
            tracing::debug!(count, "proposals loaded");
        } else {
            tracing::debug!(epoch = started, "discarding stale proposal list");
        }
    }
}

/// Proposals of the current round, reloaded whenever the active actor
/// changes. Without an active actor the feed reads anonymously.
pub struct ProposalFeed {
    feed: Arc<Feed>,
    filter: Cell<Filter>,
    sorted: Readable<Vec<ProposalInfo>>,
    _selector: Subscription,
}

impl ProposalFeed {
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<S>(selector: &S, anonymous: Actor) -> Self
    where
        S: Observable<Option<Actor>>,
    {
        let feed = Arc::new(Feed {
            proposals: Cell::new(Vec::new()),
            epoch: AtomicU64::new(0),
            active: Mutex::new(None),
            anonymous,
            runtime: Handle::current(),
            in_flight: Mutex::new(Vec::new()),
        });
        let filter = Cell::new(Filter::default());
        let sorted = derived2(
            &feed.proposals.readable(),
            &filter.readable(),
            Vec::new(),
            |proposals: &Vec<ProposalInfo>, filter: &Filter| sort_proposals(proposals, *filter),
        );

        let driver = feed.clone();
        let subscription = selector.subscribe(move |actor: &Option<Actor>| {
            driver.switch(actor.clone());
        });

        Self {
            feed,
            filter,
            sorted,
            _selector: subscription,
        }
    }

    /// Proposals in canister order.
    pub fn proposals(&self) -> Readable<Vec<ProposalInfo>> {
        self.feed.proposals.readable()
    }

    /// Proposals ordered by the current filter.
    pub fn sorted(&self) -> Readable<Vec<ProposalInfo>> {
        self.sorted.clone()
    }

    pub fn filter(&self) -> Readable<Filter> {
        self.filter.readable()
    }

    pub fn set_filter(&self, filter: Filter) {
        self.filter.set_distinct(filter);
    }

    /// Fetches the list again with the active actor.
    pub fn reload(&self) {
        self.feed.reload();
    }

    /// Waits until every fetch started so far has completed.
    pub async fn settle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = self
                .feed
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "proposal fetch task failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use johndao_types::{Tweet, UpvoteStatus};

    fn proposal(id: u32, points: i32, created_at: u64) -> ProposalInfo {
        ProposalInfo {
            id,
            tweet: Tweet::Tweet(format!("proposal {id}")),
            points,
            created_by: 1,
            created_at,
            upvote_status: UpvoteStatus::NotVoted,
            nr_of_reports: 0,
            reported: false,
        }
    }

    #[test]
    fn best_sorts_by_points_new_by_time() {
        let list = vec![proposal(1, 3, 10), proposal(2, 9, 5), proposal(3, 3, 30)];

        let best: Vec<u32> = sort_proposals(&list, Filter::Best).iter().map(|p| p.id).collect();
        assert_eq!(best, vec![2, 1, 3]);

        let new: Vec<u32> = sort_proposals(&list, Filter::New).iter().map(|p| p.id).collect();
        assert_eq!(new, vec![3, 1, 2]);
    }

    #[test]
    fn filter_wire_names() {
        assert_eq!(serde_json::to_value(Filter::Best).unwrap(), "best");
        assert_eq!(serde_json::from_str::<Filter>("\"new\"").unwrap(), Filter::New);
    }
}
