//! Sliding-window equi-join.
//!
//! Two-sided join over a temporal window `W`: a left event at `t_L` matches
//! a right event at `t_R` iff every equi-join predicate's keys agree and
//! `|t_L - t_R| <= W`.
//!
//! # State layout
//!
//! State is a FIFO of contiguous [`TimeBucket`]s, each covering
//! `[start, start + bucket_size)` of event time and holding one per-side
//! index from composite key to an ordered-by-timestamp set of events.
//! Roughly `1.5 x W` of event time is retained so late arrivals on either
//! side still find their counterpart; events older than the oldest bucket
//! are refused.
//!
//! # Match-and-consume
//!
//! An incoming event is matched first. On a hit, one [`JoinEvent`] per match
//! is emitted and the matched entries are deleted; the incoming event itself
//! is *not* stored. No event ever participates in two emissions, and the
//! same pair produces the same emission regardless of arrival order.
//!
//! # Eviction and backpressure
//!
//! Eviction is driven purely by event-time sliding: appending buckets drops
//! the oldest once the retention bound is exceeded. There is no background
//! sweeper, so a stalled side pins state until the other side advances.
//! The output channel is bounded and written with `try_send`; a full channel
//! fails the `add` with [`StreamQlError::ResultsChannelFull`] rather than
//! blocking the caller.
//!
//! Both sides feed the join concurrently; all state sits behind a single
//! mutex and no lock is held across an await point.

use crate::error::StreamQlError;
use crate::event::{EventLike, JoinEvent, SharedEvent};
use crate::processor::{
    DualInputProcessor, ErrorSink, EventReceiver, OutputChannel, Processor,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Extracts a join key from one side's event.
pub type KeyFn = Arc<dyn Fn(&dyn EventLike) -> String + Send + Sync>;

/// One equality conjunct of an ON clause: a pair of key extractors, one per
/// side. A match requires every predicate's key pair to agree.
#[derive(Clone)]
pub struct EquiJoinPredicate {
    pub left: KeyFn,
    pub right: KeyFn,
}

impl EquiJoinPredicate {
    pub fn new(left: KeyFn, right: KeyFn) -> Self {
        Self { left, right }
    }

    /// Predicate comparing two named fields by their string rendering.
    pub fn on_fields(left_field: impl Into<String>, right_field: impl Into<String>) -> Self {
        let left_field = left_field.into();
        let right_field = right_field.into();
        Self {
            left: Arc::new(move |event| event.get_string(&left_field)),
            right: Arc::new(move |event| event.get_string(&right_field)),
        }
    }

    fn key(&self, event: &dyn EventLike, side: Side) -> String {
        match side {
            Side::Left => (self.left)(event),
            Side::Right => (self.right)(event),
        }
    }
}

/// Which input an event arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Identity-carrying key: event time plus an insertion sequence, so two
/// events with equal timestamps remain distinct tree entries.
type EventKey = (DateTime<Utc>, u64);
type EventTree = BTreeMap<EventKey, SharedEvent>;

struct TimeBucket {
    start: DateTime<Utc>,
    left_events: HashMap<String, EventTree>,
    right_events: HashMap<String, EventTree>,
}

impl TimeBucket {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            left_events: HashMap::new(),
            right_events: HashMap::new(),
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut HashMap<String, EventTree> {
        match side {
            Side::Left => &mut self.left_events,
            Side::Right => &mut self.right_events,
        }
    }

    fn side(&self, side: Side) -> &HashMap<String, EventTree> {
        match side {
            Side::Left => &self.left_events,
            Side::Right => &self.right_events,
        }
    }
}

struct JoinState {
    buckets: VecDeque<TimeBucket>,
    next_seq: u64,
}

pub struct SlidingWindowJoin {
    id: String,
    window: Duration,
    bucket_size: Duration,
    max_buckets: usize,
    predicates: Vec<EquiJoinPredicate>,
    state: Mutex<JoinState>,
    output: OutputChannel,
}

/// Coarse bucket width for a window: small windows get 5-minute buckets,
/// day-scale windows 1-hour, week-scale 6-hour, anything larger W/20.
fn bucket_size_for(window: Duration) -> Duration {
    if window <= Duration::hours(1) {
        Duration::minutes(5)
    } else if window <= Duration::days(1) {
        Duration::hours(1)
    } else if window <= Duration::days(7) {
        Duration::hours(6)
    } else {
        window / 20
    }
}

/// Largest bucket boundary at or before `ts`.
fn floor_to(ts: DateTime<Utc>, bucket: Duration) -> DateTime<Utc> {
    let bucket_ms = bucket.num_milliseconds().max(1);
    ts - Duration::milliseconds(ts.timestamp_millis().rem_euclid(bucket_ms))
}

impl SlidingWindowJoin {
    pub fn new(window: Duration, predicates: Vec<EquiJoinPredicate>, buffer: usize) -> Self {
        let bucket_size = bucket_size_for(window);
        // Retain 1.5 x W so late arrivals on both sides can still match.
        let retained = window + window / 2;
        let max_buckets =
            (retained.num_milliseconds() / bucket_size.num_milliseconds().max(1)).max(1) as usize;
        Self {
            id: Uuid::new_v4().to_string(),
            window,
            bucket_size,
            max_buckets,
            predicates,
            state: Mutex::new(JoinState {
                buckets: VecDeque::with_capacity(max_buckets),
                next_seq: 0,
            }),
            output: OutputChannel::new(buffer),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn bucket_size(&self) -> Duration {
        self.bucket_size
    }

    /// Upper bound on retained buckets.
    pub fn max_buckets(&self) -> usize {
        self.max_buckets
    }

    /// Start timestamps of the retained buckets, oldest first.
    pub fn bucket_starts(&self) -> Vec<DateTime<Utc>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.buckets.iter().map(|b| b.start).collect()
    }

    /// Number of events currently indexed on one side.
    pub fn stored_count(&self, side: Side) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .buckets
            .iter()
            .map(|b| b.side(side).values().map(BTreeMap::len).sum::<usize>())
            .sum()
    }

    /// Per-predicate keys for the event's side, URL-encoded so the `:`
    /// delimiter stays unambiguous, then joined.
    fn composite_key(&self, event: &dyn EventLike, side: Side) -> String {
        self.predicates
            .iter()
            .map(|p| utf8_percent_encode(&p.key(event, side), NON_ALPHANUMERIC).to_string())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Append buckets until `ts` fits inside the newest one, evicting from
    /// the front whenever the count would exceed the retention bound.
    fn slide_forward(&self, state: &mut JoinState, ts: DateTime<Utc>) {
        while let Some(newest) = state.buckets.back() {
            let newest_end = newest.start + self.bucket_size;
            if ts < newest_end {
                break;
            }
            state.buckets.push_back(TimeBucket::new(newest_end));
            while state.buckets.len() > self.max_buckets {
                state.buckets.pop_front();
            }
        }
    }

    /// Collect and delete every opposite-side event with the same composite
    /// key within `[ts - W, ts + W]`. Only buckets whose start lies inside
    /// that range are scanned.
    fn find_matches(
        state: &mut JoinState,
        key: &str,
        ts: DateTime<Utc>,
        window: Duration,
        side: Side,
    ) -> Vec<SharedEvent> {
        let earliest = ts - window;
        let latest = ts + window;
        let mut matched = Vec::new();

        for bucket in state.buckets.iter_mut() {
            if bucket.start < earliest || bucket.start > latest {
                continue;
            }
            let index = bucket.side_mut(side.opposite());
            if let Some(tree) = index.get_mut(key) {
                let in_window: Vec<EventKey> = tree
                    .range((earliest, u64::MIN)..=(latest, u64::MAX))
                    .map(|(k, _)| *k)
                    .collect();
                for event_key in &in_window {
                    if let Some(event) = tree.remove(event_key) {
                        matched.push(event);
                    }
                }
                if tree.is_empty() {
                    index.remove(key);
                }
            }
        }
        matched
    }

    /// Synchronous core of the dual-input contract. Match first; on a hit,
    /// emit one result per match and drop the incoming event. Otherwise
    /// slide the window forward as needed and index the event.
    pub fn add(&self, event: SharedEvent, side: Side) -> Result<(), StreamQlError> {
        let ts = event.timestamp();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.buckets.is_empty() {
            let start = floor_to(ts, self.bucket_size);
            state.buckets.push_back(TimeBucket::new(start));
        }

        let key = self.composite_key(event.as_ref(), side);
        let matches = Self::find_matches(&mut state, &key, ts, self.window, side);
        if !matches.is_empty() {
            tracing::debug!(id = %self.id, key, count = matches.len(), "join matched");
            let sender = self.output.sender(&self.id)?;
            for matched in matches {
                let joined: SharedEvent = Arc::new(match side {
                    Side::Left => JoinEvent::new(event.clone(), matched),
                    Side::Right => JoinEvent::new(matched, event.clone()),
                });
                sender.try_send(joined).map_err(|e| match e {
                    TrySendError::Full(_) => StreamQlError::ResultsChannelFull,
                    TrySendError::Closed(_) => StreamQlError::ChannelClosed(self.id.clone()),
                })?;
            }
            // Match-and-consume: the incoming event is not stored.
            return Ok(());
        }

        self.slide_forward(&mut state, ts);

        // The event's bucket is the greatest one starting at or before it.
        let index = state.buckets.partition_point(|b| b.start <= ts);
        if index == 0 {
            return Err(StreamQlError::EventTooOld(ts));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.buckets[index - 1]
            .side_mut(side)
            .entry(key)
            .or_default()
            .insert((ts, seq), event);
        Ok(())
    }
}

impl Processor for SlidingWindowJoin {
    fn id(&self) -> &str {
        &self.id
    }

    fn results(
        &self,
        _token: &CancellationToken,
        _consumer_id: &str,
        _errors: &ErrorSink,
    ) -> EventReceiver {
        self.output.take_receiver(&self.id)
    }

    fn close(&self) {
        self.output.close();
    }
}

#[async_trait]
impl DualInputProcessor for SlidingWindowJoin {
    async fn add_left(
        &self,
        _token: &CancellationToken,
        event: SharedEvent,
    ) -> Result<(), StreamQlError> {
        self.add(event, Side::Left)
    }

    async fn add_right(
        &self,
        _token: &CancellationToken,
        event: SharedEvent,
    ) -> Result<(), StreamQlError> {
        self.add(event, Side::Right)
    }
}
