//! Event timeline
//!
//! A queue of scheduled events over `[0, horizon)`, split into equally sized time buckets. Each
//! bucket is kept sorted by time from its read offset on. Consumed events stay in their bucket,
//! so the timeline doubles as a record of everything that was scheduled. That record is in time
//! order as long as no event is scheduled behind the consumed part of its bucket.

/// An event of an individual at a given time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledEvent {
    pub individual: usize,
    pub transition: usize,
    pub time: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventTimeline {
    horizon: f64,
    buckets: Vec<Vec<ScheduledEvent>>,
    consumed: Vec<usize>,
    cursor: usize,
    len: usize,
}

impl EventTimeline {
    pub fn new(horizon: f64, n_buckets: usize) -> Self {
        let n_buckets = n_buckets.max(1);
        Self {
            horizon,
            buckets: vec![Vec::new(); n_buckets],
            consumed: vec![0; n_buckets],
            cursor: 0,
            len: 0,
        }
    }

    pub fn horizon(&self) -> f64 {
        self.horizon
    }

    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Number of scheduled events, consumed or not.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of events not yet consumed.
    pub fn remaining(&self) -> usize {
        self.len - self.consumed.iter().sum::<usize>()
    }

    /// Current read position as (bucket, offset).
    pub fn cursor(&self) -> (usize, usize) {
        match self.cursor < self.buckets.len() {
            true => (self.cursor, self.consumed[self.cursor]),
            false => (self.cursor, 0),
        }
    }

    fn bucket_of(&self, time: f64) -> usize {
        let bucket = (time / self.horizon * self.buckets.len() as f64) as usize;
        bucket.min(self.buckets.len() - 1)
    }

    /// Insert an event. Events at or past the horizon are ignored.
    pub fn schedule(&mut self, individual: usize, transition: usize, time: f64) -> bool {
        if time >= self.horizon {
            return false;
        }
        let bucket = self.bucket_of(time);
        let events = &mut self.buckets[bucket];
        let mut position = events.len();
        while position > self.consumed[bucket] && events[position - 1].time > time {
            position -= 1;
        }
        events.insert(
            position,
            ScheduledEvent {
                individual,
                transition,
                time,
            },
        );
        self.len += 1;
        if bucket < self.cursor {
            self.cursor = bucket;
        }
        true
    }

    fn advance(&mut self) {
        while self.cursor < self.buckets.len()
            && self.consumed[self.cursor] == self.buckets[self.cursor].len()
        {
            self.cursor += 1;
        }
    }

    /// The earliest unconsumed event.
    pub fn peek(&mut self) -> Option<&ScheduledEvent> {
        self.advance();
        self.buckets
            .get(self.cursor)
            .map(|events| &events[self.consumed[self.cursor]])
    }

    pub fn peek_time(&mut self) -> Option<f64> {
        self.peek().map(|event| event.time)
    }

    /// Consume and return the earliest unconsumed event.
    pub fn pop_next(&mut self) -> Option<ScheduledEvent> {
        self.advance();
        let events = self.buckets.get(self.cursor)?;
        let event = events[self.consumed[self.cursor]];
        self.consumed[self.cursor] += 1;
        Some(event)
    }

    /// Mark every event as unconsumed.
    pub fn rewind(&mut self) {
        self.consumed.fill(0);
        self.cursor = 0;
    }

    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|events| events.clear());
        self.rewind();
        self.len = 0;
    }

    /// All scheduled events, bucket by bucket.
    ///
    /// An event scheduled behind the consumed part of its bucket follows that part, so the order
    /// is only guaranteed when events are scheduled no earlier than the last consumed one.
    pub fn iter(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.buckets.iter().flatten()
    }

    pub(crate) fn buckets(&self) -> &[Vec<ScheduledEvent>] {
        &self.buckets
    }

    pub(crate) fn consumed(&self) -> &[usize] {
        &self.consumed
    }

    pub(crate) fn raw_cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn from_parts(
        horizon: f64,
        buckets: Vec<Vec<ScheduledEvent>>,
        consumed: Vec<usize>,
        cursor: usize,
    ) -> Self {
        let len = buckets.iter().map(|events| events.len()).sum();
        Self {
            horizon,
            buckets,
            consumed,
            cursor,
            len,
        }
    }
}
