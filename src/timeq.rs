/*
Timing primitives for the backing memory models.

A memory channel is wrapped by a TimedServer, which applies a simple service law: every burst
pays a fixed access latency plus a transfer time derived from bytes-per-cycle.  Work is kept in a
bounded FIFO; when the FIFO is full or the channel is still transferring, the enqueue is refused
with a Backpressure carrying the burst back to the caller so it can be retried on a later cycle.

Accepted bursts get a Ticket recording when they become visible to the controller.
*/

use std::collections::VecDeque;

pub type Cycle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
    size_bytes: u32,
}

impl Ticket {
    fn new(issued_at: Cycle, ready_at: Cycle, size_bytes: u32) -> Self {
        Self {
            issued_at,
            ready_at,
            size_bytes,
        }
    }

    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }

    // Zero once the ticket is ready.
    pub fn remaining_cycles(&self, now: Cycle) -> Cycle {
        self.ready_at.saturating_sub(now)
    }
}

#[derive(Debug)]
pub struct ServiceRequest<T> {
    pub payload: T,
    pub size_bytes: u32,
}

impl<T> ServiceRequest<T> {
    pub fn new(payload: T, size_bytes: u32) -> Self {
        Self { payload, size_bytes }
    }
}

#[derive(Debug)]
pub struct ServiceResult<T> {
    pub payload: T,
    pub ticket: Ticket,
}

#[derive(Debug)]
pub enum Backpressure<T> {
    QueueFull { request: ServiceRequest<T>, capacity: usize },
    Busy { request: ServiceRequest<T>, available_at: Cycle },
}

impl<T> Backpressure<T> {
    pub fn into_request(self) -> ServiceRequest<T> {
        match self {
            Backpressure::QueueFull { request, .. } => request,
            Backpressure::Busy { request, .. } => request,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub base_latency: Cycle,
    pub bytes_per_cycle: u32,
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_latency: 0,
            bytes_per_cycle: 1,
            queue_capacity: 1,
        }
    }
}

/// A burst accepted by a channel, held until its ticket comes due.
#[derive(Debug)]
struct QueuedBurst<T> {
    payload: T,
    ticket: Ticket,
}

/// One channel of a memory model.
///
/// Bursts are transferred one after another in the order they were accepted, so a burst's
/// ticket is due `base_latency` plus its transfer time after the previous burst on the same
/// channel is due (or after `now` if the channel is idle). At most `queue_capacity` bursts may be
/// outstanding. A channel with nothing queued whose last transfer has not drained yet reports
/// `Busy`; once anything is queued, new bursts line up behind it instead.
#[derive(Debug)]
pub struct TimedServer<T> {
    config: ServerConfig,
    bursts: VecDeque<QueuedBurst<T>>,
    /// Cycle the last accepted burst is due.
    free_at: Cycle,
}

impl<T> TimedServer<T> {
    pub fn new(config: ServerConfig) -> Self {
        assert!(config.bytes_per_cycle > 0, "bytes_per_cycle must be > 0");
        assert!(config.queue_capacity > 0, "queue_capacity must be > 0");
        Self {
            config,
            bursts: VecDeque::with_capacity(config.queue_capacity),
            free_at: 0,
        }
    }

    /// Accept a burst at `now`, or hand it back with the reason it was refused.
    pub fn try_issue(&mut self, now: Cycle, request: ServiceRequest<T>) -> Result<Ticket, Backpressure<T>> {
        let capacity = self.config.queue_capacity;
        if self.bursts.len() >= capacity {
            return Err(Backpressure::QueueFull { request, capacity });
        }
        let start = self.free_at.max(now);
        if self.bursts.is_empty() && start > now {
            return Err(Backpressure::Busy {
                request,
                available_at: start,
            });
        }

        let ticket = Ticket::new(now, self.due_at(start, request.size_bytes), request.size_bytes);
        self.free_at = ticket.ready_at();
        self.bursts.push_back(QueuedBurst {
            payload: request.payload,
            ticket,
        });
        Ok(ticket)
    }

    /// Pass every burst due by `now` to `done`, in acceptance order.
    pub fn service_ready<F>(&mut self, now: Cycle, mut done: F)
    where
        F: FnMut(ServiceResult<T>),
    {
        while let Some(burst) = self.bursts.pop_front() {
            if !burst.ticket.is_ready(now) {
                self.bursts.push_front(burst);
                break;
            }
            done(ServiceResult {
                payload: burst.payload,
                ticket: burst.ticket,
            });
        }
        // an idle channel never lags the clock
        if self.bursts.is_empty() {
            self.free_at = self.free_at.max(now);
        }
    }

    /// Bursts accepted and not yet serviced.
    pub fn len(&self) -> usize {
        self.bursts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bursts.is_empty()
    }

    fn due_at(&self, start: Cycle, size_bytes: u32) -> Cycle {
        let bandwidth = u64::from(self.config.bytes_per_cycle);
        let transfer = (u64::from(size_bytes) + bandwidth - 1) / bandwidth;
        start
            .saturating_add(self.config.base_latency)
            .saturating_add(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::{Backpressure, ServerConfig, ServiceRequest, TimedServer};

    fn server(latency: u64, capacity: usize) -> TimedServer<u64> {
        TimedServer::new(ServerConfig {
            base_latency: latency,
            bytes_per_cycle: 64,
            queue_capacity: capacity,
        })
    }

    #[test]
    fn ticket_includes_latency_and_transfer() {
        let mut srv = server(10, 4);
        let ticket = srv.try_issue(5, ServiceRequest::new(1, 128)).unwrap();
        assert_eq!(ticket.issued_at(), 5);
        assert_eq!(ticket.ready_at(), 5 + 10 + 2);
        assert_eq!(ticket.remaining_cycles(5), 12);
        assert!(ticket.is_ready(17));
    }

    #[test]
    fn full_queue_returns_request() {
        let mut srv = server(3, 1);
        srv.try_issue(0, ServiceRequest::new(1, 64)).unwrap();
        let err = srv.try_issue(0, ServiceRequest::new(2, 64)).unwrap_err();
        assert!(matches!(err, Backpressure::QueueFull { capacity: 1, .. }));
        assert_eq!(err.into_request().payload, 2);
    }

    #[test]
    fn completions_drain_in_order() {
        let mut srv = server(2, 4);
        srv.try_issue(0, ServiceRequest::new(1, 64)).unwrap();
        srv.try_issue(0, ServiceRequest::new(2, 64)).unwrap();
        let mut done = Vec::new();
        for now in 0..10 {
            srv.service_ready(now, |res| done.push((now, res.payload)));
        }
        assert_eq!(done, vec![(3, 1), (6, 2)]);
        assert!(srv.is_empty());
    }
}
