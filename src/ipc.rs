// IPC Channels, Pipes and Servers
//
// A `Channel` is a half-duplex ordered message queue with two FIFOs: sent
// messages that no receiver has matched yet, and receive submissions
// waiting for a message. Send and receive carry `(request, sequence)` tags;
// a record matches a filter when each filter value is either the wildcard
// (-1) or equal. Among matches the earliest enqueued wins, so send order
// equals match-consideration order.
//
// A `BiDirectionPipe` pairs two channels. The first descriptor reads from
// channel one and writes to channel two; the second descriptor mirrors.
// That asymmetry is the contract.
//
// A `Server` is a rendezvous point: pending accepts and pending connects
// cross-match FIFO, and each match mints a fresh pipe whose two descriptors
// land in the respective universes.
//
// Senders have no backpressure of their own, so the pending-message FIFO is
// bounded; a send past the bound fails with `NoMemory`. Closing an endpoint
// fails the submissions still parked on it with `Dismissed` completions.
//
// All threads of a process share its address space in this iteration, so a
// matched send may copy straight into the receiver's buffer.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::event::{Event, EventHub, EventKind, SubmitInfo};
use crate::sync::IrqSpinlock;
use crate::syscall::HelError;
use crate::uaccess::{self, UserPtr};
use crate::universe::{
    AnyDescriptor, BiDirectionFirstDescriptor, BiDirectionSecondDescriptor, Universe,
};

/// Upper bound on unmatched messages per channel.
pub const MAX_QUEUE_DEPTH: usize = 64;

/// Tag value that matches anything.
pub const TAG_WILDCARD: i64 = -1;

/// A completion ready to be posted once the channel lock is released.
pub struct Completion {
    hub: Arc<EventHub>,
    event: Event,
}

impl core::fmt::Debug for Completion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Completion")
            .field("hub", &Arc::as_ptr(&self.hub))
            .field("event", &self.event)
            .finish()
    }
}

impl PartialEq for Completion {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.hub, &other.hub) && self.event == other.event
    }
}

impl Completion {
    fn new(hub: Arc<EventHub>, event: Event) -> Self {
        Self { hub, event }
    }

    pub fn deliver(self) {
        self.hub.post(self.event);
    }
}

pub fn deliver_all(completions: Vec<Completion>) {
    for completion in completions {
        completion.deliver();
    }
}

struct ChannelMessage {
    payload: Vec<u8>,
    msg_request: i64,
    msg_seq: i64,
}

struct PendingReceive {
    hub: Arc<EventHub>,
    buffer: UserPtr,
    max_length: usize,
    filter_request: i64,
    filter_seq: i64,
    info: SubmitInfo,
}

fn tags_match(request: i64, seq: i64, filter_request: i64, filter_seq: i64) -> bool {
    (filter_request == TAG_WILDCARD || filter_request == request)
        && (filter_seq == TAG_WILDCARD || filter_seq == seq)
}

/// Half-duplex ordered message queue.
pub struct Channel {
    messages: VecDeque<ChannelMessage>,
    receives: VecDeque<PendingReceive>,
}

impl Channel {
    pub const fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            receives: VecDeque::new(),
        }
    }

    /// Completes a matched pair: the payload lands in the receiver's
    /// buffer and a completion event is produced for its hub.
    fn complete(receive: PendingReceive, message: &ChannelMessage) -> Completion {
        let event = if message.payload.len() > receive.max_length {
            Event::new(EventKind::RecvString, HelError::BufferTooSmall, receive.info)
        } else {
            match uaccess::copy_to_user(receive.buffer, &message.payload) {
                Ok(()) => Event::new(EventKind::RecvString, HelError::Ok, receive.info)
                    .with_string(message.payload.len(), message.msg_request, message.msg_seq),
                Err(error) => Event::new(EventKind::RecvString, error, receive.info),
            }
        };
        Completion::new(receive.hub, event)
    }

    /// Queues a message, or hands it straight to the first matching
    /// receive submission.
    pub fn send(
        &mut self,
        payload: &[u8],
        msg_request: i64,
        msg_seq: i64,
    ) -> Result<Option<Completion>, HelError> {
        let message = ChannelMessage {
            payload: payload.to_vec(),
            msg_request,
            msg_seq,
        };

        let matched = self
            .receives
            .iter()
            .position(|r| tags_match(msg_request, msg_seq, r.filter_request, r.filter_seq));
        if let Some(index) = matched {
            let receive = self.receives.remove(index).unwrap();
            return Ok(Some(Self::complete(receive, &message)));
        }

        if self.messages.len() >= MAX_QUEUE_DEPTH {
            return Err(HelError::NoMemory);
        }
        self.messages.push_back(message);
        Ok(None)
    }

    /// Parks a receive submission, or completes it against the first
    /// matching queued message.
    pub fn submit_recv(
        &mut self,
        hub: Arc<EventHub>,
        buffer: UserPtr,
        max_length: usize,
        filter_request: i64,
        filter_seq: i64,
        info: SubmitInfo,
    ) -> Option<Completion> {
        let receive = PendingReceive {
            hub,
            buffer,
            max_length,
            filter_request,
            filter_seq,
            info,
        };

        let matched = self
            .messages
            .iter()
            .position(|m| tags_match(m.msg_request, m.msg_seq, filter_request, filter_seq));
        if let Some(index) = matched {
            let message = self.messages.remove(index).unwrap();
            return Some(Self::complete(receive, &message));
        }

        self.receives.push_back(receive);
        None
    }

    /// Fails every parked receive with a `Dismissed` completion.
    pub fn dismiss_pending(&mut self) -> Vec<Completion> {
        self.receives
            .drain(..)
            .map(|receive| {
                let event = Event::new(EventKind::RecvString, HelError::Dismissed, receive.info);
                Completion::new(receive.hub, event)
            })
            .collect()
    }

    pub fn queued_messages(&self) -> usize {
        self.messages.len()
    }
}

pub const CHANNEL_FIRST: usize = 0;
pub const CHANNEL_SECOND: usize = 1;

/// Two paired channels. Shared-owned by both endpoint descriptors.
pub struct BiDirectionPipe {
    channels: [IrqSpinlock<Channel>; 2],
}

impl BiDirectionPipe {
    pub fn new() -> Arc<BiDirectionPipe> {
        Arc::new(BiDirectionPipe {
            channels: [
                IrqSpinlock::new(Channel::new()),
                IrqSpinlock::new(Channel::new()),
            ],
        })
    }

    /// Sends on the given channel; any resulting completion is delivered
    /// after the channel lock is released.
    pub fn send_on(
        &self,
        channel: usize,
        payload: &[u8],
        msg_request: i64,
        msg_seq: i64,
    ) -> Result<(), HelError> {
        let completion = self.channels[channel]
            .lock()
            .send(payload, msg_request, msg_seq)?;
        if let Some(completion) = completion {
            completion.deliver();
        }
        Ok(())
    }

    /// Submits a receive on the given channel.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_recv_on(
        &self,
        channel: usize,
        hub: Arc<EventHub>,
        buffer: UserPtr,
        max_length: usize,
        filter_request: i64,
        filter_seq: i64,
        info: SubmitInfo,
    ) {
        let completion = self.channels[channel].lock().submit_recv(
            hub,
            buffer,
            max_length,
            filter_request,
            filter_seq,
            info,
        );
        if let Some(completion) = completion {
            completion.deliver();
        }
    }

    /// Dismisses the receives parked on one channel (the channel the
    /// closed endpoint was reading).
    pub fn dismiss_channel(&self, channel: usize) {
        let completions = self.channels[channel].lock().dismiss_pending();
        deliver_all(completions);
    }
}

struct PendingHandshake {
    universe: Arc<Universe>,
    hub: Arc<EventHub>,
    info: SubmitInfo,
}

struct ServerInner {
    accepts: VecDeque<PendingHandshake>,
    connects: VecDeque<PendingHandshake>,
}

/// Rendezvous point matching accepts against connects.
pub struct Server {
    inner: IrqSpinlock<ServerInner>,
}

impl Server {
    pub fn new() -> Arc<Server> {
        Arc::new(Server {
            inner: IrqSpinlock::new(ServerInner {
                accepts: VecDeque::new(),
                connects: VecDeque::new(),
            }),
        })
    }

    /// Mints a fresh pipe for a matched pair. The acceptor gets the first
    /// descriptor, the connector the second; both completions carry the
    /// new handles.
    fn rendezvous(accept: PendingHandshake, connect: PendingHandshake) -> [Completion; 2] {
        let pipe = BiDirectionPipe::new();

        let accept_handle = accept.universe.attach(AnyDescriptor::BiDirectionFirst(
            BiDirectionFirstDescriptor { pipe: pipe.clone() },
        ));
        let connect_handle = connect.universe.attach(AnyDescriptor::BiDirectionSecond(
            BiDirectionSecondDescriptor { pipe },
        ));

        [
            Completion::new(
                accept.hub,
                Event::new(EventKind::Accept, HelError::Ok, accept.info)
                    .with_handle(accept_handle),
            ),
            Completion::new(
                connect.hub,
                Event::new(EventKind::Connect, HelError::Ok, connect.info)
                    .with_handle(connect_handle),
            ),
        ]
    }

    pub fn submit_accept(&self, universe: Arc<Universe>, hub: Arc<EventHub>, info: SubmitInfo) {
        let matched = {
            let mut inner = self.inner.lock();
            match inner.connects.pop_front() {
                Some(connect) => {
                    let accept = PendingHandshake { universe, hub, info };
                    Some(Self::rendezvous(accept, connect))
                }
                None => {
                    inner
                        .accepts
                        .push_back(PendingHandshake { universe, hub, info });
                    None
                }
            }
        };
        if let Some(completions) = matched {
            for completion in completions {
                completion.deliver();
            }
        }
    }

    pub fn submit_connect(&self, universe: Arc<Universe>, hub: Arc<EventHub>, info: SubmitInfo) {
        let matched = {
            let mut inner = self.inner.lock();
            match inner.accepts.pop_front() {
                Some(accept) => {
                    let connect = PendingHandshake { universe, hub, info };
                    Some(Self::rendezvous(accept, connect))
                }
                None => {
                    inner
                        .connects
                        .push_back(PendingHandshake { universe, hub, info });
                    None
                }
            }
        };
        if let Some(completions) = matched {
            for completion in completions {
                completion.deliver();
            }
        }
    }

    /// Fails the accepts still parked here (the server endpoint closed).
    pub fn dismiss_accepts(&self) {
        let completions: Vec<Completion> = self
            .inner
            .lock()
            .accepts
            .drain(..)
            .map(|pending| {
                Completion::new(
                    pending.hub,
                    Event::new(EventKind::Accept, HelError::Dismissed, pending.info),
                )
            })
            .collect();
        deliver_all(completions);
    }

    /// Fails the connects still parked here (the client endpoint closed).
    pub fn dismiss_connects(&self) {
        let completions: Vec<Completion> = self
            .inner
            .lock()
            .connects
            .drain(..)
            .map(|pending| {
                Completion::new(
                    pending.hub,
                    Event::new(EventKind::Connect, HelError::Dismissed, pending.info),
                )
            })
            .collect();
        deliver_all(completions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::universe::Universe;

    fn info(id: i64) -> SubmitInfo {
        SubmitInfo::new(id, 0, 0)
    }

    fn recv_into(
        channel: &mut Channel,
        hub: &Arc<EventHub>,
        buffer: &mut [u8],
        filter_request: i64,
        filter_seq: i64,
        id: i64,
    ) -> Option<Completion> {
        channel.submit_recv(
            hub.clone(),
            UserPtr::new(buffer.as_mut_ptr() as u64),
            buffer.len(),
            filter_request,
            filter_seq,
            info(id),
        )
    }

    #[test]
    fn send_then_recv_round_trips_payload_and_tags() {
        let mut channel = Channel::new();
        let hub = EventHub::new();
        assert!(channel.send(b"hello", 10, 20).unwrap().is_none());

        let mut buffer = [0u8; 8];
        let completion = recv_into(&mut channel, &hub, &mut buffer, -1, -1, 7).unwrap();
        completion.deliver();

        let events = hub.drain(4);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error, HelError::Ok);
        assert_eq!(events[0].info.async_id, 7);
        assert_eq!(events[0].length, 5);
        assert_eq!(events[0].msg_request, 10);
        assert_eq!(events[0].msg_seq, 20);
        assert_eq!(&buffer[..5], b"hello");
    }

    #[test]
    fn recv_then_send_matches_immediately() {
        let mut channel = Channel::new();
        let hub = EventHub::new();
        let mut buffer = [0u8; 8];
        assert!(recv_into(&mut channel, &hub, &mut buffer, -1, -1, 3).is_none());

        let completion = channel.send(b"ping", 0, 0).unwrap().unwrap();
        completion.deliver();
        assert_eq!(&buffer[..4], b"ping");
        assert_eq!(channel.queued_messages(), 0);
    }

    #[test]
    fn completions_follow_send_order() {
        let mut channel = Channel::new();
        let hub = EventHub::new();
        for seq in 0..3 {
            channel.send(&[seq as u8], 0, seq).unwrap();
        }

        let mut buffers = [[0u8; 4]; 3];
        for (index, buffer) in buffers.iter_mut().enumerate() {
            let completion =
                recv_into(&mut channel, &hub, buffer, -1, -1, index as i64).unwrap();
            completion.deliver();
        }

        let sequences: Vec<i64> = hub.drain(8).iter().map(|e| e.msg_seq).collect();
        assert_eq!(sequences, alloc::vec![0, 1, 2]);
    }

    #[test]
    fn filters_skip_non_matching_messages() {
        let mut channel = Channel::new();
        let hub = EventHub::new();
        channel.send(b"a", 1, 100).unwrap();
        channel.send(b"b", 2, 200).unwrap();

        let mut buffer = [0u8; 4];
        let completion = recv_into(&mut channel, &hub, &mut buffer, 2, -1, 1).unwrap();
        completion.deliver();
        assert_eq!(&buffer[..1], b"b");

        // The unmatched first message is still queued.
        assert_eq!(channel.queued_messages(), 1);
    }

    #[test]
    fn undersized_buffer_reports_buffer_too_small() {
        let mut channel = Channel::new();
        let hub = EventHub::new();
        channel.send(b"longer than four", 0, 0).unwrap();

        let mut buffer = [0u8; 4];
        let completion = recv_into(&mut channel, &hub, &mut buffer, -1, -1, 5).unwrap();
        completion.deliver();

        let events = hub.drain(4);
        assert_eq!(events[0].error, HelError::BufferTooSmall);
        assert_eq!(buffer, [0u8; 4]);
    }

    #[test]
    fn send_beyond_bound_reports_no_memory() {
        let mut channel = Channel::new();
        for _ in 0..MAX_QUEUE_DEPTH {
            channel.send(b"x", 0, 0).unwrap();
        }
        assert_eq!(channel.send(b"x", 0, 0), Err(HelError::NoMemory));
    }

    #[test]
    fn dismiss_fails_parked_receives() {
        let mut channel = Channel::new();
        let hub = EventHub::new();
        let mut buffer = [0u8; 4];
        assert!(recv_into(&mut channel, &hub, &mut buffer, -1, -1, 11).is_none());

        deliver_all(channel.dismiss_pending());
        let events = hub.drain(4);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error, HelError::Dismissed);
        assert_eq!(events[0].info.async_id, 11);
    }

    #[test]
    fn pipe_endpoints_cross_over() {
        let pipe = BiDirectionPipe::new();
        let hub = EventHub::new();
        let mut buffer = [0u8; 8];

        // The second endpoint reads the second channel, which is where the
        // first endpoint writes.
        pipe.submit_recv_on(
            CHANNEL_SECOND,
            hub.clone(),
            UserPtr::new(buffer.as_mut_ptr() as u64),
            buffer.len(),
            -1,
            -1,
            info(1),
        );
        pipe.send_on(CHANNEL_SECOND, b"over", 0, 0).unwrap();

        assert_eq!(hub.drain(4).len(), 1);
        assert_eq!(&buffer[..4], b"over");
    }

    #[test]
    fn rendezvous_attaches_fresh_handles_on_both_sides() {
        let server = Server::new();
        let acceptor = Universe::new();
        let connector = Universe::new();
        let accept_hub = EventHub::new();
        let connect_hub = EventHub::new();

        server.submit_accept(acceptor.clone(), accept_hub.clone(), info(1));
        assert!(accept_hub.is_empty());
        server.submit_connect(connector.clone(), connect_hub.clone(), info(2));

        let accept_events = accept_hub.drain(4);
        let connect_events = connect_hub.drain(4);
        assert_eq!(accept_events.len(), 1);
        assert_eq!(connect_events.len(), 1);
        assert_eq!(accept_events[0].info.async_id, 1);
        assert_eq!(connect_events[0].info.async_id, 2);

        let accept_handle = accept_events[0].handle;
        let connect_handle = connect_events[0].handle;
        assert!(matches!(
            acceptor.get(accept_handle),
            Some(AnyDescriptor::BiDirectionFirst(_))
        ));
        assert!(matches!(
            connector.get(connect_handle),
            Some(AnyDescriptor::BiDirectionSecond(_))
        ));
    }

    #[test]
    fn rendezvous_matches_in_either_order() {
        let server = Server::new();
        let universe = Universe::new();
        let hub = EventHub::new();

        server.submit_connect(universe.clone(), hub.clone(), info(5));
        server.submit_accept(universe.clone(), hub.clone(), info(6));

        let ids: Vec<i64> = hub.drain(4).iter().map(|e| e.info.async_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&5) && ids.contains(&6));
    }

    #[test]
    fn new_pipe_endpoints_exchange_messages() {
        let server = Server::new();
        let universe = Universe::new();
        let hub = EventHub::new();
        server.submit_accept(universe.clone(), hub.clone(), info(1));
        server.submit_connect(universe.clone(), hub.clone(), info(2));

        let events = hub.drain(4);
        let first = match universe.get(events[0].handle) {
            Some(AnyDescriptor::BiDirectionFirst(d)) => d.pipe,
            _ => panic!("expected the first endpoint"),
        };

        // First writes to the second channel; the second endpoint reads it.
        let mut buffer = [0u8; 8];
        first.submit_recv_on(
            CHANNEL_SECOND,
            hub.clone(),
            UserPtr::new(buffer.as_mut_ptr() as u64),
            buffer.len(),
            -1,
            -1,
            info(3),
        );
        first.send_on(CHANNEL_SECOND, b"hi", 7, 8).unwrap();
        let events = hub.drain(4);
        assert_eq!(events.len(), 1);
        assert_eq!(&buffer[..2], b"hi");
    }
}
