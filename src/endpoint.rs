use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::{Rc, Weak},
};

use tracing::{debug, trace};

use crate::{
    channel::Channel,
    common::{FRAME_HEADER_LEN, MAX_SEQ, MTU, RTO},
    error_model::ErrorModel,
    event_loop::{EventHandle, EventLoop},
    frame::{Frame, FrameMeta, MacAddress, PacketType},
    queue::DropTailQueue,
};

/// Upper-layer delivery callback: `(payload, protocol, source address)`.
///
/// Invoked only for in-order data frames addressed to this endpoint that
/// passed the error model.
pub type ReceiveCallback = Box<dyn FnMut(Vec<u8>, u16, MacAddress)>;

/// Promiscuous observer callback:
/// `(frame, protocol, from, to, packet type)`. Sees every non-corrupt
/// arrival, including frames addressed to other hosts.
pub type PromiscCallback = Box<dyn FnMut(&Frame, u16, MacAddress, MacAddress, PacketType)>;

/// Returns whether `a` precedes `b` in the modular half-space of `modulus`.
///
/// Valid while in-flight spans stay well below `modulus / 2`.
pub(crate) fn seq_before(a: u64, b: u64, modulus: u64) -> bool {
    let distance = (b + modulus - a) % modulus;
    distance != 0 && distance < modulus / 2
}

/// One unacknowledged frame in the sender window.
struct WindowEntry {
    frame: Frame,
    meta: FrameMeta,
    deadline: EventHandle,
    transmissions: u32,
}

/// Per-endpoint protocol counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct EndpointStats {
    /// Data frames handed to the channel, retransmissions included.
    pub data_frames_sent: u64,
    /// Data frames handed to the channel beyond their first transmission.
    pub retransmissions: u64,
    /// Go-back-N events triggered by a retransmission deadline.
    pub timeouts: u64,
    /// Cumulative acknowledgments emitted.
    pub acks_sent: u64,
    /// Acknowledgment frames processed.
    pub acks_received: u64,
    /// Frames dropped by the receive error model.
    pub corrupt_drops: u64,
    /// Data frames dropped as duplicate or out-of-order.
    pub out_of_order_drops: u64,
    /// In-order payloads delivered to the upper layer.
    pub delivered_frames: u64,
    /// Octets delivered to the upper layer.
    pub delivered_bytes: u64,
}

/// A link endpoint implementing Go-Back-N ARQ.
///
/// The sender half stamps sequence numbers, paces transmissions against the
/// link rate through a single transmit-complete event, and holds every
/// unacknowledged frame in a bounded window guarded by per-entry
/// retransmission deadlines; any deadline firing retransmits the whole
/// outstanding window from its head. The receiver half accepts exactly the
/// next expected sequence number, acknowledges every data arrival
/// cumulatively, and delivers in-order payloads upward.
pub struct LinkEndpoint {
    self_ref: Weak<RefCell<LinkEndpoint>>,
    event_loop: Rc<EventLoop>,
    channel: Weak<Channel>,
    address: MacAddress,

    mtu: usize,
    max_seq: u64,
    rto: f64,
    data_rate: u64,
    window_limit: usize,
    point_to_point: bool,

    next_seq: u64,
    window: VecDeque<WindowEntry>,
    inflight_index: usize,
    tx_queue: DropTailQueue,
    tx_event: Option<EventHandle>,

    expected_seq: u64,

    error_model: Option<Box<dyn ErrorModel>>,
    receive_callback: Option<ReceiveCallback>,
    promisc_callback: Option<PromiscCallback>,

    stats: EndpointStats,
}

impl LinkEndpoint {
    /// Creates an endpoint bound to `event_loop` with defaults: stop-and-wait
    /// window, infinite link rate, unbounded transmit queue.
    pub fn new(event_loop: Rc<EventLoop>, address: MacAddress) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|self_ref| {
            RefCell::new(Self {
                self_ref: self_ref.clone(),
                event_loop,
                channel: Weak::new(),
                address,
                mtu: MTU,
                max_seq: MAX_SEQ,
                rto: RTO,
                data_rate: 0,
                window_limit: 1,
                point_to_point: false,
                next_seq: 0,
                window: VecDeque::new(),
                inflight_index: 0,
                tx_queue: DropTailQueue::new(),
                tx_event: None,
                expected_seq: 0,
                error_model: None,
                receive_callback: None,
                promisc_callback: None,
                stats: EndpointStats::default(),
            })
        })
    }

    // --- configuration, to be applied before the first send ---

    /// Sets the link serialization rate in bits per second; 0 means
    /// instantaneous.
    pub fn set_data_rate(&mut self, bits_per_second: u64) {
        self.data_rate = bits_per_second;
    }

    /// Sets the fixed retransmission timeout.
    pub fn set_rto(&mut self, rto: f64) {
        assert!(rto > 0.0, "retransmission timeout must be positive");
        self.rto = rto;
    }

    /// Sets the sender window size.
    pub fn set_window_size(&mut self, window_size: usize) {
        assert!(window_size >= 1, "window size must be at least 1");
        assert!(self.window.is_empty(), "window size change with frames in flight");
        self.window_limit = window_size;
    }

    /// Sets the maximum frame size in octets, header included.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }

    /// Sets the sequence number modulus.
    pub fn set_max_seq(&mut self, max_seq: u64) {
        assert!(max_seq >= 2, "sequence space must hold at least two values");
        self.max_seq = max_seq;
    }

    /// Marks the endpoint as part of a two-endpoint point-to-point link.
    pub fn set_point_to_point_mode(&mut self, point_to_point: bool) {
        self.point_to_point = point_to_point;
    }

    /// Bounds the transmit queue to `capacity` frames.
    pub fn set_queue_capacity(&mut self, capacity: usize) {
        assert!(self.tx_queue.is_empty(), "queue capacity change with frames queued");
        self.tx_queue = DropTailQueue::with_capacity(capacity);
    }

    /// Installs the receive-side corruption oracle.
    pub fn set_error_model(&mut self, error_model: Box<dyn ErrorModel>) {
        self.error_model = Some(error_model);
    }

    /// Installs the upper-layer delivery callback.
    pub fn set_receive_callback(&mut self, callback: ReceiveCallback) {
        self.receive_callback = Some(callback);
    }

    /// Installs the promiscuous observer callback.
    pub fn set_promiscuous_callback(&mut self, callback: PromiscCallback) {
        self.promisc_callback = Some(callback);
    }

    pub(crate) fn set_channel(&mut self, channel: &Rc<Channel>) {
        self.channel = Rc::downgrade(channel);
    }

    // --- introspection ---

    /// This endpoint's link address.
    pub fn address(&self) -> MacAddress {
        self.address
    }

    /// Whether the endpoint is in point-to-point mode.
    pub fn is_point_to_point(&self) -> bool {
        self.point_to_point
    }

    /// Next sequence number the sender will stamp.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Next in-order sequence number the receiver will accept.
    pub fn expected_seq(&self) -> u64 {
        self.expected_seq
    }

    /// Number of unacknowledged frames in the window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Number of frames queued behind the window.
    pub fn queue_len(&self) -> usize {
        self.tx_queue.len()
    }

    /// Protocol counters.
    pub fn stats(&self) -> EndpointStats {
        self.stats
    }

    // --- sender path ---

    /// Offers a payload for reliable delivery to `dest`.
    ///
    /// Returns whether the payload was admitted; delivery itself is
    /// asynchronous and every retransmission is internal. Admission fails
    /// for oversized payloads and when the transmit queue is full.
    pub fn send(&mut self, payload: Vec<u8>, dest: MacAddress, protocol: u16) -> bool {
        let source = self.address;
        self.send_from(payload, source, dest, protocol)
    }

    /// Like [`LinkEndpoint::send`] with an explicit source address.
    pub fn send_from(
        &mut self,
        payload: Vec<u8>,
        source: MacAddress,
        dest: MacAddress,
        protocol: u16,
    ) -> bool {
        if payload.len() + FRAME_HEADER_LEN > self.mtu {
            debug!(endpoint = %self.address, len = payload.len(), mtu = self.mtu,
                   "oversized payload rejected");
            return false;
        }

        // Stamp, then advance the counter: a tail-dropped payload still
        // burns its sequence number.
        let seq = self.next_seq;
        self.next_seq = (seq + 1) % self.max_seq;

        let frame = Frame::data(seq, payload);
        let meta = FrameMeta {
            src: source,
            dst: dest,
            protocol,
        };

        if !self.tx_queue.enqueue(frame, meta) {
            debug!(endpoint = %self.address, seq, "transmit queue full, payload rejected");
            return false;
        }
        trace!(endpoint = %self.address, seq, dest = %dest, "payload admitted");

        self.refill_window();
        if self.tx_event.is_none() && self.inflight_index < self.window.len() {
            self.start_transmit();
        }
        true
    }

    /// Moves queued frames into the window while it has room, arming a
    /// fresh retransmission deadline for each.
    fn refill_window(&mut self) {
        while self.window.len() < self.window_limit {
            let Some((frame, meta)) = self.tx_queue.dequeue() else {
                break;
            };
            let deadline = self.make_deadline();
            self.window.push_back(WindowEntry {
                frame,
                meta,
                deadline,
                transmissions: 0,
            });
        }
    }

    /// Arms a retransmission deadline one timeout from now.
    fn make_deadline(&self) -> EventHandle {
        let endpoint = self.self_ref.clone();
        self.event_loop.schedule(
            self.rto,
            Box::new(move || {
                if let Some(endpoint) = endpoint.upgrade() {
                    endpoint.borrow_mut().on_retransmit_timeout();
                }
            }),
        )
    }

    /// Serialization delay for `frame` at the configured link rate.
    fn serialization_delay(&self, frame: &Frame) -> f64 {
        if self.data_rate == 0 {
            0.0
        } else {
            frame.size_bits() as f64 / self.data_rate as f64
        }
    }

    /// Schedules the transmit-complete event for the frame at the in-flight
    /// cursor. Callers guarantee no transmit-complete event is pending.
    fn start_transmit(&mut self) {
        debug_assert!(self.tx_event.is_none());
        let Some(entry) = self.window.get(self.inflight_index) else {
            return;
        };

        let tx_time = self.serialization_delay(&entry.frame);
        assert!(
            tx_time < self.rto,
            "serialization delay {tx_time}s must stay below the {}s retransmission timeout",
            self.rto,
        );

        let endpoint = self.self_ref.clone();
        self.tx_event = Some(self.event_loop.schedule(
            tx_time,
            Box::new(move || {
                if let Some(endpoint) = endpoint.upgrade() {
                    endpoint.borrow_mut().on_transmit_complete();
                }
            }),
        ));
    }

    /// The frame at the cursor has finished serializing: hand it to the
    /// channel and keep the chain going for the next untransmitted entry.
    fn on_transmit_complete(&mut self) {
        self.tx_event = None;

        if self.inflight_index >= self.window.len() {
            // Window caught up; an ack or a timeout restarts the chain.
            return;
        }

        let (frame, meta, retransmit) = {
            let entry = &mut self.window[self.inflight_index];
            entry.transmissions += 1;
            (entry.frame.clone(), entry.meta, entry.transmissions > 1)
        };

        self.stats.data_frames_sent += 1;
        if retransmit {
            self.stats.retransmissions += 1;
        }
        debug!(endpoint = %self.address, seq = frame.seq, retransmit, "frame on the wire");

        if let (Some(channel), Some(this)) = (self.channel.upgrade(), self.self_ref.upgrade()) {
            channel.send(frame, meta.protocol, meta.dst, meta.src, &this);
        }

        self.inflight_index += 1;

        if self.inflight_index < self.window.len() {
            // The deadline must measure from this transmission attempt, not
            // from window admission.
            let fresh = self.make_deadline();
            let stale = std::mem::replace(&mut self.window[self.inflight_index].deadline, fresh);
            self.event_loop.cancel(stale);

            self.start_transmit();
        }
    }

    /// A retransmission deadline fired: go back N.
    fn on_retransmit_timeout(&mut self) {
        let Some(head_seq) = self.window.front().map(|entry| entry.frame.seq) else {
            trace!(endpoint = %self.address, "stale retransmission deadline");
            return;
        };

        self.stats.timeouts += 1;
        debug!(endpoint = %self.address, head = head_seq, outstanding = self.window.len(),
               "retransmission timeout, resending the outstanding window");

        self.inflight_index = 0;

        let fresh = self.make_deadline();
        if let Some(head) = self.window.front_mut() {
            let stale = std::mem::replace(&mut head.deadline, fresh);
            self.event_loop.cancel(stale);
        }

        if self.tx_event.is_none() {
            self.start_transmit();
        }
    }

    /// Cumulative acknowledgment: slide the window past every sequence
    /// number the ack covers, then refill from the queue.
    fn handle_ack(&mut self, ack_seq: u64) {
        let mut advanced = false;

        while self
            .window
            .front()
            .is_some_and(|entry| seq_before(entry.frame.seq, ack_seq, self.max_seq))
        {
            if let Some(entry) = self.window.pop_front() {
                self.event_loop.cancel(entry.deadline);
                if self.inflight_index > 0 {
                    self.inflight_index -= 1;
                }
                advanced = true;
                trace!(endpoint = %self.address, seq = entry.frame.seq, ack = ack_seq,
                       "window head acknowledged");
            }
        }

        if !advanced {
            trace!(endpoint = %self.address, ack = ack_seq, "ack covers nothing outstanding");
            return;
        }

        self.refill_window();
        if self.tx_event.is_none() && self.inflight_index < self.window.len() {
            self.start_transmit();
        }
    }

    // --- receiver path ---

    /// Entry point for frames delivered by the channel.
    pub fn receive(&mut self, frame: Frame, protocol: u16, to: MacAddress, from: MacAddress) {
        if let Some(error_model) = self.error_model.as_mut()
            && error_model.is_corrupt(&frame)
        {
            self.stats.corrupt_drops += 1;
            trace!(endpoint = %self.address, seq = frame.seq, "corrupt frame dropped");
            return;
        }

        let packet_type = PacketType::classify(to, self.address);

        if packet_type != PacketType::OtherHost {
            if frame.is_ack {
                self.stats.acks_received += 1;
                self.handle_ack(frame.seq);
            } else {
                self.handle_data(&frame, protocol, from);
            }
        }

        if let Some(callback) = self.promisc_callback.as_mut() {
            callback(&frame, protocol, from, to, packet_type);
        }
    }

    /// Data arrival: always acknowledge, deliver only the expected frame.
    fn handle_data(&mut self, frame: &Frame, protocol: u16, from: MacAddress) {
        let in_order = frame.seq == self.expected_seq;

        if in_order {
            self.expected_seq = (self.expected_seq + 1) % self.max_seq;
        } else {
            self.stats.out_of_order_drops += 1;
            trace!(endpoint = %self.address, seq = frame.seq, expected = self.expected_seq,
                   "duplicate or out-of-order data frame dropped");
        }

        // Even a dropped frame is acknowledged: the cumulative ack tells the
        // sender where the receiver actually stands.
        self.send_ack(protocol, from);

        if in_order {
            self.stats.delivered_frames += 1;
            self.stats.delivered_bytes += frame.payload.len() as u64;
            if let Some(callback) = self.receive_callback.as_mut() {
                callback(frame.payload.clone(), protocol, from);
            }
        }
    }

    /// Emits an ack for the current expected sequence, straight to the
    /// channel: acks bypass the transmit queue and serialization pacing.
    fn send_ack(&mut self, protocol: u16, to: MacAddress) {
        let (Some(channel), Some(this)) = (self.channel.upgrade(), self.self_ref.upgrade()) else {
            return;
        };

        let ack = Frame::ack(self.expected_seq);
        trace!(endpoint = %self.address, seq = ack.seq, "emitting cumulative ack");
        self.stats.acks_sent += 1;
        channel.send(ack, protocol, to, self.address, &this);
    }

    // --- teardown ---

    /// Cancels the pending transmit-complete event and every retransmission
    /// deadline, and drains the transmit queue.
    pub fn shutdown(&mut self) {
        if let Some(tx_event) = self.tx_event.take() {
            self.event_loop.cancel(tx_event);
        }
        while let Some(entry) = self.window.pop_front() {
            self.event_loop.cancel(entry.deadline);
        }
        self.inflight_index = 0;
        self.tx_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PROTO_IPV4;
    use crate::error_model::ListErrorModel;

    #[test_log::test]
    fn test_seq_before_half_space() {
        assert!(seq_before(0, 1, 65536));
        assert!(seq_before(0, 32767, 65536));
        assert!(!seq_before(0, 0, 65536));
        assert!(!seq_before(1, 0, 65536));
        assert!(!seq_before(0, 32768, 65536));

        // Correct across the wrap.
        assert!(seq_before(65535, 0, 65536));
        assert!(seq_before(65530, 5, 65536));
        assert!(!seq_before(5, 65530, 65536));
    }

    struct Link {
        event_loop: Rc<EventLoop>,
        channel: Rc<Channel>,
        a: Rc<RefCell<LinkEndpoint>>,
        b: Rc<RefCell<LinkEndpoint>>,
        delivered: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    /// Two endpoints on one channel; deliveries at `b` are recorded.
    fn link(delay: f64, window: usize) -> Link {
        let event_loop = Rc::new(EventLoop::default());
        let channel = Channel::new(Rc::clone(&event_loop), delay);
        let a = LinkEndpoint::new(Rc::clone(&event_loop), MacAddress::from_index(1));
        let b = LinkEndpoint::new(Rc::clone(&event_loop), MacAddress::from_index(2));

        a.borrow_mut().set_window_size(window);
        channel.attach(&a).unwrap();
        channel.attach(&b).unwrap();

        let delivered = Rc::new(RefCell::new(Vec::new()));
        let delivered_clone = Rc::clone(&delivered);
        b.borrow_mut()
            .set_receive_callback(Box::new(move |payload, _proto, _from| {
                delivered_clone.borrow_mut().push(payload);
            }));

        Link {
            event_loop,
            channel,
            a,
            b,
            delivered,
        }
    }

    fn offer(link: &Link, count: usize) {
        let dest = link.b.borrow().address();
        for i in 0..count {
            assert!(link.a.borrow_mut().send(vec![i as u8; 32], dest, PROTO_IPV4));
        }
    }

    #[test_log::test]
    fn test_oversized_payload_rejected() {
        let link = link(0.0, 1);
        let dest = link.b.borrow().address();

        let mut a = link.a.borrow_mut();
        a.set_mtu(64);

        assert!(!a.send(vec![0; 64], dest, PROTO_IPV4));
        // Header fits within the MTU alongside this payload.
        assert!(a.send(vec![0; 64 - FRAME_HEADER_LEN], dest, PROTO_IPV4));
    }

    #[test_log::test]
    fn test_queue_full_rejects_and_burns_seq() {
        let link = link(0.0, 1);
        let dest = link.b.borrow().address();

        let mut a = link.a.borrow_mut();
        a.set_queue_capacity(1);

        assert!(a.send(vec![0; 8], dest, PROTO_IPV4)); // into the window
        assert!(a.send(vec![1; 8], dest, PROTO_IPV4)); // into the queue
        assert!(!a.send(vec![2; 8], dest, PROTO_IPV4)); // tail-dropped

        // The rejected payload still consumed a sequence number; an
        // oversized one does not reach the stamping step at all.
        assert_eq!(a.next_seq(), 3);
        assert!(!a.send(vec![3; 70_000], dest, PROTO_IPV4));
        assert_eq!(a.next_seq(), 3);

        assert_eq!(a.window_len(), 1);
        assert_eq!(a.queue_len(), 1);
    }

    #[test_log::test]
    fn test_stop_and_wait_delivers_in_order() {
        let link = link(0.002, 1);
        offer(&link, 5);

        // Window bounded the whole time.
        assert_eq!(link.a.borrow().window_len(), 1);
        assert_eq!(link.a.borrow().queue_len(), 4);

        link.event_loop.run_until_idle();

        let delivered = link.delivered.borrow();
        assert_eq!(delivered.len(), 5);
        for (i, payload) in delivered.iter().enumerate() {
            assert_eq!(payload, &vec![i as u8; 32]);
        }

        let a_stats = link.a.borrow().stats();
        assert_eq!(a_stats.data_frames_sent, 5);
        assert_eq!(a_stats.retransmissions, 0);
        assert_eq!(a_stats.acks_received, 5);
        assert_eq!(link.a.borrow().window_len(), 0);
    }

    #[test_log::test]
    fn test_windowed_send_respects_limit() {
        let link = link(0.001, 3);
        offer(&link, 10);

        assert_eq!(link.a.borrow().window_len(), 3);
        assert_eq!(link.a.borrow().queue_len(), 7);

        link.event_loop.run_until_idle();

        assert_eq!(link.delivered.borrow().len(), 10);
        assert_eq!(link.a.borrow().window_len(), 0);
        assert_eq!(link.a.borrow().queue_len(), 0);
    }

    #[test_log::test]
    fn test_duplicate_data_is_acked_but_not_redelivered() {
        let link = link(0.001, 1);
        let a_addr = link.a.borrow().address();
        let b_addr = link.b.borrow().address();

        let frame = Frame::data(0, vec![42; 8]);
        link.b
            .borrow_mut()
            .receive(frame.clone(), PROTO_IPV4, b_addr, a_addr);
        link.b.borrow_mut().receive(frame, PROTO_IPV4, b_addr, a_addr);

        assert_eq!(link.delivered.borrow().len(), 1);

        let b_stats = link.b.borrow().stats();
        assert_eq!(b_stats.delivered_frames, 1);
        assert_eq!(b_stats.out_of_order_drops, 1);
        assert_eq!(b_stats.acks_sent, 2);
        assert_eq!(link.b.borrow().expected_seq(), 1);
    }

    #[test_log::test]
    fn test_ack_covering_nothing_is_ignored() {
        let link = link(0.001, 2);
        offer(&link, 2);
        link.event_loop.run_until_idle();
        assert_eq!(link.a.borrow().window_len(), 0);

        // A spurious duplicate ack must not touch sender state.
        let a_addr = link.a.borrow().address();
        let b_addr = link.b.borrow().address();
        link.a
            .borrow_mut()
            .receive(Frame::ack(1), PROTO_IPV4, a_addr, b_addr);

        assert_eq!(link.a.borrow().window_len(), 0);
        assert_eq!(link.a.borrow().stats().acks_received, 3);
    }

    #[test_log::test]
    fn test_go_back_n_recovers_lost_window() {
        let link = link(0.001, 2);
        // Both first arrivals at the receiver are corrupted.
        link.b
            .borrow_mut()
            .set_error_model(Box::new(ListErrorModel::new([0, 1])));

        offer(&link, 2);
        link.event_loop.run_until_idle();

        let delivered = link.delivered.borrow();
        assert_eq!(delivered.len(), 2);

        let a_stats = link.a.borrow().stats();
        assert!(a_stats.timeouts >= 1);
        assert_eq!(a_stats.retransmissions, 2);
        assert_eq!(a_stats.data_frames_sent, 4);
        assert_eq!(link.b.borrow().stats().corrupt_drops, 2);
    }

    #[test_log::test]
    fn test_stale_timeout_is_noop() {
        let link = link(0.001, 1);

        link.a.borrow_mut().on_retransmit_timeout();

        assert_eq!(link.a.borrow().stats().timeouts, 0);
        assert_eq!(link.a.borrow().window_len(), 0);
    }

    #[test_log::test]
    fn test_other_host_frames_reach_only_promiscuous_observer() {
        let link = link(0.001, 1);
        let c = LinkEndpoint::new(Rc::clone(&link.event_loop), MacAddress::from_index(3));
        link.channel.attach(&c).unwrap();

        let observed = Rc::new(RefCell::new(Vec::new()));
        let observed_clone = Rc::clone(&observed);
        c.borrow_mut()
            .set_promiscuous_callback(Box::new(move |frame, _proto, _from, _to, packet_type| {
                observed_clone.borrow_mut().push((frame.seq, packet_type));
            }));

        offer(&link, 1);
        link.event_loop.run_until_idle();

        // C observed A's data frame and B's ack, delivered neither upward.
        let observed = observed.borrow();
        assert_eq!(observed.len(), 2);
        assert!(observed
            .iter()
            .all(|&(_, packet_type)| packet_type == PacketType::OtherHost));
        assert_eq!(c.borrow().stats().delivered_frames, 0);
        assert_eq!(c.borrow().stats().acks_sent, 0);
    }

    #[test_log::test]
    fn test_sequence_numbers_wrap() {
        let link = link(0.001, 1);
        let dest = link.b.borrow().address();

        {
            let mut a = link.a.borrow_mut();
            let mut b = link.b.borrow_mut();
            a.set_max_seq(8);
            b.set_max_seq(8);
        }

        for i in 0..20u8 {
            assert!(link.a.borrow_mut().send(vec![i; 4], dest, PROTO_IPV4));
        }
        link.event_loop.run_until_idle();

        assert_eq!(link.delivered.borrow().len(), 20);
        assert_eq!(link.a.borrow().next_seq(), 20 % 8);
        assert_eq!(link.b.borrow().expected_seq(), 20 % 8);
    }

    #[test_log::test]
    fn test_shutdown_cancels_everything() {
        let link = link(0.001, 2);
        offer(&link, 4);

        link.a.borrow_mut().shutdown();

        assert_eq!(link.a.borrow().window_len(), 0);
        assert_eq!(link.a.borrow().queue_len(), 0);

        link.event_loop.run_until_idle();

        // Nothing was ever put on the wire.
        assert_eq!(link.delivered.borrow().len(), 0);
        assert_eq!(link.b.borrow().stats().acks_sent, 0);
    }

    #[test_log::test]
    fn test_serialization_delay_paces_transmissions() {
        let link = link(0.0, 1);
        {
            let mut a = link.a.borrow_mut();
            // 1000 bits/s: a 41-octet frame takes 0.328s on the wire.
            a.set_data_rate(1000);
        }
        offer(&link, 1);

        link.event_loop.run_until_idle();

        assert_eq!(link.delivered.borrow().len(), 1);
        let expected = (32 + FRAME_HEADER_LEN) as f64 * 8.0 / 1000.0;
        assert!((link.event_loop.now() - expected).abs() < 1e-9);
    }
}
