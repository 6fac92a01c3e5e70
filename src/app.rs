use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use tracing::{debug, info};

use crate::{
    common::{PAYLOAD_SIZE, PROTO_IPV4, SEND_INTERVAL},
    endpoint::LinkEndpoint,
    event_loop::{EventHandle, EventLoop},
    frame::MacAddress,
};

/// Periodic traffic source.
///
/// Offers fixed-size payloads to its endpoint at a fixed interval. The
/// admission result is disregarded: acknowledgment handling below decides
/// what actually gets through.
pub struct AppSender {
    self_ref: Weak<RefCell<AppSender>>,
    event_loop: Rc<EventLoop>,
    endpoint: Rc<RefCell<LinkEndpoint>>,
    dest: MacAddress,
    protocol: u16,
    payload_size: usize,
    interval: f64,
    count: u64,
    sent: u64,
    admitted: u64,
    send_event: Option<EventHandle>,
}

impl AppSender {
    /// Creates a source feeding `endpoint`, addressed to `dest`.
    pub fn new(
        event_loop: Rc<EventLoop>,
        endpoint: Rc<RefCell<LinkEndpoint>>,
        dest: MacAddress,
    ) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|self_ref| {
            RefCell::new(Self {
                self_ref: self_ref.clone(),
                event_loop,
                endpoint,
                dest,
                protocol: PROTO_IPV4,
                payload_size: PAYLOAD_SIZE,
                interval: SEND_INTERVAL,
                count: u64::MAX,
                sent: 0,
                admitted: 0,
                send_event: None,
            })
        })
    }

    /// Sets the per-payload size in octets.
    pub fn set_payload_size(&mut self, payload_size: usize) {
        self.payload_size = payload_size;
    }

    /// Sets the interval between offers.
    pub fn set_interval(&mut self, interval: f64) {
        assert!(interval > 0.0);
        self.interval = interval;
    }

    /// Bounds the number of payloads this source will offer.
    pub fn set_count(&mut self, count: u64) {
        self.count = count;
    }

    /// Starts offering payloads at absolute simulated time `at`.
    pub fn start(&mut self, at: f64) {
        let delay = (at - self.event_loop.now()).max(0.0);
        self.schedule_transmit(delay);
    }

    /// Cancels any pending offer.
    pub fn stop(&mut self) {
        if let Some(send_event) = self.send_event.take() {
            self.event_loop.cancel(send_event);
        }
    }

    /// Payloads offered so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Payloads the endpoint admitted.
    pub fn admitted(&self) -> u64 {
        self.admitted
    }

    fn schedule_transmit(&mut self, delay: f64) {
        let app = self.self_ref.clone();
        self.send_event = Some(self.event_loop.schedule(
            delay,
            Box::new(move || {
                if let Some(app) = app.upgrade() {
                    app.borrow_mut().on_send();
                }
            }),
        ));
    }

    fn on_send(&mut self) {
        self.send_event = None;

        let payload = vec![0u8; self.payload_size];
        let admitted = self
            .endpoint
            .borrow_mut()
            .send(payload, self.dest, self.protocol);

        self.sent += 1;
        if admitted {
            self.admitted += 1;
        }
        debug!(sent = self.sent, admitted, at = self.event_loop.now(), "payload offered");

        if self.sent < self.count {
            self.schedule_transmit(self.interval);
        }
    }
}

#[derive(Default)]
struct SinkState {
    payloads: u64,
    bytes: u64,
    last_rx: f64,
}

/// Counting sink.
///
/// Installs itself as the endpoint's receive callback, counts delivered
/// payloads and octets, and remembers the last delivery time.
pub struct AppReceiver {
    state: Rc<RefCell<SinkState>>,
}

impl AppReceiver {
    /// Hooks the sink into `endpoint`.
    pub fn install(event_loop: &Rc<EventLoop>, endpoint: &Rc<RefCell<LinkEndpoint>>) -> Self {
        let state = Rc::new(RefCell::new(SinkState::default()));

        let state_clone = Rc::clone(&state);
        let event_loop = Rc::clone(event_loop);
        endpoint
            .borrow_mut()
            .set_receive_callback(Box::new(move |payload, _protocol, _from| {
                let mut state = state_clone.borrow_mut();
                state.payloads += 1;
                state.bytes += payload.len() as u64;
                state.last_rx = event_loop.now();
            }));

        Self { state }
    }

    /// Payloads delivered in order.
    pub fn payloads(&self) -> u64 {
        self.state.borrow().payloads
    }

    /// Octets delivered in order.
    pub fn bytes(&self) -> u64 {
        self.state.borrow().bytes
    }

    /// Simulated time of the last delivery; 0 when nothing arrived.
    pub fn last_rx(&self) -> f64 {
        self.state.borrow().last_rx
    }

    /// Achieved throughput in bits per second since `start`.
    pub fn throughput_bps(&self, start: f64) -> f64 {
        let state = self.state.borrow();
        if state.last_rx > start {
            state.bytes as f64 * 8.0 / (state.last_rx - start)
        } else {
            0.0
        }
    }

    /// Logs the final tallies, as the sink does when its run ends.
    pub fn report(&self, start: f64) {
        let state = self.state.borrow();
        info!(
            payloads = state.payloads,
            bytes = state.bytes,
            throughput_bps = self.throughput_bps(start),
            "sink totals"
        );
    }
}
