use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt,
    rc::Rc,
};

use tracing::trace;

use crate::{
    endpoint::LinkEndpoint,
    event_loop::EventLoop,
    frame::{Frame, MacAddress},
};

/// Errors from attaching an endpoint to a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachError {
    /// A point-to-point endpoint is involved and the channel already holds
    /// two endpoints.
    PointToPointFull,
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::PointToPointFull => {
                write!(f, "point-to-point channel already has two endpoints")
            }
        }
    }
}

impl std::error::Error for AttachError {}

/// Shared broadcast medium.
///
/// Every frame handed to the channel is delivered, after the propagation
/// delay, to every attached endpoint except the sender and any receiver
/// that blacklisted the sender. Each delivery gets its own copy of the
/// frame so per-receiver processing cannot interfere.
pub struct Channel {
    event_loop: Rc<EventLoop>,
    delay: f64,
    endpoints: RefCell<Vec<Rc<RefCell<LinkEndpoint>>>>,
    // receiver index -> sender indexes it refuses delivery from
    blacklisted: RefCell<HashMap<usize, HashSet<usize>>>,
}

impl Channel {
    /// Creates a channel with the given propagation delay.
    pub fn new(event_loop: Rc<EventLoop>, delay: f64) -> Rc<Self> {
        debug_assert!(delay >= 0.0);
        Rc::new(Self {
            event_loop,
            delay,
            endpoints: RefCell::new(Vec::new()),
            blacklisted: RefCell::new(HashMap::new()),
        })
    }

    /// Propagation delay in seconds.
    pub fn delay(&self) -> f64 {
        self.delay
    }

    /// Enrolls an endpoint.
    ///
    /// Fails when the new endpoint or any already-attached one is in
    /// point-to-point mode and the channel would exceed two endpoints.
    pub fn attach(self: &Rc<Self>, endpoint: &Rc<RefCell<LinkEndpoint>>) -> Result<(), AttachError> {
        {
            let mut endpoints = self.endpoints.borrow_mut();

            let point_to_point = endpoint.borrow().is_point_to_point()
                || endpoints.iter().any(|e| e.borrow().is_point_to_point());
            if point_to_point && endpoints.len() >= 2 {
                return Err(AttachError::PointToPointFull);
            }

            endpoints.push(Rc::clone(endpoint));
        }

        endpoint.borrow_mut().set_channel(self);
        Ok(())
    }

    /// Schedules delivery of `frame` to every eligible peer of `sender`
    /// after the propagation delay.
    pub fn send(
        &self,
        frame: Frame,
        protocol: u16,
        to: MacAddress,
        from: MacAddress,
        sender: &Rc<RefCell<LinkEndpoint>>,
    ) {
        let endpoints = self.endpoints.borrow();
        let blacklisted = self.blacklisted.borrow();
        let sender_index = endpoints.iter().position(|e| Rc::ptr_eq(e, sender));

        for (index, endpoint) in endpoints.iter().enumerate() {
            if Some(index) == sender_index {
                continue;
            }
            if let Some(sender_index) = sender_index
                && blacklisted
                    .get(&index)
                    .is_some_and(|refused| refused.contains(&sender_index))
            {
                trace!(seq = frame.seq, receiver = index, "blacklisted pair, skipping delivery");
                continue;
            }

            let endpoint = Rc::clone(endpoint);
            let frame = frame.clone();
            self.event_loop.schedule(
                self.delay,
                Box::new(move || {
                    endpoint.borrow_mut().receive(frame, protocol, to, from);
                }),
            );
        }
    }

    /// Makes `to` refuse future deliveries originating at `from`.
    pub fn blacklist(&self, from: &Rc<RefCell<LinkEndpoint>>, to: &Rc<RefCell<LinkEndpoint>>) {
        let (Some(from_index), Some(to_index)) = (self.index_of(from), self.index_of(to)) else {
            return;
        };
        self.blacklisted
            .borrow_mut()
            .entry(to_index)
            .or_default()
            .insert(from_index);
    }

    /// Reverts a previous [`Channel::blacklist`] call.
    pub fn unblacklist(&self, from: &Rc<RefCell<LinkEndpoint>>, to: &Rc<RefCell<LinkEndpoint>>) {
        let (Some(from_index), Some(to_index)) = (self.index_of(from), self.index_of(to)) else {
            return;
        };
        if let Some(refused) = self.blacklisted.borrow_mut().get_mut(&to_index) {
            refused.remove(&from_index);
        }
    }

    /// Number of attached endpoints.
    pub fn n_endpoints(&self) -> usize {
        self.endpoints.borrow().len()
    }

    /// Returns the ith attached endpoint.
    pub fn endpoint(&self, index: usize) -> Option<Rc<RefCell<LinkEndpoint>>> {
        self.endpoints.borrow().get(index).cloned()
    }

    fn index_of(&self, endpoint: &Rc<RefCell<LinkEndpoint>>) -> Option<usize> {
        self.endpoints
            .borrow()
            .iter()
            .position(|e| Rc::ptr_eq(e, endpoint))
    }
}
