/// Sequence number modulus.
pub static MAX_SEQ: u64 = 65536;

/// Maximum frame size in octets, header included.
pub static MTU: usize = 65535;

/// Fixed retransmission timeout, in simulated seconds.
pub static RTO: f64 = 1.0;

/// Link header size in octets: 8-octet sequence number plus the ack flag.
pub static FRAME_HEADER_LEN: usize = 9;

/// 5Mbps scenario link rate.
pub static DATA_RATE: u64 = 5_000_000;

/// Channel propagation delay.
pub static DELAY: f64 = 0.002;

/// Production sender window.
pub static WINDOW_SIZE: usize = 10;

/// Application payload size in octets.
pub static PAYLOAD_SIZE: usize = 1024;

/// Application send interval.
pub static SEND_INTERVAL: f64 = 0.001;

/// IPv4 ethertype, the protocol number the traffic apps stamp on frames.
pub static PROTO_IPV4: u16 = 0x0800;
