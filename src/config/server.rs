use serde::{Deserialize, Serialize};

/// Server behavior: connection timeouts, queue sizes, room lifecycle.
/// All durations are in the unit their name states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Window for presenting a verifiable token after the socket opens.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Close the connection when no frame arrives for this long.
    #[serde(default = "default_read_idle_timeout_secs")]
    pub read_idle_timeout_secs: u64,
    /// Application-level ping cadence.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Consecutive unanswered pings before the connection is closed.
    #[serde(default = "default_max_missed_pongs")]
    pub max_missed_pongs: u32,
    /// Per-connection outbound queue; a full queue evicts the consumer.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    /// Largest accepted inbound frame in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Per-room command inbox depth.
    #[serde(default = "default_room_inbox_capacity")]
    pub room_inbox_capacity: usize,
    /// How long an ended room lingers before it closes and is deleted.
    #[serde(default = "default_ended_room_grace_secs")]
    pub ended_room_grace_secs: u64,
    /// Fresh PINs tried before a create surfaces a conflict.
    #[serde(default = "default_pin_allocation_retries")]
    pub pin_allocation_retries: u32,
}

fn default_auth_timeout_secs() -> u64 {
    5
}

fn default_read_idle_timeout_secs() -> u64 {
    60
}

fn default_ping_interval_secs() -> u64 {
    25
}

fn default_max_missed_pongs() -> u32 {
    3
}

fn default_send_queue_capacity() -> usize {
    256
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_room_inbox_capacity() -> usize {
    64
}

fn default_ended_room_grace_secs() -> u64 {
    300
}

fn default_pin_allocation_retries() -> u32 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: default_auth_timeout_secs(),
            read_idle_timeout_secs: default_read_idle_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            max_missed_pongs: default_max_missed_pongs(),
            send_queue_capacity: default_send_queue_capacity(),
            max_message_size: default_max_message_size(),
            room_inbox_capacity: default_room_inbox_capacity(),
            ended_room_grace_secs: default_ended_room_grace_secs(),
            pin_allocation_retries: default_pin_allocation_retries(),
        }
    }
}

/// Sliding-window rate limits, per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_max_room_creations")]
    pub max_room_creations: usize,
    #[serde(default = "default_max_join_attempts")]
    pub max_join_attempts: usize,
    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: u64,
}

fn default_max_room_creations() -> usize {
    5
}

fn default_max_join_attempts() -> usize {
    20
}

fn default_time_window_secs() -> u64 {
    60
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_room_creations: default_max_room_creations(),
            max_join_attempts: default_max_join_attempts(),
            time_window_secs: default_time_window_secs(),
        }
    }
}
