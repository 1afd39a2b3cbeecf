//! Wire-level constants for the Discord v10 API.

/// REST base for the stable v10 surface.
pub const API_BASE: &str = "https://discord.com/api/v10";

/// Intents the relay asks for when the config does not pin its own set:
/// guilds, guild and direct messages, and message content (37377).
pub const DEFAULT_INTENTS: u64 =
    intents::GUILDS | intents::GUILD_MESSAGES | intents::DIRECT_MESSAGES | intents::MESSAGE_CONTENT;

/// Fallback heartbeat cadence when Hello somehow omits one (ms).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41250;

/// The subset of gateway opcodes this client sends or reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GatewayOpcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    /// Pick an interrupted session back up without re-identifying.
    Resume = 6,
    Reconnect = 7,
    /// The server dropped our session; the payload says whether a resume
    /// is still worth trying.
    InvalidSession = 9,
    /// First frame after connecting, carries the heartbeat interval.
    Hello = 10,
    HeartbeatAck = 11,
}

impl GatewayOpcode {
    pub fn from_u64(value: u64) -> Option<Self> {
        const KNOWN: [GatewayOpcode; 8] = [
            GatewayOpcode::Dispatch,
            GatewayOpcode::Heartbeat,
            GatewayOpcode::Identify,
            GatewayOpcode::Resume,
            GatewayOpcode::Reconnect,
            GatewayOpcode::InvalidSession,
            GatewayOpcode::Hello,
            GatewayOpcode::HeartbeatAck,
        ];
        KNOWN.into_iter().find(|op| *op as u64 == value)
    }
}

/// Gateway intent bits, as the developer docs number them.
pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const DIRECT_MESSAGES: u64 = 1 << 12;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_intents_are_the_documented_bitmask() {
        assert_eq!(DEFAULT_INTENTS, 37377);
    }

    #[test]
    fn opcodes_map_back_to_their_wire_values() {
        for value in [0, 1, 2, 6, 7, 9, 10, 11] {
            let op = GatewayOpcode::from_u64(value);
            assert_eq!(op.map(|op| op as u64), Some(value), "opcode {value}");
        }
    }

    #[test]
    fn unhandled_opcodes_come_back_as_none() {
        // 3, 4 and 8 are real opcodes this client never sends or receives.
        for value in [3, 4, 5, 8, 12, 99] {
            assert!(GatewayOpcode::from_u64(value).is_none(), "opcode {value}");
        }
    }
}
