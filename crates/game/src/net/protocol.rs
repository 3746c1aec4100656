use glam::DVec2;

use crate::action::{Action, ActionCode};
use crate::codec::{DecodeError, Reader, Writer};
use crate::entity::{Entity, EntityId};

use super::fragment::FragmentHeader;

pub const PROTOCOL_VERSION: i32 = 3;
pub const MIN_PROTOCOL_VERSION: i32 = 3;
pub const DEFAULT_PORT: u16 = 1024;
pub const MAX_PACKET_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    Connect = 1,
    Keystroke = 2,
    Quit = 3,
    KeepAlive = 4,
    Fragment = 100,
    VersionRejected = 101,
    FullSync = 102,
    Pause = 103,
    HostQuitting = 104,
    PlayerJoined = 105,
    PlayerQuit = 106,
    EntityCreated = 107,
    EntityRemoved = 108,
    PositionUpdate = 109,
    Action = 110,
}

impl TryFrom<i32> for Opcode {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Connect,
            2 => Self::Keystroke,
            3 => Self::Quit,
            4 => Self::KeepAlive,
            100 => Self::Fragment,
            101 => Self::VersionRejected,
            102 => Self::FullSync,
            103 => Self::Pause,
            104 => Self::HostQuitting,
            105 => Self::PlayerJoined,
            106 => Self::PlayerQuit,
            107 => Self::EntityCreated,
            108 => Self::EntityRemoved,
            109 => Self::PositionUpdate,
            110 => Self::Action,
            other => return Err(DecodeError::UnknownOpcode(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // peer -> host
    Connect { version: i32, name: String },
    Keystroke { code: ActionCode },
    Quit,
    // both directions
    KeepAlive,
    // host -> peer
    VersionRejected { required_version: i32 },
    FullSync { state: Vec<u8>, assigned_id: EntityId },
    Pause { paused: bool },
    HostQuitting,
    PlayerJoined { entity: Entity },
    PlayerQuit { timed_out: bool, id: EntityId },
    EntityCreated { entity: Entity },
    EntityRemoved { id: EntityId },
    PositionUpdate { id: EntityId, position: DVec2, velocity: DVec2 },
    Action(Action),
}

/// A decoded datagram: either a whole message or one piece of a larger one.
#[derive(Debug, PartialEq)]
pub enum Packet<'a> {
    Message(Message),
    Fragment {
        header: FragmentHeader,
        data: &'a [u8],
    },
}

impl Packet<'_> {
    pub fn decode(bytes: &[u8]) -> Result<Packet<'_>, DecodeError> {
        let mut r = Reader::new(bytes);
        match Opcode::try_from(r.i32()?)? {
            Opcode::Fragment => {
                let header = FragmentHeader::decode_fields(&mut r)?;
                Ok(Packet::Fragment {
                    header,
                    data: r.rest(),
                })
            }
            opcode => Ok(Packet::Message(Message::decode_body(opcode, &mut r)?)),
        }
    }
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Connect { .. } => Opcode::Connect,
            Self::Keystroke { .. } => Opcode::Keystroke,
            Self::Quit => Opcode::Quit,
            Self::KeepAlive => Opcode::KeepAlive,
            Self::VersionRejected { .. } => Opcode::VersionRejected,
            Self::FullSync { .. } => Opcode::FullSync,
            Self::Pause { .. } => Opcode::Pause,
            Self::HostQuitting => Opcode::HostQuitting,
            Self::PlayerJoined { .. } => Opcode::PlayerJoined,
            Self::PlayerQuit { .. } => Opcode::PlayerQuit,
            Self::EntityCreated { .. } => Opcode::EntityCreated,
            Self::EntityRemoved { .. } => Opcode::EntityRemoved,
            Self::PositionUpdate { .. } => Opcode::PositionUpdate,
            Self::Action(_) => Opcode::Action,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_i32(self.opcode() as i32);
        match self {
            Self::Connect { version, name } => {
                w.put_i32(*version);
                w.put_str(name);
            }
            Self::Keystroke { code } => w.put_i32(*code as i32),
            Self::Quit | Self::KeepAlive | Self::HostQuitting => {}
            Self::VersionRejected { required_version } => w.put_i32(*required_version),
            Self::FullSync { state, assigned_id } => {
                w.put_bytes(state);
                w.put_i64(assigned_id.0);
            }
            Self::Pause { paused } => w.put_bool(*paused),
            Self::PlayerJoined { entity } | Self::EntityCreated { entity } => entity.encode(&mut w),
            Self::PlayerQuit { timed_out, id } => {
                w.put_bool(*timed_out);
                w.put_i64(id.0);
            }
            Self::EntityRemoved { id } => w.put_i64(id.0),
            Self::PositionUpdate {
                id,
                position,
                velocity,
            } => {
                w.put_i64(id.0);
                w.put_f64(position.x);
                w.put_f64(position.y);
                w.put_f64(velocity.x);
                w.put_f64(velocity.y);
            }
            Self::Action(action) => action.encode(&mut w),
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        match Packet::decode(bytes)? {
            Packet::Message(message) => Ok(message),
            Packet::Fragment { .. } => Err(DecodeError::InvalidValue {
                what: "nested fragment",
                value: Opcode::Fragment as i64,
            }),
        }
    }

    fn decode_body(opcode: Opcode, r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let message = match opcode {
            Opcode::Connect => Self::Connect {
                version: r.i32()?,
                name: r.str()?,
            },
            Opcode::Keystroke => Self::Keystroke {
                code: ActionCode::try_from(r.i32()?)?,
            },
            Opcode::Quit => Self::Quit,
            Opcode::KeepAlive => Self::KeepAlive,
            Opcode::VersionRejected => Self::VersionRejected {
                required_version: r.i32()?,
            },
            Opcode::FullSync => {
                let rest = r.rest();
                let Some(split) = rest.len().checked_sub(8) else {
                    return Err(DecodeError::Truncated {
                        needed: 8,
                        remaining: rest.len(),
                    });
                };
                let mut id = Reader::new(&rest[split..]);
                Self::FullSync {
                    state: rest[..split].to_vec(),
                    assigned_id: EntityId(id.i64()?),
                }
            }
            Opcode::Pause => Self::Pause { paused: r.bool()? },
            Opcode::HostQuitting => Self::HostQuitting,
            Opcode::PlayerJoined => Self::PlayerJoined {
                entity: Entity::decode(r)?,
            },
            Opcode::PlayerQuit => Self::PlayerQuit {
                timed_out: r.bool()?,
                id: EntityId(r.i64()?),
            },
            Opcode::EntityCreated => Self::EntityCreated {
                entity: Entity::decode(r)?,
            },
            Opcode::EntityRemoved => Self::EntityRemoved {
                id: EntityId(r.i64()?),
            },
            Opcode::PositionUpdate => Self::PositionUpdate {
                id: EntityId(r.i64()?),
                position: DVec2::new(r.f64()?, r.f64()?),
                velocity: DVec2::new(r.f64()?, r.f64()?),
            },
            Opcode::Action => Self::Action(Action::decode(r)?),
            Opcode::Fragment => {
                return Err(DecodeError::InvalidValue {
                    what: "nested fragment",
                    value: Opcode::Fragment as i64,
                });
            }
        };
        r.finish()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_is_big_endian_prefix() {
        let bytes = Message::Quit.encode();
        assert_eq!(bytes, vec![0, 0, 0, 3]);
    }

    #[test]
    fn connect_roundtrip() {
        let message = Message::Connect {
            version: PROTOCOL_VERSION,
            name: "nova".into(),
        };
        assert_eq!(Message::decode(&message.encode()).unwrap(), message);
    }

    #[test]
    fn full_sync_splits_trailing_id() {
        let message = Message::FullSync {
            state: vec![9; 40],
            assigned_id: EntityId(12),
        };
        let bytes = message.encode();
        assert_eq!(bytes.len(), 4 + 40 + 8);
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn position_update_layout() {
        let message = Message::PositionUpdate {
            id: EntityId(5),
            position: DVec2::new(1.0, 2.0),
            velocity: DVec2::new(-0.5, 0.25),
        };
        let bytes = message.encode();
        assert_eq!(bytes.len(), 4 + 8 + 4 * 8);
        assert_eq!(Message::decode(&bytes).unwrap(), message);
    }

    #[test]
    fn malformed_packets_are_errors_not_panics() {
        assert!(Message::decode(&[]).is_err());
        assert!(Message::decode(&[0, 0, 0]).is_err());
        assert_eq!(
            Message::decode(&[0, 0, 0, 77]),
            Err(DecodeError::UnknownOpcode(77))
        );
        // KEYSTROKE missing its code
        assert!(Message::decode(&[0, 0, 0, 2, 0, 0]).is_err());
        // FULL_SYNC shorter than its trailing id
        assert!(Message::decode(&[0, 0, 0, 102, 1, 2, 3]).is_err());
        // QUIT with junk after it
        assert_eq!(
            Message::decode(&[0, 0, 0, 3, 1]),
            Err(DecodeError::TrailingBytes(1))
        );
    }
}
