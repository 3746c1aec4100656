use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::codec::{DecodeError, Reader, Writer};

use super::protocol::Opcode;

/// Opcode plus series id, total count and index, all i32.
pub const FRAGMENT_HEADER_SIZE: usize = 16;
/// Upper bound on one series; anything larger is treated as hostile.
pub const MAX_FRAGMENTS: i32 = 4096;
pub const DEFAULT_FRAGMENT_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FragmentError {
    #[error("fragment count {0} out of range")]
    BadTotal(i32),
    #[error("fragment index {index} outside a series of {total}")]
    BadIndex { index: i32, total: i32 },
    #[error("series {series_id} announced {expected} fragments, this one says {got}")]
    TotalMismatch {
        series_id: i32,
        expected: i32,
        got: i32,
    },
    #[error("packet limit {0} leaves no room for fragment data")]
    PacketTooSmall(usize),
    #[error("payload of {0} bytes needs too many fragments")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub series_id: i32,
    pub total: i32,
    pub index: i32,
}

impl FragmentHeader {
    pub fn encode(&self, w: &mut Writer) {
        w.put_i32(Opcode::Fragment as i32);
        w.put_i32(self.series_id);
        w.put_i32(self.total);
        w.put_i32(self.index);
    }

    /// Reads the header fields that follow the FRAGMENT opcode.
    pub fn decode_fields(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            series_id: r.i32()?,
            total: r.i32()?,
            index: r.i32()?,
        })
    }
}

/// Splits an encoded message into FRAGMENT packets no longer than `max_packet`.
pub fn split_payload(
    series_id: i32,
    payload: &[u8],
    max_packet: usize,
) -> Result<Vec<Vec<u8>>, FragmentError> {
    let chunk_size = max_packet.saturating_sub(FRAGMENT_HEADER_SIZE);
    if chunk_size == 0 {
        return Err(FragmentError::PacketTooSmall(max_packet));
    }
    let count = payload.len().div_ceil(chunk_size).max(1);
    let total = i32::try_from(count)
        .ok()
        .filter(|&total| total <= MAX_FRAGMENTS)
        .ok_or(FragmentError::PayloadTooLarge(payload.len()))?;

    let mut packets = Vec::with_capacity(count);
    let mut chunks = payload.chunks(chunk_size);
    for index in 0..total {
        let chunk = chunks.next().unwrap_or(&[]);
        let mut w = Writer::with_capacity(FRAGMENT_HEADER_SIZE + chunk.len());
        FragmentHeader {
            series_id,
            total,
            index,
        }
        .encode(&mut w);
        w.put_bytes(chunk);
        packets.push(w.into_bytes());
    }
    Ok(packets)
}

/// Reassembly state for one fragmented message.
#[derive(Debug)]
pub struct FragmentAssembler {
    series_id: i32,
    slots: Vec<Option<Vec<u8>>>,
    received: usize,
    started: Instant,
}

impl FragmentAssembler {
    pub fn new(series_id: i32, total: i32) -> Result<Self, FragmentError> {
        Self::started_at(series_id, total, Instant::now())
    }

    fn started_at(series_id: i32, total: i32, started: Instant) -> Result<Self, FragmentError> {
        if !(1..=MAX_FRAGMENTS).contains(&total) {
            return Err(FragmentError::BadTotal(total));
        }
        Ok(Self {
            series_id,
            slots: vec![None; total as usize],
            received: 0,
            started,
        })
    }

    pub fn series_id(&self) -> i32 {
        self.series_id
    }

    pub fn total(&self) -> i32 {
        self.slots.len() as i32
    }

    pub fn received(&self) -> usize {
        self.received
    }

    /// Stores one fragment. Duplicates are ignored. Returns true once every
    /// slot is filled.
    pub fn insert(&mut self, header: FragmentHeader, data: &[u8]) -> Result<bool, FragmentError> {
        if header.total != self.total() {
            return Err(FragmentError::TotalMismatch {
                series_id: self.series_id,
                expected: self.total(),
                got: header.total,
            });
        }
        let slot = usize::try_from(header.index)
            .ok()
            .and_then(|index| self.slots.get_mut(index))
            .ok_or(FragmentError::BadIndex {
                index: header.index,
                total: header.total,
            })?;
        if slot.is_none() {
            *slot = Some(data.to_vec());
            self.received += 1;
        }
        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.slots.len()
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.started) >= ttl
    }

    /// Concatenates the fragments in index order. Only meaningful once complete.
    pub fn merge(self) -> Vec<u8> {
        self.slots.into_iter().flatten().flatten().collect()
    }
}

/// All in-flight series of one channel, keyed by sender and series id.
#[derive(Debug)]
pub struct FragmentBuffer {
    series: HashMap<(SocketAddr, i32), FragmentAssembler>,
    ttl: Duration,
}

impl Default for FragmentBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENT_TTL)
    }
}

impl FragmentBuffer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            series: HashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Feeds one fragment. Returns the merged message when its series completes.
    pub fn accept(
        &mut self,
        from: SocketAddr,
        header: FragmentHeader,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, FragmentError> {
        self.accept_at(from, header, data, Instant::now())
    }

    pub fn accept_at(
        &mut self,
        from: SocketAddr,
        header: FragmentHeader,
        data: &[u8],
        now: Instant,
    ) -> Result<Option<Vec<u8>>, FragmentError> {
        let key = (from, header.series_id);
        let assembler = match self.series.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(FragmentAssembler::started_at(header.series_id, header.total, now)?)
            }
        };
        if !assembler.insert(header, data)? {
            return Ok(None);
        }
        Ok(self.series.remove(&key).map(FragmentAssembler::merge))
    }

    /// Drops series that have been incomplete for longer than the TTL.
    pub fn collect_garbage(&mut self) -> usize {
        self.collect_garbage_at(Instant::now())
    }

    pub fn collect_garbage_at(&mut self, now: Instant) -> usize {
        let before = self.series.len();
        let ttl = self.ttl;
        self.series.retain(|(from, series_id), assembler| {
            let keep = !assembler.is_expired(now, ttl);
            if !keep {
                log::debug!(
                    "Dropping stale series {} from {} ({}/{} fragments)",
                    series_id,
                    from,
                    assembler.received(),
                    assembler.total()
                );
            }
            keep
        });
        before - self.series.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::Packet;
    use proptest::prelude::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn parse(packet: &[u8]) -> (FragmentHeader, Vec<u8>) {
        match Packet::decode(packet).unwrap() {
            Packet::Fragment { header, data } => (header, data.to_vec()),
            other => panic!("expected fragment, got {:?}", other),
        }
    }

    #[test]
    fn split_respects_packet_limit() {
        let payload = vec![7u8; 2500];
        let packets = split_payload(3, &payload, 1024).unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.len() <= 1024));
        assert_eq!(packets[0].len(), 1024);

        let (header, data) = parse(&packets[2]);
        assert_eq!(
            header,
            FragmentHeader {
                series_id: 3,
                total: 3,
                index: 2
            }
        );
        assert_eq!(data.len(), 2500 - 2 * (1024 - FRAGMENT_HEADER_SIZE));
    }

    #[test]
    fn split_rejects_degenerate_limit() {
        assert_eq!(
            split_payload(1, &[1, 2, 3], FRAGMENT_HEADER_SIZE),
            Err(FragmentError::PacketTooSmall(FRAGMENT_HEADER_SIZE))
        );
    }

    #[test]
    fn reassembles_only_when_complete() {
        let payload: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        let packets = split_payload(9, &payload, 1024).unwrap();
        let mut buffer = FragmentBuffer::default();

        let (h0, d0) = parse(&packets[0]);
        let (h1, d1) = parse(&packets[1]);
        let (h2, d2) = parse(&packets[2]);
        let (h3, d3) = parse(&packets[3]);

        assert_eq!(buffer.accept(addr(1), h3, &d3).unwrap(), None);
        assert_eq!(buffer.accept(addr(1), h0, &d0).unwrap(), None);
        // a duplicate changes nothing
        assert_eq!(buffer.accept(addr(1), h0, &d0).unwrap(), None);
        assert_eq!(buffer.accept(addr(1), h2, &d2).unwrap(), None);
        assert_eq!(buffer.accept(addr(1), h1, &d1).unwrap(), Some(payload));
        assert!(buffer.is_empty());
    }

    #[test]
    fn series_are_kept_apart_per_sender() {
        let a = split_payload(1, &[1u8; 1500], 1024).unwrap();
        let b = split_payload(1, &[2u8; 1500], 1024).unwrap();
        let mut buffer = FragmentBuffer::default();

        let (h, d) = parse(&a[0]);
        buffer.accept(addr(1), h, &d).unwrap();
        let (h, d) = parse(&b[1]);
        buffer.accept(addr(2), h, &d).unwrap();
        assert_eq!(buffer.len(), 2);

        let (h, d) = parse(&a[1]);
        assert_eq!(buffer.accept(addr(1), h, &d).unwrap(), Some(vec![1u8; 1500]));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn invalid_headers_are_rejected() {
        let mut buffer = FragmentBuffer::default();
        let bad_total = FragmentHeader {
            series_id: 1,
            total: 0,
            index: 0,
        };
        assert_eq!(
            buffer.accept(addr(1), bad_total, &[]),
            Err(FragmentError::BadTotal(0))
        );

        let first = FragmentHeader {
            series_id: 2,
            total: 2,
            index: 0,
        };
        buffer.accept(addr(1), first, &[1]).unwrap();
        let out_of_range = FragmentHeader { index: 5, ..first };
        assert_eq!(
            buffer.accept(addr(1), out_of_range, &[1]),
            Err(FragmentError::BadIndex { index: 5, total: 2 })
        );
        let negative = FragmentHeader { index: -1, ..first };
        assert!(buffer.accept(addr(1), negative, &[1]).is_err());
        let mismatch = FragmentHeader {
            total: 3,
            index: 1,
            ..first
        };
        assert!(matches!(
            buffer.accept(addr(1), mismatch, &[1]),
            Err(FragmentError::TotalMismatch { .. })
        ));
    }

    #[test]
    fn stale_series_are_collected() {
        let mut buffer = FragmentBuffer::new(Duration::from_secs(10));
        let start = Instant::now();
        let header = FragmentHeader {
            series_id: 4,
            total: 2,
            index: 0,
        };
        buffer.accept_at(addr(1), header, &[0], start).unwrap();

        assert_eq!(buffer.collect_garbage_at(start + Duration::from_secs(5)), 0);
        assert_eq!(buffer.collect_garbage_at(start + Duration::from_secs(10)), 1);
        assert!(buffer.is_empty());
    }

    fn payload_and_order() -> impl Strategy<Value = (Vec<u8>, Vec<usize>)> {
        proptest::collection::vec(any::<u8>(), 1..6000).prop_flat_map(|payload| {
            let count = payload.len().div_ceil(1024 - FRAGMENT_HEADER_SIZE);
            let order: Vec<usize> = (0..count).collect();
            (Just(payload), Just(order).prop_shuffle())
        })
    }

    proptest! {
        #[test]
        fn reassembly_is_order_independent((payload, order) in payload_and_order()) {
            let packets = split_payload(11, &payload, 1024).unwrap();
            prop_assert_eq!(packets.len(), order.len());

            let mut buffer = FragmentBuffer::default();
            let mut merged = None;
            for (n, &i) in order.iter().enumerate() {
                let (header, data) = parse(&packets[i]);
                let result = buffer.accept(addr(9), header, &data).unwrap();
                if n + 1 < order.len() {
                    prop_assert!(result.is_none());
                } else {
                    merged = result;
                }
            }
            prop_assert_eq!(merged, Some(payload));
        }
    }
}
