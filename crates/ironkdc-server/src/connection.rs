use std::net::SocketAddr;

use slab::Slab;
use tokio::time::Instant;

/// An accepted stream connection and the bytes received on it so far.
#[derive(Debug)]
pub struct Connection<S> {
    pub stream: S,
    pub peer: SocketAddr,
    pub buf: Vec<u8>,
    pub deadline: Instant,
}

/// Accepted connections of one worker.
///
/// Capacity grows by at least `grow_step` slots at a time and the table never
/// holds more than `max` connections; this is the only bound on per-connection memory.
#[derive(Debug)]
pub struct ConnectionTable<S> {
    slots: Slab<Connection<S>>,
    grow_step: usize,
    max: usize,
}

impl<S> ConnectionTable<S> {
    pub fn new(grow_step: usize, max: usize) -> Self {
        Self {
            slots: Slab::new(),
            grow_step: grow_step.max(1),
            max,
        }
    }

    /// Stores a new connection, or hands it back when the table is full.
    pub fn insert(&mut self, connection: Connection<S>) -> Result<usize, Connection<S>> {
        let len = self.slots.len();

        if len >= self.max {
            return Err(connection);
        }

        if len == self.slots.capacity() {
            let additional = self.grow_step.min(self.max - len);
            self.slots.reserve_exact(additional);
            trace!(capacity = self.slots.capacity(), "Connection table grown");
        }

        Ok(self.slots.insert(connection))
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut Connection<S>> {
        self.slots.get_mut(key)
    }

    pub fn remove(&mut self, key: usize) -> Option<Connection<S>> {
        self.slots.try_remove(key)
    }

    /// Removes and returns every connection whose deadline is not in the future.
    pub fn sweep(&mut self, now: Instant) -> Vec<Connection<S>> {
        let expired: Vec<usize> = self
            .slots
            .iter()
            .filter(|(_, connection)| connection.deadline <= now)
            .map(|(key, _)| key)
            .collect();

        expired.into_iter().filter_map(|key| self.slots.try_remove(key)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection<S>)> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    const PEER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000);

    fn connection(id: u32, deadline: Instant) -> Connection<u32> {
        Connection {
            stream: id,
            peer: PEER,
            buf: Vec::new(),
            deadline,
        }
    }

    #[test]
    fn grows_by_the_step_and_stops_at_the_cap() {
        let now = Instant::now();
        let mut table = ConnectionTable::new(4, 6);

        for id in 0..4 {
            table.insert(connection(id, now)).unwrap();
        }
        assert_eq!(table.capacity(), 4);

        table.insert(connection(4, now)).unwrap();
        assert!(table.capacity() >= 6);

        table.insert(connection(5, now)).unwrap();
        let rejected = table.insert(connection(6, now)).unwrap_err();
        assert_eq!(rejected.stream, 6);
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn freed_slots_are_reused() {
        let now = Instant::now();
        let mut table = ConnectionTable::new(2, 2);

        let first = table.insert(connection(0, now)).unwrap();
        table.insert(connection(1, now)).unwrap();
        table.remove(first).unwrap();

        assert_eq!(table.insert(connection(2, now)).unwrap(), first);
        assert_eq!(table.get_mut(first).unwrap().stream, 2);
    }

    #[test]
    fn zero_capacity_table_rejects_everything() {
        let mut table = ConnectionTable::new(4, 0);
        assert!(table.insert(connection(0, Instant::now())).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_closes_at_the_deadline_and_not_before() {
        let start = Instant::now();
        let idle = Duration::from_secs(4);
        let mut table = ConnectionTable::new(4, 8);

        table.insert(connection(0, start + idle)).unwrap();
        table.insert(connection(1, start + idle * 2)).unwrap();

        assert!(table.sweep(start).is_empty());
        assert!(table.sweep(start + idle - Duration::from_millis(1)).is_empty());

        let expired = table.sweep(start + idle);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].stream, 0);
        assert_eq!(table.len(), 1);

        let expired = table.sweep(start + idle * 3);
        assert_eq!(expired[0].stream, 1);
        assert!(table.is_empty());
    }
}
