//! Immutable, address-sorted connection snapshots.

use std::sync::Arc;

use symphony_ring::RingAddress;

use crate::connection::{Connection, MainType};
use crate::error::{Result, TableError};

/// A sorted snapshot of the connections in one table partition.
///
/// Entries are ordered by raw address, so walking indices upward walks the
/// ring clockwise. Index access wraps modulo the length. Lists are never
/// mutated in place: [`insert`](Self::insert), [`remove`](Self::remove) and
/// [`replace`](Self::replace) build a new list and leave readers of the old
/// one undisturbed.
#[derive(Debug, Clone)]
pub struct ConnectionList {
    main: MainType,
    connections: Vec<Arc<Connection>>,
}

impl ConnectionList {
    pub fn new(main: MainType) -> Self {
        Self {
            main,
            connections: Vec::new(),
        }
    }

    pub fn from_connections<I>(main: MainType, connections: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<Connection>>,
    {
        let mut list = Self::new(main);
        for connection in connections {
            list = list.insert(connection)?;
        }
        Ok(list)
    }

    pub fn main_type(&self) -> MainType {
        self.main
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Connection>> {
        self.connections.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = RingAddress> + '_ {
        self.connections.iter().map(|c| *c.address())
    }

    /// Binary search by address: `Ok(index)` when present, otherwise
    /// `Err(insertion_point)`.
    pub fn index_of(&self, address: &RingAddress) -> std::result::Result<usize, usize> {
        self.connections
            .binary_search_by(|c| c.address().cmp(address))
    }

    /// Connection at `index`, wrapping in both directions.
    pub fn at(&self, index: isize) -> Option<&Arc<Connection>> {
        if self.connections.is_empty() {
            return None;
        }
        let len = self.connections.len() as isize;
        self.connections.get(index.rem_euclid(len) as usize)
    }

    pub fn get(&self, address: &RingAddress) -> Option<&Arc<Connection>> {
        self.index_of(address).ok().map(|i| &self.connections[i])
    }

    pub fn contains(&self, address: &RingAddress) -> bool {
        self.index_of(address).is_ok()
    }

    /// Nearest connection clockwise of `address`, never `address` itself.
    pub fn left_neighbor_of(&self, address: &RingAddress) -> Option<&Arc<Connection>> {
        let index = match self.index_of(address) {
            Ok(_) if self.len() == 1 => return None,
            Ok(i) => i + 1,
            Err(i) => i,
        };
        self.at(index as isize)
    }

    /// Nearest connection counter-clockwise of `address`, never `address` itself.
    pub fn right_neighbor_of(&self, address: &RingAddress) -> Option<&Arc<Connection>> {
        let index = match self.index_of(address) {
            Ok(_) if self.len() == 1 => return None,
            Ok(i) | Err(i) => i as isize - 1,
        };
        self.at(index)
    }

    /// Number of connections strictly inside the arc walked clockwise from
    /// `from` to `to`. A connection's count from the local address is its
    /// rank among our left-side neighbours, starting at 0.
    pub fn left_inclusive_count(&self, from: &RingAddress, to: &RingAddress) -> usize {
        if from == to || self.is_empty() {
            return 0;
        }
        let len = self.len() as isize;
        let (from_idx, from_present) = split(self.index_of(from));
        let (to_idx, to_present) = split(self.index_of(to));

        let count = if from_idx == to_idx {
            if to > from {
                0
            } else {
                len - from_present as isize - to_present as isize
            }
        } else {
            let mut dist = to_idx as isize - from_idx as isize;
            if dist < 0 {
                dist += len;
            }
            if from_present {
                dist -= 1;
            }
            dist
        };
        count.max(0) as usize
    }

    /// Number of connections strictly inside the arc walked counter-clockwise
    /// from `from` to `to`.
    pub fn right_inclusive_count(&self, from: &RingAddress, to: &RingAddress) -> usize {
        self.left_inclusive_count(to, from)
    }

    /// Connection with the smallest ring distance to `dest`.
    pub fn closest_to(&self, dest: &RingAddress) -> Option<&Arc<Connection>> {
        match self.index_of(dest) {
            Ok(i) => self.connections.get(i),
            Err(i) => {
                let left = self.at(i as isize)?;
                let right = self.at(i as isize - 1)?;
                if dest.is_closer_to_first(right.address(), left.address()) {
                    Some(right)
                } else {
                    Some(left)
                }
            }
        }
    }

    /// Greedy routing step: the connection nearer to `dest` than `local` is,
    /// or `None` when `local` is already the closest known node.
    pub fn next_hop(&self, local: &RingAddress, dest: &RingAddress) -> Option<&Arc<Connection>> {
        let best = self.closest_to(dest)?;
        if best.address() == dest || dest.is_closer_to_first(best.address(), local) {
            Some(best)
        } else {
            None
        }
    }

    /// Up to `max` connections closest to `dest`, nearest first.
    pub fn nearest_n(&self, dest: &RingAddress, max: usize) -> Vec<Arc<Connection>> {
        let wanted = max.min(self.len());
        let mut out = Vec::with_capacity(wanted);
        if wanted == 0 {
            return out;
        }
        let (mut left, mut right) = match self.index_of(dest) {
            Ok(i) => {
                out.push(Arc::clone(&self.connections[i]));
                (i as isize + 1, i as isize - 1)
            }
            Err(i) => (i as isize, i as isize - 1),
        };
        while out.len() < wanted {
            let (l, r) = match (self.at(left), self.at(right)) {
                (Some(l), Some(r)) => (l, r),
                _ => break,
            };
            if dest.is_closer_to_first(r.address(), l.address()) {
                out.push(Arc::clone(r));
                right -= 1;
            } else {
                out.push(Arc::clone(l));
                left += 1;
            }
        }
        out
    }

    /// New list with `connection` added.
    pub fn insert(&self, connection: Arc<Connection>) -> Result<ConnectionList> {
        self.check_main(&connection)?;
        match self.index_of(connection.address()) {
            Ok(_) => Err(TableError::DuplicateAddress(*connection.address())),
            Err(i) => {
                let mut connections = self.connections.clone();
                connections.insert(i, connection);
                Ok(Self {
                    main: self.main,
                    connections,
                })
            }
        }
    }

    /// New list without `address`, plus the removed connection.
    pub fn remove(&self, address: &RingAddress) -> Result<(ConnectionList, Arc<Connection>)> {
        let i = self
            .index_of(address)
            .map_err(|_| TableError::UnknownAddress(*address))?;
        let mut connections = self.connections.clone();
        let removed = connections.remove(i);
        Ok((
            Self {
                main: self.main,
                connections,
            },
            removed,
        ))
    }

    /// New list with the entry for `connection`'s address swapped out.
    pub fn replace(&self, connection: Arc<Connection>) -> Result<ConnectionList> {
        self.check_main(&connection)?;
        let i = self
            .index_of(connection.address())
            .map_err(|_| TableError::UnknownAddress(*connection.address()))?;
        let mut connections = self.connections.clone();
        connections[i] = connection;
        Ok(Self {
            main: self.main,
            connections,
        })
    }

    fn check_main(&self, connection: &Connection) -> Result<()> {
        if connection.main_type() != self.main {
            return Err(TableError::WrongMainType {
                expected: self.main,
                actual: connection.main_type(),
            });
        }
        Ok(())
    }
}

fn split(found: std::result::Result<usize, usize>) -> (usize, bool) {
    match found {
        Ok(i) => (i, true),
        Err(i) => (i, false),
    }
}

impl<'a> IntoIterator for &'a ConnectionList {
    type Item = &'a Arc<Connection>;
    type IntoIter = std::slice::Iter<'a, Arc<Connection>>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.iter()
    }
}
