//! The `state_vector` module tracks, per client, the next clock a replica
//! expects to see.
//!
//! # Examples
//!
//! ```
//! use ydoc::StateVector;
//! let (mut a, mut b) = (StateVector::new(), StateVector::new());
//! a.set_max(1, 5);
//! b.set_max(1, 3);
//! assert!(a > b);
//! ```

use std::cmp::Ordering;
use std::collections::{btree_map, BTreeMap};
use std::fmt::{self, Display};

use quickcheck::{Arbitrary, Gen};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::encoding::{Decoder, Encoder, Write};
use crate::error::Result;
use crate::id::{ClientID, ID};
use crate::traits::{Decode, Encode};

/// Map from client to the number of units of that client's log a replica has
/// integrated. Clients with nothing integrated are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateVector {
    /// clocks is the mapping from clients to their next expected clock
    pub clocks: BTreeMap<ClientID, u32>,
}

impl PartialOrd for StateVector {
    fn partial_cmp(&self, other: &StateVector) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if other.clocks.iter().all(|(c, k)| self.get(c) >= *k) {
            Some(Ordering::Greater)
        } else if self.clocks.iter().all(|(c, k)| other.get(c) >= *k) {
            Some(Ordering::Less)
        } else {
            None
        }
    }
}

impl Display for StateVector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (i, (client, clock)) in self.clocks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}->{}", client, clock)?;
        }
        write!(f, ")")
    }
}

impl StateVector {
    /// Returns a new, empty `StateVector`.
    pub fn new() -> StateVector {
        StateVector {
            clocks: BTreeMap::new(),
        }
    }

    /// Return the next expected clock of `client`.
    /// Clients not in the vector have an implied clock of 0.
    pub fn get(&self, client: &ClientID) -> u32 {
        self.clocks.get(client).copied().unwrap_or(0)
    }

    /// True if the unit named by `id` is covered by this vector.
    pub fn contains(&self, id: &ID) -> bool {
        id.clock < self.get(&id.client)
    }

    /// Store `clock` for `client` if it dominates the current one.
    ///
    /// ```
    /// use ydoc::StateVector;
    /// let mut sv = StateVector::new();
    /// sv.set_max(7, 4);
    /// sv.set_max(7, 2); // ignored because 4 dominates 2
    /// assert_eq!(sv.get(&7), 4);
    /// ```
    pub fn set_max(&mut self, client: ClientID, clock: u32) {
        if clock == 0 {
            return;
        }
        let entry = self.clocks.entry(client).or_insert(0);
        if *entry < clock {
            *entry = clock;
        }
    }

    /// Store `clock` for `client` if it is lower than the current one or the
    /// client is unknown.
    pub fn set_min(&mut self, client: ClientID, clock: u32) {
        match self.clocks.get_mut(&client) {
            Some(existing) => {
                if clock < *existing {
                    *existing = clock;
                }
            }
            None => {
                self.clocks.insert(client, clock);
            }
        }
    }

    /// Advance the clock of `client` by `delta`.
    pub fn inc_by(&mut self, client: ClientID, delta: u32) {
        if delta > 0 {
            *self.clocks.entry(client).or_insert(0) += delta;
        }
    }

    /// Take the pointwise maximum of both vectors.
    pub fn merge(&mut self, other: &StateVector) {
        for (client, clock) in other.clocks.iter() {
            self.set_max(*client, *clock);
        }
    }

    /// True if two state vectors have diverged.
    pub fn concurrent(&self, other: &StateVector) -> bool {
        self.partial_cmp(other).is_none()
    }

    /// Returns `true` if this state vector contains nothing.
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Number of clients present.
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Returns an iterator over the (client, clock) pairs in ascending client order
    pub fn iter(&self) -> impl Iterator<Item = (&ClientID, &u32)> {
        self.clocks.iter()
    }
}

impl Encode for StateVector {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let buf = encoder.rest();
        buf.write_var(self.clocks.len() as u64);
        for (client, clock) in self.clocks.iter().rev() {
            buf.write_var(*client);
            buf.write_var(*clock as u64);
        }
    }

    /// State vectors only use the plain stream, so both formats agree.
    fn encode_v2(&self) -> Vec<u8> {
        self.encode_v1()
    }
}

impl Decode for StateVector {
    fn decode<D: Decoder>(decoder: &mut D) -> Result<Self> {
        let len = decoder.read_var()?;
        let mut sv = StateVector::new();
        for _ in 0..len {
            let client = decoder.read_var()?;
            let clock = decoder.read_var_u32()?;
            sv.set_max(client, clock);
        }
        Ok(sv)
    }

    fn decode_v2(data: &[u8]) -> Result<Self> {
        Self::decode_v1(data)
    }
}

impl IntoIterator for StateVector {
    type Item = (ClientID, u32);
    type IntoIter = btree_map::IntoIter<ClientID, u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.clocks.into_iter()
    }
}

impl std::iter::FromIterator<(ClientID, u32)> for StateVector {
    fn from_iter<I: IntoIterator<Item = (ClientID, u32)>>(iter: I) -> Self {
        let mut sv = Self::new();
        for (client, clock) in iter {
            sv.set_max(client, clock);
        }
        sv
    }
}

impl From<Vec<(ClientID, u32)>> for StateVector {
    fn from(vec: Vec<(ClientID, u32)>) -> Self {
        vec.into_iter().collect()
    }
}

impl Arbitrary for StateVector {
    fn arbitrary<G: Gen>(g: &mut G) -> Self {
        let mut sv = StateVector::new();
        for _ in 0..g.gen_range(0, 7) {
            let client = u64::arbitrary(g) % 16;
            sv.set_max(client, g.gen_range(1, 300));
        }
        sv
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = StateVector>> {
        let mut smaller = vec![];
        for k in self.clocks.keys() {
            let mut sv = self.clone();
            sv.clocks.remove(k);
            smaller.push(sv)
        }
        Box::new(smaller.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    quickcheck! {
        fn prop_from_iter_of_iter_is_nop(sv: StateVector) -> bool {
            sv == sv.clone().into_iter().collect()
        }

        fn prop_from_iter_order_should_not_matter(clocks: Vec<(u64, u32)>) -> bool {
            let reverse: StateVector = clocks.clone().into_iter().rev().collect();
            let forward: StateVector = clocks.into_iter().collect();
            reverse == forward
        }

        fn prop_merge_dominates_both(a: StateVector, b: StateVector) -> bool {
            let mut merged = a.clone();
            merged.merge(&b);
            merged >= a && merged >= b
        }

        fn prop_v1_round_trip(sv: StateVector) -> bool {
            StateVector::decode_v1(&sv.encode_v1()).ok() == Some(sv)
        }
    }

    #[test]
    fn test_encoding_sorts_clients_descending() {
        let sv: StateVector = vec![(1, 4), (300, 2)].into();
        assert_eq!(sv.encode_v1(), vec![2, 0b1010_1100, 0b0000_0010, 2, 1, 4]);
        assert_eq!(sv.encode_v2(), sv.encode_v1());
    }

    #[test]
    fn test_set_min() {
        let mut sv = StateVector::new();
        sv.set_min(3, 10);
        sv.set_min(3, 12);
        assert_eq!(sv.get(&3), 10);
        sv.set_min(3, 0);
        assert_eq!(sv.get(&3), 0);
    }

    #[test]
    fn test_concurrent() {
        let a: StateVector = vec![(1, 2)].into();
        let b: StateVector = vec![(2, 2)].into();
        assert!(a.concurrent(&b));
        assert_eq!(a.to_string(), "(1->2)");
    }
}
