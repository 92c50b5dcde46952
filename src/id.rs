use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use quickcheck::{Arbitrary, Gen};

/// Unique identifier of a replica producing operations.
pub type ClientID = u64;

/// ID names a single logical operation: the `clock`-th unit produced by `client`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ID {
    /// The replica that produced the operation
    pub client: ClientID,
    /// Position of the operation in the client's log
    pub clock: u32,
}

impl ID {
    /// Build an ID from a client and clock
    pub fn new(client: ClientID, clock: u32) -> Self {
        ID { client, clock }
    }

    /// The ID `offset` units further along the same client's log
    pub fn advance(&self, offset: u32) -> Self {
        ID::new(self.client, self.clock + offset)
    }
}

impl PartialOrd for ID {
    /// IDs are only ordered within a single client.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.client == other.client {
            self.clock.partial_cmp(&other.clock)
        } else {
            None
        }
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{}#{}>", self.client, self.clock)
    }
}

impl Arbitrary for ID {
    fn arbitrary<G: Gen>(g: &mut G) -> Self {
        ID {
            client: u64::arbitrary(g) % 8,
            clock: u32::arbitrary(g) % 50,
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let mut shrunk = Vec::new();
        if self.clock > 0 {
            shrunk.push(ID::new(self.client, self.clock - 1));
        }
        Box::new(shrunk.into_iter())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck::quickcheck;

    quickcheck! {
        fn advance_moves_only_the_clock(id: ID, offset: u8) -> bool {
            let next = id.advance(offset as u32);
            next.client == id.client && next.clock == id.clock + offset as u32
        }

        fn test_partial_order(a: ID, b: ID) -> bool {
            match (a.partial_cmp(&b), b.partial_cmp(&a)) {
                (None, None) => a.client != b.client,
                (Some(Ordering::Less), Some(Ordering::Greater)) => a.client == b.client && a.clock < b.clock,
                (Some(Ordering::Greater), Some(Ordering::Less)) => a.client == b.client && a.clock > b.clock,
                (Some(Ordering::Equal), Some(Ordering::Equal)) => a == b,
                _ => false
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ID::new(3, 14).to_string(), "<3#14>");
    }
}
