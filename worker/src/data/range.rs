use std::{num::NonZeroU64, ops::Range};

use comms::specs::worker::AccessSpec;
use rand::{Rng, SeedableRng, rngs::StdRng};

#[derive(Debug)]
enum Access {
    Sequential { cursor: u64, wrap: bool },
    Random { rng: StdRng },
}

/// Picks the byte ranges of the dataset object the pipeline fetches.
#[derive(Debug)]
pub struct RangeSelector {
    size: u64,
    fetch_size: u64,
    access: Access,
}

impl RangeSelector {
    /// Creates a new `RangeSelector`.
    ///
    /// # Arguments
    /// * `access` - How to walk the object.
    /// * `size` - The size of the object in bytes.
    /// * `fetch_size` - The size of every range, objects this size or smaller are fetched whole.
    /// * `seed` - The seed of random access, should differ between workers.
    pub fn new(access: AccessSpec, size: u64, fetch_size: NonZeroU64, seed: u64) -> Self {
        let access = match access {
            AccessSpec::Sequential { wrap } => Access::Sequential { cursor: 0, wrap },
            AccessSpec::Random => Access::Random {
                rng: StdRng::seed_from_u64(seed),
            },
        };

        Self {
            size,
            fetch_size: fetch_size.get().min(size),
            access,
        }
    }

    /// The size of the object.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The amount of ranges it takes to cover the object once.
    pub fn ranges_per_pass(&self) -> u64 {
        self.size.div_ceil(self.fetch_size.max(1))
    }

    /// Returns the next range to fetch.
    ///
    /// # Returns
    /// `None` once a sequential walk without wrap around reached the end of the object,
    /// or right away for an empty object.
    pub fn next_range(&mut self) -> Option<Range<u64>> {
        if self.size == 0 {
            return None;
        }

        let Self {
            size, fetch_size, ..
        } = *self;

        match &mut self.access {
            Access::Sequential { cursor, wrap } => {
                if *cursor >= size {
                    if !*wrap {
                        return None;
                    }

                    *cursor = 0;
                }

                let start = *cursor;
                *cursor = (start + fetch_size).min(size);
                Some(start..*cursor)
            }
            Access::Random { rng } => {
                let start = rng.random_range(0..=size - fetch_size);
                Some(start..start + fetch_size)
            }
        }
    }
}
