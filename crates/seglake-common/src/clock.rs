//! Hybrid logical clock
//!
//! Version ids and oplog timestamps come from a single process-wide HLC
//! combining physical nanoseconds with a logical counter. Rendered as
//! `"%019d-%010d"` so lexical order equals causal order.

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A monotonic hybrid logical clock.
#[derive(Debug, Default)]
pub struct HlcClock {
    state: Mutex<HlcState>,
}

#[derive(Debug, Default, Clone, Copy)]
struct HlcState {
    physical_ns: u64,
    logical: u64,
}

/// A single HLC reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HlcTimestamp {
    pub physical_ns: u64,
    pub logical: u64,
}

impl HlcTimestamp {
    /// Render as the canonical zero-padded wire form.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{:019}-{:010}", self.physical_ns, self.logical)
    }

    /// Parse the canonical wire form back into a timestamp.
    pub fn parse(s: &str) -> Option<Self> {
        let (phys, logical) = s.split_once('-')?;
        if phys.len() != 19 || logical.len() != 10 {
            return None;
        }
        Some(Self {
            physical_ns: phys.parse().ok()?,
            logical: logical.parse().ok()?,
        })
    }
}

impl std::fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl HlcClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ns() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    /// Take the next timestamp. Strictly greater than every previous
    /// reading within this process.
    pub fn next(&self) -> HlcTimestamp {
        let now = Self::now_ns();
        let mut state = self.state.lock();
        if now > state.physical_ns {
            state.physical_ns = now;
            state.logical = 0;
        } else {
            state.logical += 1;
        }
        HlcTimestamp {
            physical_ns: state.physical_ns,
            logical: state.logical,
        }
    }

    /// Advance the clock from an externally observed timestamp, so that
    /// subsequent `next()` readings sort after it.
    pub fn update(&self, observed: HlcTimestamp) {
        let mut state = self.state.lock();
        if observed.physical_ns > state.physical_ns {
            state.physical_ns = observed.physical_ns;
            state.logical = observed.logical;
        } else if observed.physical_ns == state.physical_ns && observed.logical > state.logical {
            state.logical = observed.logical;
        }
    }

    /// Convenience: next timestamp in wire form.
    pub fn next_id(&self) -> String {
        self.next().render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let clock = HlcClock::new();
        let mut prev = clock.next();
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_render_width() {
        let ts = HlcTimestamp {
            physical_ns: 1_700_000_000_000_000_000,
            logical: 42,
        };
        let s = ts.render();
        assert_eq!(s.len(), 19 + 1 + 10);
        assert_eq!(s, "1700000000000000000-0000000042");
    }

    #[test]
    fn test_render_sorts_like_values() {
        let a = HlcTimestamp { physical_ns: 5, logical: 9 }.render();
        let b = HlcTimestamp { physical_ns: 5, logical: 10 }.render();
        let c = HlcTimestamp { physical_ns: 6, logical: 0 }.render();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_parse_roundtrip() {
        let ts = HlcTimestamp {
            physical_ns: 123,
            logical: 7,
        };
        assert_eq!(HlcTimestamp::parse(&ts.render()), Some(ts));
        assert_eq!(HlcTimestamp::parse("garbage"), None);
    }

    #[test]
    fn test_update_advances() {
        let clock = HlcClock::new();
        let far_future = HlcTimestamp {
            physical_ns: u64::MAX - 10,
            logical: 3,
        };
        clock.update(far_future);
        let next = clock.next();
        assert!(next > far_future);
    }
}
