//=====================================================
// File: runtime/ids.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Identifier allocation for one harness instance
// Objective: Hand out prefixed, monotonically numbered ids without any
//            process-wide state
//=====================================================

/// Arena-style counter owned by a single harness; two harnesses never share one.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    counter: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `"{prefix}:{n}"` with `n` strictly increasing across all prefixes.
    pub fn next(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}:{}", prefix, self.counter)
    }

    pub fn issued(&self) -> u64 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_share_one_counter() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next("h"), "h:1");
        assert_eq!(ids.next("tm"), "tm:2");
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn generators_are_independent() {
        let mut a = IdGenerator::new();
        let mut b = IdGenerator::new();
        a.next("x");
        assert_eq!(b.next("x"), "x:1");
    }
}
