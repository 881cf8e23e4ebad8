use crate::error::ScriptError;

/// Steps granted to one top-level entry by default
pub const DEFAULT_ENERGY: u64 = 100_000;

/// Step budget shared by every script run within one entry
#[derive(Debug, Clone)]
pub struct Energy {
    max: u64,
    remaining: u64,
}

impl Energy {
    pub fn new(max: u64) -> Self {
        Self {
            max,
            remaining: max,
        }
    }

    pub fn consume(&mut self, amount: u64) -> Result<(), ScriptError> {
        if self.remaining < amount {
            self.remaining = 0;
            return Err(ScriptError::OutOfEnergy);
        }
        self.remaining -= amount;
        Ok(())
    }

    pub fn refill(&mut self) {
        self.remaining = self.max;
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

impl Default for Energy {
    fn default() -> Self {
        Self::new(DEFAULT_ENERGY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_and_refill() {
        let mut energy = Energy::new(3);
        assert!(energy.consume(2).is_ok());
        assert!(energy.consume(2).unwrap_err().is_out_of_energy());
        assert_eq!(energy.remaining(), 0);

        energy.refill();
        assert_eq!(energy.remaining(), 3);
    }
}
