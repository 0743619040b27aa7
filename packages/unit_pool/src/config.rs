use std::num::NonZero;

use crate::DEFAULT_UNITS_PER_BLOCK;

/// Construction parameters for a per-type pool.
///
/// The unit layout of a per-type pool is always the layout of its element type, so only the
/// block size and guarding are configurable.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use unit_pool::PoolConfig;
///
/// let config = PoolConfig::new()
///     .units_per_block(nz!(128))
///     .guarded(true);
///
/// assert_eq!(config.get_units_per_block().get(), 128);
/// assert!(config.is_guarded());
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub struct PoolConfig {
    units_per_block: NonZero<usize>,
    guarded: bool,
}

impl PoolConfig {
    /// Creates the default configuration: [`DEFAULT_UNITS_PER_BLOCK`] units per block, no guards.
    pub const fn new() -> Self {
        Self {
            units_per_block: DEFAULT_UNITS_PER_BLOCK,
            guarded: false,
        }
    }

    /// Sets how many units each block holds.
    pub const fn units_per_block(mut self, units_per_block: NonZero<usize>) -> Self {
        self.units_per_block = units_per_block;
        self
    }

    /// Enables or disables guard sentinels around every unit.
    pub const fn guarded(mut self, guarded: bool) -> Self {
        self.guarded = guarded;
        self
    }

    /// How many units each block holds.
    #[must_use]
    pub const fn get_units_per_block(&self) -> NonZero<usize> {
        self.units_per_block
    }

    /// Whether units are wrapped in guard sentinels.
    #[must_use]
    pub const fn is_guarded(&self) -> bool {
        self.guarded
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn default_is_sixteen_unguarded() {
        let config = PoolConfig::default();

        assert_eq!(config.get_units_per_block().get(), 16);
        assert!(!config.is_guarded());
        assert_eq!(config, PoolConfig::new());
    }

    #[test]
    fn setters_apply() {
        let config = PoolConfig::new()
            .guarded(true)
            .units_per_block(nz!(2));

        assert!(config.is_guarded());
        assert_eq!(config.get_units_per_block().get(), 2);
    }
}
