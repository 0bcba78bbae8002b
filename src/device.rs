//! Receiver device facade.
//!
//! The scan engine talks to the demodulator only through [`Frontend`]. Optional
//! controls are negotiated with [`Frontend::query_support`] instead of probing for
//! interfaces at runtime.

use crate::error::Result;

/// Controls a frontend may expose besides tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Physical layer pipe selector. Get answers the number of PLPs the
    /// demodulator advertises, Set selects the active PLP.
    PlpNumber,
}

/// Get/Set support for one [`Control`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Support {
    pub get: bool,
    pub set: bool,
}

/// Snapshot of the frontend signal statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStatus {
    pub signal_strength: i32,
    pub signal_quality: i32,
    pub signal_present: bool,
    pub signal_locked: bool,
}

impl LockStatus {
    /// A frontend counts as locked only when the carrier is present and synchronized.
    pub fn is_locked(&self) -> bool {
        self.signal_present && self.signal_locked
    }
}

/// A receiver that can be tuned and queried.
///
/// Implementations own the device exclusively. A new [`tune`](Frontend::tune)
/// invalidates any lock obtained before it.
pub trait Frontend {
    /// Tune to `frequency` (kHz) with `bandwidth` (MHz).
    ///
    /// Fails with [`Error::InvalidTuneParameters`](crate::error::Error) when
    /// either value is zero.
    fn tune(&mut self, frequency: u32, bandwidth: u32) -> Result<()>;

    /// Read the current signal statistics.
    fn lock_status(&mut self) -> Result<LockStatus>;

    /// Ask whether `control` can be read and/or written.
    fn query_support(&mut self, control: Control) -> Result<Support>;

    fn get_control(&mut self, control: Control) -> Result<i32>;

    fn set_control(&mut self, control: Control, value: i32) -> Result<()>;
}

impl<F: Frontend + ?Sized> Frontend for &mut F {
    fn tune(&mut self, frequency: u32, bandwidth: u32) -> Result<()> {
        (**self).tune(frequency, bandwidth)
    }

    fn lock_status(&mut self) -> Result<LockStatus> {
        (**self).lock_status()
    }

    fn query_support(&mut self, control: Control) -> Result<Support> {
        (**self).query_support(control)
    }

    fn get_control(&mut self, control: Control) -> Result<i32> {
        (**self).get_control(control)
    }

    fn set_control(&mut self, control: Control, value: i32) -> Result<()> {
        (**self).set_control(control, value)
    }
}

/// Reject tune requests with a zero frequency or bandwidth.
pub fn validate_tune(frequency: u32, bandwidth: u32) -> Result<()> {
    if frequency == 0 || bandwidth == 0 {
        return Err(crate::error::Error::InvalidTuneParameters {
            frequency,
            bandwidth,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_lock_status_requires_present_and_locked() {
        let mut status = LockStatus {
            signal_present: true,
            ..Default::default()
        };
        assert!(!status.is_locked());
        status.signal_locked = true;
        assert!(status.is_locked());
        status.signal_present = false;
        assert!(!status.is_locked());
    }

    #[test]
    fn test_validate_tune_rejects_zero() {
        assert!(matches!(
            validate_tune(0, 8),
            Err(Error::InvalidTuneParameters { frequency: 0, bandwidth: 8 })
        ));
        assert!(validate_tune(506_000, 0).is_err());
        assert!(validate_tune(506_000, 8).is_ok());
    }
}
