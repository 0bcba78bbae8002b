//! PLP selector capability negotiation.

use log::{debug, info, warn};

use crate::device::{Control, Frontend};

/// Whether the frontend lets us read the PLP count and select a PLP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlpCapability {
    pub can_get: bool,
    pub can_set: bool,
}

/// Query PLP selector support once. Any failure counts as "not supported" in
/// both directions, which reduces the scan to a single pass.
pub fn probe<F: Frontend + ?Sized>(frontend: &mut F) -> PlpCapability {
    match frontend.query_support(Control::PlpNumber) {
        Ok(support) => {
            debug!("PLP selector support: get={}, set={}", support.get, support.set);
            PlpCapability {
                can_get: support.get,
                can_set: support.set,
            }
        }
        Err(e) => {
            warn!("PLP support query failed, assuming unsupported: {e}");
            PlpCapability::default()
        }
    }
}

/// Number of PLP indices worth trying.
///
/// Drivers are known to misreport the count, so a failed read or a value
/// that is not positive falls back to `default_max`.
pub fn max_plp_count<F: Frontend + ?Sized>(
    frontend: &mut F,
    capability: PlpCapability,
    default_max: u32,
) -> u32 {
    if !capability.can_get {
        return default_max;
    }
    match frontend.get_control(Control::PlpNumber) {
        Ok(count) if count > 0 => {
            info!("Device reports {count} PLPs");
            count as u32
        }
        Ok(count) => {
            warn!("Device reported {count} PLPs, using {default_max}");
            default_max
        }
        Err(e) => {
            warn!("Failed to read PLP count, using {default_max}: {e}");
            default_max
        }
    }
}
