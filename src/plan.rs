#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

//! Pure sizing arithmetic for the exhaustion-scheduled policies.
//!
//! Each function is recomputed against the current headroom on every call,
//! so earlier over- or under-shoot corrects itself.

use crate::error::{OomError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestPlan {
    pub requests_left: u64,
    pub bytes: u64,
}

/// Size call `n` (1-based) so headroom reaches zero by call `total`.
pub fn plan_request_bound(n: u64, total: u64, headroom: u64) -> RequestPlan {
    let total = total.max(1);
    let requests_left = total.saturating_sub(n.saturating_sub(1)).max(1);
    RequestPlan {
        requests_left,
        bytes: headroom.div_ceil(requests_left).max(1),
    }
}

/// Final-call overshoot used when the limit is measured outside the process.
pub fn plan_overshoot(multiplier: u64, safety_margin: u64, headroom: u64) -> Result<u64> {
    safety_margin
        .checked_add(headroom)
        .and_then(|b| b.checked_mul(multiplier))
        .ok_or(OomError::ArithmeticOverflow("overshoot multiplier * (safety margin + headroom)"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimePlan {
    /// Virtual units charged to this call, including the call itself.
    pub units: u64,
    /// Units still outstanding before this call was charged.
    pub remaining_units: u64,
    pub bytes_per_unit: u64,
    pub bytes: u64,
    /// `virtual_applied` after this call.
    pub virtual_applied: u64,
}

pub fn total_virtual_units(duration_seconds: u64, target_rate: u64) -> Result<u64> {
    duration_seconds
        .checked_mul(target_rate)
        .map(|units| units.max(1))
        .ok_or(OomError::ArithmeticOverflow("duration * target rate"))
}

/// Catch up the virtual units expected by `elapsed_seconds`, plus one for this call.
pub fn plan_time_bound(
    elapsed_seconds: u64,
    duration_seconds: u64,
    target_rate: u64,
    virtual_applied: u64,
    headroom: u64,
) -> Result<TimePlan> {
    let total = total_virtual_units(duration_seconds, target_rate)?;
    let expected = elapsed_seconds.saturating_mul(target_rate).min(total);
    let units = expected
        .saturating_sub(virtual_applied)
        .checked_add(1)
        .ok_or(OomError::ArithmeticOverflow("virtual unit deficit"))?;
    let applied = virtual_applied
        .checked_add(units)
        .ok_or(OomError::ArithmeticOverflow("virtual units applied"))?;
    let remaining_units = total.saturating_sub(virtual_applied).max(1);
    let bytes_per_unit = headroom.div_ceil(remaining_units).max(1);
    let bytes = bytes_per_unit
        .checked_mul(units)
        .ok_or(OomError::ArithmeticOverflow("bytes per unit * units"))?;
    Ok(TimePlan {
        units,
        remaining_units,
        bytes_per_unit,
        bytes,
        virtual_applied: applied,
    })
}
