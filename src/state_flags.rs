// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Measurement state flags
//!
//! Two representations of measurement quality:
//! - [`MeasurementStateFlags`]: 32 fine-grained condition bits
//! - [`CompactStateFlags`]: 8-bit wire projection by category
//!
//! The projection is lossy. Converting compact flags back yields the
//! *full mask* of every category that was set, not the original bits:
//! `SUSPECT_DATA` and `FLATLINE_ALARM` both come back as the whole
//! data-quality mask.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Fine-grained measurement quality and state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeasurementStateFlags(pub u32);

impl MeasurementStateFlags {
    /// No condition set
    pub const NORMAL: Self = Self(0);
    pub const BAD_DATA: Self = Self(1 << 0);
    pub const SUSPECT_DATA: Self = Self(1 << 1);
    pub const OVER_RANGE_ERROR: Self = Self(1 << 2);
    pub const UNDER_RANGE_ERROR: Self = Self(1 << 3);
    pub const ALARM_HIGH: Self = Self(1 << 4);
    pub const ALARM_LOW: Self = Self(1 << 5);
    pub const WARNING_HIGH: Self = Self(1 << 6);
    pub const WARNING_LOW: Self = Self(1 << 7);
    pub const FLATLINE_ALARM: Self = Self(1 << 8);
    pub const COMPARISON_ALARM: Self = Self(1 << 9);
    pub const ROC_ALARM: Self = Self(1 << 10);
    pub const RECEIVED_AS_BAD: Self = Self(1 << 11);
    pub const CALCULATED_VALUE: Self = Self(1 << 12);
    pub const CALCULATION_ERROR: Self = Self(1 << 13);
    pub const CALCULATION_WARNING: Self = Self(1 << 14);
    pub const RESERVED_QUALITY_FLAG: Self = Self(1 << 15);
    pub const BAD_TIME: Self = Self(1 << 16);
    pub const SUSPECT_TIME: Self = Self(1 << 17);
    pub const LATE_TIME_ALARM: Self = Self(1 << 18);
    pub const FUTURE_TIME_ALARM: Self = Self(1 << 19);
    pub const UP_SAMPLED: Self = Self(1 << 20);
    pub const DOWN_SAMPLED: Self = Self(1 << 21);
    pub const DISCARDED_VALUE: Self = Self(1 << 22);
    pub const RESERVED_TIME_FLAG: Self = Self(1 << 23);
    pub const USER_DEFINED_FLAG_1: Self = Self(1 << 24);
    pub const USER_DEFINED_FLAG_2: Self = Self(1 << 25);
    pub const USER_DEFINED_FLAG_3: Self = Self(1 << 26);
    pub const USER_DEFINED_FLAG_4: Self = Self(1 << 27);
    pub const USER_DEFINED_FLAG_5: Self = Self(1 << 28);
    pub const SYSTEM_ERROR: Self = Self(1 << 29);
    pub const SYSTEM_WARNING: Self = Self(1 << 30);
    pub const MEASUREMENT_ERROR: Self = Self(1 << 31);

    /// Range and alarm-limit conditions
    pub const DATA_RANGE_MASK: Self = Self(
        Self::OVER_RANGE_ERROR.0
            | Self::UNDER_RANGE_ERROR.0
            | Self::ALARM_HIGH.0
            | Self::ALARM_LOW.0
            | Self::WARNING_HIGH.0
            | Self::WARNING_LOW.0,
    );

    /// Value quality conditions
    pub const DATA_QUALITY_MASK: Self = Self(
        Self::BAD_DATA.0
            | Self::SUSPECT_DATA.0
            | Self::FLATLINE_ALARM.0
            | Self::COMPARISON_ALARM.0
            | Self::ROC_ALARM.0
            | Self::RECEIVED_AS_BAD.0
            | Self::CALCULATION_ERROR.0
            | Self::CALCULATION_WARNING.0
            | Self::RESERVED_QUALITY_FLAG.0,
    );

    /// Timestamp quality conditions
    pub const TIME_QUALITY_MASK: Self = Self(
        Self::BAD_TIME.0
            | Self::SUSPECT_TIME.0
            | Self::LATE_TIME_ALARM.0
            | Self::FUTURE_TIME_ALARM.0
            | Self::UP_SAMPLED.0
            | Self::DOWN_SAMPLED.0
            | Self::RESERVED_TIME_FLAG.0,
    );

    /// System-level conditions
    pub const SYSTEM_ISSUE_MASK: Self =
        Self(Self::SYSTEM_ERROR.0 | Self::SYSTEM_WARNING.0 | Self::MEASUREMENT_ERROR.0);

    /// Calculated-value marker
    pub const CALCULATED_VALUE_MASK: Self = Self::CALCULATED_VALUE;

    /// Discarded-value marker
    pub const DISCARDED_VALUE_MASK: Self = Self::DISCARDED_VALUE;

    /// Raw bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check if all bits of `other` are set
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if any bit of `other` is set
    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Check if no condition is set
    pub fn is_normal(&self) -> bool {
        self.0 == 0
    }

    /// Project onto compact category flags
    pub fn to_compact(self) -> CompactStateFlags {
        let mut compact = CompactStateFlags::NONE;
        for (full, category) in CATEGORY_MAP {
            if self.intersects(full) {
                compact |= category;
            }
        }
        compact
    }
}

impl BitOr for MeasurementStateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MeasurementStateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for MeasurementStateFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for MeasurementStateFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for MeasurementStateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Eight-bit wire projection of measurement state
///
/// The low six bits are categories; the high two bits belong to the
/// compact codec's time field and carry no measurement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompactStateFlags(pub u8);

impl CompactStateFlags {
    pub const NONE: Self = Self(0);
    pub const DATA_RANGE: Self = Self(0x01);
    pub const DATA_QUALITY: Self = Self(0x02);
    pub const TIME_QUALITY: Self = Self(0x04);
    pub const SYSTEM_ISSUE: Self = Self(0x08);
    pub const CALCULATED_VALUE: Self = Self(0x10);
    pub const DISCARDED_VALUE: Self = Self(0x20);
    /// Time field is an offset from a base time
    pub const BASE_TIME_OFFSET: Self = Self(0x40);
    /// Base time slot 1 is active
    pub const TIME_INDEX: Self = Self(0x80);

    /// All category bits
    pub const CATEGORY_MASK: Self = Self(0x3F);

    /// Raw bits
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Check if all bits of `other` are set
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Category bits only
    pub fn categories(self) -> Self {
        Self(self.0 & Self::CATEGORY_MASK.0)
    }

    /// Expand categories back to full state flags
    ///
    /// Each set category yields its entire mask. Time-field bits are
    /// ignored.
    pub fn to_full(self) -> MeasurementStateFlags {
        let mut full = MeasurementStateFlags::NORMAL;
        for (mask, category) in CATEGORY_MAP {
            if self.contains(category) {
                full |= mask;
            }
        }
        full
    }
}

impl BitOr for CompactStateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CompactStateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<MeasurementStateFlags> for CompactStateFlags {
    fn from(flags: MeasurementStateFlags) -> Self {
        flags.to_compact()
    }
}

impl From<CompactStateFlags> for MeasurementStateFlags {
    fn from(flags: CompactStateFlags) -> Self {
        flags.to_full()
    }
}

const CATEGORY_MAP: [(MeasurementStateFlags, CompactStateFlags); 6] = [
    (
        MeasurementStateFlags::DATA_RANGE_MASK,
        CompactStateFlags::DATA_RANGE,
    ),
    (
        MeasurementStateFlags::DATA_QUALITY_MASK,
        CompactStateFlags::DATA_QUALITY,
    ),
    (
        MeasurementStateFlags::TIME_QUALITY_MASK,
        CompactStateFlags::TIME_QUALITY,
    ),
    (
        MeasurementStateFlags::SYSTEM_ISSUE_MASK,
        CompactStateFlags::SYSTEM_ISSUE,
    ),
    (
        MeasurementStateFlags::CALCULATED_VALUE_MASK,
        CompactStateFlags::CALCULATED_VALUE,
    ),
    (
        MeasurementStateFlags::DISCARDED_VALUE_MASK,
        CompactStateFlags::DISCARDED_VALUE,
    ),
];
