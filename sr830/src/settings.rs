//! Enumerated front-end settings.
//!
//! Time constant and sensitivity are closed sets on this instrument: every
//! legal value has a fixed wire code. Modeling them as enums rejects an
//! out-of-range code before anything reaches the bus.

use crate::lockin::Sr830Error;

/// Output filter time constant (`OFLT`), wire codes 0-19.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::EnumIter, strum::Display)]
#[repr(u8)]
pub enum TimeConstant {
    #[strum(to_string = "10 us")]
    T10us = 0,
    #[strum(to_string = "30 us")]
    T30us = 1,
    #[strum(to_string = "100 us")]
    T100us = 2,
    #[strum(to_string = "300 us")]
    T300us = 3,
    #[strum(to_string = "1 ms")]
    T1ms = 4,
    #[strum(to_string = "3 ms")]
    T3ms = 5,
    #[strum(to_string = "10 ms")]
    T10ms = 6,
    #[strum(to_string = "30 ms")]
    T30ms = 7,
    #[strum(to_string = "100 ms")]
    T100ms = 8,
    #[strum(to_string = "300 ms")]
    T300ms = 9,
    #[strum(to_string = "1 s")]
    T1s = 10,
    #[strum(to_string = "3 s")]
    T3s = 11,
    #[strum(to_string = "10 s")]
    T10s = 12,
    #[strum(to_string = "30 s")]
    T30s = 13,
    #[strum(to_string = "100 s")]
    T100s = 14,
    #[strum(to_string = "300 s")]
    T300s = 15,
    #[strum(to_string = "1 ks")]
    T1ks = 16,
    #[strum(to_string = "3 ks")]
    T3ks = 17,
    #[strum(to_string = "10 ks")]
    T10ks = 18,
    #[strum(to_string = "30 ks")]
    T30ks = 19,
}

impl TimeConstant {
    /// Wire code of this setting.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a wire code, rejecting values outside the instrument's set.
    pub fn from_code(code: u8) -> Result<Self, Sr830Error> {
        Self::from_repr(code).ok_or(Sr830Error::InvalidParameter { setting: "time constant", code })
    }
}

/// Full-scale sensitivity (`SENS`), wire codes 0-26.
///
/// Values are volts for voltage inputs; for current inputs the same codes
/// span 2 fA to 1 uA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr, strum::EnumIter, strum::Display)]
#[repr(u8)]
pub enum Sensitivity {
    #[strum(to_string = "2 nV")]
    S2nV = 0,
    #[strum(to_string = "5 nV")]
    S5nV = 1,
    #[strum(to_string = "10 nV")]
    S10nV = 2,
    #[strum(to_string = "20 nV")]
    S20nV = 3,
    #[strum(to_string = "50 nV")]
    S50nV = 4,
    #[strum(to_string = "100 nV")]
    S100nV = 5,
    #[strum(to_string = "200 nV")]
    S200nV = 6,
    #[strum(to_string = "500 nV")]
    S500nV = 7,
    #[strum(to_string = "1 uV")]
    S1uV = 8,
    #[strum(to_string = "2 uV")]
    S2uV = 9,
    #[strum(to_string = "5 uV")]
    S5uV = 10,
    #[strum(to_string = "10 uV")]
    S10uV = 11,
    #[strum(to_string = "20 uV")]
    S20uV = 12,
    #[strum(to_string = "50 uV")]
    S50uV = 13,
    #[strum(to_string = "100 uV")]
    S100uV = 14,
    #[strum(to_string = "200 uV")]
    S200uV = 15,
    #[strum(to_string = "500 uV")]
    S500uV = 16,
    #[strum(to_string = "1 mV")]
    S1mV = 17,
    #[strum(to_string = "2 mV")]
    S2mV = 18,
    #[strum(to_string = "5 mV")]
    S5mV = 19,
    #[strum(to_string = "10 mV")]
    S10mV = 20,
    #[strum(to_string = "20 mV")]
    S20mV = 21,
    #[strum(to_string = "50 mV")]
    S50mV = 22,
    #[strum(to_string = "100 mV")]
    S100mV = 23,
    #[strum(to_string = "200 mV")]
    S200mV = 24,
    #[strum(to_string = "500 mV")]
    S500mV = 25,
    #[strum(to_string = "1 V")]
    S1V = 26,
}

impl Sensitivity {
    /// Wire code of this setting.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a wire code, rejecting values outside the instrument's set.
    pub fn from_code(code: u8) -> Result<Self, Sr830Error> {
        Self::from_repr(code).ok_or(Sr830Error::InvalidParameter { setting: "sensitivity", code })
    }
}
