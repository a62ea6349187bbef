use core::fmt;

use picky_asn1::date::{Date, GeneralizedTime};
use picky_krb::data_types::KerberosTime as Asn1KerberosTime;
use time::{Month, OffsetDateTime, PrimitiveDateTime};

use crate::{invalid_field_err, PduResult};

/// Kerberos timestamp with one second resolution, stored as seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct KerberosTime(pub i64);

impl KerberosTime {
    pub const EPOCH: Self = Self(0);

    /// 2038-01-19T03:14:07Z, used whenever a requested lifetime is unbounded.
    pub const MAX: Self = Self(0x7FFF_FFFF);

    pub fn now() -> (Self, u32) {
        let now = OffsetDateTime::now_utc();
        (Self(now.unix_timestamp()), now.microsecond())
    }

    pub fn seconds(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn saturating_add(self, seconds: i64) -> Self {
        Self(self.0.saturating_add(seconds))
    }

    /// Absolute difference in seconds.
    pub fn abs_diff(self, other: Self) -> u64 {
        self.0.abs_diff(other.0)
    }

    pub fn to_asn1(self) -> PduResult<Asn1KerberosTime> {
        let datetime = OffsetDateTime::from_unix_timestamp(self.0)
            .map_err(|_| invalid_field_err!("KerberosTime", "time", "out of range"))?;

        let year = u16::try_from(datetime.year())
            .map_err(|_| invalid_field_err!("KerberosTime", "year", "negative year"))?;

        let date: GeneralizedTime = Date::new(
            year,
            u8::from(datetime.month()),
            datetime.day(),
            datetime.hour(),
            datetime.minute(),
            datetime.second(),
        )
        .ok_or_else(|| invalid_field_err!("KerberosTime", "time", "not representable as GeneralizedTime"))?;

        Ok(Asn1KerberosTime::from(date))
    }

    pub fn from_asn1(value: &Asn1KerberosTime) -> PduResult<Self> {
        let date = &value.0;

        let month = Month::try_from(date.month()).map_err(|_| invalid_field_err!("KerberosTime", "month", "out of range"))?;

        let calendar_date = time::Date::from_calendar_date(i32::from(date.year()), month, date.day())
            .map_err(|_| invalid_field_err!("KerberosTime", "day", "out of range"))?;

        let time_of_day = time::Time::from_hms(date.hour(), date.minute(), date.second())
            .map_err(|_| invalid_field_err!("KerberosTime", "time", "out of range"))?;

        let datetime = PrimitiveDateTime::new(calendar_date, time_of_day).assume_utc();

        Ok(Self(datetime.unix_timestamp()))
    }
}

impl fmt::Display for KerberosTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match OffsetDateTime::from_unix_timestamp(self.0) {
            Ok(t) => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
                t.year(),
                u8::from(t.month()),
                t.day(),
                t.hour(),
                t.minute(),
                t.second()
            ),
            Err(_) => write!(f, "@{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_time_renders_as_2038() {
        assert_eq!(KerberosTime::MAX.to_string(), "2038-01-19T03:14:07Z");
    }

    #[test]
    fn asn1_conversion_keeps_seconds() {
        let t = KerberosTime(1_700_000_123);
        let asn1 = t.to_asn1().unwrap();
        assert_eq!(KerberosTime::from_asn1(&asn1).unwrap(), t);
    }
}
