//! Module for working with snowflake IDs.
//!
//! Layout, from the most significant bit: 42 bits of milliseconds since the
//! epoch, 5 bits of worker id, 5 bits of process id, 12 bits of increment.
//! Ordering snowflakes numerically therefore orders them by creation time.

use derive_where::derive_where;
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{Error, Unexpected},
};
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
};
use thiserror::Error;
use time::UtcDateTime;

pub const TIMESTAMP_OFFSET: u64 = 22;
pub const TIMESTAMP_LENGTH: u64 = 42;

pub const WORKER_ID_OFFSET: u64 = 17;
pub const WORKER_ID_LENGTH: u64 = 5;

pub const PROCESS_ID_OFFSET: u64 = 12;
pub const PROCESS_ID_LENGTH: u64 = 5;

pub const INCREMENT_OFFSET: u64 = 0;
pub const INCREMENT_LENGTH: u64 = 12;

const fn mask(length: u64) -> u64 {
    (1 << length) - 1
}

pub trait Epoch {
    const EPOCH_TIME: UtcDateTime;
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum SnowflakeTimestampError {
    #[error("Specified time was before the snowflake epoch.")]
    TimeBeforeEpoch,
    #[error("Resulting timestamp uses too many bits.")]
    TimestampTooLarge,
}

macro_rules! snowflake_part {
    ($(#[$meta:meta])* $name:ident: $repr:ty, len = $length:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            #[must_use]
            pub fn new(id: $repr) -> Option<Self> {
                (u64::from(id) <= mask($length)).then_some(Self(id))
            }

            #[must_use]
            pub fn new_unchecked(id: $repr) -> Self {
                Self::new(id).expect(concat!(stringify!($name), " out of range."))
            }

            #[must_use]
            pub fn get(self) -> $repr {
                self.0
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let inner = <$repr>::deserialize(deserializer)?;
                Self::new(inner).ok_or_else(|| {
                    Error::invalid_value(Unexpected::Unsigned(inner.into()), &stringify!($name))
                })
            }
        }
    };
}

snowflake_part!(
    /// Identifies the machine generating snowflakes.
    WorkerId: u8, len = WORKER_ID_LENGTH
);
snowflake_part!(
    /// Identifies the process on a worker generating snowflakes.
    ProcessId: u8, len = PROCESS_ID_LENGTH
);
snowflake_part!(SnowflakeIncrement: u16, len = INCREMENT_LENGTH);

impl SnowflakeIncrement {
    /// `None` once the increments of a millisecond are used up.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }
}

/// Milliseconds since `SnowflakeEpoch::EPOCH_TIME`.
#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct SnowflakeTimestamp<SnowflakeEpoch>(u64, PhantomData<SnowflakeEpoch>);

impl<SnowflakeEpoch> SnowflakeTimestamp<SnowflakeEpoch> {
    #[must_use]
    pub fn new(millis: u64) -> Option<Self> {
        (millis <= mask(TIMESTAMP_LENGTH)).then_some(Self(millis, PhantomData))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// The following millisecond, if it still fits.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::new(self.0 + 1)
    }
}

impl<SnowflakeEpoch: Epoch> TryFrom<UtcDateTime> for SnowflakeTimestamp<SnowflakeEpoch> {
    type Error = SnowflakeTimestampError;

    fn try_from(value: UtcDateTime) -> Result<Self, Self::Error> {
        let millis = (value - SnowflakeEpoch::EPOCH_TIME).whole_milliseconds();
        let millis = u64::try_from(millis).map_err(|_| Self::Error::TimeBeforeEpoch)?;
        Self::new(millis).ok_or(Self::Error::TimestampTooLarge)
    }
}

impl<SnowflakeEpoch: Epoch> From<SnowflakeTimestamp<SnowflakeEpoch>> for UtcDateTime {
    fn from(value: SnowflakeTimestamp<SnowflakeEpoch>) -> Self {
        // At most 42 bits, so the conversion to i64 is lossless.
        SnowflakeEpoch::EPOCH_TIME + time::Duration::milliseconds(value.0.cast_signed())
    }
}

#[derive_where(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct Snowflake<SnowflakeEpoch>(u64, PhantomData<SnowflakeEpoch>);

impl<SnowflakeEpoch> Snowflake<SnowflakeEpoch> {
    #[must_use]
    pub fn new(inner: u64) -> Self {
        Self(inner, PhantomData)
    }

    #[must_use]
    pub fn from_parts(
        timestamp: SnowflakeTimestamp<SnowflakeEpoch>,
        worker_id: WorkerId,
        process_id: ProcessId,
        increment: SnowflakeIncrement,
    ) -> Self {
        let snowflake = timestamp.get() << TIMESTAMP_OFFSET
            | u64::from(worker_id.get()) << WORKER_ID_OFFSET
            | u64::from(process_id.get()) << PROCESS_ID_OFFSET
            | u64::from(increment.get()) << INCREMENT_OFFSET;

        Self::new(snowflake)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn timestamp(self) -> SnowflakeTimestamp<SnowflakeEpoch> {
        SnowflakeTimestamp(self.0 >> TIMESTAMP_OFFSET & mask(TIMESTAMP_LENGTH), PhantomData)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn worker_id(self) -> WorkerId {
        WorkerId((self.0 >> WORKER_ID_OFFSET & mask(WORKER_ID_LENGTH)) as u8)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn process_id(self) -> ProcessId {
        ProcessId((self.0 >> PROCESS_ID_OFFSET & mask(PROCESS_ID_LENGTH)) as u8)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn increment(self) -> SnowflakeIncrement {
        SnowflakeIncrement((self.0 >> INCREMENT_OFFSET & mask(INCREMENT_LENGTH)) as u16)
    }
}

impl<SnowflakeEpoch> Display for Snowflake<SnowflakeEpoch> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<SnowflakeEpoch> Serialize for Snowflake<SnowflakeEpoch> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de, SnowflakeEpoch> Deserialize<'de> for Snowflake<SnowflakeEpoch> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self::new)
    }
}

/// Hands out strictly increasing snowflakes for one worker/process pair.
///
/// The increment restarts at zero every millisecond. When the 4096 increments
/// of a millisecond are used up, or the clock moves backwards, generation
/// continues from the last issued timestamp and moves on to the following
/// millisecond, so a snowflake may carry a timestamp slightly ahead of the
/// clock until the clock catches up.
#[derive_where(Clone, Eq, PartialEq, Debug, Hash)]
pub struct SnowflakeGenerator<SnowflakeEpoch> {
    worker_id: WorkerId,
    process_id: ProcessId,
    last_issued: Option<(SnowflakeTimestamp<SnowflakeEpoch>, SnowflakeIncrement)>,
}

impl<SnowflakeEpoch: Epoch> SnowflakeGenerator<SnowflakeEpoch> {
    #[must_use]
    pub fn new(worker_id: WorkerId, process_id: ProcessId) -> Self {
        Self {
            worker_id,
            process_id,
            last_issued: None,
        }
    }

    pub fn generate_at(
        &mut self,
        time: UtcDateTime,
    ) -> Result<Snowflake<SnowflakeEpoch>, SnowflakeTimestampError> {
        let now = SnowflakeTimestamp::try_from(time)?;

        let (timestamp, increment) = match self.last_issued {
            Some((last_timestamp, last_increment)) if now <= last_timestamp => {
                match last_increment.next() {
                    Some(increment) => (last_timestamp, increment),
                    None => (
                        last_timestamp
                            .next()
                            .ok_or(SnowflakeTimestampError::TimestampTooLarge)?,
                        SnowflakeIncrement::default(),
                    ),
                }
            }
            _ => (now, SnowflakeIncrement::default()),
        };
        self.last_issued = Some((timestamp, increment));

        Ok(Snowflake::from_parts(
            timestamp,
            self.worker_id,
            self.process_id,
            increment,
        ))
    }

    pub fn generate(&mut self) -> Result<Snowflake<SnowflakeEpoch>, SnowflakeTimestampError> {
        self.generate_at(UtcDateTime::now())
    }
}

#[cfg(test)]
mod tests {
    use crate::snowflake::{
        Epoch, ProcessId, Snowflake, SnowflakeGenerator, SnowflakeIncrement, SnowflakeTimestamp,
        SnowflakeTimestampError, WorkerId,
    };
    use time::{Duration, UtcDateTime, macros::utc_datetime};

    struct MillennialEpoch;
    impl Epoch for MillennialEpoch {
        const EPOCH_TIME: UtcDateTime = utc_datetime!(2000-1-1 00:00);
    }

    #[test]
    fn part_ranges() {
        assert!(WorkerId::new(0x1F).is_some());
        assert!(WorkerId::new(0x20).is_none());
        assert!(ProcessId::new(0).is_some());
        assert!(ProcessId::new(u8::MAX).is_none());
        assert!(SnowflakeIncrement::new(0xFFF).is_some());
        assert!(SnowflakeIncrement::new(0x1000).is_none());
        assert!(SnowflakeTimestamp::<MillennialEpoch>::new(0x03FF_FFFF_FFFF).is_some());
        assert!(SnowflakeTimestamp::<MillennialEpoch>::new(0x0400_0000_0000).is_none());
    }

    #[test]
    fn timestamp_conversion() {
        let date_time = utc_datetime!(2025-10-24 10:00);
        let timestamp = SnowflakeTimestamp::<MillennialEpoch>::try_from(date_time).unwrap();
        assert_eq!(UtcDateTime::from(timestamp), date_time);

        assert_eq!(
            SnowflakeTimestamp::<MillennialEpoch>::try_from(
                MillennialEpoch::EPOCH_TIME - Duration::milliseconds(1)
            ),
            Err(SnowflakeTimestampError::TimeBeforeEpoch)
        );
        assert_eq!(
            SnowflakeTimestamp::<MillennialEpoch>::try_from(
                MillennialEpoch::EPOCH_TIME + Duration::milliseconds(0x0400_0000_0000)
            ),
            Err(SnowflakeTimestampError::TimestampTooLarge)
        );
    }

    #[test]
    fn increment_runs_out() {
        assert_eq!(
            SnowflakeIncrement::new_unchecked(100).next(),
            Some(SnowflakeIncrement::new_unchecked(101))
        );
        assert_eq!(SnowflakeIncrement::new_unchecked(0xFFF).next(), None);
    }

    #[test]
    fn parts_round_trip() {
        let timestamp =
            SnowflakeTimestamp::try_from(utc_datetime!(2025-10-24 10:30)).unwrap();
        let worker_id = WorkerId::new_unchecked(0b10101);
        let process_id = ProcessId::new_unchecked(0b10001);
        let increment = SnowflakeIncrement::new_unchecked(100);

        let snowflake =
            Snowflake::<MillennialEpoch>::from_parts(timestamp, worker_id, process_id, increment);

        assert_eq!(snowflake.timestamp(), timestamp);
        assert_eq!(snowflake.worker_id(), worker_id);
        assert_eq!(snowflake.process_id(), process_id);
        assert_eq!(snowflake.increment(), increment);
    }

    #[test]
    fn generated_snowflakes_increase() {
        let mut generator = SnowflakeGenerator::<MillennialEpoch>::new(
            WorkerId::new_unchecked(10),
            ProcessId::new_unchecked(0),
        );
        let time = utc_datetime!(2025-10-24 10:55);

        let first = generator.generate_at(time).unwrap();
        let second = generator.generate_at(time).unwrap();
        let later = generator.generate_at(time + Duration::milliseconds(1)).unwrap();

        assert!(first < second);
        assert!(second < later);
        assert_eq!(second.increment(), SnowflakeIncrement::new_unchecked(1));
        assert_eq!(later.increment(), SnowflakeIncrement::default());
    }

    #[test]
    fn full_millisecond_moves_to_the_next() {
        let mut generator = SnowflakeGenerator::<MillennialEpoch>::new(
            WorkerId::new_unchecked(3),
            ProcessId::new_unchecked(1),
        );
        let time = utc_datetime!(2025-10-24 11:00);
        let timestamp = SnowflakeTimestamp::<MillennialEpoch>::try_from(time).unwrap();

        let mut previous = generator.generate_at(time).unwrap();
        for _ in 0..0xFFF {
            let snowflake = generator.generate_at(time).unwrap();
            assert!(previous < snowflake);
            previous = snowflake;
        }
        assert_eq!(previous.timestamp(), timestamp);
        assert_eq!(previous.increment(), SnowflakeIncrement::new_unchecked(0xFFF));

        let overflow = generator.generate_at(time).unwrap();
        assert!(previous < overflow);
        assert_eq!(overflow.timestamp(), timestamp.next().unwrap());
        assert_eq!(overflow.increment(), SnowflakeIncrement::default());

        let caught_up = generator
            .generate_at(time + Duration::milliseconds(1))
            .unwrap();
        assert!(overflow < caught_up);
        assert_eq!(caught_up.increment(), SnowflakeIncrement::new_unchecked(1));
    }

    #[test]
    fn clock_going_backwards_keeps_order() {
        let mut generator = SnowflakeGenerator::<MillennialEpoch>::new(
            WorkerId::new_unchecked(0),
            ProcessId::new_unchecked(0),
        );
        let time = utc_datetime!(2025-10-24 12:00);

        let first = generator.generate_at(time).unwrap();
        let earlier = generator
            .generate_at(time - Duration::milliseconds(5))
            .unwrap();

        assert!(first < earlier);
        assert_eq!(earlier.timestamp(), first.timestamp());
    }
}
