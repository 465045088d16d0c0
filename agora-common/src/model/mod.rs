pub mod auth;
pub mod comment;
pub mod like;
pub mod post;
pub mod user;

use crate::{
    model::{
        auth::{InvalidAuthTokenHashError, InvalidPasswordError},
        comment::InvalidCommentContentError,
        post::InvalidPostContentError,
        user::{InvalidDisplayNameError, InvalidUserHandleError},
    },
    snowflake::{Epoch, Snowflake, SnowflakeGenerator},
    util::NonPositiveDurationError,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData, str::FromStr};
use thiserror::Error;
use time::{UtcDateTime, macros::utc_datetime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    UserHandle(#[from] InvalidUserHandleError),
    #[error(transparent)]
    DisplayName(#[from] InvalidDisplayNameError),
    #[error(transparent)]
    Password(#[from] InvalidPasswordError),
    #[error(transparent)]
    PostContent(#[from] InvalidPostContentError),
    #[error(transparent)]
    CommentContent(#[from] InvalidCommentContentError),
    #[error(transparent)]
    NonPositiveDuration(#[from] NonPositiveDurationError),
    #[error(transparent)]
    TokenHash(#[from] InvalidAuthTokenHashError),
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AgoraEpoch;
impl Epoch for AgoraEpoch {
    const EPOCH_TIME: UtcDateTime = utc_datetime!(2025-01-01 00:00);
}

pub type AgoraSnowflake = Snowflake<AgoraEpoch>;
pub type AgoraSnowflakeGenerator = SnowflakeGenerator<AgoraEpoch>;

/// A snowflake tagged with the kind of entity it identifies.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(AgoraSnowflake, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub fn new(snowflake: AgoraSnowflake) -> Self {
        Self(snowflake, PhantomData)
    }

    #[must_use]
    pub fn snowflake(self) -> AgoraSnowflake {
        self.0
    }

    /// The id as stored in a signed `BIGINT` column.
    #[must_use]
    pub fn as_db(self) -> i64 {
        self.0.get().cast_signed()
    }

    #[must_use]
    pub fn from_db(value: i64) -> Self {
        value.cast_unsigned().into()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> FromStr for Id<Marker> {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s).map(Self::from)
    }
}

impl<Marker> From<AgoraSnowflake> for Id<Marker> {
    fn from(value: AgoraSnowflake) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Id::new(AgoraSnowflake::new(value))
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.snowflake().get()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Id, user::UserMarker};

    #[test]
    fn id_db_round_trip() {
        let id: Id<UserMarker> = u64::MAX.into();
        assert_eq!(id.as_db(), -1);
        assert_eq!(Id::<UserMarker>::from_db(-1), id);
    }

    #[test]
    fn id_parses_and_serializes_as_number() {
        let id: Id<UserMarker> = "123456789".parse().unwrap();
        assert_eq!(u64::from(id), 123_456_789);
        assert_eq!(serde_json::to_string(&id).unwrap(), "123456789");
        assert!("abc".parse::<Id<UserMarker>>().is_err());
    }
}
