/// Defines a string newtype that can only be constructed through a check,
/// including when deserialized.
macro_rules! validated_string {
    ($(#[$meta:meta])* $name:ident, $error:ident, $message:literal, |$value:ident| $check:expr) => {
        $(#[$meta])*
        #[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, serde::Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        #[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, thiserror::Error)]
        #[error($message)]
        pub struct $error(pub String);

        impl $name {
            pub fn new($value: String) -> Result<Self, $error> {
                if $check {
                    Ok(Self($value))
                } else {
                    Err($error($value))
                }
            }

            #[must_use]
            pub fn get(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = $error;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let inner = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::new(inner).map_err(|err| {
                    serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(&err.0),
                        &stringify!($name),
                    )
                })
            }
        }
    };
}
