//! Shared (de)serialization for proto enums
//!
//! Enums are written as their short names (`SERVER`, `IN_PROGRESS`) and read
//! back from the short name, the fully prefixed proto name
//! (`SPAN_KIND_SERVER`), or the numeric value.

use serde::{de, Deserialize, Deserializer};

pub trait WireEnum: Sized + Copy {
    /// Proto name prefix accepted on input, e.g. `SPAN_KIND_`
    const PREFIX: &'static str;
    /// Enum name used in error messages
    const NAME: &'static str;

    fn as_str(&self) -> &'static str;
    fn as_i32(&self) -> i32;
    fn from_i32(v: i32) -> Option<Self>;
    fn from_name(name: &str) -> Option<Self>;

    fn parse(input: &str) -> Option<Self> {
        let upper = input.trim().to_ascii_uppercase();
        Self::from_name(&upper).or_else(|| {
            upper
                .strip_prefix(Self::PREFIX)
                .and_then(Self::from_name)
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameOrNumber {
    Name(String),
    Number(i32),
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: WireEnum,
{
    match NameOrNumber::deserialize(deserializer)? {
        NameOrNumber::Name(name) => T::parse(&name)
            .ok_or_else(|| de::Error::custom(format!("unknown {} '{}'", T::NAME, name))),
        NameOrNumber::Number(v) => T::from_i32(v)
            .ok_or_else(|| de::Error::custom(format!("unknown {} value {}", T::NAME, v))),
    }
}

/// Implements `Serialize`/`Deserialize` for a `WireEnum` type
macro_rules! wire_enum_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str($crate::data::wire_enum::WireEnum::as_str(self))
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                $crate::data::wire_enum::deserialize(deserializer)
            }
        }
    };
}

pub(crate) use wire_enum_serde;
