//! A set of macros for easily working with internals.

/// Defines an integer-backed wire enum which keeps values it does not know about.
///
/// The generated enum (de)serializes as its raw number, converts to and from that number, and
/// gains an `Unknown` variant holding any value not listed.
macro_rules! enum_number {
    (
        $(#[$outer:meta])*
        $vis:vis enum $Enum:ident: $Repr:ty {
            $(
                $(#[$inner:meta])*
                $Variant:ident = $value:literal,
            )*
        }
    ) => {
        $(#[$outer])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        #[non_exhaustive]
        $vis enum $Enum {
            $(
                $(#[$inner])*
                $Variant,
            )*
            /// A value which this version of the library does not know about.
            Unknown($Repr),
        }

        impl From<$Repr> for $Enum {
            fn from(value: $Repr) -> Self {
                match value {
                    $( $value => Self::$Variant, )*
                    unknown => Self::Unknown(unknown),
                }
            }
        }

        impl From<$Enum> for $Repr {
            fn from(value: $Enum) -> Self {
                match value {
                    $( $Enum::$Variant => $value, )*
                    $Enum::Unknown(unknown) => unknown,
                }
            }
        }

        impl ::serde::Serialize for $Enum {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                ::serde::Serialize::serialize(&<$Repr>::from(*self), serializer)
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $Enum {
            fn deserialize<D>(deserializer: D) -> ::std::result::Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                <$Repr as ::serde::Deserialize<'de>>::deserialize(deserializer).map(Self::from)
            }
        }
    };
}
