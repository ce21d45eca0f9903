//! Macros for ergonomic machine construction.

/// Generate an event enum whose variants map to consecutive [`EventId`]s.
///
/// The generated enum gets a `COUNT` constant (the number of event slots a
/// tree needs), an `ALL` slice in declaration order, a `name()` accessor and
/// a conversion into [`EventId`], so it can be passed straight to
/// `StateMachine::send`.
///
/// [`EventId`]: crate::core::EventId
///
/// # Example
///
/// ```
/// use hierarch::core::EventId;
/// use hierarch::event_enum;
///
/// event_enum! {
///     pub enum Light {
///         TurnOn,
///         TurnOff,
///         Timer,
///     }
/// }
///
/// assert_eq!(Light::COUNT, 3);
/// assert_eq!(EventId::from(Light::Timer), EventId::new(2));
/// assert_eq!(Light::TurnOff.name(), "TurnOff");
/// ```
#[macro_export]
macro_rules! event_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),*
        }

        impl $name {
            pub const COUNT: usize = [$(stringify!($variant)),*].len();

            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant)),*
                }
            }

            pub fn id(self) -> $crate::core::EventId {
                $crate::core::EventId::new(self as usize)
            }
        }

        impl From<$name> for $crate::core::EventId {
            fn from(event: $name) -> Self {
                event.id()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::core::EventId;

    event_enum! {
        enum Door {
            Open,
            Close,
            Lock,
        }
    }

    #[test]
    fn event_enum_numbers_variants_in_order() {
        assert_eq!(Door::COUNT, 3);
        assert_eq!(Door::Open.id(), EventId::new(0));
        assert_eq!(EventId::from(Door::Lock), EventId::new(2));
    }

    #[test]
    fn event_enum_lists_all_variants() {
        let names: Vec<_> = Door::ALL.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["Open", "Close", "Lock"]);
    }

    #[test]
    fn event_enum_serializes_by_name() {
        let json = serde_json::to_string(&Door::Close).unwrap();
        assert_eq!(json, "\"Close\"");
    }
}
