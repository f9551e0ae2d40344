/// Configuration macro for single-declaration config sections
///
/// `config_struct!` declares a section struct whose fields carry their
/// default values inline. It generates the struct (public fields), a
/// `Default` implementation built from those values, and serde support with
/// `#[serde(default)]` so that a partial TOML section fills the rest from
/// defaults.
///
/// # Example
/// ```ignore
/// config_struct! {
///     pub struct DiscoveryConfig {
///         gap_limit: u32 = 20,
///         batch_size: u32 = 10,
///     }
/// }
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}
