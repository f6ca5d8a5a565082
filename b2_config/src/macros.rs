/// Declares a group of configuration values backed by environment variables.
///
/// ```rust
/// mod transfer {
///     b2_config::config_group!({
///         ref part_count: usize = 4;
///         ref label: String = "default".to_string();
///     });
/// }
///
/// let values = transfer::ConfigValueGroup::from_env();
/// assert_eq!(values.part_count, 4);
/// assert_eq!(transfer::ConfigValueGroup::env_var_name("part_count"), "B2_TRANSFER_PART_COUNT");
/// ```
///
/// The group is named after the last segment of the module path the macro is invoked in. Each
/// field `f` of group `g` is read from `B2_<G>_<F>`, upper-cased.
#[macro_export]
macro_rules! config_group {
    ({
        $(
            $(#[$meta:meta])*
            ref $name:ident : $type:ty = $value:expr;
        )+
    }) => {
        #[derive(Debug, Clone)]
        pub struct ConfigValueGroup {
            $(
                $(#[$meta])*
                #[allow(non_snake_case)]
                pub $name: $type,
            )+
        }

        impl Default for ConfigValueGroup {
            fn default() -> Self {
                Self {
                    $( $name: $value, )+
                }
            }
        }

        impl ConfigValueGroup {
            /// Declared defaults, ignoring the environment.
            pub fn new() -> Self {
                Self::default()
            }

            /// Declared defaults with environment overrides applied.
            pub fn from_env() -> Self {
                let mut group = Self::default();
                group.apply_env_overrides();
                group
            }

            pub fn env_var_name(field: &str) -> String {
                let group = module_path!().rsplit("::").next().unwrap_or("unknown");
                format!("B2_{}_{}", group, field).to_uppercase()
            }

            /// Overrides every field whose variable is set. Fields without one keep their
            /// current value, so values set in code survive.
            pub fn apply_env_overrides(&mut self) {
                $(
                    let var = Self::env_var_name(stringify!($name));
                    let raw = std::env::var(&var).ok();
                    let current = self.$name.clone();
                    self.$name = <$type as $crate::ParsableConfigValue>::resolve(&var, raw, current);
                )+
            }
        }
    };
}
