//! Export and Entry Point Macros
//!
//! These macros wrap the `inventory::submit!` boilerplate. Exports make a
//! callable resolvable under its reference; entry points make the host
//! discover that reference without it being configured.
//!
//! The reference of an exported function is built from `module_path!()`, so
//! a function `register` in module `my_ext::routes` is exported as
//! `my_ext::routes:register`.
//!
//! # Example
//!
//! ```ignore
//! use extension_host::plugin::prelude::*;
//! use extension_host::{declare_entry_point, export_extension};
//!
//! fn register(handle: &mut PluginHandle) -> Result<(), BoxError> {
//!     handle.mount("/my-ext", Router::new().route("/health", get(health)))?;
//!     Ok(())
//! }
//!
//! export_extension!(register, compatible = ">=1.0.0, <2.0.0");
//! declare_entry_point!(server_extensions, "my-ext", register);
//! ```

/// Reference under which `export_*!` publishes `$func` from the calling module
#[macro_export]
macro_rules! plugin_reference {
    ($func:ident) => {
        concat!(module_path!(), ":", stringify!($func))
    };
}

/// Export an extension registration callable.
///
/// `$func` must have the signature
/// `fn(&mut PluginHandle) -> Result<(), BoxError>`. The optional
/// `compatible` range is checked against the host API version before the
/// callable is invoked; exports without one are rejected at load time.
///
/// # Example
///
/// ```ignore
/// export_extension!(register, compatible = "^1");
/// ```
#[macro_export]
macro_rules! export_extension {
    ($func:ident, compatible = $range:expr) => {
        $crate::inventory::submit! {
            $crate::plugin::catalog::PluginExport::extension(
                $crate::plugin_reference!($func),
                ::core::option::Option::Some($range),
                $func,
            )
        }
    };
    ($func:ident) => {
        $crate::inventory::submit! {
            $crate::plugin::catalog::PluginExport::extension(
                $crate::plugin_reference!($func),
                ::core::option::Option::None,
                $func,
            )
        }
    };
}

/// Export a lifespan factory.
///
/// `$func` must have the signature
/// `fn(&PluginHandle) -> Result<Box<dyn Lifespan>, BoxError>`.
#[macro_export]
macro_rules! export_lifespan {
    ($func:ident, compatible = $range:expr) => {
        $crate::inventory::submit! {
            $crate::plugin::catalog::PluginExport::lifespan(
                $crate::plugin_reference!($func),
                ::core::option::Option::Some($range),
                $func,
            )
        }
    };
}

/// Export a component contribution.
///
/// `$func` must have the signature
/// `fn(&PluginHandle) -> Result<ComponentContribution, BoxError>`.
#[macro_export]
macro_rules! export_components {
    ($func:ident, compatible = $range:expr) => {
        $crate::inventory::submit! {
            $crate::plugin::catalog::PluginExport::components(
                $crate::plugin_reference!($func),
                ::core::option::Option::Some($range),
                $func,
            )
        }
    };
}

/// Declare an entry point so the host discovers `$func` automatically.
///
/// The group is one of `server_extensions`, `server_lifespans` or
/// `component_contributions`.
#[macro_export]
macro_rules! declare_entry_point {
    (server_extensions, $name:expr, $func:ident) => {
        $crate::declare_entry_point!(@submit $crate::plugin::discovery::SERVER_EXTENSIONS, $name, $func);
    };
    (server_lifespans, $name:expr, $func:ident) => {
        $crate::declare_entry_point!(@submit $crate::plugin::discovery::SERVER_LIFESPANS, $name, $func);
    };
    (component_contributions, $name:expr, $func:ident) => {
        $crate::declare_entry_point!(@submit $crate::plugin::discovery::COMPONENT_CONTRIBUTIONS, $name, $func);
    };
    (@submit $group:expr, $name:expr, $func:ident) => {
        $crate::inventory::submit! {
            $crate::plugin::discovery::EntryPoint::new(
                $group,
                $name,
                $crate::plugin_reference!($func),
            )
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::plugin::catalog::PluginCatalog;
    use crate::plugin::discovery::{EntryPointSource, InventoryEntryPoints, SERVER_LIFESPANS};
    use crate::plugin::handle::PluginHandle;
    use crate::plugin::lifecycle::{Lifespan, LifespanFn};
    use crate::plugin::BoxError;

    fn sample_export(_handle: &mut PluginHandle) -> Result<(), BoxError> {
        Ok(())
    }

    fn macro_lifespan(_handle: &PluginHandle) -> Result<Box<dyn Lifespan>, BoxError> {
        Ok(Box::new(LifespanFn::on_enter("macro", || async {
            Ok::<(), BoxError>(())
        })))
    }

    // Verify macro expansion compiles
    export_extension!(sample_export, compatible = "^1");
    export_lifespan!(macro_lifespan, compatible = "^1");
    declare_entry_point!(server_lifespans, "macro-lifespan", macro_lifespan);

    #[test]
    fn test_reference_uses_module_path() {
        assert_eq!(
            plugin_reference!(sample_export),
            concat!(module_path!(), ":sample_export")
        );
    }

    #[test]
    fn test_macro_exports_are_resolvable() {
        let catalog = PluginCatalog::from_inventory();

        let sample = catalog.resolve(plugin_reference!(sample_export)).unwrap();
        assert_eq!(sample.compatibility.as_deref(), Some("^1"));
        assert_eq!(sample.entry.kind(), "extension");

        let lifespan = catalog.resolve(plugin_reference!(macro_lifespan)).unwrap();
        assert_eq!(lifespan.entry.kind(), "lifespan");
    }

    #[test]
    fn test_macro_entry_point_is_discoverable() {
        let entries = InventoryEntryPoints.entry_points(SERVER_LIFESPANS).unwrap();
        assert!(entries.iter().any(|ep| ep.name == "macro-lifespan"
            && ep.reference == plugin_reference!(macro_lifespan)));
    }
}
