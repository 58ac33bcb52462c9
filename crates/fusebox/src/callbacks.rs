// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

/// A macro to generate `Fn` like wrapper types with consistent patterns.
///
/// This macro generates a type that wraps a function in an `Arc<dyn Fn...>`,
/// providing `Clone`, `Debug`, and a `call` method. We need this to store
/// user-provided callbacks (selectors, subscribers, observers) in a thread-safe,
/// clonable way without leaking `dyn` plumbing into every signature.
///
/// # Syntax
///
/// ```rust,ignore
/// define_fn_wrapper!(TypeName(Fn(name: Type, ...) -> ReturnType));
/// define_fn_wrapper!(TypeName(Fn(name: Type, ...)));  // returns ()
/// ```
macro_rules! define_fn_wrapper {
    ($name:ident(Fn($($param_name:ident: $param_ty:ty),*) -> $return_ty:ty)) => {
        pub(crate) struct $name(std::sync::Arc<dyn Fn($($param_ty),*) -> $return_ty + Send + Sync>);

        impl $name {
            pub(crate) fn new<F>(callback: F) -> Self
            where
                F: Fn($($param_ty),*) -> $return_ty + Send + Sync + 'static,
            {
                Self(std::sync::Arc::new(callback))
            }

            pub(crate) fn call(&self, $($param_name: $param_ty),*) -> $return_ty {
                (self.0)($($param_name),*)
            }
        }

        impl Clone for $name {
            fn clone(&self) -> Self {
                Self(std::sync::Arc::clone(&self.0))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name)).finish()
            }
        }
    };

    // Without a return type (defaults to unit).
    ($name:ident(Fn($($param_name:ident: $param_ty:ty),*))) => {
        $crate::callbacks::define_fn_wrapper!($name(Fn($($param_name: $param_ty),*) -> ()));
    };
}

pub(crate) use define_fn_wrapper;
