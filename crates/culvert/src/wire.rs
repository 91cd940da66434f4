//! # Wire Types
//!
//! Every value that crosses the wire carries a qualified type identifier. `WireType`
//! ties a Rust type to its identifier; the serialisation gate refuses anything whose
//! identifier is not on the allow-list.
//!
//! Builtins live in the module `std`. User types declare themselves with
//! [`wire_type!`](crate::wire_type) or a hand-written impl.

use std::collections::HashMap;
use std::hash::Hash;

use qualname::ModuleIdentity;
use qualname::TypeDescriptor;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub trait WireType: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn descriptor() -> TypeDescriptor;
}

pub fn std_module() -> ModuleIdentity {
    ModuleIdentity::new("std", "1.0.0.0", "neutral", "null")
}

macro_rules! scalar {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl WireType for $ty {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::new($name, std_module())
                }
            }
        )*
    };
}

scalar! {
    bool => "bool",
    char => "char",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    f32 => "f32",
    f64 => "f64",
    String => "String",
}

impl<T: WireType> WireType for Vec<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::generic("Vec", vec![T::descriptor()], std_module())
    }
}

impl<T: WireType> WireType for Option<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::generic("Option", vec![T::descriptor()], std_module())
    }
}

impl<K, V> WireType for HashMap<K, V>
where
    K: WireType + Eq + Hash,
    V: WireType,
{
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::generic("HashMap", vec![K::descriptor(), V::descriptor()], std_module())
    }
}

impl<A: WireType, B: WireType> WireType for (A, B) {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::generic("Tuple", vec![A::descriptor(), B::descriptor()], std_module())
    }
}

impl<A: WireType, B: WireType, C: WireType> WireType for (A, B, C) {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::generic(
            "Tuple",
            vec![A::descriptor(), B::descriptor(), C::descriptor()],
            std_module(),
        )
    }
}

/// Declares the wire identity of a non-generic type.
///
/// ```ignore
/// wire_type!(Point => "geo.Point");
/// wire_type!(Point => "geo.Point", module = "geo", version = "2.0.0");
/// ```
///
/// Without an explicit module the declaring package's name and version are used.
#[macro_export]
macro_rules! wire_type {
    ($ty:ty => $name:expr) => {
        $crate::wire_type!($ty => $name, module = ::core::env!("CARGO_PKG_NAME"), version = ::core::env!("CARGO_PKG_VERSION"));
    };
    ($ty:ty => $name:expr, module = $module:expr, version = $version:expr) => {
        impl $crate::wire::WireType for $ty {
            fn descriptor() -> $crate::TypeDescriptor {
                $crate::TypeDescriptor::new(
                    $name,
                    $crate::ModuleIdentity::new($module, $version, "neutral", "null"),
                )
            }
        }
    };
}
