//! # Qualified Type Names
//!
//! Structured descriptors for module-qualified type identifiers, the strings
//! peers exchange to say which type a payload or a service is.
//!
//! ```text
//! Name`Arity[[Arg],[Arg]], Module, Version=V, Culture=C, PublicKeyToken=K
//! ```
//!
//! ## Invariants
//!
//! - **Structural Equality**: two descriptors are equal iff every field,
//!   including nested generic arguments, is equal.
//! - **Open vs Bound**: a descriptor is fully bound iff `arity == generic_arguments.len()`.
//!   Shorter argument lists describe open (or partially bound) generics. They are
//!   valid registry keys but never valid call targets.
//! - **Round Trip**: `parse(d.to_string()) == d` for every descriptor.

use std::fmt;

mod parse;

pub use parse::Error;
pub use parse::Result;

/// The module that defines a type: name, version, culture and key token.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModuleIdentity {
    pub name: String,
    pub version: String,
    pub culture: String,
    pub key_token: String,
}

impl ModuleIdentity {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        culture: impl Into<String>,
        key_token: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            culture: culture.into(),
            key_token: key_token.into(),
        }
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, Version={}, Culture={}, PublicKeyToken={}",
            self.name, self.version, self.culture, self.key_token
        )
    }
}

/// A parsed type identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub name: String,
    pub arity: usize,
    pub generic_arguments: Vec<TypeDescriptor>,
    pub module: ModuleIdentity,
}

/// The lookup key shared by every instantiation of one generic definition.
///
/// Culture is deliberately absent: it never distinguishes registrations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey {
    pub module_name: String,
    pub module_version: String,
    pub key_token: String,
    pub name: String,
    pub arity: usize,
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            self.module_name, self.module_version, self.key_token, self.name, self.arity
        )
    }
}

impl TypeDescriptor {
    /// A non-generic type.
    pub fn new(name: impl Into<String>, module: ModuleIdentity) -> Self {
        Self {
            name: name.into(),
            arity: 0,
            generic_arguments: Vec::new(),
            module,
        }
    }

    /// A fully bound generic instantiation; arity is the argument count.
    pub fn generic(
        name: impl Into<String>,
        generic_arguments: Vec<TypeDescriptor>,
        module: ModuleIdentity,
    ) -> Self {
        Self {
            name: name.into(),
            arity: generic_arguments.len(),
            generic_arguments,
            module,
        }
    }

    /// An open generic definition with no bound arguments.
    pub fn open(name: impl Into<String>, arity: usize, module: ModuleIdentity) -> Self {
        Self {
            name: name.into(),
            arity,
            generic_arguments: Vec::new(),
            module,
        }
    }

    /// Parses a canonical type identifier.
    pub fn parse(input: &str) -> Result<Self> {
        parse::parse(input)
    }

    pub fn is_generic(&self) -> bool {
        self.arity > 0
    }

    pub fn is_fully_bound(&self) -> bool {
        self.arity == self.generic_arguments.len()
            && self.generic_arguments.iter().all(TypeDescriptor::is_fully_bound)
    }

    /// The open form of this descriptor, with every argument dropped.
    pub fn definition(&self) -> Self {
        self.bound_prefix(0)
    }

    /// This descriptor with only its first `n` generic arguments kept.
    pub fn bound_prefix(&self, n: usize) -> Self {
        let n = n.min(self.generic_arguments.len());
        Self {
            name: self.name.clone(),
            arity: self.arity,
            generic_arguments: self.generic_arguments[..n].to_vec(),
            module: self.module.clone(),
        }
    }

    pub fn key(&self) -> TypeKey {
        TypeKey {
            module_name: self.module.name.clone(),
            module_version: self.module.version.clone(),
            key_token: self.module.key_token.clone(),
            name: self.name.clone(),
            arity: self.arity,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.arity > 0 {
            write!(f, "`{}", self.arity)?;
        }
        if !self.generic_arguments.is_empty() {
            f.write_str("[")?;
            for (i, arg) in self.generic_arguments.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "[{}]", arg)?;
            }
            f.write_str("]")?;
        }
        write!(f, ", {}", self.module)
    }
}

impl std::str::FromStr for TypeDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
