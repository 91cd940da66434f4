//! Recursive-descent parser for qualified type identifiers.
//!
//! Generic arguments nest in brackets to arbitrary depth, so the parser recurses
//! into each `[...]` argument rather than scanning for a matching `]`.

use crate::ModuleIdentity;
use crate::TypeDescriptor;

/// Nesting deeper than this is rejected instead of recursing further.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Empty,
    UnexpectedEnd { expected: &'static str },
    Unexpected { found: char, at: usize, expected: &'static str },
    MissingName { at: usize },
    InvalidArity { at: usize },
    TooManyArguments { arity: usize, found: usize },
    MissingModuleField { field: &'static str, at: usize },
    TrailingInput { at: usize },
    TooDeep,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty type identifier"),
            Self::UnexpectedEnd { expected } => write!(f, "unexpected end of input, expected {}", expected),
            Self::Unexpected { found, at, expected } => {
                write!(f, "unexpected '{}' at {}, expected {}", found, at, expected)
            }
            Self::MissingName { at } => write!(f, "missing type name at {}", at),
            Self::InvalidArity { at } => write!(f, "invalid generic arity at {}", at),
            Self::TooManyArguments { arity, found } => {
                write!(f, "{} generic arguments supplied for arity {}", found, arity)
            }
            Self::MissingModuleField { field, at } => write!(f, "missing module field '{}' at {}", field, at),
            Self::TrailingInput { at } => write!(f, "trailing input at {}", at),
            Self::TooDeep => write!(f, "generic arguments nested deeper than {}", MAX_DEPTH),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn parse(input: &str) -> Result<TypeDescriptor> {
    if input.trim().is_empty() {
        return Err(Error::Empty);
    }

    let mut cursor = Cursor::new(input);
    cursor.skip_whitespace();
    let descriptor = cursor.type_descriptor(0)?;
    cursor.skip_whitespace();

    if !cursor.is_at_end() {
        return Err(Error::TrailingInput { at: cursor.pos });
    }
    Ok(descriptor)
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8, expected: &'static str) -> Result<()> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.unexpected(expected)),
            None => Err(Error::UnexpectedEnd { expected }),
        }
    }

    fn expect_literal(&mut self, literal: &'static str, field: &'static str) -> Result<()> {
        if self.input[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(Error::MissingModuleField { field, at: self.pos })
        }
    }

    fn unexpected(&self, expected: &'static str) -> Error {
        let found = self.input[self.pos..].chars().next().unwrap_or('\0');
        Error::Unexpected { found, at: self.pos, expected }
    }

    /// Consumes everything up to (not including) the first byte in `stops`.
    ///
    /// Every stop byte is ASCII, so the returned slice always ends on a char boundary.
    fn take_until(&mut self, stops: &[u8]) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if stops.contains(&b) {
                break;
            }
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    fn type_descriptor(&mut self, depth: usize) -> Result<TypeDescriptor> {
        if depth > MAX_DEPTH {
            return Err(Error::TooDeep);
        }

        let at = self.pos;
        let name = self.take_until(b"`,[]").trim_end();
        if name.is_empty() {
            return Err(Error::MissingName { at });
        }

        let mut arity = 0;
        let mut generic_arguments = Vec::new();

        if self.peek() == Some(b'`') {
            self.pos += 1;
            arity = self.arity()?;
            if self.peek() == Some(b'[') {
                generic_arguments = self.generic_arguments(depth)?;
                if generic_arguments.len() > arity {
                    return Err(Error::TooManyArguments { arity, found: generic_arguments.len() });
                }
            }
        }

        let module = self.module_identity()?;

        Ok(TypeDescriptor {
            name: name.to_string(),
            arity,
            generic_arguments,
            module,
        })
    }

    fn arity(&mut self) -> Result<usize> {
        let at = self.pos;
        let digits = self.take_until(b"[,] \t`");
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidArity { at });
        }
        digits.parse().map_err(|_| Error::InvalidArity { at })
    }

    /// `[[Arg],[Arg],...]`
    fn generic_arguments(&mut self, depth: usize) -> Result<Vec<TypeDescriptor>> {
        self.expect(b'[', "'['")?;
        let mut arguments = Vec::new();
        loop {
            self.skip_whitespace();
            self.expect(b'[', "'[' opening a generic argument")?;
            self.skip_whitespace();
            arguments.push(self.type_descriptor(depth + 1)?);
            self.skip_whitespace();
            self.expect(b']', "']' closing a generic argument")?;
            self.skip_whitespace();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(arguments);
                }
                Some(_) => return Err(self.unexpected("',' or ']'")),
                None => return Err(Error::UnexpectedEnd { expected: "']'" }),
            }
        }
    }

    /// `, Module, Version=V, Culture=C, PublicKeyToken=K`
    fn module_identity(&mut self) -> Result<ModuleIdentity> {
        let name = self.module_field(None, "module name")?;
        let version = self.module_field(Some("Version="), "Version")?;
        let culture = self.module_field(Some("Culture="), "Culture")?;
        let key_token = self.module_field(Some("PublicKeyToken="), "PublicKeyToken")?;
        Ok(ModuleIdentity { name, version, culture, key_token })
    }

    fn module_field(&mut self, label: Option<&'static str>, field: &'static str) -> Result<String> {
        if self.peek() != Some(b',') {
            return Err(Error::MissingModuleField { field, at: self.pos });
        }
        self.pos += 1;
        self.skip_whitespace();
        if let Some(label) = label {
            self.expect_literal(label, field)?;
        }

        let at = self.pos;
        let value = self.take_until(b",]").trim_end();
        if value.is_empty() {
            return Err(Error::MissingModuleField { field, at });
        }
        Ok(value.to_string())
    }
}
