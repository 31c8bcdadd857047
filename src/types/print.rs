//! Textual form of the type algebra.
//!
//! The grammar round-trips literally: `parse_type(t.to_string()) == t` for
//! every expressible shape, including nested records and attributes with
//! embedded escape sequences.
//!
//! ```text
//! type      := base attr*
//! base      := scalar | enum{..} | list<T> | map<K, V> | record{..}
//!            | name "=" "(" type ")"        -- named
//!            | "(" type ")"
//! attr      := "#" ident ("=" string)?
//! ```
//!
//! A name followed by `=` always opens a named type, so names may collide
//! with scalar keywords.

use std::fmt;

use super::{Attribute, Field, Type, TypeKind};

// -- printing ----------------------------------------------------------------

fn is_bare_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if name.split('.').all(is_bare_ident) && !name.is_empty() {
        write!(f, "{name}")
    } else {
        write_quoted(f, name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_kind() {
            TypeKind::Null => write!(f, "null")?,
            TypeKind::Bool => write!(f, "bool")?,
            TypeKind::Int64 => write!(f, "int64")?,
            TypeKind::UInt64 => write!(f, "uint64")?,
            TypeKind::Double => write!(f, "double")?,
            TypeKind::Duration => write!(f, "duration")?,
            TypeKind::Time => write!(f, "time")?,
            TypeKind::String => write!(f, "string")?,
            TypeKind::Blob => write!(f, "blob")?,
            TypeKind::Ip => write!(f, "ip")?,
            TypeKind::Subnet => write!(f, "subnet")?,
            TypeKind::Pattern => write!(f, "pattern")?,
            TypeKind::Enumeration(e) => {
                write!(f, "enum{{")?;
                for (i, v) in e.variants().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_name(f, v)?;
                }
                write!(f, "}}")?;
            }
            TypeKind::List(elem) => write!(f, "list<{elem}>")?,
            TypeKind::Map(map) => write!(f, "map<{}, {}>", map.key, map.value)?,
            TypeKind::Record(record) => {
                write!(f, "record{{")?;
                for (i, field) in record.fields().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_name(f, &field.name)?;
                    write!(f, ": {}", field.ty)?;
                }
                write!(f, "}}")?;
            }
            TypeKind::Named(named) => {
                write_name(f, &named.name)?;
                // Parentheses keep the inner type's attributes separate from
                // the wrapper's own.
                write!(f, "=({})", named.inner)?;
            }
        }
        for attr in self.attributes() {
            write!(f, " #{}", attr.key)?;
            if let Some(value) = &attr.value {
                write!(f, "=")?;
                write_quoted(f, value)?;
            }
        }
        Ok(())
    }
}

// -- parsing -----------------------------------------------------------------

/// Error produced when a type string does not conform to the grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid type at offset {offset}: {message}")]
pub struct TypeParseError {
    pub offset: usize,
    pub message: String,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

type ParseResult<T> = Result<T, TypeParseError>;

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser { input, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> TypeParseError {
        TypeParseError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> ParseResult<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{c}`")))
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                self.bump();
            }
            _ => return None,
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        Some(&self.input[start..self.pos])
    }

    fn quoted(&mut self) -> ParseResult<String> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    other => {
                        return Err(self.error(format!("invalid escape `\\{}`", {
                            other.map(String::from).unwrap_or_default()
                        })))
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    /// Bare dotted identifier or quoted string.
    fn name(&mut self) -> ParseResult<String> {
        if self.peek() == Some('"') {
            return self.quoted();
        }
        let mut name = match self.ident() {
            Some(i) => i.to_string(),
            None => return Err(self.error("expected a name")),
        };
        while self.peek() == Some('.') {
            self.bump();
            match self.ident() {
                Some(i) => {
                    name.push('.');
                    name.push_str(i);
                }
                None => return Err(self.error("expected an identifier after `.`")),
            }
        }
        Ok(name)
    }

    fn attributes(&mut self) -> ParseResult<Vec<Attribute>> {
        let mut attrs = Vec::new();
        loop {
            self.skip_ws();
            if !self.eat('#') {
                return Ok(attrs);
            }
            let key = match self.ident() {
                Some(i) => i.to_string(),
                None => return Err(self.error("expected an attribute name after `#`")),
            };
            let value = if self.eat('=') {
                Some(self.quoted()?)
            } else {
                None
            };
            attrs.push(Attribute { key, value });
        }
    }

    fn ty(&mut self) -> ParseResult<Type> {
        self.skip_ws();
        let base = self.base()?;
        let attrs = self.attributes()?;
        Ok(base.with_attributes(attrs))
    }

    fn base(&mut self) -> ParseResult<Type> {
        if self.eat('(') {
            let inner = self.ty()?;
            self.skip_ws();
            self.expect(')')?;
            return Ok(inner);
        }
        if self.peek() == Some('"') {
            // Quoted names always introduce a named type.
            let name = self.quoted()?;
            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            self.expect('(')?;
            let inner = self.ty()?;
            self.skip_ws();
            self.expect(')')?;
            return Ok(Type::named(name, inner));
        }
        let start = self.pos;
        let ident = match self.ident() {
            Some(i) => i,
            None => return Err(self.error("expected a type")),
        };
        // A dotted continuation or a following `=` marks a named-type
        // head, even when the identifier collides with a scalar keyword
        // (a type may well be called `time`).
        let is_named_head = self.peek() == Some('.') || {
            let save = self.pos;
            self.skip_ws();
            let followed_by_eq = self.peek() == Some('=');
            self.pos = save;
            followed_by_eq
        };
        if is_named_head {
            self.pos = start;
            let name = self.name()?;
            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            self.expect('(')?;
            let inner = self.ty()?;
            self.skip_ws();
            self.expect(')')?;
            return Ok(Type::named(name, inner));
        }
        match ident {
            "null" => Ok(Type::null()),
            "bool" => Ok(Type::bool_()),
            "int64" => Ok(Type::int64()),
            "uint64" => Ok(Type::uint64()),
            "double" => Ok(Type::double()),
            "duration" => Ok(Type::duration()),
            "time" => Ok(Type::time()),
            "string" => Ok(Type::string()),
            "blob" => Ok(Type::blob()),
            "ip" => Ok(Type::ip()),
            "subnet" => Ok(Type::subnet()),
            "pattern" => Ok(Type::pattern()),
            "enum" => self.enumeration(),
            "list" => {
                self.skip_ws();
                self.expect('<')?;
                let elem = self.ty()?;
                self.skip_ws();
                self.expect('>')?;
                Ok(Type::list(elem))
            }
            "map" => {
                self.skip_ws();
                self.expect('<')?;
                let key = self.ty()?;
                self.skip_ws();
                self.expect(',')?;
                let value = self.ty()?;
                self.skip_ws();
                self.expect('>')?;
                Ok(Type::map(key, value))
            }
            "record" => self.record(),
            other => Err(self.error(format!("unknown type `{other}`"))),
        }
    }

    fn enumeration(&mut self) -> ParseResult<Type> {
        self.skip_ws();
        self.expect('{')?;
        let mut variants = Vec::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                break;
            }
            variants.push(self.name()?);
            self.skip_ws();
            if !self.eat(',') {
                self.expect('}')?;
                break;
            }
        }
        Type::enumeration(variants).map_err(|e| self.error(e.to_string()))
    }

    fn record(&mut self) -> ParseResult<Type> {
        self.skip_ws();
        self.expect('{')?;
        let mut fields = Vec::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                break;
            }
            let name = self.name()?;
            self.skip_ws();
            self.expect(':')?;
            let ty = self.ty()?;
            fields.push(Field::new(name, ty));
            self.skip_ws();
            if !self.eat(',') {
                self.expect('}')?;
                break;
            }
        }
        Type::record(fields).map_err(|e| self.error(e.to_string()))
    }
}

/// Parses the textual form of a type.
pub fn parse_type(input: &str) -> Result<Type, TypeParseError> {
    let mut parser = Parser::new(input);
    let ty = parser.ty()?;
    parser.skip_ws();
    if parser.pos != input.len() {
        return Err(parser.error("trailing input after type"));
    }
    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attribute;

    fn roundtrip(ty: &Type) {
        let printed = ty.to_string();
        let parsed = parse_type(&printed).unwrap_or_else(|e| panic!("{printed}: {e}"));
        assert_eq!(&parsed, ty, "printed as {printed}");
    }

    #[test]
    fn test_scalars_roundtrip() {
        for ty in [
            Type::null(),
            Type::bool_(),
            Type::int64(),
            Type::uint64(),
            Type::double(),
            Type::duration(),
            Type::time(),
            Type::string(),
            Type::blob(),
            Type::ip(),
            Type::subnet(),
            Type::pattern(),
        ] {
            roundtrip(&ty);
        }
    }

    #[test]
    fn test_containers_roundtrip() {
        roundtrip(&Type::list(Type::ip()));
        roundtrip(&Type::map(Type::string(), Type::list(Type::uint64())));
        roundtrip(
            &Type::record(vec![
                Field::new("ts", Type::time()),
                Field::new(
                    "conn",
                    Type::record(vec![
                        Field::new("src", Type::ip()),
                        Field::new("dst", Type::ip()),
                    ])
                    .unwrap(),
                ),
            ])
            .unwrap(),
        );
        roundtrip(&Type::enumeration(vec!["tcp".into(), "udp".into(), "icmp".into()]).unwrap());
    }

    #[test]
    fn test_named_roundtrip() {
        let ty = Type::named(
            "sentra.line",
            Type::record(vec![Field::new("line", Type::string())]).unwrap(),
        );
        assert_eq!(ty.to_string(), "sentra.line=(record{line: string})");
        roundtrip(&ty);
    }

    #[test]
    fn test_attributes_roundtrip() {
        let ty = Type::string()
            .with_attribute(Attribute::flag("skip"))
            .with_attribute(Attribute::new("default", "a \"quoted\"\nvalue\t\\"));
        roundtrip(&ty);
        // Named type with attributes on both the wrapper and the inner type.
        let named = Type::named("x.y", Type::ip().with_attribute(Attribute::flag("internal")))
            .with_attribute(Attribute::new("default", "::1"));
        roundtrip(&named);
    }

    #[test]
    fn test_quoted_field_names() {
        let ty = Type::record(vec![Field::new("weird name.with dots", Type::bool_())]).unwrap();
        roundtrip(&ty);
    }

    #[test]
    fn test_nested_named_roundtrip() {
        let ty = Type::named("outer", Type::named("inner", Type::duration()));
        roundtrip(&ty);
    }

    #[test]
    fn test_keyword_collision_names_roundtrip() {
        roundtrip(&Type::named("time", Type::string()));
        roundtrip(&Type::named("record", Type::int64()));
        roundtrip(&Type::named("time.window", Type::duration()));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_type("list<").is_err());
        assert!(parse_type("record{a: int64").is_err());
        assert!(parse_type("int64 junk").is_err());
        assert!(parse_type("record{a: int64, a: string}").is_err());
        assert!(parse_type("#skip").is_err());
    }

    #[test]
    fn test_parse_accepts_whitespace() {
        let ty = parse_type(" record { a : int64 , b : list< string > } ").unwrap();
        assert_eq!(ty.as_record().unwrap().num_fields(), 2);
    }
}
