//! Parsing for the Entity derive macro.
//!
//! Extracts struct-level and field-level `#[entity(...)]` attributes into
//! [`EntityDef`] and [`FieldDef`] for code generation.

use proc_macro2::Span;
use quote::ToTokens;
use syn::{Attribute, Data, DeriveInput, Error, Field, Fields, Ident, Lit, LitStr, Result, Type};

use crate::infer::is_option_type;

/// Connection used when a struct does not name one.
pub const DEFAULT_CONNECTION: &str = "default";

/// Parsed `#[derive(Entity)]` struct.
#[derive(Debug)]
pub struct EntityDef {
    pub name: Ident,
    pub table_name: String,
    pub connection_name: String,
    /// Persisted fields, in declaration order.
    pub fields: Vec<FieldDef>,
    /// The `DirtySet` field.
    pub dirty_field: Ident,
}

/// Parsed persisted field.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    pub column_name: String,
    pub ty: Type,
    /// Explicit SQL type (e.g. `"VARCHAR(100)"`).
    pub sql_type: Option<String>,
    pub nullable: bool,
    pub primary_key: bool,
    pub identity: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub index: Option<String>,
}

pub fn parse_entity(input: &DeriveInput) -> Result<EntityDef> {
    let name = input.ident.clone();
    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "Entity cannot be derived for generic structs",
        ));
    }

    let StructAttrs {
        table_name,
        connection_name,
    } = parse_struct_attrs(&input.attrs, &name)?;

    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            Fields::Unnamed(_) | Fields::Unit => {
                return Err(Error::new(
                    Span::call_site(),
                    "Entity requires a struct with named fields",
                ));
            }
        },
        Data::Enum(_) | Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Entity can only be derived for structs",
            ));
        }
    };

    let mut fields = Vec::new();
    let mut dirty_field = None;
    for field in named {
        match parse_field(field)? {
            Parsed::Persisted(def) => fields.push(def),
            Parsed::Dirty(ident) => {
                if dirty_field.is_some() {
                    return Err(Error::new_spanned(field, "only one field may track dirtiness"));
                }
                dirty_field = Some(ident);
            }
            Parsed::Skipped => {}
        }
    }

    let dirty_field = dirty_field.ok_or_else(|| {
        Error::new_spanned(
            &input.ident,
            "Entity requires a `DirtySet` field (mark it with #[entity(dirty)])",
        )
    })?;
    if fields.is_empty() {
        return Err(Error::new_spanned(&input.ident, "Entity requires at least one persisted field"));
    }
    if fields.iter().filter(|f| f.identity).count() > 1 {
        return Err(Error::new_spanned(&input.ident, "at most one field may be an identity"));
    }

    Ok(EntityDef {
        name,
        table_name,
        connection_name,
        fields,
        dirty_field,
    })
}

struct StructAttrs {
    table_name: String,
    connection_name: String,
}

/// Parse struct-level `#[entity(table = "...", connection = "...")]`.
fn parse_struct_attrs(attrs: &[Attribute], struct_name: &Ident) -> Result<StructAttrs> {
    let mut table_name: Option<String> = None;
    let mut connection_name: Option<String> = None;

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if table_name.is_some() {
                    return Err(Error::new_spanned(meta.path, "duplicate entity attribute: table"));
                }
                table_name = Some(identifier_value(&meta.value()?.parse()?)?);
                Ok(())
            } else if meta.path.is_ident("connection") {
                if connection_name.is_some() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "duplicate entity attribute: connection",
                    ));
                }
                connection_name = Some(identifier_value(&meta.value()?.parse()?)?);
                Ok(())
            } else {
                Err(Error::new_spanned(
                    meta.path,
                    "unknown entity struct attribute (supported: table, connection)",
                ))
            }
        })?;
    }

    Ok(StructAttrs {
        table_name: table_name.unwrap_or_else(|| derive_table_name(&struct_name.to_string())),
        connection_name: connection_name.unwrap_or_else(|| DEFAULT_CONNECTION.to_string()),
    })
}

/// String literal that must be usable as a table or connection name.
fn identifier_value(lit: &Lit) -> Result<String> {
    let Lit::Str(s) = lit else {
        return Err(Error::new_spanned(lit, "expected string literal"));
    };
    let value = s.value();
    let valid = value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(value)
    } else {
        Err(Error::new_spanned(
            s,
            "names must start with a letter or underscore and contain only letters, digits and underscores",
        ))
    }
}

/// Derive a table name: snake_case, then pluralized.
///
/// - `Hero` -> `heroes`
/// - `TeamMember` -> `team_members`
/// - `Category` -> `categories`
fn derive_table_name(struct_name: &str) -> String {
    pluralize(&to_snake_case(struct_name))
}

/// `HTTPServer` -> `http_server`, `TeamMember` -> `team_member`.
fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                if prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next.is_some_and(char::is_lowercase))
                {
                    out.push('_');
                }
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn pluralize(word: &str) -> String {
    match word {
        "person" => return "people".to_string(),
        "child" => return "children".to_string(),
        "datum" => return "data".to_string(),
        "index" => return "indices".to_string(),
        "" => return String::new(),
        _ => {}
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|end| word.ends_with(end)) {
        return format!("{word}es");
    }
    if let Some(stem) = word.strip_suffix('y') {
        if stem.chars().last().is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{stem}ies");
        }
    }
    if let Some(stem) = word.strip_suffix("fe") {
        return format!("{stem}ves");
    }
    if let Some(stem) = word.strip_suffix('f') {
        return format!("{stem}ves");
    }
    if word.ends_with('o') && word.len() >= 2 {
        let before = word.chars().rev().nth(1).unwrap_or('a');
        if !"aeiou".contains(before) && !["photo", "piano", "memo", "pro", "auto"].contains(&word) {
            return format!("{word}es");
        }
    }
    format!("{word}s")
}

enum Parsed {
    Persisted(FieldDef),
    Dirty(Ident),
    Skipped,
}

#[derive(Default)]
struct FieldAttrs {
    column: Option<String>,
    sql_type: Option<String>,
    nullable: Option<bool>,
    primary_key: bool,
    identity: bool,
    unique: bool,
    default: Option<String>,
    index: Option<String>,
    dirty: bool,
    skip: bool,
}

fn parse_field(field: &Field) -> Result<Parsed> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let attrs = parse_field_attrs(&field.attrs)?;

    if attrs.skip {
        return Ok(Parsed::Skipped);
    }
    if attrs.dirty || is_dirty_set(&field.ty) {
        return Ok(Parsed::Dirty(name));
    }
    if attrs.identity && !attrs.primary_key {
        return Err(Error::new_spanned(&name, "identity fields must also be primary_key"));
    }

    let ty = field.ty.clone();
    let nullable = attrs.nullable.unwrap_or_else(|| is_option_type(&ty));
    Ok(Parsed::Persisted(FieldDef {
        column_name: attrs.column.unwrap_or_else(|| name.to_string()),
        name,
        ty,
        sql_type: attrs.sql_type,
        nullable,
        primary_key: attrs.primary_key,
        identity: attrs.identity,
        unique: attrs.unique,
        default: attrs.default,
        index: attrs.index,
    }))
}

fn is_dirty_set(ty: &Type) -> bool {
    let text = ty.to_token_stream().to_string().replace(' ', "");
    text == "DirtySet" || text.ends_with("::DirtySet")
}

/// Parse all `#[entity(...)]` attributes on a field.
fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("entity") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("primary_key") {
                result.primary_key = true;
            } else if path.is_ident("identity") {
                result.identity = true;
            } else if path.is_ident("nullable") {
                result.nullable = Some(true);
            } else if path.is_ident("unique") {
                result.unique = true;
            } else if path.is_ident("dirty") {
                result.dirty = true;
            } else if path.is_ident("skip") {
                result.skip = true;
            } else if path.is_ident("column") {
                result.column = Some(identifier_value(&meta.value()?.parse()?)?);
            } else if path.is_ident("index") {
                result.index = Some(identifier_value(&meta.value()?.parse()?)?);
            } else if path.is_ident("sql_type") {
                let value: LitStr = meta.value()?.parse()?;
                result.sql_type = Some(value.value());
            } else if path.is_ident("default") {
                let value: LitStr = meta.value()?.parse()?;
                result.default = Some(value.value());
            } else {
                return Err(Error::new_spanned(
                    path,
                    "unknown entity field attribute (supported: primary_key, identity, nullable, \
                     unique, dirty, skip, column, index, sql_type, default)",
                ));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_table_names() {
        assert_eq!(derive_table_name("Hero"), "heroes");
        assert_eq!(derive_table_name("TeamMember"), "team_members");
        assert_eq!(derive_table_name("Category"), "categories");
        assert_eq!(derive_table_name("Person"), "people");
        assert_eq!(derive_table_name("HTTPServer"), "http_servers");
        assert_eq!(derive_table_name("Day"), "days");
    }

    #[test]
    fn test_parse_full_entity() {
        let input: DeriveInput = parse_quote! {
            #[entity(table = "heroes", connection = "main")]
            struct Hero {
                #[entity(primary_key, identity)]
                id: i64,
                #[entity(unique, column = "hero_name")]
                name: String,
                age: Option<i32>,
                #[entity(skip)]
                scratch: u8,
                dirty: DirtySet,
            }
        };
        let def = parse_entity(&input).unwrap();
        assert_eq!(def.table_name, "heroes");
        assert_eq!(def.connection_name, "main");
        assert_eq!(def.dirty_field, "dirty");
        assert_eq!(def.fields.len(), 3);
        assert!(def.fields[0].primary_key && def.fields[0].identity);
        assert_eq!(def.fields[1].column_name, "hero_name");
        assert!(def.fields[1].unique);
        assert!(def.fields[2].nullable);
    }

    #[test]
    fn test_defaults() {
        let input: DeriveInput = parse_quote! {
            struct AuditEntry {
                #[entity(primary_key)]
                id: i64,
                #[entity(dirty)]
                changes: rowbound_core::DirtySet,
            }
        };
        let def = parse_entity(&input).unwrap();
        assert_eq!(def.table_name, "audit_entries");
        assert_eq!(def.connection_name, DEFAULT_CONNECTION);
        assert_eq!(def.dirty_field, "changes");
    }

    #[test]
    fn test_rejections() {
        let missing_dirty: DeriveInput = parse_quote! {
            struct Plain { id: i64 }
        };
        assert!(parse_entity(&missing_dirty).is_err());

        let bad_table: DeriveInput = parse_quote! {
            #[entity(table = "drop table")]
            struct Bad { id: i64, dirty: DirtySet }
        };
        assert!(parse_entity(&bad_table).is_err());

        let identity_without_key: DeriveInput = parse_quote! {
            struct Loose {
                #[entity(identity)]
                id: i64,
                dirty: DirtySet,
            }
        };
        assert!(parse_entity(&identity_without_key).is_err());

        let unknown: DeriveInput = parse_quote! {
            struct Odd {
                #[entity(primary_key, shiny)]
                id: i64,
                dirty: DirtySet,
            }
        };
        assert!(parse_entity(&unknown).is_err());
    }
}
