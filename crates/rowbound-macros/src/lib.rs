//! Derive macro for Rowbound entities.
//!
//! `rowbound-macros` is the **compile-time codegen layer**. `#[derive(Entity)]`
//! turns a plain struct into an entity: a static field table, a parallel
//! accessor table, the dirty-set hooks and one dirty-marking setter per
//! persisted field. The session runtime reads everything it needs from
//! those tables, so no reflection happens at run time.
//!
//! Application crates use the macro through the `rowbound` facade.

use proc_macro::TokenStream;
use quote::{format_ident, quote};

mod infer;
mod parse;

use infer::{infer_sql_type, parse_sql_type_attr};
use parse::{EntityDef, FieldDef, parse_entity};

/// Derive macro for the `Entity` trait.
///
/// # Attributes
///
/// Struct level:
/// - `#[entity(table = "name")]`: table name (defaults to the snake_case,
///   pluralized struct name)
/// - `#[entity(connection = "name")]`: connection name (defaults to `default`)
///
/// Field level:
/// - `primary_key`: part of the primary key
/// - `identity`: database-generated key value (requires `primary_key`)
/// - `column = "name"`: column name override
/// - `sql_type = "VARCHAR(64)"`: explicit column type
/// - `nullable`: allow NULL (implied by `Option<T>`)
/// - `unique`: unique constraint
/// - `default = "expr"`: SQL default expression
/// - `index = "name"`: member of the named index
/// - `dirty`: the `DirtySet` field (implied by the type name `DirtySet`)
/// - `skip`: not persisted; loaded instances get `Default::default()`
///
/// Persisted field types must convert to and from `Value`.
///
/// # Example
///
/// ```ignore
/// use rowbound::prelude::*;
///
/// #[derive(Debug, Clone, Default, Entity)]
/// #[entity(table = "heroes", connection = "main")]
/// struct Hero {
///     #[entity(primary_key, identity)]
///     id: i64,
///     #[entity(unique)]
///     name: String,
///     age: Option<i32>,
///     dirty: DirtySet,
/// }
///
/// let mut hero = Hero::default();
/// hero.set_name("Rusty-Man".to_string());
/// assert!(hero.is_dirty("name"));
/// ```
#[proc_macro_derive(Entity, attributes(entity))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let entity = match parse_entity(&input) {
        Ok(e) => e,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_entity_impl(&entity).into()
}

fn generate_entity_impl(entity: &EntityDef) -> proc_macro2::TokenStream {
    let name = &entity.name;
    let table_name = &entity.table_name;
    let connection_name = &entity.connection_name;
    let dirty = &entity.dirty_field;

    let field_infos = generate_field_infos(entity);
    let accessors = generate_accessors(entity);
    let setters = generate_setters(entity);

    quote! {
        impl rowbound_core::Entity for #name {
            const TABLE_NAME: &'static str = #table_name;
            const CONNECTION_NAME: &'static str = #connection_name;

            fn fields() -> &'static [rowbound_core::FieldInfo] {
                static FIELDS: &[rowbound_core::FieldInfo] = &[#(#field_infos),*];
                FIELDS
            }

            fn accessors() -> &'static [rowbound_core::Accessor<Self>] {
                static ACCESSORS: &[rowbound_core::Accessor<#name>] = &[#(#accessors),*];
                ACCESSORS
            }

            fn dirty(&self) -> &rowbound_core::DirtySet {
                &self.#dirty
            }

            fn dirty_mut(&mut self) -> &mut rowbound_core::DirtySet {
                &mut self.#dirty
            }
        }

        impl #name {
            #(#setters)*
        }
    }
}

fn generate_field_infos(entity: &EntityDef) -> Vec<proc_macro2::TokenStream> {
    entity.fields.iter().map(field_info).collect()
}

fn field_info(field: &FieldDef) -> proc_macro2::TokenStream {
    let name = field.name.to_string();
    let column = &field.column_name;
    let sql_type = match &field.sql_type {
        Some(explicit) => parse_sql_type_attr(explicit),
        None => infer_sql_type(&field.ty),
    };
    let nullable = field.nullable;
    let primary_key = field.primary_key;
    let identity = field.identity;
    let unique = field.unique;
    let default = option_str(field.default.as_deref());
    let index = option_str(field.index.as_deref());

    quote! {
        rowbound_core::FieldInfo::new(#name, #column, #sql_type)
            .nullable(#nullable)
            .primary_key(#primary_key)
            .identity(#identity)
            .unique(#unique)
            .default_opt(#default)
            .index_opt(#index)
    }
}

fn option_str(value: Option<&str>) -> proc_macro2::TokenStream {
    match value {
        Some(v) => quote! { ::core::option::Option::Some(#v) },
        None => quote! { ::core::option::Option::None },
    }
}

fn generate_accessors(entity: &EntityDef) -> Vec<proc_macro2::TokenStream> {
    let name = &entity.name;
    entity
        .fields
        .iter()
        .map(|field| {
            let ident = &field.name;
            quote! {
                rowbound_core::Accessor {
                    get: |e: &#name| {
                        rowbound_core::Value::from(::core::clone::Clone::clone(&e.#ident))
                    },
                    set: |e: &mut #name, v: rowbound_core::Value| {
                        e.#ident = ::core::convert::TryFrom::try_from(v)?;
                        ::core::result::Result::Ok(())
                    },
                }
            }
        })
        .collect()
}

/// `set_<field>` for every persisted field: assigns and marks the field
/// dirty when the value actually changes.
fn generate_setters(entity: &EntityDef) -> Vec<proc_macro2::TokenStream> {
    let dirty = &entity.dirty_field;
    entity
        .fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let ident = &field.name;
            let ty = &field.ty;
            let setter = format_ident!("set_{}", ident);
            let doc = format!(
                "Set `{}`, marking it dirty if the value changed. Returns whether it changed.",
                ident
            );
            quote! {
                #[doc = #doc]
                #[allow(dead_code)]
                pub fn #setter(&mut self, value: #ty) -> bool {
                    if self.#ident == value {
                        return false;
                    }
                    self.#ident = value;
                    self.#dirty.mark(#idx);
                    true
                }
            }
        })
        .collect()
}
