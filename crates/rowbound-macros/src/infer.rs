//! SQL type inference for entity fields.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{GenericArgument, PathArguments, Type};

/// Infer the column type of a Rust field type, as a `SqlType` expression.
///
/// `Option<T>` maps like `T`. Unknown types fall back to `Text`.
pub fn infer_sql_type(ty: &Type) -> TokenStream {
    let inner = unwrap_option_type(ty);
    match type_to_string(inner).as_str() {
        "bool" => quote! { rowbound_core::SqlType::Boolean },

        "i8" | "i16" | "u8" => quote! { rowbound_core::SqlType::SmallInt },
        "i32" | "u16" => quote! { rowbound_core::SqlType::Integer },
        "i64" | "u32" | "u64" => quote! { rowbound_core::SqlType::BigInt },

        "f32" | "f64" => quote! { rowbound_core::SqlType::Double },

        "String" | "&str" | "str" | "char" => quote! { rowbound_core::SqlType::Text },

        "Vec<u8>" => quote! { rowbound_core::SqlType::Blob },

        "[u8;16]" | "Uuid" | "uuid::Uuid" => quote! { rowbound_core::SqlType::Uuid },

        "serde_json::Value" | "JsonValue" => quote! { rowbound_core::SqlType::Json },

        "rust_decimal::Decimal" | "Decimal" => {
            quote! { rowbound_core::SqlType::Decimal { precision: 38, scale: 18 } }
        }

        _ => quote! { rowbound_core::SqlType::Text },
    }
}

/// Parse an explicit `sql_type = "..."` attribute.
///
/// Unrecognized names become `SqlType::Custom` with the original spelling.
pub fn parse_sql_type_attr(sql_type: &str) -> TokenStream {
    let upper = sql_type.trim().to_uppercase();

    if let Some(len) = parenthesized(&upper, "VARCHAR(").and_then(|s| s.parse::<u32>().ok()) {
        return quote! { rowbound_core::SqlType::VarChar(#len) };
    }
    for prefix in ["DECIMAL(", "NUMERIC("] {
        if let Some((p, s)) = parenthesized(&upper, prefix).and_then(|s| s.split_once(',')) {
            if let (Ok(p), Ok(s)) = (p.trim().parse::<u8>(), s.trim().parse::<u8>()) {
                return quote! { rowbound_core::SqlType::Decimal { precision: #p, scale: #s } };
            }
        }
    }

    match upper.as_str() {
        "SMALLINT" | "INT2" | "TINYINT" => quote! { rowbound_core::SqlType::SmallInt },
        "INTEGER" | "INT" | "INT4" => quote! { rowbound_core::SqlType::Integer },
        "BIGINT" | "INT8" => quote! { rowbound_core::SqlType::BigInt },
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" | "FLOAT" | "REAL" => {
            quote! { rowbound_core::SqlType::Double }
        }
        "DECIMAL" | "NUMERIC" => {
            quote! { rowbound_core::SqlType::Decimal { precision: 38, scale: 18 } }
        }
        "BOOLEAN" | "BOOL" => quote! { rowbound_core::SqlType::Boolean },
        "TEXT" => quote! { rowbound_core::SqlType::Text },
        "VARCHAR" => quote! { rowbound_core::SqlType::VarChar(255) },
        "BLOB" | "BYTEA" => quote! { rowbound_core::SqlType::Blob },
        "TIMESTAMP" | "DATETIME" => quote! { rowbound_core::SqlType::Timestamp },
        "UUID" => quote! { rowbound_core::SqlType::Uuid },
        "JSON" | "JSONB" => quote! { rowbound_core::SqlType::Json },
        _ => {
            let custom = sql_type.trim();
            quote! { rowbound_core::SqlType::Custom(#custom) }
        }
    }
}

fn parenthesized<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    s.strip_prefix(prefix)?.strip_suffix(')').map(str::trim)
}

/// Unwrap `Option<T>` to `T`, or return the type unchanged.
pub fn unwrap_option_type(ty: &Type) -> &Type {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(GenericArgument::Type(inner)) = args.args.first() {
                        return inner;
                    }
                }
            }
        }
    }
    ty
}

pub fn is_option_type(ty: &Type) -> bool {
    !std::ptr::eq(unwrap_option_type(ty), ty)
}

fn type_to_string(ty: &Type) -> String {
    use quote::ToTokens;
    ty.to_token_stream().to_string().replace(' ', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_infer_primitives() {
        let ty: Type = parse_quote!(i32);
        assert!(infer_sql_type(&ty).to_string().contains("Integer"));

        let ty: Type = parse_quote!(i64);
        assert!(infer_sql_type(&ty).to_string().contains("BigInt"));

        let ty: Type = parse_quote!(bool);
        assert!(infer_sql_type(&ty).to_string().contains("Boolean"));

        let ty: Type = parse_quote!(Vec<u8>);
        assert!(infer_sql_type(&ty).to_string().contains("Blob"));
    }

    #[test]
    fn test_infer_option_and_fallback() {
        let ty: Type = parse_quote!(Option<i32>);
        assert!(infer_sql_type(&ty).to_string().contains("Integer"));
        assert!(is_option_type(&ty));

        let ty: Type = parse_quote!(MyNewtype);
        assert!(infer_sql_type(&ty).to_string().contains("Text"));
        assert!(!is_option_type(&ty));
    }

    #[test]
    fn test_parse_sql_type_attr() {
        let varchar = parse_sql_type_attr("varchar(100)").to_string();
        assert!(varchar.contains("VarChar"));
        assert!(varchar.contains("100"));

        let decimal = parse_sql_type_attr("NUMERIC(10, 2)").to_string();
        assert!(decimal.contains("Decimal"));
        assert!(decimal.contains("10"));

        let custom = parse_sql_type_attr("citext").to_string();
        assert!(custom.contains("Custom"));
        assert!(custom.contains("\"citext\""));
    }
}
